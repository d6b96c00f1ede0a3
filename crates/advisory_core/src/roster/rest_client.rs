use std::{future::Future, pin::Pin};

use anyhow::{Context, Result};
use serde::Deserialize;

use super::RosterSource;
use crate::models::Advisor;

/// Fetches the advisor table through the backend's REST interface.
#[derive(Clone)]
pub struct RestRosterClient {
    http_client: reqwest::Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
}

impl RestRosterClient {
    pub fn with_config(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            anon_key: anon_key.into(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.anon_key)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/rest/v1/advisors?select=*&order=sort_order.asc",
            self.base_url.trim_end_matches('/')
        )
    }
}

impl RosterSource for RestRosterClient {
    fn fetch_roster<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Vec<Advisor>>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .http_client
                .get(self.endpoint())
                .header("apikey", &self.anon_key)
                .header("Authorization", format!("Bearer {}", self.bearer()))
                .header("Accept", "application/json")
                .send()
                .await
                .context("failed to call advisor roster endpoint")?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(anyhow::anyhow!("advisor roster request failed ({status}): {body}"));
            }

            let rows: Vec<AdvisorRow> = response
                .json()
                .await
                .context("failed to parse advisor roster response")?;

            Ok(rows.into_iter().map(Advisor::from).collect())
        })
    }
}

/// Backend row shape (snake_case columns).
#[derive(Debug, Deserialize)]
pub(crate) struct AdvisorRow {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    expertise: Vec<String>,
    #[serde(default)]
    personality: String,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    is_host: bool,
    #[serde(default)]
    is_celebrity: bool,
    #[serde(default)]
    is_custom: bool,
}

impl From<AdvisorRow> for Advisor {
    fn from(row: AdvisorRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            role: row.role,
            expertise: row.expertise,
            personality: row.personality,
            avatar: row.avatar_url,
            is_host: row.is_host,
            is_celebrity: row.is_celebrity,
            is_custom: row.is_custom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_trims_trailing_slash() {
        let client = RestRosterClient::with_config(
            reqwest::Client::new(),
            "https://project.example.co/",
            "anon",
        );
        assert_eq!(
            client.endpoint(),
            "https://project.example.co/rest/v1/advisors?select=*&order=sort_order.asc"
        );
    }

    #[test]
    fn signed_in_token_replaces_anon_bearer() {
        let client = RestRosterClient::with_config(reqwest::Client::new(), "https://x.example", "anon");
        assert_eq!(client.bearer(), "anon");

        let client = client.with_access_token("user-jwt");
        assert_eq!(client.bearer(), "user-jwt");
    }

    #[test]
    fn backend_rows_map_to_advisors() {
        let rows: Vec<AdvisorRow> = serde_json::from_value(json!([
            {
                "id": "warren",
                "name": "Warren",
                "role": "Investor",
                "expertise": ["value investing"],
                "avatar_url": "https://cdn.example/w.png",
                "is_celebrity": true
            }
        ]))
        .unwrap();

        let advisor = Advisor::from(rows.into_iter().next().unwrap());
        assert!(advisor.is_celebrity);
        assert!(!advisor.is_host);
        assert_eq!(advisor.avatar.as_deref(), Some("https://cdn.example/w.png"));
    }
}
