use std::{future::Future, pin::Pin};

use anyhow::Result;

use crate::models::Advisor;

pub mod defaults;
pub mod rest_client;

pub use defaults::default_roster;
pub use rest_client::RestRosterClient;

/// Source of the default advisor roster (the hosted backend in production).
pub trait RosterSource: Send + Sync {
    fn fetch_roster<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Vec<Advisor>>> + Send + 'a>>;
}

/// Serves a fixed roster; used when no backend is configured.
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    advisors: Vec<Advisor>,
}

impl StaticRoster {
    pub fn new(advisors: Vec<Advisor>) -> Self {
        Self { advisors }
    }
}

impl RosterSource for StaticRoster {
    fn fetch_roster<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Vec<Advisor>>> + Send + 'a>> {
        Box::pin(async move { Ok(self.advisors.clone()) })
    }
}

/// Used when no backend URL is configured; always falls through to the
/// built-in panel.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredRoster;

impl RosterSource for UnconfiguredRoster {
    fn fetch_roster<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Vec<Advisor>>> + Send + 'a>> {
        Box::pin(async { Err(anyhow::anyhow!("no backend configured for the advisor roster")) })
    }
}
