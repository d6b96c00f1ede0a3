use std::fmt;

use serde::Serialize;

/// A realtime channel boundary. One open channel per scope name.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Scope {
    Conversation(String),
    Documents(String),
    Meeting(String),
    Usage(String),
}

/// A `postgres_changes` subscription entry sent in the join payload.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct ChangeFilter {
    pub event: &'static str,
    pub schema: &'static str,
    pub table: &'static str,
    pub filter: String,
}

impl ChangeFilter {
    fn new(event: &'static str, table: &'static str, column: &str, value: &str) -> Self {
        Self {
            event,
            schema: "public",
            table,
            filter: format!("{column}=eq.{value}"),
        }
    }
}

impl Scope {
    /// Channel name, e.g. `conversation:c1`.
    pub fn name(&self) -> String {
        match self {
            Self::Conversation(id) => format!("conversation:{id}"),
            Self::Documents(user_id) => format!("documents:{user_id}"),
            Self::Meeting(id) => format!("meeting:{id}"),
            Self::Usage(user_id) => format!("usage:{user_id}"),
        }
    }

    pub fn topic(&self) -> String {
        format!("realtime:{}", self.name())
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Conversation(id) | Self::Documents(id) | Self::Meeting(id) | Self::Usage(id) => id,
        }
    }

    pub fn postgres_changes(&self) -> Vec<ChangeFilter> {
        match self {
            Self::Conversation(id) => vec![
                ChangeFilter::new("INSERT", "messages", "conversation_id", id),
                ChangeFilter::new("UPDATE", "conversations", "id", id),
            ],
            Self::Documents(user_id) => vec![ChangeFilter::new("*", "documents", "user_id", user_id)],
            Self::Meeting(id) => vec![ChangeFilter::new("INSERT", "meeting_messages", "meeting_id", id)],
            Self::Usage(user_id) => vec![ChangeFilter::new("*", "usage_events", "user_id", user_id)],
        }
    }

    /// Scopes where participants see each other.
    pub fn tracks_presence(&self) -> bool {
        matches!(self, Self::Conversation(_) | Self::Meeting(_))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_topics_follow_scope_kind() {
        let scope = Scope::Meeting("m-7".to_string());
        assert_eq!(scope.name(), "meeting:m-7");
        assert_eq!(scope.topic(), "realtime:meeting:m-7");
        assert_eq!(Scope::Usage("u1".to_string()).name(), "usage:u1");
    }

    #[test]
    fn conversation_filters_cover_messages_and_metadata() {
        let filters = Scope::Conversation("c1".to_string()).postgres_changes();
        let tables: Vec<&str> = filters.iter().map(|filter| filter.table).collect();
        assert_eq!(tables, vec!["messages", "conversations"]);
        assert_eq!(filters[0].filter, "conversation_id=eq.c1");
        assert_eq!(filters[1].filter, "id=eq.c1");
    }
}
