use thiserror::Error;

/// Failures surfaced to the owner of a realtime scope. None of these are
/// retried by the manager; the owner re-subscribes after a transient failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RealtimeError {
    #[error("realtime connection failed: {0}")]
    Connect(String),

    #[error("realtime transport is closed")]
    TransportClosed,

    #[error("failed to send frame on {topic}: {reason}")]
    Send { topic: String, reason: String },

    #[error("join rejected for {topic}: {reason}")]
    JoinRejected { topic: String, reason: String },

    #[error("channel {topic} reported an error")]
    ChannelError { topic: String },

    #[error("channel {topic} was closed by the server")]
    ChannelClosed { topic: String },

    #[error("malformed {event} payload on {topic}: {reason}")]
    Malformed {
        topic: String,
        event: String,
        reason: String,
    },

    #[error("could not decode {entity} row on {topic}: {reason}")]
    Decode {
        topic: String,
        entity: &'static str,
        reason: String,
    },
}

impl RealtimeError {
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Connect(_) | Self::TransportClosed => None,
            Self::Send { topic, .. }
            | Self::JoinRejected { topic, .. }
            | Self::ChannelError { topic }
            | Self::ChannelClosed { topic }
            | Self::Malformed { topic, .. }
            | Self::Decode { topic, .. } => Some(topic),
        }
    }
}
