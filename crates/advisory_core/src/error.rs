use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A handle outlived the store that issued it. Consumers treat this as a
    /// programming error.
    #[error("store accessed outside of its provider (store disposed or dropped)")]
    OutsideProvider,
}

#[derive(Debug, Error)]
pub enum ActionDecodeError {
    #[error("action is missing a string `type` field")]
    MissingType,

    #[error("invalid payload for {action_type}: {source}")]
    InvalidPayload {
        action_type: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
