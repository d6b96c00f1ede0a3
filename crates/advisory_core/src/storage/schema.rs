use std::fmt;

use serde::{Deserialize, Serialize};

/// A state slice that is mirrored to durable storage under its own key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Slice {
    Documents,
    Conversations,
    Settings,
    Preferences,
}

impl Slice {
    pub const ALL: [Slice; 4] = [
        Slice::Documents,
        Slice::Conversations,
        Slice::Settings,
        Slice::Preferences,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::Conversations => "conversations",
            Self::Settings => "settings",
            Self::Preferences => "preferences",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|slice| slice.key() == key)
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
