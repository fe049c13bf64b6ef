//! Session identifiers.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Process-unique token naming one shadow session.
///
/// The id doubles as the name of the session's directory under the staging
/// root, so it must be a single path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validates and wraps an externally chosen id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let reason = if id.is_empty() {
            Some("session id is empty")
        } else if id == "." || id == ".." {
            Some("session id is a relative path component")
        } else if id.contains(['/', '\\', ':']) {
            Some("session id must be a single path segment")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(StoreError::InvalidPath {
                path: id,
                reason: reason.to_string(),
            }),
            None => Ok(Self(id)),
        }
    }

    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = StoreError;

    fn try_from(id: String) -> Result<Self> {
        Self::new(id)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}
