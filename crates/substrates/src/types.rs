//! Core result, error, and identity types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Result type for substrates operations
pub type SubstratesResult<T> = Result<T, SubstratesError>;

/// Errors that can occur in substrates operations
#[derive(Debug, thiserror::Error)]
pub enum SubstratesError {
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("resource closed: {0}")]
    Closed(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("channel error: {0}")]
    ChannelError(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Unique identifier for engine entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id(Uuid);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subject type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectType {
    Cell,
    Channel,
    Circuit,
    Clock,
    Conduit,
    Cortex,
    Current,
    Pipe,
    Reservoir,
    Scope,
    Source,
    Subscriber,
    Subscription,
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
