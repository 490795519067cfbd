use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::bus::BusError;
use crate::store::StoreError;

/// Error taxonomy for the correlation engine.
///
/// Validation and transition-invariant errors propagate immediately and are
/// never retried. Correlation failures (timeout, send, reply processing) move
/// the owning workflow to `errored`, are checkpointed, and re-raised once to
/// the caller that triggered them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid arguments: {reason}")]
    InvalidArguments { reason: String },

    #[error("invalid identifier: {field} must be a non-empty string")]
    InvalidIdentifier { field: &'static str },

    #[error("no transition '{transition}' is defined from state '{state}'")]
    InvalidTransition { transition: String, state: String },

    #[error("transition '{pending}' is in flight, cannot start '{transition}'")]
    TransitionInProgress { transition: String, pending: String },

    #[error("no reply on channel '{channel}' within {timeout_ms}ms")]
    CorrelationTimeout { channel: String, timeout_ms: u64 },

    #[error("outbound request for channel '{channel}' failed: {source}")]
    Send {
        channel: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to process reply on channel '{channel}': {reason}")]
    ReplyProcessing { channel: String, reason: String },

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("notification bus error: {0}")]
    Bus(#[from] BusError),

    #[error("no checkpoint found for key '{key}'")]
    NotFound { key: String },

    #[error("transition '{transition}' failed in state '{state}'")]
    TransitionFailed {
        transition: String,
        state: String,
        /// Value-copied snapshot of the workflow data at the moment of
        /// failure. A copy, never a reference into the live workflow, so the
        /// error can be serialized without chasing a cycle back into the
        /// state that owns it.
        state_snapshot: Value,
        #[source]
        source: Box<EngineError>,
    },

    #[error("workflow exceeded {limit} transitions without reaching a terminal state")]
    TransitionLimitExceeded { limit: usize },

    #[error("malformed machine spec: {reason}")]
    InvalidSpec { reason: String },
}

impl EngineError {
    /// Walks through `TransitionFailed` annotation layers to the error that
    /// actually triggered the failure.
    pub fn origin(&self) -> &EngineError {
        match self {
            EngineError::TransitionFailed { source, .. } => source.origin(),
            other => other,
        }
    }

    pub fn reply_processing(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::ReplyProcessing {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Short stable name for persisting into workflow data.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidArguments { .. } => "InvalidArguments",
            EngineError::InvalidIdentifier { .. } => "InvalidIdentifier",
            EngineError::InvalidTransition { .. } => "InvalidTransition",
            EngineError::TransitionInProgress { .. } => "TransitionInProgress",
            EngineError::CorrelationTimeout { .. } => "CorrelationTimeout",
            EngineError::Send { .. } => "SendError",
            EngineError::ReplyProcessing { .. } => "ReplyProcessingError",
            EngineError::Persistence(_) => "PersistenceError",
            EngineError::Bus(_) => "BusError",
            EngineError::NotFound { .. } => "NotFound",
            EngineError::TransitionFailed { .. } => "TransitionFailed",
            EngineError::TransitionLimitExceeded { .. } => "TransitionLimitExceeded",
            EngineError::InvalidSpec { .. } => "InvalidSpec",
        }
    }
}

/// Serializable record of a failure, kept inside workflow data so an errored
/// checkpoint explains itself after a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSnapshot {
    pub kind: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorSnapshot {
    pub fn from_error(error: &EngineError) -> Self {
        let origin = error.origin();
        Self {
            kind: origin.kind().to_string(),
            message: origin.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

/// Domain-level error payload carried in counter-party replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInformation {
    pub error_code: String,
    pub error_description: String,
}
