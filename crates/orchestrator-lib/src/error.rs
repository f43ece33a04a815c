//! Error taxonomy for outbound calls and run pre-flight checks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Raised without invoking the operation while a breaker is open
#[derive(Debug, Clone, PartialEq, Error)]
#[error("circuit '{dependency}' is open (failures: {failure_count}, retry in {retry_after:?})")]
pub struct CircuitOpenError {
    /// Dependency the breaker guards
    pub dependency: String,
    /// Consecutive failures that opened the circuit
    pub failure_count: u32,
    /// Time left until the breaker admits a trial call
    pub retry_after: Duration,
}

/// Failure of a single outbound operation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// Network timeout, throttling, 5xx: worth retrying
    #[error("transient failure: {0}")]
    Transient(String),

    /// Authorization or validation failure: never retried
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// A single attempt exceeded the per-call timeout
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: Box<CallError>,
    },

    /// The run was cancelled or its deadline passed mid-call
    #[error("call cancelled")]
    Cancelled,
}

impl CallError {
    pub fn transient(message: impl Into<String>) -> Self {
        CallError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        CallError::Permanent(message.into())
    }

    /// Whether the default retry predicate retries this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Transient(_) | CallError::Timeout(_))
    }

    /// Whether the error says anything about the dependency's health
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, CallError::Cancelled | CallError::CircuitOpen(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Transient(_) => ErrorKind::Transient,
            CallError::Permanent(_) => ErrorKind::Permanent,
            CallError::Timeout(_) => ErrorKind::Timeout,
            CallError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            CallError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            CallError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// The innermost error, unwrapping `RetryExhausted`
    pub fn root(&self) -> &CallError {
        match self {
            CallError::RetryExhausted { last_error, .. } => last_error.root(),
            other => other,
        }
    }
}

/// Classification recorded in failure ledgers and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    Timeout,
    CircuitOpen,
    RetryExhausted,
    Cancelled,
    /// Unit still running when the run deadline passed
    DeadlineExceeded,
    /// Worker task panicked or was aborted
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RetryExhausted => "retry_exhausted",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Model invariant violations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{field} must be non-negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("{field} must be within [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },

    #[error("time range end must be after start")]
    InvalidTimeRange,

    #[error("currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    #[error("unknown {kind} '{value}'")]
    Unknown { kind: &'static str, value: String },
}

/// Errors that abort `run_analysis` before any outbound call
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid analysis request: {0}")]
    InvalidRequest(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
