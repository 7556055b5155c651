//! Error types for telelink-core.
//!
//! This module defines every error the connectivity core can report, grouped
//! the way the lifecycle reacts to them.
//!
//! # Error Classes
//!
//! | Error Type | Class | Lifecycle reaction |
//! |------------|-------|--------------------|
//! | [`Error::Link`] | Transient | Retried up to the link [`RetryPolicy`](crate::RetryPolicy) |
//! | [`Error::Session`] during connect | Transient | Retried up to the session policy |
//! | [`Error::StageFailed`] | Fatal | Immediate teardown, no retry |
//! | [`Error::TransportExhausted`] | Terminal | Teardown, lifecycle exits |
//! | [`Error::SessionExhausted`] | Terminal | Teardown, lifecycle exits |
//! | [`Error::Protocol`] | Asynchronous | Routed through the command queue, never handled inline |
//! | [`Error::InvalidConfig`] | Fatal | Fix configuration and restart |
//!
//! Asynchronous disconnection is never an error value: it arrives as a
//! [`PendingCommand::Disconnected`](crate::PendingCommand::Disconnected).
//!
//! ## Retry Classification
//!
//! [`Error::is_retryable`] decides whether [`with_retry`](crate::with_retry)
//! makes another attempt. Only link, session and I/O errors are retryable;
//! everything else stops the retry loop on the spot.

use thiserror::Error;

use crate::ledger::Stage;

/// Sub-stage of the messaging session bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    /// Process-wide messaging library initialization.
    LibraryInit,
    /// Send/receive buffer allocation.
    BufferAllocation,
    /// Session object creation.
    Create,
    /// Client identifier generation.
    Identifier,
    /// Broker connection.
    Connect,
}

impl std::fmt::Display for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::LibraryInit => "library init",
            Self::BufferAllocation => "buffer allocation",
            Self::Create => "session create",
            Self::Identifier => "identifier generation",
            Self::Connect => "session connect",
        };
        f.write_str(name)
    }
}

/// Publish or subscribe failure reported out-of-band.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolFailure {
    /// A publish was rejected or could not be sent.
    Publish { topic: String, reason: String },
    /// A subscribe was rejected or could not be sent.
    Subscribe { topic: String, reason: String },
}

impl std::fmt::Display for ProtocolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Publish { topic, reason } => write!(f, "publish to '{}' failed: {}", topic, reason),
            Self::Subscribe { topic, reason } => {
                write!(f, "subscribe to '{}' failed: {}", topic, reason)
            }
        }
    }
}

/// Errors that can occur while bringing up, running or tearing down the
/// connectivity stack.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Transport link error (association, addressing, probe failure).
    #[error("Link error: {0}")]
    Link(String),

    /// Messaging session error in a given sub-stage.
    #[error("Session error during {stage}: {message}")]
    Session {
        /// The sub-stage that failed.
        stage: SessionStage,
        /// Description reported by the messaging library.
        message: String,
    },

    /// The link connect retry loop ran out of attempts.
    #[error("Transport link exhausted after {attempts} attempts: {last}")]
    TransportExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last: Box<Error>,
    },

    /// The session connect retry loop ran out of attempts.
    #[error("Session connect exhausted after {attempts} attempts: {last}")]
    SessionExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last: Box<Error>,
    },

    /// A non-retryable acquisition stage failed.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        /// The acquisition stage that failed.
        stage: Stage,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// The network buffer could not be allocated.
    #[error("Failed to allocate {size} byte network buffer")]
    BufferAllocation {
        /// Requested size in bytes.
        size: usize,
    },

    /// A unique client identifier could not be built.
    #[error("Invalid client identifier: {0}")]
    Identifier(String),

    /// Publish or subscribe failure.
    #[error("Protocol failure: {0}")]
    Protocol(ProtocolFailure),

    /// The command queue has no receiver left.
    #[error("Command queue closed")]
    QueueClosed,

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Sensor sampling failed.
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Display refresh failed.
    #[error("Display error: {0}")]
    Display(String),

    /// Value conversion failed.
    #[error(transparent)]
    Parse(#[from] telelink_types::ParseError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a link error.
    pub fn link(message: impl Into<String>) -> Self {
        Self::Link(message.into())
    }

    /// Create a session error for a sub-stage.
    pub fn session(stage: SessionStage, message: impl Into<String>) -> Self {
        Self::Session {
            stage,
            message: message.into(),
        }
    }

    /// Wrap a failure as a fatal stage failure.
    pub fn stage_failed(stage: Stage, source: Error) -> Self {
        Self::StageFailed {
            stage,
            source: Box::new(source),
        }
    }

    /// Create a publish failure.
    pub fn publish_failed(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol(ProtocolFailure::Publish {
            topic: topic.into(),
            reason: reason.into(),
        })
    }

    /// Create a subscribe failure.
    pub fn subscribe_failed(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol(ProtocolFailure::Subscribe {
            topic: topic.into(),
            reason: reason.into(),
        })
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether a retry loop should make another attempt after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Link(_) => true,
            Error::Session { stage, .. } => matches!(stage, SessionStage::Connect),
            Error::Io(_) => true,
            Error::TransportExhausted { .. }
            | Error::SessionExhausted { .. }
            | Error::StageFailed { .. }
            | Error::BufferAllocation { .. }
            | Error::Identifier(_)
            | Error::Protocol(_)
            | Error::QueueClosed
            | Error::Cancelled
            | Error::Sensor(_)
            | Error::Display(_)
            | Error::Parse(_)
            | Error::InvalidConfig(_) => false,
        }
    }
}

/// Result type alias using telelink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
