//! Unified error handling for the watcher.
//!
//! Portal, session and scheduler operations return `WatcherResult<T>`. Scheduled task actions
//! work in `anyhow::Result` and decide on terminal failures before converting.

use thiserror::Error;

/// Authentication failures of the SSO flow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The identity provider returned no signed assertion for our login/password
    #[error("invalid credentials: the identity provider returned no assertion")]
    InvalidCredentials,

    /// The SSO sequence completed but the portal still shows the login form
    #[error("session not established after SSO sequence")]
    SessionNotEstablished,
}

/// Faults raised by the task scheduler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerFault {
    #[error("task id {0} is already scheduled")]
    DuplicateId(String),

    #[error("no scheduled task with id {0}")]
    UnknownId(String),

    #[error("scheduler is stopped")]
    Stopped,
}

/// Unified error type for watcher components
#[derive(Debug, Error)]
pub enum WatcherError {
    /// Transport failure talking to the portal or the push service
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Expected structure absent from a fetched page or feed
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerFault),

    /// Push transport answered with a failure
    #[error("Notification error: {0}")]
    Notification(String),
}

impl WatcherError {
    /// Create a parse error with a custom message
    pub fn parse(message: impl Into<String>) -> Self {
        WatcherError::Parse(message.into())
    }

    pub fn notification(message: impl Into<String>) -> Self {
        WatcherError::Notification(message.into())
    }

    /// Rejected credentials end the run; everything else is retried on the next cycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatcherError::Auth(AuthError::InvalidCredentials))
    }
}

/// Result type alias for watcher components
pub type WatcherResult<T> = Result<T, WatcherError>;
