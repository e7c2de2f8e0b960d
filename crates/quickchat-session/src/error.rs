//! Error types for the session layer.
//!
//! Each external seam gets its own enum: [`TokenError`] for the token
//! endpoint, [`BackendError`] for the conversations backend. The coordinator
//! wraps them in [`SessionError`], which records the step that failed.

use thiserror::Error;

/// Failures retrieving an access token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// No token source was configured for the session.
    #[error("no token source configured")]
    NotConfigured,

    /// Endpoint unreachable or the request failed in transit.
    #[error("token request failed: {0}")]
    Request(String),

    /// Endpoint answered with a non-success status.
    #[error("token endpoint returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Response body did not contain a usable token.
    #[error("malformed token response: {0}")]
    Malformed(String),
}

/// Failures reported by the conversations backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Token rejected or expired.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend refused the operation.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Network or connection failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Client handle was shut down.
    #[error("client shut down")]
    ShutDown,
}

impl BackendError {
    /// Returns true if retrying the same operation may succeed.
    ///
    /// Only transport failures are transient. Rejections and authorization
    /// failures need different input, not another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Step of the session flow an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Token endpoint failure.
    TokenFetch,
    /// Backend rejected the token.
    Auth,
    /// Conversation lookup or creation failed.
    ConversationResolution,
    /// Join request failed.
    Join,
    /// Recent history could not be loaded.
    HistoryLoad,
    /// Outgoing message failed.
    Send,
    /// Token refresh failed.
    Refresh,
    /// Operation requires a connected client.
    NotConnected,
    /// Operation requires a joined conversation.
    NoConversation,
    /// Session shut down before the request completed.
    ShutDown,
}

/// Errors surfaced by the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Token could not be fetched.
    #[error("token fetch failed: {0}")]
    TokenFetch(#[from] TokenError),

    /// Backend rejected the token.
    #[error("authentication failed: {0}")]
    Auth(BackendError),

    /// Conversation lookup or creation failed.
    #[error("conversation resolution failed: {0}")]
    ConversationResolution(BackendError),

    /// Join request failed.
    #[error("join failed: {0}")]
    Join(BackendError),

    /// Recent history could not be loaded.
    #[error("history load failed: {0}")]
    HistoryLoad(BackendError),

    /// Outgoing message failed.
    #[error("send failed: {0}")]
    Send(BackendError),

    /// Token refresh failed at the backend.
    #[error("token refresh failed: {0}")]
    Refresh(BackendError),

    /// No connected client.
    #[error("not connected")]
    NotConnected,

    /// No conversation has been joined yet.
    #[error("no active conversation")]
    NoConversation,

    /// Session was shut down or the request was superseded by a new login.
    #[error("session shut down")]
    ShutDown,
}

impl SessionError {
    /// Step of the flow this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TokenFetch(_) => ErrorKind::TokenFetch,
            Self::Auth(_) => ErrorKind::Auth,
            Self::ConversationResolution(_) => ErrorKind::ConversationResolution,
            Self::Join(_) => ErrorKind::Join,
            Self::HistoryLoad(_) => ErrorKind::HistoryLoad,
            Self::Send(_) => ErrorKind::Send,
            Self::Refresh(_) => ErrorKind::Refresh,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::NoConversation => ErrorKind::NoConversation,
            Self::ShutDown => ErrorKind::ShutDown,
        }
    }

    /// Backend failure behind this error, if any.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Self::Auth(e)
            | Self::ConversationResolution(e)
            | Self::Join(e)
            | Self::HistoryLoad(e)
            | Self::Send(e)
            | Self::Refresh(e) => Some(e),
            Self::TokenFetch(_) | Self::NotConnected | Self::NoConversation | Self::ShutDown => {
                None
            },
        }
    }

    /// Returns true if the underlying backend failure is transient.
    pub fn is_transient(&self) -> bool {
        self.backend_error().is_some_and(BackendError::is_transient)
    }
}
