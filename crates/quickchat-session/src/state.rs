//! Observable session state.
//!
//! These types are the read-only view of the coordinator: enough to show
//! progress or a stall without exposing the coordinator's internals.

use crate::{Conversation, ErrorKind, Identity, Message};

/// Lifecycle of the backend client handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No client. Initial state and the state after shutdown.
    Disconnected,
    /// Waiting on the token endpoint before connecting.
    FetchingToken,
    /// Connect issued, waiting for the backend.
    Connecting,
    /// Client handle is live.
    Connected,
}

/// Where the session is in the login-to-ready flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No login in progress.
    LoggedOut,
    /// Fetching a token for server login.
    FetchingToken,
    /// Connecting the client.
    Connecting,
    /// Connected, waiting for the backend to finish synchronizing.
    Synchronizing,
    /// Looking up or creating the well-known conversation.
    ResolvingConversation,
    /// Join request in flight.
    Joining,
    /// Fetching recent history.
    LoadingHistory,
    /// History loaded; live messages flow.
    Ready,
    /// A logged-only failure stopped the flow. A new login restarts it.
    Stalled(ErrorKind),
}

/// Point-in-time copy of the session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current phase.
    pub phase: SessionPhase,
    /// Identity from the last server login.
    pub identity: Option<Identity>,
    /// Active conversation.
    pub conversation: Option<Conversation>,
    /// Ordered message list.
    pub messages: Vec<Message>,
}

/// Progress of conversation discovery after sync completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Discovery {
    Idle,
    LookingUp,
    Creating,
    Joining,
    LoadingHistory,
    Ready,
    Stalled(ErrorKind),
}
