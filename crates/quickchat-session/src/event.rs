//! Coordinator input events.
//!
//! Events come from three sources:
//! - Commands issued through the [`crate::SessionHandle`].
//! - Results of operations the runtime executed on behalf of an action.
//! - Pushes from the backend client, wrapped with the epoch of the
//!   connection that produced them.

use crate::{
    AccessToken, BackendError, BackendEvent, Conversation, Identity, Message, TokenError,
};

/// Correlates a command with its eventual completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Wrap a raw request number.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw request number.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Why a token is being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    /// Initial server login; completes the given request.
    Login(RequestId),
    /// Refresh ahead of (or after) expiry.
    Refresh,
}

/// Events processed by the [`crate::Coordinator`].
///
/// Every result-bearing variant carries the `epoch` it was issued in.
/// Results from an older epoch belong to a shut down or replaced client and
/// are discarded.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Log in with a pre-obtained token.
    LoginWithToken {
        /// Completion handle.
        request: RequestId,
        /// Token to connect with.
        token: AccessToken,
    },

    /// Log in by fetching a token for `identity`.
    LoginFromServer {
        /// Completion handle.
        request: RequestId,
        /// User to fetch a token for.
        identity: Identity,
    },

    /// Send a text message to the active conversation.
    SendMessage {
        /// Completion handle.
        request: RequestId,
        /// Message text.
        body: String,
    },

    /// Release the client. Idempotent.
    Shutdown,

    /// Token endpoint answered.
    TokenFetched {
        /// Epoch the fetch was issued in.
        epoch: u64,
        /// Login or refresh.
        purpose: TokenPurpose,
        /// Token or failure.
        result: Result<AccessToken, TokenError>,
    },

    /// Client connect finished.
    ClientConnected {
        /// Epoch the connect was issued in.
        epoch: u64,
        /// Login request to complete.
        request: RequestId,
        /// Whether the backend accepted the token.
        result: Result<(), BackendError>,
    },

    /// Refreshed token was pushed to the client.
    TokenUpdated {
        /// Epoch the update was issued in.
        epoch: u64,
        /// Token that was pushed.
        token: AccessToken,
        /// Whether the backend accepted it.
        result: Result<(), BackendError>,
    },

    /// Lookup by unique name finished.
    ConversationLookedUp {
        /// Epoch the lookup was issued in.
        epoch: u64,
        /// Found, not found, or failure.
        result: Result<Option<Conversation>, BackendError>,
    },

    /// Conversation creation finished.
    ConversationCreated {
        /// Epoch the creation was issued in.
        epoch: u64,
        /// Created conversation or failure.
        result: Result<Conversation, BackendError>,
    },

    /// Join request finished.
    ConversationJoined {
        /// Epoch the join was issued in.
        epoch: u64,
        /// Whether the join succeeded.
        result: Result<(), BackendError>,
    },

    /// Recent history arrived.
    HistoryLoaded {
        /// Epoch the fetch was issued in.
        epoch: u64,
        /// Ordered messages or failure.
        result: Result<Vec<Message>, BackendError>,
    },

    /// Outgoing message finished.
    MessageSent {
        /// Epoch the send was issued in.
        epoch: u64,
        /// Send request to complete.
        request: RequestId,
        /// Backend-assigned message or failure.
        result: Result<Message, BackendError>,
    },

    /// Push from the backend client.
    Backend {
        /// Epoch of the connection that emitted it.
        epoch: u64,
        /// The pushed event.
        event: BackendEvent,
    },
}
