//! Coordinator outputs.
//!
//! [`SessionAction`] is everything the [`crate::Coordinator`] wants done:
//! network operations, delegate notifications and request completions. The
//! runtime executes them; tests inspect them directly.

use crate::{
    AccessToken, Conversation, Identity, Message, RequestId, SessionDelegate, SessionError,
    TokenPurpose,
};

/// Notification destined for the UI delegate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The message list changed; carries the full current list.
    ReloadMessages(Vec<Message>),
    /// A live message was appended.
    ReceivedNewMessage(Message),
    /// Informational status line.
    Status(String),
    /// User-visible error.
    Error(String),
}

impl Notification {
    /// Invoke the matching delegate method.
    pub fn deliver<D: SessionDelegate + ?Sized>(&self, delegate: &D) {
        match self {
            Self::ReloadMessages(messages) => delegate.reload_messages(messages),
            Self::ReceivedNewMessage(message) => delegate.received_new_message(message),
            Self::Status(status) => delegate.display_status_message(status),
            Self::Error(error) => delegate.display_error_message(error),
        }
    }
}

/// Actions produced by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Fetch a token for `identity` from the token endpoint.
    FetchToken {
        /// User to fetch for.
        identity: Identity,
        /// Login or refresh.
        purpose: TokenPurpose,
    },

    /// Initialize the backend client with `token`.
    Connect {
        /// Login request to complete.
        request: RequestId,
        /// Token to connect with.
        token: AccessToken,
    },

    /// Push a refreshed token into the live client.
    UpdateToken {
        /// New token.
        token: AccessToken,
    },

    /// Look up a conversation by unique name.
    LookupConversation {
        /// Unique name.
        name: String,
    },

    /// Create a conversation with the given unique name.
    CreateConversation {
        /// Unique name.
        name: String,
    },

    /// Join the conversation.
    JoinConversation {
        /// Conversation to join.
        conversation: Conversation,
    },

    /// Fetch the most recent messages.
    FetchHistory {
        /// Conversation to read.
        conversation: Conversation,
        /// Maximum number of messages.
        limit: usize,
    },

    /// Submit an outgoing message.
    SendMessage {
        /// Send request to complete.
        request: RequestId,
        /// Target conversation.
        conversation: Conversation,
        /// Message text.
        body: String,
    },

    /// Release the backend client.
    ShutdownClient,

    /// Deliver a notification on the UI context.
    Notify(Notification),

    /// Resolve a login request.
    CompleteLogin {
        /// Login request.
        request: RequestId,
        /// Outcome.
        result: Result<(), SessionError>,
    },

    /// Resolve a send request.
    CompleteSend {
        /// Send request.
        request: RequestId,
        /// Backend-assigned message or failure.
        result: Result<Message, SessionError>,
    },
}
