//! Conversations backend seam.
//!
//! The backend SDK owns transport, delivery, sync and storage. The session
//! only needs the operations below plus a way for the backend to push
//! events, which is the [`EventSink`] handed over at connect time.
//!
//! # Implementations
//!
//! - **Simulation**: `quickchat_harness::SimBackend`, an in-process service
//! - **Production**: an adapter over a hosted conversations SDK

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    AccessToken, BackendError, Conversation, ConversationSid, Message, SessionEvent, SyncStatus,
};

/// Events pushed by the backend client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// Readiness of the local view changed.
    SynchronizationStatusChanged(SyncStatus),

    /// A message was added to a conversation the client participates in.
    MessageAdded {
        /// Conversation the message belongs to.
        conversation: ConversationSid,
        /// The new message.
        message: Message,
    },

    /// The current token is about to expire.
    TokenAboutToExpire,

    /// The current token has expired.
    TokenExpired,
}

/// Receiving end of an [`EventSink`].
pub(crate) trait PushTarget: Send + Sync {
    /// Queue `event`. Returns `false` if the receiver is gone.
    fn push(&self, event: SessionEvent) -> bool;

    /// Whether the receiver is gone.
    fn is_closed(&self) -> bool;
}

impl PushTarget for mpsc::UnboundedSender<SessionEvent> {
    fn push(&self, event: SessionEvent) -> bool {
        self.send(event).is_ok()
    }

    fn is_closed(&self) -> bool {
        mpsc::UnboundedSender::is_closed(self)
    }
}

/// Delivery endpoint for backend pushes.
///
/// Tagged with the epoch of the connection it was created for, so pushes
/// from a client that has since been shut down are recognised and dropped.
/// Inside a [`crate::Session`] pushes share one queue with operation
/// results, so a push emitted after an operation returns is handled after
/// that operation's result.
#[derive(Clone)]
pub struct EventSink {
    epoch: u64,
    target: Arc<dyn PushTarget>,
}

impl EventSink {
    pub(crate) fn new(epoch: u64, target: Arc<dyn PushTarget>) -> Self {
        Self { epoch, target }
    }

    /// Standalone sink for driving a backend without a session.
    pub fn channel(epoch: u64) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(epoch, Arc::new(tx)), rx)
    }

    /// Epoch this sink belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Push an event to the session.
    ///
    /// Returns `false` if the session is gone.
    pub fn emit(&self, event: BackendEvent) -> bool {
        self.target.push(SessionEvent::Backend { epoch: self.epoch, event })
    }

    /// Whether the receiving session has stopped.
    pub fn is_closed(&self) -> bool {
        self.target.is_closed()
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("epoch", &self.epoch)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Factory for connected clients.
#[async_trait]
pub trait ConversationsBackend: Send + Sync + 'static {
    /// Connected client type.
    type Client: ConversationsClient;

    /// Initialize a client with `token`.
    ///
    /// The backend reports readiness and later activity through `events`.
    /// Pushes may arrive before this future resolves.
    async fn connect(
        &self,
        token: AccessToken,
        events: EventSink,
    ) -> Result<Self::Client, BackendError>;
}

/// A live connection to the backend.
#[async_trait]
pub trait ConversationsClient: Send + Sync + 'static {
    /// Replace the token used by this client.
    async fn update_token(&self, token: AccessToken) -> Result<(), BackendError>;

    /// Look up a conversation by unique name. `Ok(None)` if it does not exist.
    async fn conversation(&self, unique_name: &str)
    -> Result<Option<Conversation>, BackendError>;

    /// Create a conversation with the given unique name.
    async fn create_conversation(&self, unique_name: &str) -> Result<Conversation, BackendError>;

    /// Join the conversation as the local identity.
    async fn join(&self, conversation: &Conversation) -> Result<(), BackendError>;

    /// Up to `count` most recent messages, oldest first.
    async fn last_messages(
        &self,
        conversation: &Conversation,
        count: usize,
    ) -> Result<Vec<Message>, BackendError>;

    /// Submit a message; resolves with the backend-assigned record.
    async fn send_message(
        &self,
        conversation: &Conversation,
        body: &str,
    ) -> Result<Message, BackendError>;

    /// Release the connection. Further pushes stop.
    async fn shutdown(&self);
}
