//! In-memory conversations backend.
//!
//! `SimBackend` models the parts of a hosted conversations service the
//! session relies on: token validation, conversations addressed by unique
//! name, membership, ordered message logs and push delivery to connected
//! clients. Tests drive it from the "server side" (seeding conversations,
//! posting messages as other users, expiring tokens, injecting faults) and
//! inspect the recorded [`BackendCall`]s afterwards.
//!
//! State sits behind a synchronous mutex that is never held across an
//! await point.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use quickchat_session::{
    AccessToken, BackendError, BackendEvent, Conversation, ConversationSid, ConversationsBackend,
    ConversationsClient, EventSink, Identity, MembershipStatus, Message, SyncStatus,
};
use tracing::debug;

/// Backend operation recorded by the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// Client connect for the identity behind the token.
    Connect {
        /// Identity the token resolved to, if any.
        identity: Option<Identity>,
    },
    /// Token replaced on a live client.
    UpdateToken,
    /// Lookup by unique name.
    Lookup(String),
    /// Creation by unique name.
    Create(String),
    /// Join by unique name.
    Join(String),
    /// Recent history request.
    LastMessages {
        /// Conversation unique name.
        conversation: String,
        /// Requested count.
        count: usize,
    },
    /// Outgoing message.
    Send {
        /// Conversation unique name.
        conversation: String,
        /// Message text.
        body: String,
    },
    /// Client shutdown.
    Shutdown,
}

/// Operation a one-shot fault can be armed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// `connect`
    Connect,
    /// `update_token`
    UpdateToken,
    /// `conversation`
    Lookup,
    /// `create_conversation`
    Create,
    /// `join`
    Join,
    /// `last_messages`
    History,
    /// `send_message`
    Send,
}

struct SimConversation {
    sid: ConversationSid,
    unique_name: String,
    members: HashSet<Identity>,
    messages: Vec<Message>,
}

impl SimConversation {
    fn handle_for(&self, identity: &Identity) -> Conversation {
        let status = if self.members.contains(identity) {
            MembershipStatus::Joined
        } else {
            MembershipStatus::NotJoined
        };
        Conversation { sid: self.sid.clone(), unique_name: self.unique_name.clone(), status }
    }
}

struct SimClientState {
    identity: Identity,
    sink: EventSink,
    active: bool,
}

#[derive(Default)]
struct SimState {
    /// Issued token -> identity it grants.
    tokens: HashMap<String, Identity>,
    /// Identity granted to tokens that were never issued.
    accept_any: Option<Identity>,
    next_token: u64,

    /// Keyed by unique name.
    conversations: HashMap<String, SimConversation>,
    next_sid: u64,

    clients: HashMap<u64, SimClientState>,
    next_client: u64,

    /// Whether connect immediately reports sync completion.
    manual_sync: bool,

    faults: HashMap<FaultPoint, BackendError>,
    calls: Vec<BackendCall>,
}

impl SimState {
    fn resolve_token(&self, token: &AccessToken) -> Option<Identity> {
        self.tokens.get(token.expose()).cloned().or_else(|| self.accept_any.clone())
    }

    fn take_fault(&mut self, point: FaultPoint) -> Result<(), BackendError> {
        self.faults.remove(&point).map_or(Ok(()), Err)
    }

    fn active_client(&self, id: u64) -> Result<&SimClientState, BackendError> {
        self.clients.get(&id).filter(|c| c.active).ok_or(BackendError::ShutDown)
    }

    fn conversation_by_sid(&mut self, sid: &ConversationSid) -> Result<&mut SimConversation, BackendError> {
        self.conversations
            .values_mut()
            .find(|c| &c.sid == sid)
            .ok_or_else(|| BackendError::NotFound(sid.to_string()))
    }

    fn insert_conversation(&mut self, unique_name: &str) -> &mut SimConversation {
        self.next_sid += 1;
        let sid = ConversationSid::new(format!("CH{:04}", self.next_sid));
        self.conversations.entry(unique_name.to_string()).or_insert(SimConversation {
            sid,
            unique_name: unique_name.to_string(),
            members: HashSet::new(),
            messages: Vec::new(),
        })
    }

    /// Append to the log and push to every active client that participates.
    fn post(&mut self, sid: &ConversationSid, author: Identity, body: String) -> Result<Message, BackendError> {
        let conversation = self.conversation_by_sid(sid)?;
        let message = Message::new(conversation.messages.len() as u64, author, body);
        conversation.messages.push(message.clone());

        let members = conversation.members.clone();
        let sid = conversation.sid.clone();
        for client in self.clients.values().filter(|c| c.active && members.contains(&c.identity)) {
            client.sink.emit(BackendEvent::MessageAdded {
                conversation: sid.clone(),
                message: message.clone(),
            });
        }
        Ok(message)
    }
}

/// In-memory conversations backend.
///
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct SimBackend {
    state: Arc<Mutex<SimState>>,
}

impl SimBackend {
    /// Empty backend with no conversations and no issued tokens.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint a token granting `identity`.
    pub fn issue_token(&self, identity: impl Into<Identity>) -> AccessToken {
        let identity = identity.into();
        let mut state = self.state();
        state.next_token += 1;
        let token = format!("sim-{identity}-{}", state.next_token);
        state.tokens.insert(token.clone(), identity);
        AccessToken::new(token)
    }

    /// Accept an externally issued `token` as granting `identity`.
    pub fn register_token(&self, token: &AccessToken, identity: impl Into<Identity>) {
        self.state().tokens.insert(token.expose().to_string(), identity.into());
    }

    /// Invalidate a previously issued token.
    pub fn revoke_token(&self, token: &AccessToken) {
        self.state().tokens.remove(token.expose());
    }

    /// Accept any token that was not issued here, as `identity`.
    ///
    /// Used when tokens come from an external endpoint the simulation
    /// cannot validate.
    pub fn accept_any_token(&self, identity: impl Into<Identity>) {
        self.state().accept_any = Some(identity.into());
    }

    /// Stop connect from reporting sync completion; see
    /// [`Self::complete_sync`].
    pub fn set_manual_sync(&self, manual: bool) {
        self.state().manual_sync = manual;
    }

    /// Report sync completion to every active client.
    pub fn complete_sync(&self) {
        self.broadcast(&BackendEvent::SynchronizationStatusChanged(SyncStatus::Completed));
    }

    /// Create a conversation server-side. Returns its SID.
    ///
    /// Existing conversations are left as they are.
    pub fn seed_conversation(&self, unique_name: &str) -> ConversationSid {
        self.state().insert_conversation(unique_name).sid.clone()
    }

    /// Add `identity` as a participant without a join request.
    pub fn add_member(&self, unique_name: &str, identity: impl Into<Identity>) {
        self.state().insert_conversation(unique_name).members.insert(identity.into());
    }

    /// Post a message as `author`, e.g. another participant.
    pub fn post_message(
        &self,
        unique_name: &str,
        author: impl Into<Identity>,
        body: impl Into<String>,
    ) -> Result<Message, BackendError> {
        let mut state = self.state();
        let sid = state
            .conversations
            .get(unique_name)
            .map(|c| c.sid.clone())
            .ok_or_else(|| BackendError::NotFound(unique_name.to_string()))?;
        state.post(&sid, author.into(), body.into())
    }

    /// Message log of a conversation, oldest first.
    pub fn messages(&self, unique_name: &str) -> Vec<Message> {
        self.state().conversations.get(unique_name).map(|c| c.messages.clone()).unwrap_or_default()
    }

    /// Whether `identity` participates in the conversation.
    pub fn is_member(&self, unique_name: &str, identity: &Identity) -> bool {
        self.state().conversations.get(unique_name).is_some_and(|c| c.members.contains(identity))
    }

    /// Warn every active client that its token is about to expire.
    pub fn expire_soon(&self) {
        self.broadcast(&BackendEvent::TokenAboutToExpire);
    }

    /// Tell every active client its token has expired.
    pub fn expire_now(&self) {
        self.broadcast(&BackendEvent::TokenExpired);
    }

    /// Fail the next call at `point` with `error`.
    pub fn fail_next(&self, point: FaultPoint, error: BackendError) {
        self.state().faults.insert(point, error);
    }

    /// Every operation performed so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().calls.clone()
    }

    /// Number of clients that have not been shut down.
    pub fn active_clients(&self) -> usize {
        self.state().clients.values().filter(|c| c.active).count()
    }

    fn broadcast(&self, event: &BackendEvent) {
        let state = self.state();
        for client in state.clients.values().filter(|c| c.active) {
            client.sink.emit(event.clone());
        }
    }
}

#[async_trait]
impl ConversationsBackend for SimBackend {
    type Client = SimClient;

    async fn connect(&self, token: AccessToken, events: EventSink) -> Result<SimClient, BackendError> {
        let mut state = self.state();
        let identity = state.resolve_token(&token);
        state.calls.push(BackendCall::Connect { identity: identity.clone() });
        state.take_fault(FaultPoint::Connect)?;

        let identity = identity.ok_or_else(|| BackendError::Unauthorized("unknown token".into()))?;

        state.next_client += 1;
        let id = state.next_client;
        if !state.manual_sync {
            events.emit(BackendEvent::SynchronizationStatusChanged(SyncStatus::Started));
            events.emit(BackendEvent::SynchronizationStatusChanged(SyncStatus::Completed));
        }
        state.clients.insert(id, SimClientState { identity: identity.clone(), sink: events, active: true });

        debug!(%identity, id, "sim client connected");
        Ok(SimClient { backend: self.clone(), id, identity })
    }
}

/// Client handle produced by [`SimBackend`].
pub struct SimClient {
    backend: SimBackend,
    id: u64,
    identity: Identity,
}

impl SimClient {
    /// Identity the client authenticated as.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

#[async_trait]
impl ConversationsClient for SimClient {
    async fn update_token(&self, token: AccessToken) -> Result<(), BackendError> {
        let mut state = self.backend.state();
        state.calls.push(BackendCall::UpdateToken);
        state.active_client(self.id)?;
        state.take_fault(FaultPoint::UpdateToken)?;

        match state.resolve_token(&token) {
            Some(identity) if identity == self.identity => Ok(()),
            _ => Err(BackendError::Unauthorized("token does not match identity".into())),
        }
    }

    async fn conversation(&self, unique_name: &str) -> Result<Option<Conversation>, BackendError> {
        let mut state = self.backend.state();
        state.calls.push(BackendCall::Lookup(unique_name.to_string()));
        state.active_client(self.id)?;
        state.take_fault(FaultPoint::Lookup)?;

        Ok(state.conversations.get(unique_name).map(|c| c.handle_for(&self.identity)))
    }

    async fn create_conversation(&self, unique_name: &str) -> Result<Conversation, BackendError> {
        let mut state = self.backend.state();
        state.calls.push(BackendCall::Create(unique_name.to_string()));
        state.active_client(self.id)?;
        state.take_fault(FaultPoint::Create)?;

        if state.conversations.contains_key(unique_name) {
            return Err(BackendError::Rejected(format!("conversation {unique_name} already exists")));
        }
        Ok(state.insert_conversation(unique_name).handle_for(&self.identity))
    }

    async fn join(&self, conversation: &Conversation) -> Result<(), BackendError> {
        let mut state = self.backend.state();
        state.calls.push(BackendCall::Join(conversation.unique_name.clone()));
        state.active_client(self.id)?;
        state.take_fault(FaultPoint::Join)?;

        let target = state.conversation_by_sid(&conversation.sid)?;
        if !target.members.insert(self.identity.clone()) {
            return Err(BackendError::Rejected("already a participant".into()));
        }
        Ok(())
    }

    async fn last_messages(
        &self,
        conversation: &Conversation,
        count: usize,
    ) -> Result<Vec<Message>, BackendError> {
        let mut state = self.backend.state();
        state.calls.push(BackendCall::LastMessages {
            conversation: conversation.unique_name.clone(),
            count,
        });
        state.active_client(self.id)?;
        state.take_fault(FaultPoint::History)?;

        let target = state.conversation_by_sid(&conversation.sid)?;
        if !target.members.contains(&self.identity) {
            return Err(BackendError::Rejected("not a participant".into()));
        }
        let skip = target.messages.len().saturating_sub(count);
        Ok(target.messages[skip..].to_vec())
    }

    async fn send_message(&self, conversation: &Conversation, body: &str) -> Result<Message, BackendError> {
        let mut state = self.backend.state();
        state.calls.push(BackendCall::Send {
            conversation: conversation.unique_name.clone(),
            body: body.to_string(),
        });
        state.active_client(self.id)?;
        state.take_fault(FaultPoint::Send)?;

        if !state.conversation_by_sid(&conversation.sid)?.members.contains(&self.identity) {
            return Err(BackendError::Rejected("not a participant".into()));
        }
        state.post(&conversation.sid, self.identity.clone(), body.to_string())
    }

    async fn shutdown(&self) {
        let mut state = self.backend.state();
        state.calls.push(BackendCall::Shutdown);
        if let Some(client) = state.clients.get_mut(&self.id) {
            client.active = false;
        }
        debug!(id = self.id, "sim client shut down");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn connect(backend: &SimBackend, identity: &str) -> SimClient {
        let token = backend.issue_token(identity);
        let (sink, _rx) = EventSink::channel(1);
        backend.connect(token, sink).await.unwrap()
    }

    #[tokio::test]
    async fn unknown_token_is_unauthorized() {
        let backend = SimBackend::new();
        let (sink, _rx) = EventSink::channel(1);

        let result = backend.connect(AccessToken::new("forged"), sink).await;
        assert!(matches!(result, Err(BackendError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn connect_reports_sync_completion() {
        let backend = SimBackend::new();
        let token = backend.issue_token("alice");
        let (sink, mut rx) = EventSink::channel(7);

        backend.connect(token, sink).await.unwrap();

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            statuses.push(event);
        }
        assert_eq!(statuses.len(), 2);
        assert!(matches!(
            statuses.last(),
            Some(quickchat_session::SessionEvent::Backend {
                epoch: 7,
                event: BackendEvent::SynchronizationStatusChanged(SyncStatus::Completed),
            })
        ));
    }

    #[tokio::test]
    async fn joining_twice_is_rejected() {
        let backend = SimBackend::new();
        let client = connect(&backend, "alice").await;
        let conversation = client.create_conversation("general").await.unwrap();

        client.join(&conversation).await.unwrap();
        let again = client.join(&conversation).await;

        assert!(matches!(again, Err(BackendError::Rejected(_))));
    }

    #[tokio::test]
    async fn history_returns_most_recent_messages() {
        let backend = SimBackend::new();
        backend.add_member("general", "alice");
        for i in 0..5 {
            backend.post_message("general", "bob", format!("m{i}")).unwrap();
        }
        let client = connect(&backend, "alice").await;
        let conversation = client.conversation("general").await.unwrap().unwrap();

        let recent = client.last_messages(&conversation, 2).await.unwrap();

        let bodies: Vec<_> = recent.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn operations_after_shutdown_fail() {
        let backend = SimBackend::new();
        let client = connect(&backend, "alice").await;

        client.shutdown().await;

        assert_eq!(backend.active_clients(), 0);
        assert_eq!(client.conversation("general").await, Err(BackendError::ShutDown));
    }

    #[tokio::test]
    async fn faults_fire_once() {
        let backend = SimBackend::new();
        let client = connect(&backend, "alice").await;
        backend.fail_next(FaultPoint::Lookup, BackendError::Transport("reset".into()));

        assert!(client.conversation("general").await.is_err());
        assert_eq!(client.conversation("general").await, Ok(None));
    }
}
