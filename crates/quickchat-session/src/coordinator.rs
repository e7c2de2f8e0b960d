//! Session coordinator state machine.
//!
//! The `Coordinator` owns the credential, connection and conversation state
//! of one session and the ordered message list. It performs no I/O: each
//! [`SessionEvent`] is turned into the [`SessionAction`]s the caller should
//! execute, and results come back as further events.
//!
//! # Flow
//!
//! login -> token -> connect -> sync completed -> lookup (or create) ->
//! join (skipped when already joined) -> history -> ready.
//!
//! # Failure policy
//!
//! Only token fetch and token rejection on the server-login path reach the
//! delegate. Every other failure is logged and leaves prior state untouched;
//! discovery failures park the session in [`SessionPhase::Stalled`] until
//! the next login.

use tracing::{debug, info, warn};

use crate::{
    AccessToken, BackendError, BackendEvent, ClientState, Conversation, Identity,
    MembershipStatus, Message, Notification, RequestId, SessionAction, SessionConfig,
    SessionError, SessionEvent, SessionPhase, SessionSnapshot, SyncStatus, TokenError,
    TokenPurpose, state::Discovery,
};

/// Delegate error text for a failed server login.
const LOGIN_FAILED_MESSAGE: &str = "Unable to login";

/// How the in-flight login was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginKind {
    /// Pre-obtained token; failures are only logged.
    Token,
    /// Token fetched by identity; failures reach the delegate.
    Server,
}

#[derive(Debug, Clone, Copy)]
struct PendingLogin {
    request: RequestId,
    kind: LoginKind,
}

/// Session coordinator.
#[derive(Debug)]
pub struct Coordinator {
    config: SessionConfig,

    /// Bumped on every login and shutdown. Results tagged with an older
    /// epoch are ignored.
    epoch: u64,

    identity: Option<Identity>,

    /// Token the live client is using. Replaced only after the backend
    /// accepts a refresh.
    token: Option<AccessToken>,

    client: ClientState,
    login: Option<PendingLogin>,

    /// Backend reported `Completed` for the current epoch.
    synchronized: bool,

    discovery: Discovery,
    conversation: Option<Conversation>,
    messages: Vec<Message>,
}

impl Coordinator {
    /// Create a logged-out coordinator.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            epoch: 0,
            identity: None,
            token: None,
            client: ClientState::Disconnected,
            login: None,
            synchronized: false,
            discovery: Discovery::Idle,
            conversation: None,
            messages: Vec::new(),
        }
    }

    /// Current session epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Identity from the last server login.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Token the client is currently using.
    pub fn token(&self) -> Option<&AccessToken> {
        self.token.as_ref()
    }

    /// Client handle lifecycle.
    pub fn client_state(&self) -> ClientState {
        self.client
    }

    /// Active conversation.
    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    /// Ordered message list.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Where the session is in the login-to-ready flow.
    pub fn phase(&self) -> SessionPhase {
        match self.client {
            ClientState::Disconnected => SessionPhase::LoggedOut,
            ClientState::FetchingToken => SessionPhase::FetchingToken,
            ClientState::Connecting => SessionPhase::Connecting,
            ClientState::Connected => match self.discovery {
                Discovery::Idle => SessionPhase::Synchronizing,
                Discovery::LookingUp | Discovery::Creating => SessionPhase::ResolvingConversation,
                Discovery::Joining => SessionPhase::Joining,
                Discovery::LoadingHistory => SessionPhase::LoadingHistory,
                Discovery::Ready => SessionPhase::Ready,
                Discovery::Stalled(kind) => SessionPhase::Stalled(kind),
            },
        }
    }

    /// Copy of the observable state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase(),
            identity: self.identity.clone(),
            conversation: self.conversation.clone(),
            messages: self.messages.clone(),
        }
    }

    /// Process one event and return the actions to execute, in order.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        match event {
            SessionEvent::LoginWithToken { request, token } => self.login_with_token(request, token),
            SessionEvent::LoginFromServer { request, identity } => {
                self.login_from_server(request, identity)
            },
            SessionEvent::SendMessage { request, body } => self.send_message(request, body),
            SessionEvent::Shutdown => self.shutdown(),
            // A superseded login was already completed when its client was
            // released.
            SessionEvent::TokenFetched { epoch, purpose, result } => {
                if self.is_stale(epoch) {
                    debug!(epoch, current = self.epoch, ?purpose, "dropping stale token");
                    return Vec::new();
                }
                self.handle_token_fetched(purpose, result)
            },
            SessionEvent::ClientConnected { epoch, request, result } => {
                if self.is_stale(epoch) {
                    debug!(epoch, current = self.epoch, ?request, "dropping stale connect");
                    return Vec::new();
                }
                self.handle_client_connected(request, result)
            },
            SessionEvent::TokenUpdated { epoch, token, result } => {
                if !self.is_stale(epoch) {
                    self.handle_token_updated(token, result);
                }
                Vec::new()
            },
            SessionEvent::ConversationLookedUp { epoch, result } => {
                if self.is_stale(epoch) {
                    return Vec::new();
                }
                self.handle_lookup(result)
            },
            SessionEvent::ConversationCreated { epoch, result } => {
                if self.is_stale(epoch) {
                    return Vec::new();
                }
                self.handle_created(result)
            },
            SessionEvent::ConversationJoined { epoch, result } => {
                if self.is_stale(epoch) {
                    return Vec::new();
                }
                self.handle_joined(result)
            },
            SessionEvent::HistoryLoaded { epoch, result } => {
                if self.is_stale(epoch) {
                    return Vec::new();
                }
                self.handle_history(result)
            },
            SessionEvent::MessageSent { epoch, request, result } => {
                let result = if self.is_stale(epoch) {
                    Err(SessionError::ShutDown)
                } else {
                    result.map_err(|e| {
                        warn!(error = %e, "unable to send message");
                        SessionError::Send(e)
                    })
                };
                vec![SessionAction::CompleteSend { request, result }]
            },
            SessionEvent::Backend { epoch, event } => {
                if self.is_stale(epoch) {
                    debug!(epoch, current = self.epoch, ?event, "dropping push from old client");
                    return Vec::new();
                }
                self.handle_backend_event(event)
            },
        }
    }

    fn is_stale(&self, epoch: u64) -> bool {
        epoch != self.epoch
    }

    /// Start a new epoch, releasing whatever client the previous one had.
    fn begin_login(&mut self, kind: LoginKind, request: RequestId) -> Vec<SessionAction> {
        let actions = self.release_client();
        self.epoch += 1;
        self.login = Some(PendingLogin { request, kind });
        actions
    }

    fn login_with_token(&mut self, request: RequestId, token: AccessToken) -> Vec<SessionAction> {
        let mut actions = self.begin_login(LoginKind::Token, request);
        self.identity = None;
        self.token = Some(token.clone());
        self.client = ClientState::Connecting;

        info!(epoch = self.epoch, "logging in with access token");
        actions.push(SessionAction::Connect { request, token });
        actions
    }

    fn login_from_server(&mut self, request: RequestId, identity: Identity) -> Vec<SessionAction> {
        let mut actions = self.begin_login(LoginKind::Server, request);
        self.identity = Some(identity.clone());
        self.token = None;
        self.client = ClientState::FetchingToken;

        info!(epoch = self.epoch, %identity, "fetching access token");
        actions.push(SessionAction::FetchToken { identity, purpose: TokenPurpose::Login(request) });
        actions
    }

    fn send_message(&mut self, request: RequestId, body: String) -> Vec<SessionAction> {
        let error = match (self.client, &self.conversation) {
            (ClientState::Connected, Some(conversation)) => {
                let conversation = conversation.clone();
                return vec![SessionAction::SendMessage { request, conversation, body }];
            },
            (ClientState::Connected, None) => SessionError::NoConversation,
            _ => SessionError::NotConnected,
        };

        debug!(%error, "rejecting send");
        vec![SessionAction::CompleteSend { request, result: Err(error) }]
    }

    fn shutdown(&mut self) -> Vec<SessionAction> {
        if self.client == ClientState::Disconnected && self.login.is_none() {
            debug!("shutdown requested while already shut down");
            return Vec::new();
        }

        let actions = self.release_client();
        self.epoch += 1;
        info!(epoch = self.epoch, "session shut down");
        actions
    }

    /// Drop the client and everything tied to it.
    ///
    /// Messages stay; they are only replaced by the next history load.
    fn release_client(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        if self.client != ClientState::Disconnected {
            actions.push(SessionAction::ShutdownClient);
        }
        if let Some(login) = self.login.take() {
            actions.push(SessionAction::CompleteLogin {
                request: login.request,
                result: Err(SessionError::ShutDown),
            });
        }

        self.client = ClientState::Disconnected;
        self.token = None;
        self.synchronized = false;
        self.discovery = Discovery::Idle;
        self.conversation = None;
        actions
    }

    fn handle_token_fetched(
        &mut self,
        purpose: TokenPurpose,
        result: Result<AccessToken, TokenError>,
    ) -> Vec<SessionAction> {
        match (purpose, result) {
            (TokenPurpose::Login(request), Ok(token)) => {
                debug!("access token retrieved");
                self.token = Some(token.clone());
                self.client = ClientState::Connecting;
                vec![SessionAction::Connect { request, token }]
            },
            (TokenPurpose::Login(request), Err(e)) => {
                warn!(error = %e, "error retrieving token");
                self.login = None;
                self.client = ClientState::Disconnected;
                vec![
                    SessionAction::Notify(Notification::Error(LOGIN_FAILED_MESSAGE.to_string())),
                    SessionAction::CompleteLogin {
                        request,
                        result: Err(SessionError::TokenFetch(e)),
                    },
                ]
            },
            (TokenPurpose::Refresh, Ok(token)) => {
                if self.client == ClientState::Disconnected {
                    return Vec::new();
                }
                vec![SessionAction::UpdateToken { token }]
            },
            (TokenPurpose::Refresh, Err(e)) => {
                warn!(error = %e, "error retrieving token for refresh");
                Vec::new()
            },
        }
    }

    fn handle_client_connected(
        &mut self,
        request: RequestId,
        result: Result<(), BackendError>,
    ) -> Vec<SessionAction> {
        let kind = self.login.take().map_or(LoginKind::Token, |login| login.kind);

        match result {
            Ok(()) => {
                self.client = ClientState::Connected;
                info!(epoch = self.epoch, "conversations client connected");

                let mut actions = Vec::new();
                if let (LoginKind::Server, Some(identity)) = (kind, &self.identity) {
                    actions.push(SessionAction::Notify(Notification::Status(format!(
                        "Logged in as \"{identity}\""
                    ))));
                }
                actions.push(SessionAction::CompleteLogin { request, result: Ok(()) });
                if self.synchronized {
                    actions.extend(self.start_discovery());
                }
                actions
            },
            Err(e) => {
                warn!(error = %e, "conversations client rejected token");
                self.client = ClientState::Disconnected;
                self.token = None;

                let mut actions = Vec::new();
                if kind == LoginKind::Server {
                    actions.push(SessionAction::Notify(Notification::Error(
                        LOGIN_FAILED_MESSAGE.to_string(),
                    )));
                }
                actions.push(SessionAction::CompleteLogin {
                    request,
                    result: Err(SessionError::Auth(e)),
                });
                actions
            },
        }
    }

    fn handle_token_updated(&mut self, token: AccessToken, result: Result<(), BackendError>) {
        match result {
            Ok(()) => {
                info!("access token refreshed");
                self.token = Some(token);
            },
            Err(e) => {
                let error = SessionError::Refresh(e);
                warn!(%error, "unable to refresh access token");
            },
        }
    }

    fn handle_backend_event(&mut self, event: BackendEvent) -> Vec<SessionAction> {
        match event {
            BackendEvent::SynchronizationStatusChanged(SyncStatus::Completed) => {
                self.synchronized = true;
                if self.client == ClientState::Connected {
                    self.start_discovery()
                } else {
                    debug!("sync completed before connect resolved");
                    Vec::new()
                }
            },
            BackendEvent::SynchronizationStatusChanged(status) => {
                debug!(?status, "synchronization status changed");
                Vec::new()
            },
            BackendEvent::MessageAdded { conversation, message } => {
                let active = self.conversation.as_ref().is_some_and(|c| c.sid == conversation);
                if !active {
                    debug!(%conversation, "ignoring message for inactive conversation");
                    return Vec::new();
                }

                self.messages.push(message.clone());
                vec![
                    SessionAction::Notify(Notification::ReloadMessages(self.messages.clone())),
                    SessionAction::Notify(Notification::ReceivedNewMessage(message)),
                ]
            },
            BackendEvent::TokenAboutToExpire => {
                info!("access token will expire");
                self.refresh_token()
            },
            BackendEvent::TokenExpired => {
                info!("access token expired");
                self.refresh_token()
            },
        }
    }

    fn refresh_token(&self) -> Vec<SessionAction> {
        if self.client == ClientState::Disconnected {
            return Vec::new();
        }
        match &self.identity {
            Some(identity) => vec![SessionAction::FetchToken {
                identity: identity.clone(),
                purpose: TokenPurpose::Refresh,
            }],
            None => {
                warn!("no identity to refresh the access token with");
                Vec::new()
            },
        }
    }

    fn start_discovery(&mut self) -> Vec<SessionAction> {
        if self.discovery != Discovery::Idle {
            debug!(discovery = ?self.discovery, "conversation discovery already started");
            return Vec::new();
        }
        self.discovery = Discovery::LookingUp;
        vec![SessionAction::LookupConversation { name: self.config.conversation_name.clone() }]
    }

    fn handle_lookup(
        &mut self,
        result: Result<Option<Conversation>, BackendError>,
    ) -> Vec<SessionAction> {
        match result {
            Ok(Some(conversation)) => self.join(conversation),
            Ok(None) | Err(BackendError::NotFound(_)) => {
                debug!(name = %self.config.conversation_name, "conversation not found, creating");
                self.discovery = Discovery::Creating;
                vec![SessionAction::CreateConversation {
                    name: self.config.conversation_name.clone(),
                }]
            },
            Err(e) => self.stall(SessionError::ConversationResolution(e)),
        }
    }

    fn handle_created(&mut self, result: Result<Conversation, BackendError>) -> Vec<SessionAction> {
        match result {
            Ok(conversation) => {
                info!(sid = %conversation.sid, "conversation created");
                self.join(conversation)
            },
            Err(e) => self.stall(SessionError::ConversationResolution(e)),
        }
    }

    fn join(&mut self, conversation: Conversation) -> Vec<SessionAction> {
        self.conversation = Some(conversation.clone());

        if conversation.status == MembershipStatus::Joined {
            info!(sid = %conversation.sid, "current user already in conversation");
            return self.load_history(conversation);
        }

        self.discovery = Discovery::Joining;
        vec![SessionAction::JoinConversation { conversation }]
    }

    fn handle_joined(&mut self, result: Result<(), BackendError>) -> Vec<SessionAction> {
        if let Err(e) = result {
            return self.stall(SessionError::Join(e));
        }
        let Some(conversation) = self.conversation.as_mut() else {
            return Vec::new();
        };

        info!(sid = %conversation.sid, "joined conversation");
        conversation.status = MembershipStatus::Joined;
        let conversation = conversation.clone();
        self.load_history(conversation)
    }

    fn load_history(&mut self, conversation: Conversation) -> Vec<SessionAction> {
        self.discovery = Discovery::LoadingHistory;
        vec![SessionAction::FetchHistory { conversation, limit: self.config.history_limit }]
    }

    fn handle_history(&mut self, result: Result<Vec<Message>, BackendError>) -> Vec<SessionAction> {
        match result {
            Ok(messages) => {
                debug!(count = messages.len(), "loaded previous messages");
                self.messages = messages;
                self.discovery = Discovery::Ready;
                vec![SessionAction::Notify(Notification::ReloadMessages(self.messages.clone()))]
            },
            Err(e) => self.stall(SessionError::HistoryLoad(e)),
        }
    }

    fn stall(&mut self, error: SessionError) -> Vec<SessionAction> {
        if error.is_transient() {
            info!(%error, "conversation setup interrupted, log in again to retry");
        } else {
            warn!(%error, "conversation setup stopped");
        }
        self.discovery = Discovery::Stalled(error.kind());
        Vec::new()
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
