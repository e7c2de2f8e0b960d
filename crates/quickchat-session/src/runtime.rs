//! Async session runtime.
//!
//! The runtime owns the backend client handle and drives the
//! [`Coordinator`]. Two inputs feed one loop:
//! - commands from [`SessionHandle`]s,
//! - inbound backend traffic: completions of spawned operations and pushes
//!   from the client's [`EventSink`], sharing one queue so they are handled
//!   in the order they arrived.
//!
//! The loop is the only writer of coordinator state. Network operations are
//! spawned so a slow request never blocks event handling; their results
//! re-enter the loop tagged with the epoch they were issued in.

use std::{collections::HashMap, future::Future, sync::Arc};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::{
    AccessToken, BackendError, ConversationsBackend, ConversationsClient, Coordinator,
    EventSink, Identity, Message, Notification, Notifications, RequestId, SessionAction,
    SessionConfig, SessionError, SessionEvent, SessionSnapshot, TokenError, TokenSource,
    backend::PushTarget,
};

type LoginReply = oneshot::Sender<Result<(), SessionError>>;
type SendReply = oneshot::Sender<Result<Message, SessionError>>;

/// Requests from a [`SessionHandle`].
enum Command {
    LoginWithToken { token: AccessToken, reply: LoginReply },
    LoginFromServer { identity: Identity, reply: LoginReply },
    SendMessage { body: String, reply: SendReply },
    Shutdown { reply: oneshot::Sender<()> },
    Snapshot { reply: oneshot::Sender<SessionSnapshot> },
}

/// Inbound backend traffic: a spawned operation's result or a push.
enum Completion<C> {
    Event(SessionEvent),
    Connected { epoch: u64, request: RequestId, result: Result<Arc<C>, BackendError> },
}

impl<C: ConversationsClient> PushTarget for mpsc::UnboundedSender<Completion<C>> {
    fn push(&self, event: SessionEvent) -> bool {
        self.send(Completion::Event(event)).is_ok()
    }

    fn is_closed(&self) -> bool {
        mpsc::UnboundedSender::is_closed(self)
    }
}

/// Cloneable command surface of a running [`Session`].
///
/// Every method resolves once the session has processed the request. If the
/// session task is gone, requests fail with [`SessionError::ShutDown`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    /// Log in with a pre-obtained token.
    ///
    /// Resolves when the backend accepts or rejects the token. Failures are
    /// returned and logged but not shown on the delegate.
    pub async fn login_with_token(&self, token: AccessToken) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::LoginWithToken { token, reply }, rx).await?
    }

    /// Fetch a token for `identity` from the token endpoint, then log in.
    ///
    /// Token fetch and token rejection are also reported to the delegate.
    pub async fn login_from_server(&self, identity: Identity) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::LoginFromServer { identity, reply }, rx).await?
    }

    /// Send a text message to the active conversation.
    ///
    /// Resolves with the backend-assigned message. The local message list
    /// only changes when the backend pushes the message back.
    pub async fn send_message(&self, body: impl Into<String>) -> Result<Message, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::SendMessage { body: body.into(), reply }, rx).await?
    }

    /// Release the backend client. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.request(Command::Shutdown { reply }, rx).await.is_err() {
            debug!("session already stopped");
        }
    }

    /// Copy of the current session state.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Snapshot { reply }, rx).await
    }

    async fn request<T>(
        &self,
        command: Command,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, SessionError> {
        self.commands.send(command).map_err(|_| SessionError::ShutDown)?;
        rx.await.map_err(|_| SessionError::ShutDown)
    }
}

/// Configures and creates a [`Session`].
pub struct SessionBuilder<B: ConversationsBackend> {
    backend: B,
    config: SessionConfig,
    token_source: Option<Arc<dyn TokenSource>>,
}

impl<B: ConversationsBackend> SessionBuilder<B> {
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Token endpoint for server login and refresh.
    #[must_use]
    pub fn token_source(mut self, source: impl TokenSource + 'static) -> Self {
        self.token_source = Some(Arc::new(source));
        self
    }

    /// Create the session without starting it.
    pub fn build(self) -> (Session<B>, SessionHandle, Notifications) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let session = Session {
            coordinator: Coordinator::new(self.config),
            backend: Arc::new(self.backend),
            token_source: self.token_source,
            client: None,
            commands: commands_rx,
            completions_tx,
            completions_rx,
            notifications: notify_tx,
            pending_logins: HashMap::new(),
            pending_sends: HashMap::new(),
            next_request: 0,
        };

        (session, SessionHandle { commands: commands_tx }, Notifications::new(notify_rx))
    }

    /// Create the session and run it on a new tokio task.
    pub fn spawn(self) -> (SessionHandle, Notifications) {
        let (session, handle, notifications) = self.build();
        tokio::spawn(session.run());
        (handle, notifications)
    }
}

/// Async runtime executing coordinator actions against a backend.
pub struct Session<B: ConversationsBackend> {
    coordinator: Coordinator,
    backend: Arc<B>,
    token_source: Option<Arc<dyn TokenSource>>,

    /// Live client handle. `None` before login and after shutdown.
    client: Option<Arc<B::Client>>,

    commands: mpsc::UnboundedReceiver<Command>,
    /// Shared by operation results and backend pushes.
    completions_tx: mpsc::UnboundedSender<Completion<B::Client>>,
    completions_rx: mpsc::UnboundedReceiver<Completion<B::Client>>,
    notifications: mpsc::UnboundedSender<Notification>,

    pending_logins: HashMap<RequestId, LoginReply>,
    pending_sends: HashMap<RequestId, SendReply>,
    next_request: u64,
}

impl<B: ConversationsBackend> Session<B> {
    /// Start configuring a session over `backend`.
    pub fn builder(backend: B) -> SessionBuilder<B> {
        SessionBuilder { backend, config: SessionConfig::default(), token_source: None }
    }

    /// Run until every [`SessionHandle`] is dropped, then shut the client
    /// down.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                Some(completion) = self.completions_rx.recv() => {
                    self.handle_completion(completion).await;
                },
            }
        }

        debug!("all session handles dropped");
        self.dispatch(SessionEvent::Shutdown).await;
    }

    async fn handle_command(&mut self, command: Command) {
        let event = match command {
            Command::LoginWithToken { token, reply } => {
                let request = self.next_request_id();
                self.pending_logins.insert(request, reply);
                SessionEvent::LoginWithToken { request, token }
            },
            Command::LoginFromServer { identity, reply } => {
                let request = self.next_request_id();
                self.pending_logins.insert(request, reply);
                SessionEvent::LoginFromServer { request, identity }
            },
            Command::SendMessage { body, reply } => {
                let request = self.next_request_id();
                self.pending_sends.insert(request, reply);
                SessionEvent::SendMessage { request, body }
            },
            Command::Shutdown { reply } => {
                self.dispatch(SessionEvent::Shutdown).await;
                let _ = reply.send(());
                return;
            },
            Command::Snapshot { reply } => {
                let _ = reply.send(self.coordinator.snapshot());
                return;
            },
        };
        self.dispatch(event).await;
    }

    async fn handle_completion(&mut self, completion: Completion<B::Client>) {
        match completion {
            Completion::Event(event) => self.dispatch(event).await,
            Completion::Connected { epoch, request, result } => {
                let result = match result {
                    Ok(client) if epoch == self.coordinator.epoch() => {
                        self.client = Some(client);
                        Ok(())
                    },
                    Ok(client) => {
                        debug!(epoch, "releasing client from superseded login");
                        tokio::spawn(async move { client.shutdown().await });
                        Ok(())
                    },
                    Err(e) => Err(e),
                };
                self.dispatch(SessionEvent::ClientConnected { epoch, request, result }).await;
            },
        }
    }

    /// Feed one event to the coordinator and execute its actions.
    async fn dispatch(&mut self, event: SessionEvent) {
        trace!(?event, "session event");
        for action in self.coordinator.handle(event) {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: SessionAction) {
        let epoch = self.coordinator.epoch();

        match action {
            SessionAction::FetchToken { identity, purpose } => {
                let source = self.token_source.clone();
                self.spawn_operation(async move {
                    let result = match source {
                        Some(source) => source.fetch_token(&identity).await,
                        None => Err(TokenError::NotConfigured),
                    };
                    SessionEvent::TokenFetched { epoch, purpose, result }
                });
            },
            SessionAction::Connect { request, token } => {
                let backend = Arc::clone(&self.backend);
                let sink = EventSink::new(epoch, Arc::new(self.completions_tx.clone()));
                let completions = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = backend.connect(token, sink).await.map(Arc::new);
                    let _ = completions.send(Completion::Connected { epoch, request, result });
                });
            },
            SessionAction::UpdateToken { token } => {
                let Some(client) = self.client.clone() else {
                    debug!("no client to update token on");
                    return;
                };
                self.spawn_operation(async move {
                    let result = client.update_token(token.clone()).await;
                    SessionEvent::TokenUpdated { epoch, token, result }
                });
            },
            SessionAction::LookupConversation { name } => {
                let Some(client) = self.client.clone() else {
                    debug!("no client to look up conversation with");
                    return;
                };
                self.spawn_operation(async move {
                    let result = client.conversation(&name).await;
                    SessionEvent::ConversationLookedUp { epoch, result }
                });
            },
            SessionAction::CreateConversation { name } => {
                let Some(client) = self.client.clone() else {
                    debug!("no client to create conversation with");
                    return;
                };
                self.spawn_operation(async move {
                    let result = client.create_conversation(&name).await;
                    SessionEvent::ConversationCreated { epoch, result }
                });
            },
            SessionAction::JoinConversation { conversation } => {
                let Some(client) = self.client.clone() else {
                    debug!("no client to join conversation with");
                    return;
                };
                self.spawn_operation(async move {
                    let result = client.join(&conversation).await;
                    SessionEvent::ConversationJoined { epoch, result }
                });
            },
            SessionAction::FetchHistory { conversation, limit } => {
                let Some(client) = self.client.clone() else {
                    debug!("no client to load history with");
                    return;
                };
                self.spawn_operation(async move {
                    let result = client.last_messages(&conversation, limit).await;
                    SessionEvent::HistoryLoaded { epoch, result }
                });
            },
            SessionAction::SendMessage { request, conversation, body } => {
                let client = self.client.clone();
                self.spawn_operation(async move {
                    let result = match client {
                        Some(client) => client.send_message(&conversation, &body).await,
                        None => Err(BackendError::ShutDown),
                    };
                    SessionEvent::MessageSent { epoch, request, result }
                });
            },
            SessionAction::ShutdownClient => {
                if let Some(client) = self.client.take() {
                    client.shutdown().await;
                }
            },
            SessionAction::Notify(notification) => {
                if self.notifications.send(notification).is_err() {
                    trace!("no notification consumer");
                }
            },
            SessionAction::CompleteLogin { request, result } => {
                match self.pending_logins.remove(&request) {
                    Some(reply) => {
                        let _ = reply.send(result);
                    },
                    None => warn!(?request, "login completed twice"),
                }
            },
            SessionAction::CompleteSend { request, result } => {
                match self.pending_sends.remove(&request) {
                    Some(reply) => {
                        let _ = reply.send(result);
                    },
                    None => warn!(?request, "send completed twice"),
                }
            },
        }
    }

    fn spawn_operation<F>(&self, operation: F)
    where
        F: Future<Output = SessionEvent> + Send + 'static,
    {
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let event = operation.await;
            let _ = completions.send(Completion::Event(event));
        });
    }

    fn next_request_id(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId::new(self.next_request)
    }
}
