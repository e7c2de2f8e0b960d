//! End-to-end session tests against the simulated backend.
//!
//! Sessions run on the tokio runtime exactly as an application would drive
//! them. The simulated backend plays the hosted service and records every
//! call, so tests can check both what the user saw and what was asked of
//! the backend.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use async_trait::async_trait;
use quickchat_harness::{
    BackendCall, DelegateCall, FaultPoint, RecordingDelegate, ScriptedTokenSource, SimBackend,
    SimTokenSource,
    scenario::{settle, wait_for_messages, wait_for_phase},
};
use quickchat_session::{
    AccessToken, BackendError, BackendEvent, Conversation, ConversationSid, ConversationsBackend,
    ConversationsClient, ErrorKind, EventSink, Identity, MembershipStatus, Message, Notifications,
    Session, SessionConfig, SessionError, SessionHandle, SessionPhase, SyncStatus, TokenError,
};

/// Deliver every queued notification to `delegate`.
fn drain(notifications: &mut Notifications, delegate: &RecordingDelegate) {
    while let Some(notification) = notifications.try_recv() {
        notification.deliver(delegate);
    }
}

/// Poll `condition` until it holds or a second passes.
async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

fn spawn_with_sim_tokens(backend: &SimBackend) -> (SessionHandle, Notifications) {
    Session::builder(backend.clone()).token_source(SimTokenSource::new(backend.clone())).spawn()
}

fn count(calls: &[BackendCall], wanted: &BackendCall) -> usize {
    calls.iter().filter(|c| *c == wanted).count()
}

#[tokio::test]
async fn server_login_creates_and_joins_conversation() {
    let backend = SimBackend::new();
    let (handle, mut notifications) = spawn_with_sim_tokens(&backend);
    let delegate = RecordingDelegate::new();

    handle.login_from_server(Identity::new("alice")).await.unwrap();
    let snapshot = wait_for_phase(&handle, SessionPhase::Ready).await.unwrap();
    drain(&mut notifications, &delegate);

    let calls = backend.calls();
    assert_eq!(count(&calls, &BackendCall::Create("general".into())), 1);
    assert_eq!(count(&calls, &BackendCall::Join("general".into())), 1);
    assert!(backend.is_member("general", &Identity::new("alice")));

    // Oracle: identity shown, empty history loaded once
    assert_eq!(snapshot.identity, Some(Identity::new("alice")));
    assert_eq!(
        delegate.calls(),
        vec![
            DelegateCall::Status("Logged in as \"alice\"".into()),
            DelegateCall::ReloadMessages(Vec::new()),
        ]
    );
}

#[tokio::test]
async fn existing_member_skips_join_and_loads_history() {
    let backend = SimBackend::new();
    backend.add_member("general", "alice");
    for body in ["one", "two", "three"] {
        backend.post_message("general", "bob", body).unwrap();
    }
    let (handle, mut notifications) = Session::builder(backend.clone()).spawn();
    let delegate = RecordingDelegate::new();

    handle.login_with_token(backend.issue_token("alice")).await.unwrap();
    let snapshot = wait_for_phase(&handle, SessionPhase::Ready).await.unwrap();
    drain(&mut notifications, &delegate);

    assert!(!backend.calls().iter().any(|c| matches!(c, BackendCall::Join(_))));
    assert_eq!(snapshot.messages, backend.messages("general"));
    assert_eq!(delegate.reload_count(), 1);
    assert_eq!(delegate.last_reload().map(|m| m.len()), Some(3));
}

#[tokio::test]
async fn history_is_limited_to_configured_count() {
    let backend = SimBackend::new();
    backend.add_member("lobby", "alice");
    for i in 0..10 {
        backend.post_message("lobby", "bob", format!("m{i}")).unwrap();
    }
    let config = SessionConfig::default().with_conversation_name("lobby").with_history_limit(4);
    let (handle, _notifications) = Session::builder(backend.clone()).config(config).spawn();

    handle.login_with_token(backend.issue_token("alice")).await.unwrap();
    let snapshot = wait_for_phase(&handle, SessionPhase::Ready).await.unwrap();

    let bodies: Vec<_> = snapshot.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["m6", "m7", "m8", "m9"]);
    assert!(backend.calls().contains(&BackendCall::LastMessages {
        conversation: "lobby".into(),
        count: 4,
    }));
}

#[tokio::test]
async fn live_message_reloads_then_announces() {
    let backend = SimBackend::new();
    backend.add_member("general", "alice");
    let (handle, mut notifications) = Session::builder(backend.clone()).spawn();
    let delegate = RecordingDelegate::new();

    handle.login_with_token(backend.issue_token("alice")).await.unwrap();
    wait_for_phase(&handle, SessionPhase::Ready).await.unwrap();
    drain(&mut notifications, &delegate);
    delegate.take();

    let posted = backend.post_message("general", "bob", "hi alice").unwrap();
    wait_for_messages(&handle, 1).await.unwrap();
    drain(&mut notifications, &delegate);

    assert_eq!(
        delegate.calls(),
        vec![
            DelegateCall::ReloadMessages(vec![posted.clone()]),
            DelegateCall::ReceivedNewMessage(posted),
        ]
    );
}

#[tokio::test]
async fn sent_message_arrives_once_through_the_backend() {
    let backend = SimBackend::new();
    let (handle, _notifications) = spawn_with_sim_tokens(&backend);

    handle.login_from_server(Identity::new("alice")).await.unwrap();
    wait_for_phase(&handle, SessionPhase::Ready).await.unwrap();

    let sent = handle.send_message("hello").await.unwrap();
    assert_eq!(sent.author, Identity::new("alice"));
    assert_eq!(sent.body, "hello");

    settle().await;
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.messages, vec![sent]);
}

#[tokio::test]
async fn send_before_login_is_not_connected() {
    let backend = SimBackend::new();
    let (handle, mut notifications) = Session::builder(backend.clone()).spawn();

    let result = handle.send_message("hello").await;

    assert_eq!(result, Err(SessionError::NotConnected));
    assert!(backend.calls().is_empty());
    assert!(notifications.try_recv().is_none());
}

#[tokio::test]
async fn rejected_send_leaves_list_alone() {
    let backend = SimBackend::new();
    backend.add_member("general", "alice");
    let (handle, mut notifications) = Session::builder(backend.clone()).spawn();
    let delegate = RecordingDelegate::new();

    handle.login_with_token(backend.issue_token("alice")).await.unwrap();
    wait_for_phase(&handle, SessionPhase::Ready).await.unwrap();
    drain(&mut notifications, &delegate);
    delegate.take();

    backend.fail_next(FaultPoint::Send, BackendError::Rejected("too long".into()));
    let result = handle.send_message("hello").await;

    assert_eq!(result.map_err(|e| e.kind()), Err(ErrorKind::Send));
    settle().await;
    drain(&mut notifications, &delegate);
    assert!(delegate.calls().is_empty());
    assert!(handle.snapshot().await.unwrap().messages.is_empty());
}

#[tokio::test]
async fn token_login_rejection_is_returned_not_shown() {
    let backend = SimBackend::new();
    let (handle, mut notifications) = Session::builder(backend.clone()).spawn();

    let result = handle.login_with_token(AccessToken::new("forged")).await;

    assert!(matches!(result, Err(SessionError::Auth(BackendError::Unauthorized(_)))));
    assert!(notifications.try_recv().is_none());
    assert_eq!(handle.snapshot().await.unwrap().phase, SessionPhase::LoggedOut);
}

#[tokio::test]
async fn token_endpoint_failure_is_shown() {
    let backend = SimBackend::new();
    let tokens = ScriptedTokenSource::new([Err(TokenError::Status { status: 500 })]);
    let (handle, mut notifications) =
        Session::builder(backend.clone()).token_source(tokens).spawn();
    let delegate = RecordingDelegate::new();

    let result = handle.login_from_server(Identity::new("alice")).await;
    drain(&mut notifications, &delegate);

    assert_eq!(result, Err(SessionError::TokenFetch(TokenError::Status { status: 500 })));
    assert_eq!(delegate.errors(), vec!["Unable to login".to_string()]);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn server_login_without_token_source_fails() {
    let backend = SimBackend::new();
    let (handle, _notifications) = Session::builder(backend).spawn();

    let result = handle.login_from_server(Identity::new("alice")).await;

    assert_eq!(result, Err(SessionError::TokenFetch(TokenError::NotConfigured)));
}

#[tokio::test]
async fn expiring_token_is_refreshed_silently() {
    let backend = SimBackend::new();
    let (handle, mut notifications) = spawn_with_sim_tokens(&backend);
    let delegate = RecordingDelegate::new();

    handle.login_from_server(Identity::new("alice")).await.unwrap();
    wait_for_phase(&handle, SessionPhase::Ready).await.unwrap();
    drain(&mut notifications, &delegate);
    delegate.take();

    backend.expire_soon();
    assert!(eventually(|| backend.calls().contains(&BackendCall::UpdateToken)).await);

    backend.fail_next(FaultPoint::UpdateToken, BackendError::Unauthorized("nope".into()));
    backend.expire_now();
    assert!(eventually(|| count(&backend.calls(), &BackendCall::UpdateToken) == 2).await);

    settle().await;
    drain(&mut notifications, &delegate);
    assert!(delegate.calls().is_empty());
    assert_eq!(handle.snapshot().await.unwrap().phase, SessionPhase::Ready);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let backend = SimBackend::new();
    let (handle, _notifications) = Session::builder(backend.clone()).spawn();

    handle.login_with_token(backend.issue_token("alice")).await.unwrap();
    wait_for_phase(&handle, SessionPhase::Ready).await.unwrap();

    handle.shutdown().await;
    handle.shutdown().await;

    assert_eq!(backend.active_clients(), 0);
    assert_eq!(count(&backend.calls(), &BackendCall::Shutdown), 1);
    assert_eq!(handle.snapshot().await.unwrap().phase, SessionPhase::LoggedOut);
    assert_eq!(handle.send_message("hello").await, Err(SessionError::NotConnected));
}

#[tokio::test]
async fn relogin_replaces_the_client() {
    let backend = SimBackend::new();
    let (handle, _notifications) = Session::builder(backend.clone()).spawn();

    handle.login_with_token(backend.issue_token("alice")).await.unwrap();
    wait_for_phase(&handle, SessionPhase::Ready).await.unwrap();
    handle.login_with_token(backend.issue_token("bob")).await.unwrap();
    wait_for_phase(&handle, SessionPhase::Ready).await.unwrap();

    assert_eq!(backend.active_clients(), 1);
    assert!(backend.is_member("general", &Identity::new("bob")));
}

#[tokio::test]
async fn dropping_every_handle_releases_the_client() {
    let backend = SimBackend::new();
    let (handle, _notifications) = Session::builder(backend.clone()).spawn();

    handle.login_with_token(backend.issue_token("alice")).await.unwrap();
    wait_for_phase(&handle, SessionPhase::Ready).await.unwrap();
    drop(handle);

    assert!(eventually(|| backend.active_clients() == 0).await);
}

#[tokio::test]
async fn stalled_join_is_visible_in_snapshot() {
    let backend = SimBackend::new();
    backend.fail_next(FaultPoint::Join, BackendError::Transport("reset".into()));
    let (handle, mut notifications) = Session::builder(backend.clone()).spawn();

    handle.login_with_token(backend.issue_token("alice")).await.unwrap();
    let snapshot =
        wait_for_phase(&handle, SessionPhase::Stalled(ErrorKind::Join)).await.unwrap();

    assert!(snapshot.messages.is_empty());
    assert!(notifications.try_recv().is_none());
}

/// Backend that pushes from its own task right after an operation returns,
/// the way an SDK delivering on a separate thread does.
#[derive(Clone)]
struct LatePushBackend {
    /// Emit sync completion before `connect` returns instead of after.
    sync_before_connect: bool,
    history: Vec<Message>,
    /// Pushed as `MessageAdded` once `last_messages` has returned.
    live: Message,
}

struct LatePushClient {
    sink: EventSink,
    history: Vec<Message>,
    live: Message,
}

fn general() -> Conversation {
    Conversation {
        sid: ConversationSid::new("CH0001"),
        unique_name: "general".into(),
        status: MembershipStatus::Joined,
    }
}

fn sync_completed() -> BackendEvent {
    BackendEvent::SynchronizationStatusChanged(SyncStatus::Completed)
}

#[async_trait]
impl ConversationsBackend for LatePushBackend {
    type Client = LatePushClient;

    async fn connect(&self, _token: AccessToken, events: EventSink) -> Result<LatePushClient, BackendError> {
        if self.sync_before_connect {
            events.emit(sync_completed());
        } else {
            let sink = events.clone();
            tokio::spawn(async move { sink.emit(sync_completed()) });
        }
        Ok(LatePushClient { sink: events, history: self.history.clone(), live: self.live.clone() })
    }
}

#[async_trait]
impl ConversationsClient for LatePushClient {
    async fn update_token(&self, _token: AccessToken) -> Result<(), BackendError> {
        Ok(())
    }

    async fn conversation(&self, _unique_name: &str) -> Result<Option<Conversation>, BackendError> {
        Ok(Some(general()))
    }

    async fn create_conversation(&self, unique_name: &str) -> Result<Conversation, BackendError> {
        Err(BackendError::Rejected(format!("{unique_name} exists")))
    }

    async fn join(&self, _conversation: &Conversation) -> Result<(), BackendError> {
        Ok(())
    }

    async fn last_messages(
        &self,
        conversation: &Conversation,
        _count: usize,
    ) -> Result<Vec<Message>, BackendError> {
        let sink = self.sink.clone();
        let event = BackendEvent::MessageAdded {
            conversation: conversation.sid.clone(),
            message: self.live.clone(),
        };
        tokio::spawn(async move { sink.emit(event) });
        Ok(self.history.clone())
    }

    async fn send_message(&self, _conversation: &Conversation, _body: &str) -> Result<Message, BackendError> {
        Err(BackendError::Rejected("read only".into()))
    }

    async fn shutdown(&self) {}
}

fn late_push_backend(sync_before_connect: bool) -> LatePushBackend {
    LatePushBackend {
        sync_before_connect,
        history: (0..3).map(|i| Message::new(i, "bob", format!("m{i}"))).collect(),
        live: Message::new(3, "bob", "m3"),
    }
}

async fn assert_live_message_follows_history(backend: LatePushBackend) {
    let (handle, mut notifications) = Session::builder(backend.clone()).spawn();
    let delegate = RecordingDelegate::new();

    handle.login_with_token(AccessToken::new("tok123")).await.unwrap();
    let snapshot = wait_for_messages(&handle, 4).await.unwrap();
    drain(&mut notifications, &delegate);

    let mut expected = backend.history.clone();
    expected.push(backend.live.clone());

    // Oracle: history first, then the push appended on top of it
    assert_eq!(snapshot.phase, SessionPhase::Ready);
    assert_eq!(snapshot.messages, expected);
    assert_eq!(
        delegate.calls(),
        vec![
            DelegateCall::ReloadMessages(backend.history.clone()),
            DelegateCall::ReloadMessages(expected),
            DelegateCall::ReceivedNewMessage(backend.live),
        ]
    );
}

#[tokio::test]
async fn push_after_history_result_is_appended() {
    assert_live_message_follows_history(late_push_backend(false)).await;
}

#[tokio::test]
async fn sync_reported_before_connect_resolves() {
    assert_live_message_follows_history(late_push_backend(true)).await;
}
