//! Waiting on session progress.
//!
//! The session does its work on spawned tasks, so tests observe it by
//! polling snapshots until a condition holds or a deadline passes.

use std::time::Duration;

use quickchat_session::{SessionHandle, SessionPhase, SessionSnapshot};
use tokio::time::{Instant, sleep};

/// Default time allowed for a condition to become true.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Outcome of a wait that never saw its condition hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// Deadline passed; carries the last snapshot observed.
    TimedOut(Box<SessionSnapshot>),
    /// The session stopped.
    Stopped,
}

/// Poll snapshots until `condition` holds.
pub async fn wait_until<F>(
    handle: &SessionHandle,
    mut condition: F,
) -> Result<SessionSnapshot, WaitError>
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let deadline = Instant::now() + DEFAULT_DEADLINE;

    loop {
        let snapshot = handle.snapshot().await.map_err(|_| WaitError::Stopped)?;
        if condition(&snapshot) {
            return Ok(snapshot);
        }
        if Instant::now() >= deadline {
            return Err(WaitError::TimedOut(Box::new(snapshot)));
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Wait until the session reaches `phase`.
pub async fn wait_for_phase(
    handle: &SessionHandle,
    phase: SessionPhase,
) -> Result<SessionSnapshot, WaitError> {
    wait_until(handle, |s| s.phase == phase).await
}

/// Wait until the message list holds at least `count` messages.
pub async fn wait_for_messages(
    handle: &SessionHandle,
    count: usize,
) -> Result<SessionSnapshot, WaitError> {
    wait_until(handle, |s| s.messages.len() >= count).await
}

/// Let spawned session work run for a moment.
///
/// For asserting that something did *not* happen.
pub async fn settle() {
    sleep(POLL_INTERVAL * 10).await;
}
