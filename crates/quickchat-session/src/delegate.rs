//! UI delegate contract and notification delivery.
//!
//! The runtime never calls the delegate directly. It queues
//! [`Notification`]s on one channel; whoever owns the UI context drains
//! [`Notifications`] and applies them, so the delegate is only ever touched
//! from a single context and sees notifications in the order they were
//! produced.

use std::sync::Weak;

use tokio::sync::mpsc;
use tracing::trace;

use crate::{Message, Notification};

/// Capability set the session requires of a UI consumer.
pub trait SessionDelegate: Send + Sync {
    /// The message list changed. `messages` is the full current list.
    fn reload_messages(&self, messages: &[Message]);

    /// A live message was appended; typically scroll to the newest entry.
    fn received_new_message(&self, message: &Message);

    /// Show an informational status line.
    fn display_status_message(&self, status: &str);

    /// Show a user-visible error.
    fn display_error_message(&self, error: &str);
}

/// Ordered stream of delegate notifications for one UI context.
#[derive(Debug)]
pub struct Notifications {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Notifications {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Notification>) -> Self {
        Self { rx }
    }

    /// Next notification, or `None` once the session has stopped.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Next notification if one is already queued.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    /// Deliver every notification to `delegate` until the session stops.
    ///
    /// The delegate is held weakly. Notifications that arrive after it has
    /// been dropped are discarded.
    pub async fn dispatch<D: SessionDelegate + ?Sized>(mut self, delegate: Weak<D>) {
        while let Some(notification) = self.rx.recv().await {
            match delegate.upgrade() {
                Some(delegate) => notification.deliver(&*delegate),
                None => trace!(?notification, "delegate gone, dropping notification"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl Log {
        fn push(&self, entry: String) {
            if let Ok(mut entries) = self.0.lock() {
                entries.push(entry);
            }
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().map(|e| e.clone()).unwrap_or_default()
        }
    }

    impl SessionDelegate for Log {
        fn reload_messages(&self, messages: &[Message]) {
            self.push(format!("reload:{}", messages.len()));
        }

        fn received_new_message(&self, message: &Message) {
            self.push(format!("new:{}", message.body));
        }

        fn display_status_message(&self, status: &str) {
            self.push(format!("status:{status}"));
        }

        fn display_error_message(&self, error: &str) {
            self.push(format!("error:{error}"));
        }
    }

    #[tokio::test]
    async fn dispatch_preserves_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Arc::new(Log::default());

        let message = Message::new(0, "bob", "hi");
        let _ = tx.send(Notification::ReloadMessages(vec![message.clone()]));
        let _ = tx.send(Notification::ReceivedNewMessage(message));
        let _ = tx.send(Notification::Status("ok".into()));
        drop(tx);

        Notifications::new(rx).dispatch(Arc::downgrade(&log)).await;

        assert_eq!(log.entries(), vec!["reload:1", "new:hi", "status:ok"]);
    }

    #[tokio::test]
    async fn dispatch_tolerates_dropped_delegate() {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Arc::new(Log::default());
        let weak: Weak<dyn SessionDelegate> = Arc::<Log>::downgrade(&log);
        drop(log);

        let _ = tx.send(Notification::Error("lost".into()));
        drop(tx);

        Notifications::new(rx).dispatch(weak).await;
    }
}
