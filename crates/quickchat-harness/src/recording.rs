//! Delegate that records what it is told.

use std::sync::{Mutex, MutexGuard, PoisonError};

use quickchat_session::{Message, SessionDelegate};

/// One delegate invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegateCall {
    /// `reload_messages` with the full list at that time.
    ReloadMessages(Vec<Message>),
    /// `received_new_message`
    ReceivedNewMessage(Message),
    /// `display_status_message`
    Status(String),
    /// `display_error_message`
    Error(String),
}

/// [`SessionDelegate`] that appends every call to an in-memory log.
#[derive(Debug, Default)]
pub struct RecordingDelegate {
    calls: Mutex<Vec<DelegateCall>>,
}

impl RecordingDelegate {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> MutexGuard<'_, Vec<DelegateCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call so far, in delivery order.
    pub fn calls(&self) -> Vec<DelegateCall> {
        self.log().clone()
    }

    /// Drain the log.
    pub fn take(&self) -> Vec<DelegateCall> {
        std::mem::take(&mut *self.log())
    }

    /// Number of `reload_messages` calls so far.
    pub fn reload_count(&self) -> usize {
        self.log().iter().filter(|c| matches!(c, DelegateCall::ReloadMessages(_))).count()
    }

    /// Message list from the most recent reload.
    pub fn last_reload(&self) -> Option<Vec<Message>> {
        self.log().iter().rev().find_map(|c| match c {
            DelegateCall::ReloadMessages(messages) => Some(messages.clone()),
            _ => None,
        })
    }

    /// Error strings shown so far.
    pub fn errors(&self) -> Vec<String> {
        self.log()
            .iter()
            .filter_map(|c| match c {
                DelegateCall::Error(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    /// Status strings shown so far.
    pub fn statuses(&self) -> Vec<String> {
        self.log()
            .iter()
            .filter_map(|c| match c {
                DelegateCall::Status(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }
}

impl SessionDelegate for RecordingDelegate {
    fn reload_messages(&self, messages: &[Message]) {
        self.log().push(DelegateCall::ReloadMessages(messages.to_vec()));
    }

    fn received_new_message(&self, message: &Message) {
        self.log().push(DelegateCall::ReceivedNewMessage(message.clone()));
    }

    fn display_status_message(&self, status: &str) {
        self.log().push(DelegateCall::Status(status.to_string()));
    }

    fn display_error_message(&self, error: &str) {
        self.log().push(DelegateCall::Error(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order() {
        let delegate = RecordingDelegate::new();
        let message = Message::new(0, "bob", "hi");

        delegate.reload_messages(std::slice::from_ref(&message));
        delegate.received_new_message(&message);
        delegate.display_error_message("Unable to login");

        assert_eq!(delegate.reload_count(), 1);
        assert_eq!(delegate.last_reload(), Some(vec![message.clone()]));
        assert_eq!(delegate.errors(), vec!["Unable to login".to_string()]);
        assert_eq!(delegate.take().len(), 3);
        assert!(delegate.calls().is_empty());
    }
}
