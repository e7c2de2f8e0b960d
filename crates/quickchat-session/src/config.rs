//! Session configuration.

/// Unique name of the conversation joined when none is configured.
pub const DEFAULT_CONVERSATION_NAME: &str = "general";

/// Number of recent messages loaded after joining.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Configuration for a [`crate::Coordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Unique name of the single conversation to look up or create.
    pub conversation_name: String,
    /// How many recent messages to request when loading history.
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            conversation_name: DEFAULT_CONVERSATION_NAME.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl SessionConfig {
    /// Use a different well-known conversation.
    #[must_use]
    pub fn with_conversation_name(mut self, name: impl Into<String>) -> Self {
        self.conversation_name = name.into();
        self
    }

    /// Load a different number of recent messages.
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}
