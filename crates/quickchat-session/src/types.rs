//! Domain types shared by the coordinator, the backend seam and the UI.

use std::fmt;

/// Name of the logged-in user.
///
/// Opaque to the coordinator. Set at server login and used to parameterize
/// token refresh requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    /// Wrap an identity string.
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// Identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(identity: &str) -> Self {
        Self::new(identity)
    }
}

impl From<String> for Identity {
    fn from(identity: String) -> Self {
        Self(identity)
    }
}

/// Opaque bearer credential with a server-determined expiry.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for handing to the backend.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(<{} bytes>)", self.0.len())
    }
}

impl From<&str> for AccessToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// Backend-assigned conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationSid(String);

impl ConversationSid {
    /// Wrap a conversation SID.
    pub fn new(sid: impl Into<String>) -> Self {
        Self(sid.into())
    }

    /// SID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationSid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether the local identity participates in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    /// Already a participant; joining again is unnecessary.
    Joined,
    /// Not (yet) a participant.
    NotJoined,
}

/// Handle to a conversation resolved by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// Backend identifier.
    pub sid: ConversationSid,
    /// Well-known unique name the conversation was looked up or created by.
    pub unique_name: String,
    /// Local user's membership at the time the handle was produced.
    pub status: MembershipStatus,
}

/// A message in the conversation. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Backend-assigned position in the conversation.
    pub index: u64,
    /// Identity of the author.
    pub author: Identity,
    /// Message text.
    pub body: String,
}

impl Message {
    /// Create a message record.
    pub fn new(index: u64, author: impl Into<Identity>, body: impl Into<String>) -> Self {
        Self { index, author: author.into(), body: body.into() }
    }
}

/// Backend-reported readiness of the client's local view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Synchronization started.
    Started,
    /// Conversation list is available; messages may still be syncing.
    ConversationsCompleted,
    /// Fully synchronized. The only status that triggers discovery.
    Completed,
    /// Synchronization failed.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("super-secret");
        let debug = format!("{token:?}");
        assert!(!debug.contains("super-secret"));
        assert_eq!(debug, "AccessToken(<12 bytes>)");
    }

    #[test]
    fn identity_displays_raw_value() {
        assert_eq!(Identity::from("alice").to_string(), "alice");
    }
}
