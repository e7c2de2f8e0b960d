//! Session coordinator for a hosted conversations backend.
//!
//! Logs a user in with a bearer token, joins (or creates) one well-known
//! conversation, keeps its recent history and live messages in an ordered
//! list, and sends outgoing text messages. The backend itself (transport,
//! sync, storage) is an external collaborator behind
//! [`ConversationsBackend`].
//!
//! # Architecture
//!
//! The [`Coordinator`] is a pure state machine: it consumes
//! [`SessionEvent`]s and produces [`SessionAction`]s for the caller to
//! execute. The async [`Session`] runtime executes those actions against the
//! backend and token endpoint, feeding every result back through ordered
//! channels into the coordinator.
//!
//! # Components
//!
//! - [`Coordinator`]: credential, connection and conversation state machine
//! - [`Session`] / [`SessionHandle`]: async runtime and its command surface
//! - [`Notifications`]: ordered delegate notifications for one UI context
//! - [`SessionDelegate`]: capability set required of a UI consumer
//! - [`TokenSource`] / [`HttpTokenSource`]: access token retrieval

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod action;
mod backend;
mod config;
mod coordinator;
mod delegate;
mod error;
mod event;
mod runtime;
mod state;
mod token;
mod types;

pub use action::{Notification, SessionAction};
pub use backend::{BackendEvent, ConversationsBackend, ConversationsClient, EventSink};
pub use config::{DEFAULT_CONVERSATION_NAME, DEFAULT_HISTORY_LIMIT, SessionConfig};
pub use coordinator::Coordinator;
pub use delegate::{Notifications, SessionDelegate};
pub use error::{BackendError, ErrorKind, SessionError, TokenError};
pub use event::{RequestId, SessionEvent, TokenPurpose};
pub use runtime::{Session, SessionBuilder, SessionHandle};
pub use state::{ClientState, SessionPhase, SessionSnapshot};
pub use reqwest::Url;
pub use token::{HttpTokenSource, TokenSource};
pub use types::{
    AccessToken, Conversation, ConversationSid, Identity, MembershipStatus, Message, SyncStatus,
};
