//! Simulation harness for quickchat sessions.
//!
//! In-process stand-ins for the external collaborators of a
//! [`quickchat_session::Session`], so the full login-to-ready flow runs in
//! tests and in the demo CLI without a hosted backend.
//!
//! # Components
//!
//! - [`SimBackend`]: in-memory conversations service with fault injection
//! - [`RecordingDelegate`]: delegate that records every call in order
//! - [`ScriptedTokenSource`] / [`SimTokenSource`]: token endpoint doubles
//! - [`scenario`]: helpers for waiting on session progress

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod recording;
pub mod scenario;
mod sim_backend;
mod sim_token;

pub use recording::{DelegateCall, RecordingDelegate};
pub use sim_backend::{BackendCall, FaultPoint, SimBackend, SimClient};
pub use sim_token::{ScriptedTokenSource, SimTokenSource};
