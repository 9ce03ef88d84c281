//! Shared building blocks for `prootbox`.
//!
//! - **`session_state`**: observable lifecycle of a single sandbox session.

pub mod session_state;

pub use session_state::{SessionPhase, SessionStateMachine};
