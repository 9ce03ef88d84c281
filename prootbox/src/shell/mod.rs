//! # Shell Module
//!
//! Entry point and command-line handling for the `prootbox` binary.
//!
//! - **`cli`**: argument parsing, payload loading, exit-status mapping
//! - **`signals`**: SIGINT/SIGTERM to cancellation forwarding

pub mod cli;
pub mod signals;

pub use cli::{Cli, run};
pub use signals::forward_interrupts;
