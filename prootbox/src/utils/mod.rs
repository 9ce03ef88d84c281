//! # Utility Modules
//!
//! - **`logging`**: one-time setup of the `tracing` subscriber, writing to
//!   stderr or to a daily rolling file in the user cache directory.

pub mod logging;
