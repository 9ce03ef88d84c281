//! # prootbox
//!
//! Run a program from a bundled container root filesystem, without privileges.
//!
//! The binary carries two payloads: a gzip-compressed image export whose
//! first `*/layer.tar` holds a rootfs, and the `proot` user-space sandbox
//! tool. Each invocation unpacks the rootfs into a fresh private directory,
//! runs the requested program from it under `proot` with the rootfs's `nix`
//! directory bound to `/nix`, mirrors the program's exit status and removes
//! the directory again.
//!
//! ## Safety Properties
//!
//! - **Containment**: no archive entry or symlink target may resolve outside
//!   the extraction directory. Paths are resolved through the symlinks
//!   already on disk, and containment is checked component-wise.
//! - **Cleanup**: the per-run directory is removed exactly once on every exit
//!   path, including interrupts and extraction failures.
//! - **No orphans**: on interrupt the child gets SIGTERM, then SIGKILL after a
//!   grace period; on Linux it is also killed if the launcher dies.
//!
//! ## Modules
//!
//! - **`extract`**: hardened two-level tar extraction.
//! - **`launcher`**: session orchestration, child supervision, cleanup.
//! - **`payload`**: the archive and tool bytes a launcher is built from.
//! - **`config`**: environment-driven settings.
//! - **`shell`**: the command-line entry point.
//! - **`utils`**: logging setup.
//! - **`test_utils`**: synthetic archives and a stand-in sandbox tool.

pub mod config;
pub mod extract;
pub mod launcher;
pub mod payload;
pub mod shell;
pub mod test_utils;
pub mod utils;

pub use config::LauncherConfig;
pub use extract::{ArchiveError, ExtractionSummary, extract_rootfs};
pub use launcher::{LaunchError, LaunchRequest, Launcher, ProcessOutcome, SessionReport};
pub use payload::Payloads;
