use std::path::PathBuf;
use std::process::ExitStatus;

use crate::extract::ExtractionSummary;

/// Exit status for command-line misuse.
pub const USAGE_EXIT_CODE: u8 = 2;

/// Exit status when the launcher itself fails (extraction, spawn, I/O).
pub const INTERNAL_EXIT_CODE: u8 = 125;

/// Exit status when an interrupt arrives before the child was started.
pub const CANCELLED_EXIT_CODE: u8 = 130;

/// How the sandboxed program ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exited normally with this status code
    Exited(i32),
    /// Terminated by this signal number
    Signaled(i32),
    /// Interrupted before the child was spawned
    Cancelled,
}

impl ProcessOutcome {
    pub fn from_status(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => ProcessOutcome::Exited(code),
            (None, Some(signal)) => ProcessOutcome::Signaled(signal),
            // Neither code nor signal: stopped or continued, never a final state.
            (None, None) => ProcessOutcome::Exited(i32::from(INTERNAL_EXIT_CODE)),
        }
    }

    /// Status this launcher should exit with to mirror the child.
    pub fn exit_code(&self) -> u8 {
        match *self {
            ProcessOutcome::Exited(code) => (code & 0xff) as u8,
            ProcessOutcome::Signaled(signal) => 128u8.wrapping_add((signal & 0x7f) as u8),
            ProcessOutcome::Cancelled => CANCELLED_EXIT_CODE,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ProcessOutcome::Exited(0))
    }
}

impl std::fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessOutcome::Exited(code) => write!(f, "exited with status {code}"),
            ProcessOutcome::Signaled(signal) => write!(f, "killed by signal {signal}"),
            ProcessOutcome::Cancelled => write!(f, "cancelled before start"),
        }
    }
}

/// Result of one completed launcher run.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub outcome: ProcessOutcome,
    /// Path the ephemeral root lived at
    pub root: PathBuf,
    /// True when the root was left on disk
    pub root_kept: bool,
    pub extraction: Option<ExtractionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_exit_code_mirrors_child() {
        assert_eq!(ProcessOutcome::Exited(0).exit_code(), 0);
        assert_eq!(ProcessOutcome::Exited(3).exit_code(), 3);
        assert_eq!(ProcessOutcome::Exited(256 + 7).exit_code(), 7);
        assert!(ProcessOutcome::Exited(0).success());
        assert!(!ProcessOutcome::Exited(1).success());
    }

    #[test]
    fn test_signals_map_above_128() {
        assert_eq!(ProcessOutcome::Signaled(libc::SIGKILL).exit_code(), 137);
        assert_eq!(ProcessOutcome::Signaled(libc::SIGTERM).exit_code(), 143);
        assert_eq!(ProcessOutcome::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_from_raw_status() {
        // Wait status encoding: exit code in the high byte, signal in the low bits.
        assert_eq!(
            ProcessOutcome::from_status(ExitStatus::from_raw(5 << 8)),
            ProcessOutcome::Exited(5)
        );
        assert_eq!(
            ProcessOutcome::from_status(ExitStatus::from_raw(libc::SIGTERM)),
            ProcessOutcome::Signaled(libc::SIGTERM)
        );
    }
}
