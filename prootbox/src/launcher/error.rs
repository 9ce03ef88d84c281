use std::path::PathBuf;

use crate::extract::ArchiveError;

/// Internal failures of a launcher run.
///
/// A child that runs and exits nonzero (or is killed by a signal) is not an
/// error; it is reported as a [`super::ProcessOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Usage: {0}")]
    Usage(String),

    #[error("Failed to create ephemeral root under '{base:?}'")]
    Workspace {
        base: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to unpack rootfs")]
    Archive(#[from] ArchiveError),

    #[error("Failed to start sandbox tool: {context}")]
    Spawn {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for sandbox tool")]
    Wait(#[source] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl LaunchError {
    pub(crate) fn spawn(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| LaunchError::Spawn { context, source }
    }

    /// True for usage mistakes, as opposed to runtime failures.
    pub fn is_usage(&self) -> bool {
        matches!(self, LaunchError::Usage(_))
    }

    /// True when an archive entry tried to escape the extraction root.
    pub fn is_containment_violation(&self) -> bool {
        matches!(self, LaunchError::Archive(e) if e.is_containment_violation())
    }
}

/// Removing the ephemeral root failed after the run's outcome was decided.
///
/// Only ever logged; it never replaces the run's result.
#[derive(Debug, thiserror::Error)]
#[error("Failed to remove ephemeral root '{path:?}'")]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
