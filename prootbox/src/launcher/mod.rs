//! # Sandbox Launcher
//!
//! Runs one program from the bundled rootfs under the sandbox tool.
//!
//! A run validates the target, allocates an [`EphemeralRoot`], unpacks the
//! rootfs into it, writes the sandbox tool to a private executable and spawns
//! it as `tool -b <root>/nix:/nix <root>/<target> [args...]` with
//! `<root>/bin` prepended to `PATH`. The child inherits the standard streams.
//!
//! ## Cancellation
//!
//! The caller passes a [`CancellationToken`]. If it fires before the child is
//! spawned the run ends with [`ProcessOutcome::Cancelled`]. If it fires while
//! the child runs, the child gets SIGTERM and, after the configured grace
//! period, SIGKILL.
//!
//! ## Cleanup
//!
//! The ephemeral root is removed exactly once on every exit path unless
//! `PROOT_NO_CLEANUP` is set. Removal failures are logged and never replace
//! the run's result.

mod command;
mod error;
mod outcome;
mod supervise;
mod tool;
mod workspace;

pub use command::{
    BIND_FLAG, NIX_MOUNT_POINT, child_env, sandbox_args, sandbox_command, spawn_with_retry,
    validate_target,
};
pub use error::{CleanupError, LaunchError};
pub use outcome::{
    CANCELLED_EXIT_CODE, INTERNAL_EXIT_CODE, ProcessOutcome, SessionReport, USAGE_EXIT_CODE,
};
pub use supervise::supervise;
pub use tool::SandboxTool;
pub use workspace::EphemeralRoot;

use prootbox_common::SessionStateMachine;
use std::ffi::OsString;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::LauncherConfig;
use crate::extract::{ExtractionSummary, extract_rootfs};
use crate::payload::Payloads;

/// Positional command line: the target inside the rootfs and its arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    pub target: Option<OsString>,
    pub args: Vec<OsString>,
}

impl LaunchRequest {
    pub fn new(target: impl Into<OsString>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self {
            target: Some(target.into()),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Runs sandbox sessions from a fixed pair of payloads.
#[derive(Debug)]
pub struct Launcher {
    payloads: Arc<Payloads>,
    config: LauncherConfig,
    state: SessionStateMachine,
}

impl Launcher {
    pub fn new(payloads: Payloads, config: LauncherConfig) -> Self {
        Self {
            payloads: Arc::new(payloads),
            config,
            state: SessionStateMachine::new(),
        }
    }

    /// Handle on the session phase; clones observe the same session.
    pub fn state(&self) -> SessionStateMachine {
        self.state.clone()
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Run one session to completion.
    ///
    /// A child that exits nonzero or is killed by a signal is a successful
    /// run; its status is in [`SessionReport::outcome`].
    pub async fn run(
        self,
        request: LaunchRequest,
        cancel: CancellationToken,
    ) -> Result<SessionReport, LaunchError> {
        let state = self.state.clone();
        let result = self.run_session(request, cancel).await;

        if let Err(e) = state.transition_to_finished() {
            tracing::debug!("Session state: {}", e);
        }
        match &result {
            Ok(report) => tracing::debug!(outcome = %report.outcome, "Session finished"),
            Err(e) => tracing::debug!("Session failed: {}", e),
        }
        result
    }

    async fn run_session(
        self,
        request: LaunchRequest,
        cancel: CancellationToken,
    ) -> Result<SessionReport, LaunchError> {
        let target = validate_target(request.target.as_deref())?;
        let base = self.config.temp_base();

        let mut root = EphemeralRoot::create(&base, self.config.keep_root)?;
        let root_path = root.path().to_path_buf();
        if let Err(e) = self.state.transition_to_extracting(root_path.clone()) {
            tracing::debug!("Session state: {}", e);
        }

        if cancel.is_cancelled() {
            return Ok(self.cancelled(&mut root, None));
        }

        let extraction = self.extract(&root_path).await?;

        let tool = SandboxTool::materialize(self.payloads.sandbox_tool(), &base)?;
        if let Err(e) = self.state.transition_to_ready() {
            tracing::debug!("Session state: {}", e);
        }

        if cancel.is_cancelled() {
            drop(tool);
            return Ok(self.cancelled(&mut root, Some(extraction)));
        }

        let args = sandbox_args(&root_path, &target, &request.args);
        let env = child_env(&root_path, std::env::vars_os());
        let mut child = spawn_with_retry(&mut sandbox_command(tool.path(), &args, &env)).await?;

        let pid = child.id().unwrap_or_default();
        tracing::debug!(pid, target = %target.display(), "Sandbox started");
        if let Err(e) = self.state.transition_to_running(pid) {
            tracing::debug!("Session state: {}", e);
        }

        let status = supervise(&mut child, &cancel, self.config.grace_period, &self.state).await?;
        let outcome = ProcessOutcome::from_status(status);
        tracing::debug!(pid, %outcome, "Sandbox exited");

        drop(child);
        drop(tool);
        self.release(&mut root);

        Ok(SessionReport {
            outcome,
            root: root_path,
            root_kept: root.is_kept(),
            extraction: Some(extraction),
        })
    }

    async fn extract(&self, root: &std::path::Path) -> Result<ExtractionSummary, LaunchError> {
        let payloads = Arc::clone(&self.payloads);
        let dest = root.to_path_buf();
        let summary =
            tokio::task::spawn_blocking(move || extract_rootfs(payloads.rootfs_archive(), &dest))
                .await
                .map_err(|e| LaunchError::Task(format!("rootfs extraction panicked: {e}")))??;
        Ok(summary)
    }

    fn cancelled(&self, root: &mut EphemeralRoot, extraction: Option<ExtractionSummary>) -> SessionReport {
        tracing::info!("Interrupted before the sandbox started");
        self.release(root);
        SessionReport {
            outcome: ProcessOutcome::Cancelled,
            root: root.path().to_path_buf(),
            root_kept: root.is_kept(),
            extraction,
        }
    }

    fn release(&self, root: &mut EphemeralRoot) {
        if let Err(e) = root.release() {
            tracing::warn!("{}: {}", e, e.source);
        }
    }
}
