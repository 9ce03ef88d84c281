use prootbox_common::SessionStateMachine;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use super::error::LaunchError;

/// Wait for `child` to exit, or terminate it once `cancel` fires.
///
/// Termination sends SIGTERM, waits up to `grace` for the child to exit and
/// then kills it. The child is always reaped before this returns.
pub async fn supervise(
    child: &mut Child,
    cancel: &CancellationToken,
    grace: Duration,
    state: &SessionStateMachine,
) -> Result<ExitStatus, LaunchError> {
    tokio::select! {
        biased;

        status = child.wait() => status.map_err(LaunchError::Wait),
        _ = cancel.cancelled() => terminate(child, grace, state).await,
    }
}

async fn terminate(
    child: &mut Child,
    grace: Duration,
    state: &SessionStateMachine,
) -> Result<ExitStatus, LaunchError> {
    // Already exited between the interrupt and now.
    if let Some(status) = child.try_wait().map_err(LaunchError::Wait)? {
        return Ok(status);
    }

    if let Err(e) = state.transition_to_terminating() {
        tracing::debug!("Session state: {}", e);
    }

    if let Some(pid) = child.id() {
        tracing::info!(pid, grace_secs = grace.as_secs_f64(), "Interrupt received; sending SIGTERM to sandbox");
        // SAFETY: plain syscall on a pid we still own (not yet reaped).
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            tracing::debug!(
                pid,
                "SIGTERM delivery failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.map_err(LaunchError::Wait),
        Err(_) => {
            tracing::warn!(
                "Sandbox did not exit within {:?} of SIGTERM; killing it",
                grace
            );
            child.kill().await.map_err(LaunchError::Wait)?;
            child.wait().await.map_err(LaunchError::Wait)
        }
    }
}
