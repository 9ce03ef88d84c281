//! Observable lifecycle of a single sandbox session.
//!
//! One launcher invocation moves through a fixed, forward-only sequence of
//! phases. The current phase lives in a `tokio::sync::watch` channel so that
//! other tasks (the interrupt forwarder, tests, diagnostics) can wait for a
//! phase without polling.
//!
//! # Example
//!
//! ```rust,ignore
//! use prootbox_common::session_state::{SessionPhase, SessionStateMachine};
//! use std::path::PathBuf;
//!
//! let sm = SessionStateMachine::new();
//! sm.transition_to_extracting(PathBuf::from("/tmp/rootfs1234")).unwrap();
//! sm.transition_to_ready().unwrap();
//! sm.transition_to_running(4242).unwrap();
//!
//! let pid = sm.wait_for_running().await.unwrap();
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Session lifecycle phases, in the only order they may occur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// Arguments validated, no resources allocated yet
    Preparing,

    /// Ephemeral root allocated, rootfs being unpacked into it
    Extracting { root: PathBuf },

    /// Rootfs populated, sandbox tool materialized, child not yet spawned
    Ready { root: PathBuf },

    /// Child process is running
    Running { root: PathBuf, pid: u32 },

    /// Graceful termination requested, grace timer armed
    Terminating { root: PathBuf, pid: u32 },

    /// Session over (child reaped or run aborted)
    Finished,
}

impl SessionPhase {
    /// Returns true once the session can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Finished)
    }

    /// Returns the ephemeral root while one is attached to the session
    pub fn root(&self) -> Option<&Path> {
        match self {
            SessionPhase::Extracting { root }
            | SessionPhase::Ready { root }
            | SessionPhase::Running { root, .. }
            | SessionPhase::Terminating { root, .. } => Some(root),
            SessionPhase::Preparing | SessionPhase::Finished => None,
        }
    }

    /// Returns the child pid while a child is attached to the session
    pub fn pid(&self) -> Option<u32> {
        match self {
            SessionPhase::Running { pid, .. } | SessionPhase::Terminating { pid, .. } => Some(*pid),
            _ => None,
        }
    }
}

/// Single source of truth for the phase of one session.
///
/// Cloning shares the underlying channel; every clone observes the same phase.
#[derive(Clone)]
pub struct SessionStateMachine {
    sender: Arc<watch::Sender<SessionPhase>>,
    // Keep a receiver to ensure the channel stays alive
    _receiver: watch::Receiver<SessionPhase>,
}

impl std::fmt::Debug for SessionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStateMachine")
            .field("phase", &*self.sender.borrow())
            .finish()
    }
}

impl SessionStateMachine {
    /// Create a new state machine in the Preparing phase
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(SessionPhase::Preparing);
        Self {
            sender: Arc::new(sender),
            _receiver: receiver,
        }
    }

    /// Get the current phase without blocking
    pub fn current(&self) -> SessionPhase {
        self.sender.borrow().clone()
    }

    /// Subscribe to phase changes
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.sender.subscribe()
    }

    /// Preparing -> Extracting
    pub fn transition_to_extracting(&self, root: PathBuf) -> Result<(), &'static str> {
        self.transition(
            |phase| matches!(phase, SessionPhase::Preparing).then(|| SessionPhase::Extracting { root }),
            "Can only transition to Extracting from Preparing",
        )
    }

    /// Extracting -> Ready
    pub fn transition_to_ready(&self) -> Result<(), &'static str> {
        self.transition(
            |phase| match phase {
                SessionPhase::Extracting { root } => Some(SessionPhase::Ready { root: root.clone() }),
                _ => None,
            },
            "Can only transition to Ready from Extracting",
        )
    }

    /// Ready -> Running
    pub fn transition_to_running(&self, pid: u32) -> Result<(), &'static str> {
        self.transition(
            |phase| match phase {
                SessionPhase::Ready { root } => Some(SessionPhase::Running {
                    root: root.clone(),
                    pid,
                }),
                _ => None,
            },
            "Can only transition to Running from Ready",
        )
    }

    /// Running -> Terminating
    pub fn transition_to_terminating(&self) -> Result<(), &'static str> {
        self.transition(
            |phase| match phase {
                SessionPhase::Running { root, pid } => Some(SessionPhase::Terminating {
                    root: root.clone(),
                    pid: *pid,
                }),
                _ => None,
            },
            "Can only transition to Terminating from Running",
        )
    }

    /// Any non-terminal phase -> Finished
    pub fn transition_to_finished(&self) -> Result<(), &'static str> {
        self.transition(
            |phase| (!phase.is_terminal()).then_some(SessionPhase::Finished),
            "Cannot transition from terminal state",
        )
    }

    /// Wait until a child is running - NO POLLING, uses watch channel.
    /// Returns the pid, or an error if the session finished without a child.
    pub async fn wait_for_running(&self) -> Result<u32, String> {
        let mut rx = self.sender.subscribe();
        loop {
            {
                let phase = rx.borrow_and_update();
                match &*phase {
                    SessionPhase::Running { pid, .. } | SessionPhase::Terminating { pid, .. } => {
                        return Ok(*pid);
                    }
                    SessionPhase::Finished => {
                        return Err("Session finished before the child started".to_string());
                    }
                    _ => {}
                }
            }
            if rx.changed().await.is_err() {
                return Err("State machine dropped".to_string());
            }
        }
    }

    fn transition(
        &self,
        next: impl FnOnce(&SessionPhase) -> Option<SessionPhase>,
        error: &'static str,
    ) -> Result<(), &'static str> {
        let mut transitioned = false;
        self.sender.send_if_modified(|phase| match next(phase) {
            Some(new_phase) => {
                *phase = new_phase;
                transitioned = true;
                true
            }
            None => false,
        });
        if transitioned { Ok(()) } else { Err(error) }
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
