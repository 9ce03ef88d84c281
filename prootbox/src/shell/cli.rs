//! # prootbox CLI
//!
//! Command-line definition and the process-level entry point.

use super::signals::forward_interrupts;

use crate::config::{LauncherConfig, env_flag_enabled};
use crate::launcher::{
    INTERNAL_EXIT_CODE, LaunchError, LaunchRequest, Launcher, USAGE_EXIT_CODE, validate_target,
};
use crate::payload::Payloads;
use crate::utils::logging::init_logging;
use anyhow::Result;
use clap::{CommandFactory, Parser};
use prootbox_common::SessionStateMachine;
use std::ffi::OsString;
use std::process::ExitCode;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Debug-level logging instead of warnings only.
pub const DEBUG_ENV: &str = "PROOTBOX_DEBUG";

/// Log to a daily rolling file in the user cache directory instead of stderr.
pub const LOG_TO_FILE_ENV: &str = "PROOTBOX_LOG_TO_FILE";

/// prootbox: run a program from a bundled root filesystem without privileges.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about,
    disable_help_flag = true,
    disable_version_flag = true,
    long_about = "Unpacks the bundled rootfs into a private temporary directory and runs
TARGET from it under proot, with <rootfs>/nix bound to /nix and <rootfs>/bin
prepended to PATH. All remaining arguments are passed to TARGET unchanged.

The exit status mirrors TARGET's (128+N if it was killed by signal N).

Environment:
  PROOT_NO_CLEANUP=1             keep the temporary rootfs after the run
  PROOTBOX_GRACE_PERIOD_SECS=N   seconds between SIGTERM and SIGKILL on interrupt
  PROOTBOX_TMPDIR=DIR            where to create the temporary rootfs
  PROOTBOX_DEBUG=1               debug logging
  PROOTBOX_LOG_TO_FILE=1         log to a file instead of stderr"
)]
pub struct Cli {
    /// Program inside the rootfs, followed by its arguments
    #[arg(
        value_name = "TARGET [ARGS]",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<OsString>,
}

impl Cli {
    pub fn into_request(self) -> LaunchRequest {
        let mut command = self.command.into_iter();
        LaunchRequest {
            target: command.next(),
            args: command.collect(),
        }
    }
}

/// Parse the command line, run one session and return the status to exit with.
pub async fn run() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(USAGE_EXIT_CODE);
        }
    };

    let log_level = if env_flag_enabled(DEBUG_ENV) {
        "debug"
    } else {
        "warn"
    };
    init_logging(log_level, env_flag_enabled(LOG_TO_FILE_ENV));

    let request = cli.into_request();
    // Usage problems are reported before any payload is touched.
    if let Err(e) = validate_target(request.target.as_deref()) {
        return report_failure(e);
    }

    let payloads = match load_payloads() {
        Ok(payloads) => payloads,
        Err(e) => {
            tracing::error!("Failed to load payloads: {:#}", e);
            eprintln!("prootbox fatal error: {:#}", e);
            return ExitCode::from(INTERNAL_EXIT_CODE);
        }
    };

    tracing::debug!(?payloads, "Payloads loaded");
    let launcher = Launcher::new(payloads, LauncherConfig::from_env());
    tracing::debug!(config = ?launcher.config(), "Starting sandbox session");

    let cancel = CancellationToken::new();
    let interrupts = forward_interrupts(cancel.clone());
    let phases = trace_phases(&launcher.state());
    let result = launcher.run(request, cancel).await;
    interrupts.abort();
    // The session always ends in Finished, which stops the tracer.
    let _ = phases.await;

    match result {
        Ok(report) => {
            if report.outcome.success() {
                tracing::debug!(root = %report.root.display(), "Session complete");
            } else {
                tracing::info!(
                    outcome = %report.outcome,
                    root = %report.root.display(),
                    root_kept = report.root_kept,
                    "Sandboxed program did not succeed"
                );
            }
            ExitCode::from(report.outcome.exit_code())
        }
        Err(e) => report_failure(e),
    }
}

/// Log every phase the session enters, up to and including `Finished`.
fn trace_phases(state: &SessionStateMachine) -> JoinHandle<()> {
    let mut phases = state.subscribe();
    tokio::spawn(async move {
        loop {
            let phase = phases.borrow_and_update().clone();
            tracing::debug!(?phase, "Session phase changed");
            if phase.is_terminal() || phases.changed().await.is_err() {
                break;
            }
        }
    })
}

fn report_failure(error: LaunchError) -> ExitCode {
    if error.is_usage() {
        eprintln!("prootbox: {}", error);
        eprintln!("{}", Cli::command().render_usage());
        return ExitCode::from(USAGE_EXIT_CODE);
    }

    if error.is_containment_violation() {
        tracing::error!(security = true, "Rejected rootfs archive: {}", error);
    } else {
        tracing::error!("Sandbox session failed: {}", error);
    }
    eprintln!("prootbox fatal error: {:#}", anyhow::Error::from(error));
    ExitCode::from(INTERNAL_EXIT_CODE)
}

#[cfg(feature = "embedded")]
fn load_payloads() -> Result<Payloads> {
    Ok(Payloads::embedded())
}

#[cfg(not(feature = "embedded"))]
fn load_payloads() -> Result<Payloads> {
    use crate::payload::{ROOTFS_ARCHIVE_ENV, SANDBOX_TOOL_ENV};
    use anyhow::Context;

    let archive = payload_path(ROOTFS_ARCHIVE_ENV)?;
    let tool = payload_path(SANDBOX_TOOL_ENV)?;
    Payloads::from_files(&archive, &tool).with_context(|| {
        format!(
            "Failed to read payloads '{}' and '{}'",
            archive.display(),
            tool.display()
        )
    })
}

#[cfg(not(feature = "embedded"))]
fn payload_path(var: &str) -> Result<std::path::PathBuf> {
    use anyhow::Context;

    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(std::path::PathBuf::from)
        .with_context(|| format!("{var} is not set and this build has no embedded payloads"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> LaunchRequest {
        Cli::try_parse_from(args).unwrap().into_request()
    }

    #[test]
    fn test_target_and_arguments_are_split() {
        let request = parse(&["prootbox", "/bin/echo", "hello", "world"]);
        assert_eq!(request.target, Some(OsString::from("/bin/echo")));
        assert_eq!(request.args, vec![OsString::from("hello"), OsString::from("world")]);
    }

    #[test]
    fn test_flags_are_forwarded_verbatim() {
        let request = parse(&["prootbox", "bin/ls", "-la", "--color=never", "--", "--help"]);
        assert_eq!(request.target, Some(OsString::from("bin/ls")));
        assert_eq!(
            request.args,
            ["-la", "--color=never", "--", "--help"]
                .iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_help_goes_to_the_target() {
        let request = parse(&["prootbox", "bin/tool", "--version"]);
        assert_eq!(request.args, vec![OsString::from("--version")]);
    }

    #[test]
    fn test_no_arguments_has_no_target() {
        let request = parse(&["prootbox"]);
        assert_eq!(request.target, None);
        assert!(request.args.is_empty());
    }

    #[test]
    fn test_usage_failure_exit_code() {
        let code = report_failure(LaunchError::Usage("missing <target> argument".into()));
        assert_eq!(code, ExitCode::from(USAGE_EXIT_CODE));
    }

    #[test]
    fn test_internal_failure_exit_code() {
        let code = report_failure(LaunchError::Task("boom".into()));
        assert_eq!(code, ExitCode::from(INTERNAL_EXIT_CODE));
    }

    #[tokio::test]
    async fn test_phase_tracer_stops_when_session_finishes() {
        let state = SessionStateMachine::new();
        let tracer = trace_phases(&state);

        state.transition_to_extracting("/tmp/rootfs-x".into()).unwrap();
        state.transition_to_finished().unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), tracer)
            .await
            .expect("tracer exits once the session is finished")
            .unwrap();
    }
}
