//! End-to-end sessions with a shell-script stand-in for the sandbox tool:
//! exit status mirroring, argument and PATH forwarding, interrupts and cleanup.

use prootbox::config::LauncherConfig;
use prootbox::launcher::{LaunchError, LaunchRequest, Launcher, ProcessOutcome};
use prootbox::test_utils::{RootfsArchiveBuilder, minimal_rootfs, script, test_payloads};
use prootbox::utils::logging::init_test_logging;
use prootbox_common::SessionPhase;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn config_in(base: &Path) -> LauncherConfig {
    LauncherConfig {
        temp_dir: Some(base.to_path_buf()),
        ..LauncherConfig::default()
    }
}

fn launcher(archive: &RootfsArchiveBuilder, config: LauncherConfig) -> Launcher {
    Launcher::new(test_payloads(archive.build().unwrap()), config)
}

fn entries_in(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}

async fn wait_for_file(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !path.exists() {
        assert!(Instant::now() < deadline, "{} never appeared", path.display());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_true_exits_zero_and_cleans_up() {
    init_test_logging();
    let base = TempDir::new().unwrap();
    let launcher = launcher(&minimal_rootfs(), config_in(base.path()));
    let state = launcher.state();

    let report = launcher
        .run(LaunchRequest::new("/bin/true", Vec::<String>::new()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, ProcessOutcome::Exited(0));
    assert_eq!(report.outcome.exit_code(), 0);
    assert!(!report.root_kept);
    assert!(!report.root.exists());
    assert!(entries_in(base.path()).is_empty(), "leftovers: {:?}", entries_in(base.path()));
    assert_eq!(state.current(), SessionPhase::Finished);

    let extraction = report.extraction.unwrap();
    assert_eq!(extraction.files, 2);
}

#[tokio::test]
async fn test_false_exit_status_is_mirrored() {
    let base = TempDir::new().unwrap();
    let report = launcher(&minimal_rootfs(), config_in(base.path()))
        .run(LaunchRequest::new("bin/false", Vec::<String>::new()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, ProcessOutcome::Exited(1));
    assert_eq!(report.outcome.exit_code(), 1);
    assert!(entries_in(base.path()).is_empty());
}

#[tokio::test]
async fn test_arguments_and_path_reach_the_target() {
    let base = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let out_file = out.path().join("seen");
    let body = format!(
        r#"printf '%s\n' "$@" > '{out}'
printf '%s\n' "$PATH" >> '{out}'"#,
        out = out_file.display()
    );
    let archive = minimal_rootfs().file("bin/report", 0o755, script(&body));

    let report = launcher(&archive, config_in(base.path()))
        .run(
            LaunchRequest::new("/bin/report", ["a b", "--flag", "", "-x"]),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(report.outcome, ProcessOutcome::Exited(0));

    let seen = fs::read_to_string(&out_file).unwrap();
    let lines: Vec<&str> = seen.lines().collect();
    assert_eq!(&lines[..4], ["a b", "--flag", "", "-x"]);
    let expected_prefix = format!("{}/bin", report.root.display());
    assert!(
        lines[4].starts_with(&expected_prefix),
        "PATH {:?} should start with {:?}",
        lines[4],
        expected_prefix
    );
}

#[tokio::test]
async fn test_interrupt_terminates_child_within_grace_period() {
    let base = TempDir::new().unwrap();
    let archive = minimal_rootfs().file("bin/wait", 0o755, script("exec sleep 30"));
    let launcher = launcher(&archive, config_in(base.path()));
    let state = launcher.state();
    let cancel = CancellationToken::new();

    let started = Instant::now();
    let session = tokio::spawn(
        launcher.run(LaunchRequest::new("bin/wait", Vec::<String>::new()), cancel.clone()),
    );

    tokio::time::timeout(Duration::from_secs(10), state.wait_for_running())
        .await
        .expect("child should start")
        .unwrap();
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(10), session)
        .await
        .expect("session should end after interrupt")
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome, ProcessOutcome::Signaled(libc::SIGTERM));
    assert_eq!(report.outcome.exit_code(), 143);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!report.root.exists());
    assert!(entries_in(base.path()).is_empty());
}

#[tokio::test]
async fn test_child_ignoring_sigterm_is_killed_after_grace_period() {
    let base = TempDir::new().unwrap();
    let marker_dir = TempDir::new().unwrap();
    let ready = marker_dir.path().join("ready");
    let body = format!(
        "trap '' TERM\ntouch '{}'\nwhile :; do sleep 1; done",
        ready.display()
    );
    let archive = minimal_rootfs().file("bin/stubborn", 0o755, script(&body));

    let config = LauncherConfig {
        grace_period: Duration::from_millis(300),
        ..config_in(base.path())
    };
    let launcher = launcher(&archive, config);
    let cancel = CancellationToken::new();
    let session = tokio::spawn(
        launcher.run(LaunchRequest::new("bin/stubborn", Vec::<String>::new()), cancel.clone()),
    );

    wait_for_file(&ready).await;
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(10), session)
        .await
        .expect("session should end after forced kill")
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome, ProcessOutcome::Signaled(libc::SIGKILL));
    assert_eq!(report.outcome.exit_code(), 137);
    assert!(!report.root.exists());
}

#[tokio::test]
async fn test_keep_root_leaves_populated_directory() {
    let base = TempDir::new().unwrap();
    let config = LauncherConfig {
        keep_root: true,
        ..config_in(base.path())
    };

    let report = launcher(&minimal_rootfs(), config)
        .run(LaunchRequest::new("bin/true", Vec::<String>::new()), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.root_kept);
    assert!(report.root.join("bin/true").is_file());
    assert!(report.root.join("nix/store").is_dir());
    // Only the root is left behind, not the sandbox tool copy.
    assert_eq!(entries_in(base.path()), vec![report.root.clone()]);
}

#[tokio::test]
async fn test_root_entry_does_not_widen_root_permissions() {
    let base = TempDir::new().unwrap();
    let config = LauncherConfig {
        keep_root: true,
        ..config_in(base.path())
    };
    let archive = RootfsArchiveBuilder::new()
        .dir("./", 0o755)
        .dir("bin/", 0o755)
        .file("bin/true", 0o755, script("exit 0"));

    let report = launcher(&archive, config)
        .run(LaunchRequest::new("bin/true", Vec::<String>::new()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, ProcessOutcome::Exited(0));
    let mode = fs::metadata(&report.root).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o700);
}

#[tokio::test]
async fn test_cancel_before_spawn_skips_the_child() {
    let base = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let marker = out.path().join("ran");
    let archive = minimal_rootfs().file(
        "bin/mark",
        0o755,
        script(&format!("touch '{}'", marker.display())),
    );
    let launcher = launcher(&archive, config_in(base.path()));
    let state = launcher.state();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = launcher
        .run(LaunchRequest::new("bin/mark", Vec::<String>::new()), cancel)
        .await
        .unwrap();

    assert_eq!(report.outcome, ProcessOutcome::Cancelled);
    assert_eq!(report.outcome.exit_code(), 130);
    assert!(!marker.exists());
    assert!(entries_in(base.path()).is_empty());
    assert_eq!(state.current(), SessionPhase::Finished);
}

#[tokio::test]
async fn test_missing_target_allocates_nothing() {
    let base = TempDir::new().unwrap();
    let launcher = launcher(&minimal_rootfs(), config_in(base.path()));
    let state = launcher.state();

    let err = launcher
        .run(LaunchRequest::default(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_usage(), "got {err}");
    assert!(entries_in(base.path()).is_empty());
    assert_eq!(state.current(), SessionPhase::Finished);
}

#[tokio::test]
async fn test_escaping_target_is_a_usage_error() {
    let base = TempDir::new().unwrap();
    let err = launcher(&minimal_rootfs(), config_in(base.path()))
        .run(LaunchRequest::new("../../bin/sh", Vec::<String>::new()), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_usage(), "got {err}");
    assert!(entries_in(base.path()).is_empty());
}

#[tokio::test]
async fn test_extraction_failure_removes_root() {
    let base = TempDir::new().unwrap();
    let archive = minimal_rootfs().file("../../outside", 0o644, "x");

    let err = launcher(&archive, config_in(base.path()))
        .run(LaunchRequest::new("bin/true", Vec::<String>::new()), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LaunchError::Archive(_)), "got {err}");
    assert!(err.is_containment_violation());
    assert!(entries_in(base.path()).is_empty());
}

#[tokio::test]
async fn test_missing_layer_is_fatal() {
    let base = TempDir::new().unwrap();
    let payloads = test_payloads(minimal_rootfs().build_without_layer().unwrap());

    let err = Launcher::new(payloads, config_in(base.path()))
        .run(LaunchRequest::new("bin/true", Vec::<String>::new()), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LaunchError::Archive(_)), "got {err}");
    assert!(!err.is_containment_violation());
    assert!(entries_in(base.path()).is_empty());
}

#[tokio::test]
async fn test_missing_target_inside_rootfs_is_reported_by_the_child() {
    let base = TempDir::new().unwrap();
    let report = launcher(&minimal_rootfs(), config_in(base.path()))
        .run(LaunchRequest::new("bin/nope", Vec::<String>::new()), CancellationToken::new())
        .await
        .unwrap();

    assert!(
        matches!(report.outcome, ProcessOutcome::Exited(code) if code != 0),
        "got {}",
        report.outcome
    );
    assert!(entries_in(base.path()).is_empty());
}
