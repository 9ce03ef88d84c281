use std::ffi::{OsStr, OsString};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

use super::error::LaunchError;

/// Sandbox tool flag that bind-mounts `<host>:<guest>`.
pub const BIND_FLAG: &str = "-b";

/// Where the rootfs's `nix` directory is mounted inside the sandbox.
pub const NIX_MOUNT_POINT: &str = "/nix";

const SPAWN_ATTEMPTS: u32 = 5;
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Check the target argument before anything is allocated.
///
/// The target is interpreted relative to the ephemeral root. A leading `/` is
/// tolerated; `..` components that would climb out of the root are not.
pub fn validate_target(target: Option<&OsStr>) -> Result<PathBuf, LaunchError> {
    let target = target
        .filter(|t| !t.is_empty())
        .ok_or_else(|| LaunchError::Usage("missing <target> argument".to_string()))?;

    let mut relative = PathBuf::new();
    for component in Path::new(target).components() {
        match component {
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(LaunchError::Usage(format!(
                        "target {:?} escapes the root filesystem",
                        target
                    )));
                }
            }
            Component::Normal(part) => relative.push(part),
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(LaunchError::Usage(format!(
            "target {:?} does not name a program",
            target
        )));
    }
    Ok(relative)
}

/// Argument vector for the sandbox tool:
/// `-b <root>/nix:/nix <root>/<target> [args...]`.
pub fn sandbox_args(root: &Path, target: &Path, passthrough: &[OsString]) -> Vec<OsString> {
    let mut bind = root.join("nix").into_os_string();
    bind.push(":");
    bind.push(NIX_MOUNT_POINT);

    let mut args = Vec::with_capacity(passthrough.len() + 3);
    args.push(OsString::from(BIND_FLAG));
    args.push(bind);
    args.push(root.join(target).into_os_string());
    args.extend(passthrough.iter().cloned());
    args
}

/// The child's environment: the parent's, with `<root>/bin` prepended to `PATH`.
///
/// A missing `PATH` becomes exactly `<root>/bin`. All other variables pass
/// through unchanged and in order.
pub fn child_env(
    root: &Path,
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> Vec<(OsString, OsString)> {
    let root_bin = root.join("bin").into_os_string();
    let mut saw_path = false;

    let mut env: Vec<(OsString, OsString)> = vars
        .into_iter()
        .map(|(key, value)| {
            if key == "PATH" && !saw_path {
                saw_path = true;
                let mut joined = root_bin.clone();
                joined.push(":");
                joined.push(&value);
                (key, joined)
            } else {
                (key, value)
            }
        })
        .collect();

    if !saw_path {
        env.push((OsString::from("PATH"), root_bin));
    }
    env
}

/// Build the tokio command for the sandbox tool.
///
/// Standard streams are inherited. The child is killed if the handle is
/// dropped, and (on Linux) if this process dies first.
pub fn sandbox_command(tool: &Path, args: &[OsString], env: &[(OsString, OsString)]) -> Command {
    let mut cmd = Command::new(tool);
    cmd.args(args)
        .env_clear()
        .envs(env.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str())))
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    kill_with_parent(&mut cmd);
    cmd
}

/// The signal fires when the forking thread exits, not the process. The
/// binary spawns from the main thread, which `#[tokio::main]` blocks on.
#[cfg(target_os = "linux")]
fn kill_with_parent(cmd: &mut Command) {
    let parent = std::process::id();
    // SAFETY: the closure runs between fork and exec and only calls the
    // async-signal-safe prctl and getppid.
    unsafe {
        cmd.pre_exec(move || {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL, 0, 0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            // The parent may have died before the prctl took effect.
            if libc::getppid() as u32 != parent {
                return Err(std::io::Error::from_raw_os_error(libc::ESRCH));
            }
            Ok(())
        });
    }
}

#[cfg(not(target_os = "linux"))]
fn kill_with_parent(_cmd: &mut Command) {}

/// Spawn `cmd`, retrying briefly while the freshly written tool is still
/// held open for writing by a concurrently forked process (`ETXTBSY`).
pub async fn spawn_with_retry(cmd: &mut Command) -> Result<Child, LaunchError> {
    let mut attempt = 1;
    loop {
        match cmd.spawn() {
            Ok(child) => return Ok(child),
            Err(e) if e.raw_os_error() == Some(libc::ETXTBSY) && attempt < SPAWN_ATTEMPTS => {
                tracing::debug!(attempt, "Sandbox tool busy, retrying spawn");
                attempt += 1;
                tokio::time::sleep(SPAWN_RETRY_DELAY).await;
            }
            Err(e) => return Err(LaunchError::spawn("spawn sandbox tool")(e)),
        }
    }
}
