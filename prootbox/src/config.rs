//! # Launcher Configuration
//!
//! `prootbox` takes no flags beyond its positional arguments; everything else
//! comes from the environment. [`LauncherConfig::from_env`] reads it once at
//! startup, and [`LauncherConfig::from_lookup`] lets tests supply their own
//! variables without touching the process environment.
//!
//! | Variable                      | Effect                                         |
//! |-------------------------------|------------------------------------------------|
//! | `PROOT_NO_CLEANUP`            | Keep the ephemeral root after the run          |
//! | `PROOTBOX_GRACE_PERIOD_SECS`  | Seconds between SIGTERM and SIGKILL on cancel  |
//! | `PROOTBOX_TMPDIR`             | Parent directory for the ephemeral root        |

use std::path::PathBuf;
use std::time::Duration;

/// Debug override: leave the ephemeral root in place after the run.
pub const NO_CLEANUP_ENV: &str = "PROOT_NO_CLEANUP";

/// Grace period override, in whole seconds.
pub const GRACE_PERIOD_ENV: &str = "PROOTBOX_GRACE_PERIOD_SECS";

/// Parent directory for the ephemeral root and the materialized sandbox tool.
pub const TEMP_DIR_ENV: &str = "PROOTBOX_TMPDIR";

/// Time a cancelled child gets to exit after SIGTERM before it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Name prefix of the ephemeral root directory.
pub const ROOT_PREFIX: &str = "rootfs";

/// Settings for one launcher invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherConfig {
    /// Time between the graceful termination request and the forced kill
    pub grace_period: Duration,
    /// Keep the ephemeral root instead of removing it (debug aid)
    pub keep_root: bool,
    /// Where to allocate temporary files; `None` means the system default
    pub temp_dir: Option<PathBuf>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            keep_root: false,
            temp_dir: None,
        }
    }
}

impl LauncherConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// Unparseable values fall back to the defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        config.keep_root = lookup(NO_CLEANUP_ENV).is_some_and(|v| flag_enabled(&v));

        if let Some(raw) = lookup(GRACE_PERIOD_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => config.grace_period = Duration::from_secs(secs),
                Err(e) => tracing::warn!(
                    "Ignoring {}={:?} ({}); using {}s",
                    GRACE_PERIOD_ENV,
                    raw,
                    e,
                    DEFAULT_GRACE_PERIOD.as_secs()
                ),
            }
        }

        config.temp_dir = lookup(TEMP_DIR_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        config
    }

    /// Directory the ephemeral root and tool executable are created in.
    pub fn temp_base(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Interpret an environment flag value: `1`, `true`, `yes` and `on` enable it.
pub fn flag_enabled(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }

    matches!(
        trimmed.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Read a flag from the process environment.
pub fn env_flag_enabled(name: &str) -> bool {
    std::env::var(name).is_ok_and(|value| flag_enabled(&value))
}
