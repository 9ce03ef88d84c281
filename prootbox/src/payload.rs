//! # Payloads
//!
//! The two opaque inputs a launcher needs: the gzip-compressed rootfs archive
//! and the sandbox tool executable. They are handed to [`crate::Launcher`] at
//! construction time so tests can substitute small synthetic ones.
//!
//! Release builds bake both into the binary with the `embedded` feature; the
//! source files are named by `PROOTBOX_ROOTFS_ARCHIVE` and
//! `PROOTBOX_SANDBOX_TOOL` at compile time. Without the feature the same
//! variables name files that are read at startup.

use std::borrow::Cow;
use std::path::Path;

/// Environment variable naming the rootfs archive.
pub const ROOTFS_ARCHIVE_ENV: &str = "PROOTBOX_ROOTFS_ARCHIVE";

/// Environment variable naming the sandbox tool binary.
pub const SANDBOX_TOOL_ENV: &str = "PROOTBOX_SANDBOX_TOOL";

/// Immutable launcher inputs.
#[derive(Clone)]
pub struct Payloads {
    rootfs_archive: Cow<'static, [u8]>,
    sandbox_tool: Cow<'static, [u8]>,
}

impl std::fmt::Debug for Payloads {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payloads")
            .field("rootfs_archive_bytes", &self.rootfs_archive.len())
            .field("sandbox_tool_bytes", &self.sandbox_tool.len())
            .finish()
    }
}

impl Payloads {
    pub fn new(
        rootfs_archive: impl Into<Cow<'static, [u8]>>,
        sandbox_tool: impl Into<Cow<'static, [u8]>>,
    ) -> Self {
        Self {
            rootfs_archive: rootfs_archive.into(),
            sandbox_tool: sandbox_tool.into(),
        }
    }

    /// Read both payloads from disk.
    pub fn from_files(rootfs_archive: &Path, sandbox_tool: &Path) -> std::io::Result<Self> {
        Ok(Self::new(
            std::fs::read(rootfs_archive)?,
            std::fs::read(sandbox_tool)?,
        ))
    }

    /// Payloads compiled into the binary.
    #[cfg(feature = "embedded")]
    pub fn embedded() -> Self {
        Self::new(
            &include_bytes!(env!("PROOTBOX_ROOTFS_ARCHIVE"))[..],
            &include_bytes!(env!("PROOTBOX_SANDBOX_TOOL"))[..],
        )
    }

    pub fn rootfs_archive(&self) -> &[u8] {
        &self.rootfs_archive
    }

    pub fn sandbox_tool(&self) -> &[u8] {
        &self.sandbox_tool
    }
}
