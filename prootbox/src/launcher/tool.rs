use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempPath;

use super::error::LaunchError;

const TOOL_PREFIX: &str = "proot-";

/// The sandbox tool written out as a private executable.
///
/// Each run gets its own randomly named copy, so concurrent runs never share
/// a path. The file is deleted when this is dropped.
#[derive(Debug)]
pub struct SandboxTool {
    path: TempPath,
}

impl SandboxTool {
    /// Write `bytes` to a fresh owner-only executable under `base`.
    pub fn materialize(bytes: &[u8], base: &Path) -> Result<Self, LaunchError> {
        let mut file = tempfile::Builder::new()
            .prefix(TOOL_PREFIX)
            .tempfile_in(base)
            .map_err(LaunchError::spawn("create sandbox tool file"))?;

        file.write_all(bytes)
            .and_then(|()| file.flush())
            .map_err(LaunchError::spawn("write sandbox tool"))?;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o700))
            .map_err(LaunchError::spawn("make sandbox tool executable"))?;

        // Closing the write handle here keeps exec from failing with ETXTBSY.
        let path = file.into_temp_path();
        tracing::debug!(tool = %path.display(), bytes = bytes.len(), "Materialized sandbox tool");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
