use std::path::PathBuf;

/// Errors raised while unpacking the rootfs archive.
///
/// Any of these leaves the destination in an unspecified, partially written
/// state; callers must discard it.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Failed to read rootfs archive stream")]
    Read(#[source] std::io::Error),

    #[error("Malformed rootfs archive: no regular entry named '*/layer.tar' found")]
    LayerNotFound,

    #[error("Extraction destination '{0:?}' does not exist or is not a directory")]
    DestinationMissing(PathBuf),

    #[error("Archive entry '{entry}' resolves to '{resolved:?}', outside of '{root:?}'")]
    PathEscape {
        entry: String,
        resolved: PathBuf,
        root: PathBuf,
    },

    #[error(
        "Symbolic link '{entry}' -> '{link}' resolves to '{resolved:?}', outside of '{root:?}'"
    )]
    LinkEscape {
        entry: String,
        link: String,
        resolved: PathBuf,
        root: PathBuf,
    },

    #[error(
        "Archive entry '{entry}' follows symbolic links on disk to '{resolved:?}', outside of '{root:?}'"
    )]
    SymlinkTraversal {
        entry: String,
        resolved: PathBuf,
        root: PathBuf,
    },

    #[error("Symbolic link '{0}' has no link target")]
    MissingLinkTarget(String),

    #[error("Unsupported archive entry type {kind} for '{entry}'")]
    UnsupportedEntry { entry: String, kind: String },

    #[error("Failed to write '{path:?}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    /// True for errors caused by an entry trying to reach outside the
    /// destination. These are security events, not ordinary corruption.
    pub fn is_containment_violation(&self) -> bool {
        matches!(
            self,
            ArchiveError::PathEscape { .. }
                | ArchiveError::LinkEscape { .. }
                | ArchiveError::SymlinkTraversal { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ArchiveError::Io { path, source }
    }
}
