//! # Rootfs Archive Extraction
//!
//! Unpacks the root filesystem of a container image export into a directory.
//!
//! The input is a gzip-compressed tar stream (the "outer" archive, as written
//! by `docker save` and friends). Somewhere inside it is a regular entry named
//! `<digest>/layer.tar`; that entry is itself a tar stream holding the rootfs.
//! Only the first such layer is unpacked.
//!
//! ## Containment
//!
//! Entry names are normalized lexically against the destination, then their
//! parent directory is resolved through the symlinks earlier entries created.
//! Symlink targets are resolved the same way, with the destination standing in
//! for `/`. Whatever leaves the destination aborts extraction with
//! [`ArchiveError::PathEscape`], [`ArchiveError::SymlinkTraversal`] or
//! [`ArchiveError::LinkEscape`]. Files are written at the resolved location, so
//! no symlink is ever followed by the write itself.
//! Nothing is rolled back; callers discard the destination on any error.
//!
//! ## Supported entries
//!
//! Directories, regular files and symbolic links. Global PAX headers are
//! skipped. Everything else (hard links, devices, FIFOs) is rejected.

mod containment;
mod error;

pub use containment::{
    MAX_SYMLINK_HOPS, Resolved, is_contained, join_under, normalize_path_lexically,
    resolve_in_root,
};
pub use error::ArchiveError;

use flate2::read::GzDecoder;
use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io::{self, Read};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt, symlink};
use std::path::{Path, PathBuf};
use tar::{Archive, Entry, EntryType};

/// Name suffix identifying the nested rootfs layer in the outer archive.
pub const LAYER_SUFFIX: &str = "/layer.tar";

/// Mode for parent directories the archive did not declare itself.
const IMPLICIT_DIR_MODE: u32 = 0o755;

const PERMISSION_BITS: u32 = 0o7777;

/// What a successful extraction wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    /// Name of the outer entry the rootfs was read from
    pub layer: String,
    pub directories: usize,
    pub files: usize,
    pub symlinks: usize,
}

/// Unpack the first `*/layer.tar` of a gzip-compressed outer archive into `dest`.
///
/// `dest` must already exist. Nothing is written when the layer is missing.
pub fn extract_rootfs(archive: &[u8], dest: &Path) -> Result<ExtractionSummary, ArchiveError> {
    if !dest.is_dir() {
        return Err(ArchiveError::DestinationMissing(dest.to_path_buf()));
    }

    let mut outer = Archive::new(GzDecoder::new(archive));
    for entry in outer.entries().map_err(ArchiveError::Read)? {
        let entry = entry.map_err(ArchiveError::Read)?;
        if !is_layer(&entry) {
            continue;
        }

        let layer = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        tracing::debug!(%layer, dest = %dest.display(), "Unpacking rootfs layer");

        let mut extractor = LayerExtractor::new(dest, layer);
        return extractor.extract(Archive::new(entry));
    }

    Err(ArchiveError::LayerNotFound)
}

fn is_layer<R: Read>(entry: &Entry<'_, R>) -> bool {
    entry.header().entry_type().is_file()
        && entry.path_bytes().ends_with(LAYER_SUFFIX.as_bytes())
}

struct LayerExtractor {
    root: PathBuf,
    /// Declared directory modes, applied once all entries are written so that
    /// read-only directories can still be populated.
    deferred_dir_modes: Vec<(PathBuf, u32)>,
    summary: ExtractionSummary,
}

impl LayerExtractor {
    fn new(dest: &Path, layer: String) -> Self {
        Self {
            root: normalize_path_lexically(dest),
            deferred_dir_modes: Vec::new(),
            summary: ExtractionSummary {
                layer,
                ..ExtractionSummary::default()
            },
        }
    }

    fn extract<R: Read>(&mut self, mut layer: Archive<R>) -> Result<ExtractionSummary, ArchiveError> {
        for entry in layer.entries().map_err(ArchiveError::Read)? {
            let entry = entry.map_err(ArchiveError::Read)?;
            self.unpack_entry(entry)?;
        }
        self.apply_directory_modes()?;

        tracing::debug!(
            layer = %self.summary.layer,
            directories = self.summary.directories,
            files = self.summary.files,
            symlinks = self.summary.symlinks,
            "Rootfs layer unpacked"
        );
        Ok(std::mem::take(&mut self.summary))
    }

    fn unpack_entry<R: Read>(&mut self, mut entry: Entry<'_, R>) -> Result<(), ArchiveError> {
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let entry_type = entry.header().entry_type();

        if entry_type == EntryType::XGlobalHeader {
            tracing::trace!(entry = %name, "Skipping global PAX header");
            return Ok(());
        }

        let entry_path = entry.path().map_err(ArchiveError::Read)?.into_owned();
        let target = self.resolve_entry(&name, &entry_path)?;
        let mode = entry.header().mode().map_err(ArchiveError::Read)? & PERMISSION_BITS;

        match entry_type {
            EntryType::Directory => self.create_directory(&target, mode),
            t if t.is_file() => self.write_file(&target, mode, &mut entry),
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .map_err(ArchiveError::Read)?
                    .ok_or_else(|| ArchiveError::MissingLinkTarget(name.clone()))?
                    .into_owned();
                self.create_symlink(&name, &target, &link)
            }
            other => Err(ArchiveError::UnsupportedEntry {
                entry: name,
                kind: format!("{other:?}"),
            }),
        }
    }

    /// Real location for an entry. The final component is never followed;
    /// an existing entry there is replaced.
    fn resolve_entry(&self, name: &str, entry_path: &Path) -> Result<PathBuf, ArchiveError> {
        let lexical = normalize_path_lexically(&join_under(&self.root, entry_path));
        if !is_contained(&self.root, &lexical) {
            return Err(ArchiveError::PathEscape {
                entry: name.to_string(),
                resolved: lexical,
                root: self.root.clone(),
            });
        }

        if lexical == self.root {
            return Ok(lexical);
        }
        let (Some(parent), Some(file_name)) = (lexical.parent(), lexical.file_name()) else {
            return Ok(lexical);
        };
        let relative_parent = parent.strip_prefix(&self.root).unwrap_or(Path::new(""));
        match resolve_in_root(&self.root, &self.root, relative_parent)
            .map_err(ArchiveError::io(&lexical))?
        {
            Resolved::Inside(real_parent) => Ok(real_parent.join(file_name)),
            Resolved::Outside(reached) => Err(ArchiveError::SymlinkTraversal {
                entry: name.to_string(),
                resolved: reached.join(file_name),
                root: self.root.clone(),
            }),
        }
    }

    fn create_directory(&mut self, target: &Path, mode: u32) -> Result<(), ArchiveError> {
        // "./" entries leave the destination's mode as the caller created it.
        if target == self.root {
            tracing::trace!("Ignoring mode {mode:o} of the rootfs root entry");
            return Ok(());
        }

        match fs::symlink_metadata(target) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(ArchiveError::Io {
                    path: target.to_path_buf(),
                    source: io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "a non-directory already exists at this path",
                    ),
                });
            }
            Err(_) => DirBuilder::new()
                .recursive(true)
                .mode(mode | 0o700)
                .create(target)
                .map_err(ArchiveError::io(target))?,
        }

        // Owner must be able to write into it until every entry is in place.
        fs::set_permissions(target, Permissions::from_mode(mode | 0o700))
            .map_err(ArchiveError::io(target))?;
        self.deferred_dir_modes.push((target.to_path_buf(), mode));
        self.summary.directories += 1;
        Ok(())
    }

    fn write_file(
        &mut self,
        target: &Path,
        mode: u32,
        content: &mut impl Read,
    ) -> Result<(), ArchiveError> {
        self.ensure_parent(target)?;
        remove_non_directory(target)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(target)
            .map_err(ArchiveError::io(target))?;
        io::copy(content, &mut file).map_err(ArchiveError::io(target))?;
        // Creation mode is filtered by the umask; set the declared bits exactly.
        file.set_permissions(Permissions::from_mode(mode))
            .map_err(ArchiveError::io(target))?;

        self.summary.files += 1;
        Ok(())
    }

    fn create_symlink(&mut self, name: &str, target: &Path, link: &Path) -> Result<(), ArchiveError> {
        let link_dir = target.parent().unwrap_or(&self.root);
        if let Resolved::Outside(resolved) =
            resolve_in_root(&self.root, link_dir, link).map_err(ArchiveError::io(target))?
        {
            return Err(ArchiveError::LinkEscape {
                entry: name.to_string(),
                link: link.to_string_lossy().into_owned(),
                resolved,
                root: self.root.clone(),
            });
        }

        self.ensure_parent(target)?;
        remove_non_directory(target)?;
        symlink(link, target).map_err(ArchiveError::io(target))?;

        self.summary.symlinks += 1;
        Ok(())
    }

    /// Create missing parents of `target`. `resolve_entry` already followed
    /// every symlink among its ancestors.
    fn ensure_parent(&self, target: &Path) -> Result<(), ArchiveError> {
        let Some(parent) = target.parent() else {
            return Ok(());
        };
        if parent.is_dir() {
            return Ok(());
        }
        tracing::trace!(parent = %parent.display(), "Creating undeclared parent directory");
        DirBuilder::new()
            .recursive(true)
            .mode(IMPLICIT_DIR_MODE)
            .create(parent)
            .map_err(ArchiveError::io(parent))
    }

    fn apply_directory_modes(&mut self) -> Result<(), ArchiveError> {
        // Deepest first, so tightening a parent never blocks a child chmod.
        self.deferred_dir_modes
            .sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
        for (path, mode) in self.deferred_dir_modes.drain(..) {
            fs::set_permissions(&path, Permissions::from_mode(mode))
                .map_err(ArchiveError::io(&path))?;
        }
        Ok(())
    }
}

/// Later entries replace earlier ones; never write through an existing link.
fn remove_non_directory(target: &Path) -> Result<(), ArchiveError> {
    match fs::symlink_metadata(target) {
        Ok(meta) if !meta.is_dir() => fs::remove_file(target).map_err(ArchiveError::io(target)),
        _ => Ok(()),
    }
}
