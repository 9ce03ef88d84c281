//! Path containment for archive entries.
//!
//! Entry names are first normalized lexically, then resolved through the
//! symlinks earlier entries left on disk. All checks compare paths component
//! by component. A raw string prefix test would accept `/tmp/abcd/x` as being
//! inside `/tmp/abc`.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Normalize a path lexically (without filesystem access).
///
/// `..` never climbs above the root directory.
pub fn normalize_path_lexically(path: &Path) -> PathBuf {
    let mut stack = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if stack.last().is_some_and(|c| matches!(c, Component::Normal(_))) {
                    stack.pop();
                } else if stack.last() != Some(&Component::RootDir) {
                    stack.push(component);
                }
            }
            c => stack.push(c),
        }
    }

    stack.iter().collect()
}

/// Join `name` onto `base` by concatenation: a leading `/` in `name` is
/// relative to `base` instead of replacing it.
pub fn join_under(base: &Path, name: &Path) -> PathBuf {
    let relative: PathBuf = name
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect();
    base.join(relative)
}

/// True if `candidate` is `root` or lies beneath it.
pub fn is_contained(root: &Path, candidate: &Path) -> bool {
    candidate.starts_with(root)
}

/// Symlinks followed in one resolution before giving up with `ELOOP`.
pub const MAX_SYMLINK_HOPS: usize = 40;

/// Where a path really leads once the symlinks already on disk are followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// A location under the root. None of its ancestors is a symlink.
    Inside(PathBuf),
    /// Resolution climbed above the root; holds where it got to.
    Outside(PathBuf),
}

/// Resolve `path` starting from the directory `start`, following every
/// symlink that already exists under `root`.
///
/// `root` plays the part of `/`: absolute paths, including absolute symlink
/// targets met along the way, restart from it, and `..` above it is an escape.
/// Components that do not exist yet are taken as they are. `start` must be
/// `root` or a real directory beneath it.
pub fn resolve_in_root(root: &Path, start: &Path, path: &Path) -> io::Result<Resolved> {
    let mut current = if path.has_root() {
        root.to_path_buf()
    } else {
        start.to_path_buf()
    };
    let mut pending = VecDeque::new();
    queue_components(&mut pending, path);
    let mut hops = 0;

    while let Some(name) = pending.pop_front() {
        if name == PARENT {
            if current.as_path() == root {
                let mut reached = normalize_path_lexically(&root.join(PARENT));
                reached.extend(pending);
                return Ok(Resolved::Outside(reached));
            }
            current.pop();
            continue;
        }

        current.push(&name);
        let is_symlink = match fs::symlink_metadata(&current) {
            Ok(meta) => meta.file_type().is_symlink(),
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
                false
            }
            Err(e) => return Err(e),
        };
        if !is_symlink {
            continue;
        }

        hops += 1;
        if hops > MAX_SYMLINK_HOPS {
            return Err(io::Error::from_raw_os_error(libc::ELOOP));
        }
        let target = fs::read_link(&current)?;
        current.pop();
        if target.has_root() {
            current = root.to_path_buf();
        }
        queue_components(&mut pending, &target);
    }

    Ok(Resolved::Inside(current))
}

const PARENT: &str = "..";

/// Put the `..` and name components of `path` in front of `pending`.
fn queue_components(pending: &mut VecDeque<OsString>, path: &Path) {
    for component in path.components().rev() {
        match component {
            Component::Normal(name) => pending.push_front(name.to_os_string()),
            Component::ParentDir => pending.push_front(OsString::from(PARENT)),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
}
