//! Helpers for tests: synthetic image exports and a stand-in sandbox tool.
//!
//! Archives are built from a list of entry descriptions and only serialized
//! in [`RootfsArchiveBuilder::build`], so escaping names like `../x` or
//! `/etc/passwd` can be written verbatim into the header (the `tar` crate
//! refuses to produce them through its normal path setters).

use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::{self, Write};
use tar::{EntryType, Header};

use crate::payload::Payloads;

/// Digest directory the layer is stored under in generated exports.
pub const TEST_LAYER_DIGEST: &str =
    "8d3ac3489996423f53d6087c81180006263b79f206d3fdec9e66f0e27ceb8759";

#[derive(Debug, Clone)]
enum LayerEntry {
    Directory { name: String, mode: u32 },
    File { name: String, mode: u32, contents: Vec<u8> },
    Symlink { name: String, target: String },
    Other { name: String, kind: EntryType },
    GlobalPaxHeader,
}

/// Builds a gzip-compressed outer tar holding `<digest>/layer.tar`.
#[derive(Debug, Clone, Default)]
pub struct RootfsArchiveBuilder {
    entries: Vec<LayerEntry>,
}

impl RootfsArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(mut self, name: &str, mode: u32) -> Self {
        self.entries.push(LayerEntry::Directory {
            name: name.to_string(),
            mode,
        });
        self
    }

    pub fn file(mut self, name: &str, mode: u32, contents: impl AsRef<[u8]>) -> Self {
        self.entries.push(LayerEntry::File {
            name: name.to_string(),
            mode,
            contents: contents.as_ref().to_vec(),
        });
        self
    }

    pub fn symlink(mut self, name: &str, target: &str) -> Self {
        self.entries.push(LayerEntry::Symlink {
            name: name.to_string(),
            target: target.to_string(),
        });
        self
    }

    /// An entry of a type the extractor does not support (FIFO, device, hard link).
    pub fn other(mut self, name: &str, kind: EntryType) -> Self {
        self.entries.push(LayerEntry::Other {
            name: name.to_string(),
            kind,
        });
        self
    }

    pub fn global_pax_header(mut self) -> Self {
        self.entries.push(LayerEntry::GlobalPaxHeader);
        self
    }

    /// Serialize only the inner layer tar.
    pub fn build_layer(&self) -> io::Result<Vec<u8>> {
        let mut layer = tar::Builder::new(Vec::new());
        for entry in &self.entries {
            append_entry(&mut layer, entry)?;
        }
        layer.into_inner()
    }

    /// Serialize the full gzip-compressed image export.
    pub fn build(&self) -> io::Result<Vec<u8>> {
        let layer = self.build_layer()?;
        let layer_name = format!("{TEST_LAYER_DIGEST}/layer.tar");
        let manifest = format!(
            r#"[{{"Config":"config.json","RepoTags":["prootbox:test"],"Layers":["{layer_name}"]}}]"#
        );

        let mut outer = tar::Builder::new(Vec::new());
        append_raw(&mut outer, "config.json", EntryType::Regular, 0o644, b"{}")?;
        append_raw(&mut outer, TEST_LAYER_DIGEST, EntryType::Directory, 0o755, b"")?;
        append_raw(&mut outer, &layer_name, EntryType::Regular, 0o644, &layer)?;
        append_raw(&mut outer, "manifest.json", EntryType::Regular, 0o644, manifest.as_bytes())?;
        gzip(&outer.into_inner()?)
    }

    /// An export with the same metadata files but no `layer.tar`.
    pub fn build_without_layer(&self) -> io::Result<Vec<u8>> {
        let mut outer = tar::Builder::new(Vec::new());
        append_raw(&mut outer, "manifest.json", EntryType::Regular, 0o644, b"[]")?;
        append_raw(&mut outer, TEST_LAYER_DIGEST, EntryType::Directory, 0o755, b"")?;
        append_raw(
            &mut outer,
            &format!("{TEST_LAYER_DIGEST}/json"),
            EntryType::Regular,
            0o644,
            b"{}",
        )?;
        gzip(&outer.into_inner()?)
    }
}

fn append_entry(builder: &mut tar::Builder<Vec<u8>>, entry: &LayerEntry) -> io::Result<()> {
    match entry {
        LayerEntry::Directory { name, mode } => {
            append_raw(builder, name, EntryType::Directory, *mode, b"")
        }
        LayerEntry::File {
            name,
            mode,
            contents,
        } => append_raw(builder, name, EntryType::Regular, *mode, contents),
        LayerEntry::Symlink { name, target } => {
            let mut header = raw_header(name, EntryType::Symlink, 0o777, 0)?;
            set_raw_field(&mut header.as_old_mut().linkname, target)?;
            header.set_cksum();
            builder.append(&header, io::empty())
        }
        LayerEntry::Other { name, kind } => append_raw(builder, name, *kind, 0o644, b""),
        LayerEntry::GlobalPaxHeader => {
            let record = b"21 comment=generated\n";
            append_raw(
                builder,
                "pax_global_header",
                EntryType::XGlobalHeader,
                0o644,
                record,
            )
        }
    }
}

fn append_raw(
    builder: &mut tar::Builder<Vec<u8>>,
    name: &str,
    kind: EntryType,
    mode: u32,
    data: &[u8],
) -> io::Result<()> {
    let mut header = raw_header(name, kind, mode, data.len() as u64)?;
    header.set_cksum();
    builder.append(&header, data)
}

fn raw_header(name: &str, kind: EntryType, mode: u32, size: u64) -> io::Result<Header> {
    let mut header = Header::new_old();
    set_raw_field(&mut header.as_old_mut().name, name)?;
    header.set_entry_type(kind);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(1_700_000_000);
    header.set_uid(0);
    header.set_gid(0);
    Ok(header)
}

fn set_raw_field(field: &mut [u8; 100], value: &str) -> io::Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > field.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("name too long for a test header: {value}"),
        ));
    }
    field.fill(0);
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// A `/bin/sh` script with the given body.
pub fn script(body: &str) -> Vec<u8> {
    format!("#!/bin/sh\n{body}\n").into_bytes()
}

/// Stand-in for proot: drops the `-b <bind>` pair and execs the target
/// (already an absolute host path) with its arguments.
pub fn fake_sandbox_tool() -> Vec<u8> {
    script(
        r#"if [ "$1" = "-b" ]; then shift 2; fi
exec "$@""#,
    )
}

/// A small rootfs with `bin/true`, `bin/false` and an empty `nix/store`.
pub fn minimal_rootfs() -> RootfsArchiveBuilder {
    RootfsArchiveBuilder::new()
        .dir("bin/", 0o755)
        .dir("nix/", 0o755)
        .dir("nix/store/", 0o755)
        .file("bin/true", 0o755, script("exit 0"))
        .file("bin/false", 0o755, script("exit 1"))
}

/// Payloads from an archive plus the stand-in sandbox tool.
pub fn test_payloads(archive: Vec<u8>) -> Payloads {
    Payloads::new(archive, fake_sandbox_tool())
}
