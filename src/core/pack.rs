//! Purpose: Pack a directory tree into a single pack file.
//! Exports: `pack_dir`, `PackOptions`, `PackSummary`.
//! Role: Walks the source, orders entries, and drives `PackWriter` into a temp file.
//! Invariants: Entries are emitted sorted by path bytes, so identical trees give identical packs.
//! Invariants: Nothing is visible at the destination unless the whole pack succeeded (atomic rename).
//! Invariants: Symlinks are stored, never followed; special files are skipped.
use std::fs::{self, File, Metadata};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::codec::Compression;
use crate::core::entry::EntryKind;
use crate::core::error::{Error, ErrorKind, io_error};
use crate::core::manifest::PackManifest;
use crate::core::path::{RelativePath, from_fs};
use crate::core::writer::PackWriter;

#[derive(Clone, Debug, Default)]
pub struct PackOptions {
    pub manifest: PackManifest,
    pub compression: Compression,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PackSummary {
    pub entries: u64,
    pub files: u64,
    pub directories: u64,
    pub symlinks: u64,
    /// Size of the finished pack file.
    pub bytes: u64,
}

struct SourceEntry {
    path: RelativePath,
    fs_path: PathBuf,
    kind: EntryKind,
    mode: u32,
}

pub fn pack_dir(source: &Path, dest: &Path, options: &PackOptions) -> Result<PackSummary, Error> {
    options.compression.validate()?;

    let meta = fs::metadata(source).map_err(|err| io_error(err, source))?;
    if !meta.is_dir() {
        return Err(Error::new(ErrorKind::InvalidArgument)
            .with_message("source is not a directory")
            .with_path(source));
    }
    if dest.is_dir() {
        return Err(Error::new(ErrorKind::InvalidArgument)
            .with_message("destination is a directory")
            .with_path(dest));
    }
    let dest_dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let dest_name = dest.file_name().ok_or_else(|| {
        Error::new(ErrorKind::InvalidArgument)
            .with_message("destination has no file name")
            .with_path(dest)
    })?;
    let dest_dir = fs::canonicalize(&dest_dir).map_err(|err| io_error(err, &dest_dir))?;
    let source = fs::canonicalize(source).map_err(|err| io_error(err, source))?;
    let skip = dest_dir.join(dest_name);

    let entries = collect(&source, &skip)?;

    let tmp = tempfile::Builder::new()
        .prefix(".lpack-")
        .suffix(".tmp")
        .tempfile_in(&dest_dir)
        .map_err(|err| io_error(err, &dest_dir))?;

    let mut summary = PackSummary::default();
    let mut writer = PackWriter::new(BufWriter::new(tmp.as_file()), &options.manifest)?;
    for entry in &entries {
        debug!(path = %entry.path, kind = ?entry.kind, "packing entry");
        let annotate = |err: Error| err.with_path(&entry.fs_path);
        match entry.kind {
            EntryKind::Directory => {
                writer
                    .add_directory(entry.path.clone(), entry.mode)
                    .map_err(annotate)?;
                summary.directories += 1;
            }
            EntryKind::Symlink => {
                let target = fs::read_link(&entry.fs_path).map_err(|err| io_error(err, &entry.fs_path))?;
                writer
                    .add_symlink(entry.path.clone(), entry.mode, &link_bytes(&target))
                    .map_err(annotate)?;
                summary.symlinks += 1;
            }
            EntryKind::File => {
                let mut file = open_source(&entry.fs_path)?;
                writer
                    .add_file(entry.path.clone(), entry.mode, &mut file, options.compression)
                    .map_err(annotate)?;
                summary.files += 1;
            }
        }
    }
    summary.entries = writer.entry_count() as u64;

    let out = writer.finish()?;
    out.into_inner().map_err(|err| io_error(err.into_error(), tmp.path()))?;
    tmp.as_file().sync_all().map_err(|err| io_error(err, tmp.path()))?;
    let file = tmp.persist(dest).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to move pack into place")
            .with_path(dest)
            .with_source(err.error)
    })?;
    summary.bytes = file.metadata().map_err(|err| io_error(err, dest))?.len();

    info!(
        source = %source.display(),
        dest = %dest.display(),
        entries = summary.entries,
        bytes = summary.bytes,
        "packed layer"
    );
    Ok(summary)
}

fn collect(source: &Path, skip: &Path) -> Result<Vec<SourceEntry>, Error> {
    let mut out = Vec::new();
    for item in WalkDir::new(source).follow_links(false).min_depth(1) {
        let item = item.map_err(|err| {
            let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
            let io = err
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("directory walk failed"));
            io_error(io, &path)
        })?;
        if item.path() == skip {
            continue;
        }
        let file_type = item.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            warn!(path = %item.path().display(), "skipping special file");
            continue;
        };
        let meta = item.metadata().map_err(|err| {
            let io = err
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("metadata lookup failed"));
            io_error(io, item.path())
        })?;
        out.push(SourceEntry {
            path: from_fs(source, item.path())?,
            fs_path: item.path().to_path_buf(),
            kind,
            mode: mode_of(&meta),
        });
    }
    out.sort_by(|a, b| a.path.as_str().as_bytes().cmp(b.path.as_str().as_bytes()));
    Ok(out)
}

#[cfg(unix)]
fn mode_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
fn link_bytes(target: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    target.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn link_bytes(target: &Path) -> Vec<u8> {
    target.to_string_lossy().replace('\\', "/").into_bytes()
}

/// Open a regular file without following a symlink swapped in after the walk.
#[cfg(unix)]
fn open_source(path: &Path) -> Result<File, Error> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)
        .map_err(|err| io_error(err, path))
}

#[cfg(not(unix))]
fn open_source(path: &Path) -> Result<File, Error> {
    File::open(path).map_err(|err| io_error(err, path))
}
