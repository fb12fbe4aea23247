//! Purpose: Extract a pack file into an output directory.
//! Exports: `unpack_file`, `unpack_reader`, `UnpackOptions`, `UnpackSummary`.
//! Role: Fail-fast consumer of `PackReader`; journals what it creates so a failure can roll back.
//! Invariants: Every target path is re-sanitized and joined lexically under the output root.
//! Invariants: No ancestor of a target may be a symlink (packed or pre-existing).
//! Invariants: File content lands via temp file + rename, only after its checksum verified.
//! Invariants: Existing files are set aside before being replaced and only dropped on success.
//! Invariants: On failure, everything this call created is removed and every set-aside file is
//!             put back (best effort); leftovers are attached to the returned error and never
//!             replace its kind.
use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::entry::{Entry, EntryKind};
use crate::core::error::{Error, ErrorKind, io_error};
use crate::core::path::{RelativePath, sanitize};
use crate::core::reader::PackReader;

#[derive(Clone, Copy, Debug)]
pub struct UnpackOptions {
    /// Replace files that already exist in the output directory.
    pub overwrite: bool,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self { overwrite: true }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct UnpackSummary {
    pub entries: u64,
    pub files: u64,
    pub directories: u64,
    pub symlinks: u64,
    /// Decoded bytes written for regular files.
    pub bytes: u64,
}

pub fn unpack_file(pack: &Path, output: &Path, options: &UnpackOptions) -> Result<UnpackSummary, Error> {
    let mut reader = PackReader::open_path(pack)?;
    unpack_reader(&mut reader, output, options)
}

pub fn unpack_reader<R: Read + Seek>(
    reader: &mut PackReader<R>,
    output: &Path,
    options: &UnpackOptions,
) -> Result<UnpackSummary, Error> {
    let mut journal = Journal::default();
    let result = prepare_root(output, &mut journal)
        .and_then(|()| extract(reader, output, options, &mut journal));
    match result {
        Ok(summary) => {
            journal.commit();
            info!(
                pack = %reader.path().unwrap_or(Path::new("<memory>")).display(),
                version = reader.version(),
                pack_bytes = reader.file_len(),
                output = %output.display(),
                entries = summary.entries,
                bytes = summary.bytes,
                "unpacked layer"
            );
            Ok(summary)
        }
        Err(err) => Err(abort(err, journal)),
    }
}

fn abort(err: Error, journal: Journal) -> Error {
    let leftovers = journal.rollback();
    if !leftovers.is_empty() {
        warn!(count = leftovers.len(), "unpack rollback left files behind");
    }
    err.with_cleanup(leftovers)
}

fn prepare_root(output: &Path, journal: &mut Journal) -> Result<(), Error> {
    match fs::metadata(output) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(Error::new(ErrorKind::InvalidArgument)
            .with_message("output path is not a directory")
            .with_path(output)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let mut missing = Vec::new();
            let mut cursor = Some(output);
            while let Some(dir) = cursor {
                if dir.as_os_str().is_empty() || dir.exists() {
                    break;
                }
                missing.push(dir.to_path_buf());
                cursor = dir.parent();
            }
            for dir in missing.into_iter().rev() {
                fs::create_dir(&dir).map_err(|err| fs_error(err, &dir, "failed to create directory"))?;
                journal.dirs.push(dir);
            }
            Ok(())
        }
        Err(err) => Err(io_error(err, output)),
    }
}

fn extract<R: Read + Seek>(
    reader: &mut PackReader<R>,
    output: &Path,
    options: &UnpackOptions,
    journal: &mut Journal,
) -> Result<UnpackSummary, Error> {
    let mut summary = UnpackSummary::default();
    let mut seen: HashSet<RelativePath> = HashSet::new();
    let mut links: Vec<RelativePath> = Vec::new();
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

    for ordinal in 0..reader.entry_count() {
        let entry = reader.entry(ordinal)?;
        let annotate = |err: Error| err.with_entry(entry.ordinal).with_offset(entry.offset);
        let rel = sanitize(entry.path().as_str()).map_err(annotate)?;

        if seen.contains(&rel) {
            return Err(annotate(
                Error::new(ErrorKind::Format).with_message(format!("duplicate entry path {rel}")),
            ));
        }
        if let Some(link) = links.iter().find(|link| link.is_ancestor_of(&rel)) {
            return Err(annotate(Error::new(ErrorKind::PathTraversal).with_message(format!(
                "entry {rel} lies beneath symlink {link}"
            ))));
        }
        if entry.kind() == EntryKind::Symlink && seen.iter().any(|prior| rel.is_ancestor_of(prior)) {
            return Err(annotate(Error::new(ErrorKind::PathTraversal).with_message(format!(
                "symlink {rel} would shadow entries already extracted"
            ))));
        }

        let target = rel.join_under(output);
        debug!(path = %rel, kind = ?entry.kind(), checksum = %entry.header.checksum, "unpacking entry");
        ensure_parents(output, &rel, journal).map_err(annotate)?;

        match entry.kind() {
            EntryKind::Directory => {
                ensure_dir(&target, journal).map_err(annotate)?;
                dir_modes.push((target, entry.header.mode));
                summary.directories += 1;
            }
            EntryKind::File => {
                if check_replaceable(&target, options).map_err(annotate)? {
                    set_aside(&target, entry.ordinal, journal).map_err(annotate)?;
                }
                summary.bytes += write_file(reader, &entry, &target, journal)?;
                summary.files += 1;
            }
            EntryKind::Symlink => {
                if check_replaceable(&target, options).map_err(annotate)? {
                    set_aside(&target, entry.ordinal, journal).map_err(annotate)?;
                }
                write_symlink(reader, &entry, &target, journal)?;
                links.push(rel.clone());
                summary.symlinks += 1;
            }
        }
        seen.insert(rel);
        summary.entries += 1;
    }

    // Children first, so a read-only parent does not block its subtree.
    for (dir, mode) in dir_modes.iter().rev() {
        set_mode(dir, *mode)?;
    }
    Ok(summary)
}

/// Walk `rel`'s ancestors under `root`, creating missing ones and refusing symlinks.
fn ensure_parents(root: &Path, rel: &RelativePath, journal: &mut Journal) -> Result<(), Error> {
    let mut dir = root.to_path_buf();
    let segments: Vec<&str> = rel.segments().collect();
    for segment in &segments[..segments.len() - 1] {
        dir.push(segment);
        ensure_dir(&dir, journal)?;
    }
    Ok(())
}

fn ensure_dir(dir: &Path, journal: &mut Journal) -> Result<(), Error> {
    match fs::symlink_metadata(dir) {
        Ok(meta) if meta.file_type().is_symlink() => Err(Error::new(ErrorKind::PathTraversal)
            .with_message("refusing to write through a symlink")
            .with_path(dir)),
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(Error::new(ErrorKind::Io)
            .with_message("a non-directory is in the way")
            .with_path(dir)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            fs::create_dir(dir).map_err(|err| fs_error(err, dir, "failed to create directory"))?;
            journal.dirs.push(dir.to_path_buf());
            Ok(())
        }
        Err(err) => Err(fs_error(err, dir, "failed to inspect path")),
    }
}

/// Returns whether something replaceable already sits at `target`.
fn check_replaceable(target: &Path, options: &UnpackOptions) -> Result<bool, Error> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => Err(Error::new(ErrorKind::Io)
            .with_message("a directory is in the way")
            .with_path(target)),
        Ok(_) if !options.overwrite => Err(Error::new(ErrorKind::Io)
            .with_message("output file already exists")
            .with_hint("Remove it or allow overwriting.")
            .with_path(target)),
        Ok(_) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(fs_error(err, target, "failed to inspect path")),
    }
}

/// Rename an existing output file out of the way so a failed unpack can put it back.
fn set_aside(target: &Path, ordinal: u64, journal: &mut Journal) -> Result<(), Error> {
    let backup = parent_of(target).join(format!(".lpack-{}-{ordinal}.orig", std::process::id()));
    if fs::symlink_metadata(&backup).is_ok() {
        return Err(Error::new(ErrorKind::Io)
            .with_message("backup name for an existing file is taken")
            .with_path(&backup));
    }
    fs::rename(target, &backup).map_err(|err| fs_error(err, target, "failed to set existing file aside"))?;
    journal.backups.push((backup, target.to_path_buf()));
    Ok(())
}

fn write_file<R: Read + Seek>(
    reader: &mut PackReader<R>,
    entry: &Entry,
    target: &Path,
    journal: &mut Journal,
) -> Result<u64, Error> {
    let dir = parent_of(target);
    let mut tmp = tempfile::Builder::new()
        .prefix(".lpack-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|err| fs_error(err, dir, "failed to create temp file"))?;
    let written = {
        let mut out = BufWriter::new(tmp.as_file_mut());
        let written = reader.copy_content(entry, &mut out)?;
        out.flush()
            .map_err(|err| fs_error(err, target, "failed to write file"))?;
        written
    };
    set_mode(tmp.path(), entry.header.mode)?;
    tmp.persist(target).map_err(|err| fs_error(err.error, target, "failed to move file into place"))?;
    journal.files.push(target.to_path_buf());
    Ok(written)
}

#[cfg(unix)]
fn write_symlink<R: Read + Seek>(
    reader: &mut PackReader<R>,
    entry: &Entry,
    target: &Path,
    journal: &mut Journal,
) -> Result<(), Error> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let link = reader.read_content(entry)?;
    let staging = parent_of(target).join(format!(
        ".lpack-{}-{}.link",
        std::process::id(),
        entry.ordinal
    ));
    std::os::unix::fs::symlink(OsStr::from_bytes(&link), &staging)
        .map_err(|err| fs_error(err, target, "failed to create symlink"))?;
    if let Err(err) = fs::rename(&staging, target) {
        let _ = fs::remove_file(&staging);
        return Err(fs_error(err, target, "failed to move symlink into place"));
    }
    journal.files.push(target.to_path_buf());
    Ok(())
}

#[cfg(not(unix))]
fn write_symlink<R: Read + Seek>(
    _reader: &mut PackReader<R>,
    _entry: &Entry,
    target: &Path,
    _journal: &mut Journal,
) -> Result<(), Error> {
    Err(Error::new(ErrorKind::Io)
        .with_message("symlinks are not supported on this platform")
        .with_path(target))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
        .map_err(|err| fs_error(err, path, "failed to set permissions"))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> Result<(), Error> {
    if mode & 0o200 != 0 {
        return Ok(());
    }
    let mut perms = fs::metadata(path)
        .map_err(|err| fs_error(err, path, "failed to read permissions"))?
        .permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms).map_err(|err| fs_error(err, path, "failed to set permissions"))
}

fn parent_of(target: &Path) -> &Path {
    target.parent().unwrap_or_else(|| Path::new("."))
}

// Output-side failures are I/O, even when the OS reports NotFound.
fn fs_error(err: std::io::Error, path: &Path, message: &str) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_path(path)
        .with_source(err)
}

#[derive(Default)]
struct Journal {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
    /// `(backup, original)` pairs for files that existed before this call.
    backups: Vec<(PathBuf, PathBuf)>,
}

impl Journal {
    /// Drop the set-aside originals once every entry landed.
    fn commit(self) {
        for (backup, _) in &self.backups {
            if let Err(err) = fs::remove_file(backup) {
                warn!(path = %backup.display(), error = %err, "failed to remove replaced file");
            }
        }
    }

    /// Remove created files, put set-aside originals back, then remove created
    /// directories deepest first. Returns what stayed.
    fn rollback(self) -> Vec<PathBuf> {
        let mut leftovers = Vec::new();
        for file in self.files.iter().rev() {
            if let Err(err) = fs::remove_file(file) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %file.display(), error = %err, "failed to remove file during rollback");
                    leftovers.push(file.clone());
                }
            }
        }
        for (backup, original) in self.backups.iter().rev() {
            if let Err(err) = fs::rename(backup, original) {
                warn!(path = %original.display(), error = %err, "failed to restore replaced file");
                leftovers.push(backup.clone());
            }
        }
        for dir in self.dirs.iter().rev() {
            if let Err(err) = fs::remove_dir(dir) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %dir.display(), error = %err, "failed to remove directory during rollback");
                    leftovers.push(dir.clone());
                }
            }
        }
        leftovers
    }
}
