//! Purpose: Typed error taxonomy shared by every pack/unpack path.
//! Exports: `Error`, `ErrorKind`, `to_status_code`, `io_error`.
//! Role: Internal functions return `Result<_, Error>`; only the ABI/CLI collapse it to an integer.
//! Invariants: Status codes are stable and documented; 0 is reserved for success.
//! Invariants: A cleanup failure never replaces the primary kind of an error.
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Format,
    Integrity,
    Io,
    PathTraversal,
    CleanupIncomplete,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<PathBuf>,
    entry: Option<u64>,
    offset: Option<u64>,
    cleanup: Vec<PathBuf>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            path: None,
            entry: None,
            offset: None,
            cleanup: Vec::new(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Ordinal of the pack entry that triggered the failure, if any.
    pub fn entry(&self) -> Option<u64> {
        self.entry
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Paths that a failed unpack could not roll back.
    pub fn cleanup(&self) -> &[PathBuf] {
        &self.cleanup
    }

    pub fn cleanup_incomplete(&self) -> bool {
        !self.cleanup.is_empty()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_entry(mut self, entry: u64) -> Self {
        self.entry = Some(entry);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_cleanup(mut self, leftovers: Vec<PathBuf>) -> Self {
        self.cleanup = leftovers;
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        if let Some(entry) = self.entry {
            write!(f, " (entry: {entry})")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " (offset: {offset})")?;
        }
        if !self.cleanup.is_empty() {
            write!(f, " (cleanup incomplete: {} paths left)", self.cleanup.len())?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

/// Classify a filesystem error against `path`.
pub fn io_error(err: io::Error, path: &Path) -> Error {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        _ => ErrorKind::Io,
    };
    Error::new(kind).with_path(path).with_source(err)
}

pub fn kind_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::InvalidArgument => 1,
        ErrorKind::NotFound => 2,
        ErrorKind::Format => 3,
        ErrorKind::Integrity => 4,
        ErrorKind::Io => 5,
        ErrorKind::PathTraversal => 6,
        ErrorKind::CleanupIncomplete => 7,
    }
}

/// Collapse an error to its public status code.
///
/// A rollback that left paths behind reports `CleanupIncomplete`; the primary
/// kind stays available on the `Error` itself.
pub fn to_status_code(err: &Error) -> i32 {
    if err.cleanup_incomplete() {
        return kind_code(ErrorKind::CleanupIncomplete);
    }
    kind_code(err.kind())
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, io_error, kind_code, to_status_code};
    use std::path::{Path, PathBuf};

    #[test]
    fn status_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::InvalidArgument, 1),
            (ErrorKind::NotFound, 2),
            (ErrorKind::Format, 3),
            (ErrorKind::Integrity, 4),
            (ErrorKind::Io, 5),
            (ErrorKind::PathTraversal, 6),
            (ErrorKind::CleanupIncomplete, 7),
        ];

        for (kind, code) in cases {
            assert_eq!(kind_code(kind), code);
            assert_eq!(to_status_code(&Error::new(kind)), code);
        }
    }

    #[test]
    fn cleanup_leftovers_keep_primary_kind() {
        let err = Error::new(ErrorKind::Integrity)
            .with_message("checksum mismatch")
            .with_cleanup(vec![PathBuf::from("out/a.txt")]);
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(err.cleanup_incomplete());
        assert_eq!(to_status_code(&err), 7);
        assert!(err.to_string().contains("cleanup incomplete"));
    }

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::Format)
            .with_message("bad footer magic")
            .with_path("layer.pack")
            .with_entry(3)
            .with_offset(128);
        let text = err.to_string();
        assert_eq!(
            text,
            "Format: bad footer magic (path: layer.pack) (entry: 3) (offset: 128)"
        );
    }

    #[test]
    fn missing_files_classify_as_not_found() {
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(io_error(err, Path::new("x")).kind(), ErrorKind::NotFound);

        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(io_error(err, Path::new("x")).kind(), ErrorKind::Io);
    }
}
