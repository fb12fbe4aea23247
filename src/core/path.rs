//! Purpose: Validate and normalize relative paths carried by pack entries.
//! Exports: `RelativePath`, `sanitize`, `from_fs`.
//! Role: Pure, pre-I/O gate shared by the writer (re-validation) and the unpack engine.
//! Invariants: A `RelativePath` has at least one segment; no segment is empty, `.`, `..`,
//!             a drive prefix, or contains a separator or NUL.
//! Invariants: `join_under(root)` stays lexically inside `root` without consulting the filesystem.
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::core::error::{Error, ErrorKind};

pub const MAX_PATH_LEN: usize = u16::MAX as usize;

/// A validated, `/`-joined path relative to an archive root.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RelativePath(String);

impl RelativePath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// True when `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &RelativePath) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    pub fn join_under(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for segment in self.segments() {
            out.push(segment);
        }
        debug_assert!(out.starts_with(root));
        out
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn rejected(raw: &str, reason: &str) -> Error {
    Error::new(ErrorKind::PathTraversal)
        .with_message(format!("unsafe entry path {raw:?}: {reason}"))
}

fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Split `raw` on `/` or `\` and reject anything that could leave the archive root.
pub fn sanitize(raw: &str) -> Result<RelativePath, Error> {
    if raw.is_empty() {
        return Err(rejected(raw, "empty path"));
    }
    if raw.len() > MAX_PATH_LEN {
        return Err(rejected(raw, "path too long"));
    }
    if raw.contains('\0') {
        return Err(rejected(raw, "embedded NUL"));
    }
    if raw.starts_with('/') || raw.starts_with('\\') {
        return Err(rejected(raw, "absolute path"));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" => return Err(rejected(raw, "empty segment")),
            "." | ".." => return Err(rejected(raw, "relative segment")),
            _ if is_drive_prefix(segment) => return Err(rejected(raw, "drive prefix")),
            _ => segments.push(segment),
        }
    }
    Ok(RelativePath(segments.join("/")))
}

/// Build the pack path of `path`, a filesystem path found below `root`.
pub fn from_fs(root: &Path, path: &Path) -> Result<RelativePath, Error> {
    let rel = path.strip_prefix(root).map_err(|_| {
        Error::new(ErrorKind::InvalidArgument)
            .with_message("path is outside the source directory")
            .with_path(path)
    })?;

    let mut parts: Vec<&str> = Vec::new();
    for component in rel.components() {
        let Component::Normal(name) = component else {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message("unexpected path component")
                .with_path(path));
        };
        let name = name.to_str().ok_or_else(|| {
            Error::new(ErrorKind::InvalidArgument)
                .with_message("file name is not valid UTF-8")
                .with_path(path)
        })?;
        if name.contains('\\') {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message("file name contains a backslash")
                .with_path(path));
        }
        parts.push(name);
    }
    sanitize(&parts.join("/")).map_err(|err| err.with_path(path))
}

#[cfg(test)]
mod tests {
    use super::{from_fs, sanitize};
    use crate::core::error::ErrorKind;
    use std::path::Path;

    #[test]
    fn accepts_plain_relative_paths() {
        let path = sanitize("assets/textures/grass.png").expect("valid");
        assert_eq!(path.as_str(), "assets/textures/grass.png");
        assert_eq!(path.segments().collect::<Vec<_>>(), ["assets", "textures", "grass.png"]);
    }

    #[test]
    fn normalizes_backslashes() {
        let path = sanitize("data\\lang\\th.json").expect("valid");
        assert_eq!(path.as_str(), "data/lang/th.json");
    }

    #[test]
    fn rejects_traversal_and_absolute_forms() {
        let cases = [
            "",
            "../evil",
            "a/../../evil",
            "a/./b",
            ".",
            "/etc/passwd",
            "\\windows\\system32",
            "C:\\evil",
            "c:evil",
            "a//b",
            "a/",
            "nul\0byte",
        ];
        for raw in cases {
            let err = sanitize(raw).expect_err(raw);
            assert_eq!(err.kind(), ErrorKind::PathTraversal, "{raw:?}");
        }
    }

    #[test]
    fn join_stays_under_root() {
        let root = Path::new("/tmp/out");
        let joined = sanitize("a/b/c.txt").unwrap().join_under(root);
        assert_eq!(joined, Path::new("/tmp/out/a/b/c.txt"));
        assert!(joined.starts_with(root));
    }

    #[test]
    fn ancestor_check_respects_segment_boundaries() {
        let dir = sanitize("a").unwrap();
        assert!(dir.is_ancestor_of(&sanitize("a/b").unwrap()));
        assert!(!dir.is_ancestor_of(&sanitize("ab").unwrap()));
        assert!(!dir.is_ancestor_of(&sanitize("a").unwrap()));
    }

    #[test]
    fn from_fs_builds_forward_slash_paths() {
        let root = Path::new("/src");
        let path = from_fs(root, Path::new("/src/dir/file.txt")).expect("valid");
        assert_eq!(path.as_str(), "dir/file.txt");

        let err = from_fs(root, Path::new("/elsewhere/file.txt")).expect_err("outside");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
