//! Purpose: Resolve paths across several packs stacked by manifest priority.
//! Exports: `LayerStack`.
//! Role: Read-only overlay; the highest-priority layer holding a regular file wins.
//! Invariants: Layers are ordered by priority descending; equal priorities keep insertion order.
//! Invariants: A corrupt hit fails the lookup instead of falling through to a lower layer.
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use tracing::debug;

use crate::core::entry::EntryKind;
use crate::core::error::{Error, io_error};
use crate::core::reader::PackReader;

pub const PACK_EXTENSION: &str = "pack";

pub struct LayerStack<R: Read + Seek> {
    layers: Vec<PackReader<R>>,
}

impl LayerStack<BufReader<File>> {
    /// Open every `*.pack` file directly inside `dir`.
    pub fn open_dir(dir: &Path) -> Result<Self, Error> {
        let mut paths = Vec::new();
        for item in fs::read_dir(dir).map_err(|err| io_error(err, dir))? {
            let path = item.map_err(|err| io_error(err, dir))?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == PACK_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut stack = Self::new();
        for path in paths {
            stack.push(PackReader::open_path(&path)?);
        }
        Ok(stack)
    }
}

impl<R: Read + Seek> Default for LayerStack<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Read + Seek> LayerStack<R> {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn push(&mut self, layer: PackReader<R>) {
        let priority = layer.manifest().priority;
        let at = self
            .layers
            .iter()
            .position(|existing| existing.manifest().priority < priority)
            .unwrap_or(self.layers.len());
        debug!(name = %layer.manifest().name, priority, position = at, "adding layer");
        self.layers.insert(at, layer);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer names in resolution order.
    pub fn names(&self) -> Vec<&str> {
        self.layers
            .iter()
            .map(|layer| layer.manifest().name.as_str())
            .collect()
    }

    /// Verified bytes of `path` from the first layer holding it as a regular file.
    pub fn resolve(&mut self, path: &str) -> Result<Option<Vec<u8>>, Error> {
        for layer in &mut self.layers {
            if let Some(entry) = layer.lookup(path)? {
                if entry.kind() == EntryKind::File {
                    return layer.read_content(&entry).map(Some);
                }
            }
        }
        Ok(None)
    }

    /// `"name (priority: N)"` for every layer containing `path`, in resolution order.
    pub fn layers_for(&mut self, path: &str) -> Result<Vec<String>, Error> {
        let mut out = Vec::new();
        for layer in &mut self.layers {
            if layer.lookup(path)?.is_some() {
                let manifest = layer.manifest();
                out.push(format!("{} (priority: {})", manifest.name, manifest.priority));
            }
        }
        Ok(out)
    }

    /// Sorted union of regular file paths across all layers.
    pub fn file_paths(&mut self) -> Result<Vec<String>, Error> {
        let mut out = Vec::new();
        for layer in &mut self.layers {
            for entry in layer.entries() {
                let entry = entry?;
                if entry.kind() == EntryKind::File {
                    out.push(entry.path().as_str().to_string());
                }
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::LayerStack;
    use crate::core::codec::Compression;
    use crate::core::error::ErrorKind;
    use crate::core::manifest::PackManifest;
    use crate::core::path::sanitize;
    use crate::core::reader::PackReader;
    use crate::core::writer::PackWriter;
    use std::io::Cursor;

    fn layer(name: &str, priority: i32, files: &[(&str, &str)]) -> PackReader<Cursor<Vec<u8>>> {
        let manifest = PackManifest {
            priority,
            ..PackManifest::named(name)
        };
        let mut writer = PackWriter::new(Cursor::new(Vec::new()), &manifest).expect("writer");
        for (path, body) in files {
            writer
                .add_file(sanitize(path).unwrap(), 0o644, &mut body.as_bytes(), Compression::Store)
                .expect("add");
        }
        PackReader::from_bytes(writer.finish().expect("finish").into_inner()).expect("open")
    }

    #[test]
    fn highest_priority_wins_and_ties_keep_insertion_order() {
        let mut stack = LayerStack::new();
        stack.push(layer("base", 0, &[("ui/title.txt", "Hello"), ("ui/menu.txt", "Menu")]));
        stack.push(layer("thai", 10, &[("ui/title.txt", "Sawasdee")]));
        stack.push(layer("patch", 0, &[("ui/menu.txt", "Patched")]));

        assert_eq!(stack.names(), ["thai", "base", "patch"]);
        assert_eq!(stack.resolve("ui/title.txt").unwrap().unwrap(), b"Sawasdee");
        assert_eq!(stack.resolve("ui/menu.txt").unwrap().unwrap(), b"Menu");
        assert_eq!(stack.resolve("ui/missing.txt").unwrap(), None);
        assert_eq!(
            stack.layers_for("ui/title.txt").unwrap(),
            ["thai (priority: 10)", "base (priority: 0)"]
        );
        assert_eq!(stack.file_paths().unwrap(), ["ui/menu.txt", "ui/title.txt"]);
    }

    #[test]
    fn unsafe_lookup_path_is_rejected() {
        let mut stack = LayerStack::new();
        stack.push(layer("base", 0, &[("a.txt", "a")]));
        let err = stack.resolve("../a.txt").expect_err("traversal");
        assert_eq!(err.kind(), ErrorKind::PathTraversal);
    }

    #[test]
    fn open_dir_picks_up_pack_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer =
            PackWriter::new(Cursor::new(Vec::new()), &PackManifest::named("only")).expect("writer");
        writer
            .add_file(sanitize("x").unwrap(), 0o644, &mut &b"x"[..], Compression::Store)
            .unwrap();
        std::fs::write(dir.path().join("only.pack"), writer.finish().unwrap().into_inner()).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut stack = LayerStack::open_dir(dir.path()).expect("open dir");
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.resolve("x").unwrap().unwrap(), b"x");
    }
}
