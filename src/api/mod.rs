//! Purpose: Define the stable public Rust API boundary for layer packs.
//! Exports: Engines, reader/writer, manifest, and error types needed by the CLI and bindings.
//! Role: Public, additive-only surface over `core`.
//! Invariants: `to_status_code` is the only error-to-integer translation.

pub use crate::core::codec::Compression;
pub use crate::core::entry::{Checksum, Entry, EntryKind};
pub use crate::core::error::{Error, ErrorKind, to_status_code};
pub use crate::core::layers::LayerStack;
pub use crate::core::manifest::{LayerKind, PackManifest};
pub use crate::core::pack::{PackOptions, PackSummary, pack_dir};
pub use crate::core::path::{RelativePath, sanitize};
pub use crate::core::reader::PackReader;
pub use crate::core::unpack::{UnpackOptions, UnpackSummary, unpack_file, unpack_reader};
pub use crate::core::writer::PackWriter;
