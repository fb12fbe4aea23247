// Core modules: wire format, path safety, pack writing/reading, and the two engines.
pub mod codec;
pub mod entry;
pub mod error;
pub mod format;
pub mod index;
pub mod layers;
pub mod manifest;
pub mod pack;
pub mod path;
pub mod reader;
pub mod unpack;
pub mod writer;
