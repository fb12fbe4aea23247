//! Purpose: Layer pack archives: pack a directory into one file, unpack it safely.
//! Exports: `api` (stable surface), `core` (format and engines), `abi` (C entry points).
//! Role: Library backing the `lpack` CLI and foreign callers loading the cdylib.
//! Invariants: No process-wide state; every call is independent and reentrant.
//! Invariants: The library logs through `tracing` but never installs a subscriber.
pub mod abi;
pub mod api;
pub mod core;
