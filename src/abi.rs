//! Purpose: C ABI bridge (liblayer_pack) for foreign callers.
//! Exports: `ffi_pack_files`, `ffi_unpack_files`, `ffi_status_name`.
//! Role: The only place results collapse to integer status codes.
//! Invariants: Inputs are untrusted: null, non-UTF-8 and empty strings are rejected with 1.
//! Invariants: No panic or error object crosses the boundary; a caught panic reports 5.
//! Invariants: No global state; calls are reentrant and may run concurrently on distinct paths.
use std::ffi::{CStr, c_char};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use tracing::{debug, error};

use crate::core::error::{Error, ErrorKind, kind_code, to_status_code};
use crate::core::manifest::PackManifest;
use crate::core::pack::{PackOptions, pack_dir};
use crate::core::unpack::{UnpackOptions, unpack_file};

pub const STATUS_OK: i32 = 0;

/// Pack the directory `source_dir` into the file `pack_path`.
#[unsafe(no_mangle)]
pub extern "C" fn ffi_pack_files(source_dir: *const c_char, pack_path: *const c_char) -> i32 {
    guarded("pack", || {
        let source = parse_path(source_dir, "source_dir")?;
        let dest = parse_path(pack_path, "pack_path")?;
        let name = dest
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let options = PackOptions {
            manifest: PackManifest::named(name),
            ..PackOptions::default()
        };
        pack_dir(source, dest, &options).map(|_| ())
    })
}

/// Unpack the file `pack_path` into `output_dir`.
#[unsafe(no_mangle)]
pub extern "C" fn ffi_unpack_files(pack_path: *const c_char, output_dir: *const c_char) -> i32 {
    guarded("unpack", || {
        let pack = parse_path(pack_path, "pack_path")?;
        let output = parse_path(output_dir, "output_dir")?;
        unpack_file(pack, output, &UnpackOptions::default()).map(|_| ())
    })
}

/// Static, NUL-terminated name for a status code. Never free the result.
#[unsafe(no_mangle)]
pub extern "C" fn ffi_status_name(status: i32) -> *const c_char {
    let name = match status {
        STATUS_OK => c"ok",
        1 => c"invalid_argument",
        2 => c"not_found",
        3 => c"format_error",
        4 => c"integrity_error",
        5 => c"io_error",
        6 => c"path_traversal",
        7 => c"cleanup_incomplete",
        _ => c"unknown",
    };
    name.as_ptr()
}

fn guarded(op: &'static str, run: impl FnOnce() -> Result<(), Error>) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(run)) {
        Ok(Ok(())) => STATUS_OK,
        Ok(Err(err)) => {
            let status = to_status_code(&err);
            debug!(op, status, error = %err, "ffi call failed");
            status
        }
        Err(_) => {
            error!(op, "panic caught at ffi boundary");
            kind_code(ErrorKind::Io)
        }
    }
}

fn parse_path<'a>(raw: *const c_char, name: &str) -> Result<&'a Path, Error> {
    if raw.is_null() {
        return Err(Error::new(ErrorKind::InvalidArgument).with_message(format!("{name} is null")));
    }
    let value = unsafe { CStr::from_ptr(raw) }.to_str().map_err(|_| {
        Error::new(ErrorKind::InvalidArgument).with_message(format!("{name} is not valid UTF-8"))
    })?;
    if value.is_empty() {
        return Err(Error::new(ErrorKind::InvalidArgument).with_message(format!("{name} is empty")));
    }
    Ok(Path::new(value))
}
