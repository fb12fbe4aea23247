// Status-code contract of the exported C functions.
use std::ffi::{CStr, CString};
use std::fs;
use std::path::Path;
use std::ptr;
use std::thread;

use layer_pack::abi::{ffi_pack_files, ffi_status_name, ffi_unpack_files};

fn c_path(path: &Path) -> CString {
    CString::new(path.to_str().expect("utf8 path")).expect("no interior nul")
}

fn pack(src: &Path, dest: &Path) -> i32 {
    ffi_pack_files(c_path(src).as_ptr(), c_path(dest).as_ptr())
}

fn unpack(pack: &Path, out: &Path) -> i32 {
    ffi_unpack_files(c_path(pack).as_ptr(), c_path(out).as_ptr())
}

fn status_name(code: i32) -> &'static str {
    unsafe { CStr::from_ptr(ffi_status_name(code)) }
        .to_str()
        .expect("ascii")
}

#[test]
fn pack_then_unpack_returns_zero() {
    let temp = tempfile::tempdir().expect("tempdir");
    let src = temp.path().join("src");
    fs::create_dir_all(src.join("data")).expect("mkdir");
    fs::write(src.join("data/a.txt"), b"alpha").expect("write");

    let file = temp.path().join("layer.pack");
    assert_eq!(pack(&src, &file), 0);
    let out = temp.path().join("out");
    assert_eq!(unpack(&file, &out), 0);
    assert_eq!(fs::read(out.join("data/a.txt")).unwrap(), b"alpha");
}

#[test]
fn bad_arguments_return_one() {
    let temp = tempfile::tempdir().expect("tempdir");
    let some = c_path(temp.path());
    assert_eq!(ffi_unpack_files(ptr::null(), some.as_ptr()), 1);
    assert_eq!(ffi_unpack_files(some.as_ptr(), ptr::null()), 1);
    assert_eq!(ffi_pack_files(ptr::null(), ptr::null()), 1);
    assert_eq!(ffi_unpack_files(c"".as_ptr(), some.as_ptr()), 1);

    let not_utf8 = [b'p', 0xff, b'k', 0];
    assert_eq!(ffi_unpack_files(not_utf8.as_ptr().cast(), some.as_ptr()), 1);
}

#[test]
fn each_failure_kind_has_its_own_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = temp.path().join("out");

    assert_eq!(unpack(&temp.path().join("missing.pack"), &out), 2);

    let garbage = temp.path().join("garbage.pack");
    fs::write(&garbage, vec![0x5au8; 256]).expect("write");
    assert_eq!(unpack(&garbage, &out), 3);

    let src = temp.path().join("src");
    fs::create_dir(&src).expect("mkdir");
    fs::write(src.join("x.txt"), b"checksum-me").expect("write");
    let file = temp.path().join("x.pack");
    assert_eq!(pack(&src, &file), 0);
    let mut bytes = fs::read(&file).expect("read");
    let at = bytes
        .windows(11)
        .position(|window| window == b"checksum-me")
        .expect("content");
    bytes[at] ^= 0xff;
    fs::write(&file, &bytes).expect("rewrite");
    assert_eq!(unpack(&file, &out), 4);

    assert_eq!(pack(&temp.path().join("nope"), &temp.path().join("nope.pack")), 2);
    assert!(!temp.path().join("nope.pack").exists());
}

#[test]
fn status_names_cover_the_table() {
    let names: Vec<&str> = (0..=7).map(status_name).collect();
    assert_eq!(
        names,
        [
            "ok",
            "invalid_argument",
            "not_found",
            "format_error",
            "integrity_error",
            "io_error",
            "path_traversal",
            "cleanup_incomplete",
        ]
    );
    assert_eq!(status_name(-1), "unknown");
}

#[test]
fn concurrent_calls_on_distinct_paths_are_independent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_path_buf();

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let root = root.clone();
            thread::spawn(move || {
                let src = root.join(format!("src{i}"));
                fs::create_dir(&src).expect("mkdir");
                fs::write(src.join("id.txt"), format!("worker-{i}")).expect("write");
                let file = root.join(format!("w{i}.pack"));
                let out = root.join(format!("out{i}"));
                (pack(&src, &file), unpack(&file, &out), fs::read_to_string(out.join("id.txt")))
            })
        })
        .collect();

    for (i, worker) in workers.into_iter().enumerate() {
        let (packed, unpacked, body) = worker.join().expect("join");
        assert_eq!((packed, unpacked), (0, 0));
        assert_eq!(body.expect("read back"), format!("worker-{i}"));
    }
}
