use rewofs::message::{FileKind, Request, Response};

use crate::common::{expect_attr, expect_errno, vpath, Fixture};

#[tokio::test]
async fn readdir_lists_every_entry_with_lstat_attrs() {
    let fixture = Fixture::new();
    fixture.create_dir("sub");
    fixture.write_file("data", b"abc");
    std::os::unix::fs::symlink("data", fixture.path("lnk")).expect("fixture symlink");

    let response = fixture.fs.handle(Request::ReadDir { path: vpath("/") }).await;
    let mut entries = match response {
        Response::Directory { entries } => entries,
        other => panic!("expected a listing, got {other:?}"),
    };
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, ["data", "lnk", "sub"]);
    assert_eq!(entries[0].attr.kind, FileKind::Regular);
    assert_eq!(entries[0].attr.size, 3);
    assert_eq!(entries[1].attr.kind, FileKind::Symlink);
    assert_eq!(entries[2].attr.kind, FileKind::Directory);

    let meta = std::fs::symlink_metadata(fixture.path("data")).expect("lstat data");
    use std::os::unix::fs::MetadataExt;
    assert_eq!(entries[0].attr.mtime.secs, meta.mtime());
    assert_eq!(entries[0].attr.mtime.nanos, meta.mtime_nsec() as u32);
}

#[tokio::test]
async fn readdir_of_a_file_is_enotdir() {
    let fixture = Fixture::new();
    fixture.write_file("f", b"");
    let response = fixture.fs.handle(Request::ReadDir { path: vpath("/f") }).await;
    assert_eq!(expect_errno(response), libc::ENOTDIR);
}

#[tokio::test]
async fn mkdir_honors_mode_and_restates_the_parent() {
    let fixture = Fixture::new();
    let response = fixture.fs.handle(Request::MkDir { path: vpath("/d"), mode: 0o710 }).await;
    let (attr, parent) = match response {
        Response::Node { attr, parent } => (attr, parent),
        other => panic!("expected node attributes, got {other:?}"),
    };
    assert_eq!(attr.kind, FileKind::Directory);
    assert_eq!(attr.mode & 0o7777, 0o710);
    assert_eq!(parent.kind, FileKind::Directory);

    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::symlink_metadata(fixture.tempdir.path()).expect("lstat root");
    assert_eq!(parent.mtime.secs, meta.mtime());
}

#[tokio::test]
async fn mkdir_failures_carry_posix_errnos() {
    let fixture = Fixture::new();
    fixture.create_dir("taken");

    let response = fixture.fs.handle(Request::MkDir { path: vpath("/taken"), mode: 0o755 }).await;
    assert_eq!(expect_errno(response), libc::EEXIST);

    let response =
        fixture.fs.handle(Request::MkDir { path: vpath("/missing/child"), mode: 0o755 }).await;
    assert_eq!(expect_errno(response), libc::ENOENT);
}

#[tokio::test]
async fn rmdir_maps_kernel_failures_verbatim() {
    let fixture = Fixture::new();
    fixture.create_dir("full");
    fixture.write_file("full/inner", b"x");
    fixture.write_file("plain", b"");

    let response = fixture.fs.handle(Request::RmDir { path: vpath("/full") }).await;
    assert_eq!(expect_errno(response), libc::ENOTEMPTY);

    let response = fixture.fs.handle(Request::RmDir { path: vpath("/plain") }).await;
    assert_eq!(expect_errno(response), libc::ENOTDIR);

    std::fs::remove_file(fixture.path("full/inner")).expect("empty the dir");
    let response = fixture.fs.handle(Request::RmDir { path: vpath("/full") }).await;
    assert!(matches!(response, Response::Removed { .. }));
    assert!(!fixture.path("full").exists());
}

#[tokio::test]
async fn unlink_refuses_directories() {
    let fixture = Fixture::new();
    fixture.create_dir("d");
    let response = fixture.fs.handle(Request::Unlink { path: vpath("/d") }).await;
    assert_eq!(expect_errno(response), libc::EISDIR);
}

#[tokio::test]
async fn escaping_paths_are_refused_with_eacces() {
    let fixture = Fixture::new();
    for path in ["/../etc", "/a/../../etc", "/.."] {
        let response = fixture.stat(path).await;
        assert_eq!(expect_errno(response), libc::EACCES, "path {path}");
    }
    // Plain dots inside the tree are harmless.
    fixture.write_file("ok", b"");
    let attr = expect_attr(fixture.stat("/./ok").await);
    assert_eq!(attr.kind, FileKind::Regular);
}
