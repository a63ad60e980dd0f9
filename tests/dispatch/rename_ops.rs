use rewofs::message::{Request, Response};

use crate::common::{expect_errno, vpath, Fixture};

async fn rename(fixture: &Fixture, from: &str, to: &str) -> Response {
    fixture.fs.handle(Request::Rename { from: vpath(from), to: vpath(to) }).await
}

#[tokio::test]
async fn rename_moves_files_between_directories() {
    let fixture = Fixture::new();
    fixture.create_dir("dest");
    fixture.write_file("old.txt", b"renamed");

    match rename(&fixture, "/old.txt", "/dest/new.txt").await {
        Response::Renamed { from_parent, to_parent } => {
            use std::os::unix::fs::MetadataExt;
            let root = std::fs::symlink_metadata(fixture.tempdir.path()).expect("lstat root");
            assert_eq!(from_parent.mtime.secs, root.mtime());
            let dest = std::fs::symlink_metadata(fixture.path("dest")).expect("lstat dest");
            assert_eq!(to_parent.mtime.secs, dest.mtime());
        }
        other => panic!("expected a rename result, got {other:?}"),
    }

    assert!(!fixture.path("old.txt").exists());
    assert_eq!(std::fs::read(fixture.path("dest/new.txt")).expect("read back"), b"renamed");
}

#[tokio::test]
async fn rename_replaces_plain_files() {
    let fixture = Fixture::new();
    fixture.write_file("a", b"fresh");
    fixture.write_file("b", b"stale");
    assert!(matches!(rename(&fixture, "/a", "/b").await, Response::Renamed { .. }));
    assert_eq!(std::fs::read(fixture.path("b")).expect("read back"), b"fresh");
}

#[tokio::test]
async fn rename_onto_a_populated_directory_fails() {
    let fixture = Fixture::new();
    fixture.create_dir("d");
    fixture.create_dir("d2");
    fixture.write_file("d2/occupant", b"");

    let errno = expect_errno(rename(&fixture, "/d", "/d2").await);
    assert!(errno == libc::ENOTEMPTY || errno == libc::EEXIST, "errno {errno}");
}

#[tokio::test]
async fn rename_across_kinds_fails() {
    let fixture = Fixture::new();
    fixture.create_dir("d");
    fixture.write_file("f", b"");

    let errno = expect_errno(rename(&fixture, "/d", "/f").await);
    assert_eq!(errno, libc::ENOTDIR);

    let errno = expect_errno(rename(&fixture, "/f", "/d").await);
    assert_eq!(errno, libc::EISDIR);
}

#[tokio::test]
async fn rename_into_a_missing_parent_fails() {
    let fixture = Fixture::new();
    fixture.create_dir("x");
    let errno = expect_errno(rename(&fixture, "/x", "/a/b/c").await);
    assert_eq!(errno, libc::ENOENT);
}
