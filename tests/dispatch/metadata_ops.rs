use std::os::unix::fs::MetadataExt;

use rewofs::message::{FileTime, Request};

use crate::common::{expect_attr, expect_errno, vpath, Fixture};

#[tokio::test]
async fn stat_mirrors_lstat_exactly() {
    let fixture = Fixture::new();
    fixture.write_file("data", b"abc");

    let attr = expect_attr(fixture.stat("/data").await);
    let meta = std::fs::symlink_metadata(fixture.path("data")).expect("lstat");
    assert_eq!(attr.size, meta.len());
    assert_eq!(attr.mode, meta.mode());
    assert_eq!(attr.mtime.secs, meta.mtime());
    assert_eq!(attr.mtime.nanos, meta.mtime_nsec() as u32);
    assert_eq!(attr.ctime.secs, meta.ctime());
    assert_eq!(attr.ctime.nanos, meta.ctime_nsec() as u32);
}

#[tokio::test]
async fn stat_does_not_follow_symlinks() {
    let fixture = Fixture::new();
    std::os::unix::fs::symlink("/nonexistent/target", fixture.path("dangling"))
        .expect("fixture symlink");
    let attr = expect_attr(fixture.stat("/dangling").await);
    assert_eq!(attr.kind, rewofs::message::FileKind::Symlink);
}

#[tokio::test]
async fn stat_of_a_missing_path_is_enoent() {
    let fixture = Fixture::new();
    assert_eq!(expect_errno(fixture.stat("/nope").await), libc::ENOENT);
}

#[tokio::test]
async fn chmod_changes_the_mode_bits() {
    let fixture = Fixture::new();
    fixture.write_file("f", b"");
    let attr =
        expect_attr(fixture.fs.handle(Request::ChMod { path: vpath("/f"), mode: 0o640 }).await);
    assert_eq!(attr.mode & 0o7777, 0o640);
    let meta = std::fs::symlink_metadata(fixture.path("f")).expect("lstat");
    assert_eq!(meta.mode() & 0o7777, 0o640);

    let response = fixture.fs.handle(Request::ChMod { path: vpath("/gone"), mode: 0o640 }).await;
    assert_eq!(expect_errno(response), libc::ENOENT);
}

#[tokio::test]
async fn truncate_grows_and_shrinks() {
    let fixture = Fixture::new();
    fixture.write_file("f", b"abcdef");

    let attr =
        expect_attr(fixture.fs.handle(Request::Truncate { path: vpath("/f"), size: 3 }).await);
    assert_eq!(attr.size, 3);
    assert_eq!(std::fs::read(fixture.path("f")).expect("read back"), b"abc");

    let attr =
        expect_attr(fixture.fs.handle(Request::Truncate { path: vpath("/f"), size: 8 }).await);
    assert_eq!(attr.size, 8);
    assert_eq!(std::fs::read(fixture.path("f")).expect("read back"), b"abc\0\0\0\0\0");

    let response = fixture.fs.handle(Request::Truncate { path: vpath("/gone"), size: 0 }).await;
    assert_eq!(expect_errno(response), libc::ENOENT);

    fixture.create_dir("d");
    let response = fixture.fs.handle(Request::Truncate { path: vpath("/d"), size: 0 }).await;
    assert_eq!(expect_errno(response), libc::EISDIR);
}

#[tokio::test]
async fn set_times_applies_the_given_stamps() {
    let fixture = Fixture::new();
    fixture.write_file("f", b"");
    let mtime = FileTime { secs: 1_500_000_000, nanos: 250_000_000 };
    let request = Request::SetTimes { path: vpath("/f"), atime: None, mtime: Some(mtime) };
    let attr = expect_attr(fixture.fs.handle(request).await);
    assert_eq!(attr.mtime, mtime);

    let meta = std::fs::symlink_metadata(fixture.path("f")).expect("lstat");
    assert_eq!(meta.mtime(), 1_500_000_000);
    assert_eq!(meta.mtime_nsec(), 250_000_000);
}
