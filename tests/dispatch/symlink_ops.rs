use rewofs::message::{FileKind, Request, Response};

use crate::common::{expect_errno, vpath, Fixture};

async fn read_link(fixture: &Fixture, path: &str) -> Response {
    fixture.fs.handle(Request::ReadLink { path: vpath(path) }).await
}

#[tokio::test]
async fn symlink_then_readlink_round_trips() {
    let fixture = Fixture::new();
    let request = Request::SymLink { path: vpath("/lnk"), target: b"a/b/target".to_vec() };
    match fixture.fs.handle(request).await {
        Response::Node { attr, .. } => assert_eq!(attr.kind, FileKind::Symlink),
        other => panic!("expected node attributes, got {other:?}"),
    }

    match read_link(&fixture, "/lnk").await {
        Response::Target { target } => assert_eq!(target, b"a/b/target"),
        other => panic!("expected a target, got {other:?}"),
    }

    let on_disk = std::fs::read_link(fixture.path("lnk")).expect("host readlink");
    assert_eq!(on_disk.as_os_str(), "a/b/target");
}

#[tokio::test]
async fn readlink_truncates_at_1024_bytes() {
    let fixture = Fixture::new();
    let long = "abcd".repeat(256) + "efgh";
    std::os::unix::fs::symlink(&long, fixture.path("lnk5")).expect("fixture symlink");

    match read_link(&fixture, "/lnk5").await {
        Response::Target { target } => {
            assert_eq!(target.len(), 1024);
            assert_eq!(target, "abcd".repeat(256).into_bytes());
        }
        other => panic!("expected a target, got {other:?}"),
    }
}

#[tokio::test]
async fn readlink_of_non_symlinks_is_einval() {
    let fixture = Fixture::new();
    fixture.write_file("plain", b"");
    assert_eq!(expect_errno(read_link(&fixture, "/plain").await), libc::EINVAL);
}

#[tokio::test]
async fn symlink_over_an_existing_name_is_eexist() {
    let fixture = Fixture::new();
    fixture.write_file("taken", b"");
    let request = Request::SymLink { path: vpath("/taken"), target: b"x".to_vec() };
    assert_eq!(expect_errno(fixture.fs.handle(request).await), libc::EEXIST);
}
