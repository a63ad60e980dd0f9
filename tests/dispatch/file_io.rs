use rewofs::message::{open_flags, FileKind, Request, Response};

use crate::common::{expect_errno, vpath, Fixture};

async fn open(fixture: &Fixture, path: &str, flags: u32, mode: u32) -> u64 {
    let request = Request::Open { path: vpath(path), flags, mode };
    match fixture.fs.handle(request).await {
        Response::Opened { handle, .. } => handle,
        other => panic!("expected an open handle, got {other:?}"),
    }
}

async fn read(fixture: &Fixture, handle: u64, offset: u64, len: u32) -> Vec<u8> {
    match fixture.fs.handle(Request::Read { handle, offset, len }).await {
        Response::Data { data } => data,
        other => panic!("expected data, got {other:?}"),
    }
}

#[tokio::test]
async fn create_write_read_close_round_trip() {
    let fixture = Fixture::new();
    let request = Request::Create {
        path: vpath("/new.txt"),
        flags: open_flags::READ | open_flags::WRITE,
        mode: 0o644,
    };
    let (handle, attr) = match fixture.fs.handle(request).await {
        Response::Created { handle, attr, .. } => (handle, attr),
        other => panic!("expected a created handle, got {other:?}"),
    };
    assert_eq!(attr.kind, FileKind::Regular);
    assert_eq!(attr.size, 0);

    let request = Request::Write { handle, offset: 0, data: b"hello".to_vec() };
    match fixture.fs.handle(request).await {
        Response::Written { written, attr } => {
            assert_eq!(written, 5);
            assert_eq!(attr.size, 5);
        }
        other => panic!("expected a write result, got {other:?}"),
    }

    assert_eq!(read(&fixture, handle, 0, 16).await, b"hello");
    assert_eq!(std::fs::read(fixture.path("new.txt")).expect("read back"), b"hello");

    let response = fixture.fs.handle(Request::Close { handle }).await;
    assert!(matches!(response, Response::Unit));
}

#[tokio::test]
async fn sparse_writes_zero_fill_the_gap() {
    let fixture = Fixture::new();
    fixture.write_file("f", b"");
    let handle =
        open(&fixture, "/f", open_flags::READ | open_flags::WRITE, 0).await;

    let request = Request::Write { handle, offset: 1000, data: b"abc".to_vec() };
    fixture.fs.handle(request).await;
    let request = Request::Write { handle, offset: 2000, data: b"efg".to_vec() };
    fixture.fs.handle(request).await;

    let mut expected = vec![0u8; 1000];
    expected.extend_from_slice(b"abc");
    expected.extend_from_slice(&vec![0u8; 997]);
    expected.extend_from_slice(b"efg");
    assert_eq!(std::fs::read(fixture.path("f")).expect("read back"), expected);

    let got = read(&fixture, handle, 950, 100).await;
    assert_eq!(&got[..50], &[0u8; 50][..]);
    assert_eq!(&got[50..53], b"abc");
}

#[tokio::test]
async fn reads_shorten_at_end_of_file() {
    let fixture = Fixture::new();
    fixture.write_file("f", b"abc");
    let handle = open(&fixture, "/f", open_flags::READ, 0).await;

    assert_eq!(read(&fixture, handle, 0, 100).await, b"abc");
    assert_eq!(read(&fixture, handle, 2, 100).await, b"c");
    assert_eq!(read(&fixture, handle, 3, 100).await, b"");
    assert_eq!(read(&fixture, handle, 1000, 100).await, b"");
}

#[tokio::test]
async fn truncate_on_open_empties_the_file() {
    let fixture = Fixture::new();
    fixture.write_file("f", b"previous content");
    open(&fixture, "/f", open_flags::WRITE | open_flags::TRUNCATE, 0).await;
    assert_eq!(std::fs::read(fixture.path("f")).expect("read back"), b"");
}

#[tokio::test]
async fn exclusive_create_fails_on_existing_files() {
    let fixture = Fixture::new();
    fixture.write_file("f", b"");
    let request = Request::Open {
        path: vpath("/f"),
        flags: open_flags::WRITE | open_flags::CREATE | open_flags::EXCLUSIVE,
        mode: 0o644,
    };
    let response = fixture.fs.handle(request).await;
    assert_eq!(expect_errno(response), libc::EEXIST);
}

#[tokio::test]
async fn open_without_create_requires_the_file() {
    let fixture = Fixture::new();
    let response =
        fixture.fs.handle(Request::Open { path: vpath("/nope"), flags: open_flags::READ, mode: 0 }).await;
    assert_eq!(expect_errno(response), libc::ENOENT);
}

#[tokio::test]
async fn unknown_handles_are_ebadf() {
    let fixture = Fixture::new();
    fixture.write_file("f", b"x");

    let response = fixture.fs.handle(Request::Read { handle: 404, offset: 0, len: 1 }).await;
    assert_eq!(expect_errno(response), libc::EBADF);

    let response =
        fixture.fs.handle(Request::Write { handle: 404, offset: 0, data: b"y".to_vec() }).await;
    assert_eq!(expect_errno(response), libc::EBADF);

    let handle = open(&fixture, "/f", open_flags::READ, 0).await;
    assert!(matches!(fixture.fs.handle(Request::Close { handle }).await, Response::Unit));
    let response = fixture.fs.handle(Request::Close { handle }).await;
    assert_eq!(expect_errno(response), libc::EBADF);
}

#[tokio::test]
async fn close_session_drops_every_handle() {
    let fixture = Fixture::new();
    fixture.write_file("f", b"x");
    let handle = open(&fixture, "/f", open_flags::READ, 0).await;
    fixture.fs.close_session();
    let response = fixture.fs.handle(Request::Read { handle, offset: 0, len: 1 }).await;
    assert_eq!(expect_errno(response), libc::EBADF);
}

#[tokio::test]
async fn reads_and_writes_are_positional() {
    let fixture = Fixture::new();
    fixture.write_file("f", b"0123456789");
    let handle = open(&fixture, "/f", open_flags::READ | open_flags::WRITE, 0).await;

    // Interleave without any seek state on the handle.
    fixture.fs.handle(Request::Write { handle, offset: 4, data: b"XY".to_vec() }).await;
    assert_eq!(read(&fixture, handle, 0, 10).await, b"0123XY6789");
    assert_eq!(read(&fixture, handle, 4, 2).await, b"XY");
}
