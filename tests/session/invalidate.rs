use std::sync::Arc;

use rewofs::message::FileKind;

use crate::common::{eventually, vpath, Harness};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_mkdir_becomes_visible_within_a_second() {
    let harness = Harness::start().await;
    let remote = Arc::clone(&harness.remote);

    // Prime the cache so the new names must come from invalidation, not
    // from a cold lookup.
    assert!(remote.readdir(&vpath("/")).await.expect("listing").is_empty());
    assert_eq!(remote.getattr(&vpath("/x")).await.unwrap_err(), libc::ENOENT);

    std::fs::create_dir(harness.server_path("x")).expect("external mkdir");
    std::fs::create_dir_all(harness.server_path("a/b")).expect("external makedirs");

    let probe = Arc::clone(&remote);
    eventually("new directories visible", move || {
        let remote = Arc::clone(&probe);
        async move {
            matches!(
                remote.getattr(&vpath("/x")).await,
                Ok(attr) if attr.kind == FileKind::Directory
            ) && matches!(
                remote.getattr(&vpath("/a/b")).await,
                Ok(attr) if attr.kind == FileKind::Directory
            )
        }
    })
    .await;

    for path in ["/x", "/a", "/a/b"] {
        let attr = remote.getattr(&vpath(path)).await.expect(path);
        let (mtime, _, _) = harness.server_stat(&path[1..]);
        assert_eq!(attr.mtime, mtime, "mtime of {path}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_rmdir_disappears_within_a_second() {
    let harness = Harness::start().await;
    let remote = Arc::clone(&harness.remote);

    std::fs::create_dir(harness.server_path("x")).expect("seed");
    assert!(remote.getattr(&vpath("/x")).await.is_ok());

    std::fs::remove_dir(harness.server_path("x")).expect("external rmdir");

    let probe = Arc::clone(&remote);
    eventually("removed directory gone", move || {
        let remote = Arc::clone(&probe);
        async move { remote.getattr(&vpath("/x")).await == Err(libc::ENOENT) }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_file_creation_is_noticed() {
    let harness = Harness::start().await;
    let remote = Arc::clone(&harness.remote);

    assert!(remote.readdir(&vpath("/")).await.expect("listing").is_empty());

    std::fs::write(harness.server_path("fresh"), b"payload").expect("external create");

    let probe = Arc::clone(&remote);
    eventually("created file visible", move || {
        let remote = Arc::clone(&probe);
        async move {
            matches!(remote.getattr(&vpath("/fresh")).await, Ok(attr) if attr.size == 7)
        }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn external_content_changes_invalidate_cached_reads() {
    let harness = Harness::start().await;
    let remote = Arc::clone(&harness.remote);

    std::fs::write(harness.server_path("f"), b"old-bytes").expect("seed");
    let fh = remote
        .open(&vpath("/f"), rewofs::message::open_flags::READ, 0)
        .await
        .expect("open");
    assert_eq!(remote.read(fh, 0, 9).await.expect("read"), b"old-bytes");

    std::fs::write(harness.server_path("f"), b"NEW-BYTES").expect("external rewrite");

    let probe = Arc::clone(&remote);
    eventually("cached content replaced", move || {
        let remote = Arc::clone(&probe);
        async move { remote.read(fh, 0, 9).await.as_deref() == Ok(&b"NEW-BYTES"[..]) }
    })
    .await;

    remote.release(fh).await.expect("release");
}
