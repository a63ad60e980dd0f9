use std::sync::Arc;

use rewofs::message::open_flags;

use crate::common::{vpath, Harness};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn ten_writers_rewriting_their_own_files_all_succeed() {
    let harness = Harness::start().await;
    let payload = vec![b'a'; 1024];

    let mut writers = Vec::new();
    for n in 0..10 {
        let remote = Arc::clone(&harness.remote);
        let payload = payload.clone();
        writers.push(tokio::spawn(async move {
            let path = vpath(&format!("/f{n}"));
            let (fh, _) = remote
                .create(&path, open_flags::WRITE | open_flags::CREATE, 0o644)
                .await
                .expect("create");
            for _ in 0..1000 {
                let written = remote.write(fh, 0, &payload).await.expect("write");
                assert_eq!(written, 1024);
            }
            remote.release(fh).await.expect("release");
        }));
    }
    for writer in writers {
        writer.await.expect("writer task");
    }

    for n in 0..10 {
        let name = format!("f{n}");
        let attr = harness.remote.getattr(&vpath(&format!("/f{n}"))).await.expect("stat");
        let (mtime, _, size) = harness.server_stat(&name);
        assert_eq!(size, 1024, "server size of {name}");
        assert_eq!(attr.size, 1024, "client size of {name}");
        assert_eq!(attr.mtime, mtime, "mtime of {name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_stats_for_one_cold_path_agree() {
    let harness = Harness::start().await;
    std::fs::write(harness.server_path("shared"), b"....").expect("seed");

    let mut stats = Vec::new();
    for _ in 0..32 {
        let remote = Arc::clone(&harness.remote);
        stats.push(tokio::spawn(async move {
            remote.getattr(&vpath("/shared")).await.expect("stat")
        }));
    }
    let (mtime, _, size) = harness.server_stat("shared");
    for stat in stats {
        let attr = stat.await.expect("stat task");
        assert_eq!(attr.size, size);
        assert_eq!(attr.mtime, mtime);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn independent_handles_interleave_reads_and_writes() {
    let harness = Harness::start().await;
    let remote = &harness.remote;
    std::fs::write(harness.server_path("left"), b"llll").expect("seed");
    std::fs::write(harness.server_path("right"), b"rrrr").expect("seed");

    let left = remote
        .open(&vpath("/left"), open_flags::READ | open_flags::WRITE, 0)
        .await
        .expect("open left");
    let right = remote
        .open(&vpath("/right"), open_flags::READ | open_flags::WRITE, 0)
        .await
        .expect("open right");

    remote.write(left, 0, b"LL").await.expect("write left");
    remote.write(right, 2, b"RR").await.expect("write right");
    assert_eq!(remote.read(left, 0, 4).await.expect("read left"), b"LLll");
    assert_eq!(remote.read(right, 0, 4).await.expect("read right"), b"rrRR");

    remote.release(left).await.expect("release left");
    remote.release(right).await.expect("release right");
    assert_eq!(remote.release(left).await.unwrap_err(), libc::EBADF);
}
