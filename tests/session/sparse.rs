use rewofs::message::open_flags;

use crate::common::{vpath, Harness};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sparse_writes_read_back_with_zero_filled_gaps() {
    let harness = Harness::start().await;
    let remote = &harness.remote;

    let (fh, _) = remote
        .create(&vpath("/f"), open_flags::READ | open_flags::WRITE | open_flags::CREATE, 0o644)
        .await
        .expect("create");

    remote.write(fh, 1000, b"abc").await.expect("write at 1000");

    // A read across the gap sees fifty zeros, then the payload, then EOF.
    let got = remote.read(fh, 950, 100).await.expect("read 950..1050");
    assert_eq!(got.len(), 53);
    assert_eq!(&got[..50], &[0u8; 50][..]);
    assert_eq!(&got[50..], b"abc");

    remote.write(fh, 2000, b"efg").await.expect("write at 2000");
    remote.release(fh).await.expect("release");

    let mut expected = vec![0u8; 1000];
    expected.extend_from_slice(b"abc");
    expected.extend_from_slice(&vec![0u8; 997]);
    expected.extend_from_slice(b"efg");
    assert_eq!(std::fs::read(harness.server_path("f")).expect("server bytes"), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_reads_match_server_bytes_at_odd_offsets() {
    let harness = Harness::start().await;
    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    std::fs::write(harness.server_path("blob"), &payload).expect("seed");

    let fh = harness
        .remote
        .open(&vpath("/blob"), open_flags::READ, 0)
        .await
        .expect("open");
    for (offset, len) in [(0u64, 10_000u32), (1, 17), (4095, 2), (9_990, 100), (10_000, 5)] {
        let got = harness.remote.read(fh, offset, len).await.expect("read");
        let end = payload.len().min(offset as usize + len as usize);
        let want = &payload[(offset as usize).min(payload.len())..end];
        assert_eq!(got, want, "range {offset}+{len}");
    }
    harness.remote.release(fh).await.expect("release");
}
