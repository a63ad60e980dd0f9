//! Spins up a real server on a loopback socket and connects a client
//! session to it. Exercises everything except the kernel mount itself.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rewofs::client::Remote;
use rewofs::config::Settings;
use rewofs::message::FileTime;
use rewofs::path::VirtualPath;
use rewofs::server::{self, ChangeWatcher};
use rewofs::transport::{Endpoint, Listener};
use tempfile::TempDir;
use tokio::sync::broadcast;

pub struct Harness {
    pub tempdir: TempDir,
    pub remote: Arc<Remote>,
    _watcher: ChangeWatcher,
}

impl Harness {
    pub async fn start() -> Self {
        let tempdir = TempDir::new().expect("create temp dir");
        let root = tempdir.path().canonicalize().expect("canonicalize root");

        let endpoint: Endpoint = "tcp://127.0.0.1:0".parse().expect("endpoint");
        let listener = Listener::bind(&endpoint).await.expect("bind");
        let endpoint = listener.local_endpoint().expect("bound endpoint");

        let (events, _) = broadcast::channel(1024);
        let watcher =
            ChangeWatcher::spawn(root.clone(), events.clone(), Duration::from_millis(50))
                .expect("watch the export");
        tokio::spawn(server::serve_on(listener, root, events));

        let remote = Remote::connect(endpoint, &Settings::default())
            .await
            .expect("connect to the server");
        Self { tempdir, remote: Arc::new(remote), _watcher: watcher }
    }

    pub fn server_path(&self, name: &str) -> PathBuf {
        self.tempdir.path().join(name)
    }

    /// The server-side lstat (mtime, ctime, size) for equality checks.
    pub fn server_stat(&self, name: &str) -> (FileTime, FileTime, u64) {
        use std::os::unix::fs::MetadataExt;
        let meta =
            std::fs::symlink_metadata(self.server_path(name)).expect("server-side lstat");
        (
            FileTime { secs: meta.mtime(), nanos: meta.mtime_nsec() as u32 },
            FileTime { secs: meta.ctime(), nanos: meta.ctime_nsec() as u32 },
            meta.len(),
        )
    }

}

/// Polls until `check` passes; invalidations must land within a second.
pub async fn eventually<Fut>(what: &str, mut check: impl FnMut() -> Fut)
where
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..40 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("{what} did not become true within the notification budget");
}

pub fn vpath(path: &str) -> VirtualPath {
    VirtualPath::from_wire(path.to_owned()).expect("virtual path")
}
