use std::path::PathBuf;

use rewofs::message::{Attributes, Request, Response};
use rewofs::path::VirtualPath;
use rewofs::server::Dispatcher;
use tempfile::TempDir;

pub struct Fixture {
    pub tempdir: TempDir,
    pub fs: Dispatcher,
}

impl Fixture {
    pub fn new() -> Self {
        let tempdir = TempDir::new().expect("create temp dir");
        let root = tempdir.path().canonicalize().expect("canonicalize root");
        let fs = Dispatcher::new(root);
        Self { tempdir, fs }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.tempdir.path().join(name)
    }

    pub fn write_file(&self, name: &str, data: &[u8]) {
        std::fs::write(self.path(name), data).expect("write fixture file");
    }

    pub fn create_dir(&self, name: &str) {
        std::fs::create_dir(self.path(name)).expect("create fixture dir");
    }

    pub async fn stat(&self, path: &str) -> Response {
        self.fs.handle(Request::Stat { path: vpath(path) }).await
    }
}

pub fn vpath(path: &str) -> VirtualPath {
    VirtualPath::from_wire(path.to_owned()).expect("virtual path")
}

pub fn expect_attr(response: Response) -> Attributes {
    match response {
        Response::Attr { attr } => attr,
        other => panic!("expected attributes, got {other:?}"),
    }
}

pub fn expect_errno(response: Response) -> i32 {
    match response {
        Response::Error { errno } => errno,
        other => panic!("expected an errno, got {other:?}"),
    }
}
