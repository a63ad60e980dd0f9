//! Server: accept loop and per-connection session tasks.
//!
//! Each connection is split into a reader, per-request dispatch tasks and a
//! single writer draining an outbox channel, so many requests can be in
//! flight and replies may leave in any order. A forwarder per connection
//! fans the watcher's invalidation events into the same outbox.

mod dispatch;
mod handles;
mod watcher;

pub use dispatch::{attributes_of, errno_of, Dispatcher};
pub use watcher::ChangeWatcher;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::message::Invalidation;
use crate::transport::{Endpoint, Listener, ReadHalf, Stream, WriteHalf};
use crate::wire;

/// Capacity of the per-connection invalidation fan-out.
const EVENT_QUEUE_LEN: usize = 1024;

/// Binds the endpoint, starts the change watcher and serves forever.
pub async fn serve(root: PathBuf, endpoint: &Endpoint, settings: &Settings) -> io::Result<()> {
    let root = root.canonicalize()?;
    let listener = Listener::bind(endpoint).await?;
    info!(root = %root.display(), %endpoint, "serving");

    let (events, _) = broadcast::channel(EVENT_QUEUE_LEN);
    let window = Duration::from_millis(settings.watch.coalesce_window_ms);
    let _watcher = ChangeWatcher::spawn(root.clone(), events.clone(), window)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    serve_on(listener, root, events).await
}

/// Accepts connections forever on an already-bound listener.
pub async fn serve_on(
    listener: Listener,
    root: PathBuf,
    events: broadcast::Sender<Invalidation>,
) -> io::Result<()> {
    loop {
        let stream = listener.accept().await?;
        process_socket(stream, root.clone(), events.subscribe());
    }
}

fn process_socket(stream: Stream, root: PathBuf, events: broadcast::Receiver<Invalidation>) {
    let (readhalf, writehalf) = stream.into_split();

    let (reply_send, reply_recv) = mpsc::unbounded_channel::<Vec<u8>>();
    let dispatcher = Arc::new(Dispatcher::new(root));

    tokio::spawn(async move {
        let forwarder = EventForwarder::spawn(events, reply_send.clone());
        let writer = SessionWriter::spawn(writehalf, reply_recv);

        SessionReader { readhalf, dispatcher: Arc::clone(&dispatcher), reply_send }.run().await;

        // The client is gone: release its descriptors and stop the event
        // stream. In-flight dispatch tasks run to completion; their replies
        // drain into the writer, which exits once the last sender drops.
        dispatcher.close_session();
        forwarder.abort();
        drop(writer);
    });
}

/// Reads framed calls from the connection and spawns one dispatch task per
/// request, so slow operations never block the stream.
struct SessionReader {
    readhalf: ReadHalf,
    dispatcher: Arc<Dispatcher>,
    reply_send: mpsc::UnboundedSender<Vec<u8>>,
}

impl SessionReader {
    async fn run(mut self) {
        loop {
            let payload = match wire::read_frame(&mut self.readhalf).await {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    debug!("client closed the connection");
                    return;
                }
                Err(err) => {
                    warn!(%err, "dropping session");
                    return;
                }
            };
            let call = match wire::decode_call(&payload) {
                Ok(call) => call,
                Err(err) => {
                    warn!(%err, "malformed call, dropping session");
                    return;
                }
            };
            let dispatcher = Arc::clone(&self.dispatcher);
            let reply_send = self.reply_send.clone();
            tokio::spawn(async move {
                let response = dispatcher.handle(call.request).await;
                // A closed outbox just means the session ended mid-call.
                let _ = reply_send.send(wire::encode_reply(call.id, &response));
            });
        }
    }
}

/// Forwards published invalidations into the connection's outbox.
struct EventForwarder {
    events: broadcast::Receiver<Invalidation>,
    reply_send: mpsc::UnboundedSender<Vec<u8>>,
}

impl EventForwarder {
    fn spawn(
        events: broadcast::Receiver<Invalidation>,
        reply_send: mpsc::UnboundedSender<Vec<u8>>,
    ) -> JoinHandle<()> {
        tokio::spawn(Self { events, reply_send }.run())
    }

    async fn run(mut self) {
        loop {
            match self.events.recv().await {
                Ok(event) => {
                    if self.reply_send.send(wire::encode_event(&event)).is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "invalidation stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

/// Writes outbox frames to the connection.
struct SessionWriter {
    writehalf: WriteHalf,
    reply_recv: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl SessionWriter {
    fn spawn(writehalf: WriteHalf, reply_recv: mpsc::UnboundedReceiver<Vec<u8>>) -> JoinHandle<()> {
        tokio::spawn(Self { writehalf, reply_recv }.run())
    }

    async fn run(mut self) {
        while let Some(frame) = self.reply_recv.recv().await {
            if let Err(err) = wire::write_frame(&mut self.writehalf, &frame).await {
                debug!(%err, "write side closed");
                return;
            }
        }
    }
}
