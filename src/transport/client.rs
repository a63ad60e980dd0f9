//! Client side of the transport: one connection carrying correlated
//! request/reply traffic plus the server's invalidation stream.
//!
//! A reader task demultiplexes replies onto per-call oneshot channels by
//! correlation id and hands events to an [`EventSink`] in arrival order. A
//! writer task drains the outbox. When the connection drops, every pending
//! call fails, the sink is reset (the cache restarts from cold) and a
//! supervisor reconnects with exponential backoff.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Endpoint, Stream};
use crate::message::{Invalidation, Request, Response, ServerMessage};
use crate::wire;

/// Consumer of server-originated invalidation events.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync + 'static {
    /// Called for each inbound notification, in arrival order.
    async fn deliver(&self, event: Invalidation);

    /// Called when the connection is lost; cached state must be discarded.
    async fn reset(&self);
}

/// Reconnection backoff bounds.
#[derive(Debug, Copy, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { initial_delay: Duration::from_millis(100), max_delay: Duration::from_secs(5) }
    }
}

/// A call failed locally; the remote never produced a response.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Disconnected;

impl fmt::Display for Disconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport disconnected")
    }
}

struct Shared {
    pending: DashMap<u64, oneshot::Sender<Response>>,
    next_id: AtomicU64,
    outbox: RwLock<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl Shared {
    fn fail_pending(&self) {
        // Dropping the senders wakes every waiter with a closed-channel
        // error, which `call` surfaces as `Disconnected`.
        self.pending.clear();
    }
}

/// Correlated RPC channel to one server.
pub struct RpcClient {
    shared: Arc<Shared>,
    supervisor: JoinHandle<()>,
}

impl RpcClient {
    /// Connects to the endpoint and spawns the session supervisor.
    ///
    /// The first connection attempt fails fast so startup errors are
    /// visible; later disconnects are retried with backoff.
    pub async fn connect(
        endpoint: Endpoint,
        sink: Arc<dyn EventSink>,
        policy: ReconnectPolicy,
    ) -> io::Result<Self> {
        let stream = Stream::connect(&endpoint).await?;
        info!(%endpoint, "connected");
        let shared = Arc::new(Shared {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            outbox: RwLock::new(None),
        });
        // The outbox must exist before `connect` returns, or an immediate
        // call could race the supervisor and fail spuriously.
        let (frame_send, frame_recv) = mpsc::unbounded_channel();
        *shared.outbox.write().expect("outbox lock") = Some(frame_send);
        let supervisor = tokio::spawn(supervise(
            endpoint,
            stream,
            frame_recv,
            Arc::clone(&shared),
            sink,
            policy,
        ));
        Ok(Self { shared, supervisor })
    }

    /// Sends one request and awaits its response.
    pub async fn call(&self, request: Request) -> Result<Response, Disconnected> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_send, reply_recv) = oneshot::channel();
        self.shared.pending.insert(id, reply_send);

        let sent = {
            let outbox = self.shared.outbox.read().expect("outbox lock");
            match outbox.as_ref() {
                Some(sender) => sender.send(wire::encode_call(id, &request)).is_ok(),
                None => false,
            }
        };
        if !sent {
            self.shared.pending.remove(&id);
            return Err(Disconnected);
        }

        reply_recv.await.map_err(|_| Disconnected)
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.supervisor.abort();
        self.shared.fail_pending();
    }
}

async fn supervise(
    endpoint: Endpoint,
    first: Stream,
    first_outbox: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<Shared>,
    sink: Arc<dyn EventSink>,
    policy: ReconnectPolicy,
) {
    let mut stream = first;
    let mut outbox = first_outbox;
    loop {
        run_session(stream, outbox, &shared, sink.as_ref()).await;
        shared.fail_pending();
        sink.reset().await;

        let mut delay = policy.initial_delay;
        stream = loop {
            warn!(%endpoint, ?delay, "connection lost, reconnecting");
            tokio::time::sleep(delay).await;
            match Stream::connect(&endpoint).await {
                Ok(stream) => {
                    info!(%endpoint, "reconnected");
                    break stream;
                }
                Err(err) => {
                    debug!(%endpoint, %err, "reconnect attempt failed");
                    delay = (delay * 2).min(policy.max_delay);
                }
            }
        };
        let (frame_send, frame_recv) = mpsc::unbounded_channel();
        *shared.outbox.write().expect("outbox lock") = Some(frame_send);
        outbox = frame_recv;
    }
}

/// Runs one established session to completion (socket or protocol failure).
async fn run_session(
    stream: Stream,
    mut frame_recv: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: &Shared,
    sink: &dyn EventSink,
) {
    let (mut read, mut write) = stream.into_split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_recv.recv().await {
            if let Err(err) = wire::write_frame(&mut write, &frame).await {
                debug!(%err, "write side closed");
                break;
            }
        }
    });

    loop {
        let payload = match wire::read_frame(&mut read).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                info!("server closed the connection");
                break;
            }
            Err(err) => {
                error!(%err, "session failed");
                break;
            }
        };
        match wire::decode_server_message(&payload) {
            Ok(ServerMessage::Reply { id, response }) => {
                match shared.pending.remove(&id) {
                    Some((_, sender)) => {
                        // The caller may have given up; a dead receiver is fine.
                        let _ = sender.send(response);
                    }
                    None => {
                        error!(id, "reply with unknown correlation id");
                        break;
                    }
                }
            }
            Ok(ServerMessage::Event(event)) => sink.deliver(event).await,
            Err(err) => {
                error!(%err, "malformed server message");
                break;
            }
        }
    }

    *shared.outbox.write().expect("outbox lock") = None;
    writer.abort();
}
