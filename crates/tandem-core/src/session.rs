//! Session: the entry point for all bridge operations.
//!
//! A [`Session`] is an explicit, caller-owned object; nothing here is
//! process-global, and multiple sessions (even to different engines) can
//! coexist. Each session owns:
//!
//! - the transport connection to the engine,
//! - one router task multiplexing request replies, committed edits and
//!   cursor traffic onto their consumers,
//! - a registry mapping buffer path to its live [`BufferController`]
//!   (at most one per path),
//! - the session-wide cursor relay.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Session                                                     │
//! │  ├── router task: Connection <-> {replies, edits, cursors}   │
//! │  ├── registry: path -> BufferController (one worker each)    │
//! │  └── cursor broadcast -> CursorChannel subscribers           │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::buffer::{self, BufferController, EngineEdit};
use crate::cursor::CursorChannel;
use crate::error::{BridgeError, BridgeResult};
use crate::proto::{ReplyOk, RequestOp, WireMessage};
use crate::transport::{Connection, Dialer};
use crate::types::{CursorEvent, SessionConfig, WirePosition};

/// Capacity of the router command channel
const ROUTER_QUEUE_CAPACITY: usize = 64;

/// Capacity of the cursor event broadcast channel
const CURSOR_EVENT_CAPACITY: usize = 256;

/// Commands accepted by the session router task.
pub(crate) enum RouterCmd {
    /// Send a request and deliver the engine's reply to `reply`
    Request {
        op: RequestOp,
        reply: oneshot::Sender<BridgeResult<ReplyOk>>,
    },
    /// Fire-and-forget cursor update
    Cursor {
        buffer: String,
        anchor: WirePosition,
        position: WirePosition,
    },
    /// Route committed edits for `path` to `edits`
    RegisterBuffer {
        path: String,
        edits: mpsc::UnboundedSender<EngineEdit>,
    },
    /// Stop routing committed edits for `path`
    UnregisterBuffer { path: String },
}

struct SessionInner {
    config: SessionConfig,
    peer: String,
    router_tx: mpsc::Sender<RouterCmd>,
    cursor_events: broadcast::Sender<CursorEvent>,
    /// Serializes attach/detach so the one-controller-per-path invariant
    /// cannot race; never touched by the router or any worker.
    registry: tokio::sync::Mutex<HashMap<String, BufferController>>,
}

/// A connected bridge session.
///
/// Cheap to clone; all clones share the same connection and registry.
/// The connection closes once every clone and every controller spawned
/// from it are gone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Dial the engine at `config.address` and perform the handshake.
    ///
    /// Fails with [`BridgeError::Connection`] when the address is
    /// unreachable or malformed, or when the engine does not answer the
    /// handshake.
    pub async fn connect(dialer: &impl Dialer, config: SessionConfig) -> BridgeResult<Self> {
        let mut connection = dialer.dial(&config.address).await?;

        connection.send(WireMessage::Hello {
            user: config.user.clone(),
        })?;
        let peer = match connection.recv().await {
            Some(WireMessage::Welcome { peer }) => peer,
            Some(other) => {
                return Err(BridgeError::Connection(format!(
                    "engine answered handshake with {:?}",
                    other
                )))
            }
            None => {
                return Err(BridgeError::Connection(
                    "engine closed the connection during handshake".to_string(),
                ))
            }
        };
        info!(user = %config.user, peer = %peer, address = %config.address, "session connected");

        let (router_tx, router_rx) = mpsc::channel(ROUTER_QUEUE_CAPACITY);
        let (cursor_events, _) = broadcast::channel(CURSOR_EVENT_CAPACITY);

        tokio::spawn(router_loop(connection, router_rx, cursor_events.clone()));

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                peer,
                router_tx,
                cursor_events,
                registry: tokio::sync::Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Display name this session connected with
    pub fn user(&self) -> &str {
        &self.inner.config.user
    }

    /// Peer identity assigned by the engine
    pub fn peer_id(&self) -> &str {
        &self.inner.peer
    }

    /// Create a buffer at `path` seeded with `content`.
    ///
    /// Returns the engine's accept flag. Fails with
    /// [`BridgeError::BufferExists`] when a buffer already exists there.
    pub async fn create(&self, path: &str, content: &str) -> BridgeResult<bool> {
        let reply = self
            .request(RequestOp::Create {
                path: path.to_string(),
                content: content.to_string(),
            })
            .await?;
        match reply {
            ReplyOk::Created { accepted } => Ok(accepted),
            other => Err(BridgeError::Engine(format!(
                "unexpected reply to create: {:?}",
                other
            ))),
        }
    }

    /// Attach to the buffer at `path` and return its controller.
    ///
    /// Fails with [`BridgeError::BufferNotFound`] if `path` does not
    /// exist remotely. Attaching again while a controller is live returns
    /// that same controller.
    pub async fn attach(&self, path: &str) -> BridgeResult<BufferController> {
        let mut registry = self.inner.registry.lock().await;
        if let Some(existing) = registry.get(path) {
            debug!(path = %path, "attach reused live controller");
            return Ok(existing.clone());
        }

        // Register the edit route first: the engine only starts sending
        // edits for this path after it processes the attach, so nothing
        // can arrive before the route exists.
        let (edits_tx, edits_rx) = mpsc::unbounded_channel();
        self.send_cmd(RouterCmd::RegisterBuffer {
            path: path.to_string(),
            edits: edits_tx,
        })
        .await?;

        let attached = self
            .request(RequestOp::Attach {
                path: path.to_string(),
            })
            .await;
        let (content, rev) = match attached {
            Ok(ReplyOk::Attached { content, rev }) => (content, rev),
            Ok(other) => {
                let _ = self
                    .send_cmd(RouterCmd::UnregisterBuffer {
                        path: path.to_string(),
                    })
                    .await;
                return Err(BridgeError::Engine(format!(
                    "unexpected reply to attach: {:?}",
                    other
                )));
            }
            Err(e) => {
                let _ = self
                    .send_cmd(RouterCmd::UnregisterBuffer {
                        path: path.to_string(),
                    })
                    .await;
                return Err(e);
            }
        };

        let controller = buffer::spawn(
            path.to_string(),
            content,
            rev,
            self.inner.peer.clone(),
            self.inner.router_tx.clone(),
            edits_rx,
        );
        registry.insert(path.to_string(), controller.clone());
        info!(path = %path, rev, "attached to buffer");
        Ok(controller)
    }

    /// Detach from the buffer at `path`, stopping its controller worker.
    ///
    /// Other buffers are unaffected. Returns whether a live controller
    /// existed for `path`.
    pub async fn detach(&self, path: &str) -> bool {
        let mut registry = self.inner.registry.lock().await;
        let existed = registry.remove(path).is_some();
        drop(registry);

        if existed {
            let _ = self
                .send_cmd(RouterCmd::UnregisterBuffer {
                    path: path.to_string(),
                })
                .await;
            // Best-effort: tell the engine to stop broadcasting to us.
            let (reply, _rx) = oneshot::channel();
            let _ = self
                .inner
                .router_tx
                .send(RouterCmd::Request {
                    op: RequestOp::Detach {
                        path: path.to_string(),
                    },
                    reply,
                })
                .await;
            info!(path = %path, "detached from buffer");
        }
        existed
    }

    /// Paths with a live controller in this session
    pub async fn buffers(&self) -> Vec<String> {
        self.inner.registry.lock().await.keys().cloned().collect()
    }

    /// Obtain the session's cursor relay.
    ///
    /// Idempotent: every call returns the same logical channel. Fails
    /// with [`BridgeError::Connection`] once the session is closed.
    pub fn listen(&self) -> BridgeResult<CursorChannel> {
        if self.inner.router_tx.is_closed() {
            return Err(BridgeError::Connection("session closed".to_string()));
        }
        Ok(CursorChannel {
            router_tx: self.inner.router_tx.clone(),
            events: self.inner.cursor_events.clone(),
        })
    }

    async fn request(&self, op: RequestOp) -> BridgeResult<ReplyOk> {
        let (reply, rx) = oneshot::channel();
        self.send_cmd(RouterCmd::Request { op, reply }).await?;
        rx.await
            .map_err(|_| BridgeError::ChannelClosed("session router"))?
    }

    async fn send_cmd(&self, cmd: RouterCmd) -> BridgeResult<()> {
        self.inner
            .router_tx
            .send(cmd)
            .await
            .map_err(|_| BridgeError::ChannelClosed("session router"))
    }
}

/// Multiplexes one connection: commands out, replies/edits/cursors in.
async fn router_loop(
    mut connection: Connection,
    mut cmd_rx: mpsc::Receiver<RouterCmd>,
    cursor_events: broadcast::Sender<CursorEvent>,
) {
    let mut next_request: u64 = 0;
    let mut pending: HashMap<u64, oneshot::Sender<BridgeResult<ReplyOk>>> = HashMap::new();
    let mut buffers: HashMap<String, mpsc::UnboundedSender<EngineEdit>> = HashMap::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(RouterCmd::Request { op, reply }) => {
                    let id = next_request;
                    next_request += 1;
                    if let Err(e) = connection.send(WireMessage::Request { id, op }) {
                        let _ = reply.send(Err(e));
                        continue;
                    }
                    pending.insert(id, reply);
                }
                Some(RouterCmd::Cursor { buffer, anchor, position }) => {
                    if let Err(e) = connection.send(WireMessage::CursorTo {
                        buffer,
                        anchor,
                        position,
                    }) {
                        warn!(error = %e, "cursor update dropped");
                    }
                }
                Some(RouterCmd::RegisterBuffer { path, edits }) => {
                    buffers.insert(path, edits);
                }
                Some(RouterCmd::UnregisterBuffer { path }) => {
                    buffers.remove(&path);
                }
                // Session dropped entirely.
                None => break,
            },

            message = connection.recv() => match message {
                Some(WireMessage::Reply { id, result }) => {
                    match pending.remove(&id) {
                        Some(reply) => {
                            let _ = reply.send(result.map_err(BridgeError::from));
                        }
                        None => warn!(id, "reply for unknown request"),
                    }
                }
                Some(WireMessage::Edit { path, origin, start, end, text, rev }) => {
                    let worker_gone = match buffers.get(&path) {
                        Some(edits) => {
                            let edit = EngineEdit {
                                origin,
                                start: start as usize,
                                end: end as usize,
                                text,
                                rev,
                            };
                            edits.send(edit).is_err()
                        }
                        None => {
                            debug!(path = %path, rev, "edit for unattached buffer");
                            false
                        }
                    };
                    if worker_gone {
                        debug!(path = %path, "buffer worker gone, dropping edit route");
                        buffers.remove(&path);
                    }
                }
                Some(WireMessage::Cursor(event)) => {
                    // send fails only when nobody is listening; cursor
                    // traffic is best-effort either way.
                    let _ = cursor_events.send(event);
                }
                Some(other) => warn!(message = ?other, "unexpected message from engine"),
                None => {
                    warn!("engine closed the connection");
                    break;
                }
            },
        }
    }

    // Fail callers still waiting on a reply; buffer workers stop on their
    // own once the edit routes drop.
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(BridgeError::ChannelClosed("engine connection")));
    }
}
