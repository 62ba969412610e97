//! Transport seam and the in-process loopback engine.
//!
//! The real collaboration engine (merge algorithm, network, persistence)
//! is external to this crate and reached through the [`Dialer`] seam: a
//! dialer turns an address into a framed, bidirectional [`Connection`].
//!
//! [`MemoryHub`] is the loopback implementation used by tests and the demo
//! driver. It is deliberately *not* a merge engine: it owns one
//! authoritative copy of every buffer, commits edits strictly in arrival
//! order with bounds checking only, and rebroadcasts each committed edit
//! to every attached session. That is exactly the contract the bridge
//! wraps, with the conflict-resolution policy left to whichever engine is
//! actually dialed.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::error::{BridgeError, BridgeResult};
use crate::proto::{ReplyErr, ReplyOk, RequestOp, WireFrame, WireMessage};
use crate::text;
use crate::types::{CursorEvent, PeerId};

/// Connects sessions to an engine by address.
pub trait Dialer {
    /// Establish a framed connection to the engine at `address`.
    ///
    /// Fails with [`BridgeError::Connection`] when the address is
    /// malformed or nothing is listening there.
    fn dial(
        &self,
        address: &str,
    ) -> impl std::future::Future<Output = BridgeResult<Connection>> + Send;
}

/// A framed, bidirectional connection between one session and the engine.
///
/// Frames are postcard-encoded [`WireFrame`]s; undecodable inbound frames
/// are dropped with a warning rather than tearing the connection down.
pub struct Connection {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl Connection {
    /// Build a connection from raw channel halves.
    ///
    /// Engine adapters implementing [`Dialer`] use this to hand a session
    /// its end of the wire.
    pub fn from_channels(
        tx: mpsc::UnboundedSender<Bytes>,
        rx: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        Self { tx, rx }
    }

    /// Send one message to the engine.
    pub fn send(&self, message: WireMessage) -> BridgeResult<()> {
        let bytes = WireFrame::new(message).encode()?;
        self.tx
            .send(Bytes::from(bytes))
            .map_err(|_| BridgeError::ChannelClosed("engine connection"))
    }

    /// Receive the next message from the engine.
    ///
    /// Returns `None` once the engine side has closed the connection.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        loop {
            let bytes = self.rx.recv().await?;
            match WireFrame::decode(&bytes) {
                Ok(frame) => return Some(frame.message),
                Err(e) => warn!(error = %e, "dropping undecodable frame"),
            }
        }
    }
}

/// One edit committed by the loopback engine, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedEdit {
    /// Peer id (ULID string) of the issuing session
    pub origin: String,
    /// Start char offset of the replaced range
    pub start: usize,
    /// End char offset (half-open) of the replaced range
    pub end: usize,
    /// Replacement text
    pub text: String,
    /// Revision after the edit
    pub rev: u64,
}

/// Snapshot of one loopback buffer: content, revision and full edit log.
#[derive(Debug, Clone)]
pub struct BufferAudit {
    pub content: String,
    pub rev: u64,
    pub log: Vec<CommittedEdit>,
}

/// Handle to an in-process loopback engine.
///
/// Cheap to clone; the engine actor stops once every handle and every
/// connection to it is gone.
#[derive(Clone)]
pub struct MemoryHub {
    address: String,
    cmd_tx: mpsc::UnboundedSender<HubCmd>,
}

enum HubCmd {
    Connect {
        reply: oneshot::Sender<Connection>,
    },
    Frame {
        conn: u64,
        bytes: Bytes,
    },
    Disconnected {
        conn: u64,
    },
    Audit {
        path: String,
        reply: oneshot::Sender<Option<BufferAudit>>,
    },
}

impl MemoryHub {
    /// Spawn a fresh loopback engine and return a handle to it.
    pub fn spawn() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let address = format!("mem://{}", Ulid::new());
        info!(address = %address, "loopback engine started");
        tokio::spawn(hub_loop(cmd_tx.clone(), cmd_rx));
        Self { address, cmd_tx }
    }

    /// Address sessions dial to reach this engine, `mem://...`
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Inspect a buffer's authoritative state and edit log.
    ///
    /// Returns `None` if no buffer exists at `path` (or the engine has
    /// stopped).
    pub async fn audit(&self, path: &str) -> Option<BufferAudit> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(HubCmd::Audit {
                path: path.to_string(),
                reply,
            })
            .ok()?;
        rx.await.ok().flatten()
    }
}

impl Dialer for MemoryHub {
    async fn dial(&self, address: &str) -> BridgeResult<Connection> {
        if !address.starts_with("mem://") {
            return Err(BridgeError::Connection(format!(
                "malformed address: {}",
                address
            )));
        }
        if address != self.address {
            return Err(BridgeError::Connection(format!(
                "no engine listening at {}",
                address
            )));
        }

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(HubCmd::Connect { reply })
            .map_err(|_| BridgeError::Connection("engine stopped".to_string()))?;
        rx.await
            .map_err(|_| BridgeError::Connection("engine stopped".to_string()))
    }
}

struct ConnState {
    tx: mpsc::UnboundedSender<Bytes>,
    peer: PeerId,
    user: Option<String>,
}

#[derive(Default)]
struct HubBuffer {
    content: String,
    rev: u64,
    attached: HashSet<u64>,
    log: Vec<CommittedEdit>,
}

/// The engine actor: every frame from every session funnels into one
/// command queue, so commits happen strictly in arrival order.
async fn hub_loop(cmd_tx: mpsc::UnboundedSender<HubCmd>, mut cmd_rx: mpsc::UnboundedReceiver<HubCmd>) {
    let mut next_conn: u64 = 0;
    let mut conns: HashMap<u64, ConnState> = HashMap::new();
    let mut buffers: HashMap<String, HubBuffer> = HashMap::new();

    // The actor keeps a sender to its own queue for connection
    // forwarders, so it runs detached for the life of the process, like
    // any other background listener task.
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            HubCmd::Connect { reply } => {
                let conn = next_conn;
                next_conn += 1;

                let (to_client_tx, to_client_rx) = mpsc::unbounded_channel::<Bytes>();
                let (from_client_tx, mut from_client_rx) = mpsc::unbounded_channel::<Bytes>();

                // Tag this connection's inbound frames onto the shared
                // command queue.
                let forward = cmd_tx.clone();
                tokio::spawn(async move {
                    while let Some(bytes) = from_client_rx.recv().await {
                        if forward.send(HubCmd::Frame { conn, bytes }).is_err() {
                            return;
                        }
                    }
                    let _ = forward.send(HubCmd::Disconnected { conn });
                });

                conns.insert(
                    conn,
                    ConnState {
                        tx: to_client_tx,
                        peer: PeerId::new(),
                        user: None,
                    },
                );
                debug!(conn, "session connected");

                if reply
                    .send(Connection::from_channels(from_client_tx, to_client_rx))
                    .is_err()
                {
                    drop_conn(&mut conns, &mut buffers, conn);
                }
            }

            HubCmd::Frame { conn, bytes } => {
                let message = match WireFrame::decode(&bytes) {
                    Ok(frame) => frame.message,
                    Err(e) => {
                        warn!(conn, error = %e, "dropping undecodable frame");
                        continue;
                    }
                };
                handle_message(&mut conns, &mut buffers, conn, message);
            }

            HubCmd::Disconnected { conn } => {
                debug!(conn, "session disconnected");
                drop_conn(&mut conns, &mut buffers, conn);
            }

            HubCmd::Audit { path, reply } => {
                let audit = buffers.get(&path).map(|buf| BufferAudit {
                    content: buf.content.clone(),
                    rev: buf.rev,
                    log: buf.log.clone(),
                });
                let _ = reply.send(audit);
            }
        }
    }
}

fn handle_message(
    conns: &mut HashMap<u64, ConnState>,
    buffers: &mut HashMap<String, HubBuffer>,
    conn: u64,
    message: WireMessage,
) {
    match message {
        WireMessage::Hello { user } => {
            let Some(state) = conns.get_mut(&conn) else {
                return;
            };
            state.user = Some(user);
            let peer = state.peer.to_string();
            send_to(conns, buffers, conn, WireMessage::Welcome { peer });
        }

        WireMessage::Request { id, op } => {
            let result = handle_request(conns, buffers, conn, op);
            send_to(conns, buffers, conn, WireMessage::Reply { id, result });
        }

        WireMessage::CursorTo {
            buffer,
            anchor,
            position,
        } => {
            let Some(state) = conns.get(&conn) else {
                return;
            };
            let event = CursorEvent {
                user: state.user.clone().unwrap_or_default(),
                buffer,
                anchor,
                position,
            };
            let others: Vec<u64> = conns.keys().copied().filter(|c| *c != conn).collect();
            for other in others {
                send_to(conns, buffers, other, WireMessage::Cursor(event.clone()));
            }
        }

        // Server-to-client messages arriving from a client are nonsense;
        // drop them like any other malformed traffic.
        other => warn!(conn, message = ?other, "unexpected message from session"),
    }
}

fn handle_request(
    conns: &mut HashMap<u64, ConnState>,
    buffers: &mut HashMap<String, HubBuffer>,
    conn: u64,
    op: RequestOp,
) -> Result<ReplyOk, ReplyErr> {
    match op {
        RequestOp::Create { path, content } => {
            if buffers.contains_key(&path) {
                return Err(ReplyErr::BufferExists(path));
            }
            info!(path = %path, len = content.len(), "buffer created");
            buffers.insert(
                path,
                HubBuffer {
                    content,
                    ..HubBuffer::default()
                },
            );
            Ok(ReplyOk::Created { accepted: true })
        }

        RequestOp::Attach { path } => {
            let Some(buf) = buffers.get_mut(&path) else {
                return Err(ReplyErr::BufferNotFound(path));
            };
            buf.attached.insert(conn);
            debug!(conn, path = %path, rev = buf.rev, "session attached");
            Ok(ReplyOk::Attached {
                content: buf.content.clone(),
                rev: buf.rev,
            })
        }

        RequestOp::Apply {
            path,
            start,
            end,
            text,
        } => {
            let Some(buf) = buffers.get_mut(&path) else {
                return Err(ReplyErr::BufferNotFound(path));
            };
            let (start, end) = (start as usize, end as usize);
            let len = text::char_len(&buf.content);
            if start > end || end > len {
                return Err(ReplyErr::Rejected(format!(
                    "offsets {}..{} out of bounds for length {} at revision {}",
                    start, end, len, buf.rev
                )));
            }

            let origin = conns
                .get(&conn)
                .map(|c| c.peer.to_string())
                .unwrap_or_default();

            buf.content = text::splice(&buf.content, start, end, &text);
            buf.rev += 1;
            buf.log.push(CommittedEdit {
                origin: origin.clone(),
                start,
                end,
                text: text.clone(),
                rev: buf.rev,
            });
            debug!(path = %path, start, end, rev = buf.rev, "edit committed");

            let edit = WireMessage::Edit {
                path: path.clone(),
                origin,
                start: start as u64,
                end: end as u64,
                text: text.clone(),
                rev: buf.rev,
            };
            let attached: Vec<u64> = buf.attached.iter().copied().collect();
            let rev = buf.rev;
            for member in attached {
                send_to(conns, buffers, member, edit.clone());
            }

            Ok(ReplyOk::Applied {
                start: start as u64,
                end: (start + text::char_len(&text)) as u64,
                rev,
            })
        }

        RequestOp::Detach { path } => {
            let existed = buffers
                .get_mut(&path)
                .map(|buf| buf.attached.remove(&conn))
                .unwrap_or(false);
            debug!(conn, path = %path, existed, "session detached");
            Ok(ReplyOk::Detached { existed })
        }
    }
}

/// Encode and deliver one message to one connection, dropping the
/// connection (and its attachments) if its receiver is gone.
fn send_to(
    conns: &mut HashMap<u64, ConnState>,
    buffers: &mut HashMap<String, HubBuffer>,
    conn: u64,
    message: WireMessage,
) {
    let Some(state) = conns.get(&conn) else {
        return;
    };
    let frame = match WireFrame::new(message).encode() {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            warn!(conn, error = %e, "failed to encode outbound frame");
            return;
        }
    };
    if state.tx.send(frame).is_err() {
        drop_conn(conns, buffers, conn);
    }
}

fn drop_conn(
    conns: &mut HashMap<u64, ConnState>,
    buffers: &mut HashMap<String, HubBuffer>,
    conn: u64,
) {
    conns.remove(&conn);
    for buf in buffers.values_mut() {
        buf.attached.remove(&conn);
    }
}
