//! Per-buffer controller: converged content snapshot, acknowledged edits
//! out, remote-change notifications in.
//!
//! Each attached buffer gets one [`BufferController`] handle (cheap to
//! clone) backed by one worker task. The worker is the only writer of the
//! converged snapshot: it applies committed edits from the engine in
//! commit order, so `content()` never observes a partially applied edit.
//!
//! Outgoing edits round-trip through the engine: `apply` is acknowledged
//! only after the engine has committed the edit and the worker has brought
//! the snapshot up to the acknowledged revision. One `apply` completes
//! before the next is issued, preserving per-buffer edit ordering.

use std::ops::Range;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::proto::{ReplyOk, RequestOp};
use crate::session::RouterCmd;
use crate::text;
use crate::types::RemoteChange;

/// Capacity of the remote-change broadcast channel
const REMOTE_CHANGE_CAPACITY: usize = 256;

/// A committed edit delivered by the engine, in commit order.
#[derive(Debug, Clone)]
pub(crate) struct EngineEdit {
    pub origin: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub rev: u64,
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    text: String,
    rev: u64,
}

enum ControllerCmd {
    Apply {
        start: usize,
        end: usize,
        text: String,
        reply: oneshot::Sender<BridgeResult<Range<usize>>>,
    },
    Stop,
}

/// Handle to one shared buffer.
///
/// All clones drive the same worker; dropping every clone (and detaching
/// from the session) stops it.
#[derive(Clone)]
pub struct BufferController {
    path: String,
    cmd_tx: mpsc::UnboundedSender<ControllerCmd>,
    snapshot: watch::Receiver<Snapshot>,
    changes: broadcast::Sender<RemoteChange>,
}

impl BufferController {
    /// Buffer path this controller is attached to
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current converged text snapshot
    pub fn content(&self) -> String {
        self.snapshot.borrow().text.clone()
    }

    /// Engine revision of the current snapshot
    pub fn rev(&self) -> u64 {
        self.snapshot.borrow().rev
    }

    /// Replace the half-open char range `[start, end)` of the converged
    /// content with `text`.
    ///
    /// Resolves once the engine has acknowledged the edit and the local
    /// snapshot reflects it; returns the effective span of `text` in the
    /// new content. Fails with [`BridgeError::ApplyConflict`] when the
    /// engine rejects the edit.
    pub async fn apply(&self, start: usize, text: &str, end: usize) -> BridgeResult<Range<usize>> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ControllerCmd::Apply {
                start,
                end,
                text: text.to_string(),
                reply,
            })
            .map_err(|_| BridgeError::ChannelClosed("buffer worker"))?;
        rx.await
            .map_err(|_| BridgeError::ChannelClosed("buffer worker"))?
    }

    /// Subscribe to externally originated changes of the converged
    /// content, in engine commit order.
    ///
    /// Every subscriber sees every notification; ranges are not
    /// guaranteed to be disjoint.
    pub fn subscribe(&self) -> broadcast::Receiver<RemoteChange> {
        self.changes.subscribe()
    }

    /// Stop the worker task. Pending notifications are dropped.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(ControllerCmd::Stop);
    }
}

/// Spawn the worker for one attached buffer and return its handle.
pub(crate) fn spawn(
    path: String,
    content: String,
    rev: u64,
    own_peer: String,
    router_tx: mpsc::Sender<RouterCmd>,
    edits_rx: mpsc::UnboundedReceiver<EngineEdit>,
) -> BufferController {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot { text: content, rev });
    let (changes_tx, _) = broadcast::channel(REMOTE_CHANGE_CAPACITY);

    let controller = BufferController {
        path: path.clone(),
        cmd_tx,
        snapshot: snapshot_rx,
        changes: changes_tx.clone(),
    };

    tokio::spawn(worker_loop(Worker {
        path,
        own_peer,
        router_tx,
        snapshot_tx,
        changes_tx,
        cmd_rx,
        edits_rx,
    }));

    controller
}

struct Worker {
    path: String,
    own_peer: String,
    router_tx: mpsc::Sender<RouterCmd>,
    snapshot_tx: watch::Sender<Snapshot>,
    changes_tx: broadcast::Sender<RemoteChange>,
    cmd_rx: mpsc::UnboundedReceiver<ControllerCmd>,
    edits_rx: mpsc::UnboundedReceiver<EngineEdit>,
}

async fn worker_loop(mut worker: Worker) {
    loop {
        tokio::select! {
            cmd = worker.cmd_rx.recv() => match cmd {
                Some(ControllerCmd::Apply { start, end, text, reply }) => {
                    let result = worker.forward_apply(start, end, text).await;
                    let _ = reply.send(result);
                }
                Some(ControllerCmd::Stop) | None => break,
            },
            edit = worker.edits_rx.recv() => match edit {
                Some(edit) => worker.apply_edit(edit),
                // Detached, or the session router is gone.
                None => break,
            },
        }
    }
    debug!(path = %worker.path, "buffer worker stopped");
}

impl Worker {
    /// Send one edit to the engine and wait for the acknowledgment,
    /// then catch the snapshot up to the acknowledged revision.
    ///
    /// The engine broadcasts the committed edit (to us as well) before
    /// acknowledging, so the catch-up drains edits that are already in
    /// flight rather than waiting on new traffic.
    async fn forward_apply(
        &mut self,
        start: usize,
        end: usize,
        text: String,
    ) -> BridgeResult<Range<usize>> {
        let (reply, rx) = oneshot::channel();
        self.router_tx
            .send(RouterCmd::Request {
                op: RequestOp::Apply {
                    path: self.path.clone(),
                    start: start as u64,
                    end: end as u64,
                    text,
                },
                reply,
            })
            .await
            .map_err(|_| BridgeError::ChannelClosed("session router"))?;

        let reply = rx
            .await
            .map_err(|_| BridgeError::ChannelClosed("session router"))??;
        let (start, end, rev) = match reply {
            ReplyOk::Applied { start, end, rev } => (start, end, rev),
            other => {
                return Err(BridgeError::Engine(format!(
                    "unexpected reply to apply: {:?}",
                    other
                )))
            }
        };

        while self.snapshot_tx.borrow().rev < rev {
            match self.edits_rx.recv().await {
                Some(edit) => self.apply_edit(edit),
                None => return Err(BridgeError::ChannelClosed("buffer edit stream")),
            }
        }

        Ok(start as usize..end as usize)
    }

    /// Splice one committed edit into the converged snapshot.
    ///
    /// Externally originated edits are also broadcast to subscribers; our
    /// own edits are not, since the local surface already contains them.
    fn apply_edit(&mut self, edit: EngineEdit) {
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.text = text::splice(&snapshot.text, edit.start, edit.end, &edit.text);
            snapshot.rev = edit.rev;
        });

        if edit.origin != self.own_peer {
            let span = edit.start..edit.start + text::char_len(&edit.text);
            debug!(path = %self.path, ?span, rev = edit.rev, "remote change");
            // send fails only when nobody subscribed; the watch snapshot
            // still advanced either way.
            let _ = self.changes_tx.send(RemoteChange {
                span,
                rev: edit.rev,
            });
        }
    }
}
