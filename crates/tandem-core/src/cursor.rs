//! Session-wide cursor relay.
//!
//! Cursor traffic is fire-and-forget: no acknowledgment, no delivery
//! guarantee, no history. Updates from distinct peers are unordered; for
//! a single peer, the last-received update is authoritative for display
//! and stale arrivals are tolerated, not rejected.

use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::session::RouterCmd;
use crate::types::{CursorEvent, WirePosition};

/// Handle to one session's cursor relay.
///
/// Cheap to clone; every clone shares the same underlying stream, so a
/// session's `listen()` is idempotent.
#[derive(Clone)]
pub struct CursorChannel {
    pub(crate) router_tx: mpsc::Sender<RouterCmd>,
    pub(crate) events: broadcast::Sender<CursorEvent>,
}

impl CursorChannel {
    /// Broadcast this session's cursor in `buffer`.
    ///
    /// Coordinates are wire coordinates (1-based rows). Best-effort: a
    /// failure to enqueue is logged and swallowed, never surfaced.
    pub async fn send(&self, buffer: &str, anchor: WirePosition, position: WirePosition) {
        let cmd = RouterCmd::Cursor {
            buffer: buffer.to_string(),
            anchor,
            position,
        };
        if self.router_tx.send(cmd).await.is_err() {
            warn!(buffer = %buffer, "cursor update dropped, session closed");
        }
    }

    /// Subscribe to peer cursor updates, one event per received update.
    pub fn subscribe(&self) -> broadcast::Receiver<CursorEvent> {
        self.events.subscribe()
    }
}
