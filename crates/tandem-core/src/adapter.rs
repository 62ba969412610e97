//! Binds one buffer controller to one local text surface.
//!
//! The adapter is the reconciliation point between two independently
//! mutating views of the same document: the local surface the user types
//! into, and the converged content the engine maintains. Every inbound
//! event is a discrete message on one single-consumer queue, processed in
//! arrival order, which makes the bridge's ordering guarantees explicit
//! instead of implicit in host callback timing.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  BufferAdapter actor (one per bound buffer)                    │
//! │                                                                │
//! │  host edits ──────────┐                                        │
//! │  host cursor moves ───┤                                        │
//! │  remote changes ──────┼──> event queue ──> handler             │
//! │  peer cursors ────────┘      (in arrival     │                 │
//! │                               order)         ├─> apply()       │
//! │                                              ├─> replace()     │
//! │                                              └─> render_cursor │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Local edits that match a pending [`EchoFilter`] entry are the surface's
//! own notifications for replaces the adapter performed while reconciling
//! a remote change; they are absorbed instead of forwarded, which is what
//! prevents the echo loop.
//!
//! Remote coordinates count rows from 1, surface coordinates from 0; this
//! module is the single place that translation happens, in both
//! directions.

use std::ops::Range;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::buffer::BufferController;
use crate::cursor::CursorChannel;
use crate::echo::EchoFilter;
use crate::error::{BridgeError, BridgeResult};
use crate::text;
use crate::types::{CursorEvent, RemoteChange, SurfaceEdit, SurfacePosition, WirePosition};

/// Host editor capability consumed by the bridge: read text, apply a
/// programmatic replace, and render a peer cursor decoration.
///
/// The surface's own change-notification stream is fed back through
/// [`AdapterClient::notify_edits`]; the surface does not distinguish user
/// edits from bridge edits, the adapter does.
pub trait TextSurface: Send + 'static {
    /// Current surface text
    fn content(&self) -> String;

    /// Replace the half-open char range `span` with `text`
    fn replace(&mut self, span: Range<usize>, text: &str) -> BridgeResult<()>;

    /// Update the decoration for one peer's cursor (0-based rows)
    fn render_cursor(&mut self, user: &str, anchor: SurfacePosition, position: SurfacePosition);
}

enum AdapterEvent {
    LocalEdits(Vec<SurfaceEdit>),
    LocalCursor {
        anchor: SurfacePosition,
        position: SurfacePosition,
    },
    Remote(RemoteChange),
    RemoteCursor(CursorEvent),
    Shutdown,
}

/// Host-facing handle for feeding surface events into the adapter queue.
///
/// Cheap to clone; hand one to whatever observes the surface.
#[derive(Clone)]
pub struct AdapterClient {
    tx: mpsc::UnboundedSender<AdapterEvent>,
}

impl AdapterClient {
    /// Report one batch of discrete surface edits, in the order the
    /// surface applied them.
    pub fn notify_edits(&self, edits: Vec<SurfaceEdit>) {
        if self.tx.send(AdapterEvent::LocalEdits(edits)).is_err() {
            debug!("surface edits dropped, adapter stopped");
        }
    }

    /// Report the local cursor, in surface coordinates (0-based rows).
    pub fn notify_cursor(&self, anchor: SurfacePosition, position: SurfacePosition) {
        let _ = self.tx.send(AdapterEvent::LocalCursor { anchor, position });
    }
}

/// A running adapter bound to one buffer.
pub struct AdapterHandle {
    client: AdapterClient,
    task: JoinHandle<()>,
}

impl AdapterHandle {
    /// Bind `controller` to `surface` and start the adapter actor.
    ///
    /// When `cursors` is given, local cursor reports are broadcast and
    /// peer cursors for this buffer are rendered onto the surface.
    pub fn bind<S: TextSurface>(
        controller: BufferController,
        cursors: Option<CursorChannel>,
        surface: S,
    ) -> AdapterHandle {
        let (tx, events) = mpsc::unbounded_channel();

        pump_remote_changes(controller.subscribe(), tx.clone());
        if let Some(channel) = &cursors {
            pump_remote_cursors(channel.subscribe(), controller.path().to_string(), tx.clone());
        }

        let actor = Actor {
            controller,
            cursors,
            surface,
            filter: EchoFilter::new(),
            state: AdapterState::Idle,
            events,
        };
        let task = tokio::spawn(actor.run());

        AdapterHandle {
            client: AdapterClient { tx },
            task,
        }
    }

    /// Handle for feeding surface events to this adapter
    pub fn client(&self) -> AdapterClient {
        self.client.clone()
    }

    /// Process everything already queued, then stop the actor.
    pub async fn shutdown(self) {
        let _ = self.client.tx.send(AdapterEvent::Shutdown);
        let _ = self.task.await;
    }
}

/// Forward remote-change notifications into the adapter queue.
fn pump_remote_changes(
    mut changes: broadcast::Receiver<RemoteChange>,
    tx: mpsc::UnboundedSender<AdapterEvent>,
) {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    if tx.send(AdapterEvent::Remote(change)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Reconciliation recomputes from full content, so a
                    // skipped notification only delays convergence until
                    // the next one.
                    warn!(skipped, "remote change stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Forward peer cursors for `path` into the adapter queue.
fn pump_remote_cursors(
    mut cursors: broadcast::Receiver<CursorEvent>,
    path: String,
    tx: mpsc::UnboundedSender<AdapterEvent>,
) {
    tokio::spawn(async move {
        loop {
            match cursors.recv().await {
                Ok(event) => {
                    if event.buffer != path {
                        continue;
                    }
                    if tx.send(AdapterEvent::RemoteCursor(event)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Stale cursor updates are tolerated by design.
                    debug!(skipped, "cursor stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdapterState {
    Idle,
    /// A reconciliation replace is in flight on the surface
    ApplyingRemote,
}

struct Actor<S> {
    controller: BufferController,
    cursors: Option<CursorChannel>,
    surface: S,
    filter: EchoFilter,
    state: AdapterState,
    events: mpsc::UnboundedReceiver<AdapterEvent>,
}

impl<S: TextSurface> Actor<S> {
    async fn run(mut self) {
        // Bring the surface up to the converged content once at bind
        // time; a surface that already matches is left untouched.
        self.reconcile();

        while let Some(event) = self.events.recv().await {
            match event {
                AdapterEvent::LocalEdits(edits) => self.on_local_edits(edits).await,
                AdapterEvent::LocalCursor { anchor, position } => {
                    self.on_local_cursor(anchor, position).await
                }
                AdapterEvent::Remote(change) => self.on_remote_change(change),
                AdapterEvent::RemoteCursor(event) => self.on_remote_cursor(event),
                AdapterEvent::Shutdown => break,
            }
        }
        debug!(path = %self.controller.path(), "adapter stopped");
    }

    /// One batch of discrete surface edits: absorb echoes of our own
    /// reconciliation replaces, forward everything else in order.
    async fn on_local_edits(&mut self, edits: Vec<SurfaceEdit>) {
        // Queued events are handled one at a time, so a notification can
        // never observe a reconciliation replace mid-flight.
        debug_assert_eq!(self.state, AdapterState::Idle);

        for edit in edits {
            if edit.is_noop() {
                continue;
            }
            if let Some(token) = self.filter.consume(&edit.span, &edit.text) {
                debug!(token = %token, span = ?edit.span, "absorbed echoed replace");
                continue;
            }

            // Awaiting the ack before the next edit preserves per-buffer
            // ordering of outgoing applies.
            match self
                .controller
                .apply(edit.span.start, &edit.text, edit.span.end)
                .await
            {
                Ok(span) => debug!(?span, "forwarded local edit"),
                Err(e @ BridgeError::ApplyConflict(_)) => {
                    // Reported once; resolution beyond what the engine
                    // provides is not attempted.
                    error!(error = %e, span = ?edit.span, "engine rejected local edit");
                }
                Err(e) => {
                    error!(error = %e, span = ?edit.span, "failed to forward local edit");
                }
            }
        }

        // A full notification cycle ended; entries whose echo never came
        // were coalesced or dropped by the surface.
        self.filter.sweep();

        // The acknowledged applies are in the converged content now. A
        // quiescent surface that still differs was clobbered by a
        // reconciliation that raced this batch, or holds an edit the
        // engine rejected; one more minimal replace restores convergence.
        // With notifications still queued the surface is legitimately
        // ahead, so reconciling now would revert pending user edits.
        if self.events.is_empty() {
            self.reconcile();
        }
    }

    /// A remote change notification: reconcile the surface to the
    /// converged content with one minimal replace, and remember it so the
    /// surface's echoed notification is absorbed, not forwarded.
    fn on_remote_change(&mut self, change: RemoteChange) {
        debug!(span = ?change.span, rev = change.rev, "reconciling remote change");
        self.reconcile();
    }

    /// Replace the smallest differing range of the surface with the
    /// corresponding slice of the converged content.
    fn reconcile(&mut self) {
        let converged = self.controller.content();
        let current = self.surface.content();

        let Some((span, new_text)) = text::minimal_replace(&current, &converged) else {
            debug!("surface already converged");
            return;
        };

        self.state = AdapterState::ApplyingRemote;
        let token = self.filter.record(span.clone(), new_text.clone());
        if let Err(e) = self.surface.replace(span, &new_text) {
            // Entry left pending; the filter expires it after one cycle.
            error!(error = %e, token = %token, "surface rejected reconciliation replace");
        }
        self.state = AdapterState::Idle;
    }

    async fn on_local_cursor(&mut self, anchor: SurfacePosition, position: SurfacePosition) {
        if let Some(channel) = &self.cursors {
            channel
                .send(
                    self.controller.path(),
                    surface_to_wire(anchor),
                    surface_to_wire(position),
                )
                .await;
        }
    }

    fn on_remote_cursor(&mut self, event: CursorEvent) {
        self.surface.render_cursor(
            &event.user,
            wire_to_surface(event.anchor),
            wire_to_surface(event.position),
        );
    }
}

/// Surface coordinates (0-based rows) to wire coordinates (1-based rows)
fn surface_to_wire(pos: SurfacePosition) -> WirePosition {
    WirePosition {
        row: pos.row as u32 + 1,
        col: pos.col as u32,
    }
}

/// Wire coordinates (1-based rows) to surface coordinates (0-based rows)
fn wire_to_surface(pos: WirePosition) -> SurfacePosition {
    SurfacePosition {
        row: pos.row.saturating_sub(1) as usize,
        col: pos.col as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_to_wire() {
        assert_eq!(
            surface_to_wire(SurfacePosition::from((0, 0))),
            WirePosition::from((1, 0))
        );
        assert_eq!(
            surface_to_wire(SurfacePosition::from((4, 3))),
            WirePosition::from((5, 3))
        );
    }

    #[test]
    fn test_translation_to_surface() {
        assert_eq!(
            wire_to_surface(WirePosition::from((1, 0))),
            SurfacePosition::from((0, 0))
        );
        assert_eq!(
            wire_to_surface(WirePosition::from((5, 3))),
            SurfacePosition::from((4, 3))
        );
    }

    #[test]
    fn test_translation_roundtrip() {
        let pos = SurfacePosition::from((12, 7));
        assert_eq!(wire_to_surface(surface_to_wire(pos)), pos);
    }

    #[test]
    fn test_zero_row_wire_position_clamps() {
        // A row of 0 is outside the 1-based convention; clamp instead of
        // underflowing.
        assert_eq!(
            wire_to_surface(WirePosition::from((0, 2))),
            SurfacePosition::from((0, 2))
        );
    }
}
