//! Tandem Core Library
//!
//! A synchronization bridge between local text buffers and remotely
//! shared documents edited by multiple peers concurrently.
//!
//! ## Overview
//!
//! The bridge keeps two independently mutating views of one document in
//! lockstep without double-applying or dropping edits:
//!
//! - genuine local edits are forwarded to the collaboration engine,
//! - committed remote edits are reconciled into the local surface,
//! - the surface's own notifications for bridge-performed replaces are
//!   recognized and absorbed, which prevents the echo loop,
//! - peer cursor positions are relayed and rendered.
//!
//! The collaboration engine itself (merge algorithm, network transport,
//! persistence) is external and reached through the [`Dialer`] seam; the
//! in-process [`MemoryHub`] stands in for it in tests and demos.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tandem_core::{AdapterHandle, MemoryHub, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = MemoryHub::spawn();
//!
//!     let session =
//!         Session::connect(&hub, SessionConfig::new("alice", hub.address())).await?;
//!     session.create("notes.txt", "hello").await?;
//!
//!     let controller = session.attach("notes.txt").await?;
//!     let cursors = session.listen()?;
//!     let adapter = AdapterHandle::bind(controller, Some(cursors), my_surface);
//!
//!     // Feed surface change notifications through adapter.client()...
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod buffer;
pub mod cursor;
pub mod echo;
pub mod error;
pub mod proto;
pub mod session;
pub mod text;
pub mod transport;
pub mod types;

// Re-exports
pub use adapter::{AdapterClient, AdapterHandle, TextSurface};
pub use buffer::BufferController;
pub use cursor::CursorChannel;
pub use echo::{EchoFilter, EditToken};
pub use error::{BridgeError, BridgeResult};
pub use session::Session;
pub use transport::{BufferAudit, CommittedEdit, Connection, Dialer, MemoryHub};
pub use types::{
    CursorEvent, PeerId, RemoteChange, SessionConfig, SurfaceEdit, SurfacePosition, WirePosition,
};
