//! Wire protocol between a session and the collaboration engine.
//!
//! Messages are serialized with postcard and carried as framed payloads by
//! the transport. The engine is the single ordering authority: it commits
//! edits in arrival order and rebroadcasts every committed edit to all
//! attached sessions (the originator included) before acknowledging, so a
//! session can bring its converged snapshot up to the acknowledged
//! revision without a second round-trip.
//!
//! ## Message Flow
//!
//! ```text
//! Session A                     Engine                      Session B
//!   |                             |                             |
//!   |-- Hello {user} ------------>|                             |
//!   |<- Welcome {peer} -----------|                             |
//!   |                             |                             |
//!   |-- Request {Attach} -------->|                             |
//!   |<- Reply {Attached} ---------|                             |
//!   |                             |                             |
//!   |-- Request {Apply} --------->|                             |
//!   |<- Edit {rev: n} ------------|------- Edit {rev: n} ------>|
//!   |<- Reply {Applied} ----------|                             |
//!   |                             |                             |
//!   |-- CursorTo ---------------->|------- Cursor ------------->|
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::types::{CursorEvent, WirePosition};

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// A versioned frame wrapping one wire message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    /// Protocol version for forward compatibility
    pub version: u8,
    /// The message payload
    pub message: WireMessage,
}

impl WireFrame {
    pub fn new(message: WireMessage) -> Self {
        Self {
            version: WIRE_VERSION,
            message,
        }
    }

    /// Encode frame to bytes using postcard
    pub fn encode(&self) -> BridgeResult<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Decode a frame from bytes, rejecting unknown protocol versions
    pub fn decode(data: &[u8]) -> BridgeResult<Self> {
        let frame: WireFrame = postcard::from_bytes(data)?;
        if frame.version != WIRE_VERSION {
            return Err(BridgeError::WireVersionUnsupported(frame.version));
        }
        Ok(frame)
    }
}

/// Messages exchanged between a session and the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    /// First frame after dialing: identify the connecting user
    Hello {
        /// Display name for cursor attribution
        user: String,
    },

    /// Handshake acknowledgment with the assigned session identity
    Welcome {
        /// Assigned peer id (ULID string)
        peer: String,
    },

    /// A request expecting exactly one [`WireMessage::Reply`]
    Request {
        /// Correlation id, unique per session connection
        id: u64,
        /// The requested operation
        op: RequestOp,
    },

    /// Response to a [`WireMessage::Request`] with the same `id`
    Reply {
        /// Correlation id of the request being answered
        id: u64,
        /// Outcome of the operation
        result: Result<ReplyOk, ReplyErr>,
    },

    /// A committed edit, broadcast to every attached session in commit
    /// order. The originator receives its own edits too, marked by
    /// `origin`.
    Edit {
        /// Buffer path
        path: String,
        /// Peer id (ULID string) of the session that issued the edit
        origin: String,
        /// Start char offset of the replaced range
        start: u64,
        /// End char offset (half-open) of the replaced range
        end: u64,
        /// Replacement text
        text: String,
        /// Engine revision after this edit
        rev: u64,
    },

    /// Fire-and-forget cursor update, session to engine
    CursorTo {
        /// Buffer the cursor lives in
        buffer: String,
        /// Selection anchor
        anchor: WirePosition,
        /// Active cursor position
        position: WirePosition,
    },

    /// Relayed peer cursor update, engine to session
    Cursor(CursorEvent),
}

/// Operations a session can request from the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestOp {
    /// Create a buffer with seed content
    Create { path: String, content: String },
    /// Attach to an existing buffer
    Attach { path: String },
    /// Replace the half-open char range `[start, end)` with `text`
    Apply {
        path: String,
        start: u64,
        end: u64,
        text: String,
    },
    /// Stop receiving edits for a buffer
    Detach { path: String },
}

/// Successful request outcomes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplyOk {
    /// Buffer created; `accepted` is the engine's accept flag
    Created { accepted: bool },
    /// Attached; the current converged state
    Attached { content: String, rev: u64 },
    /// Edit committed; the effective span and resulting revision
    Applied { start: u64, end: u64, rev: u64 },
    /// Detached; whether the session was attached at all
    Detached { existed: bool },
}

/// Failed request outcomes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplyErr {
    /// Create target already exists
    BufferExists(String),
    /// Attach/apply/detach target does not exist
    BufferNotFound(String),
    /// Engine rejected the edit (stale or out-of-bounds offsets)
    Rejected(String),
    /// The engine could not make sense of the request
    Malformed(String),
}

impl From<ReplyErr> for BridgeError {
    fn from(err: ReplyErr) -> Self {
        match err {
            ReplyErr::BufferExists(path) => BridgeError::BufferExists(path),
            ReplyErr::BufferNotFound(path) => BridgeError::BufferNotFound(path),
            ReplyErr::Rejected(reason) => BridgeError::ApplyConflict(reason),
            ReplyErr::Malformed(reason) => BridgeError::Engine(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = WireFrame::new(WireMessage::Hello {
            user: "alice".to_string(),
        });
        let bytes = frame.encode().unwrap();
        let decoded = WireFrame::decode(&bytes).unwrap();
        assert!(matches!(decoded.message, WireMessage::Hello { user } if user == "alice"));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut frame = WireFrame::new(WireMessage::Welcome {
            peer: "x".to_string(),
        });
        frame.version = 9;
        let bytes = postcard::to_allocvec(&frame).unwrap();
        assert!(matches!(
            WireFrame::decode(&bytes),
            Err(BridgeError::WireVersionUnsupported(9))
        ));
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        assert!(matches!(
            WireFrame::decode(&[0xff, 0xff, 0xff, 0xff]),
            Err(BridgeError::Serialization(_) | BridgeError::WireVersionUnsupported(_))
        ));
    }

    #[test]
    fn test_reply_err_maps_to_bridge_error() {
        let err: BridgeError = ReplyErr::Rejected("stale offsets".to_string()).into();
        assert!(matches!(err, BridgeError::ApplyConflict(_)));

        let err: BridgeError = ReplyErr::BufferNotFound("a.txt".to_string()).into();
        assert!(matches!(err, BridgeError::BufferNotFound(_)));
    }
}
