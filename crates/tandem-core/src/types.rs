//! Core types for the tandem bridge

use std::ops::Range;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a connected session
///
/// Assigned by the engine on connect. Uses ULID for time-ordered unique
/// identifiers that sort lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Ulid);

impl PeerId {
    /// Create a new PeerId with current timestamp
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse from string representation
    pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client configuration for establishing a session
///
/// No credentials: authentication belongs to the transport layer and is
/// out of scope here.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Display name attached to relayed cursor events
    pub user: String,
    /// Address of the engine to connect to, e.g. `mem://...`
    pub address: String,
}

impl SessionConfig {
    pub fn new(user: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            address: address.into(),
        }
    }
}

/// A cursor position in the external protocol coordinate space.
///
/// Rows are counted **from 1**; columns from 0. Local surfaces count rows
/// from 0, and the buffer adapter is the single place that translation
/// happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WirePosition {
    /// 1-based row
    pub row: u32,
    /// 0-based column
    pub col: u32,
}

impl From<(u32, u32)> for WirePosition {
    fn from((row, col): (u32, u32)) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for WirePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

/// A cursor position in local surface coordinates (rows counted from 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfacePosition {
    /// 0-based row
    pub row: usize,
    /// 0-based column
    pub col: usize,
}

impl From<(usize, usize)> for SurfacePosition {
    fn from((row, col): (usize, usize)) -> Self {
        Self { row, col }
    }
}

/// An editor-friendly representation of one discrete text change.
///
/// `span` is a half-open char range in the *previous* state of the text;
/// `text` is the new content that replaces it. Any combination of
/// insertion, deletion or replacement fits:
///
/// - insert "a" after the 4th character: `SurfaceEdit { span: 4..4, text: "a" }`
/// - delete the fourth character: `SurfaceEdit { span: 3..4, text: "" }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceEdit {
    /// Half-open char range in the previous text state
    pub span: Range<usize>,
    /// Replacement content for the span
    pub text: String,
}

impl SurfaceEdit {
    /// Replace `span` with `text`
    pub fn replace(span: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            span,
            text: text.into(),
        }
    }

    /// Insert `text` at char offset `at`
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::replace(at..at, text)
    }

    /// Delete the chars in `span`
    pub fn delete(span: Range<usize>) -> Self {
        Self::replace(span, "")
    }

    /// True if the edit changes nothing
    pub fn is_noop(&self) -> bool {
        self.span.is_empty() && self.text.is_empty()
    }
}

/// Notification that externally originated edits changed the converged
/// content of a buffer.
///
/// `span` is the affected char range in the *new* converged state.
/// Notifications arrive in engine resolution order and may overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    /// Affected char range in the new converged content
    pub span: Range<usize>,
    /// Engine revision after this change
    pub rev: u64,
}

/// A peer cursor update relayed through the session's cursor channel.
///
/// Coordinates are wire coordinates (1-based rows). No ordering guarantee
/// across distinct peers; for a single peer the last-received update is
/// authoritative for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorEvent {
    /// Display name of the peer that moved
    pub user: String,
    /// Buffer the cursor lives in
    pub buffer: String,
    /// Selection anchor
    pub anchor: WirePosition,
    /// Active cursor position
    pub position: WirePosition,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_roundtrip() {
        let id = PeerId::new();
        let parsed = PeerId::from_string(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_surface_edit_constructors() {
        let ins = SurfaceEdit::insert(4, "a");
        assert_eq!(ins.span, 4..4);
        assert_eq!(ins.text, "a");

        let del = SurfaceEdit::delete(3..4);
        assert_eq!(del.span, 3..4);
        assert!(del.text.is_empty());

        assert!(SurfaceEdit::replace(2..2, "").is_noop());
        assert!(!ins.is_noop());
    }

    #[test]
    fn test_wire_position_display() {
        let pos = WirePosition::from((5, 3));
        assert_eq!(format!("{}", pos), "5:3");
    }
}
