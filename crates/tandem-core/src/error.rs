//! Error types for the tandem bridge

use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Transport unreachable or address malformed; fatal to the requested
    /// operation, never retried automatically
    #[error("Connection error: {0}")]
    Connection(String),

    /// Attach target does not exist remotely
    #[error("Buffer not found: {0}")]
    BufferNotFound(String),

    /// Create target already exists remotely
    #[error("Buffer already exists: {0}")]
    BufferExists(String),

    /// Engine rejected an edit, typically stale offsets against a state
    /// that has since diverged
    #[error("Apply conflict: {0}")]
    ApplyConflict(String),

    /// Engine-side failure that is not one of the specific cases above
    #[error("Engine error: {0}")]
    Engine(String),

    /// The local text surface rejected a programmatic mutation
    #[error("Surface error: {0}")]
    Surface(String),

    /// An internal channel closed before the operation completed
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Wire frame carried an unknown protocol version
    #[error("Wire version {0} is not supported")]
    WireVersionUnsupported(u8),

    /// Error during wire serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// The user dismissed an interactive prompt; aborts silently,
    /// not reported as a failure
    #[error("Cancelled by user")]
    Cancelled,
}

/// Result type alias using BridgeError
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::BufferNotFound("a.txt".to_string());
        assert_eq!(format!("{}", err), "Buffer not found: a.txt");

        let err = BridgeError::WireVersionUnsupported(7);
        assert_eq!(format!("{}", err), "Wire version 7 is not supported");
    }

    #[test]
    fn test_error_from_postcard() {
        let bad = postcard::from_bytes::<u32>(&[]);
        let err: BridgeError = bad.unwrap_err().into();
        assert!(matches!(err, BridgeError::Serialization(_)));
    }
}
