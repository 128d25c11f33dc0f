use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

/// A record that cannot be turned back into a tree.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown node kind: {0:?}")]
    UnknownKind(String),

    #[error("Object is not a node (no `kind` field)")]
    NotANode,

    #[error("Missing field `{field}` on {kind} node")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("Invalid field `{field}` on {kind} node: expected {expected}")]
    InvalidField {
        kind: &'static str,
        field: &'static str,
        expected: &'static str,
    },

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Invalid placeholder id: {0:?}")]
    InvalidPlaceholderId(String),

    #[error("Record size {size} exceeds maximum allowed size {max}")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Truncated record at end of stream")]
    Truncated,
}

/// A tree that cannot be put on the wire.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Component {0:?} was not rendered before encoding")]
    UnrenderedComponent(String),

    #[error("Tree nests deeper than {max} levels")]
    TooDeep { max: usize },

    #[error("Failed to serialize record: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Chunk targets {id}, which is not a live placeholder")]
    UnresolvedPlaceholder { id: String },

    #[error("Deferred subtree {id} failed: {reason}")]
    RenderTask { id: String, reason: String },

    #[error("Stream closed with {} unresolved placeholder(s): {}", ids.len(), ids.join(", "))]
    StreamTerminatedEarly { ids: Vec<String> },

    #[error("First chunk targets {target}, expected base")]
    MissingBase { target: String },

    #[error("Stream closed before the base chunk arrived")]
    EmptyStream,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StreamError {
    /// Whether the error makes the whole session unreadable.
    ///
    /// Subtree-local failures and protocol anomalies are reported but leave the
    /// rest of the tree usable.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(
            self,
            StreamError::UnresolvedPlaceholder { .. }
                | StreamError::RenderTask { .. }
                | StreamError::StreamTerminatedEarly { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(StreamError::Decode(DecodeError::UnknownKind("x".into())).is_session_fatal());
        assert!(StreamError::EmptyStream.is_session_fatal());
        assert!(!StreamError::UnresolvedPlaceholder { id: "C:9".into() }.is_session_fatal());
        assert!(!StreamError::StreamTerminatedEarly { ids: vec![] }.is_session_fatal());
    }

    #[test]
    fn test_terminated_early_message() {
        let err = StreamError::StreamTerminatedEarly {
            ids: vec!["C:1".into(), "C:3".into()],
        };
        assert_eq!(
            err.to_string(),
            "Stream closed with 2 unresolved placeholder(s): C:1, C:3"
        );
    }
}
