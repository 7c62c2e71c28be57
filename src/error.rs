//! Error types for textbtree.

use std::fmt;

/// Result type alias for textbtree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for textbtree operations.
///
/// Only caller input can fail. Broken structural invariants are reported by
/// [`BTree::check`](crate::BTree::check) as a panic, never through this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A bulk-load record was rejected. `record` is its zero-based position.
    Load { record: usize, kind: LoadErrorKind },
    /// No mark with this name exists.
    UnknownMark(String),
    /// The name cannot be used for a mark.
    InvalidMarkName(String),
    /// No tag with this name exists.
    UnknownTag(String),
    /// The peer slot is not registered.
    InvalidPeer(usize),
    /// A peer range whose start lies after its end.
    InvalidPeerRange { start: usize, end: usize },
    /// Explicit line lookup past the last line.
    LineOutOfRange { line: usize, line_count: usize },
}

/// Why a bulk-load record was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadErrorKind {
    /// `Setup` may only appear as the first record.
    SetupNotFirst,
    /// Text records hold a single line fragment; newlines use `Break`.
    NewlineInText,
    /// A content record names a tag that was never configured.
    UnknownTag(String),
    /// A mark record carries an unusable name.
    InvalidMarkName(String),
    /// An elide-off record without a matching elide-on.
    UnmatchedElideEnd,
    /// Input ended inside an elided run.
    UnterminatedElide,
    /// An image or window record without a name.
    EmptyEmbedName,
}

impl fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetupNotFirst => write!(f, "setup must be the first record"),
            Self::NewlineInText => write!(f, "text contains a newline"),
            Self::UnknownTag(name) => write!(f, "unknown tag \"{name}\""),
            Self::InvalidMarkName(name) => write!(f, "invalid mark name \"{name}\""),
            Self::UnmatchedElideEnd => write!(f, "elide end without elide start"),
            Self::UnterminatedElide => write!(f, "elide start without elide end"),
            Self::EmptyEmbedName => write!(f, "embedded object without a name"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { record, kind } => write!(f, "load record {record}: {kind}"),
            Self::UnknownMark(name) => write!(f, "unknown mark \"{name}\""),
            Self::InvalidMarkName(name) => write!(f, "invalid mark name \"{name}\""),
            Self::UnknownTag(name) => write!(f, "unknown tag \"{name}\""),
            Self::InvalidPeer(peer) => write!(f, "peer {peer} is not registered"),
            Self::InvalidPeerRange { start, end } => {
                write!(f, "invalid peer range: line {start} after line {end}")
            }
            Self::LineOutOfRange { line, line_count } => {
                write!(f, "line {line} out of range for {line_count} lines")
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Load {
            record: 3,
            kind: LoadErrorKind::NewlineInText,
        };
        assert_eq!(err.to_string(), "load record 3: text contains a newline");

        let err = Error::UnknownMark("insert".to_string());
        assert!(err.to_string().contains("\"insert\""));

        let err = Error::LineOutOfRange {
            line: 10,
            line_count: 4,
        };
        assert!(err.to_string().contains("line 10"));
    }

    #[test]
    fn test_error_is_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(Error::InvalidPeer(2));
        assert_eq!(err.to_string(), "peer 2 is not registered");
    }
}
