use hearth_types::Cid;

/// Errors from event encoding and metadata document decoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClockError {
    /// An entry's declared CID is not the hash of its event bytes.
    #[error("event cid mismatch: declared {declared}, computed {computed}")]
    CidMismatch { declared: Cid, computed: Cid },

    /// An entry's parent list disagrees with the parents inside the event.
    #[error("parent list of event {0} does not match its encoded parents")]
    ParentMismatch(Cid),

    #[error("invalid event data: {0}")]
    InvalidData(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias for clock results.
pub type ClockResult<T> = Result<T, ClockError>;
