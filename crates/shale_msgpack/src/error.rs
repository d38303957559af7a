use thiserror::Error;

/// Every failure the engine produces, tagged by kind. Surfaced through
/// `anyhow::Error`; callers can downcast to match on the tag.
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("input is not valid MessagePack: {0}")]
    DecodeFormat(String),
    #[error("buffer does not contain enough bytes to perform read")]
    TruncatedInput,
    #[error("nil encountered where a value of type `{0}` was required")]
    UnexpectedNil(&'static str),
    #[error("maximum serialization depth exceeded")]
    DepthExceeded,
    #[error("type shape cannot be serialized: {0}")]
    ShapeConstruction(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("the operation was cancelled")]
    Cancelled,
}

impl SerializationError {
    /// True if `err` is (or wraps) the given tag, ignoring payloads.
    pub fn is(err: &anyhow::Error, tag: fn(&SerializationError) -> bool) -> bool {
        err.downcast_ref::<SerializationError>().map_or(false, tag)
    }
}

pub(crate) fn decode_format(message: impl Into<String>) -> anyhow::Error {
    SerializationError::DecodeFormat(message.into()).into()
}

pub(crate) fn is_truncated(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<SerializationError>(),
        Some(SerializationError::TruncatedInput)
    )
}
