/// Errors from parsing or constructing primitive types.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    /// Hex string could not be decoded.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Byte sequence has the wrong length.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
