/// Errors that can occur while framing or field-streaming messages.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The stream ended before a complete header arrived.
    #[error("short header ({got} of {expected} bytes)")]
    BadHeader { expected: usize, got: usize },

    /// The header does not start with the `"SAND"` magic.
    #[error("invalid magic (expected \"SAND\")")]
    BadMagic,

    /// The peer speaks a protocol version this build does not.
    #[error("unsupported protocol version {got} (supported: {supported})")]
    BadVersion { got: u16, supported: u16 },

    /// The message id is outside the registered range.
    #[error("unknown message id {0}")]
    BadMessageId(u16),

    /// A declared length failed an exact-size or ceiling check.
    #[error("bad length {got} (limit {limit})")]
    BadLength { got: usize, limit: usize },

    /// Fewer bytes arrived than a field declared.
    #[error("short read ({got} of {expected} bytes)")]
    ShortRead { expected: usize, got: usize },

    /// The connection was closed mid-frame.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// An I/O error occurred on the underlying stream.
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WireError>;
