use sandpatch_wire::{Status, WireError};

/// Errors raised while parsing a patch container or marshalling an apply
/// request. Parsing is all-or-nothing; any of these means no descriptor
/// was produced.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The filename is not of the form `<40-hex-sha1>.raxlpxs`.
    #[error("bad patch filename {0:?} (expected <sha1>.raxlpxs)")]
    BadFilename(String),

    /// Content hash does not match what was declared.
    #[error("hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch { declared: String, computed: String },

    /// The container does not start with the format cookie.
    #[error("invalid container signature")]
    BadSignature,

    /// The container ended inside the named section, or a count there
    /// was implausible for the bytes available.
    #[error("truncated container (in {0})")]
    Truncated(&'static str),

    /// The patch targets a different build of the running binary.
    #[error("patch targets a different {field}")]
    VersionMismatch { field: &'static str },

    /// The container uses a legacy feature this applier refuses to carry.
    #[error("unsupported container feature: {0}")]
    UnsupportedFeature(&'static str),

    /// A wire-level failure while marshalling from a socket.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// An I/O failure reading a container file.
    #[error("container I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FormatError {
    /// The wire status code reported to a peer for this failure.
    pub fn status(&self) -> Status {
        match self {
            FormatError::BadFilename(_) => Status::BadFilename,
            FormatError::HashMismatch { .. } => Status::HashMismatch,
            FormatError::BadSignature => Status::BadSignature,
            FormatError::Truncated(_) => Status::Truncated,
            FormatError::VersionMismatch { .. } => Status::VersionMismatch,
            FormatError::UnsupportedFeature(_) => Status::UnsupportedFeature,
            FormatError::Wire(WireError::BadLength { .. }) => Status::BadLength,
            FormatError::Wire(_) => Status::ReadWrite,
            FormatError::Io(_) => Status::ReadWrite,
        }
    }
}

pub type Result<T> = std::result::Result<T, FormatError>;
