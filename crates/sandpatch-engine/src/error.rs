use sandpatch_wire::Status;

/// Failures while applying a patch. None of these advance the sandbox
/// cursor or touch the applied registry; a failed apply leaves the
/// engine exactly as it was.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// The bytes live at the jump target do not match the canary the
    /// patch was built against.
    #[error("canary mismatch at {target:#x}: target code differs from expectation")]
    TargetMismatch { target: u64 },

    /// The jump target has already been patched this process lifetime.
    #[error("address {target:#x} already patched")]
    AlreadyApplied { target: u64 },

    /// The sandbox region cannot hold the blob.
    #[error("sandbox region exhausted: need {needed} bytes, {available} available")]
    RegionExhausted { needed: usize, available: usize },

    /// The jump from target to sandbox does not fit a rel32 branch.
    #[error("jump from {from:#x} to {to:#x} exceeds rel32 range")]
    DisplacementOverflow { from: u64, to: u64 },

    /// A relocation names a slot outside the blob.
    #[error("relocation at offset {offset:#x} outside blob of {blob_len} bytes")]
    BadRelocation { offset: u32, blob_len: usize },

    /// An address outside the memory this engine is allowed to touch.
    #[error("address range {addr:#x}+{len} is not mapped for patching")]
    Unmapped { addr: u64, len: usize },

    /// Mapping or protection change failed.
    #[error("code memory mapping failed: {0}")]
    Map(#[source] std::io::Error),
}

impl ApplyError {
    /// The wire status code reported to a peer for this failure.
    pub fn status(&self) -> Status {
        match self {
            ApplyError::TargetMismatch { .. } => Status::TargetMismatch,
            ApplyError::AlreadyApplied { .. } => Status::AlreadyApplied,
            ApplyError::RegionExhausted { .. } => Status::RegionExhausted,
            ApplyError::DisplacementOverflow { .. } => Status::UnsupportedFeature,
            ApplyError::BadRelocation { .. } => Status::Truncated,
            ApplyError::Unmapped { .. } => Status::ReadWrite,
            ApplyError::Map(_) => Status::NoMemory,
        }
    }
}

pub type Result<T> = std::result::Result<T, ApplyError>;
