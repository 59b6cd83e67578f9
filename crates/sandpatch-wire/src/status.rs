/// Response status codes.
///
/// Every response payload starts with one of these as a signed 8-byte
/// field. Zero is success; every failure class keeps a distinct negative
/// code so callers can tell a resource failure apart from a malformed
/// request without parsing anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadHeader,
    BadVersion,
    BadLength,
    BadMessageId,
    NoMemory,
    ReadWrite,
    HashMismatch,
    TargetMismatch,
    AlreadyApplied,
    RegionExhausted,
    UnsupportedFeature,
    BadFilename,
    Truncated,
    BadSignature,
    VersionMismatch,
}

impl Status {
    pub fn code(self) -> i64 {
        match self {
            Status::Ok => 0,
            Status::BadHeader => -2,
            Status::BadVersion => -3,
            Status::BadLength => -4,
            Status::BadMessageId => -5,
            Status::NoMemory => -6,
            Status::ReadWrite => -7,
            Status::HashMismatch => -8,
            Status::TargetMismatch => -9,
            Status::AlreadyApplied => -10,
            Status::RegionExhausted => -11,
            Status::UnsupportedFeature => -12,
            Status::BadFilename => -13,
            Status::Truncated => -14,
            Status::BadSignature => -15,
            Status::VersionMismatch => -16,
        }
    }

    /// Map a wire code back to a status. Unknown codes collapse to the
    /// generic read-write failure rather than panicking on a hostile peer.
    pub fn from_code(code: i64) -> Status {
        match code {
            0 => Status::Ok,
            -2 => Status::BadHeader,
            -3 => Status::BadVersion,
            -4 => Status::BadLength,
            -5 => Status::BadMessageId,
            -6 => Status::NoMemory,
            -8 => Status::HashMismatch,
            -9 => Status::TargetMismatch,
            -10 => Status::AlreadyApplied,
            -11 => Status::RegionExhausted,
            -12 => Status::UnsupportedFeature,
            -13 => Status::BadFilename,
            -14 => Status::Truncated,
            -15 => Status::BadSignature,
            -16 => Status::VersionMismatch,
            _ => Status::ReadWrite,
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::BadHeader => "bad-header",
            Status::BadVersion => "bad-version",
            Status::BadLength => "bad-length",
            Status::BadMessageId => "bad-message-id",
            Status::NoMemory => "no-memory",
            Status::ReadWrite => "read-write",
            Status::HashMismatch => "hash-mismatch",
            Status::TargetMismatch => "target-mismatch",
            Status::AlreadyApplied => "already-applied",
            Status::RegionExhausted => "region-exhausted",
            Status::UnsupportedFeature => "unsupported-feature",
            Status::BadFilename => "bad-filename",
            Status::Truncated => "truncated",
            Status::BadSignature => "bad-signature",
            Status::VersionMismatch => "version-mismatch",
        };
        write!(f, "{name} ({})", self.code())
    }
}
