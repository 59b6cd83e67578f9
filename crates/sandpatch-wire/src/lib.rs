//! Wire protocol for the sandpatch live-patch socket.
//!
//! Every message starts with a fixed 12-byte header:
//! - 4-byte magic `"SAND"` for stream synchronization
//! - 2-byte little-endian protocol version (currently 1)
//! - 2-byte little-endian message id
//! - 4-byte little-endian total message length
//!
//! The payload is a sequence of length-prefixed fields: a 4-byte
//! little-endian length followed by that many bytes. No partial reads,
//! no buffer management in user code.

pub mod error;
pub mod field;
pub mod header;
pub mod status;

pub use error::{Result, WireError};
pub use field::{FieldConfig, FieldReader, FieldWriter};
pub use header::{
    MessageHeader, MessageId, HEADER_SIZE, MAGIC, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use status::Status;

/// Hard ceiling on a single patch blob.
pub const MAX_PATCH_SIZE: usize = 64 * 1024;

/// Longest accepted patch name.
pub const MAX_NAME_LEN: usize = 64;

/// Exact size of a build id / content hash field.
pub const HASH_LEN: usize = 20;

/// Exact size of the canary precondition field.
pub const CANARY_LEN: usize = 32;
