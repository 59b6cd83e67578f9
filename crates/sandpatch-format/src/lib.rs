//! Patch containers and descriptors for sandpatch.
//!
//! Two independent intake paths produce the same [`PatchDescriptor`]:
//! the on-disk `<sha1>.raxlpxs` container ([`file`]) and the socket-borne
//! apply request ([`marshal`]). Both verify content hashes themselves —
//! a hash asserted by the sender is never trusted.

pub mod descriptor;
pub mod digest;
pub mod error;
pub mod file;
pub mod marshal;

pub use descriptor::{PatchDescriptor, PatchFlags};
pub use digest::{sha1_digest, sha1_hex};
pub use error::{FormatError, Result};
pub use file::{
    content_filename, extract_hash_from_filename, CheckEntry, FunctionPatch, PatchFile,
    TablePatch, PATCH_FILE_COOKIE, PATCH_FILE_EXT,
};
pub use marshal::{apply_request_len, read_apply_request, write_apply_request};
