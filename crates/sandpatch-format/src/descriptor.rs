use sandpatch_wire::{CANARY_LEN, HASH_LEN, MAX_PATCH_SIZE};

use crate::digest::sha1_digest;
use crate::error::{FormatError, Result};

/// Per-descriptor flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchFlags {
    bits: u32,
}

impl PatchFlags {
    /// The target address may be patched at most once for the process
    /// lifetime.
    pub const WRITE_ONCE: PatchFlags = PatchFlags { bits: 1 };

    pub fn contains(self, other: PatchFlags) -> bool {
        self.bits & other.bits == other.bits
    }

    pub fn insert(&mut self, other: PatchFlags) {
        self.bits |= other.bits;
    }

    pub fn bits(self) -> u32 {
        self.bits
    }
}

/// A fully validated patch, the unit handed to the application engine.
///
/// Constructed only by the container parser and the socket marshaller;
/// anything that reaches the engine has already passed every invariant
/// below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchDescriptor {
    /// Content identifier of the target binary this patch was built for.
    pub build_id: [u8; HASH_LEN],
    /// Human-readable patch identifier.
    pub name: String,
    /// Machine code destined for the sandbox region.
    pub blob: Vec<u8>,
    /// Bytes that must be live at `jump_target` before patching.
    pub canary: [u8; CANARY_LEN],
    /// Absolute address the trampoline will redirect.
    pub jump_target: u64,
    /// SHA-1 of `blob`, verified independently on receipt.
    pub content_hash: [u8; HASH_LEN],
    pub flags: PatchFlags,
    /// Secondary fixups applied inside the blob before commit, each a
    /// byte offset of a 4-byte little-endian slot.
    pub relocations: Vec<u32>,
}

impl PatchDescriptor {
    /// Check the invariants the engine is allowed to assume.
    ///
    /// Size bounds on the blob and an independent recomputation of the
    /// content hash; the sender's word is never enough.
    pub fn validate(&self) -> Result<()> {
        if self.blob.is_empty() || self.blob.len() >= MAX_PATCH_SIZE {
            return Err(FormatError::Truncated("patch blob size"));
        }
        let computed = sha1_digest(&self.blob);
        if computed != self.content_hash {
            return Err(FormatError::HashMismatch {
                declared: hex::encode(self.content_hash),
                computed: hex::encode(computed),
            });
        }
        Ok(())
    }

    /// Hex rendering of the content hash for logs and listings.
    pub fn content_hash_hex(&self) -> String {
        hex::encode(self.content_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample() -> PatchDescriptor {
        let blob = vec![0x90u8; 16];
        PatchDescriptor {
            build_id: [0x42; HASH_LEN],
            name: "fix-divide".into(),
            content_hash: sha1_digest(&blob),
            blob,
            canary: [0xCC; CANARY_LEN],
            jump_target: 0x40_1000,
            flags: PatchFlags::WRITE_ONCE,
            relocations: Vec::new(),
        }
    }

    #[test]
    fn valid_descriptor_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn tampered_blob_fails_hash_check() {
        let mut desc = sample();
        desc.blob[3] ^= 0x01;
        assert!(matches!(
            desc.validate().unwrap_err(),
            FormatError::HashMismatch { .. }
        ));
    }

    #[test]
    fn empty_blob_rejected() {
        let mut desc = sample();
        desc.blob.clear();
        assert!(desc.validate().is_err());
    }

    #[test]
    fn oversized_blob_rejected() {
        let mut desc = sample();
        desc.blob = vec![0u8; MAX_PATCH_SIZE];
        desc.content_hash = sha1_digest(&desc.blob);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn flags_write_once() {
        let mut flags = PatchFlags::default();
        assert!(!flags.contains(PatchFlags::WRITE_ONCE));
        flags.insert(PatchFlags::WRITE_ONCE);
        assert!(flags.contains(PatchFlags::WRITE_ONCE));
        assert_eq!(flags.bits(), 1);
    }
}
