use std::time::SystemTime;

use sandpatch_wire::HASH_LEN;

/// Record of one successfully applied patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPatch {
    pub name: String,
    /// Content id of the target binary the patch was built for.
    pub build_id: [u8; HASH_LEN],
    pub content_hash: [u8; HASH_LEN],
    /// The entry address the trampoline was installed at.
    pub jump_target: u64,
    /// Where in the sandbox region the blob landed.
    pub sandbox_addr: u64,
    pub blob_len: usize,
    pub applied_at: SystemTime,
}

impl AppliedPatch {
    pub fn content_hash_hex(&self) -> String {
        hex::encode(self.content_hash)
    }
}

/// Every patch applied this process lifetime, in application order.
///
/// The registry backs both the write-once check and the list response.
/// Entries are never removed; there is no unpatch.
#[derive(Debug, Default)]
pub struct AppliedRegistry {
    entries: Vec<AppliedPatch>,
}

impl AppliedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, patch: AppliedPatch) {
        self.entries.push(patch);
    }

    /// Has this jump target been patched already?
    pub fn contains_target(&self, jump_target: u64) -> bool {
        self.entries.iter().any(|p| p.jump_target == jump_target)
    }

    pub fn find_by_hash(&self, content_hash: &[u8; HASH_LEN]) -> Option<&AppliedPatch> {
        self.entries.iter().find(|p| &p.content_hash == content_hash)
    }

    pub fn list(&self) -> &[AppliedPatch] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
