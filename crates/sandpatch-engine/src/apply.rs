use std::time::SystemTime;

use tracing::{debug, info};

use sandpatch_format::PatchDescriptor;
use sandpatch_wire::CANARY_LEN;

use crate::error::{ApplyError, Result};
use crate::mem::CodeMemory;
use crate::region::SandboxRegion;
use crate::registry::{AppliedPatch, AppliedRegistry};
use crate::trampoline;

/// Owns the sandbox region, the applied registry, and the code memory
/// they both describe. One engine per process; callers serialize access.
pub struct PatchEngine<M> {
    mem: M,
    region: SandboxRegion,
    registry: AppliedRegistry,
}

impl<M: CodeMemory> PatchEngine<M> {
    pub fn new(mem: M, region: SandboxRegion) -> Self {
        Self {
            mem,
            region,
            registry: AppliedRegistry::new(),
        }
    }

    pub fn registry(&self) -> &AppliedRegistry {
        &self.registry
    }

    pub fn region(&self) -> &SandboxRegion {
        &self.region
    }

    pub fn memory(&self) -> &M {
        &self.mem
    }

    /// Apply one validated descriptor.
    ///
    /// Every check runs before the first byte of live code changes, and
    /// the cursor and registry move only after the trampoline is in.
    /// On any error the engine state is untouched; the worst a failed
    /// apply leaves behind is staged bytes past the cursor, which the
    /// next successful apply overwrites.
    pub fn apply(&mut self, desc: &PatchDescriptor) -> Result<AppliedPatch> {
        if self.registry.contains_target(desc.jump_target) {
            return Err(ApplyError::AlreadyApplied {
                target: desc.jump_target,
            });
        }

        let mut live = [0u8; CANARY_LEN];
        self.mem.read_at(desc.jump_target, &mut live)?;
        if live != desc.canary {
            return Err(ApplyError::TargetMismatch {
                target: desc.jump_target,
            });
        }

        let dest = self.region.peek(desc.blob.len())?;
        let jump = trampoline::encode_jump(desc.jump_target, dest)?;
        let staged = stage_blob(desc, dest)?;

        debug!(
            name = %desc.name,
            dest = format_args!("{dest:#x}"),
            blob_len = staged.len(),
            relocations = desc.relocations.len(),
            "staging patch blob"
        );

        self.mem.commit(dest, &staged)?;
        self.mem.commit(desc.jump_target, &jump)?;

        self.region.advance(desc.blob.len());
        let record = AppliedPatch {
            name: desc.name.clone(),
            build_id: desc.build_id,
            content_hash: desc.content_hash,
            jump_target: desc.jump_target,
            sandbox_addr: dest,
            blob_len: desc.blob.len(),
            applied_at: SystemTime::now(),
        };
        self.registry.record(record.clone());

        info!(
            name = %desc.name,
            hash = %desc.content_hash_hex(),
            target = format_args!("{:#x}", desc.jump_target),
            dest = format_args!("{dest:#x}"),
            "patch applied"
        );
        Ok(record)
    }
}

/// Copy the blob and rebase its relocation slots for placement at
/// `dest`. Each slot holds a 32-bit value relative to a zero base; the
/// low half of the placement address is folded in with wrapping
/// arithmetic, matching how the blobs are linked.
fn stage_blob(desc: &PatchDescriptor, dest: u64) -> Result<Vec<u8>> {
    let mut staged = desc.blob.clone();
    for &offset in &desc.relocations {
        let start = offset as usize;
        let end = start
            .checked_add(4)
            .filter(|&end| end <= staged.len())
            .ok_or(ApplyError::BadRelocation {
                offset,
                blob_len: staged.len(),
            })?;
        let slot = [
            staged[start],
            staged[start + 1],
            staged[start + 2],
            staged[start + 3],
        ];
        let rebased = u32::from_le_bytes(slot).wrapping_add(dest as u32);
        staged[start..end].copy_from_slice(&rebased.to_le_bytes());
    }
    Ok(staged)
}
