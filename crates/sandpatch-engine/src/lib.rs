//! Patch application for sandpatch.
//!
//! The engine takes validated [`PatchDescriptor`]s and lands them:
//! canary check against the live bytes, blob placement in the
//! append-only sandbox region, then a rel32 trampoline at the old entry
//! point. All unsafety sits behind the [`CodeMemory`] trait.
//!
//! [`PatchDescriptor`]: sandpatch_format::PatchDescriptor

pub mod apply;
pub mod error;
pub mod mem;
pub mod region;
pub mod registry;
pub mod trampoline;

pub use apply::PatchEngine;
pub use error::{ApplyError, Result};
pub use mem::{BufferMemory, CodeMemory};
#[cfg(unix)]
pub use mem::MappedSandbox;
pub use region::{SandboxRegion, REGION_ALIGN};
pub use registry::{AppliedPatch, AppliedRegistry};
pub use trampoline::{encode_jump, TRAMPOLINE_LEN};
