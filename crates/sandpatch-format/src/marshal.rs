//! Socket marshalling for apply requests.
//!
//! Field order is fixed: build id, name, blob, canary, jump target,
//! content hash. The reader recomputes the blob hash itself; the trailing
//! hash field is a claim to verify, not a value to store.

use std::io::{Read, Write};

use tracing::debug;

use sandpatch_wire::{
    FieldReader, FieldWriter, CANARY_LEN, HASH_LEN, MAX_NAME_LEN, MAX_PATCH_SIZE,
};

use crate::descriptor::{PatchDescriptor, PatchFlags};
use crate::error::{FormatError, Result};

/// Payload size of the apply request for `desc`, for the message header.
pub fn apply_request_len(desc: &PatchDescriptor) -> usize {
    // Five length-prefixed fields plus the 8-byte jump target field.
    (4 + HASH_LEN)
        + (4 + desc.name.len())
        + (4 + desc.blob.len())
        + (4 + CANARY_LEN)
        + (4 + 8)
        + (4 + HASH_LEN)
}

/// Read an apply request body into a validated descriptor.
///
/// Bounds are enforced before any payload allocation; the content hash
/// is recomputed over the received blob and must match the trailing
/// field. Socket-borne patches always carry the write-once flag.
pub fn read_apply_request<T: Read>(reader: &mut FieldReader<T>) -> Result<PatchDescriptor> {
    let build_id = fixed::<HASH_LEN>(reader.read_exact_field(HASH_LEN)?);
    let name_bytes = reader.read_bounded_field(MAX_NAME_LEN)?;
    let name =
        String::from_utf8(name_bytes).map_err(|_| FormatError::Truncated("patch name"))?;
    let blob = reader.read_bounded_field(MAX_PATCH_SIZE - 1)?;
    let canary = fixed::<CANARY_LEN>(reader.read_exact_field(CANARY_LEN)?);
    let jump_target = reader.read_u64_field()?;
    let content_hash = fixed::<HASH_LEN>(reader.read_exact_field(HASH_LEN)?);

    let descriptor = PatchDescriptor {
        build_id,
        name,
        blob,
        canary,
        jump_target,
        content_hash,
        flags: PatchFlags::WRITE_ONCE,
        relocations: Vec::new(),
    };
    descriptor.validate()?;

    debug!(
        name = %descriptor.name,
        blob_len = descriptor.blob.len(),
        jump_target = format_args!("{:#x}", descriptor.jump_target),
        "received apply request"
    );
    Ok(descriptor)
}

/// Write the apply request body for `desc`.
///
/// The message header is the caller's job; size it with
/// [`apply_request_len`]. Relocations never travel over the socket.
pub fn write_apply_request<T: Write>(
    writer: &mut FieldWriter<T>,
    desc: &PatchDescriptor,
) -> Result<()> {
    writer.write_field(&desc.build_id)?;
    writer.write_field(desc.name.as_bytes())?;
    writer.write_field(&desc.blob)?;
    writer.write_field(&desc.canary)?;
    writer.write_u64_field(desc.jump_target)?;
    writer.write_field(&desc.content_hash)?;
    Ok(())
}

fn fixed<const N: usize>(bytes: Vec<u8>) -> [u8; N] {
    // read_exact_field already guaranteed the length.
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    out
}
