use crate::error::{ApplyError, Result};

/// A rel32 jump: opcode byte plus 4-byte displacement.
pub const TRAMPOLINE_LEN: usize = 5;

const JMP_REL32: u8 = 0xE9;

/// Encode the near jump installed at a patched function's entry.
///
/// The displacement is relative to the instruction after the jump, so
/// `to - from - 5`. Targets outside rel32 range are refused rather than
/// silently wrapped.
pub fn encode_jump(from: u64, to: u64) -> Result<[u8; TRAMPOLINE_LEN]> {
    let disp = (to as i128) - (from as i128) - TRAMPOLINE_LEN as i128;
    let disp = i32::try_from(disp)
        .map_err(|_| ApplyError::DisplacementOverflow { from, to })?;

    let mut bytes = [0u8; TRAMPOLINE_LEN];
    bytes[0] = JMP_REL32;
    bytes[1..].copy_from_slice(&disp.to_le_bytes());
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_jump_displacement() {
        let bytes = encode_jump(0x1000, 0x2000).unwrap();
        assert_eq!(bytes[0], 0xE9);
        assert_eq!(i32::from_le_bytes(bytes[1..].try_into().unwrap()), 0x0FFB);
    }

    #[test]
    fn backward_jump_displacement() {
        let bytes = encode_jump(0x2000, 0x1000).unwrap();
        assert_eq!(
            i32::from_le_bytes(bytes[1..].try_into().unwrap()),
            -0x1005
        );
    }

    #[test]
    fn rel32_range_enforced() {
        // Just over 2 GiB forward.
        let err = encode_jump(0x1000, 0x1000 + 5 + (i32::MAX as u64) + 1).unwrap_err();
        assert!(matches!(err, ApplyError::DisplacementOverflow { .. }));

        // Extremes that still fit.
        assert!(encode_jump(0x1000, 0x1000 + 5 + i32::MAX as u64).is_ok());
        let far_back = (i32::MIN as i64).unsigned_abs() + 0x1000;
        let nearest_wrap = far_back - (i32::MIN as i64).unsigned_abs() + 5;
        assert_eq!(
            encode_jump(far_back, nearest_wrap).unwrap()[1..],
            i32::MIN.to_le_bytes()
        );
    }

    #[test]
    fn zero_displacement_falls_through() {
        let bytes = encode_jump(0x1000, 0x1005).unwrap();
        assert_eq!(bytes, [0xE9, 0, 0, 0, 0]);
    }
}
