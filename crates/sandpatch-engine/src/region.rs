use crate::error::{ApplyError, Result};

/// Blob placements start on 16-byte boundaries.
pub const REGION_ALIGN: usize = 16;

/// Append-only allocator over the reserved sandbox address range.
///
/// `peek` answers where the next blob would land without moving the
/// cursor; `advance` moves it only after the blob has been committed.
/// Nothing here ever frees: exhaustion is terminal for the process.
#[derive(Debug, Clone)]
pub struct SandboxRegion {
    base: u64,
    size: usize,
    cursor: usize,
}

impl SandboxRegion {
    pub fn new(base: u64, size: usize) -> Self {
        Self {
            base,
            size,
            cursor: 0,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn used(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.size - self.cursor
    }

    /// Address the next `len`-byte blob would occupy, or exhaustion.
    pub fn peek(&self, len: usize) -> Result<u64> {
        if len > self.remaining() {
            return Err(ApplyError::RegionExhausted {
                needed: len,
                available: self.remaining(),
            });
        }
        Ok(self.base + self.cursor as u64)
    }

    /// Consume `len` bytes, rounding the cursor up to the next
    /// placement boundary. Callers must have peeked the same length.
    pub fn advance(&mut self, len: usize) {
        debug_assert!(len <= self.remaining());
        let padded = len.div_ceil(REGION_ALIGN) * REGION_ALIGN;
        self.cursor = (self.cursor + padded).min(self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_does_not_move_cursor() {
        let region = SandboxRegion::new(0x7000_0000, 256);
        assert_eq!(region.peek(64).unwrap(), 0x7000_0000);
        assert_eq!(region.peek(64).unwrap(), 0x7000_0000);
        assert_eq!(region.used(), 0);
    }

    #[test]
    fn advance_aligns_next_placement() {
        let mut region = SandboxRegion::new(0x7000_0000, 256);
        region.advance(5);
        assert_eq!(region.peek(16).unwrap(), 0x7000_0010);
        region.advance(16);
        assert_eq!(region.peek(16).unwrap(), 0x7000_0020);
    }

    #[test]
    fn exhaustion_reports_need_and_availability() {
        let mut region = SandboxRegion::new(0x7000_0000, 64);
        region.advance(48);
        match region.peek(32).unwrap_err() {
            ApplyError::RegionExhausted { needed, available } => {
                assert_eq!(needed, 32);
                assert_eq!(available, 16);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
