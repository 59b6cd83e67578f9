//! The memory seam between patch bookkeeping and live code bytes.
//!
//! Everything unsafe in this crate lives behind [`CodeMemory`]. The
//! production implementation is an anonymous executable mapping; tests
//! use [`BufferMemory`], a plain byte buffer with the same addressing.

use crate::error::{ApplyError, Result};

/// Readable, patchable code memory addressed by absolute address.
///
/// Implementations own a contiguous range and refuse addresses outside
/// it. `commit` makes the written bytes executable before returning.
pub trait CodeMemory {
    /// Lowest address this memory covers.
    fn base(&self) -> u64;

    /// Bytes covered starting at `base`.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `buf.len()` bytes from `addr` into `buf`.
    fn read_at(&self, addr: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `addr` and make it executable.
    fn commit(&mut self, addr: u64, data: &[u8]) -> Result<()>;
}

fn offset_of(base: u64, len: usize, addr: u64, want: usize) -> Result<usize> {
    let unmapped = ApplyError::Unmapped { addr, len: want };
    let offset = addr.checked_sub(base).ok_or(unmapped)? as usize;
    if offset.checked_add(want).is_none_or(|end| end > len) {
        return Err(ApplyError::Unmapped { addr, len: want });
    }
    Ok(offset)
}

/// Anonymous read/execute mapping; pages flip writable only for the
/// duration of a commit.
#[cfg(unix)]
pub struct MappedSandbox {
    base: *mut u8,
    size: usize,
}

// The mapping is owned exclusively; raw pointers are only dereferenced
// through &self/&mut self methods.
#[cfg(unix)]
unsafe impl Send for MappedSandbox {}

#[cfg(unix)]
impl MappedSandbox {
    /// Map `size` bytes (rounded up to whole pages) of zeroed,
    /// executable memory.
    pub fn new(size: usize) -> Result<Self> {
        let size = round_to_pages(size);
        // SAFETY: anonymous private mapping, no fd, kernel picks the
        // address; failure is MAP_FAILED checked below.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ApplyError::Map(std::io::Error::last_os_error()));
        }
        Ok(Self {
            base: base.cast(),
            size,
        })
    }

    fn protect(&mut self, offset: usize, len: usize, prot: libc::c_int) -> Result<()> {
        let page = page_size();
        let start = offset / page * page;
        let span = round_to_pages(offset + len - start);
        // SAFETY: [start, start+span) is within our own mapping.
        let rc = unsafe { libc::mprotect(self.base.add(start).cast(), span, prot) };
        if rc != 0 {
            return Err(ApplyError::Map(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

#[cfg(unix)]
impl CodeMemory for MappedSandbox {
    fn base(&self) -> u64 {
        self.base as u64
    }

    fn len(&self) -> usize {
        self.size
    }

    fn read_at(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let offset = offset_of(self.base as u64, self.size, addr, buf.len())?;
        // SAFETY: range checked above; mapping is always readable.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    fn commit(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let offset = offset_of(self.base as u64, self.size, addr, data.len())?;
        self.protect(offset, data.len(), libc::PROT_READ | libc::PROT_WRITE)?;
        // SAFETY: range checked, pages writable for the copy.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(offset), data.len());
        }
        self.protect(offset, data.len(), libc::PROT_READ | libc::PROT_EXEC)
    }
}

#[cfg(unix)]
impl Drop for MappedSandbox {
    fn drop(&mut self) {
        // SAFETY: unmapping the mapping we created; errors at teardown
        // have nowhere to go.
        unsafe {
            libc::munmap(self.base.cast(), self.size);
        }
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf with a valid constant.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(unix)]
fn round_to_pages(size: usize) -> usize {
    let page = page_size();
    size.div_ceil(page) * page
}

/// In-memory double for tests: same addressing contract, no page
/// protection games.
pub struct BufferMemory {
    base: u64,
    bytes: Vec<u8>,
}

impl BufferMemory {
    pub fn new(base: u64, size: usize) -> Self {
        Self {
            base,
            bytes: vec![0u8; size],
        }
    }

    /// Seed bytes without going through the commit path.
    pub fn preload(&mut self, addr: u64, data: &[u8]) {
        let offset = (addr - self.base) as usize;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn bytes_at(&self, addr: u64, len: usize) -> &[u8] {
        let offset = (addr - self.base) as usize;
        &self.bytes[offset..offset + len]
    }
}

impl CodeMemory for BufferMemory {
    fn base(&self) -> u64 {
        self.base
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read_at(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let offset = offset_of(self.base, self.bytes.len(), addr, buf.len())?;
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn commit(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let offset = offset_of(self.base, self.bytes.len(), addr, data.len())?;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_memory_roundtrip() {
        let mut mem = BufferMemory::new(0x4000, 128);
        mem.commit(0x4010, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        mem.read_at(0x4010, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn out_of_range_addresses_refused() {
        let mut mem = BufferMemory::new(0x4000, 128);
        let mut buf = [0u8; 4];
        assert!(matches!(
            mem.read_at(0x3000, &mut buf).unwrap_err(),
            ApplyError::Unmapped { .. }
        ));
        assert!(matches!(
            mem.commit(0x4000 + 126, &[0; 4]).unwrap_err(),
            ApplyError::Unmapped { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn mapped_sandbox_commit_and_read_back() {
        let mut mem = MappedSandbox::new(4096).unwrap();
        let base = CodeMemory::base(&mem);
        mem.commit(base + 64, &[0xE9, 0x10, 0x00, 0x00, 0x00]).unwrap();

        let mut buf = [0u8; 5];
        mem.read_at(base + 64, &mut buf).unwrap();
        assert_eq!(buf, [0xE9, 0x10, 0x00, 0x00, 0x00]);
    }

    #[cfg(unix)]
    #[test]
    fn mapped_sandbox_commit_spanning_pages() {
        let mut mem = MappedSandbox::new(2 * page_size()).unwrap();
        let base = CodeMemory::base(&mem);
        let data = vec![0xAB; 64];
        mem.commit(base + page_size() as u64 - 32, &data).unwrap();

        let mut buf = vec![0u8; 64];
        mem.read_at(base + page_size() as u64 - 32, &mut buf).unwrap();
        assert_eq!(buf, data);
    }
}
