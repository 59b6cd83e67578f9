use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::error::{Result, WireError};
use crate::header::{MessageHeader, HEADER_SIZE};

/// Configuration shared by field readers and writers.
#[derive(Debug, Clone)]
pub struct FieldConfig {
    /// Read deadline applied to the underlying stream by the transport.
    pub read_timeout: Option<Duration>,
    /// Write deadline applied to the underlying stream by the transport.
    pub write_timeout: Option<Duration>,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            read_timeout: Some(Duration::from_secs(5)),
            write_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Reads headers and length-prefixed fields from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete fields
/// or a hard error. There is no recovery inside a frame — the connection
/// is the unit of failure.
pub struct FieldReader<T> {
    inner: T,
    consumed: u64,
}

impl<T: Read> FieldReader<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, consumed: 0 }
    }

    /// Total bytes consumed from the stream since construction.
    ///
    /// Lets a dispatcher measure how much of a declared frame body a
    /// failed parse actually took, and [`skip`](Self::skip) the rest.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Discard `len` raw bytes, e.g. the unread remainder of a frame
    /// whose body was rejected partway through.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        let mut remaining = len;
        let mut scratch = [0u8; 256];
        while remaining > 0 {
            let want = remaining.min(scratch.len());
            let got = self.read_full(&mut scratch[..want])?;
            if got < want {
                return Err(WireError::ShortRead {
                    expected: len,
                    got: len - remaining + got,
                });
            }
            remaining -= got;
        }
        Ok(())
    }

    /// Read and validate the fixed-size message header.
    ///
    /// A clean EOF before any header byte is `ConnectionClosed`; a torn
    /// header is `BadHeader`.
    pub fn read_header(&mut self) -> Result<MessageHeader> {
        let mut buf = [0u8; HEADER_SIZE];
        let got = self.read_full(&mut buf)?;
        if got == 0 {
            return Err(WireError::ConnectionClosed);
        }
        if got < HEADER_SIZE {
            return Err(WireError::BadHeader {
                expected: HEADER_SIZE,
                got,
            });
        }
        let header = MessageHeader::decode(&buf)?;
        trace!(id = header.id.as_u16(), length = header.length, "read header");
        Ok(header)
    }

    /// Read a field whose length prefix must equal `expected` exactly.
    ///
    /// Used for fixed-size fields: identifiers, hashes, canaries.
    pub fn read_exact_field(&mut self, expected: usize) -> Result<Vec<u8>> {
        let declared = self.read_len_prefix()?;
        if declared != expected {
            return Err(WireError::BadLength {
                got: declared,
                limit: expected,
            });
        }
        self.read_payload(declared)
    }

    /// Read a variable-size field bounded by `max`.
    ///
    /// The payload buffer is only allocated once the declared length has
    /// passed the bound check. Empty fields are rejected.
    pub fn read_bounded_field(&mut self, max: usize) -> Result<Vec<u8>> {
        let declared = self.read_len_prefix()?;
        if declared == 0 || declared > max {
            return Err(WireError::BadLength {
                got: declared,
                limit: max,
            });
        }
        self.read_payload(declared)
    }

    /// Read a fixed 8-byte little-endian numeric field.
    pub fn read_u64_field(&mut self) -> Result<u64> {
        let bytes = self.read_exact_field(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// Read a fixed 8-byte signed numeric field (status codes).
    pub fn read_i64_field(&mut self) -> Result<i64> {
        Ok(self.read_u64_field()? as i64)
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn read_len_prefix(&mut self) -> Result<usize> {
        let mut raw = [0u8; 4];
        let got = self.read_full(&mut raw)?;
        if got < raw.len() {
            return Err(WireError::ShortRead {
                expected: raw.len(),
                got,
            });
        }
        Ok(u32::from_le_bytes(raw) as usize)
    }

    fn read_payload(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let got = self.read_full(&mut buf)?;
        if got < len {
            return Err(WireError::ShortRead { expected: len, got });
        }
        Ok(buf)
    }

    /// Read until `buf` is full or EOF. Retries `EINTR`.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0usize;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }
        self.consumed += filled as u64;
        Ok(filled)
    }
}

/// Writes headers and length-prefixed fields to any `Write` stream.
///
/// A partial write is fatal to the connection; there is no partial-frame
/// recovery on the response path.
pub struct FieldWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> FieldWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Write the fixed-size message header.
    pub fn write_header(&mut self, header: &MessageHeader) -> Result<()> {
        self.buf.clear();
        header.encode(&mut self.buf);
        self.write_all_buffered()
    }

    /// Write one length-prefixed field: 4-byte length, then payload.
    pub fn write_field(&mut self, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        self.buf.reserve(4 + payload.len());
        self.buf.put_u32_le(payload.len() as u32);
        self.buf.put_slice(payload);
        self.write_all_buffered()
    }

    /// Write a fixed 8-byte little-endian numeric field.
    pub fn write_u64_field(&mut self, value: u64) -> Result<()> {
        self.write_field(&value.to_le_bytes())
    }

    /// Write a fixed 8-byte signed numeric field (status codes).
    pub fn write_i64_field(&mut self, value: i64) -> Result<()> {
        self.write_field(&value.to_le_bytes())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn write_all_buffered(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }
        self.flush()
    }
}
