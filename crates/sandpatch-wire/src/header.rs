use bytes::{BufMut, BytesMut};

use crate::error::{Result, WireError};

/// Fixed header size: magic (4) + version (2) + id (2) + length (4).
pub const HEADER_SIZE: usize = 12;

/// Magic bytes: "SAND".
pub const MAGIC: [u8; 4] = *b"SAND";

/// The single protocol version this build speaks.
///
/// The total-length field is a 4-byte integer as of version 1. Peers
/// declaring any other version are rejected, never silently truncated.
pub const PROTOCOL_VERSION: u16 = 1;

/// Ceiling on the declared total length of one message.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Registered message ids.
///
/// Exhaustively matched everywhere a message is routed; adding an id is a
/// compile-time decision, not an array index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageId {
    Apply = 1,
    ApplyResponse = 2,
    List = 3,
    ListResponse = 4,
    GetBuildInfo = 5,
    BuildInfoResponse = 6,
}

impl MessageId {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether this id names a request a server is expected to handle.
    pub fn is_request(self) -> bool {
        matches!(self, Self::Apply | Self::List | Self::GetBuildInfo)
    }

    /// The response id paired with a request id.
    pub fn response_id(self) -> MessageId {
        match self {
            Self::Apply | Self::ApplyResponse => Self::ApplyResponse,
            Self::List | Self::ListResponse => Self::ListResponse,
            Self::GetBuildInfo | Self::BuildInfoResponse => Self::BuildInfoResponse,
        }
    }
}

impl TryFrom<u16> for MessageId {
    type Error = WireError;

    fn try_from(raw: u16) -> Result<Self> {
        match raw {
            1 => Ok(Self::Apply),
            2 => Ok(Self::ApplyResponse),
            3 => Ok(Self::List),
            4 => Ok(Self::ListResponse),
            5 => Ok(Self::GetBuildInfo),
            6 => Ok(Self::BuildInfoResponse),
            other => Err(WireError::BadMessageId(other)),
        }
    }
}

/// Decoded framing header.
///
/// Only ever produced fully validated; callers never see a partially
/// decoded header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u16,
    pub id: MessageId,
    /// Declared total message length, header included.
    pub length: u32,
}

impl MessageHeader {
    /// Build a header for a message whose payload is `payload_len` bytes.
    pub fn new(id: MessageId, payload_len: usize) -> Result<Self> {
        let total = HEADER_SIZE + payload_len;
        if total > MAX_MESSAGE_SIZE {
            return Err(WireError::BadLength {
                got: total,
                limit: MAX_MESSAGE_SIZE,
            });
        }
        Ok(Self {
            version: PROTOCOL_VERSION,
            id,
            length: total as u32,
        })
    }

    /// Encode into the fixed wire layout.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_slice(&MAGIC);
        dst.put_u16_le(self.version);
        dst.put_u16_le(self.id.as_u16());
        dst.put_u32_le(self.length);
    }

    /// Decode and validate a fixed-size header prefix.
    ///
    /// Checks run in order and short-circuit: magic, version, message id,
    /// declared length. Nothing is allocated from the unvalidated length.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::BadHeader {
                expected: HEADER_SIZE,
                got: buf.len(),
            });
        }
        if buf[0..4] != MAGIC {
            return Err(WireError::BadMagic);
        }
        // Version and id are independent fixed offsets (4 and 6). The
        // C implementation this protocol descends from extracted both
        // through the version accessor; that defect is not carried here.
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != PROTOCOL_VERSION {
            return Err(WireError::BadVersion {
                got: version,
                supported: PROTOCOL_VERSION,
            });
        }
        let id = MessageId::try_from(u16::from_le_bytes([buf[6], buf[7]]))?;
        let length = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if length as usize > MAX_MESSAGE_SIZE || (length as usize) < HEADER_SIZE {
            return Err(WireError::BadLength {
                got: length as usize,
                limit: MAX_MESSAGE_SIZE,
            });
        }
        Ok(Self {
            version,
            id,
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(id: MessageId, payload_len: usize) -> BytesMut {
        let mut buf = BytesMut::new();
        MessageHeader::new(id, payload_len).unwrap().encode(&mut buf);
        buf
    }

    #[test]
    fn roundtrip() {
        let buf = encoded(MessageId::Apply, 96);
        let header = MessageHeader::decode(&buf).unwrap();
        assert_eq!(header.id, MessageId::Apply);
        assert_eq!(header.version, PROTOCOL_VERSION);
        assert_eq!(header.length as usize, HEADER_SIZE + 96);
    }

    #[test]
    fn short_prefix_is_bad_header() {
        let buf = encoded(MessageId::List, 0);
        let err = MessageHeader::decode(&buf[..HEADER_SIZE - 3]).unwrap_err();
        assert!(matches!(err, WireError::BadHeader { got: 9, .. }));
    }

    #[test]
    fn wrong_magic_rejected() {
        let mut buf = encoded(MessageId::List, 0);
        buf[0] = b'X';
        assert!(matches!(
            MessageHeader::decode(&buf),
            Err(WireError::BadMagic)
        ));
    }

    #[test]
    fn wrong_version_rejected() {
        let mut buf = encoded(MessageId::List, 0);
        buf[4] = 9;
        assert!(matches!(
            MessageHeader::decode(&buf),
            Err(WireError::BadVersion { got: 9, .. })
        ));
    }

    #[test]
    fn unknown_id_rejected() {
        let mut buf = encoded(MessageId::List, 0);
        buf[6] = 99;
        assert!(matches!(
            MessageHeader::decode(&buf),
            Err(WireError::BadMessageId(99))
        ));
    }

    #[test]
    fn oversized_length_rejected() {
        let mut buf = encoded(MessageId::Apply, 0);
        buf[8..12].copy_from_slice(&(MAX_MESSAGE_SIZE as u32 + 1).to_le_bytes());
        assert!(matches!(
            MessageHeader::decode(&buf),
            Err(WireError::BadLength { .. })
        ));
    }

    #[test]
    fn undersized_length_rejected() {
        let mut buf = encoded(MessageId::Apply, 0);
        buf[8..12].copy_from_slice(&4u32.to_le_bytes());
        assert!(matches!(
            MessageHeader::decode(&buf),
            Err(WireError::BadLength { got: 4, .. })
        ));
    }

    #[test]
    fn swapped_version_and_id_fields_fail_as_version() {
        // A frame writer that confuses the two offsets must be caught by
        // the version gate, which runs before the id gate. List (3) in the
        // version slot makes the swap observable.
        let mut swapped = BytesMut::new();
        swapped.extend_from_slice(&MAGIC);
        swapped.put_u16_le(MessageId::List.as_u16());
        swapped.put_u16_le(PROTOCOL_VERSION);
        swapped.put_u32_le(HEADER_SIZE as u32);
        assert!(matches!(
            MessageHeader::decode(&swapped),
            Err(WireError::BadVersion { got: 3, .. })
        ));
    }

    #[test]
    fn all_ids_roundtrip_through_u16() {
        for raw in 1u16..=6 {
            let id = MessageId::try_from(raw).unwrap();
            assert_eq!(id.as_u16(), raw);
        }
        assert!(MessageId::try_from(0).is_err());
        assert!(MessageId::try_from(7).is_err());
    }

    #[test]
    fn response_pairing() {
        assert_eq!(MessageId::Apply.response_id(), MessageId::ApplyResponse);
        assert_eq!(MessageId::List.response_id(), MessageId::ListResponse);
        assert_eq!(
            MessageId::GetBuildInfo.response_id(),
            MessageId::BuildInfoResponse
        );
    }

    #[test]
    fn new_rejects_oversized_payload() {
        let err = MessageHeader::new(MessageId::Apply, MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, WireError::BadLength { .. }));
    }
}
