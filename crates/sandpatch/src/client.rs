//! Protocol client used by the CLI subcommands and the integration tests.

use std::os::unix::net::UnixStream;
use std::path::Path;

use tracing::debug;

use sandpatch_format::{apply_request_len, write_apply_request, FormatError, PatchDescriptor};
use sandpatch_transport::{connect_with_identity, TransportError};
use sandpatch_wire::{
    FieldConfig, FieldReader, FieldWriter, MessageHeader, MessageId, Status, WireError,
    MAX_NAME_LEN,
};

/// Longest build-info block accepted from a server.
const MAX_BUILD_INFO_LEN: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("unexpected response id {0:?}")]
    UnexpectedResponse(MessageId),
    #[error("server refused request: {0}")]
    Refused(Status),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// One applied-patch row from a list response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPatchInfo {
    pub content_hash: [u8; 20],
    pub name: String,
}

impl AppliedPatchInfo {
    pub fn content_hash_hex(&self) -> String {
        hex::encode(self.content_hash)
    }
}

/// A trusted connection to a patch daemon.
///
/// Connecting binds `identity` as the caller's named endpoint with 0700
/// permissions; the server stats, checks, and consumes it.
pub struct SandboxClient {
    reader: FieldReader<UnixStream>,
    writer: FieldWriter<UnixStream>,
}

impl SandboxClient {
    pub fn connect(server: &Path, identity: &Path) -> Result<Self> {
        Self::connect_with_config(server, identity, FieldConfig::default())
    }

    pub fn connect_with_config(
        server: &Path,
        identity: &Path,
        config: FieldConfig,
    ) -> Result<Self> {
        let stream = connect_with_identity(server, identity)?;
        stream.set_read_timeout(config.read_timeout).map_err(WireError::Io)?;
        stream
            .set_write_timeout(config.write_timeout)
            .map_err(WireError::Io)?;
        let writer = FieldWriter::new(stream.try_clone().map_err(WireError::Io)?);
        let reader = FieldReader::new(stream);
        debug!(server = %server.display(), "connected to patch daemon");
        Ok(Self { reader, writer })
    }

    /// Submit one patch. The returned status is the server's verdict;
    /// a refusal is a normal outcome here, not an error.
    pub fn apply(&mut self, desc: &PatchDescriptor) -> Result<Status> {
        let header = MessageHeader::new(MessageId::Apply, apply_request_len(desc))
            .map_err(ClientError::Wire)?;
        self.writer.write_header(&header)?;
        write_apply_request(&mut self.writer, desc)?;
        self.read_status(MessageId::ApplyResponse)
    }

    /// Fetch the applied-patch listing.
    pub fn list(&mut self) -> Result<Vec<AppliedPatchInfo>> {
        self.send_bare_request(MessageId::List)?;
        self.expect_ok(MessageId::ListResponse)?;

        let raw = self.reader.read_exact_field(4)?;
        let count = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let mut entries = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let hash_bytes = self.reader.read_exact_field(20)?;
            let mut content_hash = [0u8; 20];
            content_hash.copy_from_slice(&hash_bytes);
            let name_bytes = self.reader.read_bounded_field(MAX_NAME_LEN)?;
            entries.push(AppliedPatchInfo {
                content_hash,
                name: String::from_utf8_lossy(&name_bytes).into_owned(),
            });
        }
        Ok(entries)
    }

    /// Fetch the server's build-info block.
    pub fn build_info(&mut self) -> Result<String> {
        self.send_bare_request(MessageId::GetBuildInfo)?;
        self.expect_ok(MessageId::BuildInfoResponse)?;
        let block = self.reader.read_bounded_field(MAX_BUILD_INFO_LEN)?;
        Ok(String::from_utf8_lossy(&block).into_owned())
    }

    fn send_bare_request(&mut self, id: MessageId) -> Result<()> {
        let header = MessageHeader::new(id, 0).map_err(ClientError::Wire)?;
        self.writer.write_header(&header)?;
        Ok(())
    }

    fn read_status(&mut self, want: MessageId) -> Result<Status> {
        let header = self.reader.read_header()?;
        if header.id != want {
            return Err(ClientError::UnexpectedResponse(header.id));
        }
        Ok(Status::from_code(self.reader.read_i64_field()?))
    }

    fn expect_ok(&mut self, want: MessageId) -> Result<()> {
        match self.read_status(want)? {
            Status::Ok => Ok(()),
            refused => Err(ClientError::Refused(refused)),
        }
    }
}
