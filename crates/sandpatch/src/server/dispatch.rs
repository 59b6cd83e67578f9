//! Per-connection protocol handling.
//!
//! Trust gate first, then a read-dispatch-respond loop. Every handled
//! request produces exactly one response frame; trust failures produce
//! none at all.

use std::os::unix::net::{SocketAddr, UnixStream};

use tracing::{info, warn};

use sandpatch_engine::CodeMemory;
use sandpatch_format::{read_apply_request, FormatError};
use sandpatch_transport::{authenticate, TrustedPeer};
use sandpatch_wire::{
    FieldConfig, FieldReader, FieldWriter, MessageHeader, MessageId, Status, WireError,
    HEADER_SIZE,
};

use super::ServerState;

/// Authenticate and serve one accepted connection to completion.
pub fn handle_connection<M: CodeMemory>(
    stream: UnixStream,
    addr: &SocketAddr,
    state: &ServerState<M>,
    config: &FieldConfig,
) {
    let peer = match authenticate(addr) {
        Ok(peer) => peer,
        Err(err) => {
            // No response frame: an untrusted peer learns nothing.
            warn!(error = %err, "rejecting unauthenticated peer");
            return;
        }
    };

    if let Err(err) = serve_peer(stream, &peer, state, config) {
        warn!(uid = peer.uid, error = %err, "connection ended with error");
    }
}

fn serve_peer<M: CodeMemory>(
    stream: UnixStream,
    peer: &TrustedPeer,
    state: &ServerState<M>,
    config: &FieldConfig,
) -> sandpatch_wire::Result<()> {
    stream.set_read_timeout(config.read_timeout)?;
    stream.set_write_timeout(config.write_timeout)?;
    let mut writer = FieldWriter::new(stream.try_clone()?);
    let mut reader = FieldReader::new(stream);

    loop {
        let header = match reader.read_header() {
            Ok(header) => header,
            // The peer hanging up between requests is the normal end.
            Err(WireError::ConnectionClosed) => return Ok(()),
            Err(err) => {
                let _ = send_status(&mut writer, MessageId::ApplyResponse, wire_status(&err));
                return Err(err);
            }
        };
        dispatch(header, &mut reader, &mut writer, state, peer)?;
    }
}

fn dispatch<M: CodeMemory>(
    header: MessageHeader,
    reader: &mut FieldReader<UnixStream>,
    writer: &mut FieldWriter<UnixStream>,
    state: &ServerState<M>,
    peer: &TrustedPeer,
) -> sandpatch_wire::Result<()> {
    let body_len = (header.length as usize).saturating_sub(HEADER_SIZE);
    let body_start = reader.consumed();

    let outcome = match header.id {
        MessageId::Apply => handle_apply(reader, writer, state, peer),
        MessageId::List => handle_list(writer, state),
        MessageId::GetBuildInfo => handle_build_info(writer, state),
        other => {
            warn!(id = other.as_u16(), "response id arrived as a request");
            send_status(writer, other.response_id(), Status::BadMessageId)
        }
    };

    // A rejected body may have been read only partway. Realign on the
    // declared frame length so the next read_header does not start
    // mid-payload.
    if outcome.is_ok() {
        let read = (reader.consumed() - body_start) as usize;
        if read < body_len {
            reader.skip(body_len - read)?;
        }
    }
    outcome
}

fn handle_apply<M: CodeMemory>(
    reader: &mut FieldReader<UnixStream>,
    writer: &mut FieldWriter<UnixStream>,
    state: &ServerState<M>,
    peer: &TrustedPeer,
) -> sandpatch_wire::Result<()> {
    let status = match read_apply_request(reader) {
        Ok(desc) => match state.lock_engine().apply(&desc) {
            Ok(record) => {
                info!(
                    uid = peer.uid,
                    name = %record.name,
                    hash = %record.content_hash_hex(),
                    "patch applied for peer"
                );
                Status::Ok
            }
            Err(err) => {
                warn!(uid = peer.uid, error = %err, "apply refused");
                err.status()
            }
        },
        // The stream itself failed; there is nobody left to answer.
        Err(FormatError::Wire(err @ (WireError::Io(_) | WireError::ConnectionClosed))) => {
            return Err(err);
        }
        Err(err) => {
            warn!(uid = peer.uid, error = %err, "malformed apply request");
            err.status()
        }
    };
    send_status(writer, MessageId::ApplyResponse, status)
}

fn handle_list<M: CodeMemory>(
    writer: &mut FieldWriter<UnixStream>,
    state: &ServerState<M>,
) -> sandpatch_wire::Result<()> {
    // Copy the listing out so the engine lock is not held across writes.
    let entries: Vec<([u8; 20], String)> = state
        .lock_engine()
        .registry()
        .list()
        .iter()
        .map(|p| (p.content_hash, p.name.clone()))
        .collect();

    let payload = STATUS_FIELD_LEN
        + (4 + 4)
        + entries
            .iter()
            .map(|(hash, name)| (4 + hash.len()) + (4 + name.len()))
            .sum::<usize>();
    writer.write_header(&MessageHeader::new(MessageId::ListResponse, payload)?)?;
    writer.write_i64_field(Status::Ok.code())?;
    writer.write_field(&(entries.len() as u32).to_le_bytes())?;
    for (hash, name) in &entries {
        writer.write_field(hash)?;
        writer.write_field(name.as_bytes())?;
    }
    Ok(())
}

fn handle_build_info<M: CodeMemory>(
    writer: &mut FieldWriter<UnixStream>,
    state: &ServerState<M>,
) -> sandpatch_wire::Result<()> {
    let block = state.build_info();
    let payload = STATUS_FIELD_LEN + 4 + block.len();
    writer.write_header(&MessageHeader::new(MessageId::BuildInfoResponse, payload)?)?;
    writer.write_i64_field(Status::Ok.code())?;
    writer.write_field(block.as_bytes())
}

/// Wire size of the leading status field every response carries.
const STATUS_FIELD_LEN: usize = 4 + 8;

fn send_status<T: std::io::Write>(
    writer: &mut FieldWriter<T>,
    id: MessageId,
    status: Status,
) -> sandpatch_wire::Result<()> {
    writer.write_header(&MessageHeader::new(id, STATUS_FIELD_LEN)?)?;
    writer.write_i64_field(status.code())
}

/// The status a peer is told about a framing failure.
fn wire_status(err: &WireError) -> Status {
    match err {
        WireError::BadHeader { .. } | WireError::BadMagic => Status::BadHeader,
        WireError::BadVersion { .. } => Status::BadVersion,
        WireError::BadMessageId(_) => Status::BadMessageId,
        WireError::BadLength { .. } => Status::BadLength,
        WireError::ShortRead { .. } => Status::Truncated,
        WireError::ConnectionClosed | WireError::Io(_) => Status::ReadWrite,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_failures_map_to_protocol_statuses() {
        assert_eq!(wire_status(&WireError::BadMagic), Status::BadHeader);
        assert_eq!(
            wire_status(&WireError::BadMessageId(99)),
            Status::BadMessageId
        );
        assert_eq!(
            wire_status(&WireError::ShortRead {
                expected: 20,
                got: 3
            }),
            Status::Truncated
        );
    }
}
