// Message framing: magic resync, header layout, checksums

use crate::core::checksum4;
use crate::error::ProtocolError;
use crate::network::message::{Message, CHECKSUM_VERSION};
use crate::params::NetworkParams;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload we will accept.
pub const MAX_MESSAGE_SIZE: u32 = 32 * 1024 * 1024;

const COMMAND_LEN: usize = 12;

/// Frame a message: big-endian magic, NUL-padded command, LE payload
/// length, then (from protocol 209) the payload checksum, then the
/// payload itself.
pub fn serialize_message(
    message: &Message,
    params: &NetworkParams,
    protocol_version: u32,
) -> Vec<u8> {
    let payload = message.serialize_payload(protocol_version);
    let mut buf = Vec::with_capacity(24 + payload.len());

    buf.extend_from_slice(&params.magic.to_be_bytes());

    let mut command = [0u8; COMMAND_LEN];
    let name = message.command().as_bytes();
    command[..name.len()].copy_from_slice(name);
    buf.extend_from_slice(&command);

    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    if protocol_version >= CHECKSUM_VERSION {
        buf.extend_from_slice(&checksum4(&payload));
    }
    buf.extend_from_slice(&payload);
    buf
}

/// Write a complete framed message. Callers serialize writes with the
/// connection's write lock so frames never interleave.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
    params: &NetworkParams,
    protocol_version: u32,
) -> Result<(), ProtocolError> {
    let bytes = serialize_message(message, params, protocol_version);
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one message: resynchronize on the packet magic, discarding any
/// garbage before it, then read the header and exactly `length`
/// payload bytes, verify the checksum when one is present, and
/// dispatch on the command.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    params: &NetworkParams,
    protocol_version: u32,
) -> Result<Message, ProtocolError> {
    seek_past_magic(reader, params.magic).await?;

    let mut command_bytes = [0u8; COMMAND_LEN];
    read_fully(reader, &mut command_bytes).await?;
    let command: String = command_bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect();

    let mut length_bytes = [0u8; 4];
    read_fully(reader, &mut length_bytes).await?;
    let length = u32::from_le_bytes(length_bytes);
    if length > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::OversizeMessage(length));
    }

    let checksum = if protocol_version >= CHECKSUM_VERSION {
        let mut checksum = [0u8; 4];
        read_fully(reader, &mut checksum).await?;
        Some(checksum)
    } else {
        None
    };

    let mut payload = vec![0u8; length as usize];
    read_fully(reader, &mut payload).await?;

    if let Some(expected) = checksum {
        let actual = checksum4(&payload);
        if actual != expected {
            return Err(ProtocolError::BadChecksum { expected, actual });
        }
    }

    log::trace!("received '{}' message, {} byte payload", command, length);
    Message::parse(&command, &payload, protocol_version)
}

/// Scan the stream byte by byte until the four magic bytes appear in
/// sequence. Anything before them is silently discarded.
async fn seek_past_magic<R: AsyncRead + Unpin>(
    reader: &mut R,
    magic: u32,
) -> Result<(), ProtocolError> {
    let magic_bytes = magic.to_be_bytes();
    let mut cursor = 0;
    loop {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::Disconnected)
            }
            Err(e) => return Err(e.into()),
        };
        if byte == magic_bytes[cursor] {
            cursor += 1;
            if cursor == magic_bytes.len() {
                return Ok(());
            }
        } else if byte == magic_bytes[0] {
            cursor = 1;
        } else {
            cursor = 0;
        }
    }
}

/// `read_exact`, with end-of-stream mapped to a disconnection error.
async fn read_fully<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), ProtocolError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(ProtocolError::Disconnected),
        Err(e) => Err(e.into()),
    }
}
