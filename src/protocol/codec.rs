//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────────────────────────┐
//! │ Tag (1)  │ Len (4)  │ CRC (4)  │         Payload             │
//! └──────────┴──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! - Tag: command type for requests, status for responses
//! - Len: payload length, big-endian
//! - CRC: CRC32 of the payload, big-endian
//! - Payload: bincode-encoded `Command` / `Response`
//!
//! The tag is redundant with the payload's enum variant; decoding checks that
//! they agree.

use std::io::{Read, Write};

use bincode::Options;
use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Command, CommandType, Response, Status};
use crate::error::{BridgeError, Result};

/// Header size: 1 byte tag + 4 bytes length + 4 bytes CRC
pub const HEADER_SIZE: usize = 9;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

fn codec_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_PAYLOAD_SIZE as u64)
}

// =============================================================================
// Frame Encoding/Decoding
// =============================================================================

/// Build a frame: tag + len + crc + payload
fn encode_frame<T: Serialize>(tag: u8, message: &T) -> Result<Vec<u8>> {
    let payload = codec_options().serialize(message)?;

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u8(tag);
    frame.put_u32(payload.len() as u32);
    frame.put_u32(crc32fast::hash(&payload));
    frame.put_slice(&payload);

    Ok(frame.to_vec())
}

/// Parsed frame header
struct FrameHeader {
    tag: u8,
    payload_len: usize,
    crc: u32,
}

fn parse_header(header: &[u8]) -> Result<FrameHeader> {
    if header.len() < HEADER_SIZE {
        return Err(BridgeError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            header.len()
        )));
    }

    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(BridgeError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    Ok(FrameHeader {
        tag: header[0],
        payload_len: payload_len as usize,
        crc: u32::from_be_bytes([header[5], header[6], header[7], header[8]]),
    })
}

/// Verify and deserialize a payload
fn decode_payload<T: DeserializeOwned>(header: &FrameHeader, payload: &[u8]) -> Result<T> {
    let actual = crc32fast::hash(payload);
    if actual != header.crc {
        return Err(BridgeError::Protocol(format!(
            "Checksum mismatch: expected {:08x}, got {:08x}",
            header.crc, actual
        )));
    }
    Ok(codec_options().deserialize(payload)?)
}

/// Split a complete frame into header and payload
fn split_frame(bytes: &[u8]) -> Result<(FrameHeader, &[u8])> {
    let header = parse_header(bytes)?;
    let total_len = HEADER_SIZE + header.payload_len;
    if bytes.len() < total_len {
        return Err(BridgeError::Protocol(format!(
            "Incomplete payload: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }
    Ok((header, &bytes[HEADER_SIZE..total_len]))
}

// =============================================================================
// Command Encoding/Decoding
// =============================================================================

/// Encode a command to bytes
pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    encode_frame(command.command_type() as u8, command)
}

/// Decode a command from bytes
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    let (header, payload) = split_frame(bytes)?;
    command_from_parts(&header, payload)
}

fn command_from_parts(header: &FrameHeader, payload: &[u8]) -> Result<Command> {
    let cmd_type = CommandType::from_tag(header.tag).ok_or_else(|| {
        BridgeError::Protocol(format!("Unknown command type: 0x{:02x}", header.tag))
    })?;

    let command: Command = decode_payload(header, payload)?;
    if command.command_type() != cmd_type {
        return Err(BridgeError::Protocol(format!(
            "Command tag {:?} does not match payload {:?}",
            cmd_type,
            command.command_type()
        )));
    }
    Ok(command)
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to bytes
pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    encode_frame(response.status() as u8, response)
}

/// Decode a response from bytes
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let (header, payload) = split_frame(bytes)?;
    response_from_parts(&header, payload)
}

fn response_from_parts(header: &FrameHeader, payload: &[u8]) -> Result<Response> {
    let status = Status::from_tag(header.tag).ok_or_else(|| {
        BridgeError::Protocol(format!("Unknown response status: 0x{:02x}", header.tag))
    })?;

    let response: Response = decode_payload(header, payload)?;
    if response.status() != status {
        return Err(BridgeError::Protocol(format!(
            "Response status {:?} does not match payload {:?}",
            status,
            response.status()
        )));
    }
    Ok(response)
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one frame's header and payload from a stream
fn read_frame<R: Read>(reader: &mut R) -> Result<(FrameHeader, Vec<u8>)> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let header = parse_header(&header_bytes)?;

    let mut payload = vec![0u8; header.payload_len];
    if header.payload_len > 0 {
        reader.read_exact(&mut payload)?;
    }

    Ok((header, payload))
}

/// Read a complete command from a stream
///
/// Blocks until a complete command is received or an error occurs
pub fn read_command<R: Read>(reader: &mut R) -> Result<Command> {
    let (header, payload) = read_frame(reader)?;
    command_from_parts(&header, &payload)
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    let bytes = encode_command(command)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    let (header, payload) = read_frame(reader)?;
    response_from_parts(&header, &payload)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let bytes = encode_response(response)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
