//! RFC 1350 packet codec: typed packets in, raw datagram bytes out, and back.
//!
//! Pure and I/O-free: the transfer engine and dispatcher are the only
//! callers, and neither trusts a byte on the wire until it has passed
//! through [`parse`].

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Largest payload carried by one DATA packet. A shorter (or empty)
/// payload signals end-of-file.
pub const MAX_PAYLOAD: usize = 512;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet shorter than the minimum 4 bytes")]
    Truncated,
    #[error("unrecognized opcode {0}")]
    BadOpcode(u16),
    #[error("malformed request packet: {0}")]
    BadRequest(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Rrq = 1,
    Wrq = 2,
    Data = 3,
    Ack = 4,
    Error = 5,
}

impl Opcode {
    fn from_u16(value: u16) -> Result<Self, DecodeError> {
        match value {
            1 => Ok(Opcode::Rrq),
            2 => Ok(Opcode::Wrq),
            3 => Ok(Opcode::Data),
            4 => Ok(Opcode::Ack),
            5 => Ok(Opcode::Error),
            other => Err(DecodeError::BadOpcode(other)),
        }
    }
}

/// Direction of a request packet (RRQ reads from the store, WRQ writes to it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Request {
        kind: RequestKind,
        filename: Vec<u8>,
        mode: Vec<u8>,
    },
    Data {
        block: u16,
        payload: Vec<u8>,
    },
    Ack {
        block: u16,
    },
    Error {
        code: u16,
        message: Vec<u8>,
    },
}

impl Packet {
    pub fn error(code: u16, message: impl Into<Vec<u8>>) -> Packet {
        Packet::Error {
            code,
            message: message.into(),
        }
    }
}

/// Split `buf` on the first `0x00`, returning the bytes before it and
/// advancing `buf` past the terminator. RFC 1350 request fields (filename,
/// mode) are this shape.
fn split_field(buf: &mut BytesMut) -> Result<Vec<u8>, DecodeError> {
    let pos = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::BadRequest("missing null terminator"))?;
    let field = buf.split_to(pos);
    buf.advance(1); // skip the terminator
    Ok(field.to_vec())
}

/// Decode a raw datagram into a typed packet.
pub fn parse(bytes: &[u8]) -> Result<Packet, DecodeError> {
    if bytes.len() < 4 {
        return Err(DecodeError::Truncated);
    }
    let mut buf = BytesMut::from(bytes);
    let opcode = Opcode::from_u16(buf.get_u16())?;

    match opcode {
        Opcode::Rrq | Opcode::Wrq => {
            let filename = split_field(&mut buf)?;
            if filename.is_empty() {
                return Err(DecodeError::BadRequest("empty filename"));
            }
            let mode = split_field(&mut buf)?;
            if mode.is_empty() {
                return Err(DecodeError::BadRequest("empty mode"));
            }
            // Trailing bytes (RFC 2347 option negotiation) are ignored.
            let kind = if opcode == Opcode::Rrq {
                RequestKind::Read
            } else {
                RequestKind::Write
            };
            Ok(Packet::Request {
                kind,
                filename,
                mode,
            })
        }
        Opcode::Data => {
            let block = buf.get_u16();
            let payload = buf.to_vec();
            Ok(Packet::Data { block, payload })
        }
        Opcode::Ack => {
            let block = buf.get_u16();
            Ok(Packet::Ack { block })
        }
        Opcode::Error => {
            // The minimum-length check above already guarantees at least
            // 2 bytes remain here for the error code.
            let code = buf.get_u16();
            let mut message = buf.to_vec();
            // Trailing NUL is conventional but tolerated if absent.
            if message.last() == Some(&0) {
                message.pop();
            }
            Ok(Packet::Error { code, message })
        }
    }
}

/// Encode a typed packet into its wire form. Exact inverse of [`parse`]
/// for every well-formed packet.
pub fn serialize(packet: &Packet) -> Vec<u8> {
    let mut buf = BytesMut::new();
    match packet {
        Packet::Request {
            kind,
            filename,
            mode,
        } => {
            let opcode = match kind {
                RequestKind::Read => Opcode::Rrq,
                RequestKind::Write => Opcode::Wrq,
            };
            buf.put_u16(opcode as u16);
            buf.put_slice(filename);
            buf.put_u8(0);
            buf.put_slice(mode);
            buf.put_u8(0);
        }
        Packet::Data { block, payload } => {
            buf.reserve(4 + payload.len());
            buf.put_u16(Opcode::Data as u16);
            buf.put_u16(*block);
            buf.put_slice(payload);
        }
        Packet::Ack { block } => {
            buf.put_u16(Opcode::Ack as u16);
            buf.put_u16(*block);
        }
        Packet::Error { code, message } => {
            buf.reserve(5 + message.len());
            buf.put_u16(Opcode::Error as u16);
            buf.put_u16(*code);
            buf.put_slice(message);
            buf.put_u8(0);
        }
    }
    buf.to_vec()
}
