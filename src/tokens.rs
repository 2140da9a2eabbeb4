use std::fmt;

use crate::error::Error;
use crate::ring::RingReader;
use crate::stream::RewindRead;

// Token ids from Solaris audit_record.h / audit.log(4).
pub const AUT_OTHER_FILE32: u8 = 0x11;
pub const AUT_TRAILER: u8 = 0x13;
pub const AUT_HEADER32: u8 = 0x14;
pub const AUT_HEADER32_EX: u8 = 0x15;
pub const AUT_DATA: u8 = 0x21;
pub const AUT_IPC: u8 = 0x22;
pub const AUT_PATH: u8 = 0x23;
pub const AUT_SUBJECT32: u8 = 0x24;
pub const AUT_PROCESS32: u8 = 0x26;
pub const AUT_RETURN32: u8 = 0x27;
pub const AUT_TEXT: u8 = 0x28;
pub const AUT_IN_ADDR: u8 = 0x2a;
pub const AUT_IP: u8 = 0x2b;
pub const AUT_IPORT: u8 = 0x2c;
pub const AUT_ARG32: u8 = 0x2d;
pub const AUT_SOCKET: u8 = 0x2e;
pub const AUT_SEQ: u8 = 0x2f;
pub const AUT_ATTR: u8 = 0x31;
pub const AUT_IPC_PERM: u8 = 0x32;
pub const AUT_GROUPS: u8 = 0x34;
pub const AUT_EXEC_ARGS: u8 = 0x3c;
pub const AUT_EXEC_ENV: u8 = 0x3d;
pub const AUT_ATTR32: u8 = 0x3e;
pub const AUT_EXIT: u8 = 0x52;
pub const AUT_ARG64: u8 = 0x71;
pub const AUT_RETURN64: u8 = 0x72;
pub const AUT_ATTR64: u8 = 0x73;
pub const AUT_HEADER64: u8 = 0x74;
pub const AUT_SUBJECT64: u8 = 0x75;
pub const AUT_PROCESS64: u8 = 0x77;
pub const AUT_OTHER_FILE64: u8 = 0x78;
pub const AUT_HEADER64_EX: u8 = 0x79;
pub const AUT_SUBJECT32_EX: u8 = 0x7a;
pub const AUT_PROCESS32_EX: u8 = 0x7b;
pub const AUT_SUBJECT64_EX: u8 = 0x7c;
pub const AUT_PROCESS64_EX: u8 = 0x7d;
pub const AUT_IN_ADDR_EX: u8 = 0x7e;
pub const AUT_SOCKET_EX: u8 = 0x7f;

// Unit codes for AUT_DATA payloads.
pub const AUR_CHAR: u8 = 0;
pub const AUR_SHORT: u8 = 1;
pub const AUR_INT32: u8 = 2;
pub const AUR_INT64: u8 = 3;

pub const TRACE_DEPTH: usize = 5;

/// The ids of the most recently framed tokens, kept so an unrecognized id
/// can be reported with some context about where the framing went off the
/// rails.
pub struct TokenTrace {
    ids: [u8; TRACE_DEPTH],
    next: usize,
    len: usize,
}

impl TokenTrace {
    pub fn new() -> Self {
        TokenTrace {
            ids: [0; TRACE_DEPTH],
            next: 0,
            len: 0,
        }
    }

    pub fn record(&mut self, id: u8) {
        self.ids[self.next] = id;
        self.next = (self.next + 1) % TRACE_DEPTH;
        self.len = (self.len + 1).min(TRACE_DEPTH);
    }
}

impl fmt::Display for TokenTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let oldest = (self.next + TRACE_DEPTH - self.len) % TRACE_DEPTH;
        for i in 0..self.len {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{:#04x}", self.ids[(oldest + i) % TRACE_DEPTH])?;
        }
        Ok(())
    }
}

/// Computes the total size in bytes of the token starting at the reader's
/// head, whose id byte is `id`. Nothing is consumed; variable-length tokens
/// are sized by peeking at their embedded length fields. Field widths are
/// taken from audit.log(4).
pub fn token_size<R: RewindRead>(
    reader: &mut RingReader<R>,
    id: u8,
    trace: &TokenTrace,
) -> Result<usize, Error> {
    let size = match id {
        AUT_HEADER32 => 1 + 4 + 1 + 2 + 2 + 4 + 4,
        AUT_HEADER32_EX => 1 + 4 + 1 + 2 + 2 + 2 + 4 + 4 + ext_addr_len(reader, 10)?,
        AUT_HEADER64 => 1 + 4 + 1 + 2 + 2 + 8 + 8,
        AUT_HEADER64_EX => 1 + 4 + 1 + 2 + 2 + 2 + 8 + 8 + ext_addr_len(reader, 10)?,

        // File tokens carry a length-prefixed trail pathname.
        AUT_OTHER_FILE32 | AUT_OTHER_FILE64 => 1 + 4 + 4 + 2 + reader.peek_u16(9)? as usize,

        AUT_ATTR => 1 + 4 + 4 + 4 + 8 + 4,
        AUT_ATTR32 => 1 + 4 + 4 + 4 + 4 + 8 + 4,
        AUT_ATTR64 => 1 + 4 + 4 + 4 + 4 + 8 + 8,

        AUT_PROCESS32 | AUT_SUBJECT32 => 1 + 9 * 4,
        AUT_PROCESS32_EX | AUT_SUBJECT32_EX => 1 + 8 * 4 + 2 + ext_addr_len(reader, 33)?,
        AUT_PROCESS64 | AUT_SUBJECT64 => 1 + 7 * 4 + 8 + 4,
        AUT_PROCESS64_EX | AUT_SUBJECT64_EX => 1 + 7 * 4 + 8 + 2 + ext_addr_len(reader, 37)?,

        AUT_RETURN32 => 1 + 1 + 4,
        AUT_RETURN64 => 1 + 1 + 8,
        AUT_TRAILER => 1 + 2 + 4,

        AUT_ARG32 => 1 + 1 + 4 + 2 + reader.peek_u16(6)? as usize,
        AUT_ARG64 => 1 + 1 + 8 + 2 + reader.peek_u16(10)? as usize,

        AUT_PATH | AUT_TEXT => 1 + 2 + reader.peek_u16(1)? as usize,

        AUT_EXEC_ARGS | AUT_EXEC_ENV => {
            let count = reader.peek_u32(1)?;
            1 + 4 + strings_size(reader, 5, count)?
        }

        AUT_SEQ | AUT_IN_ADDR => 1 + 4,
        AUT_IN_ADDR_EX => 1 + 2 + ext_addr_len(reader, 1)?,
        AUT_IPORT => 1 + 2,
        AUT_SOCKET => 1 + 2 + 2 + 4,
        AUT_SOCKET_EX => 1 + 2 + 2 + 2 + 2 + 2 + 2 * ext_addr_len(reader, 5)?,
        AUT_IP => 1 + 1 + 1 + 2 + 2 + 2 + 1 + 1 + 2 + 4 + 4,

        AUT_GROUPS => 1 + 2 + 4 * reader.peek_u16(1)? as usize,
        AUT_EXIT => 1 + 4 + 4,
        AUT_IPC_PERM => 1 + 7 * 4,
        AUT_IPC => 1 + 1 + 4,

        AUT_DATA => {
            let unit = reader.peek_u8(2)?;
            let count = reader.peek_u8(3)? as usize;
            1 + 1 + 1 + 1 + count * unit_size(unit, reader.position())?
        }

        _ => {
            return Err(Error::UnknownTokenId {
                id,
                offset: reader.position(),
                trace: trace.to_string(),
            })
        }
    };
    Ok(size)
}

/// Extended tokens embed a 16-bit address byte count; only an IPv6 count
/// of 16 widens the token, anything else means a 4-byte IPv4 address.
fn ext_addr_len<R: RewindRead>(reader: &mut RingReader<R>, at: usize) -> Result<usize, Error> {
    Ok(if reader.peek_u16(at)? == 16 { 16 } else { 4 })
}

fn unit_size(unit: u8, offset: u64) -> Result<usize, Error> {
    match unit {
        AUR_CHAR => Ok(1),
        AUR_SHORT => Ok(2),
        AUR_INT32 => Ok(4),
        AUR_INT64 => Ok(8),
        _ => Err(Error::InvalidDataUnit { unit, offset }),
    }
}

/// Total space taken by `count` consecutive NUL-terminated strings starting
/// at `base`, terminators included.
fn strings_size<R: RewindRead>(
    reader: &mut RingReader<R>,
    base: usize,
    count: u32,
) -> Result<usize, Error> {
    let mut bytes = 0usize;
    for _ in 0..count {
        loop {
            let b = reader.peek_u8(base + bytes)?;
            bytes += 1;
            if b == 0 {
                break;
            }
        }
    }
    Ok(bytes)
}
