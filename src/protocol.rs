//! Wire protocol shared by server and client.
//!
//! Requests are UTF-8 lines, one verb plus space-separated arguments:
//! `c <name> <op><gp>`, `d <name>`, `r <old> <new>`, `o <name> <mode>`,
//! `x <fd>`, `l <fd> <len>`, `w <fd> <data>`. Every request line is answered
//! with one [`Reply`] frame: an 8-byte header (`status: i32`, `payload_len:
//! u32`, both little-endian) followed by the payload bytes.

use std::io::{self, Read, Write};

use enumflags2::{bitflags, BitFlags};

use crate::error::{Error, Result};

/// Upper bound on a reply payload; larger lengths mark a corrupt frame.
pub const MAX_PAYLOAD: u32 = 64 * 1024;

/// One access right.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermBit {
    Write = 0b01,
    Read = 0b10,
}

/// A permission mask: any combination of read and write.
///
/// The wire form is a single digit 0-3, the raw bit value.
pub type Perm = BitFlags<PermBit>;

/// Parses a wire permission digit into a mask.
pub fn perm_from_digit(digit: u8) -> Option<Perm> {
    Perm::from_bits(digit).ok()
}

/// The wire digit for a mask.
pub fn perm_digit(perm: Perm) -> u8 {
    perm.bits()
}

/// Response status codes. `0` is success; `open` and `read` reuse
/// non-negative statuses for the descriptor number and byte count.
pub mod status {
    pub const OK: i32 = 0;
    pub const INVALID_SYNTAX: i32 = -1;
    pub const ALREADY_EXISTS: i32 = -2;
    pub const NOT_FOUND: i32 = -3;
    pub const PERMISSION_DENIED: i32 = -4;
    pub const MAX_OPEN_FILES: i32 = -5;
    pub const NOT_OPEN: i32 = -6;
    pub const IS_OPEN: i32 = -7;
    pub const INVALID_MODE: i32 = -8;
    pub const CONTENT_TOO_LARGE: i32 = -9;
    pub const OTHER: i32 = -10;
}

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Create {
        name: String,
        owner_perm: Perm,
        others_perm: Perm,
    },
    Delete {
        name: String,
    },
    Rename {
        old: String,
        new: String,
    },
    Open {
        name: String,
        mode: Perm,
    },
    Close {
        fd: usize,
    },
    Read {
        fd: usize,
        len: usize,
    },
    Write {
        fd: usize,
        data: String,
    },
}

/// Parses one request line. Anything that does not match the grammar,
/// including unknown verbs, surplus tokens, and out-of-range values, is
/// `InvalidSyntax`.
pub fn parse_request(line: &str) -> Result<Request> {
    let line = line.trim_end_matches(['\r', '\n']);

    // `w` keeps its payload verbatim (it may contain spaces), so it is
    // split by hand instead of going through the whitespace tokenizer.
    if let Some(rest) = line.strip_prefix("w ") {
        let (fd_token, data) = rest
            .trim_start()
            .split_once(' ')
            .ok_or(Error::InvalidSyntax)?;
        return Ok(Request::Write {
            fd: parse_fd(fd_token)?,
            data: data.to_string(),
        });
    }

    let mut tokens = line.split_whitespace();
    let request = match tokens.next().ok_or(Error::InvalidSyntax)? {
        "c" => {
            let name = next_token(&mut tokens)?.to_string();
            let (owner_perm, others_perm) = parse_perm_pair(next_token(&mut tokens)?)?;
            Request::Create {
                name,
                owner_perm,
                others_perm,
            }
        }
        "d" => Request::Delete {
            name: next_token(&mut tokens)?.to_string(),
        },
        "r" => {
            let old = next_token(&mut tokens)?.to_string();
            let new = next_token(&mut tokens)?.to_string();
            Request::Rename { old, new }
        }
        "o" => {
            let name = next_token(&mut tokens)?.to_string();
            let mode = parse_perm_digit(single_char(next_token(&mut tokens)?)?)?;
            if mode.is_empty() {
                // A descriptor with no rights is useless; the grammar
                // only admits modes 1-3.
                return Err(Error::InvalidSyntax);
            }
            Request::Open { name, mode }
        }
        "x" => Request::Close {
            fd: parse_fd(next_token(&mut tokens)?)?,
        },
        "l" => {
            let fd = parse_fd(next_token(&mut tokens)?)?;
            let len: usize = next_token(&mut tokens)?
                .parse()
                .map_err(|_| Error::InvalidSyntax)?;
            if len == 0 {
                return Err(Error::InvalidSyntax);
            }
            Request::Read { fd, len }
        }
        _ => return Err(Error::InvalidSyntax),
    };

    match tokens.next() {
        Some(_) => Err(Error::InvalidSyntax),
        None => Ok(request),
    }
}

/// Parses the session handshake, `u <uid>`, which must be the first line of
/// every session.
pub fn parse_handshake(line: &str) -> Result<u32> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut tokens = line.split_whitespace();
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some("u"), Some(uid), None) => uid.parse().map_err(|_| Error::InvalidSyntax),
        _ => Err(Error::InvalidSyntax),
    }
}

fn next_token<'a>(tokens: &mut std::str::SplitWhitespace<'a>) -> Result<&'a str> {
    tokens.next().ok_or(Error::InvalidSyntax)
}

fn single_char(token: &str) -> Result<char> {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(Error::InvalidSyntax),
    }
}

fn parse_perm_digit(c: char) -> Result<Perm> {
    c.to_digit(10)
        .and_then(|d| u8::try_from(d).ok())
        .and_then(perm_from_digit)
        .ok_or(Error::InvalidSyntax)
}

fn parse_perm_pair(token: &str) -> Result<(Perm, Perm)> {
    let mut chars = token.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(owner), Some(others), None) => {
            Ok((parse_perm_digit(owner)?, parse_perm_digit(others)?))
        }
        _ => Err(Error::InvalidSyntax),
    }
}

fn parse_fd(token: &str) -> Result<usize> {
    token.parse().map_err(|_| Error::InvalidSyntax)
}

/// One response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: i32,
    pub payload: Vec<u8>,
}

impl Reply {
    pub fn ok() -> Self {
        Reply {
            status: status::OK,
            payload: Vec::new(),
        }
    }

    /// Success reply carrying a descriptor number in the status word.
    pub fn descriptor(fd: usize) -> Self {
        Reply {
            status: fd as i32,
            payload: Vec::new(),
        }
    }

    /// Success reply carrying content; the status word is the byte count.
    pub fn content(data: Vec<u8>) -> Self {
        Reply {
            status: data.len() as i32,
            payload: data,
        }
    }

    pub fn failure(code: i32) -> Self {
        Reply {
            status: code,
            payload: Vec::new(),
        }
    }
}

/// Writes one frame and flushes it.
pub fn write_reply<W: Write>(writer: &mut W, reply: &Reply) -> io::Result<()> {
    writer.write_all(&reply.status.to_le_bytes())?;
    writer.write_all(&(reply.payload.len() as u32).to_le_bytes())?;
    writer.write_all(&reply.payload)?;
    writer.flush()
}

/// Reads one frame, rejecting payload lengths past [`MAX_PAYLOAD`].
pub fn read_reply<R: Read>(reader: &mut R) -> io::Result<Reply> {
    let mut status_bytes = [0u8; 4];
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut status_bytes)?;
    reader.read_exact(&mut len_bytes)?;
    let status = i32::from_le_bytes(status_bytes);
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("reply payload of {len} bytes exceeds the frame limit"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(Reply { status, payload })
}
