//! Typed client for the wire protocol.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::error::{Error, Result};
use crate::protocol::{self, perm_digit, Perm, Reply};

/// One session against a running server.
///
/// Each method sends a single request line and blocks for its response
/// frame; protocol failures come back as the matching [`Error`] kind.
pub struct Client {
    stream: UnixStream,
}

impl Client {
    /// Connects and performs the `u <uid>` handshake.
    pub fn connect<P: AsRef<Path>>(socket: P, uid: u32) -> Result<Self> {
        let stream = UnixStream::connect(socket.as_ref())?;
        let mut client = Client { stream };
        let reply = client.raw(&format!("u {uid}"))?;
        expect_ok(reply.status)?;
        Ok(client)
    }

    pub fn create(&mut self, name: &str, owner: Perm, others: Perm) -> Result<()> {
        let line = format!("c {name} {}{}", perm_digit(owner), perm_digit(others));
        expect_ok(self.raw(&line)?.status)
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        expect_ok(self.raw(&format!("d {name}"))?.status)
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        expect_ok(self.raw(&format!("r {old} {new}"))?.status)
    }

    /// Opens `name` in `mode`, returning the descriptor number.
    pub fn open(&mut self, name: &str, mode: Perm) -> Result<usize> {
        let reply = self.raw(&format!("o {name} {}", perm_digit(mode)))?;
        if reply.status < 0 {
            return Err(Error::from_wire(reply.status));
        }
        Ok(reply.status as usize)
    }

    pub fn close(&mut self, fd: usize) -> Result<()> {
        expect_ok(self.raw(&format!("x {fd}"))?.status)
    }

    /// Reads up to `len` bytes of the file's content.
    pub fn read(&mut self, fd: usize, len: usize) -> Result<Vec<u8>> {
        let reply = self.raw(&format!("l {fd} {len}"))?;
        if reply.status < 0 {
            return Err(Error::from_wire(reply.status));
        }
        Ok(reply.payload)
    }

    /// Replaces the file's content. `data` is sent on the request line and
    /// must not contain a newline.
    pub fn write(&mut self, fd: usize, data: &str) -> Result<()> {
        if data.contains('\n') {
            return Err(Error::InvalidSyntax);
        }
        expect_ok(self.raw(&format!("w {fd} {data}"))?.status)
    }

    /// Sends a raw request line and returns the undecoded reply. Used by
    /// the interactive shell and by protocol tests.
    pub fn raw(&mut self, line: &str) -> Result<Reply> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\n")?;
        Ok(protocol::read_reply(&mut self.stream)?)
    }
}

fn expect_ok(status: i32) -> Result<()> {
    if status == protocol::status::OK {
        Ok(())
    } else {
        Err(Error::from_wire(status))
    }
}
