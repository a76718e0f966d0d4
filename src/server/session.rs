//! One client session: handshake, request loop, dispatch.

use std::io::{BufRead, BufReader};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::fs::{FlatFs, OpenFileTable};
use crate::protocol::{self, Perm, PermBit, Reply, Request};

use super::SessionInfo;

/// Serves one accepted connection to completion.
///
/// The first line must be the `u <uid>` handshake; after it, requests are
/// handled strictly in order with exactly one response frame each. Returns
/// `Ok` on client end-of-stream and `Err` only for session-fatal failures.
pub fn run(
    stream: UnixStream,
    fs: Arc<FlatFs>,
    id: u64,
    registry: Arc<DashMap<u64, SessionInfo>>,
) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        debug!("session {id}: closed before handshake");
        return Ok(());
    }
    let uid = match protocol::parse_handshake(&line) {
        Ok(uid) => uid,
        Err(e) => {
            warn!("session {id}: bad handshake {:?}", line.trim_end());
            let code = e.wire_code().unwrap_or(protocol::status::OTHER);
            protocol::write_reply(&mut writer, &Reply::failure(code))?;
            return Ok(());
        }
    };
    protocol::write_reply(&mut writer, &Reply::ok())?;
    info!("session {id}: user {uid} connected");
    registry.insert(
        id,
        SessionInfo {
            uid,
            connected: Instant::now(),
        },
    );

    let mut session = Session {
        id,
        uid,
        fs,
        files: OpenFileTable::new(),
    };
    let result = session.serve(&mut reader, &mut writer);
    session.release_all();
    match &result {
        Ok(()) => info!("session {id}: user {uid} disconnected"),
        Err(e) => warn!("session {id}: user {uid} aborted: {e}"),
    }
    result
}

struct Session {
    id: u64,
    uid: u32,
    fs: Arc<FlatFs>,
    files: OpenFileTable,
}

impl Session {
    fn serve(&mut self, reader: &mut BufReader<UnixStream>, writer: &mut UnixStream) -> Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            debug!("session {}: request {:?}", self.id, line.trim_end());
            let outcome = protocol::parse_request(&line).and_then(|req| self.dispatch(req));
            match outcome {
                Ok(reply) => protocol::write_reply(writer, &reply)?,
                Err(e) => match e.wire_code() {
                    Some(code) => {
                        debug!("session {}: rejected: {e}", self.id);
                        protocol::write_reply(writer, &Reply::failure(code))?;
                    }
                    None => return Err(e),
                },
            }
        }
    }

    /// Validates and applies one request: namespace first, then the inode
    /// table, then this session's descriptor table.
    fn dispatch(&mut self, request: Request) -> Result<Reply> {
        match request {
            Request::Create {
                name,
                owner_perm,
                others_perm,
            } => self.create(name, owner_perm, others_perm),
            Request::Delete { name } => self.delete(&name),
            Request::Rename { old, new } => self.rename(old, new),
            Request::Open { name, mode } => self.open(&name, mode),
            Request::Close { fd } => self.close(fd),
            Request::Read { fd, len } => self.read(fd, len),
            Request::Write { fd, data } => self.write(fd, data.as_bytes()),
        }
    }

    fn create(&mut self, name: String, owner_perm: Perm, others_perm: Perm) -> Result<Reply> {
        let dir = &self.fs.directory;
        let mut entries = dir.shard(dir.shard_of(&name)).write();
        if entries.contains_key(&name) {
            return Err(Error::AlreadyExists);
        }
        let inum = self.fs.inodes.allocate(self.uid, owner_perm, others_perm)?;
        entries.insert(name, inum);
        Ok(Reply::ok())
    }

    fn delete(&mut self, name: &str) -> Result<Reply> {
        let dir = &self.fs.directory;
        let mut entries = dir.shard(dir.shard_of(name)).write();
        let inum = *entries.get(name).ok_or(Error::NotFound)?;
        let meta = self.fs.inodes.describe(inum)?;
        if meta.owner != self.uid {
            return Err(Error::PermissionDenied);
        }
        if meta.open_count > 0 {
            return Err(Error::IsOpen);
        }
        self.fs.inodes.free(inum)?;
        entries.remove(name);
        Ok(Reply::ok())
    }

    fn rename(&mut self, old: String, new: String) -> Result<Reply> {
        let dir = &self.fs.directory;
        let old_shard = dir.shard_of(&old);
        let new_shard = dir.shard_of(&new);

        if old_shard == new_shard {
            let mut entries = dir.shard(old_shard).write();
            let inum = *entries.get(&old).ok_or(Error::NotFound)?;
            if self.fs.inodes.describe(inum)?.owner != self.uid {
                return Err(Error::PermissionDenied);
            }
            if entries.contains_key(&new) {
                return Err(Error::AlreadyExists);
            }
            entries.remove(&old);
            entries.insert(new, inum);
            return Ok(Reply::ok());
        }

        // Two shards: always lock in ascending shard-index order so
        // concurrent renames in opposite directions cannot deadlock.
        let (lo, hi) = if old_shard < new_shard {
            (old_shard, new_shard)
        } else {
            (new_shard, old_shard)
        };
        let mut lo_guard = dir.shard(lo).write();
        let mut hi_guard = dir.shard(hi).write();
        let (old_entries, new_entries) = if old_shard == lo {
            (&mut *lo_guard, &mut *hi_guard)
        } else {
            (&mut *hi_guard, &mut *lo_guard)
        };

        let inum = *old_entries.get(&old).ok_or(Error::NotFound)?;
        if self.fs.inodes.describe(inum)?.owner != self.uid {
            return Err(Error::PermissionDenied);
        }
        if new_entries.contains_key(&new) {
            return Err(Error::AlreadyExists);
        }
        old_entries.remove(&old);
        new_entries.insert(new, inum);
        Ok(Reply::ok())
    }

    fn open(&mut self, name: &str, mode: Perm) -> Result<Reply> {
        let dir = &self.fs.directory;
        let entries = dir.shard(dir.shard_of(name)).read();
        let inum = *entries.get(name).ok_or(Error::NotFound)?;
        let meta = self.fs.inodes.describe(inum)?;
        let effective = if self.uid == meta.owner {
            meta.owner_perm
        } else {
            meta.others_perm
        };
        if !effective.contains(mode) {
            return Err(Error::PermissionDenied);
        }
        let fd = self.files.open_descriptor(inum, mode)?;
        // Still under the shard read lock, so delete's open-count check
        // cannot interleave with this increment.
        if let Err(e) = self.fs.inodes.adjust_open_count(inum, 1) {
            let _ = self.files.close_descriptor(fd);
            return Err(e);
        }
        Ok(Reply::descriptor(fd))
    }

    fn close(&mut self, fd: usize) -> Result<Reply> {
        let open = self.files.close_descriptor(fd)?;
        self.fs.inodes.adjust_open_count(open.inum, -1)?;
        Ok(Reply::ok())
    }

    fn read(&mut self, fd: usize, len: usize) -> Result<Reply> {
        let open = self.files.resolve(fd)?;
        if !open.mode.contains(PermBit::Read) {
            return Err(Error::InvalidMode);
        }
        let data = self.fs.inodes.read_content(open.inum, len)?;
        Ok(Reply::content(data))
    }

    fn write(&mut self, fd: usize, data: &[u8]) -> Result<Reply> {
        let open = self.files.resolve(fd)?;
        if !open.mode.contains(PermBit::Write) {
            return Err(Error::InvalidMode);
        }
        self.fs.inodes.write_content(open.inum, data)?;
        Ok(Reply::ok())
    }

    /// Force-closes whatever the session still has open.
    fn release_all(&mut self) {
        let held: Vec<_> = self.files.drain().collect();
        for open in held {
            debug!(
                "session {}: releasing descriptor on inode {}",
                self.id, open.inum
            );
            if let Err(e) = self.fs.inodes.adjust_open_count(open.inum, -1) {
                error!("session {}: teardown: {e}", self.id);
            }
        }
    }
}
