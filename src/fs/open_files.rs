//! The per-session descriptor table.

use crate::error::{Error, Result};
use crate::protocol::Perm;

/// Descriptors one session may hold at once.
pub const MAX_OPEN_FILES: usize = 5;

/// One bound descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    pub inum: usize,
    pub mode: Perm,
}

/// A session's descriptor slots. Descriptor numbers are slot indices and
/// are reused after close. Owned by a single session thread, so there is no
/// lock.
#[derive(Debug, Default)]
pub struct OpenFileTable {
    slots: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `inum` to the lowest free descriptor.
    ///
    /// A session holds at most one descriptor per inode: a second open of
    /// the same inode fails with `IsOpen` even when slots are free. With no
    /// free slot it fails with `MaxOpenFiles`.
    pub fn open_descriptor(&mut self, inum: usize, mode: Perm) -> Result<usize> {
        let mut free = None;
        for (fd, slot) in self.slots.iter().enumerate() {
            match slot {
                Some(open) if open.inum == inum => return Err(Error::IsOpen),
                Some(_) => {}
                None => {
                    if free.is_none() {
                        free = Some(fd);
                    }
                }
            }
        }
        let fd = free.ok_or(Error::MaxOpenFiles)?;
        self.slots[fd] = Some(OpenFile { inum, mode });
        Ok(fd)
    }

    /// Unbinds a descriptor, returning what it pointed at. Out-of-range and
    /// unbound descriptors both read as not open.
    pub fn close_descriptor(&mut self, fd: usize) -> Result<OpenFile> {
        self.slots
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(Error::NotOpen)
    }

    /// Looks up a bound descriptor without disturbing it.
    pub fn resolve(&self, fd: usize) -> Result<OpenFile> {
        self.slots.get(fd).copied().flatten().ok_or(Error::NotOpen)
    }

    /// Empties the table for session teardown, yielding everything that was
    /// still bound.
    pub fn drain(&mut self) -> impl Iterator<Item = OpenFile> + '_ {
        self.slots.iter_mut().filter_map(Option::take)
    }
}
