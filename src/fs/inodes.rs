//! The fixed-capacity inode table.

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::protocol::Perm;

/// Upper bound on one file's content, in bytes.
pub const MAX_CONTENT_LEN: usize = 1024;

struct Inode {
    owner: u32,
    owner_perm: Perm,
    others_perm: Perm,
    open_count: u32,
    content: Vec<u8>,
}

/// A point-in-time copy of an inode's lifecycle fields.
#[derive(Debug, Clone, Copy)]
pub struct InodeMeta {
    pub owner: u32,
    pub owner_perm: Perm,
    pub others_perm: Perm,
    pub open_count: u32,
}

/// Fixed-capacity inode storage. The slot index is the inode number.
///
/// There is no table-wide lock: each slot carries its own `RwLock`, so
/// content operations run without touching any shard lock. Lifecycle
/// transitions (allocate behind create, free behind delete, the open-count
/// check in delete) are additionally serialized by the owning shard's lock
/// in the dispatcher.
pub struct InodeTable {
    slots: Vec<RwLock<Option<Inode>>>,
}

impl InodeTable {
    /// Creates a table with room for `capacity` inodes (at least one).
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1)).map(|_| RwLock::new(None)).collect();
        InodeTable { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claims the first free slot, lowest number first. Fails with
    /// `CapacityExceeded` when every slot is taken.
    pub fn allocate(&self, owner: u32, owner_perm: Perm, others_perm: Perm) -> Result<usize> {
        for (inum, slot) in self.slots.iter().enumerate() {
            let mut guard = slot.write();
            if guard.is_none() {
                *guard = Some(Inode {
                    owner,
                    owner_perm,
                    others_perm,
                    open_count: 0,
                    content: Vec::new(),
                });
                return Ok(inum);
            }
        }
        Err(Error::CapacityExceeded)
    }

    /// Releases a slot. The caller must already have verified that no
    /// descriptor is bound to it; the table does not re-check.
    pub fn free(&self, inum: usize) -> Result<()> {
        let mut guard = self.slot(inum)?.write();
        if guard.take().is_none() {
            return Err(Error::InvalidInode(inum));
        }
        Ok(())
    }

    /// Copies out an inode's lifecycle fields.
    pub fn describe(&self, inum: usize) -> Result<InodeMeta> {
        let guard = self.slot(inum)?.read();
        let inode = guard.as_ref().ok_or(Error::InvalidInode(inum))?;
        Ok(InodeMeta {
            owner: inode.owner,
            owner_perm: inode.owner_perm,
            others_perm: inode.others_perm,
            open_count: inode.open_count,
        })
    }

    /// Applies `delta` to the inode's live-descriptor count, returning the
    /// new value. A negative result means a corrupted invariant and comes
    /// back as `OpenCountUnderflow`, which callers treat as session-fatal.
    pub fn adjust_open_count(&self, inum: usize, delta: i32) -> Result<u32> {
        let mut guard = self.slot(inum)?.write();
        let inode = guard.as_mut().ok_or(Error::InvalidInode(inum))?;
        let count = i64::from(inode.open_count) + i64::from(delta);
        if count < 0 {
            return Err(Error::OpenCountUnderflow(inum));
        }
        inode.open_count = count as u32;
        Ok(inode.open_count)
    }

    /// Returns up to `max` bytes of content.
    pub fn read_content(&self, inum: usize, max: usize) -> Result<Vec<u8>> {
        let guard = self.slot(inum)?.read();
        let inode = guard.as_ref().ok_or(Error::InvalidInode(inum))?;
        let len = max.min(inode.content.len());
        Ok(inode.content[..len].to_vec())
    }

    /// Replaces the content wholesale. Fails with `ContentTooLarge` past
    /// [`MAX_CONTENT_LEN`].
    pub fn write_content(&self, inum: usize, data: &[u8]) -> Result<()> {
        if data.len() > MAX_CONTENT_LEN {
            return Err(Error::ContentTooLarge);
        }
        let mut guard = self.slot(inum)?.write();
        let inode = guard.as_mut().ok_or(Error::InvalidInode(inum))?;
        inode.content = data.to_vec();
        Ok(())
    }

    fn slot(&self, inum: usize) -> Result<&RwLock<Option<Inode>>> {
        self.slots.get(inum).ok_or(Error::InvalidInode(inum))
    }
}
