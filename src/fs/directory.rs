//! The sharded name index.

use std::collections::BTreeMap;
use std::io::{self, Write};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use xxhash_rust::xxh3::xxh3_64;

/// One shard: an ordered name-to-inode map behind its own reader/writer
/// lock.
///
/// Lookup, insert, and remove are plain `BTreeMap` calls on the guard, so
/// holding the right lock is enforced by construction rather than by
/// convention.
pub struct Shard {
    entries: RwLock<BTreeMap<String, usize>>,
}

impl Shard {
    fn new() -> Self {
        Shard {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, usize>> {
        self.entries.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, usize>> {
        self.entries.write()
    }
}

/// The flat namespace, split across a fixed number of shards.
///
/// A name's shard is pinned for the lifetime of the table by a
/// deterministic, seedless hash, so each name is only ever reachable
/// through one lock. Operations touching two names must take both shard
/// locks in ascending shard-index order.
pub struct Directory {
    shards: Vec<Shard>,
}

impl Directory {
    /// Creates an empty namespace with `num_shards` shards (at least one).
    pub fn new(num_shards: usize) -> Self {
        let shards = (0..num_shards.max(1)).map(|_| Shard::new()).collect();
        Directory { shards }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// The index of the shard responsible for `name`.
    pub fn shard_of(&self, name: &str) -> usize {
        (xxh3_64(name.as_bytes()) % self.shards.len() as u64) as usize
    }

    pub fn shard(&self, index: usize) -> &Shard {
        &self.shards[index]
    }

    /// Copies out the whole namespace: shards in index order, names in
    /// lexicographic order within each shard. Takes each shard's read lock
    /// in turn.
    pub fn snapshot(&self) -> Vec<(String, usize)> {
        let mut entries = Vec::new();
        for shard in &self.shards {
            for (name, inum) in shard.read().iter() {
                entries.push((name.clone(), *inum));
            }
        }
        entries
    }

    /// Writes the namespace listing, one `name inode` pair per line, in
    /// [`Directory::snapshot`] order.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for (name, inum) in self.snapshot() {
            writeln!(out, "{name} {inum}")?;
        }
        Ok(())
    }
}
