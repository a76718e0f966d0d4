pub mod directory;
pub mod inodes;
pub mod open_files;

pub use directory::{Directory, Shard};
pub use inodes::{InodeMeta, InodeTable, MAX_CONTENT_LEN};
pub use open_files::{OpenFile, OpenFileTable, MAX_OPEN_FILES};

use std::io::{self, Write};

/// Everything sessions share: the sharded name index and the inode table.
///
/// Session threads hold this behind an `Arc`. The store itself carries no
/// lock; synchronization lives in the shards and the inode slots.
pub struct FlatFs {
    pub directory: Directory,
    pub inodes: InodeTable,
}

impl FlatFs {
    pub fn new(shards: usize, inode_capacity: usize) -> Self {
        FlatFs {
            directory: Directory::new(shards),
            inodes: InodeTable::new(inode_capacity),
        }
    }

    /// Writes the shutdown namespace listing, `name inode` per line.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.directory.dump(out)
    }
}
