use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::{Error, Result};

pub const DEFAULT_SHARDS: usize = 8;
pub const DEFAULT_INODE_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "flatfs", about = "In-memory file-name server for local socket clients")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the server
    Serve {
        /// Socket path to listen on
        socket: PathBuf,

        /// Number of namespace shards
        #[arg(long, default_value_t = DEFAULT_SHARDS)]
        shards: usize,

        /// Inode table capacity
        #[arg(long, default_value_t = DEFAULT_INODE_CAPACITY)]
        inode_capacity: usize,

        /// Write the shutdown namespace dump here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Mirror logs into this file as well as stderr
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Open an interactive shell against a running server
    Shell {
        /// Socket path of the server
        socket: PathBuf,

        /// Identity to announce (defaults to your uid)
        #[arg(long)]
        user: Option<u32>,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket: PathBuf,
    pub shards: usize,
    pub inode_capacity: usize,
    pub output: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.shards == 0 {
            return Err(Error::Config("--shards must be at least 1".into()));
        }
        if self.inode_capacity == 0 {
            return Err(Error::Config("--inode-capacity must be at least 1".into()));
        }
        Ok(())
    }
}
