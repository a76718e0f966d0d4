//! flatfs: an in-memory file-name service for local socket clients.
//!
//! A flat namespace of named byte records, sharded across reader/writer
//! locks and served over a Unix domain socket with one worker thread per
//! session. [`fs::FlatFs`] is the shared store, [`server`] the socket front
//! end, and [`client::Client`] the matching typed client.

pub mod client;
pub mod config;
pub mod error;
pub mod fs;
pub mod protocol;
pub mod server;
