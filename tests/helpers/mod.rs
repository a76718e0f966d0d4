#![allow(dead_code)]

use std::io::Read;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use flatfs::client::Client;
use flatfs::fs::Directory;
use flatfs::protocol::{Perm, PermBit};

/// Read/write permission mask.
pub fn rw() -> Perm {
    PermBit::Read | PermBit::Write
}

/// Read-only permission mask.
pub fn ro() -> Perm {
    PermBit::Read.into()
}

/// Write-only permission mask.
pub fn wo() -> Perm {
    PermBit::Write.into()
}

/// Empty permission mask.
pub fn none() -> Perm {
    Perm::empty()
}

/// A server process on its own temp socket, killed on drop.
pub struct TestServer {
    dir: tempfile::TempDir,
    socket: PathBuf,
    child: Child,
}

impl TestServer {
    /// Starts a server with default settings.
    pub fn start() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        Self::spawn_in(dir, &[])
    }

    /// Starts a server with a table of `capacity` inodes.
    pub fn start_with_capacity(capacity: usize) -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let args = ["--inode-capacity".to_string(), capacity.to_string()];
        Self::spawn_in(dir, &args)
    }

    /// Starts a server with `shards` shards that writes its shutdown dump
    /// to [`TestServer::dump_path`].
    pub fn start_with_dump(shards: usize) -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let dump = dir.path().join("dump.txt");
        let args = [
            "--shards".to_string(),
            shards.to_string(),
            "--output".to_string(),
            dump.to_string_lossy().into_owned(),
        ];
        Self::spawn_in(dir, &args)
    }

    fn spawn_in(dir: tempfile::TempDir, extra: &[String]) -> Self {
        let socket = dir.path().join("flatfs.sock");
        let child = Command::new(env!("CARGO_BIN_EXE_flatfs"))
            .arg("serve")
            .arg(&socket)
            .args(extra)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start flatfs");
        let server = TestServer { dir, socket, child };
        assert!(
            wait_connectable(&server.socket, Duration::from_secs(5)),
            "server did not come up on {}",
            server.socket.display()
        );
        server
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn dump_path(&self) -> PathBuf {
        self.dir.path().join("dump.txt")
    }

    /// Connects a session announcing `uid`.
    pub fn client(&self, uid: u32) -> Client {
        Client::connect(&self.socket, uid).expect("failed to connect")
    }

    /// Sends a signal to the server process.
    pub fn signal(&self, sig: libc::c_int) {
        unsafe {
            libc::kill(self.child.id() as libc::pid_t, sig);
        }
    }

    /// True while the process has not exited.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Blocks until the process exits, returning its status and captured
    /// stderr. Panics if it is still running after five seconds.
    pub fn wait_exit(&mut self) -> (ExitStatus, String) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match self.child.try_wait().expect("try_wait") {
                Some(status) => {
                    let mut stderr = String::new();
                    if let Some(mut pipe) = self.child.stderr.take() {
                        pipe.read_to_string(&mut stderr).ok();
                    }
                    return (status, stderr);
                }
                None if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                None => panic!("server did not exit within 5s"),
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Polls until something accepts connections on `path`, up to `timeout`.
pub fn wait_connectable(path: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if UnixStream::connect(path).is_ok() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

/// Two names that land in different shards of a `shards`-wide namespace.
pub fn cross_shard_pair(shards: usize) -> (String, String) {
    let dir = Directory::new(shards);
    let left = "left".to_string();
    let target = dir.shard_of(&left);
    for i in 0.. {
        let candidate = format!("right{i}");
        if dir.shard_of(&candidate) != target {
            return (left, candidate);
        }
    }
    unreachable!("hash cannot map every name to one shard")
}
