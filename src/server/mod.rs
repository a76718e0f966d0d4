//! The socket front end: bind, accept loop, signal-driven shutdown.

mod session;

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::fs::FlatFs;

/// Write end of the self-pipe poked by the signal handler.
static SIGNAL_PIPE: AtomicI32 = AtomicI32::new(-1);

extern "C" fn signal_handler(_sig: libc::c_int) {
    let fd = SIGNAL_PIPE.load(Ordering::Relaxed);
    if fd >= 0 {
        unsafe {
            libc::write(fd, b"x".as_ptr() as *const libc::c_void, 1);
        }
    }
}

/// A live, handshaken session, kept for shutdown reporting.
pub(crate) struct SessionInfo {
    pub uid: u32,
    pub connected: Instant,
}

/// Binds the socket and serves until told to shut down.
///
/// The first SIGINT/SIGTERM stops accepting and waits for connected
/// sessions to drain; a second one forces the shutdown through. Returns
/// with the store intact so the caller can write the namespace dump.
pub fn run(socket_path: &Path, fs: Arc<FlatFs>) -> Result<()> {
    let listener = bind(socket_path)?;
    listener.set_nonblocking(true)?;

    let (pipe_read, pipe_write) = signal_pipe()?;
    SIGNAL_PIPE.store(pipe_write, Ordering::Relaxed);
    unsafe {
        use nix::sys::signal::{signal, SigHandler, Signal};
        signal(Signal::SIGINT, SigHandler::Handler(signal_handler)).ok();
        signal(Signal::SIGTERM, SigHandler::Handler(signal_handler)).ok();
    }

    let registry: Arc<DashMap<u64, SessionInfo>> = Arc::new(DashMap::new());
    let active = Arc::new(AtomicUsize::new(0));
    let mut next_id: u64 = 1;

    info!("serving at {}", socket_path.display());

    loop {
        let mut fds = [
            libc::pollfd {
                fd: pipe_read,
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: listener.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, 200) };
        if n < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e.into());
        }
        if fds[0].revents & libc::POLLIN != 0 {
            drain_pipe(pipe_read);
            break;
        }
        if fds[1].revents & libc::POLLIN != 0 {
            match listener.accept() {
                Ok((stream, _)) => {
                    let id = next_id;
                    next_id += 1;
                    spawn_session(
                        stream,
                        id,
                        Arc::clone(&fs),
                        Arc::clone(&registry),
                        Arc::clone(&active),
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    // Stop accepting before draining so late clients fail fast.
    drop(listener);
    let _ = std::fs::remove_file(socket_path);

    let waiting = active.load(Ordering::SeqCst);
    if waiting > 0 {
        info!("shutdown requested; waiting for {waiting} active session(s)");
        for entry in registry.iter() {
            info!(
                "  session {} (user {}) connected for {:.0?}",
                entry.key(),
                entry.value().uid,
                entry.value().connected.elapsed()
            );
        }
        loop {
            let mut fds = [libc::pollfd {
                fd: pipe_read,
                events: libc::POLLIN,
                revents: 0,
            }];
            let n = unsafe { libc::poll(fds.as_mut_ptr(), 1, 200) };
            if n > 0 && fds[0].revents & libc::POLLIN != 0 {
                warn!(
                    "second signal; forcing shutdown with {} session(s) active",
                    active.load(Ordering::SeqCst)
                );
                break;
            }
            if active.load(Ordering::SeqCst) == 0 {
                info!("all sessions drained");
                break;
            }
        }
    }

    SIGNAL_PIPE.store(-1, Ordering::Relaxed);
    unsafe {
        libc::close(pipe_read);
        libc::close(pipe_write);
    }
    Ok(())
}

/// Binds the listener, refusing to displace a live server but silently
/// replacing a stale socket file from an unclean exit.
fn bind(socket_path: &Path) -> Result<UnixListener> {
    if socket_path.exists() {
        if UnixStream::connect(socket_path).is_ok() {
            return Err(Error::Config(format!(
                "{} is already being served",
                socket_path.display()
            )));
        }
        debug!("removing stale socket {}", socket_path.display());
        std::fs::remove_file(socket_path)?;
    }
    Ok(UnixListener::bind(socket_path)?)
}

fn signal_pipe() -> Result<(RawFd, RawFd)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok((fds[0], fds[1]))
}

fn drain_pipe(fd: RawFd) {
    let mut buf = [0u8; 16];
    unsafe {
        libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len());
    }
}

fn spawn_session(
    stream: UnixStream,
    id: u64,
    fs: Arc<FlatFs>,
    registry: Arc<DashMap<u64, SessionInfo>>,
    active: Arc<AtomicUsize>,
) {
    active.fetch_add(1, Ordering::SeqCst);
    let thread_active = Arc::clone(&active);
    let result = thread::Builder::new()
        .name(format!("session-{id}"))
        .spawn(move || {
            debug!("session {id}: accepted");
            match session::run(stream, fs, id, Arc::clone(&registry)) {
                Ok(()) => {}
                Err(Error::Io(e)) => warn!("session {id}: connection lost: {e}"),
                Err(e) => error!("session {id}: {e}"),
            }
            registry.remove(&id);
            thread_active.fetch_sub(1, Ordering::SeqCst);
        });
    if let Err(e) = result {
        error!("failed to spawn session {id}: {e}");
        active.fetch_sub(1, Ordering::SeqCst);
    }
}
