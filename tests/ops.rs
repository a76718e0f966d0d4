//! Operation contracts exercised over a live server, one session at a time.

mod helpers;

use std::io::Write;
use std::os::unix::net::UnixStream;

use flatfs::error::Error;
use flatfs::protocol::{read_reply, status};

use helpers::*;

/// Creating a name twice reports the duplicate, from any session.
#[test]
fn create_rejects_duplicates() {
    let server = TestServer::start();
    let mut alice = server.client(1);
    alice.create("notes", rw(), ro()).unwrap();
    assert!(matches!(
        alice.create("notes", rw(), ro()),
        Err(Error::AlreadyExists)
    ));

    let mut bob = server.client(2);
    assert!(matches!(
        bob.create("notes", rw(), rw()),
        Err(Error::AlreadyExists)
    ));
}

/// Write replaces content wholesale; read returns up to the requested
/// number of bytes.
#[test]
fn write_then_read_round_trip() {
    let server = TestServer::start();
    let mut client = server.client(1);
    client.create("doc", rw(), none()).unwrap();

    let fd = client.open("doc", rw()).unwrap();
    assert_eq!(fd, 0);
    assert!(client.read(fd, 64).unwrap().is_empty());

    client.write(fd, "hello there world").unwrap();
    assert_eq!(client.read(fd, 1024).unwrap(), b"hello there world");
    assert_eq!(client.read(fd, 5).unwrap(), b"hello");

    client.write(fd, "shorter").unwrap();
    assert_eq!(client.read(fd, 1024).unwrap(), b"shorter");
    client.close(fd).unwrap();
}

/// A descriptor only allows what its open mode granted.
#[test]
fn descriptor_mode_is_enforced() {
    let server = TestServer::start();
    let mut client = server.client(1);
    client.create("doc", rw(), none()).unwrap();

    let fd = client.open("doc", wo()).unwrap();
    assert!(matches!(client.read(fd, 16), Err(Error::InvalidMode)));
    client.write(fd, "secret").unwrap();
    client.close(fd).unwrap();

    let fd = client.open("doc", ro()).unwrap();
    assert!(matches!(client.write(fd, "nope"), Err(Error::InvalidMode)));
    assert_eq!(client.read(fd, 64).unwrap(), b"secret");
    client.close(fd).unwrap();
}

/// Non-owners get the others mask, and the requested mode must be a subset
/// of it. The permission check also outranks the session descriptor table:
/// an unauthorized re-open reports the denial, not the existing descriptor.
#[test]
fn others_mask_is_checked_as_a_subset() {
    let server = TestServer::start();
    let mut owner = server.client(1);
    owner.create("shared", rw(), ro()).unwrap();

    let mut guest = server.client(2);
    let fd = guest.open("shared", ro()).unwrap();
    assert!(matches!(
        guest.open("shared", wo()),
        Err(Error::PermissionDenied)
    ));
    assert!(matches!(
        guest.open("shared", rw()),
        Err(Error::PermissionDenied)
    ));
    guest.close(fd).unwrap();
    assert!(matches!(
        guest.open("shared", wo()),
        Err(Error::PermissionDenied)
    ));

    let fd = owner.open("shared", rw()).unwrap();
    owner.close(fd).unwrap();
}

/// The owner is bound by the owner mask; it is not a superset of others.
#[test]
fn owner_mask_binds_the_owner() {
    let server = TestServer::start();
    let mut owner = server.client(1);
    owner.create("inbox", none(), rw()).unwrap();
    assert!(matches!(
        owner.open("inbox", ro()),
        Err(Error::PermissionDenied)
    ));
    assert!(matches!(
        owner.open("inbox", wo()),
        Err(Error::PermissionDenied)
    ));

    let mut guest = server.client(2);
    let fd = guest.open("inbox", rw()).unwrap();
    guest.close(fd).unwrap();
}

/// Delete requires ownership, refuses open files, and frees the name once
/// the last descriptor is gone.
#[test]
fn delete_respects_owner_and_open_state() {
    let server = TestServer::start();
    let mut owner = server.client(1);
    owner.create("temp", rw(), rw()).unwrap();

    let mut guest = server.client(2);
    assert!(matches!(guest.delete("temp"), Err(Error::PermissionDenied)));

    let fd = owner.open("temp", rw()).unwrap();
    assert!(matches!(owner.delete("temp"), Err(Error::IsOpen)));
    owner.close(fd).unwrap();
    owner.delete("temp").unwrap();

    assert!(matches!(owner.open("temp", ro()), Err(Error::NotFound)));
    assert!(matches!(owner.delete("temp"), Err(Error::NotFound)));
}

/// Rename moves the binding, keeps the inode (content survives), and
/// refuses missing sources and existing targets.
#[test]
fn rename_moves_without_copying() {
    let server = TestServer::start();
    let mut client = server.client(1);
    client.create("draft", rw(), none()).unwrap();
    let fd = client.open("draft", rw()).unwrap();
    client.write(fd, "payload").unwrap();
    client.close(fd).unwrap();

    client.rename("draft", "final").unwrap();
    assert!(matches!(client.open("draft", ro()), Err(Error::NotFound)));
    let fd = client.open("final", ro()).unwrap();
    assert_eq!(client.read(fd, 64).unwrap(), b"payload");
    client.close(fd).unwrap();

    // Missing source: no entry appears under the target name.
    assert!(matches!(
        client.rename("ghost", "spirit"),
        Err(Error::NotFound)
    ));
    assert!(matches!(client.open("spirit", ro()), Err(Error::NotFound)));

    // Existing target, including the degenerate self-rename.
    client.create("other", rw(), none()).unwrap();
    assert!(matches!(
        client.rename("final", "other"),
        Err(Error::AlreadyExists)
    ));
    assert!(matches!(
        client.rename("final", "final"),
        Err(Error::AlreadyExists)
    ));

    // Ownership applies to the source.
    let mut guest = server.client(2);
    assert!(matches!(
        guest.rename("final", "stolen"),
        Err(Error::PermissionDenied)
    ));
}

/// Renaming an open file leaves its descriptors attached to the same
/// inode.
#[test]
fn rename_keeps_open_descriptors_valid() {
    let server = TestServer::start();
    let mut client = server.client(1);
    client.create("live", rw(), none()).unwrap();
    let fd = client.open("live", rw()).unwrap();
    client.write(fd, "v1").unwrap();

    client.rename("live", "moved").unwrap();
    client.write(fd, "v2").unwrap();
    assert_eq!(client.read(fd, 16).unwrap(), b"v2");

    // Same inode, so a second descriptor in this session is refused.
    assert!(matches!(client.open("moved", ro()), Err(Error::IsOpen)));
    assert!(matches!(client.delete("moved"), Err(Error::IsOpen)));

    client.close(fd).unwrap();
    client.delete("moved").unwrap();
}

/// Descriptors are a fixed-size resource: five per session, reused lowest
/// first, with existing ones untouched by a failed open.
#[test]
fn session_descriptor_table_is_bounded() {
    let server = TestServer::start();
    let mut client = server.client(1);
    for i in 0..6 {
        client.create(&format!("file{i}"), rw(), none()).unwrap();
    }

    let mut fds = Vec::new();
    for i in 0..5 {
        let fd = client.open(&format!("file{i}"), rw()).unwrap();
        assert_eq!(fd, i);
        client.write(fd, &format!("body{i}")).unwrap();
        fds.push(fd);
    }
    assert!(matches!(
        client.open("file5", rw()),
        Err(Error::MaxOpenFiles)
    ));

    // The five existing descriptors still work after the refusal.
    for (i, fd) in fds.iter().enumerate() {
        assert_eq!(client.read(*fd, 64).unwrap(), format!("body{i}").as_bytes());
    }

    client.close(2).unwrap();
    assert_eq!(client.open("file5", rw()).unwrap(), 2);
}

/// Closed descriptors stop working and their numbers are recycled.
#[test]
fn close_releases_the_descriptor() {
    let server = TestServer::start();
    let mut client = server.client(1);
    client.create("a", rw(), none()).unwrap();
    client.create("b", rw(), none()).unwrap();
    client.create("c", rw(), none()).unwrap();

    let fd_a = client.open("a", rw()).unwrap();
    let fd_b = client.open("b", rw()).unwrap();
    let fd_c = client.open("c", rw()).unwrap();
    assert_eq!((fd_a, fd_b, fd_c), (0, 1, 2));

    client.close(fd_b).unwrap();
    assert!(matches!(client.close(fd_b), Err(Error::NotOpen)));
    assert!(matches!(client.read(fd_b, 8), Err(Error::NotOpen)));
    assert!(matches!(client.write(fd_b, "x"), Err(Error::NotOpen)));

    assert_eq!(client.open("b", rw()).unwrap(), 1);
    assert!(matches!(client.close(99), Err(Error::NotOpen)));
}

/// Identity is per-user, not per-session: a second session with the same
/// uid holds the same rights.
#[test]
fn same_uid_spans_sessions() {
    let server = TestServer::start();
    let mut first = server.client(42);
    first.create("mine", rw(), none()).unwrap();

    let mut second = server.client(42);
    let fd = second.open("mine", rw()).unwrap();
    second.close(fd).unwrap();
    second.delete("mine").unwrap();
}

/// Malformed lines are answered with a syntax error and the session keeps
/// serving.
#[test]
fn malformed_requests_get_syntax_errors() {
    let server = TestServer::start();
    let mut client = server.client(1);

    let bad = [
        "",
        "z anything",
        "c solo",
        "c nm 44",
        "c nm 3",
        "c a 12 junk",
        "o nm 0",
        "o nm 9",
        "l 0 0",
        "l 0 nope",
        "x",
        "w 3",
        "u 5",
    ];
    for line in bad {
        let reply = client.raw(line).unwrap();
        assert_eq!(
            reply.status,
            status::INVALID_SYNTAX,
            "line {line:?} should be rejected"
        );
    }

    client.create("still-alive", rw(), none()).unwrap();
}

/// Content is capped; an oversized write leaves the old content intact.
#[test]
fn oversized_writes_are_rejected() {
    let server = TestServer::start();
    let mut client = server.client(1);
    client.create("cap", rw(), none()).unwrap();
    let fd = client.open("cap", rw()).unwrap();

    client.write(fd, "before").unwrap();
    let too_big = "a".repeat(flatfs::fs::MAX_CONTENT_LEN + 1);
    assert!(matches!(
        client.write(fd, &too_big),
        Err(Error::ContentTooLarge)
    ));
    assert_eq!(client.read(fd, 2048).unwrap(), b"before");

    let max = "a".repeat(flatfs::fs::MAX_CONTENT_LEN);
    client.write(fd, &max).unwrap();
    assert_eq!(
        client.read(fd, flatfs::fs::MAX_CONTENT_LEN).unwrap().len(),
        flatfs::fs::MAX_CONTENT_LEN
    );
    client.close(fd).unwrap();
}

/// A full inode table surfaces as a generic failure; freeing a slot makes
/// room again.
#[test]
fn full_inode_table_is_a_generic_failure() {
    let server = TestServer::start_with_capacity(2);
    let mut client = server.client(1);
    client.create("one", rw(), none()).unwrap();
    client.create("two", rw(), none()).unwrap();
    assert!(matches!(
        client.create("three", rw(), none()),
        Err(Error::Other)
    ));

    client.delete("one").unwrap();
    client.create("three", rw(), none()).unwrap();
}

/// A session that skips the handshake gets a syntax error and no service.
#[test]
fn handshake_is_mandatory() {
    let server = TestServer::start();
    let mut stream = UnixStream::connect(server.socket()).unwrap();
    stream.write_all(b"c sneaky 33\n").unwrap();

    let reply = read_reply(&mut stream).unwrap();
    assert_eq!(reply.status, status::INVALID_SYNTAX);

    // The server hangs up; the next read sees end-of-stream.
    assert!(read_reply(&mut stream).is_err());

    // And nothing was created.
    let mut client = server.client(1);
    assert!(matches!(client.open("sneaky", ro()), Err(Error::NotFound)));
}
