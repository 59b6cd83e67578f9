use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{SocketAddr, UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Unix domain socket transport.
///
/// The server unlinks and rebinds its well-known path on startup; stale
/// socket files are removed, anything else at the path is refused. The
/// bound path is cleaned up on `Drop`, guarded by inode identity so a
/// replaced path is never removed.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length (`sockaddr_un.sun_path`).
    #[cfg(target_os = "linux")]
    pub const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    pub const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a filesystem-path Unix domain socket.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        validate_path_len(&path)?;
        remove_stale_socket(&path)?;

        let listener = UnixListener::bind(&path).map_err(|e| TransportError::Bind {
            path: path.clone(),
            source: e,
        })?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            TransportError::Bind {
                path: path.clone(),
                source: e,
            }
        })?;
        let created_metadata =
            std::fs::symlink_metadata(&path).map_err(|e| TransportError::Bind {
                path: path.clone(),
                source: e,
            })?;
        let created_inode = Some((created_metadata.dev(), created_metadata.ino()));

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            path,
            created_inode,
        })
    }

    /// Accept an incoming connection (blocking).
    ///
    /// Returns the stream together with the peer's bound address; the
    /// trust gate consumes the address.
    pub fn accept(&self) -> Result<(UnixStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!("accepted connection");
        Ok((stream, addr))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        if let Some((expected_dev, expected_ino)) = self.created_inode {
            if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino
                {
                    debug!(path = ?self.path, "cleaning up socket file");
                    let _ = std::fs::remove_file(&self.path);
                } else {
                    debug!(
                        path = ?self.path,
                        "socket path identity changed; skipping cleanup"
                    );
                }
            }
        }
    }
}

/// Connect to a listening sandpatch socket, binding the local end of the
/// connection to `identity_path` first.
///
/// The bound path is the client's credential: the server stats it after
/// accept, so it must exist as an owner-only socket for the lifetime of
/// the connect. Stale identity sockets at the path are removed.
pub fn connect_with_identity(
    server_path: impl AsRef<Path>,
    identity_path: impl AsRef<Path>,
) -> Result<UnixStream> {
    let server_path = server_path.as_ref();
    let identity_path = identity_path.as_ref();
    validate_path_len(server_path)?;
    validate_path_len(identity_path)?;
    remove_stale_socket(identity_path)?;

    let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if raw < 0 {
        return Err(TransportError::Connect {
            path: server_path.to_path_buf(),
            source: std::io::Error::last_os_error(),
        });
    }
    // OwnedFd closes the descriptor on any early return below.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let (addr, addr_len) = sockaddr_un_of(identity_path)?;
    // SAFETY: `addr` is a fully initialized sockaddr_un and `addr_len`
    // covers the family plus the path bytes actually written.
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            (&addr as *const libc::sockaddr_un).cast::<libc::sockaddr>(),
            addr_len,
        )
    };
    if rc < 0 {
        return Err(TransportError::Bind {
            path: identity_path.to_path_buf(),
            source: std::io::Error::last_os_error(),
        });
    }

    // Owner-only bits are what the server's trust gate demands.
    std::fs::set_permissions(identity_path, std::fs::Permissions::from_mode(0o700)).map_err(
        |e| TransportError::Bind {
            path: identity_path.to_path_buf(),
            source: e,
        },
    )?;

    let (addr, addr_len) = sockaddr_un_of(server_path)?;
    // SAFETY: same layout argument as for bind above.
    let rc = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            (&addr as *const libc::sockaddr_un).cast::<libc::sockaddr>(),
            addr_len,
        )
    };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        let _ = std::fs::remove_file(identity_path);
        return Err(TransportError::Connect {
            path: server_path.to_path_buf(),
            source: err,
        });
    }

    debug!(?server_path, ?identity_path, "connected with identity");
    Ok(UnixStream::from(fd))
}

fn validate_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= UnixDomainSocket::MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: UnixDomainSocket::MAX_PATH_LEN,
        });
    }
    Ok(())
}

/// Remove an existing socket file at `path`; refuse to touch anything else.
fn remove_stale_socket(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_socket() => {
            debug!(?path, "removing stale socket");
            std::fs::remove_file(path).map_err(|e| TransportError::Bind {
                path: path.to_path_buf(),
                source: e,
            })
        }
        Ok(_) => Err(TransportError::Bind {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "existing path is not a unix socket",
            ),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TransportError::Bind {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn sockaddr_un_of(path: &Path) -> Result<(libc::sockaddr_un, libc::socklen_t)> {
    // SAFETY: sockaddr_un is a plain-old-data struct; zeroed is a valid
    // initial state.
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let bytes = path.as_os_str().as_bytes();
    if bytes.len() >= addr.sun_path.len() {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len: bytes.len(),
            max: addr.sun_path.len(),
        });
    }
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes.iter()) {
        *dst = *src as libc::c_char;
    }

    let len = std::mem::offset_of!(libc::sockaddr_un, sun_path) + bytes.len() + 1;
    Ok((addr, len as libc::socklen_t))
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn make_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sandpatch-uds-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    #[test]
    fn bind_accept_connect_with_identity() {
        let dir = make_dir("basic");
        let sock_path = dir.join("server.sock");
        let identity = dir.join("client.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        let (sp, ip) = (sock_path.clone(), identity.clone());
        let handle = std::thread::spawn(move || {
            let mut client = connect_with_identity(&sp, &ip).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let (mut stream, addr) = listener.accept().unwrap();
        assert_eq!(addr.as_pathname(), Some(identity.as_path()));
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        handle.join().unwrap();

        drop(listener);
        assert!(!sock_path.exists(), "socket file cleaned up on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn identity_path_carries_owner_only_mode() {
        let dir = make_dir("mode");
        let sock_path = dir.join("server.sock");
        let identity = dir.join("client.sock");
        let listener = UnixDomainSocket::bind(&sock_path).unwrap();

        let (sp, ip) = (sock_path.clone(), identity.clone());
        let handle = std::thread::spawn(move || connect_with_identity(&sp, &ip).unwrap());
        let (_stream, _addr) = listener.accept().unwrap();
        let _client = handle.join().unwrap();

        let mode = std::fs::metadata(&identity).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn path_too_long_rejected() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        assert!(matches!(
            UnixDomainSocket::bind(&long_path),
            Err(TransportError::PathTooLong { .. })
        ));
    }

    #[test]
    fn bind_default_permissions_hardened() {
        let dir = make_dir("perm");
        let sock_path = dir.join("perm.sock");
        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bind_rejects_existing_non_socket_file() {
        let dir = make_dir("file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();
        assert!(matches!(
            UnixDomainSocket::bind(&sock_path),
            Err(TransportError::Bind { .. })
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rebind_removes_stale_socket() {
        let dir = make_dir("stale");
        let sock_path = dir.join("server.sock");
        {
            let listener = UnixDomainSocket::bind(&sock_path).unwrap();
            // Simulate a crash: forget the listener so Drop never unlinks.
            std::mem::forget(listener);
        }
        assert!(sock_path.exists());
        let relisten = UnixDomainSocket::bind(&sock_path).unwrap();
        drop(relisten);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn drop_does_not_remove_replaced_path() {
        let dir = make_dir("race");
        let sock_path = dir.join("drop.sock");
        let listener = UnixDomainSocket::bind(&sock_path).unwrap();

        std::fs::remove_file(&sock_path).unwrap();
        std::fs::write(&sock_path, b"replacement-file").unwrap();

        drop(listener);
        assert!(
            sock_path.exists(),
            "drop must not remove path if inode identity changed"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }
}
