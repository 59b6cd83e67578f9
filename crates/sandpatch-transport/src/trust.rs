//! Filesystem-stat peer trust gate.
//!
//! The transport carries no verified peer identity of its own, and kernel
//! credential passing is deliberately not relied on. Instead the client
//! binds its end of the connection to a named socket path with owner-only
//! permission bits; the server stats that path after accept and takes the
//! path's owner as the peer's identity, provided the path is a socket, its
//! mode is exactly owner-rwx, and all three timestamps are fresh. The path
//! is unlinked on success, making it a single-use credential.
//!
//! There is a narrow race window between accept and stat; that is an
//! accepted residual risk of the scheme, not something this module hides.

use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::os::unix::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

/// How recently the identity socket must have been touched.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(30);

/// Identity of an authenticated peer, scoped to one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedPeer {
    /// Owning uid of the identity socket path.
    pub uid: u32,
}

/// Reasons a peer fails the trust gate. All are fatal to the connection;
/// no response frame is sent for any of them.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// The peer did not bind its end to a named path.
    #[error("peer socket is unnamed; no identity path to check")]
    Unnamed,

    /// The identity path exists but is not a socket special file.
    #[error("identity path {0} is not a socket")]
    NotASocket(PathBuf),

    /// The identity path's mode is anything other than owner-rwx.
    #[error("identity path {path} mode {mode:o} is too permissive")]
    PermissionTooOpen { path: PathBuf, mode: u32 },

    /// One of the identity path's timestamps is outside the freshness
    /// window — a stale or reused credential.
    #[error("identity path {0} is stale")]
    Stale(PathBuf),

    /// The identity path could not be examined or retired.
    #[error("identity path check failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Authenticate the peer of an accepted connection from its bound address.
pub fn authenticate(peer_addr: &SocketAddr) -> Result<TrustedPeer, TrustError> {
    let path = peer_addr.as_pathname().ok_or(TrustError::Unnamed)?;
    authenticate_path(path)
}

/// Authenticate a peer from its identity socket path.
///
/// On success the path is unlinked; a credential that cannot be retired
/// is not accepted.
pub fn authenticate_path(path: &Path) -> Result<TrustedPeer, TrustError> {
    let metadata = std::fs::symlink_metadata(path)?;

    if !metadata.file_type().is_socket() {
        return Err(TrustError::NotASocket(path.to_path_buf()));
    }

    let mode = metadata.mode() & 0o777;
    if mode & 0o077 != 0 || mode & 0o700 != 0o700 {
        return Err(TrustError::PermissionTooOpen {
            path: path.to_path_buf(),
            mode,
        });
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| TrustError::Stale(path.to_path_buf()))?
        .as_secs() as i64;
    let stale_floor = now - FRESHNESS_WINDOW.as_secs() as i64;
    if metadata.atime() < stale_floor
        || metadata.ctime() < stale_floor
        || metadata.mtime() < stale_floor
    {
        warn!(?path, "identity socket timestamps outside freshness window");
        return Err(TrustError::Stale(path.to_path_buf()));
    }

    let uid = metadata.uid();
    std::fs::remove_file(path)?;
    debug!(?path, uid, "peer authenticated; identity path retired");

    Ok(TrustedPeer { uid })
}

#[cfg(test)]
mod tests {
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::net::UnixListener;

    use super::*;

    fn make_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sandpatch-trust-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn bound_socket(dir: &Path, mode: u32) -> (UnixListener, PathBuf) {
        let path = dir.join("identity.sock");
        let listener = UnixListener::bind(&path).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        (listener, path)
    }

    fn age_timestamps(path: &Path, seconds_ago: i64) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as libc::time_t;
        let then = now - seconds_ago as libc::time_t;
        let times = [
            libc::timeval {
                tv_sec: then,
                tv_usec: 0,
            },
            libc::timeval {
                tv_sec: then,
                tv_usec: 0,
            },
        ];
        let cpath = std::ffi::CString::new(path.as_os_str().as_bytes()).unwrap();
        // SAFETY: cpath is a valid NUL-terminated path and times points at
        // two initialized timevals.
        let rc = unsafe { libc::utimes(cpath.as_ptr(), times.as_ptr()) };
        assert_eq!(rc, 0, "utimes failed");
    }

    #[test]
    fn owner_only_fresh_socket_is_trusted_and_retired() {
        let dir = make_dir("ok");
        let (_listener, path) = bound_socket(&dir, 0o700);

        let peer = authenticate_path(&path).unwrap();
        let my_uid = unsafe { libc::getuid() };
        assert_eq!(peer.uid, my_uid);
        assert!(!path.exists(), "identity path must be single-use");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn group_readable_socket_rejected_even_for_right_owner() {
        let dir = make_dir("group");
        let (_listener, path) = bound_socket(&dir, 0o740);

        let err = authenticate_path(&path).unwrap_err();
        assert!(matches!(
            err,
            TrustError::PermissionTooOpen { mode: 0o740, .. }
        ));
        assert!(path.exists(), "rejected credential is not retired");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_owner_bits_rejected() {
        let dir = make_dir("owner");
        let (_listener, path) = bound_socket(&dir, 0o600);
        assert!(matches!(
            authenticate_path(&path).unwrap_err(),
            TrustError::PermissionTooOpen { mode: 0o600, .. }
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn regular_file_rejected() {
        let dir = make_dir("file");
        let path = dir.join("identity.sock");
        std::fs::write(&path, b"not a socket").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700)).unwrap();

        assert!(matches!(
            authenticate_path(&path).unwrap_err(),
            TrustError::NotASocket(_)
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn aged_socket_rejected_as_stale() {
        let dir = make_dir("stale");
        let (_listener, path) = bound_socket(&dir, 0o700);
        age_timestamps(&path, FRESHNESS_WINDOW.as_secs() as i64 + 1);

        assert!(matches!(
            authenticate_path(&path).unwrap_err(),
            TrustError::Stale(_)
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn just_inside_window_accepted() {
        let dir = make_dir("fresh");
        let (_listener, path) = bound_socket(&dir, 0o700);
        age_timestamps(&path, 5);

        assert!(authenticate_path(&path).is_ok());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unnamed_peer_rejected() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let addr = left.peer_addr().unwrap();
        assert!(matches!(
            authenticate(&addr).unwrap_err(),
            TrustError::Unnamed
        ));
    }

    #[test]
    fn missing_path_is_io_error() {
        let dir = make_dir("missing");
        let path = dir.join("never-bound.sock");
        assert!(matches!(
            authenticate_path(&path).unwrap_err(),
            TrustError::Io(_)
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
