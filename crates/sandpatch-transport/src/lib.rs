//! Unix domain socket transport for the sandpatch protocol.
//!
//! Two concerns live here, both Unix-only by design:
//! - [`UnixDomainSocket`] — bind/accept/connect over filesystem-path UDS,
//!   with stale-socket cleanup and hardened permissions.
//! - [`trust`] — the filesystem-stat peer trust gate: the client binds its
//!   own end of the connection to a named, owner-only socket path, and the
//!   server derives the peer's identity from that path instead of relying
//!   on kernel credential passing.

pub mod error;
pub mod trust;
pub mod uds;

pub use error::{Result, TransportError};
pub use trust::{authenticate, TrustError, TrustedPeer, FRESHNESS_WINDOW};
pub use uds::{connect_with_identity, UnixDomainSocket};
