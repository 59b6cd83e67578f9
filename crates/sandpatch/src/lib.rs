//! Live-patch intake over Unix domain sockets.
//!
//! sandpatch receives signed-by-content patch payloads from trusted local
//! peers and lands them in an executable sandbox region with a trampoline
//! at the old entry point.
//!
//! # Crate Structure
//!
//! - [`wire`] — message header and length-prefixed field codec
//! - [`transport`] — Unix socket transport and the stat-based peer trust gate
//! - [`format`] — patch descriptors, `.raxlpxs` containers, request marshalling
//! - [`engine`] — sandbox region, canary checks, trampoline installation
//! - [`server`] / [`client`] — the daemon loop and its protocol client

/// Re-export wire types.
pub mod wire {
    pub use sandpatch_wire::*;
}

/// Re-export transport types.
pub mod transport {
    pub use sandpatch_transport::*;
}

/// Re-export format types.
pub mod format {
    pub use sandpatch_format::*;
}

/// Re-export engine types.
pub mod engine {
    pub use sandpatch_engine::*;
}

pub mod build_info;
pub mod client;
pub mod server;
