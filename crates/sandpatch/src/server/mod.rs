//! The daemon side: socket lifecycle and the per-connection serve loop.

pub mod dispatch;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use sandpatch_engine::{CodeMemory, PatchEngine};
use sandpatch_transport::{TransportError, UnixDomainSocket};
use sandpatch_wire::FieldConfig;

/// Everything the dispatcher shares between connections: the engine
/// behind one mutex, plus the immutable build-info block.
pub struct ServerState<M> {
    engine: Mutex<PatchEngine<M>>,
    build_info: String,
}

impl<M: CodeMemory> ServerState<M> {
    pub fn new(engine: PatchEngine<M>, build_info: String) -> Self {
        Self {
            engine: Mutex::new(engine),
            build_info,
        }
    }

    /// Lock the engine. A poisoned lock is taken anyway: the engine
    /// never leaves partial state behind on panic-free error paths, and
    /// refusing all further requests would turn one bad connection into
    /// a dead daemon.
    pub fn lock_engine(&self) -> MutexGuard<'_, PatchEngine<M>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn build_info(&self) -> &str {
        &self.build_info
    }
}

/// Bound daemon socket plus the stream deadlines applied per connection.
pub struct PatchListener {
    socket: UnixDomainSocket,
    config: FieldConfig,
}

impl PatchListener {
    pub fn bind(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        Self::bind_with_config(path, FieldConfig::default())
    }

    pub fn bind_with_config(
        path: impl AsRef<Path>,
        config: FieldConfig,
    ) -> Result<Self, TransportError> {
        let socket = UnixDomainSocket::bind(path)?;
        info!(path = %socket.path().display(), "listening for patch requests");
        Ok(Self { socket, config })
    }

    pub fn path(&self) -> &Path {
        self.socket.path()
    }

    /// Accept and fully serve one connection.
    pub fn serve_once<M: CodeMemory>(
        &self,
        state: &ServerState<M>,
    ) -> Result<(), TransportError> {
        let (stream, addr) = self.socket.accept()?;
        dispatch::handle_connection(stream, &addr, state, &self.config);
        Ok(())
    }

    /// Serve connections until `running` clears.
    ///
    /// Connections are handled one at a time to completion; the engine
    /// mutex makes a second listener safe but the daemon runs one loop.
    pub fn serve<M: CodeMemory>(
        &self,
        state: &ServerState<M>,
        running: &AtomicBool,
    ) -> Result<(), TransportError> {
        while running.load(Ordering::SeqCst) {
            let (stream, addr) = match self.socket.accept() {
                Ok(conn) => conn,
                // Signal delivery (ctrl-c) interrupts accept; re-check
                // the flag instead of dying.
                Err(TransportError::Accept(err))
                    if err.kind() == std::io::ErrorKind::Interrupted =>
                {
                    continue;
                }
                Err(err) => return Err(err),
            };
            debug!("accepted connection");
            dispatch::handle_connection(stream, &addr, state, &self.config);
        }
        info!("shutdown requested, leaving serve loop");
        Ok(())
    }
}
