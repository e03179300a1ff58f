//! Server bring-up: state thread, TCP accept loop, connection cap, shutdown.

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::Sender;
use thiserror::Error;

use crate::config::{Config, Limits};
use crate::transport::{ServerConnection, TcpConnection};

use super::broadcast::EventBroadcaster;
use super::serializer::{Serializer, StateRequest, run_state_loop};
use super::session::{SessionContext, run_session};
use super::SessionId;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared handles for attaching sessions to one running serializer.
///
/// Cheap to clone; the state thread itself is owned by the caller of
/// `start_core` (or by `ServerHandle` when serving TCP).
#[derive(Clone)]
pub struct ServerCore {
    req_tx: Sender<StateRequest>,
    broadcaster: EventBroadcaster,
    limits: Limits,
    shutdown: Arc<AtomicBool>,
    next_session_id: Arc<AtomicU64>,
}

impl ServerCore {
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn next_session_id(&self) -> SessionId {
        SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed))
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            id: self.next_session_id(),
            req_tx: self.req_tx.clone(),
            broadcaster: self.broadcaster.clone(),
            limits: self.limits.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Spawns a session thread for an accepted connection.
    pub fn attach<C>(&self, conn: C) -> JoinHandle<()>
    where
        C: ServerConnection + Send + 'static,
    {
        let ctx = self.session_context();
        thread::spawn(move || {
            let session = ctx.id;
            if let Err(err) = run_session(conn, ctx) {
                tracing::warn!(session = session.get(), "session error: {err}");
            }
        })
    }
}

/// Starts the serializer state thread and returns the core plus the thread
/// handle to join on shutdown.
pub fn start_core(limits: Limits) -> (ServerCore, JoinHandle<()>) {
    let broadcaster =
        EventBroadcaster::new(limits.max_connections, limits.max_subscriber_queue_events);
    let (req_tx, req_rx) = crossbeam::channel::unbounded();
    let shutdown = Arc::new(AtomicBool::new(false));

    let state_handle = {
        let broadcaster = broadcaster.clone();
        let shutdown = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("tandem-state".to_string())
            .spawn(move || run_state_loop(Serializer::new(), req_rx, broadcaster, shutdown))
            .expect("spawn state thread")
    };

    (
        ServerCore {
            req_tx,
            broadcaster,
            limits,
            shutdown,
            next_session_id: Arc::new(AtomicU64::new(1)),
        },
        state_handle,
    )
}

pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_handle: JoinHandle<()>,
    state_handle: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Stops accepting, stops the state thread, and joins both. Live session
    /// threads notice the flag on their next tick.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.accept_handle.join();
        let _ = self.state_handle.join();
    }
}

/// Binds `addr` and serves until shutdown. Port 0 binds an ephemeral port;
/// the bound address is logged and available on the handle.
pub fn serve(addr: &str, config: &Config) -> Result<ServerHandle, ServerError> {
    let listener = TcpListener::bind(addr)?;
    let local_addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let (core, state_handle) = start_core(config.limits.clone());
    let shutdown = core.shutdown_flag();

    tracing::info!(%local_addr, "serving");
    let accept_handle = thread::Builder::new()
        .name("tandem-accept".to_string())
        .spawn(move || run_accept_loop(listener, core))
        .expect("spawn accept thread");

    Ok(ServerHandle {
        local_addr,
        shutdown,
        accept_handle,
        state_handle,
    })
}

fn run_accept_loop(listener: TcpListener, core: ServerCore) {
    let active = Arc::new(AtomicUsize::new(0));
    let max_connections = core.limits().max_connections;
    let max_frame_bytes = core.limits().max_frame_bytes;
    let shutdown = core.shutdown_flag();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match listener.accept() {
            Ok((stream, addr)) => {
                let Some(guard) = ConnectionGuard::try_acquire(&active, max_connections) else {
                    tracing::warn!(%addr, "connection limit reached; refusing");
                    drop(stream);
                    continue;
                };
                let conn = TcpConnection::new(stream, max_frame_bytes);
                let ctx = core.session_context();
                thread::spawn(move || {
                    let _guard = guard;
                    let session = ctx.id;
                    if let Err(err) = run_session(conn, ctx) {
                        tracing::warn!(session = session.get(), "session error: {err}");
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(25));
            }
            Err(err) => {
                tracing::warn!("accept error: {err}");
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
    tracing::debug!("accept loop stopped");
}

/// Holds one slot of the connection cap; released on drop.
struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn try_acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        let prev = active.fetch_add(1, Ordering::AcqRel);
        if prev >= max {
            active.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(Self {
            active: Arc::clone(active),
        })
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let prev = self.active.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "active connection counter underflow");
    }
}
