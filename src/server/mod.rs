//! Inbound listener — the HTTP server the web viewer calls back into.
//!
//! `GET /file?f=<relative>&l=<line>` focuses the local editor on a file in
//! the checkout. The server refuses to start outside a Chromium workspace,
//! starts at most once, and can be stopped again through [`ServerHandle`].

pub mod rate_limit;
pub mod routes;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::workspace::Workspace;
use crate::BridgeContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
}

/// Lifecycle handle for the listener.
///
/// Replaces a write-once "am I listening" flag with an explicit state
/// machine and a stop operation.
pub struct ServerHandle {
    state: Mutex<ServerState>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    /// Bumped on every bind. A serve task may only write `Stopped` back while
    /// its own generation is still the current one, so a task from before a
    /// restart cannot clobber the new listener's state.
    generation: AtomicU64,
}

impl ServerHandle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerState::Stopped),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
            local_addr: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> ServerState {
        *self.state.lock().await
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Bind and start serving. Idempotent: a second call while the server is
    /// up warns and returns the already-bound address without binding again.
    ///
    /// Refuses to start when the workspace does not validate.
    pub async fn start(self: Arc<Self>, ctx: Arc<BridgeContext>) -> Result<SocketAddr> {
        {
            let mut state = self.state.lock().await;
            match *state {
                ServerState::Listening | ServerState::Starting => {
                    warn!("server already started");
                    match *self.local_addr.lock().await {
                        Some(addr) => return Ok(addr),
                        None => bail!("server is still starting"),
                    }
                }
                ServerState::Stopped => *state = ServerState::Starting,
            }
        }

        match Self::bind_and_serve(Arc::clone(&self), ctx).await {
            Ok(addr) => Ok(addr),
            Err(e) => {
                *self.state.lock().await = ServerState::Stopped;
                Err(e)
            }
        }
    }

    async fn bind_and_serve(this: Arc<Self>, ctx: Arc<BridgeContext>) -> Result<SocketAddr> {
        // Only listen inside a Chromium checkout.
        if let Err(e) = Workspace::current(&ctx.config.workspace_root) {
            error!(err = %e, "http server cannot be started");
            warn!(
                root = %ctx.config.workspace_root.display(),
                "point --workspace at a Chromium src checkout"
            );
            return Err(e.into());
        }

        let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
        let addr: SocketAddr = bind
            .parse()
            .with_context(|| format!("invalid bind address '{bind}'"))?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("could not bind {addr}"))?;
        let local = listener.local_addr()?;

        let router = routes::build_router(ctx.clone());
        let (tx, rx) = oneshot::channel::<()>();
        let generation = this.generation.fetch_add(1, Ordering::SeqCst) + 1;

        *this.shutdown.lock().await = Some(tx);
        *this.local_addr.lock().await = Some(local);
        *this.state.lock().await = ServerState::Listening;

        let handle = Arc::clone(&this);
        let task = tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            });
            if let Err(e) = serve.await {
                error!(err = %e, "http server terminated");
            }
            // A stale task from before a restart must leave the newer
            // listener's state alone.
            if handle.generation.load(Ordering::SeqCst) == generation {
                *handle.local_addr.lock().await = None;
                *handle.state.lock().await = ServerState::Stopped;
            }
        });
        *this.task.lock().await = Some(task);

        info!(addr = %local, "listening for web viewer requests");
        Ok(local)
    }

    /// Gracefully shut the listener down. No-op when the server is not
    /// running. Waits for the accept loop to finish, so the port is free and
    /// the state is `Stopped` by the time this returns.
    pub async fn stop(&self) {
        let Some(tx) = self.shutdown.lock().await.take() else {
            return;
        };
        let _ = tx.send(());
        info!("listener shutdown requested");

        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                error!(err = %e, "serve task did not exit cleanly");
            }
        }
        *self.local_addr.lock().await = None;
        *self.state.lock().await = ServerState::Stopped;
    }
}

impl Default for ServerHandle {
    fn default() -> Self {
        Self::new()
    }
}
