//! srcbridge — links a local editor with the source.chromium.org web viewer.
//!
//! Outbound: `srcbridge open` turns the file under the cursor into a viewer
//! URL and opens it in the browser. Inbound: `srcbridge serve` runs a
//! loopback HTTP listener the viewer links back to, which shells out to the
//! editor CLI to focus the requested file/line.

pub mod config;
pub mod editor;
pub mod server;
pub mod weblink;
pub mod workspace;

use std::sync::Arc;

use config::BridgeConfig;
use editor::{EditorBridge, EditorCli};
use server::rate_limit::RequestLimiter;
use server::ServerHandle;

/// Shared state passed to every route handler.
pub struct BridgeContext {
    pub config: Arc<BridgeConfig>,
    /// Editor seam — the CLI bridge in production, a recording fake in tests.
    pub editor: Arc<dyn EditorBridge>,
    /// Per-client sliding-window request limiter.
    pub limiter: RequestLimiter,
    /// Lifecycle handle for the inbound listener.
    pub server: Arc<ServerHandle>,
    pub started_at: std::time::Instant,
}

impl BridgeContext {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let editor = Arc::new(EditorCli::new(config.editor_cmd.clone()));
        Self::with_editor(config, editor)
    }

    /// Build a context around a custom [`EditorBridge`] implementation.
    pub fn with_editor(config: BridgeConfig, editor: Arc<dyn EditorBridge>) -> Arc<Self> {
        Arc::new(Self {
            limiter: RequestLimiter::new(
                config.rate_limit.window_secs,
                config.rate_limit.max_requests,
            ),
            server: Arc::new(ServerHandle::new()),
            editor,
            started_at: std::time::Instant::now(),
            config: Arc::new(config),
        })
    }
}
