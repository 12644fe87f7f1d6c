//! Route handlers for the inbound listener.

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

use crate::editor::EditorBridge;
use crate::server::rate_limit;
use crate::workspace::{ResolveError, Workspace};
use crate::BridgeContext;

/// The original extension answered 404 for every failure cause; callers tell
/// them apart by body text alone. Kept as-is so existing viewer-side
/// integrations keep working.
pub const ERROR_STATUS: StatusCode = StatusCode::NOT_FOUND;

pub const MSG_IDE_NOT_READY: &str =
    "Please make sure the IDE workspace is a Chromium src checkout.";
pub const MSG_PATH_MISSING: &str = "File path is not found in your request URL.";
pub const MSG_BAD_QUERY: &str = "The query string in your request URL could not be parsed.";
pub const MSG_BAD_LINE: &str = "Line number in your request URL is not a number.";
pub const MSG_FILE_NOT_FOUND: &str =
    "The requested file does not exist in the local Chromium src checkout.";
pub const MSG_OUTSIDE_TREE: &str =
    "The requested path leaves the local Chromium src checkout.";
pub const MSG_EDITOR_PREFIX: &str = "This error appears in the local IDE: ";

pub fn build_router(ctx: Arc<BridgeContext>) -> Router {
    // Single-origin assumption made explicit: only GETs from the configured
    // viewer origin are allowed cross-origin.
    let cors = match ctx.config.viewer_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_methods([Method::GET])
            .allow_origin(origin),
        Err(e) => {
            warn!(origin = %ctx.config.viewer_origin, err = %e,
                "viewer_origin is not a valid header value — cross-origin requests disabled");
            CorsLayer::new().allow_methods([Method::GET])
        }
    };

    Router::new()
        .route("/file", get(open_file))
        .route("/healthz", get(healthz))
        // Limiter runs after logging, before any handler.
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            rate_limit::limit_requests,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(ctx)
}

#[derive(Deserialize)]
pub struct OpenFileParams {
    /// Checkout-relative file path.
    f: Option<String>,
    /// 1-based line number. Parsed by hand so a malformed value follows the
    /// common 404 convention instead of axum's 400 rejection.
    l: Option<String>,
}

/// `GET /file?f=<relative>&l=<line>` — focus the local editor on a file.
///
/// The query extractor is fallible so that an unparseable query string (bad
/// percent-encoding and the like) stays inside the common 404 convention
/// instead of axum's default 400 rejection.
pub async fn open_file(
    State(ctx): State<Arc<BridgeContext>>,
    params: Result<Query<OpenFileParams>, QueryRejection>,
) -> (StatusCode, String) {
    // The workspace may have changed since the server started; re-validate
    // on every request before touching the filesystem.
    let workspace = match Workspace::current(&ctx.config.workspace_root) {
        Ok(ws) => ws,
        Err(e) => {
            warn!(err = %e, "rejecting request — workspace is not a Chromium src checkout");
            return (ERROR_STATUS, MSG_IDE_NOT_READY.to_string());
        }
    };

    let Query(params) = match params {
        Ok(params) => params,
        Err(e) => {
            warn!(err = %e, "rejecting request — unparseable query string");
            return (ERROR_STATUS, MSG_BAD_QUERY.to_string());
        }
    };

    let relative = match params.f.as_deref().filter(|f| !f.is_empty()) {
        Some(f) => f,
        None => {
            refocus_editor(ctx.editor.as_ref(), MSG_PATH_MISSING).await;
            return (ERROR_STATUS, MSG_PATH_MISSING.to_string());
        }
    };

    let line = match params.l.as_deref() {
        None => 1,
        Some(raw) => match raw.parse::<u32>() {
            Ok(n) if n >= 1 => n,
            _ => {
                warn!(l = raw, "rejecting request — malformed line number");
                return (ERROR_STATUS, MSG_BAD_LINE.to_string());
            }
        },
    };

    let path = match workspace.resolve_request_path(relative) {
        Ok(p) => p,
        Err(ResolveError::OutsideTree(p)) => {
            warn!(path = %p.display(), "rejecting request — path escapes the checkout");
            return (ERROR_STATUS, MSG_OUTSIDE_TREE.to_string());
        }
        Err(ResolveError::NotFound(_)) => {
            refocus_editor(ctx.editor.as_ref(), MSG_FILE_NOT_FOUND).await;
            return (ERROR_STATUS, MSG_FILE_NOT_FOUND.to_string());
        }
    };

    match ctx.editor.open_at(&path, line).await {
        Ok(()) => {
            info!(path = %path.display(), line, "opened from web viewer");
            (StatusCode::OK, "OK".to_string())
        }
        Err(e) => (ERROR_STATUS, format!("{MSG_EDITOR_PREFIX}{e}")),
    }
}

/// `GET /healthz` — liveness + workspace summary for `srcbridge status`.
pub async fn healthz(State(ctx): State<Arc<BridgeContext>>) -> Json<Value> {
    let workspace_ok = Workspace::current(&ctx.config.workspace_root).is_ok();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "workspace_root": ctx.config.workspace_root.display().to_string(),
        "workspace_ok": workspace_ok,
        "uptime_secs": ctx.started_at.elapsed().as_secs(),
    }))
}

/// Bring the editor back to the foreground so the user sees why nothing
/// opened. Best-effort: a refocus failure is only logged.
async fn refocus_editor(editor: &dyn EditorBridge, reason: &str) {
    warn!(%reason, "rejecting request — refocusing editor");
    if let Err(e) = editor.focus().await {
        warn!(err = %e, "editor refocus failed");
    }
}
