//! Integration tests for the inbound listener.
//!
//! Spins up the real server on a random loopback port and speaks raw HTTP
//! over a `TcpStream`. The editor seam is a recording fake so no subprocess
//! is ever spawned.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use srcbridge::config::{BridgeConfig, RateLimitConfig};
use srcbridge::editor::{EditorBridge, EditorError};
use srcbridge::server::{routes, ServerState};
use srcbridge::weblink::{DEFAULT_VIEWER_BASE_URL, DEFAULT_VIEWER_ORIGIN};
use srcbridge::BridgeContext;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

#[derive(Default)]
struct FakeEditor {
    jumps: Mutex<Vec<(PathBuf, u32)>>,
    focuses: Mutex<usize>,
    fail_jumps: bool,
}

#[async_trait]
impl EditorBridge for FakeEditor {
    async fn focus(&self) -> Result<(), EditorError> {
        *self.focuses.lock().await += 1;
        Ok(())
    }

    async fn open_at(&self, path: &Path, line: u32) -> Result<(), EditorError> {
        if self.fail_jumps {
            return Err(EditorError::Spawn {
                command: format!("code -g {}:{line}", path.display()),
                source: std::io::Error::other("editor exploded"),
            });
        }
        self.jumps.lock().await.push((path.to_path_buf(), line));
        Ok(())
    }
}

/// Create `{tmp}/chromium/src/chrome/browser/foo.cc` and return the src root.
fn checkout(dir: &TempDir) -> PathBuf {
    let root = dir.path().join("chromium").join("src");
    std::fs::create_dir_all(root.join("chrome/browser")).unwrap();
    std::fs::write(root.join("chrome/browser/foo.cc"), "// foo").unwrap();
    root
}

fn test_config(dir: &TempDir, workspace_root: &Path) -> BridgeConfig {
    BridgeConfig {
        port: 0,
        bind_address: "127.0.0.1".to_string(),
        data_dir: dir.path().join("data"),
        workspace_root: workspace_root.to_path_buf(),
        editor_cmd: "code".to_string(),
        viewer_base_url: DEFAULT_VIEWER_BASE_URL.to_string(),
        viewer_origin: DEFAULT_VIEWER_ORIGIN.to_string(),
        log: "error".to_string(),
        log_format: "pretty".to_string(),
        rate_limit: RateLimitConfig {
            window_secs: 60,
            max_requests: 100,
        },
    }
}

async fn start_bridge(dir: &TempDir, root: &Path, editor: Arc<FakeEditor>) -> (Arc<BridgeContext>, SocketAddr) {
    let ctx = BridgeContext::with_editor(test_config(dir, root), editor);
    let addr = ctx.server.clone().start(ctx.clone()).await.unwrap();
    (ctx, addr)
}

/// Minimal HTTP/1.1 GET; returns (status code, body).
async fn http_get(addr: SocketAddr, target: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8_lossy(&raw).to_string();

    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    (status, body)
}

// ── /file ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_path_param_is_rejected_without_a_filesystem_check() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    let editor = Arc::new(FakeEditor::default());
    let (_ctx, addr) = start_bridge(&dir, &root, editor.clone()).await;

    let (status, body) = http_get(addr, "/file").await;
    assert_eq!(status, 404);
    assert_eq!(body, routes::MSG_PATH_MISSING);

    // No jump happened; the editor was only refocused.
    assert!(editor.jumps.lock().await.is_empty());
    assert_eq!(*editor.focuses.lock().await, 1);
}

#[tokio::test]
async fn existing_file_opens_in_the_editor() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    let editor = Arc::new(FakeEditor::default());
    let (_ctx, addr) = start_bridge(&dir, &root, editor.clone()).await;

    let (status, body) = http_get(addr, "/file?f=chrome/browser/foo.cc&l=10").await;
    assert_eq!(status, 200);
    assert_eq!(body, "OK");

    let jumps = editor.jumps.lock().await;
    assert_eq!(jumps.len(), 1);
    assert!(jumps[0].0.ends_with("chrome/browser/foo.cc"));
    assert_eq!(jumps[0].1, 10);
}

#[tokio::test]
async fn line_defaults_to_one_when_absent() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    let editor = Arc::new(FakeEditor::default());
    let (_ctx, addr) = start_bridge(&dir, &root, editor.clone()).await;

    let (status, _) = http_get(addr, "/file?f=chrome/browser/foo.cc").await;
    assert_eq!(status, 200);
    assert_eq!(editor.jumps.lock().await[0].1, 1);
}

#[tokio::test]
async fn malformed_line_number_is_rejected() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    let editor = Arc::new(FakeEditor::default());
    let (_ctx, addr) = start_bridge(&dir, &root, editor.clone()).await;

    let (status, body) = http_get(addr, "/file?f=chrome/browser/foo.cc&l=abc").await;
    assert_eq!(status, 404);
    assert_eq!(body, routes::MSG_BAD_LINE);
    assert!(editor.jumps.lock().await.is_empty());
}

#[tokio::test]
async fn unparseable_query_string_is_rejected_with_the_common_status() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    let editor = Arc::new(FakeEditor::default());
    let (_ctx, addr) = start_bridge(&dir, &root, editor.clone()).await;

    // A duplicate `f` key makes deserialization fail ("duplicate field"),
    // which the query extractor refuses.
    let (status, body) = http_get(addr, "/file?f=a&f=b&l=1").await;
    assert_eq!(status, 404);
    assert_eq!(body, routes::MSG_BAD_QUERY);
    assert!(editor.jumps.lock().await.is_empty());
}

#[tokio::test]
async fn missing_file_is_reported_not_found() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    let editor = Arc::new(FakeEditor::default());
    let (_ctx, addr) = start_bridge(&dir, &root, editor.clone()).await;

    let (status, body) = http_get(addr, "/file?f=does/not/exist&l=1").await;
    assert_eq!(status, 404);
    assert_eq!(body, routes::MSG_FILE_NOT_FOUND);
    assert!(editor.jumps.lock().await.is_empty());
}

#[tokio::test]
async fn traversal_out_of_the_checkout_is_rejected() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    // Exists, but lives above src/.
    std::fs::write(dir.path().join("chromium").join("secrets.txt"), "x").unwrap();
    let editor = Arc::new(FakeEditor::default());
    let (_ctx, addr) = start_bridge(&dir, &root, editor.clone()).await;

    let (status, body) = http_get(addr, "/file?f=../secrets.txt&l=1").await;
    assert_eq!(status, 404);
    assert_eq!(body, routes::MSG_OUTSIDE_TREE);
    assert!(editor.jumps.lock().await.is_empty());
}

#[tokio::test]
async fn editor_failure_is_embedded_in_the_response() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    let editor = Arc::new(FakeEditor {
        fail_jumps: true,
        ..Default::default()
    });
    let (_ctx, addr) = start_bridge(&dir, &root, editor).await;

    let (status, body) = http_get(addr, "/file?f=chrome/browser/foo.cc&l=3").await;
    assert_eq!(status, 404);
    assert!(body.starts_with(routes::MSG_EDITOR_PREFIX));
    assert!(body.contains("editor exploded"));
}

#[tokio::test]
async fn workspace_disappearing_after_start_turns_requests_away() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    let editor = Arc::new(FakeEditor::default());
    let (_ctx, addr) = start_bridge(&dir, &root, editor.clone()).await;

    // The checkout goes away between server start and the request.
    std::fs::remove_dir_all(&root).unwrap();

    let (status, body) = http_get(addr, "/file?f=chrome/browser/foo.cc&l=1").await;
    assert_eq!(status, 404);
    assert_eq!(body, routes::MSG_IDE_NOT_READY);
    assert!(editor.jumps.lock().await.is_empty());
}

// ── rate limiting ────────────────────────────────────────────────────────────

#[tokio::test]
async fn sixth_request_in_a_window_is_rejected_before_the_handler() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    let editor = Arc::new(FakeEditor::default());
    let mut config = test_config(&dir, &root);
    config.rate_limit = RateLimitConfig {
        window_secs: 60,
        max_requests: 5,
    };
    let ctx = BridgeContext::with_editor(config, editor.clone());
    let addr = ctx.server.clone().start(ctx.clone()).await.unwrap();

    for _ in 0..5 {
        let (status, _) = http_get(addr, "/file?f=chrome/browser/foo.cc&l=1").await;
        assert_eq!(status, 200);
    }
    let (status, _) = http_get(addr, "/file?f=chrome/browser/foo.cc&l=1").await;
    assert_eq!(status, 429);

    // The limiter turned the sixth request away before the route handler.
    assert_eq!(editor.jumps.lock().await.len(), 5);
}

// ── lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_start_is_a_noop_on_the_same_address() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    let editor = Arc::new(FakeEditor::default());
    let (ctx, addr) = start_bridge(&dir, &root, editor).await;

    let again = ctx.server.clone().start(ctx.clone()).await.unwrap();
    assert_eq!(again, addr);
    assert_eq!(ctx.server.state().await, ServerState::Listening);
}

#[tokio::test]
async fn start_is_refused_outside_a_src_checkout() {
    let dir = TempDir::new().unwrap();
    // No `src` component anywhere under the temp dir.
    let root = dir.path().join("webkit");
    std::fs::create_dir_all(&root).unwrap();
    let editor = Arc::new(FakeEditor::default());
    let ctx = BridgeContext::with_editor(test_config(&dir, &root), editor);

    let err = ctx.server.clone().start(ctx.clone()).await;
    assert!(err.is_err());
    assert_eq!(ctx.server.state().await, ServerState::Stopped);
}

#[tokio::test]
async fn stop_shuts_the_listener_down() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    let editor = Arc::new(FakeEditor::default());
    let (ctx, addr) = start_bridge(&dir, &root, editor).await;

    let (status, _) = http_get(addr, "/healthz").await;
    assert_eq!(status, 200);

    // stop() waits for the accept loop, so the port is closed on return.
    ctx.server.stop().await;
    assert_eq!(ctx.server.state().await, ServerState::Stopped);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn restart_after_stop_binds_again() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    let editor = Arc::new(FakeEditor::default());
    let (ctx, _addr) = start_bridge(&dir, &root, editor).await;

    ctx.server.stop().await;

    let addr = ctx.server.clone().start(ctx.clone()).await.unwrap();
    let (status, _) = http_get(addr, "/healthz").await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn immediate_restart_state_survives_the_old_serve_task() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    let editor = Arc::new(FakeEditor::default());
    let (ctx, _addr) = start_bridge(&dir, &root, editor).await;

    ctx.server.stop().await;
    let addr = ctx.server.clone().start(ctx.clone()).await.unwrap();

    // Anything the first accept loop does on its way out must not mark the
    // second listener stopped.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(ctx.server.state().await, ServerState::Listening);
    assert_eq!(ctx.server.local_addr().await, Some(addr));
    let (status, _) = http_get(addr, "/healthz").await;
    assert_eq!(status, 200);
}

// ── /healthz ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn healthz_reports_the_workspace() {
    let dir = TempDir::new().unwrap();
    let root = checkout(&dir);
    let editor = Arc::new(FakeEditor::default());
    let (_ctx, addr) = start_bridge(&dir, &root, editor).await;

    let (status, body) = http_get(addr, "/healthz").await;
    assert_eq!(status, 200);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["status"], "ok");
    assert_eq!(v["workspace_ok"], true);
    assert_eq!(v["version"], env!("CARGO_PKG_VERSION"));
}
