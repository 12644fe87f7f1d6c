use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::weblink::{DEFAULT_VIEWER_BASE_URL, DEFAULT_VIEWER_ORIGIN};

/// Port the original extension listened on — kept so existing viewer-side
/// links keep working.
const DEFAULT_PORT: u16 = 8989;
const DEFAULT_EDITOR_CMD: &str = "code";

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── RateLimitConfig ──────────────────────────────────────────────────────────

/// Inbound request throttling (`[rate_limit]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Rolling window length in seconds. Default: 60.
    pub window_secs: u64,
    /// Maximum requests per client within one window. Default: 5.
    pub max_requests: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 5,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// HTTP listener port (default: 8989).
    port: Option<u16>,
    /// Bind address (default: "127.0.0.1"; the listener is loopback-only by design).
    bind_address: Option<String>,
    /// Chromium checkout the bridge serves (default: current directory).
    workspace_root: Option<PathBuf>,
    /// Editor CLI binary (default: "code").
    editor_cmd: Option<String>,
    /// Override the web viewer route prefix.
    viewer_base_url: Option<String>,
    /// Origin allowed to call the listener cross-origin.
    viewer_origin: Option<String>,
    /// Log level filter string, e.g. "debug", "info,srcbridge=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default) | "json".
    log_format: Option<String>,
    /// Inbound request throttling (`[rate_limit]`).
    rate_limit: Option<RateLimitConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── BridgeConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub port: u16,
    /// Bind address for the HTTP listener (SRCBRIDGE_BIND env var).
    pub bind_address: String,
    pub data_dir: PathBuf,
    /// The Chromium checkout this bridge serves. Validated on every request,
    /// never cached.
    pub workspace_root: PathBuf,
    /// Editor CLI binary (SRCBRIDGE_EDITOR env var, default: "code").
    pub editor_cmd: String,
    /// Web viewer route prefix the outbound opener appends paths to.
    pub viewer_base_url: String,
    /// Single origin the listener accepts cross-origin requests from.
    pub viewer_origin: String,
    pub log: String,
    /// Log output format: "pretty" (default) | "json".
    pub log_format: String,
    pub rate_limit: RateLimitConfig,
}

impl BridgeConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        workspace_root: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let bind_address = bind_address
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let workspace_root = workspace_root
            .or(toml.workspace_root)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let editor_cmd = std::env::var("SRCBRIDGE_EDITOR")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.editor_cmd)
            .unwrap_or_else(|| DEFAULT_EDITOR_CMD.to_string());

        let viewer_base_url = std::env::var("SRCBRIDGE_VIEWER_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.viewer_base_url)
            .unwrap_or_else(|| DEFAULT_VIEWER_BASE_URL.to_string());

        let viewer_origin = std::env::var("SRCBRIDGE_VIEWER_ORIGIN")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.viewer_origin)
            .unwrap_or_else(|| DEFAULT_VIEWER_ORIGIN.to_string());

        let log_format = std::env::var("SRCBRIDGE_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let rate_limit = toml.rate_limit.unwrap_or_default();

        Self {
            port,
            bind_address,
            data_dir,
            workspace_root,
            editor_cmd,
            viewer_base_url,
            viewer_origin,
            log,
            log_format,
            rate_limit,
        }
    }

    /// Path of the append-only daemon log file.
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("srcbridge.log")
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/srcbridge
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("srcbridge");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/srcbridge or ~/.local/share/srcbridge
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("srcbridge");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("srcbridge");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\srcbridge
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("srcbridge");
        }
    }
    // Fallback
    PathBuf::from(".srcbridge")
}
