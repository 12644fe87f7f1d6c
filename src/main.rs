use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use srcbridge::{config::BridgeConfig, weblink, BridgeContext};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "srcbridge",
    about = "Chromium source bridge — links a local editor with source.chromium.org",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// HTTP listener port
    #[arg(long, env = "SRCBRIDGE_PORT")]
    port: Option<u16>,

    /// Data directory for config and logs
    #[arg(long, env = "SRCBRIDGE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Chromium checkout to serve (default: current directory)
    #[arg(long, env = "SRCBRIDGE_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SRCBRIDGE_LOG")]
    log: Option<String>,

    /// Bind address for the listener (default: 127.0.0.1)
    #[arg(long, env = "SRCBRIDGE_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file instead of {data_dir}/srcbridge.log
    #[arg(long, env = "SRCBRIDGE_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the inbound listener (default when no subcommand given).
    ///
    /// Listens on the loopback port the web viewer links back to and focuses
    /// the editor on requested files. Ctrl-C shuts the listener down.
    ///
    /// Examples:
    ///   srcbridge serve
    ///   srcbridge --workspace ~/chromium/src serve
    Serve,
    /// Open a local file in the web viewer.
    ///
    /// Computes the checkout-relative path of FILE, builds the
    /// source.chromium.org URL for it, and opens the default browser. Bind
    /// this to an editor keybinding to replace the old palette command.
    ///
    /// Examples:
    ///   srcbridge open ~/chromium/src/chrome/browser/foo.cc --line 42
    ///   srcbridge open foo.cc --line 10 --text "LOG(INFO)"
    Open {
        /// File to show in the web viewer
        file: PathBuf,
        /// 1-based line number to anchor
        #[arg(long, short, default_value = "1")]
        line: u32,
        /// Selected text to pre-fill the viewer search box with
        #[arg(long)]
        text: Option<String>,
    },
    /// Show listener status (running, version, workspace).
    ///
    /// Queries the local /healthz endpoint. Exits 0 if the listener is up,
    /// 1 otherwise.
    ///
    /// Examples:
    ///   srcbridge status
    ///   srcbridge status --json
    Status {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },
    /// Print the tail of the daemon log file.
    ///
    /// Examples:
    ///   srcbridge logs
    ///   srcbridge logs --lines 100
    Logs {
        /// Number of lines to show (0 = all)
        #[arg(long, short = 'n', default_value = "50")]
        lines: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = BridgeConfig::new(
        args.port,
        args.data_dir,
        args.workspace,
        args.log,
        args.bind_address,
    );

    match args.command {
        Some(Command::Open { file, line, text }) => {
            let _guard = setup_logging("error", None, &config.log_format);
            run_open(&config, &file, line, text.as_deref())?;
        }
        Some(Command::Status { json }) => {
            let _guard = setup_logging("error", None, &config.log_format);
            let exit_code = run_status(&config, json).await;
            std::process::exit(exit_code);
        }
        Some(Command::Logs { lines }) => {
            let _guard = setup_logging("error", None, &config.log_format);
            run_logs(&config, lines)?;
        }
        None | Some(Command::Serve) => {
            let log_file = args.log_file.unwrap_or_else(|| config.log_file());
            let _guard = setup_logging(&config.log, Some(&log_file), &config.log_format);
            run_serve(config).await?;
        }
    }

    Ok(())
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and an append-only file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format) or
/// `"json"` (structured JSON).
///
/// If the log directory cannot be created, falls back to stdout-only logging
/// with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("srcbridge.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        // `never` rotation — one fixed-path file, appended to forever.
        let appender = tracing_appender::rolling::never(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}

// ── srcbridge serve ───────────────────────────────────────────────────────────

async fn run_serve(config: BridgeConfig) -> Result<()> {
    let ctx = BridgeContext::new(config);
    ctx.server.clone().start(ctx.clone()).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("ctrl-c received — shutting down");
    ctx.server.stop().await;
    Ok(())
}

// ── srcbridge open ────────────────────────────────────────────────────────────

fn run_open(config: &BridgeConfig, file: &std::path::Path, line: u32, text: Option<&str>) -> Result<()> {
    let file = file
        .canonicalize()
        .with_context(|| format!("no such file: {}", file.display()))?;
    let url = weblink::open_in_web(config, &file, line, text)?;
    println!("Opened {url}");
    Ok(())
}

// ── srcbridge status ──────────────────────────────────────────────────────────

/// Returns exit code: 0 = listening, 1 = stopped/unresponsive.
async fn run_status(config: &BridgeConfig, json: bool) -> i32 {
    let url = format!("http://{}:{}/healthz", config.bind_address, config.port);

    let body: Option<serde_json::Value> = match reqwest::get(&url).await {
        Ok(resp) => resp.json().await.ok(),
        Err(_) => None,
    };

    match body {
        Some(v) => {
            if json {
                println!("{}", serde_json::to_string(&v).unwrap_or_default());
            } else {
                let version = v["version"].as_str().unwrap_or("?");
                let root = v["workspace_root"].as_str().unwrap_or("?");
                let ok = v["workspace_ok"].as_bool().unwrap_or(false);
                let uptime = v["uptime_secs"].as_u64().unwrap_or(0);
                println!(
                    "srcbridge {version} — listening on port {} (workspace {root}{}, up {uptime}s)",
                    config.port,
                    if ok { "" } else { ", NOT a src checkout" },
                );
            }
            0
        }
        None => {
            if json {
                println!(r#"{{"status":"not_running"}}"#);
            } else {
                println!("srcbridge: not running");
            }
            1
        }
    }
}

// ── srcbridge logs ────────────────────────────────────────────────────────────

fn run_logs(config: &BridgeConfig, lines: u64) -> Result<()> {
    let log_path = std::env::var("SRCBRIDGE_LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config.log_file());

    if !log_path.exists() {
        anyhow::bail!(
            "log file not found: {}\n  Start the listener first: srcbridge serve",
            log_path.display()
        );
    }

    let content = std::fs::read_to_string(&log_path)
        .with_context(|| format!("cannot read log file: {}", log_path.display()))?;

    let all_lines: Vec<&str> = content.lines().collect();
    let start = if lines == 0 || lines as usize >= all_lines.len() {
        0
    } else {
        all_lines.len() - lines as usize
    };

    for line in &all_lines[start..] {
        println!("{line}");
    }

    Ok(())
}
