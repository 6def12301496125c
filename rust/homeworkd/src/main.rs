mod backup;
mod cache;
mod config;
mod db;
mod ipc;
mod legacy;
mod merge;
mod rating;
mod stats;
mod store;
mod week;
mod workflow;

use config::Config;
use serde_json::json;
use std::io::{self, BufRead, Write};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// stdout carries the IPC stream, so logs go to stderr.
fn init_tracing(config: &Config) {
    let filter = config
        .log_filter
        .as_deref()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}

fn main() {
    let config = Config::from_env();
    init_tracing(&config);

    let mut state = ipc::AppState::new(config.today);
    if let Some(today) = config.today {
        tracing::info!(%today, "calendar pinned");
    }
    if let Some(path) = config.workspace.clone() {
        if let Err(e) = ipc::open_workspace(&mut state, path.clone()) {
            tracing::error!(workspace = %path.display(), error = %format!("{e:#}"), "failed to open workspace");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "homeworkd ready");

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
