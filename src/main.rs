//! `tabctl-mediator` binary.
//!
//! Started by a browser (stdio mode) or by hand (server mode). Logs go to
//! stderr only; in stdio mode stdout carries protocol frames.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tabctl_mediator::{Mediator, MediatorConfig, Mode, select_mode};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "tabctl-mediator")]
#[command(about = "Native-messaging mediator for browser tab control")]
#[command(version)]
struct Cli {
    /// Run as a browser-launched native host
    #[arg(long, conflicts_with = "http")]
    stdio: bool,

    /// Run as a standalone HTTP gateway
    #[arg(long)]
    http: bool,

    /// Mediator port; names the socket and is the default HTTP port
    #[arg(long, env = "TABCTL_PORT", default_value_t = 4625)]
    port: u16,

    /// HTTP bind address
    #[arg(long, default_value = "127.0.0.1")]
    http_host: String,

    /// HTTP port, when different from --port
    #[arg(long)]
    http_port: Option<u16>,

    /// Also serve HTTP in stdio mode
    #[arg(long)]
    with_http: bool,

    /// Socket directory (defaults to $XDG_RUNTIME_DIR, else /tmp)
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Arguments supplied by the browser (extension origin or manifest path)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    browser_args: Vec<String>,
}

impl Cli {
    fn explicit_mode(&self) -> Option<Mode> {
        if self.stdio {
            Some(Mode::Stdio)
        } else if self.http {
            Some(Mode::Server)
        } else {
            None
        }
    }

    fn config(&self) -> MediatorConfig {
        let mut config = MediatorConfig::new()
            .with_port(self.port)
            .with_http_host(self.http_host.clone())
            .with_http_in_stdio(self.with_http);
        if let Some(port) = self.http_port {
            config = config.with_http_port(port);
        }
        if let Some(dir) = &self.runtime_dir {
            config = config.with_runtime_dir(dir);
        }
        config
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Filter from `TABCTL_LOG`, then `RUST_LOG`, default `info`; always stderr.
fn init_logging() {
    let filter = EnvFilter::try_from_env("TABCTL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let ctrl_c = tokio::signal::ctrl_c();
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(_) => {
            let _ = ctrl_c.await;
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = term.recv() => {}
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let env_mode = std::env::var("TABCTL_MODE").ok();
    let mode = match select_mode(
        cli.explicit_mode(),
        env_mode.as_deref(),
        &cli.browser_args,
        std::io::stdin().is_terminal(),
    ) {
        Ok(mode) => mode,
        Err(e) => {
            error!(error = %e, "Cannot select mode");
            return ExitCode::FAILURE;
        }
    };
    info!(%mode, port = cli.port, "Starting mediator");

    let mediator = Arc::new(Mediator::new(cli.config()));
    tokio::spawn({
        let mediator = Arc::clone(&mediator);
        async move {
            shutdown_signal().await;
            mediator.shutdown();
        }
    });

    match mediator.run(mode).await {
        Ok(reason) => {
            info!(?reason, "Mediator exited");
            ExitCode::from(reason.exit_code() as u8)
        }
        Err(e) => {
            error!(error = %e, "Mediator failed to start");
            ExitCode::FAILURE
        }
    }
}
