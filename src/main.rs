use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dashboard_refresh::config::DashboardConfig;
use dashboard_refresh::{server, AppState};

#[derive(Parser)]
#[command(
    name = "dashboard-refresh",
    version,
    about = "Serves the metrics dashboard and refreshes its snapshot on demand",
    long_about = None
)]
struct Cli {
    /// TOML config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to bind
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Minimum seconds between collector runs
    #[arg(long)]
    debounce_secs: Option<u64>,

    /// Seconds before a collector run is killed
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Collector script
    #[arg(long)]
    collector: Option<PathBuf>,

    /// Program used to run the collector script
    #[arg(long, conflicts_with = "direct")]
    interpreter: Option<String>,

    /// Execute the collector directly instead of through an interpreter
    #[arg(long)]
    direct: bool,

    /// Working directory for the collector
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Snapshot file served by /api/refresh
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Directory with the dashboard's static files
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Count a collector that exits non-zero as a successful refresh
    #[arg(long)]
    accept_nonzero_exit: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, default_value = "text")]
    log_format: String,
}

impl Cli {
    fn into_config(self) -> Result<DashboardConfig> {
        let mut config = match &self.config {
            Some(path) => DashboardConfig::from_file(path)?,
            None => DashboardConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.debounce_secs {
            config.debounce_secs = secs;
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout_secs = secs;
        }
        if let Some(collector) = self.collector {
            config.collector = collector;
        }
        if let Some(interpreter) = self.interpreter {
            config.interpreter = Some(interpreter);
        }
        if self.direct {
            config.interpreter = None;
        }
        if let Some(workdir) = self.workdir {
            config.workdir = workdir;
        }
        if let Some(snapshot) = self.snapshot {
            config.snapshot = snapshot;
        }
        if let Some(static_dir) = self.static_dir {
            config.static_dir = static_dir;
        }
        if self.accept_nonzero_exit {
            config.accept_nonzero_exit = true;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(&cli.log_format, cli.verbose);

    let config = cli.into_config().context("Invalid configuration")?;
    let state = Arc::new(AppState::from_config(&config));
    let app = server::create_router(state, &config.static_dir);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr} — is it already in use?"))?;
    let local = listener.local_addr()?;

    tracing::info!(url = %format!("http://{local}/"), "Serving dashboard");
    tracing::info!(
        debounce_secs = config.debounce_secs,
        timeout_secs = config.timeout_secs,
        collector = %config.collector.display(),
        snapshot = %config.snapshot.display(),
        "Refresh endpoint: /api/refresh"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server exited with error")?;

    tracing::info!("Shutting down");
    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            tracing_subscriber::EnvFilter::new("dashboard_refresh=debug,tower_http=debug,info")
        } else {
            tracing_subscriber::EnvFilter::new("dashboard_refresh=info,warn")
        }
    });

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "dashboard-refresh",
            "--port",
            "9000",
            "--debounce-secs",
            "10",
            "--direct",
            "--accept-nonzero-exit",
        ]);
        let config = cli.into_config().unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.debounce_secs, 10);
        assert!(config.interpreter.is_none());
        assert!(config.accept_nonzero_exit);
        assert_eq!(config.timeout_secs, 15);
    }

    #[test]
    fn test_zero_timeout_flag_is_rejected() {
        let cli = Cli::parse_from(["dashboard-refresh", "--timeout-secs", "0"]);
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn test_interpreter_conflicts_with_direct() {
        assert!(Cli::try_parse_from([
            "dashboard-refresh",
            "--interpreter",
            "sh",
            "--direct"
        ])
        .is_err());
    }
}
