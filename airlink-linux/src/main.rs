// airlink Linux daemon: radio link manager, feed forwarder and access point fan-out.

mod broadcaster;
mod config;
mod forwarder;
mod ingest;
mod net;
mod queue;
mod radio;
#[cfg(test)]
mod testing;
mod wifi;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use airlink_core::Settings;
use anyhow::{bail, Context, Result};
use tokio::io::BufReader;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::net::{Network, TokioNetwork};
use crate::radio::{HostRadio, RadioDriver};
use crate::wifi::WifiManager;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    let mut config_path = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("airlink-linux {}", VERSION);
                return Ok(());
            }
            "--config" | "-c" => {
                let path = args.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(path));
            }
            other => bail!("unknown argument {other:?}"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let path = config::locate(config_path);
    let cfg = config::load(path.as_deref()).context("loading configuration")?;
    let settings = cfg.settings().context("invalid configuration")?;
    match &path {
        Some(p) => info!(path = %p.display(), "configuration loaded"),
        None => info!("no configuration file, using defaults"),
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg, settings, path))
}

/// `RUST_LOG` wins when set and valid; otherwise log this crate at info.
fn log_filter(rust_log: Option<&str>) -> tracing_subscriber::EnvFilter {
    rust_log
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| tracing_subscriber::EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("airlink_linux=info"))
}

async fn run(cfg: Config, settings: Settings, path: Option<PathBuf>) -> Result<()> {
    let manager = Arc::new(WifiManager::new(
        HostRadio::new(cfg.clients.clone()),
        Arc::new(TokioNetwork::new()),
        settings,
        cfg.manager_options(),
    ));

    match manager.initialize().await {
        Ok(()) => {}
        Err(e) if e.is_fatal() => return Err(e).context("radio initialization failed"),
        Err(e) if manager.is_access_point_running() => {
            warn!(error = %e, "continuing with the access point only");
        }
        Err(e) => {
            error!(error = %e, "no usable interface left");
            manager.deinitialize()?;
            return Err(e.into());
        }
    }

    if cfg.ingest.stdin {
        let m = manager.clone();
        let relay = (cfg.ingest.broadcast_port != 0).then_some(cfg.ingest.broadcast_port);
        tokio::spawn(async move {
            let input = BufReader::new(tokio::io::stdin());
            if let Err(e) = ingest::run_avr_ingest(&*m, input, relay).await {
                error!(error = %e, "AVR input failed");
            }
        });
    }

    wait_for_shutdown(&manager, path.as_deref()).await?;

    info!(
        state = %manager.connection_state(),
        has_ip = manager.station_has_ip(),
        station_failures = manager.station_failures(),
        clients = manager.clients().await.active_count(),
        rates = ?manager.feed_rates(),
        "shutting down"
    );
    manager.shutdown().await;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM. SIGHUP reloads the feed table from `path`.
async fn wait_for_shutdown<R: RadioDriver, N: Network>(
    manager: &WifiManager<R, N>,
    path: Option<&Path>,
) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;
        loop {
            tokio::select! {
                r = tokio::signal::ctrl_c() => return Ok(r?),
                _ = sigterm.recv() => return Ok(()),
                _ = sighup.recv() => reload_feeds(manager, path),
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (manager, path);
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}

fn reload_feeds<R: RadioDriver, N: Network>(manager: &WifiManager<R, N>, path: Option<&Path>) {
    match config::load(path).and_then(|c| c.settings()) {
        Ok(settings) => {
            let active = settings.feeds.iter().filter(|f| f.active).count();
            manager.update_feeds(settings.feeds);
            info!(active, "feed table reloaded");
        }
        Err(e) => warn!(error = %e, "reload failed, keeping current feeds"),
    }
}
