//! Netcore echo server binary.
//!
//! Accepts TCP connections and echoes every received chunk back to the
//! sender, using the netcore session core.

use clap::Parser;
use netcore_session::{Service, ServerHandler, SessionHandler, TcpServer, TcpSession};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::NetcoreConfig;
use logging::NetcoreLogFormatter;

/// TCP echo server
#[derive(Parser, Debug)]
#[command(name = "netcore", version, about = "TCP echo server built on netcore sessions")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "netcore.yaml")]
    config: PathBuf,

    /// Listen address, e.g. 0.0.0.0:1111 (overrides the config file)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// How often to log server statistics, e.g. 30s
    #[arg(long, default_value = "30s")]
    stats_interval: humantime::Duration,
}

/// Echoes everything back
struct EchoSession;

impl SessionHandler for EchoSession {
    fn on_connected(&self, session: &Arc<TcpSession>) {
        info!("Echo session {} connected from {}", session.id(), session.peer_addr());
    }

    fn on_disconnected(&self, session: &Arc<TcpSession>) {
        info!("Echo session {} disconnected", session.id());
    }

    fn on_received(&self, session: &Arc<TcpSession>, data: &[u8]) -> usize {
        session.send(data);
        data.len()
    }

    fn on_error(&self, session: &Arc<TcpSession>, code: i32, category: &str, message: &str) {
        warn!(
            "Echo session {} caught an error with code {} and category '{}': {}",
            session.id(),
            code,
            category,
            message
        );
    }
}

struct EchoServer;

impl ServerHandler for EchoServer {
    fn create_session_handler(&self, _server: &Arc<TcpServer>) -> Arc<dyn SessionHandler> {
        Arc::new(EchoSession)
    }

    fn on_error(&self, code: i32, category: &str, message: &str) {
        warn!(
            "Echo server caught an error with code {} and category '{}': {}",
            code, category, message
        );
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("netcore={}", args.log_level).parse()?)
        .add_directive(format!("netcore_session={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(NetcoreLogFormatter::new("netcore".to_string()))
        .init();

    info!("Starting netcore echo server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = NetcoreConfig::load_from_file(&args.config)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let service = Service::current()?;
    let server = TcpServer::new(
        service,
        config.listen,
        config.session_config(),
        Arc::new(EchoServer),
    );
    let bound = server.start().await?;
    info!("Echo server listening on {}", bound);

    let mut stats_interval = tokio::time::interval(Duration::from(args.stats_interval));
    stats_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    stats_interval.tick().await;

    loop {
        tokio::select! {
            _ = stats_interval.tick() => {
                let stats = server.stats();
                info!(
                    component = "stats",
                    "sessions={} bytes_sent={} bytes_received={}",
                    server.connected_sessions(),
                    stats.bytes_sent,
                    stats.bytes_received
                );
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down echo server");
    server.stop()?;

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while server.connected_sessions() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            "{} sessions still open after shutdown timeout",
            server.connected_sessions()
        );
    }
    info!("Echo server stopped");
    Ok(())
}
