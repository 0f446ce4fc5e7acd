// Bridge daemon lifecycle
//
// Construction order is deterministic: ZNS service -> channel registry ->
// multiplexer -> TLS identity -> listeners -> periodic task. Shutdown
// stops accepting first, then gives in-flight work a grace period.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use zns::ZnsService;

use crate::channels::ChannelRegistry;
use crate::config::BridgeConfig;
use crate::multiplexer::Multiplexer;
use crate::transport::http2::Http2Listener;
use crate::transport::http3::Http3Listener;
use crate::transport::load_tls_identity;

pub struct BridgeDaemon {
    config: BridgeConfig,
    multiplexer: Arc<Multiplexer>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
    http2_addr: Option<SocketAddr>,
    http3_addr: Option<SocketAddr>,
}

impl BridgeDaemon {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;

        let zns = Arc::new(ZnsService::new(config.zns.clone())?);
        let registry = ChannelRegistry::new(config.channels.clone());
        info!("🔗 Channel registry holds {} channel(s)", registry.len());

        let multiplexer = Arc::new(Multiplexer::new(
            zns,
            registry,
            config.network.max_connections,
            config.network.connection_timeout_ms,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config,
            multiplexer,
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
            http2_addr: None,
            http3_addr: None,
        })
    }

    /// Bind both listeners and start serving. Port binds and TLS loading
    /// are fatal here; the process must not come up half-listening.
    pub async fn start(&mut self) -> Result<()> {
        let identity = load_tls_identity(&self.config.network)?;

        let http2_addr: SocketAddr = format!(
            "{}:{}",
            self.config.network.server_address, self.config.network.http2_port
        )
        .parse()
        .context("Invalid HTTP/2 bind address")?;
        let http3_addr: SocketAddr = format!(
            "{}:{}",
            self.config.network.server_address, self.config.network.http3_port
        )
        .parse()
        .context("Invalid HTTP/3 bind address")?;

        let http2 =
            Http2Listener::bind(http2_addr, &identity, self.multiplexer.clone()).await?;
        let http3 = Http3Listener::bind(http3_addr, &identity, self.multiplexer.clone())?;
        self.http2_addr = Some(http2.local_addr()?);
        self.http3_addr = Some(http3.local_addr()?);

        self.tasks
            .push(tokio::spawn(http2.serve(self.shutdown_rx.clone())));
        self.tasks
            .push(tokio::spawn(http3.serve(self.shutdown_rx.clone())));
        self.tasks.push(tokio::spawn(periodic_loop(
            self.multiplexer.clone(),
            self.config.zns.service.periodic_task_interval_ms,
            self.shutdown_rx.clone(),
        )));

        info!(
            "✅ GhostBridge up: http2 on {}, http3 on {}",
            self.http2_addr.unwrap(),
            self.http3_addr.unwrap()
        );
        Ok(())
    }

    pub fn http2_addr(&self) -> Option<SocketAddr> {
        self.http2_addr
    }

    pub fn http3_addr(&self) -> Option<SocketAddr> {
        self.http3_addr
    }

    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.multiplexer
    }

    /// Stop accepting, then wait up to `grace` for the serving tasks
    /// before dropping them.
    pub async fn stop(&mut self, grace: Duration) {
        info!("🛑 Stopping GhostBridge daemon");
        let _ = self.shutdown_tx.send(true);

        for task in self.tasks.drain(..) {
            match tokio::time::timeout(grace, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => warn!("Serving task panicked during shutdown"),
                Ok(Err(_)) => {}
                Err(_) => warn!("Serving task exceeded the shutdown grace period"),
            }
        }
        info!("✅ GhostBridge daemon stopped");
    }
}

async fn periodic_loop(
    multiplexer: Arc<Multiplexer>,
    interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(100)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                multiplexer.zns().run_periodic_tasks().await;
            }
        }
    }
}
