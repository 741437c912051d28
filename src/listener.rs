use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::ListenerConfig;
use crate::handler::{handle_connection, HandlerContext};

/// One bound deception listener
struct PortListener {
    port: u16,
    banner: Arc<String>,
    listener: TcpListener,
}

/// All bound listeners plus the ports that could not be bound.
///
/// Binding is per-port: a port that fails is reported and skipped
/// while the others proceed. Only a fully failed bind is an error.
pub struct ListenerManager {
    listeners: Vec<PortListener>,
    failed: Vec<(u16, std::io::Error)>,
}

impl ListenerManager {
    /// Try to bind every configured port
    pub async fn bind(config: &ListenerConfig) -> Result<Self> {
        let mut listeners = Vec::new();
        let mut failed = Vec::new();

        for &port in &config.ports {
            let addr = format!("{}:{}", config.bind_addr, port);
            match TcpListener::bind(&addr).await {
                Ok(listener) => {
                    info!("Listening on {}", addr);
                    listeners.push(PortListener {
                        port,
                        banner: Arc::new(config.banner_for(port).to_string()),
                        listener,
                    });
                }
                Err(e) => {
                    error!("Failed to bind {}: {}", addr, e);
                    failed.push((port, e));
                }
            }
        }

        if listeners.is_empty() {
            bail!("No listener port could be bound on {}", config.bind_addr);
        }

        Ok(Self { listeners, failed })
    }

    /// Ports that did not bind
    pub fn failed_ports(&self) -> Vec<u16> {
        self.failed.iter().map(|(port, _)| *port).collect()
    }

    /// Accept connections until `shutdown` flips, then drain every
    /// in-flight handler before returning.
    pub async fn serve(self, ctx: Arc<HandlerContext>, shutdown: watch::Receiver<bool>) {
        let mut accept_loops = JoinSet::new();

        for pl in self.listeners {
            accept_loops.spawn(accept_loop(pl, ctx.clone(), shutdown.clone()));
        }

        while accept_loops.join_next().await.is_some() {}
    }
}

/// Accept loop for one port. Each connection runs as its own task; an
/// accept error is logged and the loop keeps accepting.
async fn accept_loop(
    pl: PortListener,
    ctx: Arc<HandlerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            result = pl.listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        handlers.spawn(handle_connection(
                            stream,
                            peer,
                            pl.port,
                            pl.banner.clone(),
                            ctx.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Accept error on port {}: {}", pl.port, e);
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!("Port {} stopping accepts", pl.port);
                break;
            }
        }

        // Reap finished handlers so the set does not grow unbounded
        while let Some(res) = handlers.try_join_next() {
            if let Err(e) = res {
                error!("Connection task on port {} failed: {}", pl.port, e);
            }
        }
    }

    let in_flight = handlers.len();
    if in_flight > 0 {
        info!("Port {}: waiting for {} in-flight connection(s)", pl.port, in_flight);
    }
    while let Some(res) = handlers.join_next().await {
        if let Err(e) = res {
            error!("Connection task on port {} failed: {}", pl.port, e);
        }
    }
}
