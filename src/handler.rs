use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info};

use crate::geo::Locator;
use crate::models::Event;
use crate::sink::EventSink;

/// Shared pieces every connection handler needs
pub struct HandlerContext {
    pub sink: Arc<EventSink>,
    pub locator: Arc<dyn Locator>,
    pub read_timeout: Duration,
    pub max_read_bytes: usize,
    pub payload_cap_chars: usize,
}

/// Handle one accepted connection end to end.
///
/// Never returns an error: every failure mode still emits exactly one
/// event, and the socket is released on every path. The read is a
/// single bounded receive; a banner send failure, read error, or read
/// timeout all degrade to an empty payload, not a missing event.
pub async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    port: u16,
    banner: Arc<String>,
    ctx: Arc<HandlerContext>,
) {
    let accepted_at = Utc::now();
    let started = Instant::now();

    info!("Connection from {} on port {}", peer, port);

    if let Err(e) = stream.write_all(banner.as_bytes()).await {
        // Recorded banner stays the intended bytes
        debug!("Banner send to {} failed: {}", peer, e);
    }

    let mut buf = vec![0u8; ctx.max_read_bytes];
    let n = match tokio::time::timeout(ctx.read_timeout, stream.read(&mut buf)).await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            debug!("Read from {} failed: {}", peer, e);
            0
        }
        Err(_) => {
            debug!("Read from {} timed out", peer);
            0
        }
    };
    let received = &buf[..n];

    let location = ctx.locator.locate(peer.ip()).await;

    let event = Event {
        id: None,
        timestamp: accepted_at,
        source_address: peer.ip(),
        source_port: peer.port(),
        destination_port: port,
        banner: banner.trim().to_string(),
        payload: render_payload(received, ctx.payload_cap_chars),
        byte_count: received.len() as u64,
        duration_secs: started.elapsed().as_secs_f64(),
        location: Some(location),
    };

    let outcome = ctx.sink.append(&event);
    if let Err(e) = &outcome.journal {
        error!("Failed to record {} -> :{} in journal: {}", peer, port, e);
    }
    if let Err(e) = &outcome.store {
        error!("Failed to record {} -> :{} in store: {}", peer, port, e);
    }

    debug!(
        "Recorded {} -> :{} ({} bytes, {:.3}s)",
        peer, port, event.byte_count, event.duration_secs
    );
    // Dropping the stream closes the socket
}

/// Lossy-decode received bytes and truncate to the storage cap
fn render_payload(data: &[u8], cap: usize) -> String {
    let text = String::from_utf8_lossy(data);
    if text.chars().count() <= cap {
        text.into_owned()
    } else {
        text.chars().take(cap).collect()
    }
}
