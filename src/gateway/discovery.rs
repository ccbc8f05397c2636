//! LAN discovery: UDP beacon announce/browse
//!
//! The server periodically broadcasts a small JSON beacon naming the
//! service type, its TCP port and instance identity. Clients bind the
//! beacon port and collect candidate endpoints; everything smarter
//! (racing, freshness selection) happens in the client layer.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use super::SERVICE_TYPE;

/// Interval between beacon broadcasts
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);

/// One discovery announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    pub service: String,
    /// TCP port the gateway listens on
    pub port: u16,
    pub instance_id: String,
    /// Milliseconds since the Unix epoch
    pub started_at: i64,
}

impl Beacon {
    pub fn new(port: u16, instance_id: String, started_at: i64) -> Self {
        Self {
            service: SERVICE_TYPE.to_string(),
            port,
            instance_id,
            started_at,
        }
    }
}

/// Broadcast the beacon until the task is dropped
pub async fn announce_loop(beacon_port: u16, beacon: Beacon) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("Failed to bind announce socket")?;
    socket
        .set_broadcast(true)
        .context("Failed to enable broadcast")?;

    let payload = serde_json::to_vec(&beacon).context("Failed to serialize beacon")?;
    let target = SocketAddr::from(([255, 255, 255, 255], beacon_port));

    let mut ticker = tokio::time::interval(ANNOUNCE_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = socket.send_to(&payload, target).await {
            // Transient on some networks; keep announcing
            debug!("beacon send failed: {}", e);
        }
    }
}

/// A discovered gateway endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub instance_id: String,
}

/// Listens for beacons and yields endpoints
pub struct Browser {
    socket: UdpSocket,
}

impl Browser {
    /// Bind the beacon port. Pass 0 for an ephemeral port (tests).
    pub async fn bind(beacon_port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", beacon_port))
            .await
            .context("Failed to bind discovery browser")?;
        Ok(Self { socket })
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Receive the next valid beacon. Foreign or undecodable datagrams are
    /// skipped.
    pub async fn next_endpoint(&self) -> Result<Endpoint> {
        let mut buf = [0u8; 1024];
        loop {
            let (len, from) = self
                .socket
                .recv_from(&mut buf)
                .await
                .context("discovery recv failed")?;

            let beacon: Beacon = match serde_json::from_slice(&buf[..len]) {
                Ok(beacon) => beacon,
                Err(e) => {
                    debug!("ignoring undecodable beacon from {}: {}", from, e);
                    continue;
                }
            };

            if beacon.service != SERVICE_TYPE {
                warn!("ignoring beacon for foreign service '{}'", beacon.service);
                continue;
            }

            let ip: IpAddr = from.ip();
            return Ok(Endpoint {
                addr: SocketAddr::new(ip, beacon.port),
                instance_id: beacon.instance_id,
            });
        }
    }
}
