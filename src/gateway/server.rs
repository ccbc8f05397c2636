//! Gateway server: listener, announcer, and per-connection loop
//!
//! Accepts connections on the preferred port with exactly one dynamic-port
//! fallback; a second bind failure is terminal for the listener. Each
//! connection is a persistent request/response session: one response per
//! command, connection kept open across malformed requests, torn down on
//! any transport error without retry (the client reconnects).

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::discovery::{announce_loop, Beacon};
use super::framing::{read_frame, write_frame};
use super::{GatewayRequest, GatewayResponse, ERR_BAD_ARGUMENT, ERR_INVALID_REQUEST};
use crate::config::GatewayConfig;
use crate::router::Router;

/// Name advertised in snapshots
pub const APP_NAME: &str = "padgrid-gw";

/// Bind the preferred port, falling back to an OS-assigned port exactly
/// once. A second failure is terminal.
pub async fn bind_with_fallback(port: u16) -> Result<TcpListener> {
    match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => Ok(listener),
        Err(first) => {
            warn!(
                "Preferred gateway port {} unavailable ({}); falling back to a dynamic port",
                port, first
            );
            TcpListener::bind(("0.0.0.0", 0))
                .await
                .context("Dynamic-port fallback bind failed; gateway listener is terminal")
        }
    }
}

/// Run the gateway: listener + discovery announcer + accept loop
pub async fn run(router: Arc<Router>, config: GatewayConfig) -> Result<()> {
    let listener = bind_with_fallback(config.port).await?;
    let local = listener.local_addr().context("listener has no local addr")?;
    info!("📡 Gateway listening on {}", local);

    let snapshot = router.snapshot(APP_NAME);
    let beacon = Beacon::new(
        local.port(),
        snapshot.server_instance_id.unwrap_or_default(),
        snapshot.server_started_at.unwrap_or_default(),
    );
    let beacon_port = config.beacon_port;
    tokio::spawn(async move {
        if let Err(e) = announce_loop(beacon_port, beacon).await {
            warn!("Discovery announcer stopped: {:#}", e);
        }
    });

    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        debug!("Gateway connection from {}", peer);

        let router = Arc::clone(&router);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, router).await {
                debug!("Gateway connection {} closed: {:#}", peer, e);
            }
        });
    }
}

/// Serve one persistent request/response session
pub async fn handle_connection<S>(mut stream: S, router: Arc<Router>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let payload = match read_frame(&mut stream).await {
            Ok(Some(payload)) => payload,
            // Clean close between messages
            Ok(None) => return Ok(()),
            Err(e) => return Err(e).context("read failed"),
        };

        let response = match serde_json::from_slice::<GatewayRequest>(&payload) {
            Ok(request) => process_request(&router, request),
            Err(e) => {
                // Malformed input never closes the session
                debug!("invalid gateway request: {}", e);
                GatewayResponse::Error {
                    message: ERR_INVALID_REQUEST.to_string(),
                }
            }
        };

        let bytes = serde_json::to_vec(&response).context("response serialization failed")?;
        write_frame(&mut stream, &bytes)
            .await
            .context("write failed")?;
    }
}

/// Process one decoded request into exactly one response
pub fn process_request(router: &Router, request: GatewayRequest) -> GatewayResponse {
    match request {
        GatewayRequest::Snapshot => GatewayResponse::Snapshot(router.snapshot(APP_NAME)),
        GatewayRequest::Tap { pad } => match router.tap(pad) {
            Ok(()) => GatewayResponse::Ack,
            Err(e) => {
                debug!("tap failed: {}", e);
                GatewayResponse::Error {
                    message: ERR_BAD_ARGUMENT.to_string(),
                }
            }
        },
        GatewayRequest::SetValue { pad, normalized } => {
            // Application logic never sees out-of-range values
            let normalized = if normalized.is_finite() {
                normalized.clamp(0.0, 1.0)
            } else {
                0.0
            };
            match router.set_value(pad, normalized) {
                Ok(()) => GatewayResponse::Ack,
                Err(e) => {
                    debug!("set_value failed: {}", e);
                    GatewayResponse::Error {
                        message: ERR_BAD_ARGUMENT.to_string(),
                    }
                }
            }
        }
        GatewayRequest::System { action } => {
            router.system(action);
            GatewayResponse::Ack
        }
    }
}
