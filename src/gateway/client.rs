//! Gateway client: discovery racing, coalesced refresh, throttled pushes
//!
//! The companion-side counterpart of the server. Discovery yields zero or
//! more candidate endpoints; a snapshot race picks the most authoritative
//! one (longest-running server, freshest snapshot). Refreshes are
//! coalesced so at most one request is in flight with at most one queued
//! behind it. Value drags are throttled latest-value-wins, with zero-edge
//! drags sent immediately, and every mutating command applies an
//! optimistic local update reconciled by the next snapshot.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::discovery::Browser;
use super::framing::{read_frame, write_frame};
use super::{GatewayRequest, GatewayResponse, RemotePad, RemoteSnapshot};
use crate::config::Tunables;

/// Client-side tunables
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub refresh_retries: u32,
    pub refresh_retry_delay: Duration,
    pub value_throttle: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn from_tunables(tunables: &Tunables) -> Self {
        Self {
            refresh_retries: tunables.refresh_retries,
            refresh_retry_delay: Duration::from_millis(tunables.refresh_retry_delay_ms),
            value_throttle: Duration::from_millis(tunables.value_throttle_ms),
            request_timeout: Duration::from_secs(2),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_tunables(&Tunables::default())
    }
}

// ----------------------------------------------------------------------
// Pure pieces
// ----------------------------------------------------------------------

/// Pick the most authoritative snapshot among race responses: greatest
/// (server_started_at, generated_at), lexicographically.
pub fn pick_best(
    candidates: Vec<(SocketAddr, RemoteSnapshot)>,
) -> Option<(SocketAddr, RemoteSnapshot)> {
    candidates
        .into_iter()
        .max_by_key(|(_, snapshot)| snapshot.freshness())
}

/// Coalesces refresh requests: at most one in flight, at most one queued
#[derive(Debug, Default)]
pub struct RefreshCoalescer {
    in_flight: bool,
    pending: bool,
}

impl RefreshCoalescer {
    /// Returns true when the caller should issue a refresh now; otherwise
    /// the request is folded into the pending flag.
    pub fn begin(&mut self) -> bool {
        if self.in_flight {
            self.pending = true;
            false
        } else {
            self.in_flight = true;
            true
        }
    }

    /// Marks the in-flight refresh complete. Returns true when exactly one
    /// queued refresh must be issued now; the coalescer then stays
    /// in-flight until that follow-up also finishes.
    pub fn finish(&mut self) -> bool {
        if self.pending {
            self.pending = false;
            true
        } else {
            self.in_flight = false;
            false
        }
    }
}

/// What to display when a snapshot arrives
#[derive(Debug, PartialEq)]
pub enum PadsDecision {
    /// Non-empty pad list: use it
    UseNew,
    /// Empty list, but we have a cached pad list for the same scene
    UseCached(Vec<RemotePad>),
    /// Empty list, same scene as displayed: keep what is shown
    KeepCurrent,
    /// Empty list and the scene changed: clear
    Clear,
}

/// Empty-snapshot fallback ladder (cache -> keep -> clear)
pub fn resolve_pads(
    snapshot: &RemoteSnapshot,
    displayed_scene: Option<&str>,
    cache: &HashMap<String, Vec<RemotePad>>,
) -> PadsDecision {
    if !snapshot.pads.is_empty() {
        return PadsDecision::UseNew;
    }

    if let Some(scene) = &snapshot.scene_name {
        if let Some(cached) = cache.get(scene) {
            return PadsDecision::UseCached(cached.clone());
        }
    }

    if snapshot.scene_name.as_deref() == displayed_scene {
        PadsDecision::KeepCurrent
    } else {
        PadsDecision::Clear
    }
}

/// Latest-value-wins throttle for slider drags
#[derive(Debug)]
pub struct ValueThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
    pending: Option<(usize, f32)>,
}

impl ValueThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            pending: None,
        }
    }

    /// Offer a value; returns it when it should be sent immediately,
    /// otherwise parks it (replacing any previously parked value).
    pub fn offer(&mut self, pad: usize, value: f32, now: Instant) -> Option<(usize, f32)> {
        let due = match self.last_sent {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };

        if due {
            self.last_sent = Some(now);
            self.pending = None;
            Some((pad, value))
        } else {
            self.pending = Some((pad, value));
            None
        }
    }

    /// Take the parked value once the interval has elapsed
    pub fn drain(&mut self, now: Instant) -> Option<(usize, f32)> {
        let due = match self.last_sent {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };

        if due {
            if let Some(parked) = self.pending.take() {
                self.last_sent = Some(now);
                return Some(parked);
            }
        }
        None
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Collect unique candidate endpoints from discovery beacons for one
/// window. Feed the result to [`GatewayClient::race_endpoints`].
pub async fn collect_endpoints(browser: &Browser, window: Duration) -> Vec<SocketAddr> {
    let deadline = tokio::time::Instant::now() + window;
    let mut found: Vec<SocketAddr> = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, browser.next_endpoint()).await {
            Ok(Ok(endpoint)) => {
                if !found.contains(&endpoint.addr) {
                    found.push(endpoint.addr);
                }
            }
            Ok(Err(_)) | Err(_) => break,
        }
    }

    found
}

// ----------------------------------------------------------------------
// Client
// ----------------------------------------------------------------------

/// Local view model reconciled by snapshots
#[derive(Debug, Default, Clone)]
pub struct ClientView {
    pub endpoint: Option<SocketAddr>,
    pub pads: Vec<RemotePad>,
    pub scene_name: Option<String>,
    pub scenes: Vec<String>,
    pub recording_active: bool,
}

pub struct GatewayClient {
    config: ClientConfig,
    /// Invalidates stale in-flight endpoint races
    probe_token: AtomicU64,
    view: Mutex<ClientView>,
    pad_cache: Mutex<HashMap<String, Vec<RemotePad>>>,
    coalescer: Mutex<RefreshCoalescer>,
    throttle: Mutex<ValueThrottle>,
}

impl GatewayClient {
    pub fn new(config: ClientConfig) -> Self {
        let throttle = ValueThrottle::new(config.value_throttle);
        Self {
            config,
            probe_token: AtomicU64::new(0),
            view: Mutex::new(ClientView::default()),
            pad_cache: Mutex::new(HashMap::new()),
            coalescer: Mutex::new(RefreshCoalescer::default()),
            throttle: Mutex::new(throttle),
        }
    }

    pub fn view(&self) -> ClientView {
        self.view.lock().clone()
    }

    /// One request/response round trip on a fresh connection
    async fn request(
        addr: SocketAddr,
        request: &GatewayRequest,
        request_timeout: Duration,
    ) -> Result<GatewayResponse> {
        let round_trip = async {
            let mut stream = TcpStream::connect(addr)
                .await
                .context("gateway connect failed")?;
            let bytes = serde_json::to_vec(request).context("request serialization failed")?;
            write_frame(&mut stream, &bytes).await?;
            let payload = read_frame(&mut stream)
                .await?
                .context("gateway closed before responding")?;
            let response = serde_json::from_slice(&payload).context("undecodable response")?;
            Ok::<GatewayResponse, anyhow::Error>(response)
        };

        timeout(request_timeout, round_trip)
            .await
            .context("gateway request timed out")?
    }

    async fn request_snapshot(
        addr: SocketAddr,
        request_timeout: Duration,
    ) -> Result<RemoteSnapshot> {
        match Self::request(addr, &GatewayRequest::Snapshot, request_timeout).await? {
            GatewayResponse::Snapshot(snapshot) => Ok(snapshot),
            other => anyhow::bail!("expected snapshot response, got {:?}", other),
        }
    }

    /// Race a snapshot request against all candidates and adopt the most
    /// authoritative server. A new race started before this one resolves
    /// invalidates it (monotonic probe token).
    pub async fn race_endpoints(&self, endpoints: Vec<SocketAddr>) -> Option<SocketAddr> {
        if endpoints.is_empty() {
            return None;
        }

        let token = self.probe_token.fetch_add(1, Ordering::SeqCst) + 1;
        let request_timeout = self.config.request_timeout;

        let probes = endpoints.into_iter().map(|addr| async move {
            match Self::request_snapshot(addr, request_timeout).await {
                Ok(snapshot) => Some((addr, snapshot)),
                Err(e) => {
                    debug!("probe of {} failed: {:#}", addr, e);
                    None
                }
            }
        });

        let candidates: Vec<_> = futures_util::future::join_all(probes)
            .await
            .into_iter()
            .flatten()
            .collect();

        let (addr, snapshot) = pick_best(candidates)?;

        // A newer race superseded this one: its result is a no-op
        if self.probe_token.load(Ordering::SeqCst) != token {
            debug!("discarding superseded endpoint race result");
            return None;
        }

        self.view.lock().endpoint = Some(addr);
        self.apply_snapshot(&snapshot);
        Some(addr)
    }

    /// Coalesced refresh: concurrent calls fold into one queued follow-up
    pub async fn refresh(&self) {
        if !self.coalescer.lock().begin() {
            return;
        }

        loop {
            self.refresh_once().await;
            if !self.coalescer.lock().finish() {
                break;
            }
        }
    }

    /// One refresh cycle with the empty-snapshot retry ladder
    async fn refresh_once(&self) {
        let Some(addr) = self.view.lock().endpoint else {
            debug!("refresh without endpoint");
            return;
        };

        let mut attempts = 0;
        loop {
            let snapshot = match Self::request_snapshot(addr, self.config.request_timeout).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("refresh failed: {:#}", e);
                    return;
                }
            };

            self.apply_snapshot(&snapshot);
            if !snapshot.pads.is_empty() {
                return;
            }

            attempts += 1;
            if attempts > self.config.refresh_retries {
                debug!("giving up on empty snapshot after {} retries", attempts - 1);
                return;
            }
            tokio::time::sleep(self.config.refresh_retry_delay).await;
        }
    }

    /// Reconcile the local view with a server snapshot
    fn apply_snapshot(&self, snapshot: &RemoteSnapshot) {
        let decision = {
            let view = self.view.lock();
            resolve_pads(snapshot, view.scene_name.as_deref(), &self.pad_cache.lock())
        };

        let mut view = self.view.lock();
        view.scenes = snapshot.scenes.clone().unwrap_or_default();
        view.recording_active = snapshot.recording_active;
        view.scene_name = snapshot.scene_name.clone();

        match decision {
            PadsDecision::UseNew => {
                view.pads = snapshot.pads.clone();
                if let Some(scene) = &snapshot.scene_name {
                    self.pad_cache
                        .lock()
                        .insert(scene.clone(), snapshot.pads.clone());
                }
            }
            PadsDecision::UseCached(pads) => view.pads = pads,
            PadsDecision::KeepCurrent => {}
            PadsDecision::Clear => view.pads.clear(),
        }
    }

    /// Tap a pad: optimistic activity, immediate command
    pub async fn tap(&self, pad: usize) {
        let Some(addr) = self.view.lock().endpoint else {
            return;
        };

        if let Err(e) = Self::request(
            addr,
            &GatewayRequest::Tap { pad },
            self.config.request_timeout,
        )
        .await
        {
            warn!("tap failed: {:#}", e);
        }
    }

    /// Drag a pad's value. Applies the optimistic local update, throttles
    /// the network push latest-value-wins, and sends zero-edge drags
    /// immediately alongside the throttled stream.
    pub async fn set_value(&self, pad: usize, normalized: f32) {
        let normalized = normalized.clamp(0.0, 1.0);

        // Optimistic local update, reconciled by the next snapshot
        {
            let mut view = self.view.lock();
            if let Some(entry) = view.pads.iter_mut().find(|p| p.id == pad) {
                entry.normalized_value = Some(normalized);
            }
        }

        let Some(addr) = self.view.lock().endpoint else {
            return;
        };

        // Zero is a tap-equivalent edge: push it immediately
        let send_now = if normalized == 0.0 {
            self.throttle.lock().offer(pad, normalized, Instant::now());
            Some((pad, normalized))
        } else {
            self.throttle.lock().offer(pad, normalized, Instant::now())
        };

        if let Some((pad, value)) = send_now {
            self.push_value(addr, pad, value).await;
        }
    }

    /// Flush a throttled value once its interval elapses. The embedding UI
    /// calls this from its frame timer.
    pub async fn flush_pending_value(&self) {
        let Some(addr) = self.view.lock().endpoint else {
            return;
        };
        let drained = self.throttle.lock().drain(Instant::now());
        if let Some((pad, value)) = drained {
            self.push_value(addr, pad, value).await;
        }
    }

    async fn push_value(&self, addr: SocketAddr, pad: usize, normalized: f32) {
        if let Err(e) = Self::request(
            addr,
            &GatewayRequest::SetValue { pad, normalized },
            self.config.request_timeout,
        )
        .await
        {
            warn!("set_value push failed: {:#}", e);
        }
    }
}
