//! OBS control-plane session: socket lifecycle and request correlation
//!
//! The session owns its private serial task: socket I/O, request
//! bookkeeping and cache mutation all happen here. The rest of the system
//! talks to it through the command channel (fire-and-forget submissions)
//! and reads the shared [`BridgeCache`] directly.
//!
//! Connection state machine:
//! `Disconnected -> Connecting -> HelloReceived -> Identified`. Outbound
//! requests queue while not identified and flush FIFO on Identified. A
//! disconnected session does not retry on a timer; it reconnects lazily on
//! the next outbound demand.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::cache::{BridgeCache, SceneEntry};
use super::protocol::{
    auth_response, decode_frame, identify_frame, request_frame, RequestResponseData, ServerMessage,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    HelloReceived,
    Identified,
}

/// Response handler: runs on the session task, may enqueue follow-ups
pub(crate) type ResponseHandler =
    Box<dyn FnOnce(&RequestResponseData, &BridgeCache) -> Vec<OutboundRequest> + Send>;

/// An outbound request before it gets a correlation id
pub(crate) struct OutboundRequest {
    pub request_type: String,
    pub request_data: Option<Value>,
    /// Quiet requests skip success/failure logging (polling-style calls)
    pub quiet: bool,
    pub on_response: Option<ResponseHandler>,
}

impl OutboundRequest {
    pub fn new(request_type: &str, request_data: Option<Value>) -> Self {
        Self {
            request_type: request_type.to_string(),
            request_data,
            quiet: false,
            on_response: None,
        }
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn with_handler(mut self, handler: ResponseHandler) -> Self {
        self.on_response = Some(handler);
        self
    }
}

/// Commands accepted by the session task
pub(crate) enum BridgeCommand {
    Submit(OutboundRequest),
    Reconnect,
    Shutdown,
}

struct PendingRequest {
    request_type: String,
    quiet: bool,
    on_response: Option<ResponseHandler>,
}

/// Session configuration (host/port/credential record)
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl SessionConfig {
    fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

pub(crate) struct Session {
    config: SessionConfig,
    cache: Arc<BridgeCache>,
    cmd_rx: mpsc::UnboundedReceiver<BridgeCommand>,
    state: ConnectionState,
    pending: HashMap<String, PendingRequest>,
    queue: VecDeque<OutboundRequest>,
    next_request_id: u64,
    /// Missing-credential warning is emitted once, not per attempt
    auth_warned: bool,
}

impl Session {
    /// Spawn the session task; returns its command channel
    pub fn spawn(
        config: SessionConfig,
        cache: Arc<BridgeCache>,
    ) -> mpsc::UnboundedSender<BridgeCommand> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let session = Session {
            config,
            cache,
            cmd_rx,
            state: ConnectionState::Disconnected,
            pending: HashMap::new(),
            queue: VecDeque::new(),
            next_request_id: 1,
            auth_warned: false,
        };

        tokio::spawn(session.run());
        cmd_tx
    }

    async fn run(mut self) {
        loop {
            // Disconnected: wait for outbound demand before dialing
            let Some(cmd) = self.cmd_rx.recv().await else {
                return;
            };

            match cmd {
                BridgeCommand::Shutdown => return,
                BridgeCommand::Submit(request) => self.queue.push_back(request),
                BridgeCommand::Reconnect => {}
            }

            match self.connect_and_serve().await {
                Ok(shutdown) if shutdown => return,
                Ok(_) => {}
                Err(e) => warn!("OBS session ended: {:#}", e),
            }

            self.teardown();
        }
    }

    /// Dial, handshake and serve until disconnect. Returns `true` when a
    /// shutdown command ended the loop.
    async fn connect_and_serve(&mut self) -> Result<bool> {
        self.state = ConnectionState::Connecting;
        info!(
            "🎬 Connecting to OBS WebSocket at {}:{}",
            self.config.host, self.config.port
        );

        let (mut ws, _) = connect_async(self.config.url())
            .await
            .context("Failed to connect to OBS WebSocket")?;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None | Some(BridgeCommand::Shutdown) => {
                            let _ = ws.close(None).await;
                            return Ok(true);
                        }
                        Some(BridgeCommand::Reconnect) => {
                            info!("🔄 Reconnecting OBS session (settings changed)");
                            let _ = ws.close(None).await;
                            return Ok(false);
                        }
                        Some(BridgeCommand::Submit(request)) => {
                            if self.state == ConnectionState::Identified {
                                self.send_request(&mut ws, request).await?;
                            } else {
                                self.queue.push_back(request);
                            }
                        }
                    }
                }
                msg = ws.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => anyhow::bail!("OBS socket read error: {}", e),
                        None => anyhow::bail!("OBS socket closed by remote"),
                    };

                    match msg {
                        Message::Text(text) => {
                            if !self.handle_frame(&mut ws, &text).await? {
                                return Ok(false);
                            }
                        }
                        Message::Ping(data) => {
                            ws.send(Message::Pong(data)).await.context("pong failed")?;
                        }
                        Message::Close(_) => anyhow::bail!("OBS socket closed by remote"),
                        _ => {}
                    }
                }
            }
        }
    }

    /// Process one decoded frame. Returns `false` to request a clean
    /// disconnect (auth fail-fast).
    async fn handle_frame(&mut self, ws: &mut WsStream, text: &str) -> Result<bool> {
        let message = match decode_frame(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring undecodable OBS frame: {}", e);
                return Ok(true);
            }
        };

        match message {
            ServerMessage::Hello(hello) => {
                debug!(
                    "OBS hello (version {:?}, auth required: {})",
                    hello.obs_web_socket_version,
                    hello.authentication.is_some()
                );

                let authentication = match &hello.authentication {
                    Some(challenge) => match &self.config.password {
                        Some(password) => Some(auth_response(password, challenge)),
                        None => {
                            if !self.auth_warned {
                                warn!(
                                    "⚠️  OBS requires a password but none is configured; \
                                     staying disconnected"
                                );
                                self.auth_warned = true;
                            }
                            self.queue.clear();
                            return Ok(false);
                        }
                    },
                    None => None,
                };

                ws.send(Message::Text(identify_frame(authentication)))
                    .await
                    .context("Failed to send Identify")?;
                self.state = ConnectionState::HelloReceived;
            }

            ServerMessage::Identified => {
                info!("✅ OBS WebSocket identified");
                self.state = ConnectionState::Identified;
                self.auth_warned = false;

                // Flush queued requests in FIFO order, then refresh the catalog
                let queued: Vec<_> = self.queue.drain(..).collect();
                for request in queued {
                    self.send_request(ws, request).await?;
                }
                for request in catalog_requests() {
                    self.send_request(ws, request).await?;
                }
            }

            ServerMessage::Event {
                event_type,
                event_data,
            } => {
                for follow_up in handle_event(&event_type, &event_data, &self.cache) {
                    self.send_request(ws, follow_up).await?;
                }
            }

            ServerMessage::RequestResponse(response) => {
                let Some(pending) = self.pending.remove(&response.request_id) else {
                    debug!("Response for unknown request id {}", response.request_id);
                    return Ok(true);
                };

                if !pending.quiet {
                    if response.request_status.result {
                        debug!("OBS request {} ok", pending.request_type);
                    } else {
                        warn!(
                            "OBS request {} failed: {}",
                            pending.request_type,
                            response
                                .request_status
                                .comment
                                .as_deref()
                                .unwrap_or("(no comment)")
                        );
                    }
                }

                if let Some(handler) = pending.on_response {
                    for follow_up in handler(&response, &self.cache) {
                        self.send_request(ws, follow_up).await?;
                    }
                }
            }
        }

        Ok(true)
    }

    async fn send_request(&mut self, ws: &mut WsStream, request: OutboundRequest) -> Result<()> {
        let request_id = format!("r{}", self.next_request_id);
        self.next_request_id += 1;

        let frame = request_frame(&request.request_type, &request_id, request.request_data);
        self.pending.insert(
            request_id,
            PendingRequest {
                request_type: request.request_type,
                quiet: request.quiet,
                on_response: request.on_response,
            },
        );

        ws.send(Message::Text(frame))
            .await
            .context("Failed to send OBS request")
    }

    /// Clear connection-scoped state. Idempotent; safe on repeated
    /// disconnect paths.
    fn teardown(&mut self) {
        if self.state == ConnectionState::Disconnected && self.pending.is_empty() {
            return;
        }

        self.state = ConnectionState::Disconnected;
        self.pending.clear();
        self.cache.clear_all();
    }
}

/// Initial catalog refresh issued after Identified
fn catalog_requests() -> Vec<OutboundRequest> {
    vec![
        OutboundRequest::new("GetSceneList", None).with_handler(Box::new(seed_scene_list)),
        OutboundRequest::new("GetInputList", None).with_handler(Box::new(seed_input_list)),
        OutboundRequest::new("GetRecordStatus", None).with_handler(Box::new(seed_record_status)),
    ]
}

/// Parse a GetSceneList response into display-ordered entries
fn parse_scene_list(data: &Value) -> Vec<SceneEntry> {
    let Some(scenes) = data.get("scenes").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut entries: Vec<(i64, SceneEntry)> = scenes
        .iter()
        .filter_map(|scene| {
            let name = scene.get("sceneName")?.as_str()?.to_string();
            let uuid = scene.get("sceneUuid")?.as_str()?.to_string();
            let index = scene.get("sceneIndex").and_then(Value::as_i64).unwrap_or(0);
            Some((index, SceneEntry { uuid, name }))
        })
        .collect();

    // sceneIndex counts from the bottom of the OBS list; sort descending to
    // get display order
    entries.sort_by_key(|(index, _)| -index);
    entries.into_iter().map(|(_, entry)| entry).collect()
}

pub(crate) fn seed_scene_list(response: &RequestResponseData, cache: &BridgeCache) -> Vec<OutboundRequest> {
    let Some(data) = &response.response_data else {
        return Vec::new();
    };

    cache.set_scene_list(parse_scene_list(data));

    if let (Some(uuid), Some(name)) = (
        data.get("currentProgramSceneUuid").and_then(Value::as_str),
        data.get("currentProgramSceneName").and_then(Value::as_str),
    ) {
        cache.set_current_scene(uuid.to_string(), name.to_string());
    }

    Vec::new()
}

pub(crate) fn seed_input_list(response: &RequestResponseData, cache: &BridgeCache) -> Vec<OutboundRequest> {
    let Some(data) = &response.response_data else {
        return Vec::new();
    };
    let Some(inputs) = data.get("inputs").and_then(Value::as_array) else {
        return Vec::new();
    };

    let names: Vec<String> = inputs
        .iter()
        .filter_map(|input| input.get("inputName")?.as_str().map(str::to_string))
        .collect();

    // Seed per-input volume/mute state with quiet polling requests
    let follow_ups = names
        .iter()
        .flat_map(|name| {
            let volume_input = name.clone();
            let mute_input = name.clone();
            [
                OutboundRequest::new(
                    "GetInputVolume",
                    Some(serde_json::json!({ "inputName": name })),
                )
                .quiet()
                .with_handler(Box::new(move |resp, cache| {
                    if let Some(mul) = resp
                        .response_data
                        .as_ref()
                        .and_then(|d| d.get("inputVolumeMul"))
                        .and_then(Value::as_f64)
                    {
                        cache.set_volume(&volume_input, mul as f32);
                    }
                    Vec::new()
                })),
                OutboundRequest::new(
                    "GetInputMute",
                    Some(serde_json::json!({ "inputName": name })),
                )
                .quiet()
                .with_handler(Box::new(move |resp, cache| {
                    if let Some(muted) = resp
                        .response_data
                        .as_ref()
                        .and_then(|d| d.get("inputMuted"))
                        .and_then(Value::as_bool)
                    {
                        cache.set_mute(&mute_input, muted);
                    }
                    Vec::new()
                })),
            ]
        })
        .collect();

    cache.set_inputs(names);
    follow_ups
}

pub(crate) fn seed_record_status(response: &RequestResponseData, cache: &BridgeCache) -> Vec<OutboundRequest> {
    if let Some(active) = response
        .response_data
        .as_ref()
        .and_then(|d| d.get("outputActive"))
        .and_then(Value::as_bool)
    {
        cache.set_recording(active);
    }
    Vec::new()
}

/// Apply one push event to the cache; may return follow-up requests
fn handle_event(event_type: &str, data: &Value, cache: &BridgeCache) -> Vec<OutboundRequest> {
    match event_type {
        "CurrentProgramSceneChanged" => {
            if let (Some(uuid), Some(name)) = (
                data.get("sceneUuid").and_then(Value::as_str),
                data.get("sceneName").and_then(Value::as_str),
            ) {
                cache.set_current_scene(uuid.to_string(), name.to_string());
            }
            Vec::new()
        }
        "InputMuteStateChanged" => {
            if let (Some(input), Some(muted)) = (
                data.get("inputName").and_then(Value::as_str),
                data.get("inputMuted").and_then(Value::as_bool),
            ) {
                cache.set_mute(input, muted);
            }
            Vec::new()
        }
        "InputVolumeChanged" => {
            if let (Some(input), Some(mul)) = (
                data.get("inputName").and_then(Value::as_str),
                data.get("inputVolumeMul").and_then(Value::as_f64),
            ) {
                cache.set_volume(input, mul as f32);
            }
            Vec::new()
        }
        "RecordStateChanged" => {
            if let Some(active) = data.get("outputActive").and_then(Value::as_bool) {
                cache.set_recording(active);
            }
            Vec::new()
        }
        "SceneCreated" | "SceneRemoved" | "SceneNameChanged" => {
            // Catalog shape changed: re-pull the scene list
            vec![OutboundRequest::new("GetSceneList", None)
                .quiet()
                .with_handler(Box::new(seed_scene_list))]
        }
        "SceneItemEnableStateChanged" => {
            // Not modelled beyond invalidation; dependents re-read
            cache.set_scene_list(cache.scenes());
            Vec::new()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_response(request_type: &str, data: Value) -> RequestResponseData {
        RequestResponseData {
            request_type: request_type.to_string(),
            request_id: "r1".to_string(),
            request_status: super::super::protocol::RequestStatus {
                result: true,
                code: Some(100),
                comment: None,
            },
            response_data: Some(data),
        }
    }

    #[test]
    fn test_parse_scene_list_orders_by_descending_index() {
        let data = json!({
            "scenes": [
                { "sceneName": "Outro", "sceneUuid": "u-outro", "sceneIndex": 0 },
                { "sceneName": "Main", "sceneUuid": "u-main", "sceneIndex": 2 },
                { "sceneName": "Intro", "sceneUuid": "u-intro", "sceneIndex": 1 },
            ]
        });

        let scenes = parse_scene_list(&data);
        let names: Vec<_> = scenes.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Main", "Intro", "Outro"]);
    }

    #[test]
    fn test_seed_scene_list_sets_current_scene() {
        let cache = BridgeCache::new();
        let response = make_response(
            "GetSceneList",
            json!({
                "currentProgramSceneName": "Main",
                "currentProgramSceneUuid": "u-main",
                "scenes": [
                    { "sceneName": "Main", "sceneUuid": "u-main", "sceneIndex": 1 },
                    { "sceneName": "Outro", "sceneUuid": "u-outro", "sceneIndex": 0 },
                ]
            }),
        );

        let follow_ups = seed_scene_list(&response, &cache);
        assert!(follow_ups.is_empty());
        assert_eq!(cache.scenes().len(), 2);
        assert_eq!(cache.current_scene().unwrap().uuid, "u-main");
    }

    #[test]
    fn test_seed_input_list_issues_quiet_probes_per_input() {
        let cache = BridgeCache::new();
        let response = make_response(
            "GetInputList",
            json!({
                "inputs": [
                    { "inputName": "Mic" },
                    { "inputName": "Desktop Audio" },
                ]
            }),
        );

        let follow_ups = seed_input_list(&response, &cache);
        assert_eq!(cache.inputs(), vec!["Mic", "Desktop Audio"]);
        // Volume + mute probe per input
        assert_eq!(follow_ups.len(), 4);
        assert!(follow_ups.iter().all(|r| r.quiet));
    }

    #[test]
    fn test_record_event_updates_cache() {
        let cache = BridgeCache::new();
        handle_event("RecordStateChanged", &json!({ "outputActive": true }), &cache);
        assert!(cache.recording());

        handle_event(
            "RecordStateChanged",
            &json!({ "outputActive": false }),
            &cache,
        );
        assert!(!cache.recording());
    }

    #[test]
    fn test_volume_and_mute_events_update_cache() {
        let cache = BridgeCache::new();
        handle_event(
            "InputVolumeChanged",
            &json!({ "inputName": "Mic", "inputVolumeMul": 0.5 }),
            &cache,
        );
        handle_event(
            "InputMuteStateChanged",
            &json!({ "inputName": "Mic", "inputMuted": true }),
            &cache,
        );
        assert_eq!(cache.volume_mul("Mic"), Some(0.5));
        assert!(cache.is_muted("Mic"));
    }

    #[test]
    fn test_scene_created_triggers_catalog_refresh() {
        let cache = BridgeCache::new();
        let follow_ups = handle_event("SceneCreated", &json!({}), &cache);
        assert_eq!(follow_ups.len(), 1);
        assert_eq!(follow_ups[0].request_type, "GetSceneList");
    }
}
