//! # WebSocket Speech Streaming Handler
//!
//! Each WebSocket connection is one speech session. Clients connect to `/ws`,
//! send control messages as JSON text frames and audio as binary frames.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the server registers a session and replies
//!    `{"event":"status","data":{"status":"connected"}}`
//! 2. **Start**: `{"event":"start_recognition"}` opens a decoder
//! 3. **Audio Streaming**: binary frames of 16-bit LE mono PCM
//! 4. **Results**: `recognized` events with partial and final text
//! 5. **Stop**: `{"event":"stop_recognition"}` discards the decoder
//! 6. **Close**: the session and any decoder are released
//!
//! ## Ordering:
//! Every event is dispatched on the blocking pool through `ctx.wait`, which
//! suspends this actor's stream until the dispatch returns. Events from one
//! connection are therefore handled strictly in arrival order, and replies go
//! out in the same order, while decoding never blocks the arbiter thread.

use crate::audio::registry::RegistryError;
use crate::audio::session::ConnectionId;
use crate::config::AppConfig;
use crate::router::{EventRouter, InboundEvent, OutboundEvent};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Control messages a client sends as text frames.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    StartRecognition,
    StopRecognition,
}

impl From<ClientMessage> for InboundEvent {
    fn from(message: ClientMessage) -> Self {
        match message {
            ClientMessage::StartRecognition => InboundEvent::StartRecognition,
            ClientMessage::StopRecognition => InboundEvent::StopRecognition,
        }
    }
}

/// WebSocket actor driving one speech session.
pub struct SpeechWebSocket {
    id: ConnectionId,
    router: Arc<EventRouter>,

    /// Set once the registry accepted this connection; only then is a
    /// disconnect dispatched on close.
    registered: bool,

    last_heartbeat: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl SpeechWebSocket {
    pub fn new(id: ConnectionId, router: Arc<EventRouter>, config: &AppConfig) -> Self {
        Self {
            id,
            router,
            registered: false,
            last_heartbeat: Instant::now(),
            heartbeat_interval: config.heartbeat_interval(),
            client_timeout: config.client_timeout(),
        }
    }

    fn send(&self, event: &OutboundEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match event.to_json() {
            Ok(json) => ctx.text(json),
            Err(err) => error!(connection = %self.id, "Failed to encode outbound event: {}", err),
        }
    }

    /// Route one event off the arbiter thread, holding back every later
    /// message from this connection until it completes.
    fn dispatch(&mut self, event: InboundEvent, ctx: &mut ws::WebsocketContext<Self>) {
        let router = self.router.clone();
        let id = self.id.clone();
        let name = event.name();

        let work = web::block(move || router.dispatch(&id, event));

        ctx.wait(work.into_actor(self).map(move |result, act, ctx| match result {
            Ok(Ok(Some(outbound))) => act.send(&outbound, ctx),
            Ok(Ok(None)) => {}
            Ok(Err(err)) => {
                warn!(connection = %act.id, event = name, "Dispatch rejected: {}", err);
            }
            Err(err) => {
                error!(connection = %act.id, event = name, "Dispatch worker failed: {}", err);
                ctx.stop();
            }
        }));
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.dispatch(message.into(), ctx),
            Err(err) => {
                debug!(connection = %self.id, "Unparseable control message: {}", err);
                let event = OutboundEvent::error("invalid_message", format!("Invalid message: {}", err));
                self.send(&event, ctx);
            }
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(connection = %act.id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn reject(&self, err: RegistryError, ctx: &mut ws::WebsocketContext<Self>) {
        let (code, close_code) = rejection(&err);
        self.send(&OutboundEvent::error(code, err.to_string()), ctx);
        ctx.close(Some(ws::CloseReason {
            code: close_code,
            description: Some(err.to_string()),
        }));
        ctx.stop();
    }
}

/// Error code and close code sent to a connection the registry refused.
///
/// Only a full server is worth retrying later (1013); a reused id is a
/// protocol violation (1008).
fn rejection(err: &RegistryError) -> (&'static str, ws::CloseCode) {
    match err {
        RegistryError::CapacityReached(_) => ("capacity_reached", ws::CloseCode::Again),
        RegistryError::DuplicateSession(_) => ("duplicate_session", ws::CloseCode::Policy),
    }
}

impl Actor for SpeechWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Registers the session before any client frame is read.
    fn started(&mut self, ctx: &mut Self::Context) {
        match self.router.dispatch(&self.id, InboundEvent::Connect) {
            Ok(reply) => {
                self.registered = true;
                if let Some(event) = reply {
                    self.send(&event, ctx);
                }
                self.start_heartbeat(ctx);
            }
            Err(err) => self.reject(err, ctx),
        }
    }

    /// Runs on every close path, so the decoder is always released here.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if !self.registered {
            return;
        }
        if let Err(err) = self.router.dispatch(&self.id, InboundEvent::Disconnect) {
            warn!(connection = %self.id, "Disconnect failed: {}", err);
        }
        self.registered = false;
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SpeechWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => self.handle_text(&text, ctx),
            Ok(ws::Message::Binary(data)) => {
                self.dispatch(InboundEvent::AudioData(data.to_vec()), ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection = %self.id, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection = %self.id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection = %self.id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// WebSocket endpoint handler.
///
/// Mints the connection id and upgrades the request. The codec's frame limit
/// sits above the audio frame limit (see `AppConfig::ws_frame_limit`), so an
/// oversized PCM frame is rejected by frame validation and only that frame is
/// lost.
pub async fn speech_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let config = app_state.get_config();
    let actor = SpeechWebSocket::new(ConnectionId::new(), app_state.router.clone(), config);

    info!(
        connection = %actor.id,
        peer = ?req.connection_info().peer_addr(),
        "New WebSocket connection"
    );

    ws::WsResponseBuilder::new(actor, &req, stream)
        .frame_size(config.ws_frame_limit())
        .start()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::testing::{word_frame, CountingFactory};
    use actix_web::{App, HttpServer};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio_tungstenite::tungstenite::Message;

    #[test]
    fn test_client_message_parsing() {
        let start: ClientMessage = serde_json::from_str(r#"{"event":"start_recognition"}"#).unwrap();
        assert_eq!(start, ClientMessage::StartRecognition);

        let stop: ClientMessage =
            serde_json::from_str(r#"{"event":"stop_recognition","data":{}}"#).unwrap();
        assert_eq!(stop, ClientMessage::StopRecognition);

        assert!(serde_json::from_str::<ClientMessage>(r#"{"event":"audio_data"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("start").is_err());
    }

    /// Serve `/ws` on an ephemeral port; returns the URL and the shared state.
    fn spawn_server(max_sessions: usize) -> (String, AppState, actix_web::dev::ServerHandle) {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = max_sessions;
        spawn_server_with(config, CountingFactory::new())
    }

    fn spawn_server_with(
        config: AppConfig,
        factory: CountingFactory,
    ) -> (String, AppState, actix_web::dev::ServerHandle) {
        let state = AppState::new(config, Arc::new(factory));

        let app_state = state.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(app_state.clone()))
                .route("/ws", web::get().to(speech_websocket))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        (format!("ws://{}/ws", addr), state, handle)
    }

    /// Poll `condition` for up to `limit`.
    async fn eventually(limit: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            actix_web::rt::time::sleep(Duration::from_millis(50)).await;
        }
        condition()
    }

    /// Next text frame as JSON, skipping control frames.
    async fn next_json<S>(socket: &mut S) -> Value
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended unexpectedly: {:?}", other),
            }
        }
    }

    #[test]
    fn test_rejection_close_codes() {
        let id = ConnectionId::new();
        assert_eq!(
            rejection(&RegistryError::CapacityReached(4)),
            ("capacity_reached", ws::CloseCode::Again)
        );
        assert_eq!(
            rejection(&RegistryError::DuplicateSession(id)),
            ("duplicate_session", ws::CloseCode::Policy)
        );
    }

    #[actix_web::test]
    async fn test_recognition_over_websocket() {
        let (url, state, handle) = spawn_server(4);
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        assert_eq!(
            next_json(&mut socket).await,
            json!({"event": "status", "data": {"status": "connected"}})
        );

        socket
            .send(Message::Text(r#"{"event":"start_recognition"}"#.to_string()))
            .await
            .unwrap();
        for word in ["testing", "one", "two."] {
            socket.send(Message::Binary(word_frame(word))).await.unwrap();
        }
        socket
            .send(Message::Text(r#"{"event":"stop_recognition"}"#.to_string()))
            .await
            .unwrap();

        let expected = [
            json!({"event": "status", "data": {"status": "listening"}}),
            json!({"event": "recognized", "data": {"text": "testing", "final": false}}),
            json!({"event": "recognized", "data": {"text": "testing one", "final": false}}),
            json!({"event": "recognized", "data": {"text": "testing one two", "final": true}}),
            json!({"event": "status", "data": {"status": "stopped"}}),
        ];
        for event in expected {
            assert_eq!(next_json(&mut socket).await, event);
        }
        assert_eq!(state.router.registry().len(), 1);

        socket.close(None).await.unwrap();
        // Drain until the server finishes the close handshake.
        while socket.next().await.is_some() {}
        actix_web::rt::time::sleep(Duration::from_millis(50)).await;
        assert!(state.router.registry().is_empty());

        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_invalid_control_message_keeps_connection() {
        let (url, _state, handle) = spawn_server(4);
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        next_json(&mut socket).await;

        socket.send(Message::Text("not json".to_string())).await.unwrap();
        let error = next_json(&mut socket).await;
        assert_eq!(error["event"], "error");
        assert_eq!(error["data"]["code"], "invalid_message");

        socket
            .send(Message::Text(r#"{"event":"stop_recognition"}"#.to_string()))
            .await
            .unwrap();
        assert_eq!(
            next_json(&mut socket).await,
            json!({"event": "status", "data": {"status": "stopped"}})
        );

        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_connection_over_capacity_is_rejected() {
        let (url, state, handle) = spawn_server(1);
        let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        next_json(&mut first).await;

        let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let error = next_json(&mut second).await;
        assert_eq!(error["event"], "error");
        assert_eq!(error["data"]["code"], "capacity_reached");
        assert_eq!(state.router.registry().len(), 1);
        assert_eq!(state.router.metrics().connections_rejected, 1);

        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_oversized_frame_keeps_session_open() {
        let mut config = AppConfig::default();
        config.audio.max_frame_bytes = 16;
        let factory = CountingFactory::with_format(config.frame_format());
        let (url, state, handle) = spawn_server_with(config, factory);
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        next_json(&mut socket).await;

        socket
            .send(Message::Text(r#"{"event":"start_recognition"}"#.to_string()))
            .await
            .unwrap();
        socket.send(Message::Binary(vec![1u8; 18])).await.unwrap();
        socket.send(Message::Binary(word_frame("hi"))).await.unwrap();

        assert_eq!(
            next_json(&mut socket).await,
            json!({"event": "status", "data": {"status": "listening"}})
        );
        assert_eq!(
            next_json(&mut socket).await,
            json!({"event": "recognized", "data": {"text": "hi", "final": false}})
        );
        assert_eq!(state.router.registry().len(), 1);
        assert_eq!(state.router.metrics().invalid_frames, 1);

        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_dropped_connection_releases_decoder() {
        let factory = CountingFactory::new();
        let (url, state, handle) = spawn_server_with(AppConfig::default(), factory.clone());
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        next_json(&mut socket).await;

        socket
            .send(Message::Text(r#"{"event":"start_recognition"}"#.to_string()))
            .await
            .unwrap();
        socket.send(Message::Binary(word_frame("hello"))).await.unwrap();
        next_json(&mut socket).await;
        assert_eq!(next_json(&mut socket).await["event"], "recognized");
        assert_eq!(factory.live(), 1);

        // No close frame: the TCP stream just ends.
        drop(socket);

        let registry = state.router.registry();
        assert!(eventually(Duration::from_secs(2), || registry.is_empty() && factory.live() == 0).await);

        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_silent_client_times_out() {
        let mut config = AppConfig::default();
        config.server.heartbeat_interval_secs = 1;
        config.server.client_timeout_secs = 2;
        let factory = CountingFactory::new();
        let (url, state, handle) = spawn_server_with(config, factory.clone());
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        next_json(&mut socket).await;

        socket
            .send(Message::Text(r#"{"event":"start_recognition"}"#.to_string()))
            .await
            .unwrap();
        assert_eq!(
            next_json(&mut socket).await,
            json!({"event": "status", "data": {"status": "listening"}})
        );
        assert_eq!(factory.live(), 1);

        // The socket is no longer read, so server pings go unanswered.
        let registry = state.router.registry();
        assert!(eventually(Duration::from_secs(6), || registry.is_empty() && factory.live() == 0).await);

        drop(socket);
        handle.stop(true).await;
    }
}
