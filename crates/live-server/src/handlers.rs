//! Connection handlers for the Live server.
//!
//! Each WebSocket connection runs a reader task that decodes frames and a
//! main loop that dispatches them and writes replies and channel events
//! back. When the socket closes the connection's cancellation token fires,
//! aborting any handler call still in flight.

use crate::api;
use crate::config::Config;
use crate::identity::Caller;
use crate::metrics::{self, ConnectionMetricsGuard, Outcome};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use live_protocol::{codec, codes, Frame, PublicationData};
use serde_bytes::ByteBuf;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tenvis_live_core::{
    CallContext, DispatchError, Hub, HubEvent, PublishOutcome, RegistryError, SignedInUser,
    Status, SubscribeOutcome,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Inbound frames buffered between the reader task and the main loop.
const INBOUND_QUEUE: usize = 64;
/// Hub events queued for the socket writer. Past this, subscriptions lag
/// on their broadcast channel and skip ahead.
const OUTBOUND_QUEUE: usize = 256;

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .merge(api::routes())
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config).await?);
    spawn_sweeper(
        state.hub().clone(),
        Duration::from_millis(state.config.limits.sweep_interval_ms),
    );

    let ws_path = state.config.transport.websocket_path.clone();
    let app = router(state);
    let listener = TcpListener::bind(addr).await?;

    info!("Live server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, ws_path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically expire history and drop idle channels.
fn spawn_sweeper(hub: Arc<Hub>, every: Duration) {
    if every.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            hub.sweep();
            metrics::set_active_channels(hub.stats().channel_count);
        }
    });
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, user, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, user: SignedInUser, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = format!(
        "conn_{}",
        NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
    );
    debug!(
        connection = %connection_id,
        org_id = user.org_id,
        user = user.user_id,
        "WebSocket connected"
    );

    let (mut sender, receiver) = socket.split();

    let connected = Frame::connected(&connection_id, state.config.heartbeat.interval_ms);
    if send_frame(&mut sender, &connected).await.is_err() {
        error!(connection = %connection_id, "Failed to send Connected frame");
        return;
    }

    let cancel = CancellationToken::new();
    let (frame_tx, mut frame_rx) = mpsc::channel(INBOUND_QUEUE);
    let reader = tokio::spawn(read_frames(
        receiver,
        frame_tx,
        cancel.clone(),
        connection_id.clone(),
    ));

    let (event_tx, mut event_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let mut connection = Connection {
        id: connection_id,
        user,
        state,
        cancel,
        subscriptions: HashMap::new(),
        events: event_tx,
    };

    loop {
        tokio::select! {
            biased;

            Some((channel, event)) = event_rx.recv() => {
                let frame = event_frame(channel, &event);
                if send_frame(&mut sender, &frame).await.is_err() {
                    break;
                }
            }

            frame = frame_rx.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                let start = Instant::now();
                if let Some(reply) = connection.handle_frame(frame).await {
                    if send_frame(&mut sender, &reply).await.is_err() {
                        break;
                    }
                }
                metrics::record_latency(start.elapsed().as_secs_f64());
            }
        }
    }

    reader.abort();
    connection.close();
}

/// Decode frames off the socket until it closes.
async fn read_frames(
    mut receiver: SplitStream<WebSocket>,
    frames: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    connection_id: String,
) {
    let mut read_buffer = BytesMut::with_capacity(4096);

    'socket: while let Some(msg) = receiver.next().await {
        let data = match msg {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Close(_)) => {
                debug!(connection = %connection_id, "Received close frame");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "WebSocket error");
                metrics::record_error("websocket");
                break;
            }
        };

        metrics::record_message(data.len(), "inbound");
        read_buffer.extend_from_slice(&data);

        loop {
            match codec::decode_from(&mut read_buffer) {
                Ok(Some(frame)) => {
                    if frames.send(frame).await.is_err() {
                        break 'socket;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Undecodable frame, closing");
                    metrics::record_error("decode");
                    break 'socket;
                }
            }
        }
    }

    cancel.cancel();
}

/// Per-connection dispatch state.
struct Connection {
    id: String,
    user: SignedInUser,
    state: Arc<AppState>,
    cancel: CancellationToken,
    /// Tasks forwarding hub events, keyed by channel.
    subscriptions: HashMap<String, JoinHandle<()>>,
    events: mpsc::Sender<(String, Arc<HubEvent>)>,
}

impl Connection {
    fn context(&self) -> CallContext {
        CallContext::child_of(&self.id, &self.cancel)
    }

    /// Handle a decoded frame, returning the reply to send, if any.
    async fn handle_frame(&mut self, frame: Frame) -> Option<Frame> {
        match frame {
            Frame::Subscribe { id, channel, data } => Some(self.subscribe(id, channel, data).await),

            Frame::Unsubscribe { id, channel } => Some(self.unsubscribe(id, &channel)),

            Frame::Publish {
                id,
                channel,
                payload,
            } => self.publish(id, channel, payload).await,

            Frame::Ping { timestamp } => Some(Frame::pong(timestamp)),

            Frame::Pong { .. } => None,

            Frame::Connect { version } => {
                debug!(connection = %self.id, version, "Connect frame (already connected)");
                None
            }

            other => {
                warn!(connection = %self.id, frame_type = ?other.frame_type(), "Unexpected frame type");
                Some(Frame::error(0, codes::BAD_REQUEST, "Unexpected frame type"))
            }
        }
    }

    async fn subscribe(&mut self, id: u64, channel: String, data: Option<ByteBuf>) -> Frame {
        debug!(connection = %self.id, channel = %channel, "Subscribe request");

        let ctx = self.context();
        let data = data.map(|d| Bytes::from(d.into_vec()));
        let outcome = self
            .state
            .dispatcher
            .subscribe(&ctx, &self.user, &channel, data)
            .await;

        match outcome {
            Ok(SubscribeOutcome::Subscribed {
                reply,
                subscription,
            }) => {
                metrics::record_subscribe(Outcome::Ok);
                let publications = subscription
                    .recovered
                    .iter()
                    .map(|m| PublicationData {
                        offset: m.offset,
                        payload: m.data.to_vec(),
                    })
                    .collect();
                self.forward_events(channel.clone(), subscription.receiver);
                metrics::set_active_channels(self.state.hub().stats().channel_count);

                Frame::Subscribed {
                    id,
                    channel,
                    data: reply.data.map(|d| ByteBuf::from(d.to_vec())),
                    publications,
                }
            }
            Ok(SubscribeOutcome::Rejected(status)) => {
                let (code, outcome) = rejection(status);
                metrics::record_subscribe(outcome);
                Frame::error(id, code, format!("Subscribe rejected: {channel}"))
            }
            Err(e) => {
                metrics::record_subscribe(Outcome::Error);
                warn!(connection = %self.id, channel = %channel, error = %e, "Subscribe failed");
                Frame::error(id, error_code(&e), e.to_string())
            }
        }
    }

    fn unsubscribe(&mut self, id: u64, channel: &str) -> Frame {
        debug!(connection = %self.id, channel = %channel, "Unsubscribe request");

        if let Some(handle) = self.subscriptions.remove(channel) {
            handle.abort();
        }

        match self
            .state
            .dispatcher
            .unsubscribe(&self.id, self.user.org_id, channel)
        {
            Ok(()) => {
                metrics::set_active_channels(self.state.hub().stats().channel_count);
                Frame::ack(id)
            }
            Err(e) => Frame::error(id, error_code(&e), e.to_string()),
        }
    }

    async fn publish(&mut self, id: Option<u64>, channel: String, payload: Vec<u8>) -> Option<Frame> {
        let ctx = self.context();
        let outcome = self
            .state
            .dispatcher
            .publish(&ctx, &self.user, &channel, Bytes::from(payload))
            .await;

        match outcome {
            Ok(PublishOutcome::Published { recipients, .. }) => {
                metrics::record_publish(Outcome::Ok);
                debug!(connection = %self.id, channel = %channel, recipients, "Published");
                id.map(Frame::ack)
            }
            Ok(PublishOutcome::Rejected(status)) => {
                let (code, outcome) = rejection(status);
                metrics::record_publish(outcome);
                Some(Frame::error(
                    id.unwrap_or(0),
                    code,
                    format!("Publish rejected: {channel}"),
                ))
            }
            Err(e) => {
                metrics::record_publish(Outcome::Error);
                warn!(connection = %self.id, channel = %channel, error = %e, "Publish failed");
                Some(Frame::error(id.unwrap_or(0), error_code(&e), e.to_string()))
            }
        }
    }

    /// Pump a hub receiver into the connection's event queue.
    fn forward_events(&mut self, channel: String, rx: broadcast::Receiver<Arc<HubEvent>>) {
        let handle = tokio::spawn(pump_events(channel.clone(), rx, self.events.clone()));
        if let Some(previous) = self.subscriptions.insert(channel, handle) {
            previous.abort();
        }
    }

    fn close(self) {
        self.cancel.cancel();
        for (_, handle) in self.subscriptions {
            handle.abort();
        }
        let dropped = self.state.dispatcher.disconnect(&self.id);
        metrics::set_active_channels(self.state.hub().stats().channel_count);
        debug!(connection = %self.id, subscriptions = dropped, "WebSocket disconnected");
    }
}

/// Move one subscription's hub events onto the connection's outbound queue.
///
/// Waits when the queue is full, so a slow socket makes the broadcast
/// receiver lag instead of buffering without limit.
async fn pump_events(
    channel: String,
    mut rx: broadcast::Receiver<Arc<HubEvent>>,
    tx: mpsc::Sender<(String, Arc<HubEvent>)>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if tx.send((channel.clone(), event)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(channel = %channel, skipped, "Subscriber lagged");
                metrics::record_error("lagged");
            }
        }
    }
}

/// Frame pushed to a subscriber for a hub event.
fn event_frame(channel: String, event: &HubEvent) -> Frame {
    match event {
        HubEvent::Publication(message) => {
            Frame::publication(channel, message.offset, message.data.to_vec())
        }
        HubEvent::Join(info) => Frame::Join {
            channel,
            info: info.clone(),
        },
        HubEvent::Leave(info) => Frame::Leave {
            channel,
            info: info.clone(),
        },
    }
}

fn rejection(status: Status) -> (u16, Outcome) {
    match status {
        Status::NotFound => (codes::NOT_FOUND, Outcome::NotFound),
        Status::Denied | Status::Ok => (codes::DENIED, Outcome::Denied),
    }
}

/// Wire error code for a dispatch failure.
fn error_code(e: &DispatchError) -> u16 {
    match e {
        DispatchError::InvalidChannel(_) | DispatchError::Hub(_) => codes::BAD_REQUEST,
        DispatchError::Resolution(RegistryError::UnknownNamespace { .. }) => {
            codes::UNKNOWN_CHANNEL
        }
        DispatchError::Resolution(RegistryError::UnknownPath(_)) => codes::NOT_FOUND,
        DispatchError::Handler(_) | DispatchError::Cancelled => codes::INTERNAL,
    }
}

/// Send a frame to the WebSocket.
async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<()> {
    let data = codec::encode(frame)?;
    metrics::record_message(data.len(), "outbound");
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{LOGIN_HEADER, ORG_ID_HEADER, ROLE_HEADER, USER_ID_HEADER};
    use live_protocol::{ChannelError, ClientInfo, Scope};
    use std::net::SocketAddr;
    use tenvis_live_core::{HubError, LiveMessage};
    use tenvis_live_store::{ConfigStore, MemoryBackend, XChaChaSecrets};
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    async fn serve() -> SocketAddr {
        let store = Arc::new(ConfigStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(XChaChaSecrets::new([5u8; 32])),
        ));
        let state = Arc::new(AppState::with_store(Config::default(), store));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr
    }

    async fn connect(addr: SocketAddr, user_id: &str, role: &str) -> Client {
        let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
        let headers = request.headers_mut();
        headers.insert(ORG_ID_HEADER, "1".parse().unwrap());
        headers.insert(USER_ID_HEADER, user_id.parse().unwrap());
        headers.insert(LOGIN_HEADER, format!("user{user_id}").parse().unwrap());
        headers.insert(ROLE_HEADER, role.parse().unwrap());

        let (mut client, _) = connect_async(request).await.unwrap();
        match recv(&mut client).await {
            Frame::Connected { .. } => client,
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    async fn send(client: &mut Client, frame: &Frame) {
        let data = codec::encode(frame).unwrap();
        client.send(WsMessage::Binary(data.to_vec())).await.unwrap();
    }

    async fn recv(client: &mut Client) -> Frame {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for frame")
                .unwrap()
                .unwrap();
            if let WsMessage::Binary(data) = msg {
                return codec::decode(&data).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_broadcast_between_clients_with_recovery() {
        let addr = serve().await;
        let mut editor = connect(addr, "1", "Editor").await;
        let mut viewer = connect(addr, "2", "Viewer").await;

        send(&mut editor, &Frame::publish_with_ack(1, "core/broadcast/room", b"first".to_vec())).await;
        assert_eq!(recv(&mut editor).await, Frame::ack(1));

        send(&mut viewer, &Frame::subscribe(7, "core/broadcast/room")).await;
        match recv(&mut viewer).await {
            Frame::Subscribed { id, publications, .. } => {
                assert_eq!(id, 7);
                assert_eq!(publications.len(), 1);
                assert_eq!(publications[0].payload, b"first");
            }
            other => panic!("expected Subscribed, got {other:?}"),
        }

        send(&mut editor, &Frame::publish("core/broadcast/room", b"second".to_vec())).await;
        match recv(&mut viewer).await {
            Frame::Publication { channel, publication } => {
                assert_eq!(channel, "core/broadcast/room");
                assert_eq!(publication.offset, 2);
                assert_eq!(publication.payload, b"second");
            }
            other => panic!("expected Publication, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejections_carry_codes() {
        let addr = serve().await;
        let mut viewer = connect(addr, "2", "Viewer").await;

        send(&mut viewer, &Frame::publish_with_ack(1, "core/broadcast/room", b"x".to_vec())).await;
        assert!(matches!(recv(&mut viewer).await, Frame::Error { id: 1, code: codes::DENIED, .. }));

        send(&mut viewer, &Frame::subscribe(2, "core/dashboard/gitops")).await;
        assert!(matches!(recv(&mut viewer).await, Frame::Error { id: 2, code: codes::DENIED, .. }));

        send(&mut viewer, &Frame::subscribe(3, "core/dashboard/nope")).await;
        assert!(matches!(recv(&mut viewer).await, Frame::Error { id: 3, code: codes::NOT_FOUND, .. }));

        send(&mut viewer, &Frame::subscribe(4, "plugin/unknown/x")).await;
        assert!(matches!(
            recv(&mut viewer).await,
            Frame::Error { id: 4, code: codes::UNKNOWN_CHANNEL, .. }
        ));

        send(&mut viewer, &Frame::subscribe(5, "bogus")).await;
        assert!(matches!(recv(&mut viewer).await, Frame::Error { id: 5, code: codes::BAD_REQUEST, .. }));
    }

    #[tokio::test]
    async fn test_dashboard_join_and_leave() {
        let addr = serve().await;
        let mut first = connect(addr, "1", "Viewer").await;
        send(&mut first, &Frame::subscribe(1, "core/dashboard/uid/abc")).await;
        assert!(matches!(recv(&mut first).await, Frame::Subscribed { .. }));

        let mut second = connect(addr, "2", "Viewer").await;
        send(&mut second, &Frame::subscribe(1, "core/dashboard/uid/abc")).await;
        assert!(matches!(recv(&mut second).await, Frame::Subscribed { .. }));

        match recv(&mut first).await {
            Frame::Join { info, .. } => assert_eq!(info.user_id, 2),
            other => panic!("expected Join, got {other:?}"),
        }

        second.close(None).await.unwrap();
        match recv(&mut first).await {
            Frame::Leave { info, .. } => assert_eq!(info.login, "user2"),
            other => panic!("expected Leave, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_identity_is_refused() {
        let addr = serve().await;
        let request = format!("ws://{addr}/ws").into_client_request().unwrap();
        assert!(connect_async(request).await.is_err());
    }

    #[test]
    fn test_error_codes() {
        let invalid = DispatchError::InvalidChannel(ChannelError::Empty);
        assert_eq!(error_code(&invalid), codes::BAD_REQUEST);

        let unclaimed = DispatchError::Resolution(RegistryError::UnknownNamespace {
            scope: Scope::Plugin,
            namespace: "x".to_string(),
        });
        assert_eq!(error_code(&unclaimed), codes::UNKNOWN_CHANNEL);

        let hub = DispatchError::Hub(HubError::MaxSubscriptionsReached);
        assert_eq!(error_code(&hub), codes::BAD_REQUEST);
        assert_eq!(error_code(&DispatchError::Cancelled), codes::INTERNAL);
    }

    #[test]
    fn test_event_frames() {
        let info = ClientInfo {
            client_id: "c".to_string(),
            user_id: 1,
            login: "ann".to_string(),
        };
        let frame = event_frame("core/a/b".to_string(), &HubEvent::Leave(info.clone()));
        assert_eq!(
            frame,
            Frame::Leave {
                channel: "core/a/b".to_string(),
                info
            }
        );
    }

    #[tokio::test]
    async fn test_slow_socket_lags_instead_of_buffering() {
        let (hub_tx, hub_rx) = broadcast::channel(4);
        let (tx, mut rx) = mpsc::channel(2);

        // Nothing drains the queue while all twenty are published.
        for offset in 1..=20u64 {
            let message = LiveMessage {
                offset,
                org_id: 1,
                channel: "core/broadcast/room".to_string(),
                data: Bytes::new(),
                published: chrono::Utc::now(),
            };
            hub_tx.send(Arc::new(HubEvent::Publication(message))).unwrap();
        }
        drop(hub_tx);
        let pump = tokio::spawn(pump_events("core/broadcast/room".to_string(), hub_rx, tx));

        let mut offsets = Vec::new();
        while let Some((_, event)) = rx.recv().await {
            if let HubEvent::Publication(message) = &*event {
                offsets.push(message.offset);
            }
        }
        assert_eq!(offsets, vec![17, 18, 19, 20]);
        pump.await.unwrap();
    }
}
