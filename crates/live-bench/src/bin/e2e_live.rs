//! End-to-end benchmark against a running Live server.
//!
//! Drives the handler-mediated paths over real WebSockets:
//!
//! - `fanout`: one editor publishes to `core/broadcast`, viewers receive the
//!   overridden payload.
//! - `recover`: a late subscriber gets the retained publication in its
//!   `Subscribed` frame.
//! - `presence`: viewers join a dashboard and the first one sees every join.
//!
//! Usage: `e2e_live [subscribers] [messages]`

use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use live_protocol::{codec, Frame};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const BROADCAST: &str = "core/broadcast/bench";
const DASHBOARD: &str = "core/dashboard/uid/bench";
const RECOVER_ROUNDS: u64 = 200;
const MAX_IN_FLIGHT: u64 = 256;
const TIMEOUT: Duration = Duration::from_secs(30);

struct Client {
    sink: SplitSink<Ws, Message>,
    stream: SplitStream<Ws>,
    buf: BytesMut,
}

impl Client {
    async fn connect(user_id: usize, role: &str) -> Result<Self, BoxError> {
        let mut request = SERVER_URL.into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("x-live-org-id", "1".parse()?);
        headers.insert("x-live-user-id", user_id.to_string().parse()?);
        headers.insert("x-live-login", format!("bench{user_id}").parse()?);
        headers.insert("x-live-role", role.parse()?);

        let (ws, _) = connect_async(request).await?;
        let (sink, stream) = ws.split();
        let mut client = Self {
            sink,
            stream,
            buf: BytesMut::with_capacity(64 * 1024),
        };
        match client.next().await? {
            Frame::Connected { .. } => Ok(client),
            other => Err(format!("expected connected, got {other:?}").into()),
        }
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), BoxError> {
        let data = codec::encode(frame)?;
        self.sink.send(Message::Binary(data.to_vec())).await?;
        Ok(())
    }

    async fn next(&mut self) -> Result<Frame, BoxError> {
        loop {
            if let Some(frame) = codec::decode_from(&mut self.buf)? {
                return Ok(frame);
            }
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => self.buf.extend_from_slice(&data),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection closed".into()),
            }
        }
    }

    /// Wait for the next acknowledgment.
    async fn wait_ack(&mut self) -> Result<(), BoxError> {
        loop {
            match self.next().await? {
                Frame::Ack { .. } => return Ok(()),
                Frame::Error { code, message, .. } => {
                    return Err(format!("request refused ({code}): {message}").into())
                }
                _ => {}
            }
        }
    }

    /// Subscribe and return the `Subscribed` frame.
    async fn subscribe(&mut self, id: u64, channel: &str) -> Result<Frame, BoxError> {
        self.send(&Frame::subscribe(id, channel)).await?;
        loop {
            match self.next().await? {
                frame @ Frame::Subscribed { .. } => return Ok(frame),
                Frame::Error { code, message, .. } => {
                    return Err(format!("subscribe refused ({code}): {message}").into())
                }
                _ => {}
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let subscribers: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let messages: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10_000);

    println!("Live end-to-end benchmark against {SERVER_URL}");
    println!("  subscribers: {subscribers}, messages: {messages}");
    println!();

    for (name, result) in [
        ("fanout", tokio::time::timeout(TIMEOUT, fanout(subscribers, messages)).await),
        ("recover", tokio::time::timeout(TIMEOUT, recover()).await),
        ("presence", tokio::time::timeout(TIMEOUT, presence(subscribers)).await),
    ] {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("{name}: {e}"),
            Err(_) => eprintln!("{name}: timed out after {TIMEOUT:?}"),
        }
    }
}

async fn fanout(subscribers: usize, messages: u64) -> Result<(), BoxError> {
    let mut readers = Vec::with_capacity(subscribers);
    for i in 0..subscribers {
        let mut client = Client::connect(1000 + i, "Viewer").await?;
        client.subscribe(1, BROADCAST).await?;
        readers.push(tokio::spawn(async move {
            let mut received = 0u64;
            while received < messages {
                if let Frame::Publication { .. } = client.next().await? {
                    received += 1;
                }
            }
            Ok::<_, BoxError>(received)
        }));
    }

    let mut publisher = Client::connect(1, "Editor").await?;
    let payload = vec![0u8; 64];
    let start = Instant::now();
    let mut acked = 0u64;
    for id in 1..=messages {
        publisher
            .send(&Frame::publish_with_ack(id, BROADCAST, payload.clone()))
            .await?;
        // Bound the frames in flight so readers stay within channel capacity.
        while id - acked >= MAX_IN_FLIGHT {
            publisher.wait_ack().await?;
            acked += 1;
        }
    }
    while acked < messages {
        publisher.wait_ack().await?;
        acked += 1;
    }
    let publish_elapsed = start.elapsed();

    let mut delivered = 0u64;
    for reader in readers {
        delivered += reader.await??;
    }
    let elapsed = start.elapsed();

    println!("fanout");
    println!(
        "  publishes:  {messages} in {:.2}s ({:.0} msg/s acked)",
        publish_elapsed.as_secs_f64(),
        messages as f64 / publish_elapsed.as_secs_f64()
    );
    println!(
        "  deliveries: {delivered} in {:.2}s ({:.0} msg/s)",
        elapsed.as_secs_f64(),
        delivered as f64 / elapsed.as_secs_f64()
    );
    Ok(())
}

async fn recover() -> Result<(), BoxError> {
    let mut publisher = Client::connect(1, "Editor").await?;
    publisher
        .send(&Frame::publish_with_ack(1, BROADCAST, b"retained".to_vec()))
        .await?;
    publisher.wait_ack().await?;

    let mut late = Client::connect(2000, "Viewer").await?;
    let mut total = Duration::ZERO;
    for round in 0..RECOVER_ROUNDS {
        let start = Instant::now();
        let subscribed = late.subscribe(round * 2 + 1, BROADCAST).await?;
        total += start.elapsed();

        let Frame::Subscribed { publications, .. } = subscribed else {
            unreachable!("subscribe returns Subscribed");
        };
        if publications.is_empty() {
            return Err("nothing recovered".into());
        }

        late.send(&Frame::Unsubscribe {
            id: round * 2 + 2,
            channel: BROADCAST.to_string(),
        })
        .await?;
        late.wait_ack().await?;
    }

    println!("recover");
    println!(
        "  {RECOVER_ROUNDS} subscribes, mean {:.1}us",
        total.as_secs_f64() * 1e6 / RECOVER_ROUNDS as f64
    );
    Ok(())
}

async fn presence(subscribers: usize) -> Result<(), BoxError> {
    let mut first = Client::connect(3000, "Viewer").await?;
    first.subscribe(1, DASHBOARD).await?;

    let start = Instant::now();
    let mut others = Vec::with_capacity(subscribers);
    for i in 1..subscribers {
        let mut client = Client::connect(3000 + i, "Viewer").await?;
        client.subscribe(1, DASHBOARD).await?;
        others.push(client);
    }

    let mut joins = 0;
    while joins + 1 < subscribers {
        if let Frame::Join { .. } = first.next().await? {
            joins += 1;
        }
    }

    println!("presence");
    println!(
        "  {joins} joins seen in {:.2}ms",
        start.elapsed().as_secs_f64() * 1e3
    );
    Ok(())
}
