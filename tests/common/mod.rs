//! Scripted local WebSocket server for integration tests.
//!
//! Every text frame the server receives is recorded as a query request and
//! answered with the next queued [`Reply`]. Frames built from JSON objects
//! get the request's `requestId` filled in when they lack one.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sockql::providers::mock::MockProvider;
use sockql::{Config, CredentialBroker, LoginCredentials, QuerySession};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// One outgoing frame.
#[derive(Debug, Clone)]
pub enum Frame {
    Json(Value),
    Raw(String),
}

impl Frame {
    fn render(self, request_id: &str) -> String {
        match self {
            Frame::Json(Value::Object(mut map)) => {
                map.entry("requestId")
                    .or_insert_with(|| Value::String(request_id.to_string()));
                Value::Object(map).to_string()
            }
            Frame::Json(other) => other.to_string(),
            Frame::Raw(text) => text,
        }
    }
}

/// How the server answers one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Send these frames and keep the socket open
    Frames(Vec<Frame>),
    /// Send these frames, then close the socket
    FramesThenClose(Vec<Frame>),
    /// Send nothing
    Silent,
}

/// A data message with `totalSubBatches = remaining`.
pub fn batch(remaining: i64, rows: Value) -> Frame {
    Frame::Json(json!({
        "messageType": "DATA",
        "batchSerial": 1,
        "totalBatches": 1,
        "splitSerial": 1,
        "totalSplitSerials": 1,
        "subBatchSerial": 1,
        "totalSubBatches": remaining,
        "data": rows,
    }))
}

#[derive(Default)]
struct State {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Value>>,
    handshakes: Mutex<Vec<HashMap<String, String>>>,
    connections: AtomicUsize,
}

/// Handle to a running server.
#[derive(Clone)]
pub struct TestServer {
    pub url: String,
    state: Arc<State>,
}

impl TestServer {
    /// Binds to an ephemeral port and starts accepting.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State::default());

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&accept_state)));
            }
        });

        Self {
            url: format!("ws://{}/prod", addr),
            state,
        }
    }

    /// Queues the answer for the next request.
    pub fn reply(&self, reply: Reply) -> &Self {
        self.state.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Lowercased handshake headers per connection, plus the request
    /// target under `:uri`.
    pub fn handshakes(&self) -> Vec<HashMap<String, String>> {
        self.state.handshakes.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

async fn serve(stream: tokio::net::TcpStream, state: Arc<State>) {
    let hs_state = Arc::clone(&state);
    let callback = move |req: &Request, resp: Response| {
        let mut headers: HashMap<String, String> = req
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        headers.insert(":uri".to_string(), req.uri().to_string());
        hs_state.handshakes.lock().unwrap().push(headers);
        Ok::<Response, ErrorResponse>(resp)
    };

    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    state.connections.fetch_add(1, Ordering::SeqCst);

    let (mut write, mut read) = ws.split();
    while let Some(Ok(message)) = read.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let request: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        let request_id = request["requestId"].as_str().unwrap_or_default().to_string();
        state.requests.lock().unwrap().push(request);

        let reply = state
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Silent);

        let (frames, close) = match reply {
            Reply::Frames(frames) => (frames, false),
            Reply::FramesThenClose(frames) => (frames, true),
            Reply::Silent => (Vec::new(), false),
        };

        for frame in frames {
            if write.send(Message::Text(frame.render(&request_id))).await.is_err() {
                return;
            }
        }
        if close {
            let _ = write.close().await;
            return;
        }
    }
}

/// Mock provider knowing `alice` / `s3cret`.
pub fn provider() -> Arc<MockProvider> {
    Arc::new(MockProvider::new().with_user("alice", "s3cret"))
}

/// Session against `server` logged in as `alice`.
pub fn session(server: &TestServer, provider: Arc<MockProvider>, config: impl FnOnce(Config) -> Config) -> QuerySession {
    let broker = CredentialBroker::new(provider).with_login(LoginCredentials::new("alice", "s3cret"));
    let config = config(Config::new(server.url.as_str()).with_idle_timeout(Duration::from_secs(60)));
    QuerySession::new(config, broker).unwrap()
}

/// Installs a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
