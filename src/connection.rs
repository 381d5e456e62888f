//! One persistent WebSocket connection with an idle timer.
//!
//! A [`ConnectionManager`] owns at most one socket at a time. Its state moves
//! `Closed -> Connecting -> Open -> Closing -> Closed`. Three things can close
//! an open socket: the idle timer, an explicit [`close`](ConnectionManager::close)
//! or interrupt, and the remote end (or a read error). Whichever comes first
//! takes the socket out of the state slot under a lock, so teardown happens
//! exactly once.
//!
//! Inbound frames are read by a background task and handed over through a
//! bounded channel; [`recv`](ConnectionManager::recv) yields them in arrival
//! order and reports the close reason once the socket is gone.

use crate::config::Config;
use crate::signer::{SignedHeader, SignedUrl};
use crate::{Result, SockqlError};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on the WebSocket handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on sending the close frame during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Closing,
}

/// Why a connection was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// [`ConnectionManager::close`] was called
    Local,
    /// The remote end sent a close frame or the stream ended
    Remote,
    /// The idle window elapsed without traffic
    IdleTimeout,
    /// An interrupt signal closed the socket
    Interrupted,
    /// A read or write failed
    Error(String),
}

impl CloseReason {
    /// Closed from this side (explicitly, by timer, or by interrupt).
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local | Self::IdleTimeout | Self::Interrupted)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("closed locally"),
            Self::Remote => f.write_str("closed by remote"),
            Self::IdleTimeout => f.write_str("idle timeout"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::Error(e) => write!(f, "socket error: {}", e),
        }
    }
}

/// Something to dial.
#[derive(Debug, Clone)]
pub enum ConnectTarget {
    /// Base URL plus signed handshake headers
    Headers(SignedHeader),
    /// URL carrying the signature in its query string
    Url(SignedUrl),
}

impl ConnectTarget {
    /// Target URL without any signing query, safe to log.
    pub fn base(&self) -> String {
        match self {
            Self::Headers(signed) => signed.url.to_string(),
            Self::Url(signed) => signed.base(),
        }
    }

    fn request(&self) -> Result<Request> {
        let base = self.base();
        let invalid = |e: &dyn fmt::Display| SockqlError::connect_failed(&base, e);

        match self {
            Self::Headers(signed) => {
                let mut request = signed
                    .url
                    .as_str()
                    .into_client_request()
                    .map_err(|e| invalid(&e))?;
                for (name, value) in signed.headers() {
                    let value = HeaderValue::from_str(value).map_err(|e| invalid(&e))?;
                    request.headers_mut().insert(name, value);
                }
                Ok(request)
            }
            Self::Url(signed) => signed.as_str().into_client_request().map_err(|e| invalid(&e)),
        }
    }
}

impl From<SignedHeader> for ConnectTarget {
    fn from(signed: SignedHeader) -> Self {
        Self::Headers(signed)
    }
}

impl From<SignedUrl> for ConnectTarget {
    fn from(signed: SignedUrl) -> Self {
        Self::Url(signed)
    }
}

/// One item from the inbound side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Payload of a text or binary frame
    Message(Vec<u8>),
    /// The socket is gone; no more frames will follow
    Closed(CloseReason),
}

/// Traffic counters since the manager was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub connects: u64,
    pub closes: u64,
    pub sent: u64,
    pub received: u64,
}

/// Resettable idle deadline. `reset` may race `expired`; the deadline is
/// re-read after every wake so the timer never fires early.
#[derive(Debug, Clone)]
struct IdleTimer {
    window: Duration,
    deadline: Arc<Mutex<Instant>>,
}

impl IdleTimer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: Arc::new(Mutex::new(Instant::now() + window)),
        }
    }

    fn reset(&self) {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now() + self.window;
    }

    fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn expired(&self) {
        loop {
            let deadline = self.deadline();
            sleep_until(deadline).await;
            if self.deadline() <= Instant::now() {
                return;
            }
        }
    }
}

struct OpenConn {
    id: u64,
    sink: Arc<AsyncMutex<WsSink>>,
    stop: CancellationToken,
    timer: IdleTimer,
}

enum Slot {
    Closed {
        reason: Option<CloseReason>,
        error: Option<String>,
    },
    Connecting,
    Open(OpenConn),
    Closing {
        reason: CloseReason,
    },
}

#[derive(Default)]
struct Counters {
    connects: AtomicU64,
    closes: AtomicU64,
    sent: AtomicU64,
    received: AtomicU64,
}

struct Inner {
    slot: Mutex<Slot>,
    dial: AsyncMutex<()>,
    inbound: AsyncMutex<Option<mpsc::Receiver<Inbound>>>,
    attempts: AtomicU64,
    next_id: AtomicU64,
    idle_window: Duration,
    channel_capacity: usize,
    counters: Counters,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_reason(&self) -> Option<CloseReason> {
        match &*self.slot() {
            Slot::Closed { reason, .. } => reason.clone(),
            Slot::Closing { reason } => Some(reason.clone()),
            _ => None,
        }
    }

    /// Closes the open socket if it is `id` (or any socket for `None`).
    /// Returns `false` if there was nothing to close.
    async fn close_conn(&self, id: Option<u64>, reason: CloseReason) -> bool {
        let conn = {
            let mut slot = self.slot();
            match std::mem::replace(&mut *slot, Slot::Closing { reason: reason.clone() }) {
                Slot::Open(conn) if id.map_or(true, |id| id == conn.id) => conn,
                other => {
                    *slot = other;
                    return false;
                }
            }
        };

        conn.stop.cancel();
        let sink = conn.sink.clone();
        if timeout(CLOSE_TIMEOUT, async move { sink.lock().await.close().await })
            .await
            .is_err()
        {
            debug!(id = conn.id, "Close frame not sent before timeout");
        }

        {
            // a connect may have replaced the slot while the close frame was in flight
            let mut slot = self.slot();
            if matches!(*slot, Slot::Closing { .. }) {
                *slot = Slot::Closed {
                    reason: Some(reason.clone()),
                    error: None,
                };
            }
        }
        self.counters.closes.fetch_add(1, Ordering::Relaxed);
        info!(id = conn.id, %reason, "Connection closed");
        true
    }
}

/// Owner of the session's single connection.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use sockql::connection::{ConnectionManager, Inbound};
/// use sockql::signer::SignedHeader;
///
/// # async fn run(signed: SignedHeader) -> sockql::Result<()> {
/// let manager = ConnectionManager::new(Duration::from_secs(600), 64);
/// manager.connect(signed).await?;
/// manager.send(r#"{"messageType":"SQL_QUERY"}"#.to_string()).await?;
///
/// while let Inbound::Message(frame) = manager.recv().await {
///     println!("{} bytes", frame.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    inner: Arc<Inner>,
    watchers: CancellationToken,
}

impl ConnectionManager {
    /// Creates a closed manager. A zero `idle_window` selects the default.
    pub fn new(idle_window: Duration, channel_capacity: usize) -> Self {
        let idle_window = if idle_window.is_zero() {
            crate::config::DEFAULT_IDLE_TIMEOUT
        } else {
            idle_window
        };

        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::Closed {
                    reason: None,
                    error: None,
                }),
                dial: AsyncMutex::new(()),
                inbound: AsyncMutex::new(None),
                attempts: AtomicU64::new(0),
                next_id: AtomicU64::new(0),
                idle_window,
                channel_capacity: channel_capacity.max(1),
                counters: Counters::default(),
            }),
            watchers: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.effective_idle_timeout(), config.channel_capacity)
    }

    pub fn idle_window(&self) -> Duration {
        self.inner.idle_window
    }

    /// Dials `target` unless a socket is already open.
    ///
    /// A call that arrives while another dial is in flight waits for it and
    /// returns its outcome instead of dialing again.
    ///
    /// # Errors
    ///
    /// Returns [`SockqlError::ConnectFailed`] if the request cannot be built,
    /// the handshake fails, or it does not finish within [`CONNECT_TIMEOUT`].
    pub async fn connect(&self, target: impl Into<ConnectTarget>) -> Result<()> {
        let target = target.into();
        let base = target.base();
        let seen = self.inner.attempts.load(Ordering::Acquire);

        let _dial = self.inner.dial.lock().await;
        if self.is_open() {
            return Ok(());
        }
        if self.inner.attempts.load(Ordering::Acquire) != seen {
            if let Some(error) = self.last_error() {
                return Err(SockqlError::connect_failed(&base, error));
            }
        }

        self.inner.attempts.fetch_add(1, Ordering::AcqRel);
        *self.inner.slot() = Slot::Connecting;
        info!(url = %base, "Connecting");

        let dialed = match target.request() {
            Ok(request) => {
                if request.uri().scheme_str() == Some("wss") {
                    // Err means a provider is already installed
                    let _ = rustls::crypto::ring::default_provider().install_default();
                }
                match timeout(CONNECT_TIMEOUT, connect_async(request)).await {
                    Ok(Ok((ws, _response))) => Ok(ws),
                    Ok(Err(e)) => Err(SockqlError::connect_failed(&base, e)),
                    Err(_) => Err(SockqlError::connect_failed(&base, "handshake timed out")),
                }
            }
            Err(e) => Err(e),
        };

        let ws = match dialed {
            Ok(ws) => ws,
            Err(e) => {
                warn!(url = %base, error = %e, "Dial failed");
                *self.inner.slot() = Slot::Closed {
                    reason: None,
                    error: Some(e.to_string()),
                };
                return Err(e);
            }
        };

        self.install(ws).await;
        info!(url = %base, "Connected");
        Ok(())
    }

    async fn install(&self, ws: WsStream) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::channel(self.inner.channel_capacity);
        let stop = CancellationToken::new();
        let timer = IdleTimer::new(self.inner.idle_window);

        // frames still buffered from a previous socket are dropped here
        *self.inner.inbound.lock().await = Some(rx);
        *self.inner.slot() = Slot::Open(OpenConn {
            id,
            sink: Arc::new(AsyncMutex::new(sink)),
            stop: stop.clone(),
            timer: timer.clone(),
        });
        self.inner.counters.connects.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(read_frames(
            Arc::clone(&self.inner),
            id,
            stream,
            tx,
            stop.clone(),
            timer.clone(),
        ));
        tokio::spawn(watch_idle(Arc::clone(&self.inner), id, stop, timer));
    }

    /// Sends one text frame and resets the idle timer.
    ///
    /// # Errors
    ///
    /// Returns [`SockqlError::NotConnected`] unless the socket is open, and
    /// [`SockqlError::TransportError`] if the write fails. A failed write
    /// closes the socket.
    pub async fn send(&self, payload: String) -> Result<()> {
        let (id, sink, timer) = match &*self.inner.slot() {
            Slot::Open(conn) => (conn.id, Arc::clone(&conn.sink), conn.timer.clone()),
            _ => return Err(SockqlError::NotConnected),
        };

        let sent = sink.lock().await.send(Message::Text(payload)).await;
        match sent {
            Ok(()) => {
                timer.reset();
                self.inner.counters.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                warn!(id, error = %e, "Send failed");
                self.inner
                    .close_conn(Some(id), CloseReason::Error(e.to_string()))
                    .await;
                Err(SockqlError::TransportError(e.to_string()))
            }
        }
    }

    /// Waits for the next inbound frame, or for the socket to go away.
    pub async fn recv(&self) -> Inbound {
        let mut inbound = self.inner.inbound.lock().await;
        let next = match inbound.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        };

        match next {
            Some(item) => item,
            None => Inbound::Closed(self.inner.close_reason().unwrap_or(CloseReason::Local)),
        }
    }

    /// Frames as a stream; ends when the socket closes or `stop` fires.
    pub fn receive_loop(&self, stop: CancellationToken) -> impl Stream<Item = Vec<u8>> + '_ {
        futures::stream::unfold((self, stop), |(manager, stop)| async move {
            let next = tokio::select! {
                _ = stop.cancelled() => return None,
                next = manager.recv() => next,
            };
            match next {
                Inbound::Message(frame) => Some((frame, (manager, stop))),
                Inbound::Closed(_) => None,
            }
        })
    }

    /// Closes the socket. Returns `false` if none was open.
    pub async fn close(&self) -> bool {
        self.inner.close_conn(None, CloseReason::Local).await
    }

    pub fn is_open(&self) -> bool {
        matches!(&*self.inner.slot(), Slot::Open(_))
    }

    pub fn state(&self) -> ConnectionState {
        match &*self.inner.slot() {
            Slot::Closed { .. } => ConnectionState::Closed,
            Slot::Connecting => ConnectionState::Connecting,
            Slot::Open(_) => ConnectionState::Open,
            Slot::Closing { .. } => ConnectionState::Closing,
        }
    }

    /// Why the last socket closed, if one has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason()
    }

    /// Error of the last failed dial, if the manager is closed because of it.
    pub fn last_error(&self) -> Option<String> {
        match &*self.inner.slot() {
            Slot::Closed { error, .. } => error.clone(),
            _ => None,
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        let c = &self.inner.counters;
        ConnectionStats {
            connects: c.connects.load(Ordering::Relaxed),
            closes: c.closes.load(Ordering::Relaxed),
            sent: c.sent.load(Ordering::Relaxed),
            received: c.received.load(Ordering::Relaxed),
        }
    }

    /// Handle that closes the connection from anywhere.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Closes the connection when `signal` completes. The watcher stops
    /// with the manager.
    pub fn watch_interrupt<F>(&self, signal: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.interrupt_handle();
        let shutdown = self.watchers.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = signal => {
                    warn!("Interrupt received, closing connection");
                    handle.interrupt().await;
                }
            }
        });
    }

    /// Closes the connection on Ctrl-C.
    pub fn watch_ctrl_c(&self) {
        self.watch_interrupt(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        });
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.watchers.cancel();
        let mut slot = self.inner.slot();
        if let Slot::Open(conn) = std::mem::replace(
            &mut *slot,
            Slot::Closed {
                reason: Some(CloseReason::Local),
                error: None,
            },
        ) {
            conn.stop.cancel();
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("idle_window", &self.inner.idle_window)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Closes the manager's connection with [`CloseReason::Interrupted`].
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    inner: Weak<Inner>,
}

impl InterruptHandle {
    /// Returns `false` if nothing was open (or the manager is gone).
    pub async fn interrupt(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.close_conn(None, CloseReason::Interrupted).await,
            None => false,
        }
    }
}

async fn read_frames(
    inner: Arc<Inner>,
    id: u64,
    mut stream: SplitStream<WsStream>,
    tx: mpsc::Sender<Inbound>,
    stop: CancellationToken,
    timer: IdleTimer,
) {
    loop {
        let frame = tokio::select! {
            _ = stop.cancelled() => return,
            frame = stream.next() => frame,
        };

        let payload = match frame {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(_))) | None => {
                debug!(id, "Remote closed");
                inner.close_conn(Some(id), CloseReason::Remote).await;
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!(id, error = %e, "Read failed");
                inner
                    .close_conn(Some(id), CloseReason::Error(e.to_string()))
                    .await;
                return;
            }
        };

        timer.reset();
        inner.counters.received.fetch_add(1, Ordering::Relaxed);
        debug!(id, bytes = payload.len(), "Frame received");

        tokio::select! {
            _ = stop.cancelled() => return,
            sent = tx.send(Inbound::Message(payload)) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn watch_idle(inner: Arc<Inner>, id: u64, stop: CancellationToken, timer: IdleTimer) {
    tokio::select! {
        _ = stop.cancelled() => {}
        _ = timer.expired() => {
            info!(id, window = ?timer.window, "Idle timeout reached");
            inner.close_conn(Some(id), CloseReason::IdleTimeout).await;
        }
    }
}
