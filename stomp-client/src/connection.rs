use crate::{Destination, Direction, Message, Result, StompError, Subscription, Trace, Transaction};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use stomp_proto::{header, Command, Frame, Headers, ProtocolError, StompCodec, DEFAULT_MAX_FRAME_SIZE};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Default bounded wait for `recv_frame` / `receive`
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(200);

/// Silence after which a partially buffered frame is checked for a short body
const STALL_CHECK_INTERVAL: Duration = Duration::from_millis(200);

/// Protocol versions offered when the caller does not choose any
pub const DEFAULT_ACCEPT_VERSIONS: [&str; 2] = ["1.0", "1.1"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    /// Terminal: the stream is gone and every further send fails
    Closed,
}

/// Credentials and negotiation parameters for the CONNECT frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub user: String,
    pub pass: String,
    /// Virtual host; defaults to the broker's host name
    pub host: Option<String>,
    pub accept_versions: Vec<String>,
}

impl Login {
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pass: pass.into(),
            host: None,
            accept_versions: DEFAULT_ACCEPT_VERSIONS.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new("", "")
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_versions<I, V>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.accept_versions = versions.into_iter().map(Into::into).collect();
        self
    }

    /// Every accepted version must look like `1.1`
    pub fn validate(&self) -> Result<()> {
        if self.accept_versions.is_empty() {
            return Err(StompError::InvalidArgument(
                "Invalid protocol version list: at least one version is required".to_string(),
            ));
        }

        for version in &self.accept_versions {
            let valid = matches!(version.as_bytes(), [major, b'.', minor]
                if major.is_ascii_digit() && minor.is_ascii_digit());
            if !valid {
                return Err(StompError::InvalidArgument(format!(
                    "Invalid protocol version {:?}",
                    version
                )));
            }
        }
        Ok(())
    }
}

/// Tunables fixed at construction time
#[derive(Clone)]
pub struct ConnectionOptions {
    pub max_frame_size: usize,
    pub connect_timeout: Duration,
    pub trace: Option<Arc<dyn Trace>>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connect_timeout: Duration::from_secs(10),
            trace: None,
        }
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("max_frame_size", &self.max_frame_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("trace", &self.trace.is_some())
            .finish()
    }
}

/// What `receive` hands back
#[derive(Debug)]
pub enum Received<S = TcpStream> {
    Message(Message<S>),
    Frame(Frame),
}

enum Link<S> {
    Unconnected,
    Connected(Framed<S, StompCodec>),
    Closed,
}

struct Inner<S> {
    stream: Link<S>,
    subscriptions: HashMap<String, Subscription>,
    trace: Option<Arc<dyn Trace>>,
    receipt_seq: u64,
    protocol_version: Option<String>,
    session_id: Option<String>,
}

impl<S> Inner<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn write(&mut self, frame: Frame) -> Result<()> {
        frame.validate()?;

        let Link::Connected(framed) = &mut self.stream else {
            return Err(StompError::NotConnected);
        };

        if let Some(trace) = &self.trace {
            trace.record(Direction::Sent, &frame.to_bytes());
        }
        debug!(">>> {} frame", frame.command());

        let result = framed.send(frame).await;
        if let Err(e) = result {
            warn!("Write failed, closing connection: {}", e);
            self.stream = Link::Closed;
            return Err(e.into());
        }
        Ok(())
    }

    /// `None` wait blocks until a frame arrives.
    ///
    /// Every `STALL_CHECK_INTERVAL` of silence the buffered bytes are checked
    /// for a content-length body cut short by a NUL, which fails the read.
    async fn read(&mut self, wait: Option<Duration>) -> Result<Option<Frame>> {
        let Link::Connected(framed) = &mut self.stream else {
            return Err(StompError::NotConnected);
        };

        let deadline = wait.map(|wait| Instant::now() + wait);
        let next = loop {
            let slice = match deadline {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(STALL_CHECK_INTERVAL),
                None => STALL_CHECK_INTERVAL,
            };

            if let Ok(next) = timeout(slice, framed.next()).await {
                break next;
            }
            if let Some(declared) = framed.codec().stalled_body(framed.read_buffer()) {
                warn!("Declared content-length {} ran past the frame's NUL, closing connection", declared);
                break Some(Err(ProtocolError::ContentLengthMismatch { declared }));
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                debug!("<<< no frame within {:?}", wait.unwrap_or_default());
                return Ok(None);
            }
        };

        match next {
            Some(Ok(frame)) => {
                if let (Some(trace), Link::Connected(framed)) = (&self.trace, &self.stream) {
                    trace.record(Direction::Received, framed.codec().last_frame_bytes());
                }
                debug!("<<< {} frame", frame.command());
                Ok(Some(frame))
            }
            Some(Err(e)) => {
                warn!("Read failed, closing connection: {}", e);
                self.stream = Link::Closed;
                Err(e.into())
            }
            None => {
                warn!("Broker closed the stream");
                self.stream = Link::Closed;
                Err(ProtocolError::MissingCommand.into())
            }
        }
    }

    /// Writes a frame and, if it demands one, waits for exactly one reply
    async fn exchange(&mut self, frame: Frame) -> Result<Option<Frame>> {
        let wants_reply = frame.requires_receipt();
        self.write(frame).await?;

        if wants_reply {
            self.read(None).await
        } else {
            Ok(None)
        }
    }

    async fn request(&mut self, frame: Frame) -> Result<Frame> {
        self.receipt_seq += 1;
        let receipt_id = format!("receipt-{}", self.receipt_seq);

        let reply = self
            .exchange(frame.with_receipt(receipt_id.as_str()))
            .await?
            .ok_or(ProtocolError::MissingCommand)?;

        match reply.command() {
            Command::Error => {
                let message = reply.error_message().unwrap_or_default().trim().to_string();
                warn!("Broker answered {} with ERROR: {}", receipt_id, message);
                Err(StompError::Broker {
                    message,
                    body: reply.body_text(),
                })
            }
            Command::Receipt if reply.receipt_id() == Some(receipt_id.as_str()) => Ok(reply),
            other => {
                warn!("Expected RECEIPT for {}, got {} frame", receipt_id, other);
                Ok(reply)
            }
        }
    }

    async fn close(&mut self) {
        if let Link::Connected(mut framed) = std::mem::replace(&mut self.stream, Link::Closed) {
            if let Err(e) = framed.close().await {
                debug!("Error while closing stream: {}", e);
            }
        }
    }

    fn state(&self) -> ConnectionState {
        match self.stream {
            Link::Unconnected => ConnectionState::Unconnected,
            Link::Connected(_) => ConnectionState::Connected,
            Link::Closed => ConnectionState::Closed,
        }
    }
}

/// A STOMP connection handle.
///
/// Clones share the same stream and subscription registry. Every operation
/// holds the connection lock for its whole write/reply exchange, so a receipt
/// is always paired with the frame that asked for it.
pub struct Connection<S = TcpStream> {
    inner: Arc<Mutex<Inner<S>>>,
    server: Arc<Server>,
}

#[derive(Debug)]
struct Server {
    host: String,
    port: u16,
    max_frame_size: usize,
    connect_timeout: Duration,
}

impl<S> Clone for Connection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            server: Arc::clone(&self.server),
        }
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection(->{}:{})", self.server.host, self.server.port)
    }
}

impl Connection<TcpStream> {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_options(host, port, ConnectionOptions::default())
    }

    /// Dials the broker over TCP and logs in
    pub async fn connect(&self, login: &Login) -> Result<()> {
        login.validate()?;

        let addr = self.server();
        info!("Connecting to broker at {}...", addr);

        let stream = match timeout(self.server.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.inner.lock().await.stream = Link::Closed;
                return Err(e.into());
            }
            Err(_) => {
                self.inner.lock().await.stream = Link::Closed;
                return Err(StompError::Timeout(format!("connecting to {}", addr)));
            }
        };

        self.connect_with(stream, login).await
    }
}

impl<S> Connection<S> {
    pub fn with_options(host: impl Into<String>, port: u16, options: ConnectionOptions) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                stream: Link::Unconnected,
                subscriptions: HashMap::new(),
                trace: options.trace,
                receipt_seq: 0,
                protocol_version: None,
                session_id: None,
            })),
            server: Arc::new(Server {
                host: host.into(),
                port,
                max_frame_size: options.max_frame_size,
                connect_timeout: options.connect_timeout,
            }),
        }
    }

    /// Broker address as `host:port`
    pub fn server(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn host(&self) -> &str {
        &self.server.host
    }

    pub fn port(&self) -> u16 {
        self.server.port
    }

    /// Whether both handles drive the same underlying connection
    pub fn same_connection(&self, other: &Connection<S>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// A handle for the named destination; no I/O is performed
    pub fn acquire_destination(&self, name: impl Into<String>) -> Destination<S> {
        Destination::new(name, self.clone())
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Logs in over an already opened stream
    pub async fn connect_with(&self, stream: S, login: &Login) -> Result<()> {
        login.validate()?;

        let mut inner = self.inner.lock().await;
        match inner.state() {
            ConnectionState::Unconnected => {}
            ConnectionState::Connected => {
                return Err(StompError::IllegalState("already connected".to_string()));
            }
            ConnectionState::Closed => {
                return Err(StompError::IllegalState("connection is closed".to_string()));
            }
        }
        inner.stream = Link::Connected(Framed::new(stream, StompCodec::new(self.server.max_frame_size)));

        let host = login.host.as_deref().unwrap_or(&self.server.host);
        let frame = Frame::connect(&login.user, &login.pass, host, &login.accept_versions);

        let response = match inner.exchange(frame).await {
            Ok(Some(response)) => response,
            Ok(None) => {
                inner.close().await;
                return Err(ProtocolError::MissingCommand.into());
            }
            Err(e) => {
                inner.close().await;
                return Err(e);
            }
        };

        let detail = match response.command() {
            Command::Connected => None,
            Command::Error => Some(
                response
                    .error_message()
                    .filter(|_| response.body().is_empty())
                    .map(|m| m.trim().to_string())
                    .unwrap_or_else(|| response.body_text()),
            ),
            other => Some(format!("Got {:?} frame", other.as_str())),
        };

        if let Some(detail) = detail {
            warn!("Login to {} rejected: {}", self.server(), detail);
            inner.close().await;
            return Err(StompError::Authentication {
                server: self.server(),
                user: login.user.clone(),
                detail,
            });
        }

        inner.protocol_version = response.protocol_version().map(str::to_string);
        inner.session_id = response.headers().get(header::SESSION_ID).map(str::to_string);

        match &inner.protocol_version {
            Some(version) => info!("Connected to {}; server chose protocol version {}", self.server(), version),
            None => info!("Connected to {}; server did not indicate protocol version", self.server()),
        }
        Ok(())
    }

    /// Sends DISCONNECT and closes the stream; a no-op unless connected
    pub async fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state() != ConnectionState::Connected {
            return Ok(());
        }

        let result = inner.write(Frame::disconnect()).await;
        inner.close().await;
        info!("Disconnected from {}", self.server());
        result
    }

    /// Graceful shutdown: waits for the broker to confirm DISCONNECT before closing
    pub async fn disconnect_with_receipt(&self) -> Result<Option<Frame>> {
        let mut inner = self.inner.lock().await;
        if inner.state() != ConnectionState::Connected {
            return Ok(None);
        }

        inner.receipt_seq += 1;
        let frame = Frame::disconnect().with_receipt(format!("receipt-{}", inner.receipt_seq));
        let result = inner.exchange(frame).await;
        inner.close().await;
        info!("Disconnected from {}", self.server());
        result
    }

    /// Writes a frame; returns the broker's reply when the frame demands one
    pub async fn send_frame(&self, frame: Frame) -> Result<Option<Frame>> {
        self.inner.lock().await.exchange(frame).await
    }

    /// Sends a frame with a fresh `receipt-<n>` id and waits for the reply.
    ///
    /// An ERROR reply becomes `StompError::Broker`.
    pub(crate) async fn request(&self, frame: Frame) -> Result<Frame> {
        self.inner.lock().await.request(frame).await
    }

    /// Next frame within `wait`; `Ok(None)` if nothing arrived.
    ///
    /// `None` waits without bound. `recv_frame_default` waits
    /// `DEFAULT_RECEIVE_TIMEOUT`.
    pub async fn recv_frame(&self, wait: Option<Duration>) -> Result<Option<Frame>> {
        self.inner.lock().await.read(wait).await
    }

    pub async fn recv_frame_default(&self) -> Result<Option<Frame>> {
        self.recv_frame(Some(DEFAULT_RECEIVE_TIMEOUT)).await
    }

    /// Like `recv_frame`, but MESSAGE frames are resolved against the subscription registry
    pub async fn receive(&self, wait: Option<Duration>) -> Result<Option<Received<S>>> {
        let frame = self.recv_frame(wait).await?;

        match frame {
            Some(frame) if frame.command() == Command::Message => {
                Ok(Some(Received::Message(Message::from_frame(frame, self).await?)))
            }
            Some(frame) => Ok(Some(Received::Frame(frame))),
            None => Ok(None),
        }
    }

    /// Sends a SEND frame; `destination` overrides a destination in `headers`
    pub async fn send(
        &self,
        destination: &str,
        body: impl Into<Bytes>,
        headers: Headers,
    ) -> Result<Option<Frame>> {
        let mut frame = Frame::send(destination, body);
        for (name, value) in headers.iter().filter(|(name, _)| *name != header::DESTINATION) {
            frame.set_header(name, value);
        }
        self.send_frame(frame).await
    }

    /// Registers `subscription` and sends SUBSCRIBE under one lock.
    ///
    /// The entry exists before the broker can deliver on it and is dropped
    /// again if the broker refuses.
    pub async fn subscribe(&self, subscription: Subscription) -> Result<Subscription> {
        let mut inner = self.inner.lock().await;
        inner
            .subscriptions
            .insert(subscription.id().to_string(), subscription.clone());

        debug!(
            "Subscribing {} to {} (ack: {})",
            subscription.id(),
            subscription.destination(),
            subscription.ack_mode()
        );
        if let Err(e) = inner.request(subscription.subscribe_frame()).await {
            inner.subscriptions.remove(subscription.id());
            return Err(e);
        }
        Ok(subscription)
    }

    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        let mut inner = self.inner.lock().await;

        debug!("Unsubscribing {} from {}", subscription.id(), subscription.destination());
        inner.request(subscription.unsubscribe_frame()).await?;
        inner.subscriptions.remove(subscription.id());
        Ok(())
    }

    pub async fn subscription_by_id(&self, id: &str) -> Result<Subscription> {
        self.inner
            .lock()
            .await
            .subscriptions
            .get(id)
            .cloned()
            .ok_or_else(|| StompError::Lookup(id.to_string()))
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.lock().await.subscriptions.values().cloned().collect()
    }

    pub async fn begin(&self, transaction: &mut Transaction<S>) -> Result<()> {
        transaction.begin(self).await
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state()
    }

    /// Version the broker chose in CONNECTED, if it said
    pub async fn protocol_version(&self) -> Option<String> {
        self.inner.lock().await.protocol_version.clone()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.inner.lock().await.session_id.clone()
    }
}
