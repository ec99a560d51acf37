use crate::{generate_id, ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

/// Standard header names
pub mod header {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const ACK: &str = "ack";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const DESTINATION: &str = "destination";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const LOGIN: &str = "login";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const PASSCODE: &str = "passcode";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const SESSION_ID: &str = "session-id";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const TRANSACTION: &str = "transaction";
    pub const VERSION: &str = "version";
}

/// Every frame command known to the client, outbound and inbound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// Maps a wire token to a command, ignoring case and surrounding whitespace
    pub fn parse(token: &str) -> Result<Self> {
        let command = match token.trim().to_ascii_uppercase().as_str() {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return Err(ProtocolError::UnknownCommand(token.trim().to_string())),
        };
        Ok(command)
    }

    /// Headers a frame of this command must carry before it is written
    fn required_headers(&self) -> &'static [&'static str] {
        match self {
            Command::Send | Command::Subscribe => &[header::DESTINATION],
            Command::Ack | Command::Nack => &[header::MESSAGE_ID],
            Command::Begin | Command::Commit | Command::Abort => &[header::TRANSACTION],
            Command::Message => &[header::DESTINATION, header::MESSAGE_ID],
            Command::Receipt => &[header::RECEIPT_ID],
            _ => &[],
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Command::parse(s)
    }
}

/// Subscription acknowledgement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    #[default]
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "auto" => Ok(AckMode::Auto),
            "client" => Ok(AckMode::Client),
            "client-individual" => Ok(AckMode::ClientIndividual),
            other => Err(format!("unknown ack mode: {}", other)),
        }
    }
}

/// Insertion-ordered header map with unique names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header; an existing header of the same name is overwritten in place
    pub fn set(&mut self, name: impl Into<String>, value: impl ToString) {
        let name = name.into();
        let value = value.to_string();

        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Parses a header value, `None` if absent or unparseable
    pub fn get_as<T: FromStr>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|v| v.parse().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.set(name, value);
        }
        headers
    }
}

/// A single STOMP frame: command, ordered headers and a (possibly empty) body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: Command,
    headers: Headers,
    body: Bytes,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Declares the body length explicitly, switching the peer to length-based framing
    pub fn with_content_length(mut self) -> Self {
        let length = self.body.len();
        self.headers.set(header::CONTENT_LENGTH, length);
        self
    }

    pub fn with_receipt(mut self, receipt_id: impl Into<String>) -> Self {
        self.headers.set(header::RECEIPT, receipt_id.into());
        self
    }

    /// Client login frame. Empty credentials are left out of the frame
    pub fn connect(login: &str, passcode: &str, host: &str, accept_versions: &[String]) -> Self {
        let mut frame = Frame::new(Command::Connect)
            .with_header(header::ACCEPT_VERSION, accept_versions.join(","))
            .with_header(header::HOST, host);

        if !login.is_empty() {
            frame.headers.set(header::LOGIN, login);
        }
        if !passcode.is_empty() {
            frame.headers.set(header::PASSCODE, passcode);
        }
        frame
    }

    pub fn send(destination: &str, body: impl Into<Bytes>) -> Self {
        Frame::new(Command::Send)
            .with_header(header::DESTINATION, destination)
            .with_body(body)
    }

    pub fn subscribe(destination: &str, ack_mode: AckMode, id: Option<&str>) -> Self {
        let mut frame = Frame::new(Command::Subscribe)
            .with_header(header::DESTINATION, destination)
            .with_header(header::ACK, ack_mode);

        if let Some(id) = id {
            frame.headers.set(header::ID, id);
        }
        frame
    }

    pub fn unsubscribe_destination(destination: &str) -> Self {
        Frame::new(Command::Unsubscribe).with_header(header::DESTINATION, destination)
    }

    pub fn unsubscribe_id(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).with_header(header::ID, id)
    }

    pub fn ack(message_id: &str, subscription: Option<&str>, transaction: Option<&str>) -> Self {
        Self::acknowledgement(Command::Ack, message_id, subscription, transaction)
    }

    pub fn nack(message_id: &str, subscription: Option<&str>, transaction: Option<&str>) -> Self {
        Self::acknowledgement(Command::Nack, message_id, subscription, transaction)
    }

    fn acknowledgement(
        command: Command,
        message_id: &str,
        subscription: Option<&str>,
        transaction: Option<&str>,
    ) -> Self {
        let mut frame = Frame::new(command).with_header(header::MESSAGE_ID, message_id);

        if let Some(subscription) = subscription {
            frame.headers.set(header::SUBSCRIPTION, subscription);
        }
        if let Some(transaction) = transaction {
            frame.headers.set(header::TRANSACTION, transaction);
        }
        frame
    }

    pub fn begin(transaction: &str) -> Self {
        Frame::new(Command::Begin).with_header(header::TRANSACTION, transaction)
    }

    pub fn commit(transaction: &str) -> Self {
        Frame::new(Command::Commit).with_header(header::TRANSACTION, transaction)
    }

    pub fn abort(transaction: &str) -> Self {
        Frame::new(Command::Abort).with_header(header::TRANSACTION, transaction)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    pub fn connected(version: Option<&str>) -> Self {
        let frame = Frame::new(Command::Connected);
        match version {
            Some(version) => frame.with_header(header::VERSION, version),
            None => frame,
        }
    }

    pub fn message(destination: &str, message_id: &str, subscription: &str, body: impl Into<Bytes>) -> Self {
        Frame::new(Command::Message)
            .with_header(header::DESTINATION, destination)
            .with_header(header::MESSAGE_ID, message_id)
            .with_header(header::SUBSCRIPTION, subscription)
            .with_body(body)
    }

    pub fn receipt(receipt_id: &str) -> Self {
        Frame::new(Command::Receipt).with_header(header::RECEIPT_ID, receipt_id)
    }

    pub fn error(message: &str, body: impl Into<Bytes>) -> Self {
        Frame::new(Command::Error)
            .with_header(header::MESSAGE, message)
            .with_body(body)
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl ToString) {
        self.headers.set(name, value);
    }

    /// Required header lookup
    pub fn header(&self, name: &str) -> Result<&str> {
        self.headers.get(name).ok_or_else(|| ProtocolError::MissingHeader {
            command: self.command,
            header: name.to_string(),
        })
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(header::CONTENT_TYPE)
    }

    /// Version the broker chose in a CONNECTED frame
    pub fn protocol_version(&self) -> Option<&str> {
        self.headers.get(header::VERSION)
    }

    pub fn receipt_id(&self) -> Option<&str> {
        self.headers.get(header::RECEIPT_ID)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.headers.get(header::MESSAGE)
    }

    /// Whether the sender must wait for the broker's reply after writing this frame.
    ///
    /// Login frames are always answered (CONNECTED or ERROR); any other frame
    /// only when it asks for a receipt.
    pub fn requires_receipt(&self) -> bool {
        matches!(self.command, Command::Connect | Command::Stomp) || self.headers.contains(header::RECEIPT)
    }

    pub fn set_want_receipt(&mut self, want: bool) {
        if want {
            if !self.headers.contains(header::RECEIPT) {
                self.headers.set(header::RECEIPT, generate_id("receipt"));
            }
        } else {
            self.headers.remove(header::RECEIPT);
        }
    }

    /// Checks the headers mandated by this frame's command
    pub fn validate(&self) -> Result<()> {
        if self.command == Command::Unsubscribe {
            if self.has_header(header::ID) || self.has_header(header::DESTINATION) {
                return Ok(());
            }
            return Err(ProtocolError::MissingHeader {
                command: self.command,
                header: header::ID.to_string(),
            });
        }

        for name in self.command.required_headers() {
            self.header(name)?;
        }
        Ok(())
    }

    /// Serializes the frame verbatim: no header escaping, no implicit content-length
    pub fn write_to(&self, dst: &mut BytesMut) {
        let headers_len: usize = self.headers.iter().map(|(n, v)| n.len() + v.len() + 2).sum();
        dst.reserve(self.command.as_str().len() + headers_len + self.body.len() + 3);

        dst.put_slice(self.command.as_str().as_bytes());
        dst.put_u8(b'\n');
        for (name, value) in self.headers.iter() {
            dst.put_slice(name.as_bytes());
            dst.put_u8(b':');
            dst.put_slice(value.as_bytes());
            dst.put_u8(b'\n');
        }
        dst.put_u8(b'\n');
        dst.put_slice(&self.body);
        dst.put_u8(0);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }
}
