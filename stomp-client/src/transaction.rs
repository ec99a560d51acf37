use crate::{Connection, Result, StompError};
use bytes::Bytes;
use std::fmt;
use stomp_proto::{generate_id, header, Frame};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    NotStarted,
    Active,
    Committed,
    Aborted,
}

/// A broker-side transaction grouping sends and acknowledgements.
///
/// Resolved transactions are not restarted; create a new one instead.
pub struct Transaction<S = TcpStream> {
    name: String,
    connection: Option<Connection<S>>,
    state: TransactionState,
}

impl<S> fmt::Debug for Transaction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}

impl<S> Default for Transaction<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Transaction<S> {
    pub fn new() -> Self {
        Self::named(generate_id("tx"))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: None,
            state: TransactionState::NotStarted,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    fn active_connection(&self, action: &str) -> Result<Connection<S>> {
        match (&self.connection, self.state) {
            (Some(conn), TransactionState::Active) => Ok(conn.clone()),
            _ => Err(StompError::IllegalState(format!(
                "Cannot {} a transaction that has not begun ({})",
                action, self.name
            ))),
        }
    }
}

impl<S> Transaction<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Binds the transaction to `conn` and sends BEGIN; on failure it stays unstarted
    pub async fn begin(&mut self, conn: &Connection<S>) -> Result<()> {
        if self.state != TransactionState::NotStarted {
            return Err(StompError::IllegalState(format!(
                "Cannot begin transaction {:?} twice",
                self.name
            )));
        }

        self.connection = Some(conn.clone());
        if let Err(e) = conn.request(Frame::begin(&self.name)).await {
            self.connection = None;
            return Err(e);
        }

        self.state = TransactionState::Active;
        debug!("Began transaction {}", self.name);
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<()> {
        let conn = self.active_connection("commit")?;
        conn.request(Frame::commit(&self.name)).await?;

        self.connection = None;
        self.state = TransactionState::Committed;
        debug!("Committed transaction {}", self.name);
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        let conn = self.active_connection("rollback")?;
        conn.request(Frame::abort(&self.name)).await?;

        self.connection = None;
        self.state = TransactionState::Aborted;
        debug!("Aborted transaction {}", self.name);
        Ok(())
    }

    /// Sends a message as part of this transaction
    pub async fn send(&self, destination: &str, body: impl Into<Bytes>) -> Result<Option<Frame>> {
        let conn = self.active_connection("send within")?;
        let frame = Frame::send(destination, body).with_header(header::TRANSACTION, &self.name);
        conn.send_frame(frame).await
    }
}
