use crate::{Connection, Result};
use stomp_proto::{generate_id, AckMode, Frame};
use tokio::io::{AsyncRead, AsyncWrite};

/// A client's registered interest in a destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: String,
    destination: String,
    ack_mode: AckMode,
}

impl Subscription {
    pub fn new(destination: impl Into<String>, ack_mode: AckMode) -> Self {
        Self::with_id(generate_id("sub"), destination, ack_mode)
    }

    pub fn with_id(id: impl Into<String>, destination: impl Into<String>, ack_mode: AckMode) -> Self {
        Self {
            id: id.into(),
            destination: destination.into(),
            ack_mode,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    pub(crate) fn subscribe_frame(&self) -> Frame {
        Frame::subscribe(&self.destination, self.ack_mode, Some(&self.id))
    }

    pub(crate) fn unsubscribe_frame(&self) -> Frame {
        Frame::unsubscribe_id(&self.id)
    }

    /// Subscribes on `conn` and registers there; see `Connection::subscribe`
    pub async fn subscribe<S>(&self, conn: &Connection<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        conn.subscribe(self.clone()).await?;
        Ok(())
    }

    pub async fn unsubscribe<S>(&self, conn: &Connection<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        conn.unsubscribe(self).await
    }
}
