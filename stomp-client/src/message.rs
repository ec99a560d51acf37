use crate::{Connection, Result, StompError, Subscription, Transaction};
use bytes::Bytes;
use std::fmt;
use stomp_proto::{header, Frame};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// An inbound MESSAGE frame, resolved against its connection's subscriptions
pub struct Message<S = TcpStream> {
    frame: Frame,
    destination: String,
    message_id: String,
    subscription: Option<Subscription>,
    connection: Option<Connection<S>>,
}

impl<S> fmt::Debug for Message<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("destination", &self.destination)
            .field("message_id", &self.message_id)
            .field("subscription", &self.subscription.as_ref().map(Subscription::id))
            .field("body_len", &self.frame.body().len())
            .finish()
    }
}

impl<S> Message<S> {
    /// A message not bound to any connection; it can be inspected but not acknowledged
    pub fn detached(frame: Frame) -> Result<Self> {
        let destination = frame.header(header::DESTINATION)?.to_string();
        let message_id = frame.header(header::MESSAGE_ID)?.to_string();

        Ok(Self {
            frame,
            destination,
            message_id,
            subscription: None,
            connection: None,
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn content_type(&self) -> Option<&str> {
        self.frame.content_type()
    }

    pub fn body(&self) -> &Bytes {
        self.frame.body()
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    fn acknowledgement(&self, ack: bool, transaction: Option<&Transaction<S>>) -> Result<(Connection<S>, Frame)> {
        let verb = if ack { "ack" } else { "nack" };

        let Some(conn) = &self.connection else {
            return Err(StompError::IllegalState(format!(
                "Cannot {} message without connection",
                verb
            )));
        };

        let tx = match transaction {
            Some(tx) if !tx.is_active() => {
                return Err(StompError::IllegalState(format!(
                    "Cannot {} message within transaction {} that is not active",
                    verb,
                    tx.name()
                )));
            }
            Some(tx) => Some(tx.name()),
            None => None,
        };

        let subscription = self
            .subscription
            .as_ref()
            .map(Subscription::id)
            .or_else(|| self.frame.headers().get(header::SUBSCRIPTION));

        let frame = if ack {
            Frame::ack(&self.message_id, subscription, tx)
        } else {
            Frame::nack(&self.message_id, subscription, tx)
        };
        Ok((conn.clone(), frame))
    }
}

impl<S> Message<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Builds a message from a MESSAGE frame received on `conn`.
    ///
    /// A `subscription` header must name a registered subscription.
    pub async fn from_frame(frame: Frame, conn: &Connection<S>) -> Result<Self> {
        let mut message = Self::detached(frame)?;

        if let Some(id) = message.frame.headers().get(header::SUBSCRIPTION) {
            message.subscription = Some(conn.subscription_by_id(id).await?);
        }
        message.connection = Some(conn.clone());
        Ok(message)
    }

    pub async fn ack(&self, transaction: Option<&Transaction<S>>) -> Result<()> {
        let (conn, frame) = self.acknowledgement(true, transaction)?;
        debug!("Acking message {}", self.message_id);
        conn.send_frame(frame).await?;
        Ok(())
    }

    pub async fn nack(&self, transaction: Option<&Transaction<S>>) -> Result<()> {
        let (conn, frame) = self.acknowledgement(false, transaction)?;
        debug!("Nacking message {}", self.message_id);
        conn.send_frame(frame).await?;
        Ok(())
    }
}
