use crate::{Connection, Result, Subscription};
use bytes::Bytes;
use std::fmt;
use stomp_proto::{AckMode, Frame, Headers};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A named queue or topic on the broker, bound to the connection it came from
pub struct Destination<S = TcpStream> {
    name: String,
    connection: Connection<S>,
}

impl<S> Clone for Destination<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            connection: self.connection.clone(),
        }
    }
}

impl<S> fmt::Debug for Destination<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("name", &self.name)
            .field("connection", &self.connection)
            .finish()
    }
}

impl<S> Destination<S> {
    pub(crate) fn new(name: impl Into<String>, connection: Connection<S>) -> Self {
        Self {
            name: name.into(),
            connection,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &Connection<S> {
        &self.connection
    }
}

impl<S> Destination<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub async fn send(&self, body: impl Into<Bytes>, headers: Headers) -> Result<Option<Frame>> {
        self.connection.send(&self.name, body, headers).await
    }

    pub async fn subscribe(&self, ack_mode: AckMode) -> Result<Subscription> {
        self.connection
            .subscribe(Subscription::new(self.name.clone(), ack_mode))
            .await
    }
}
