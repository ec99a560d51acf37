//! In-memory broker half for connection tests

use crate::{Connection, ConnectionOptions, Direction, Login, Trace};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::{timeout, Duration};

/// The broker end of a duplex pair: pre-loads replies and reads back what the client wrote
pub(crate) struct TestBroker {
    stream: DuplexStream,
}

impl TestBroker {
    pub(crate) async fn respond(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Everything written by the client so far
    pub(crate) async fn sent(&mut self) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            match timeout(Duration::from_millis(50), self.stream.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => out.extend_from_slice(&buf[..n]),
                Ok(Err(e)) => panic!("broker read failed: {}", e),
            }
        }
        String::from_utf8(out).unwrap()
    }

    /// Ends the broker's side of the stream; the client then reads EOF
    pub(crate) async fn close(&mut self) {
        self.stream.shutdown().await.unwrap();
    }
}

pub(crate) fn pair_with(options: ConnectionOptions) -> (Connection<DuplexStream>, DuplexStream, TestBroker) {
    let (client, broker) = tokio::io::duplex(64 * 1024);
    let conn = Connection::with_options("localhost", 61613, options);
    (conn, client, TestBroker { stream: broker })
}

/// An unconnected connection plus the stream it should be connected over
pub(crate) fn pair() -> (Connection<DuplexStream>, DuplexStream, TestBroker) {
    pair_with(ConnectionOptions::default())
}

/// A connection that already completed its handshake; the CONNECT bytes are drained
pub(crate) async fn connected() -> (Connection<DuplexStream>, TestBroker) {
    let (conn, client, mut broker) = pair();
    broker.respond(b"CONNECTED\nsession-id:0xdeadbeef\n\n\0").await;

    conn.connect_with(client, &Login::new("user", "pass")).await.unwrap();
    broker.sent().await;

    (conn, broker)
}

#[derive(Default)]
pub(crate) struct Recorder {
    records: Mutex<Vec<(Direction, Vec<u8>)>>,
}

impl Recorder {
    pub(crate) fn records(&self) -> Vec<(Direction, Vec<u8>)> {
        self.records.lock().unwrap().clone()
    }
}

impl Trace for Recorder {
    fn record(&self, direction: Direction, payload: &[u8]) {
        self.records.lock().unwrap().push((direction, payload.to_vec()));
    }
}
