use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::Sent => ">>>",
            Direction::Received => "<<<",
        }
    }
}

/// Receives the raw bytes of every frame a connection writes or reads
pub trait Trace: Send + Sync {
    fn record(&self, direction: Direction, payload: &[u8]);
}

/// Forwards wire traffic to `tracing` at TRACE level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl Trace for TracingSink {
    fn record(&self, direction: Direction, payload: &[u8]) {
        trace!(
            target: "stomp::wire",
            "{} {}",
            direction.arrow(),
            String::from_utf8_lossy(payload).escape_debug()
        );
    }
}
