pub mod frame;
pub mod framing;
pub mod ids;

pub use frame::*;
pub use framing::*;
pub use ids::*;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Expected frame command, got end of stream")]
    MissingCommand,

    #[error("Unknown frame command: {0:?}")]
    UnknownCommand(String),

    #[error("Malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("Invalid UTF-8 in frame {0}")]
    InvalidUtf8(&'static str),

    #[error("Invalid content-length: {0:?}")]
    InvalidContentLength(String),

    #[error("Content length mismatch: declared {declared} bytes, but no NUL terminator follows")]
    ContentLengthMismatch { declared: usize },

    #[error("Stream ended inside a frame ({0} bytes buffered)")]
    UnexpectedEof(usize),

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("{command} frame is missing required header {header:?}")]
    MissingHeader { command: Command, header: String },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
