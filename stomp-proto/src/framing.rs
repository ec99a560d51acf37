use crate::{header, Command, Frame, Headers, ProtocolError, Result};
use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace, warn};

/// Default maximum frame size for most deployments (1MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Upper bound for a configurable frame size (10MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Codec for use with tokio_util::codec::Framed
///
/// The framed read buffer doubles as the look-ahead buffer: bytes read past
/// the end of one frame stay buffered and start the next decode.
pub struct StompCodec {
    max_frame_size: usize,
    /// Set while waiting for the rest of a content-length body
    pending: Option<PendingBody>,
    last_frame: Bytes,
}

#[derive(Debug, Clone, Copy)]
struct PendingBody {
    body_start: usize,
    declared: usize,
}

impl StompCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
            pending: None,
            last_frame: Bytes::new(),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Wire bytes of the last decoded frame, from its command line through the NUL
    pub fn last_frame_bytes(&self) -> &Bytes {
        &self.last_frame
    }

    /// Declared length of a content-length body that looks finished but short.
    ///
    /// `buffered` is the framed read buffer. The frame counts as finished when
    /// its body holds a NUL followed by nothing but EOL bytes, i.e. the sender
    /// wrote a terminator before the declared length was reached.
    pub fn stalled_body(&self, buffered: &[u8]) -> Option<usize> {
        let pending = self.pending?;
        let body = buffered.get(pending.body_start..)?;
        let nul = body.iter().rposition(|&b| b == 0)?;

        body[nul + 1..]
            .iter()
            .all(|&b| b == b'\n' || b == b'\r')
            .then_some(pending.declared)
    }

    fn check_size(&self, len: usize) -> Result<()> {
        if len > self.max_frame_size {
            warn!("Received oversized frame: {} bytes (max: {})", len, self.max_frame_size);
            return Err(ProtocolError::FrameTooLarge(len, self.max_frame_size));
        }
        Ok(())
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

/// Discards heartbeat EOLs (`\n` or `\r\n`) at the front of the buffer.
///
/// Stops at the first byte that is not part of an EOL; that byte stays buffered.
fn skip_heartbeats(src: &mut BytesMut) -> usize {
    let mut skipped = 0;
    loop {
        match &src[..] {
            [b'\n', ..] => {
                src.advance(1);
                skipped += 1;
            }
            [b'\r', b'\n', ..] => {
                src.advance(2);
                skipped += 2;
            }
            _ => return skipped,
        }
    }
}

/// Next line starting at `from`, without its EOL, and the offset past it
fn next_line(src: &[u8], from: usize) -> Option<(&[u8], usize)> {
    let newline = src[from..].iter().position(|&b| b == b'\n')?;
    let mut line = &src[from..from + newline];
    if let [rest @ .., b'\r'] = line {
        line = rest;
    }
    Some((line, from + newline + 1))
}

fn utf8<'a>(bytes: &'a [u8], what: &'static str) -> Result<&'a str> {
    std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8(what))
}

impl tokio_util::codec::Decoder for StompCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.pending = None;

        let skipped = skip_heartbeats(src);
        if skipped > 0 {
            trace!("Skipped {} heartbeat bytes", skipped);
        }

        // Command line
        let Some((line, mut pos)) = next_line(&src[..], 0) else {
            self.check_size(src.len())?;
            return Ok(None);
        };
        let command = Command::parse(utf8(line, "command")?)?;

        // Header lines up to the blank line; last duplicate wins
        let mut headers = Headers::new();
        loop {
            let Some((line, next)) = next_line(&src[..], pos) else {
                self.check_size(src.len())?;
                return Ok(None);
            };
            pos = next;

            if line.is_empty() {
                break;
            }

            let line = utf8(line, "header")?;
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
            headers.set(name, value);
        }
        let body_start = pos;

        // Body: exact length when declared, otherwise up to the first NUL
        let body_end = match headers.get(header::CONTENT_LENGTH) {
            Some(raw) => {
                let declared: usize = raw
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::InvalidContentLength(raw.to_string()))?;
                let frame_len = body_start
                    .checked_add(declared)
                    .and_then(|n| n.checked_add(1))
                    .ok_or(ProtocolError::FrameTooLarge(usize::MAX, self.max_frame_size))?;
                self.check_size(frame_len)?;

                let terminator = body_start + declared;
                if src.len() <= terminator {
                    src.reserve(frame_len - src.len());
                    self.pending = Some(PendingBody { body_start, declared });
                    return Ok(None);
                }
                if src[terminator] != 0 {
                    warn!("Declared content-length {} does not end at a NUL byte", declared);
                    return Err(ProtocolError::ContentLengthMismatch { declared });
                }
                terminator
            }
            None => match src[body_start..].iter().position(|&b| b == 0) {
                Some(offset) => body_start + offset,
                None => {
                    self.check_size(src.len())?;
                    return Ok(None);
                }
            },
        };

        // We have a complete frame, consume it together with its NUL
        let raw = src.split_to(body_end + 1).freeze();
        let body = raw.slice(body_start..body_end);
        self.last_frame = raw;

        let frame = headers
            .iter()
            .fold(Frame::new(command), |frame, (name, value)| frame.with_header(name, value))
            .with_body(body);

        // Padding after the NUL belongs to neither frame
        skip_heartbeats(src);

        debug!("Decoded {} frame ({} body bytes)", frame.command(), frame.body().len());
        Ok(Some(frame))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::UnexpectedEof(src.len())),
        }
    }
}

impl tokio_util::codec::Encoder<Frame> for StompCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        item.validate()?;

        let start = dst.len();
        item.write_to(dst);

        debug!("Encoded {} frame ({} bytes)", item.command(), dst.len() - start);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::codec::{Decoder, Encoder};

    fn decode_all(input: &[u8]) -> Result<Vec<Frame>> {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();

        while let Some(frame) = codec.decode_eof(&mut buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    #[test]
    fn test_decode_error_frame() {
        let frames = decode_all(b"ERROR\nmessage:Unknown command\n\nLine1\nLine2\0").unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command(), Command::Error);
        assert_eq!(frames[0].error_message(), Some("Unknown command"));
        assert_eq!(&frames[0].body()[..], b"Line1\nLine2");
    }

    #[test]
    fn test_decode_with_content_length() {
        let frames = decode_all(
            b"ERROR\nmessage:Unknown command\ncode:message:unknown\ncontent-length:11\n\nLine1\nLine2\0\n",
        )
        .unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header("code").unwrap(), "message:unknown");
        assert_eq!(&frames[0].body()[..], b"Line1\nLine2");
    }

    #[test]
    fn test_content_length_body_may_contain_nul() {
        let frames = decode_all(b"MESSAGE\ndestination:/q\nmessage-id:1\ncontent-length:3\n\na\0b\0").unwrap();
        assert_eq!(&frames[0].body()[..], b"a\0b");
    }

    #[test]
    fn test_content_length_shorter_than_body() {
        let result = decode_all(
            b"ERROR\nmessage:Unknown command\ncontent-length:10\n\nContent longer that 10 bytes.\0",
        );
        assert!(matches!(result, Err(ProtocolError::ContentLengthMismatch { declared: 10 })));
    }

    #[test]
    fn test_content_length_longer_than_body() {
        let result = decode_all(b"ERROR\ncontent-length:20\n\nshort\0");
        assert!(matches!(result, Err(ProtocolError::UnexpectedEof(_))));

        let result = decode_all(b"ERROR\ncontent-length:8\n\nshort\0RECEIPT\nreceipt-id:1\n\n\0");
        assert!(matches!(result, Err(ProtocolError::ContentLengthMismatch { declared: 8 })));
    }

    #[test]
    fn test_invalid_content_length() {
        let result = decode_all(b"ERROR\ncontent-length:ten\n\nbody\0");
        assert!(matches!(result, Err(ProtocolError::InvalidContentLength(_))));
    }

    #[test]
    fn test_unknown_command() {
        let result = decode_all(b"HELLO\n\n\0");
        assert!(matches!(result, Err(ProtocolError::UnknownCommand(_))));
    }

    #[test]
    fn test_malformed_header() {
        let result = decode_all(b"RECEIPT\nreceipt-id\n\n\0");
        assert!(matches!(result, Err(ProtocolError::MalformedHeader(_))));
    }

    #[test]
    fn test_duplicate_header_last_wins() {
        let frames = decode_all(b"MESSAGE\ndestination:/a\nmessage-id:1\ndestination:/b\n\n\0").unwrap();
        assert_eq!(frames[0].header("destination").unwrap(), "/b");
        assert_eq!(frames[0].headers().len(), 2);
    }

    #[test]
    fn test_crlf_line_endings() {
        let frames = decode_all(b"RECEIPT\r\nreceipt-id:77\r\n\r\n\0\r\n").unwrap();
        assert_eq!(frames[0].receipt_id(), Some("77"));
    }

    #[test]
    fn test_padding_between_frames() {
        for padding in ["", "\n", "\n\n"] {
            for length in ["", "content-length:11\n"] {
                let input = format!(
                    "ERROR\n{}\nLine1\nLine2\0{}RECEIPT\nreceipt-id:77\n\n\0\n\n",
                    length, padding
                );
                let frames = decode_all(input.as_bytes()).unwrap();

                assert_eq!(frames.len(), 2, "padding {:?}, {:?}", padding, length);
                assert_eq!(&frames[0].body()[..], b"Line1\nLine2");
                assert_eq!(frames[1].command(), Command::Receipt);
                assert!(frames[1].body().is_empty());
            }
        }
    }

    #[test]
    fn test_leading_heartbeats_skipped() {
        let frames = decode_all(b"\n\n\n\nRECEIPT\nmessage_id:12345\n\n\0").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command(), Command::Receipt);
    }

    #[test]
    fn test_padding_skip_preserves_next_command() {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::from(&b"RECEIPT\nreceipt-id:1\n\n\0\n\nMESS"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert_eq!(&buf[..], b"MESS");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_incomplete() {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::from(&b"MESSAGE\ndestination:/q\n\npartial body"[..]);

        let result = codec.decode(&mut buf).unwrap();
        assert!(result.is_none());

        buf.extend_from_slice(b"\0");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame.body()[..], b"partial body");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_content_length_overflow_rejected() {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::from(&b"ERROR\ncontent-length:18446744073709551615\n\nx\0"[..]);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge(..))));
    }

    #[test]
    fn test_stalled_content_length_body() {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::from(&b"ERROR\ncontent-length:20\n\nshort\0\n"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(codec.stalled_body(&buf), Some(20));
    }

    #[test]
    fn test_partial_content_length_body_is_not_stalled() {
        let mut codec = StompCodec::default();

        // NUL inside a binary body, more bytes after it
        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:8\n\nab\0cd"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(codec.stalled_body(&buf), None);

        // no NUL at all yet
        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:8\n\nabc"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(codec.stalled_body(&buf), None);

        // a NUL-scanned frame never stalls
        let mut buf = BytesMut::from(&b"MESSAGE\ndestination:/q\n\nabc"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(codec.stalled_body(&buf), None);
    }

    #[test]
    fn test_last_frame_bytes_are_wire_bytes() {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::from(&b"\nRECEIPT\r\nreceipt-id:1\r\nreceipt-id:2\r\n\r\n\0\n"[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(frame.receipt_id(), Some("2"));
        assert_eq!(
            &codec.last_frame_bytes()[..],
            b"RECEIPT\r\nreceipt-id:1\r\nreceipt-id:2\r\n\r\n\0"
        );
    }

    #[test]
    fn test_eof_mid_frame() {
        let result = decode_all(b"MESSAGE\ndestination:/q\n\nno terminator");
        assert!(matches!(result, Err(ProtocolError::UnexpectedEof(_))));
    }

    #[test]
    fn test_heartbeats_only_is_not_a_frame() {
        assert!(decode_all(b"\n\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = StompCodec::new(16);
        let mut buf = BytesMut::from(&b"SEND\ndestination:/queue/with/a/long/name\n"[..]);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge(_, 16))));
    }

    #[test]
    fn test_roundtrip_every_command() {
        let frames = vec![
            Frame::connect("user", "pass", "localhost", &["1.2".to_string()]),
            Frame::send("/queue/a", "my-data").with_content_length(),
            Frame::subscribe("/queue/a", crate::AckMode::Client, Some("sub-1")),
            Frame::unsubscribe_id("sub-1"),
            Frame::ack("m-1", Some("sub-1"), Some("tx-1")),
            Frame::nack("m-1", None, None),
            Frame::begin("tx-1"),
            Frame::commit("tx-1"),
            Frame::abort("tx-1"),
            Frame::disconnect().with_receipt("bye"),
            Frame::connected(Some("1.1")).with_header("session-id", "0xdeadbeef"),
            Frame::message("/queue/a", "m-1", "sub-1", "hello"),
            Frame::receipt("77"),
            Frame::error("oops", "Line1\nLine2"),
        ];

        let mut codec = StompCodec::default();
        let mut buf = BytesMut::new();
        for frame in &frames {
            codec.encode(frame.clone(), &mut buf).unwrap();
        }

        let mut decoded = Vec::new();
        while let Some(frame) = codec.decode_eof(&mut buf).unwrap() {
            decoded.push(frame);
        }
        assert_eq!(decoded, frames);
    }

    #[test]
    fn test_encode_rejects_missing_headers() {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::new();

        let result = codec.encode(Frame::new(Command::Begin), &mut buf);
        assert!(matches!(result, Err(ProtocolError::MissingHeader { .. })));
        assert!(buf.is_empty());
    }
}
