//! Front-end message framing
//!
//! Messages are framed with a header block terminated by an empty line,
//! followed by a UTF-8 JSON body whose length in bytes is given by the
//! `Content-Length` header:
//!
//! `Content-Length: <N>\r\n\r\n<N bytes of JSON>`
//!
//! The decoder is a two-state machine over an accumulation buffer, so a single
//! chunk may carry several messages and one message may span many chunks.

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

/// Maximum body size accepted from the wire
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "Content-Length";

/// Framing errors; every variant is fatal for the stream
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing Content-Length header")]
    MissingContentLength,

    #[error("Invalid content length: {0}")]
    InvalidContentLength(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    AwaitingHeaders,
    AwaitingBody { length: usize },
}

/// Content-Length framing codec for messages of type `T`
#[derive(Debug)]
pub struct FrameCodec<T> {
    state: FrameState,
    _message: PhantomData<fn() -> T>,
}

impl<T> FrameCodec<T> {
    pub fn new() -> Self {
        Self {
            state: FrameState::AwaitingHeaders,
            _message: PhantomData,
        }
    }
}

impl<T> Default for FrameCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the body length from a header block (without its terminator)
fn parse_content_length(header: &[u8]) -> Result<usize, CodecError> {
    let mut length = None;

    for line in header.split(|b| *b == b'\n') {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim() != CONTENT_LENGTH {
            continue;
        }

        let value = value.trim();
        let parsed = value
            .parse::<usize>()
            .map_err(|_| CodecError::InvalidContentLength(value.to_string()))?;
        length = Some(parsed);
    }

    let length = length.ok_or(CodecError::MissingContentLength)?;
    if length > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: length,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(length)
}

fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

impl<T: DeserializeOwned> Decoder for FrameCodec<T> {
    type Item = T;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, CodecError> {
        loop {
            match self.state {
                FrameState::AwaitingHeaders => {
                    let Some(header_end) = find_terminator(src) else {
                        return Ok(None);
                    };
                    let length = parse_content_length(&src[..header_end])?;
                    src.advance(header_end + HEADER_TERMINATOR.len());
                    src.reserve(length.saturating_sub(src.len()));
                    self.state = FrameState::AwaitingBody { length };
                }
                FrameState::AwaitingBody { length } => {
                    if src.len() < length {
                        trace!(
                            "FrameCodec: incomplete body - need {} more bytes",
                            length - src.len()
                        );
                        return Ok(None);
                    }

                    let body = src.split_to(length);
                    self.state = FrameState::AwaitingHeaders;

                    let body: &[u8] = if body.is_empty() { b"{}" } else { &body };
                    match serde_json::from_slice::<T>(body) {
                        Ok(message) => {
                            trace!("FrameCodec: decoded message ({} bytes)", length);
                            return Ok(Some(message));
                        }
                        // The frame boundary is intact, so only this message is lost
                        Err(e) => warn!("FrameCodec: dropping malformed message: {}", e),
                    }
                }
            }
        }
    }
}

impl<T: Serialize> Encoder<T> for FrameCodec<T> {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = serde_json::to_vec(&item)?;
        let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());

        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}

/// Frame a single message into bytes
pub fn encode_frame<T: Serialize>(message: T) -> Result<Vec<u8>, CodecError> {
    let mut buffer = BytesMut::new();
    FrameCodec::<T>::new().encode(message, &mut buffer)?;
    Ok(buffer.to_vec())
}
