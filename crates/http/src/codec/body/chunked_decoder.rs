//! Decoder for `Transfer-Encoding: chunked` request bodies,
//! see [RFC 9112 section 7.1](https://www.rfc-editor.org/rfc/rfc9112#section-7.1).
//!
//! Chunk extensions and trailer fields are accepted and discarded.

use crate::protocol::{ParseError, PayloadItem};
use bytes::{Buf, BytesMut};
use std::cmp;
use tokio_util::codec::Decoder;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining_size: u64,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: ChunkedState::Size, remaining_size: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// hex digits of the chunk size
    Size,
    /// whitespace after the size
    SizeLws,
    /// `;name=value` after the size, ignored
    Extension,
    SizeLf,
    /// chunk data
    Body,
    BodyCr,
    BodyLf,
    /// start of a trailer line, or the final CRLF
    TrailerStart,
    TrailerLine,
    TrailerLf,
    EndLf,
    End,
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                ChunkedState::End => {
                    trace!("finished reading chunked data");
                    return Ok(Some(PayloadItem::Eof));
                }

                ChunkedState::Body => {
                    if src.is_empty() {
                        return Ok(None);
                    }

                    let len = cmp::min(self.remaining_size, src.len() as u64);
                    let bytes = src.split_to(usize::try_from(len).unwrap_or(usize::MAX)).freeze();
                    self.remaining_size -= bytes.len() as u64;
                    if self.remaining_size == 0 {
                        self.state = ChunkedState::BodyCr;
                    }

                    trace!(len = bytes.len(), "read chunked bytes");
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }

                state => {
                    if !src.has_remaining() {
                        return Ok(None);
                    }
                    let byte = src.get_u8();
                    self.state = state.next(byte, &mut self.remaining_size)?;
                }
            }
        }
    }
}

impl ChunkedState {
    /// Consumes one framing byte and returns the following state.
    fn next(self, byte: u8, remaining_size: &mut u64) -> Result<ChunkedState, ParseError> {
        use ChunkedState::*;

        let next = match (self, byte) {
            (Size, b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F') => {
                let digit = u64::from(hex_value(byte));
                *remaining_size = remaining_size
                    .checked_mul(16)
                    .and_then(|size| size.checked_add(digit))
                    .ok_or_else(|| ParseError::invalid_body("chunk size overflow"))?;
                Size
            }
            (Size | SizeLws, b'\t' | b' ') => SizeLws,
            (Size | SizeLws, b';') => Extension,
            (Size | SizeLws | Extension, b'\r') => SizeLf,
            (Extension, b'\n') => return Err(ParseError::invalid_body("chunk extension contains newline")),
            (Extension, _) => Extension,
            (SizeLf, b'\n') if *remaining_size == 0 => TrailerStart,
            (SizeLf, b'\n') => Body,
            (BodyCr, b'\r') => BodyLf,
            (BodyLf, b'\n') => Size,
            (TrailerStart, b'\r') => EndLf,
            (TrailerStart | TrailerLine, b'\r') => TrailerLf,
            (TrailerStart | TrailerLine, _) => TrailerLine,
            (TrailerLf, b'\n') => TrailerStart,
            (EndLf, b'\n') => End,
            (state, byte) => {
                return Err(ParseError::invalid_body(format!("invalid byte {byte:#04x} in chunked state {state:?}")));
            }
        };

        Ok(next)
    }
}

fn hex_value(byte: u8) -> u8 {
    match byte {
        b'0'..=b'9' => byte - b'0',
        b'a'..=b'f' => byte - b'a' + 10,
        _ => byte - b'A' + 10,
    }
}
