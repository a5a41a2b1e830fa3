use crate::codec::header::HeaderEncoder;
use crate::protocol::{Message, PayloadItem, PayloadSize, ResponseHead, SendError};
use bytes::BytesMut;
use tokio_util::codec::Encoder;
use tracing::{error, warn};

/// Encodes a response head followed by its payload items.
///
/// `remaining` is the number of body bytes the head announced and that have
/// not been written yet; `None` means a head is expected next. An early
/// [`PayloadItem::Eof`] is accepted so `HEAD` responses can announce a length
/// without sending the bytes.
#[derive(Debug)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
    remaining: Option<u64>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for ResponseEncoder {
    fn default() -> Self {
        Self { header_encoder: HeaderEncoder, remaining: None }
    }
}

impl Encoder<Message<(ResponseHead, PayloadSize)>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(ResponseHead, PayloadSize)>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                if self.remaining.is_some() {
                    error!("expect payload item but receive response head");
                    return Err(SendError::unexpected_message("payload item", "response head"));
                }

                self.remaining = Some(match payload_size {
                    PayloadSize::Length(n) => n,
                    PayloadSize::Empty | PayloadSize::Chunked => 0,
                });
                self.header_encoder.encode((head, payload_size), dst)
            }

            Message::Payload(PayloadItem::Chunk(bytes)) => {
                let Some(remaining) = self.remaining.as_mut() else {
                    error!("expect response head but receive payload item");
                    return Err(SendError::unexpected_message("response head", "payload item"));
                };

                let len = bytes.len() as u64;
                if len > *remaining {
                    return Err(SendError::invalid_body(format!("body exceeds content-length by {} bytes", len - *remaining)));
                }

                *remaining -= len;
                dst.extend_from_slice(&bytes);
                Ok(())
            }

            Message::Payload(PayloadItem::Eof) => {
                match self.remaining.take() {
                    Some(0) => {}
                    Some(left) => warn!(left, "response finished before the announced content-length"),
                    None => return Err(SendError::unexpected_message("response head", "payload eof")),
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Response;

    #[test]
    fn encode_full_response() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        let head = Response::builder().body(()).unwrap();
        encoder.encode(Message::Header((head, PayloadSize::Length(5))), &mut dst).unwrap();
        encoder.encode(Message::from(Bytes::from_static(b"hello")), &mut dst).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Eof), &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello");
    }

    #[test]
    fn reject_payload_without_head() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        let result = encoder.encode(Message::from(Bytes::from_static(b"orphan")), &mut dst);
        assert!(matches!(result, Err(SendError::UnexpectedMessage { .. })));
    }

    #[test]
    fn reject_body_longer_than_announced() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        let head = Response::builder().body(()).unwrap();
        encoder.encode(Message::Header((head, PayloadSize::Length(2))), &mut dst).unwrap();
        let result = encoder.encode(Message::from(Bytes::from_static(b"too long")), &mut dst);
        assert!(matches!(result, Err(SendError::InvalidBody { .. })));
    }
}
