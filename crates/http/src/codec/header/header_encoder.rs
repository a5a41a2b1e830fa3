use crate::protocol::{PayloadSize, ResponseHead, SendError};

use bytes::{BufMut, BytesMut};

use http::{HeaderValue, Version, header};
use std::fmt::Write;
use tracing::error;

const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Writes the status line and headers of a response.
///
/// `Content-Length` always reflects the [`PayloadSize`], overriding whatever a
/// handler may have set, and `Transfer-Encoding` is dropped: responses are
/// fully buffered so they never need chunked framing.
#[derive(Debug)]
pub struct HeaderEncoder;

impl tokio_util::codec::Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;

        let version = match head.version() {
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_10 => "HTTP/1.0",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(SendError::UnsupportedVersion { version: v });
            }
        };

        dst.reserve(INIT_HEADER_SIZE);
        let status = head.status();
        let mut status_line = String::with_capacity(32);
        let _ = write!(status_line, "{version} {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or(""));
        dst.put_slice(status_line.as_bytes());

        let headers = head.headers_mut();
        headers.remove(header::TRANSFER_ENCODING);
        let content_length = match payload_size {
            PayloadSize::Length(n) => HeaderValue::from(n),
            PayloadSize::Empty | PayloadSize::Chunked => HeaderValue::from_static("0"),
        };
        headers.insert(header::CONTENT_LENGTH, content_length);

        for (header_name, header_value) in headers.iter() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
