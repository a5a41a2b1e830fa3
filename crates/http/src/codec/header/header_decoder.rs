//! Request head decoding with `httparse`.
//!
//! The head is parsed in place, copied into an `http::Request<()>` and then
//! split off the buffer, leaving whatever follows (the body, or the next
//! pipelined request) in place.
//!
//! Limits: at most 64 headers and 8KB of head.

use bytes::{Buf, BytesMut};
use http::{HeaderName, HeaderValue, Request, Version};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;

use crate::protocol::{ParseError, PayloadSize, RequestHeader};

const MAX_HEADER_NUM: usize = 64;

const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Decodes a [`RequestHeader`] and the [`PayloadSize`] its headers announce.
#[derive(Debug)]
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // shortest head is "GET / HTTP/1.1\r\n\r\n"
        if src.len() < 14 {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut req = httparse::Request::new(&mut headers);

        let parsed_result = req.parse(&src[..]).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e.to_string()),
        });

        let body_offset = match parsed_result? {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
        };

        trace!(head_size = body_offset, "parsed request head");
        ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            _ => return Err(ParseError::InvalidVersion(req.version)),
        };

        let mut builder = Request::builder()
            .method(req.method.ok_or(ParseError::InvalidMethod)?)
            .uri(req.path.ok_or(ParseError::InvalidUri)?)
            .version(version);

        if let Some(header_map) = builder.headers_mut() {
            header_map.reserve(req.headers.len());
            for header in req.headers.iter() {
                let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(ParseError::invalid_header)?;
                let value = HeaderValue::from_bytes(header.value).map_err(ParseError::invalid_header)?;
                header_map.append(name, value);
            }
        }

        // method and uri are only validated when the request is built
        let request = builder.body(()).map_err(|e| match e {
            e if e.is::<http::method::InvalidMethod>() => ParseError::InvalidMethod,
            e if e.is::<http::uri::InvalidUri>() => ParseError::InvalidUri,
            e => ParseError::invalid_header(e),
        })?;

        let header = RequestHeader::from(request);
        let payload_size = parse_payload(&header)?;

        src.advance(body_offset);
        Ok(Some((header, payload_size)))
    }
}

/// Picks the body framing from `Transfer-Encoding` / `Content-Length`,
/// see [RFC 9112 section 6.3](https://www.rfc-editor.org/rfc/rfc9112#section-6.3).
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    if !header.need_body() && te_header.is_none() && cl_header.is_none() {
        return Ok(PayloadSize::new_empty());
    }

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::new_empty()),

        (te_value @ Some(_), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::new_chunked())
            } else {
                Ok(PayloadSize::new_empty())
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;

            let length = cl_str
                .trim()
                .parse::<u64>()
                .map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;

            Ok(PayloadSize::new_length(length))
        }

        (Some(_), Some(_)) => {
            Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers"))
        }
    }
}

/// `chunked` must be the final transfer coding to frame the body.
fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    header_value
        .and_then(|value| value.as_bytes().rsplit(|b| *b == b',').next())
        .is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}
