//! Encoding and decoding of HTTP/1.x messages on top of `tokio_util::codec`.
//!
//! - [`RequestDecoder`]: request head first, then the payload items of its body
//! - [`ResponseEncoder`]: response head with a `Content-Length`, then the body
//!
//! ```no_run
//! use dev_http::codec::RequestDecoder;
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n"[..]);
//! let message = decoder.decode(&mut buffer);
//! ```

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
