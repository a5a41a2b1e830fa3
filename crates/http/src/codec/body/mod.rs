//! Request payload decoding, `Content-Length` and chunked framing.

mod chunked_decoder;
mod length_decoder;
mod payload_decoder;

pub use payload_decoder::PayloadDecoder;
