//! The per-connection request loop.
//!
//! [`HttpConnection`] decodes one request at a time, buffers its body to
//! completion, calls the handler and writes the response, for as long as the
//! client keeps the connection alive.

mod http_connection;

pub use http_connection::HttpConnection;
