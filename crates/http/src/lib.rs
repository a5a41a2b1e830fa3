//! The HTTP/1.1 transport of the dev server
//!
//! This crate reads requests off a connection, buffers each request body to
//! completion, hands the complete request to a [`handler::Handler`] and writes
//! the returned response back. It is intentionally small: a development server
//! favours a simple, fully-buffered request/response model over streaming.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use http::{Request, Response, StatusCode};
//! use std::error::Error;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn};
//! use dev_http::connection::HttpConnection;
//! use dev_http::handler::make_handler;
//!
//! #[tokio::main]
//! async fn main() {
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     let handler = Arc::new(make_handler(echo));
//!
//!     loop {
//!         let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let handler = handler.clone();
//!         tokio::spawn(async move {
//!             let (reader, writer) = tcp_stream.into_split();
//!             if let Err(e) = HttpConnection::new(reader, writer).process(handler).await {
//!                 error!(cause = %e, "connection shutdown with error");
//!             }
//!         });
//!     }
//! }
//!
//! async fn echo(request: Request<Bytes>) -> Result<Response<Bytes>, Box<dyn Error + Send + Sync>> {
//!     info!(path = request.uri().path(), "receive request");
//!     Ok(Response::builder().status(StatusCode::OK).body(request.into_body())?)
//! }
//! ```
//!
//! # Architecture
//!
//! - [`connection`]: the per-connection request loop
//! - [`codec`]: request decoding and response encoding
//! - [`protocol`]: message types and errors
//! - [`handler`]: the handler trait a server implements
//!
//! # Limitations
//!
//! - HTTP/1.0 and HTTP/1.1 only, no TLS
//! - Maximum header size: 8KB
//! - Maximum number of headers: 64

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
