use std::cmp;
use std::error::Error;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use http::header::EXPECT;
use http::{Method, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::handler::Handler;
use crate::protocol::{HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestHeader, ResponseHead, SendError};

/// Initial capacity of the body buffer, whatever the announced length.
const MAX_BODY_PREALLOC: u64 = 64 * 1024;

/// An HTTP/1.x connection serving fully-buffered requests.
///
/// # Type Parameters
///
/// * `R`: the async readable half
/// * `W`: the async writable half
#[derive(Debug)]
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), 8 * 1024),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
        }
    }

    /// Serves requests until the client closes the connection, asks for
    /// `Connection: close`, or a request can't be decoded.
    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler,
    {
        loop {
            match self.framed_read.next().await {
                Some(Ok(Message::Header((header, payload_size)))) => {
                    let keep_alive = header.is_keep_alive();
                    self.do_process(header, payload_size, handler.as_ref()).await?;
                    if !keep_alive {
                        debug!("client don't keep alive, break this connection down");
                        return Ok(());
                    }
                }

                Some(Ok(Message::Payload(_))) => {
                    error!("receive payload while waiting for request header");
                    self.do_send_response(build_error_response(StatusCode::BAD_REQUEST), false).await?;
                    return Err(ParseError::invalid_body("need header while receive body").into());
                }

                Some(Err(e)) => {
                    error!(cause = %e, "can't receive next request");
                    self.do_send_response(build_error_response(StatusCode::BAD_REQUEST), false).await?;
                    return Err(e.into());
                }

                None => {
                    info!("cant read more request, break this connection down");
                    return Ok(());
                }
            }
        }
    }

    async fn do_process<H>(&mut self, header: RequestHeader, payload_size: PayloadSize, handler: &H) -> Result<(), HttpError>
    where
        H: Handler,
    {
        if !payload_size.is_empty() && expects_continue(&header) {
            let writer = self.framed_write.get_mut();
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
            writer.flush().await.map_err(SendError::io)?;
            info!("receive expect request header, sent continue response");
        }

        let is_head = header.method() == Method::HEAD;

        let body = match self.read_body(payload_size).await {
            Ok(body) => body,
            Err(e @ ParseError::IncompleteBody { .. }) => {
                error!(cause = %e, "abort request, body is incomplete");
                return Err(e.into());
            }
            Err(e) => {
                error!(cause = %e, "abort request, can't read body");
                self.do_send_response(build_error_response(StatusCode::BAD_REQUEST), false).await?;
                return Err(e.into());
            }
        };

        let response_result = handler.call(header.body(body)).await;
        self.send_response(response_result, is_head).await
    }

    /// Reads the payload items following a head into one buffer.
    async fn read_body(&mut self, payload_size: PayloadSize) -> Result<Bytes, ParseError> {
        let capacity = match payload_size {
            PayloadSize::Length(length) => cmp::min(length, MAX_BODY_PREALLOC),
            PayloadSize::Chunked | PayloadSize::Empty => 0,
        };
        let mut body = BytesMut::with_capacity(usize::try_from(capacity).unwrap_or_default());

        loop {
            match self.framed_read.next().await {
                Some(Ok(Message::Payload(PayloadItem::Chunk(bytes)))) => body.extend_from_slice(&bytes),
                Some(Ok(Message::Payload(PayloadItem::Eof))) => return Ok(body.freeze()),
                Some(Ok(Message::Header(_))) => return Err(ParseError::invalid_body("receive request header while reading body")),
                Some(Err(e)) => return Err(e),
                None => return Err(ParseError::incomplete_body(body.len())),
            }
        }
    }

    async fn send_response<E>(&mut self, response_result: Result<Response<Bytes>, E>, is_head: bool) -> Result<(), HttpError>
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        match response_result {
            Ok(response) => self.do_send_response(response, is_head).await,
            Err(e) => {
                let e: Box<dyn Error + Send + Sync> = e.into();
                error!(cause = %e, "handle response error");
                self.do_send_response(build_error_response(StatusCode::INTERNAL_SERVER_ERROR), false).await
            }
        }
    }

    async fn do_send_response(&mut self, response: Response<Bytes>, is_head: bool) -> Result<(), HttpError> {
        let (header_parts, body) = response.into_parts();
        let payload_size = PayloadSize::new_length(body.len() as u64);

        self.framed_write.feed(Message::Header((ResponseHead::from_parts(header_parts, ()), payload_size))).await?;

        if !is_head && !body.is_empty() {
            self.framed_write.feed(Message::from(body)).await?;
        }

        // send instead of feed, the whole response is buffered and must reach the client now
        self.framed_write.send(Message::Payload(PayloadItem::Eof)).await?;
        Ok(())
    }
}

fn expects_continue(header: &RequestHeader) -> bool {
    header.headers().get(EXPECT).is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
}

fn build_error_response(status_code: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status_code;
    response
}
