//! The seam between the transport and whatever produces responses.
//!
//! A connection hands every fully-buffered request to a [`Handler`] and
//! encodes the response it returns. Errors are logged by the connection and
//! answered with `500 Internal Server Error`.

use std::error::Error;
use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

#[async_trait]
pub trait Handler: Send + Sync {
    type Error: Into<Box<dyn Error + Send + Sync>>;

    async fn call(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Self::Error>;
}

/// A [`Handler`] backed by an async function, see [`make_handler`].
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<Err, F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Err: Into<Box<dyn Error + Send + Sync>> + 'static,
    Fut: Future<Output = Result<Response<Bytes>, Err>> + Send + 'static,
{
    type Error = Err;

    async fn call(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Self::Error> {
        (self.f)(req).await
    }
}

pub fn make_handler<F, Err, Ret>(f: F) -> HandlerFn<F>
where
    Err: Into<Box<dyn Error + Send + Sync>>,
    Ret: Future<Output = Result<Response<Bytes>, Err>>,
    F: Fn(Request<Bytes>) -> Ret,
{
    HandlerFn { f }
}
