//! Chain handlers.
//!
//! A handler is a synchronous step over a shared [`RequestContext`]. It shapes
//! the response through the context and drives the chain with
//! [`RequestContext::end`], [`RequestContext::stop`] and
//! [`RequestContext::start`]; work that has to wait on IO is spawned onto the
//! runtime with a clone of the context.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::RequestContext;

pub type HandlerError = Box<dyn Error + Send + Sync>;

pub type SharedHandler = Arc<dyn Handler>;

pub trait Handler: Send + Sync {
    fn handle(&self, ctx: &RequestContext) -> Result<(), HandlerError>;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn handle(&self, ctx: &RequestContext) -> Result<(), HandlerError> {
        (**self).handle(ctx)
    }
}

/// What a handler function may return: nothing, or a fallible result.
pub trait HandlerOutcome {
    fn into_result(self) -> Result<(), HandlerError>;
}

impl HandlerOutcome for () {
    fn into_result(self) -> Result<(), HandlerError> {
        Ok(())
    }
}

impl<E> HandlerOutcome for Result<(), E>
where
    E: Into<HandlerError>,
{
    fn into_result(self) -> Result<(), HandlerError> {
        self.map_err(Into::into)
    }
}

pub struct FnHandler<F> {
    f: F,
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

impl<F, R> Handler for FnHandler<F>
where
    F: Fn(&RequestContext) -> R + Send + Sync,
    R: HandlerOutcome,
{
    fn handle(&self, ctx: &RequestContext) -> Result<(), HandlerError> {
        (self.f)(ctx).into_result()
    }
}

/// Wraps a closure or function as a [`Handler`].
///
/// ```
/// use dev_web::handler_fn;
/// use http::StatusCode;
///
/// let teapot = handler_fn(|ctx: &dev_web::RequestContext| {
///     ctx.set_status(StatusCode::IM_A_TEAPOT);
///     ctx.end();
/// });
/// # let _ = teapot;
/// ```
pub fn handler_fn<F, R>(f: F) -> FnHandler<F>
where
    F: Fn(&RequestContext) -> R + Send + Sync,
    R: HandlerOutcome,
{
    FnHandler { f }
}
