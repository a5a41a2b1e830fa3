use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use http::header::IntoHeaderName;
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use tokio::sync::watch;
use tracing::trace;

use crate::{RequestInfo, ServerConfig};

/// Where a chain stands between two handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// the next handler may run
    Advancing,
    /// a handler called [`RequestContext::stop`], waiting for `start` or `end`
    Paused,
    /// terminal, no more handlers run
    Ended,
}

/// The response being shaped by the chain.
#[derive(Debug)]
pub struct ResponseState {
    pub status: StatusCode,
    pub content: BytesMut,
    pub header: HeaderMap,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self { status: StatusCode::OK, content: BytesMut::new(), header: HeaderMap::new() }
    }
}

/// Per-request state shared by every handler of one chain.
///
/// Cloning is cheap and every clone refers to the same request, so a handler
/// can move a clone into a spawned task and call [`start`](Self::start) or
/// [`end`](Self::end) from there once its IO completes.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<Inner>,
}

struct Inner {
    request: RequestInfo,
    conf: Arc<ServerConfig>,
    response: Mutex<ResponseState>,
    state: watch::Sender<ChainState>,
    finalized: AtomicBool,
}

impl RequestContext {
    pub fn new(request: RequestInfo, conf: Arc<ServerConfig>) -> Self {
        let (state, _) = watch::channel(ChainState::Advancing);
        let inner = Inner { request, conf, response: Mutex::new(ResponseState::default()), state, finalized: AtomicBool::new(false) };
        Self { inner: Arc::new(inner) }
    }

    pub fn request(&self) -> &RequestInfo {
        &self.inner.request
    }

    pub fn conf(&self) -> &ServerConfig {
        &self.inner.conf
    }

    /// Locks the response for several edits at once.
    pub fn response(&self) -> MutexGuard<'_, ResponseState> {
        // a handler that panicked while holding the guard leaves it poisoned
        self.inner.response.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> StatusCode {
        self.response().status
    }

    pub fn set_status(&self, status: StatusCode) {
        self.response().status = status;
    }

    /// A copy of the content written so far.
    pub fn content(&self) -> Bytes {
        Bytes::copy_from_slice(&self.response().content)
    }

    /// Replaces the content written so far.
    pub fn set_content(&self, content: impl AsRef<[u8]>) {
        let mut response = self.response();
        response.content.clear();
        response.content.extend_from_slice(content.as_ref());
    }

    pub fn append_content(&self, content: impl AsRef<[u8]>) {
        self.response().content.extend_from_slice(content.as_ref());
    }

    pub fn header(&self, name: &str) -> Option<HeaderValue> {
        self.response().header.get(name).cloned()
    }

    pub fn set_header<K: IntoHeaderName>(&self, name: K, value: HeaderValue) {
        self.response().header.insert(name, value);
    }

    pub fn state(&self) -> ChainState {
        *self.inner.state.borrow()
    }

    pub fn is_ended(&self) -> bool {
        self.state() == ChainState::Ended
    }

    /// Ends the chain. Handlers that haven't run yet are skipped and the
    /// response is finalized from the current status, header and content.
    pub fn end(&self) {
        let changed = self.inner.state.send_if_modified(|state| match state {
            ChainState::Ended => false,
            _ => {
                *state = ChainState::Ended;
                true
            }
        });
        if changed {
            trace!(path = self.request().path(), "chain ended");
        }
    }

    /// Pauses the chain once the current handler returns.
    ///
    /// Does nothing unless the chain is advancing.
    pub fn stop(&self) {
        let changed = self.transition(ChainState::Advancing, ChainState::Paused);
        if changed {
            trace!(path = self.request().path(), "chain paused");
        }
    }

    /// Resumes a paused chain at the next handler that hasn't run.
    ///
    /// Does nothing unless the chain is paused, so calling it on an advancing
    /// chain never runs a handler twice.
    pub fn start(&self) {
        let changed = self.transition(ChainState::Paused, ChainState::Advancing);
        if changed {
            trace!(path = self.request().path(), "chain resumed");
        }
    }

    fn transition(&self, from: ChainState, to: ChainState) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            *state = to;
            true
        })
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ChainState> {
        self.inner.state.subscribe()
    }

    /// Discards whatever the chain produced, answers with `status` and ends.
    pub(crate) fn fail(&self, status: StatusCode) {
        {
            let mut response = self.response();
            response.status = status;
            response.content.clear();
        }
        self.end();
    }

    /// Turns the context into the response, only the first call gets it.
    pub(crate) fn finalize(&self) -> Option<Response<Bytes>> {
        if self.inner.finalized.swap(true, Ordering::AcqRel) {
            return None;
        }

        let ResponseState { status, content, header } = std::mem::take(&mut *self.response());
        let mut response = Response::new(content.freeze());
        *response.status_mut() = status;
        *response.headers_mut() = header;
        Some(response)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("target", &self.request().target())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;
    use http::header::CONTENT_TYPE;

    fn context() -> RequestContext {
        let request = RequestInfo::from(Request::builder().uri("/ctx?x=1").body(Bytes::new()).unwrap());
        RequestContext::new(request, Arc::new(ServerConfig::builder().build()))
    }

    #[test]
    fn defaults() {
        let ctx = context();

        assert_eq!(ctx.status(), StatusCode::OK);
        assert!(ctx.content().is_empty());
        assert!(ctx.response().header.is_empty());
        assert_eq!(ctx.state(), ChainState::Advancing);
        assert_eq!(ctx.request().query_param("x"), Some("1"));
    }

    #[test]
    fn stop_then_start() {
        let ctx = context();

        ctx.stop();
        assert_eq!(ctx.state(), ChainState::Paused);
        ctx.stop();
        assert_eq!(ctx.state(), ChainState::Paused);

        ctx.start();
        assert_eq!(ctx.state(), ChainState::Advancing);
        ctx.start();
        assert_eq!(ctx.state(), ChainState::Advancing);
    }

    #[test]
    fn end_is_terminal() {
        let ctx = context();

        ctx.stop();
        ctx.end();
        assert!(ctx.is_ended());

        ctx.start();
        ctx.stop();
        ctx.end();
        assert_eq!(ctx.state(), ChainState::Ended);
    }

    #[test]
    fn clones_share_state() {
        let ctx = context();
        let task_ctx = ctx.clone();

        task_ctx.set_status(StatusCode::CREATED);
        task_ctx.append_content("a");
        task_ctx.append_content(b"b");
        task_ctx.end();

        assert_eq!(ctx.status(), StatusCode::CREATED);
        assert_eq!(ctx.content(), Bytes::from_static(b"ab"));
        assert!(ctx.is_ended());
    }

    #[test]
    fn set_content_replaces() {
        let ctx = context();

        ctx.append_content("draft");
        ctx.set_content("final");
        assert_eq!(ctx.content(), Bytes::from_static(b"final"));
    }

    #[test]
    fn fail_discards_content() {
        let ctx = context();

        ctx.append_content("partial");
        ctx.fail(StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(ctx.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(ctx.content().is_empty());
        assert!(ctx.is_ended());
    }

    #[test]
    fn finalize_once() {
        let ctx = context();

        ctx.set_status(StatusCode::NOT_MODIFIED);
        ctx.set_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        ctx.set_content("body");

        let response = ctx.finalize().unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(response.body(), &Bytes::from_static(b"body"));

        assert!(ctx.finalize().is_none());
    }
}
