//! Runs a context through its handler chain.
//!
//! The chain is the matched location's handlers followed by the fallback
//! resource writer. [`HandlerChain::run`] is the only place that invokes them:
//! before each handler it waits out a pause and stops for good once the
//! context has ended. A paused chain resumes when some clone of the context,
//! usually held by a spawned task, calls `start` or `end`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use http::StatusCode;
use tokio::sync::watch;
use tracing::{error, trace};

use crate::context::ChainState;
use crate::handler::{Handler, SharedHandler};
use crate::RequestContext;

/// How a chain run finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// the context was ended, `executed` handlers had run by then
    Ended { executed: usize },
    /// every handler ran and none ended the context
    Exhausted,
}

#[derive(Clone)]
pub struct HandlerChain {
    handlers: Vec<SharedHandler>,
}

impl HandlerChain {
    pub fn new(handlers: Vec<SharedHandler>) -> Self {
        Self { handlers }
    }

    /// The location's handlers with `fallback` appended.
    pub fn with_fallback(handlers: &[SharedHandler], fallback: SharedHandler) -> Self {
        let mut chain = Vec::with_capacity(handlers.len() + 1);
        chain.extend(handlers.iter().cloned());
        chain.push(fallback);
        Self { handlers: chain }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub async fn run(&self, ctx: &RequestContext) -> Completion {
        let mut state = ctx.subscribe();

        for (index, handler) in self.handlers.iter().enumerate() {
            if wait_unpaused(&mut state).await == ChainState::Ended {
                return Completion::Ended { executed: index };
            }

            trace!(index, path = ctx.request().path(), "invoke handler");
            invoke(ctx, index, &**handler);
        }

        // the last handler may have deferred the response to a spawned task
        match wait_unpaused(&mut state).await {
            ChainState::Ended => Completion::Ended { executed: self.handlers.len() },
            _ => Completion::Exhausted,
        }
    }
}

impl std::fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerChain").field("len", &self.handlers.len()).finish()
    }
}

async fn wait_unpaused(state: &mut watch::Receiver<ChainState>) -> ChainState {
    match state.wait_for(|state| *state != ChainState::Paused).await {
        Ok(state) => *state,
        // the sender lives in the context `run` borrows, so it outlives this wait;
        // a spawned task dropping its clone without `start` or `end` leaves the chain paused
        Err(_) => ChainState::Ended,
    }
}

fn invoke(ctx: &RequestContext, index: usize, handler: &dyn Handler) {
    let cause = match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(ctx))) {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e.to_string(),
        Err(payload) => panic_message(payload.as_ref()),
    };

    error!(index, path = ctx.request().path(), %cause, "handler failed, end request with internal server error");
    ctx.fail(StatusCode::INTERNAL_SERVER_ERROR);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerError, handler_fn};
    use crate::{RequestInfo, ServerConfig};
    use bytes::Bytes;
    use http::Request;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Trace = Arc<Mutex<Vec<usize>>>;

    fn context() -> RequestContext {
        let request = RequestInfo::from(Request::builder().uri("/chain").body(Bytes::new()).unwrap());
        RequestContext::new(request, Arc::new(ServerConfig::builder().build()))
    }

    fn recording(trace: &Trace, index: usize) -> SharedHandler {
        let trace = Arc::clone(trace);
        Arc::new(handler_fn(move |_: &RequestContext| trace.lock().unwrap().push(index)))
    }

    fn recorded(trace: &Trace) -> Vec<usize> {
        trace.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn run_all_in_order() {
        let trace = Trace::default();
        let chain = HandlerChain::new((0..4).map(|i| recording(&trace, i)).collect());

        let completion = chain.run(&context()).await;

        assert_eq!(completion, Completion::Exhausted);
        assert_eq!(recorded(&trace), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn fallback_runs_last() {
        let trace = Trace::default();
        let handlers = vec![recording(&trace, 0), recording(&trace, 1)];
        let chain = HandlerChain::with_fallback(&handlers, recording(&trace, 99));

        assert_eq!(chain.len(), 3);
        chain.run(&context()).await;
        assert_eq!(recorded(&trace), vec![0, 1, 99]);
    }

    #[tokio::test]
    async fn resume_after_async_start() {
        let trace = Trace::default();
        let pausing: SharedHandler = {
            let trace = Arc::clone(&trace);
            Arc::new(handler_fn(move |ctx: &RequestContext| {
                trace.lock().unwrap().push(1);
                ctx.stop();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    ctx.start();
                });
            }))
        };
        let chain = HandlerChain::new(vec![recording(&trace, 0), pausing, recording(&trace, 2), recording(&trace, 3)]);

        let completion = chain.run(&context()).await;

        assert_eq!(completion, Completion::Exhausted);
        assert_eq!(recorded(&trace), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn paused_chain_does_not_advance() {
        let trace = Trace::default();
        let ctx = context();
        let pausing: SharedHandler = Arc::new(handler_fn(|ctx: &RequestContext| ctx.stop()));
        let chain = HandlerChain::new(vec![recording(&trace, 0), pausing, recording(&trace, 2)]);

        let run = tokio::time::timeout(Duration::from_millis(50), chain.run(&ctx)).await;

        assert!(run.is_err());
        assert_eq!(recorded(&trace), vec![0]);
        assert_eq!(ctx.state(), ChainState::Paused);
    }

    #[tokio::test]
    async fn dropped_task_clone_leaves_chain_paused() {
        let trace = Trace::default();
        let ctx = context();
        let abandoning: SharedHandler = Arc::new(handler_fn(|ctx: &RequestContext| {
            ctx.stop();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                // the task panics while holding its clone
                assert!(ctx.is_ended(), "task failed before resuming");
            });
        }));
        let chain = HandlerChain::new(vec![abandoning, recording(&trace, 1)]);

        let run = tokio::time::timeout(Duration::from_millis(50), chain.run(&ctx)).await;

        assert!(run.is_err());
        assert!(recorded(&trace).is_empty());
        assert_eq!(ctx.state(), ChainState::Paused);
    }

    #[tokio::test]
    async fn end_skips_the_rest() {
        let trace = Trace::default();
        let ending: SharedHandler = Arc::new(handler_fn(|ctx: &RequestContext| {
            ctx.set_content("early");
            ctx.end();
        }));
        let chain = HandlerChain::new(vec![recording(&trace, 0), ending, recording(&trace, 2)]);
        let ctx = context();

        let completion = chain.run(&ctx).await;

        assert_eq!(completion, Completion::Ended { executed: 2 });
        assert_eq!(recorded(&trace), vec![0]);
        assert_eq!(ctx.finalize().unwrap().body(), &Bytes::from_static(b"early"));
        assert!(ctx.finalize().is_none());
    }

    #[tokio::test]
    async fn end_from_spawned_task() {
        let trace = Trace::default();
        let deferring: SharedHandler = Arc::new(handler_fn(|ctx: &RequestContext| {
            ctx.stop();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                ctx.set_content("late");
                ctx.end();
            });
        }));
        let chain = HandlerChain::new(vec![deferring, recording(&trace, 1)]);
        let ctx = context();

        let completion = chain.run(&ctx).await;

        assert_eq!(completion, Completion::Ended { executed: 1 });
        assert!(recorded(&trace).is_empty());
        assert_eq!(ctx.content(), Bytes::from_static(b"late"));
    }

    #[tokio::test]
    async fn last_handler_may_defer() {
        let deferring: SharedHandler = Arc::new(handler_fn(|ctx: &RequestContext| {
            ctx.stop();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ctx.end();
            });
        }));
        let chain = HandlerChain::new(vec![deferring]);

        assert_eq!(chain.run(&context()).await, Completion::Ended { executed: 1 });
    }

    #[tokio::test]
    async fn start_while_advancing_never_repeats() {
        let trace = Trace::default();
        let eager: SharedHandler = {
            let trace = Arc::clone(&trace);
            Arc::new(handler_fn(move |ctx: &RequestContext| {
                trace.lock().unwrap().push(0);
                ctx.start();
                ctx.start();
            }))
        };
        let chain = HandlerChain::new(vec![eager, recording(&trace, 1), recording(&trace, 2)]);

        chain.run(&context()).await;
        assert_eq!(recorded(&trace), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn error_becomes_internal_server_error() {
        let trace = Trace::default();
        let failing: SharedHandler = Arc::new(handler_fn(|ctx: &RequestContext| -> Result<(), std::io::Error> {
            ctx.append_content("half written");
            Err(std::io::Error::other("boom"))
        }));
        let chain = HandlerChain::new(vec![failing, recording(&trace, 1)]);
        let ctx = context();

        let completion = chain.run(&ctx).await;

        assert_eq!(completion, Completion::Ended { executed: 1 });
        assert!(recorded(&trace).is_empty());
        let response = ctx.finalize().unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn panic_is_isolated() {
        let trace = Trace::default();
        let panicking: SharedHandler = Arc::new(handler_fn(|_: &RequestContext| -> Result<(), HandlerError> { panic!("handler bug") }));
        let chain = HandlerChain::new(vec![recording(&trace, 0), panicking, recording(&trace, 2)]);
        let ctx = context();

        let completion = chain.run(&ctx).await;

        assert_eq!(completion, Completion::Ended { executed: 2 });
        assert_eq!(recorded(&trace), vec![0]);
        assert_eq!(ctx.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn panic_payloads() {
        assert_eq!(panic_message(&"static"), "panicked: static");
        assert_eq!(panic_message(&String::from("owned")), "panicked: owned");
        assert_eq!(panic_message(&42_u8), "panicked");
    }
}
