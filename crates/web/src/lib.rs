//! Location based handler chains for a small development HTTP server.
//!
//! Every request is matched against an ordered list of [`Location`]s. The
//! first match decides which handlers run; they share one [`RequestContext`]
//! and are followed by the static [`Resource`] writer, which serves a file
//! from the document root unless an earlier handler already produced a
//! response. A request no location matches gets an empty `404`.
//!
//! ```no_run
//! use dev_web::{Location, RequestContext, Server, ServerConfig, handler_fn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::builder()
//!         .port(8848)
//!         .document_root("./public")
//!         .location(Location::glob("/api/ping")?.handler(handler_fn(|ctx: &RequestContext| ctx.set_content("pong"))))
//!         .location(Location::any())
//!         .build();
//!
//!     Server::builder().config(config).build()?.start().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod context;
mod executor;
mod handler;
mod location;
mod request;
mod resource;
mod server;

pub use config::{DEFAULT_PORT, ResourceInjector, ServerConfig, ServerConfigBuilder, ServerSettings};
pub use context::{ChainState, RequestContext, ResponseState};
pub use executor::{Completion, HandlerChain};
pub use handler::{FnHandler, Handler, HandlerError, HandlerOutcome, SharedHandler, handler_fn};
pub use location::{Location, LocationError, Pattern, Predicate, match_location};
pub use request::RequestInfo;
pub use resource::{DocumentRootResolver, Resource, ResourceError, ResourceResolver};
pub use server::{Dispatcher, Server, ServerBuilder, ServerError};
