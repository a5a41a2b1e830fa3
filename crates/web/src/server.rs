use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dev_http::connection::HttpConnection;
use dev_http::handler::Handler;
use http::{Request, Response, StatusCode};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::executor::HandlerChain;
use crate::handler::SharedHandler;
use crate::location::match_location;
use crate::{RequestContext, RequestInfo, Resource, ServerConfig};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("server config must be set")]
    MissingConfig,

    #[error("can't listen on {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct ServerBuilder {
    config: Option<Arc<ServerConfig>>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { config: None }
    }

    pub fn config(mut self, config: impl Into<Arc<ServerConfig>>) -> Self {
        self.config = Some(config.into());
        self
    }

    pub fn build(self) -> Result<Server, ServerError> {
        let config = self.config.ok_or(ServerError::MissingConfig)?;
        Ok(Server { config })
    }
}

#[derive(Debug)]
pub struct Server {
    config: Arc<ServerConfig>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    /// Listens on every interface at the configured port and serves forever.
    pub async fn start(self) -> Result<(), ServerError> {
        let port = self.config.port();
        let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let listener = TcpListener::bind(address).await.map_err(|source| ServerError::Bind { address, source })?;

        info!(
            "dev server start, visit {}\n  root = [{}]\n  listen = [{}]",
            access_url(local_ipv4(), port),
            self.config.document_root().display(),
            port
        );

        self.serve(listener).await;
        Ok(())
    }

    /// Serves connections accepted by `listener`, one task per connection.
    pub async fn serve(self, listener: TcpListener) {
        let dispatcher = Arc::new(Dispatcher::new(self.config));

        loop {
            let (tcp_stream, remote_addr) = match listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let (reader, writer) = tcp_stream.into_split();
                match HttpConnection::new(reader, writer).process(dispatcher).await {
                    Ok(()) => debug!(%remote_addr, "finished process, connection shutdown"),
                    Err(e) => error!(%remote_addr, cause = %e, "connection has error, shutdown"),
                }
            });
        }
    }
}

/// Routes each request to the handler chain of its location.
///
/// The location list is read from the config for every request, so changes
/// made with [`ServerConfig::set_locations`] apply to the next request.
pub struct Dispatcher {
    config: Arc<ServerConfig>,
    fallback: SharedHandler,
}

impl Dispatcher {
    /// Builds the static resource writer from `config`, running its
    /// `inject_resource` hook.
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let fallback = Resource::from_config(&config).write();
        Self { config, fallback }
    }

    pub async fn dispatch(&self, request: Request<Bytes>) -> Response<Bytes> {
        let request = RequestInfo::from(request);

        let locations = self.config.locations();
        let matched = locations.as_deref().and_then(|locations| match_location(request.target(), &request, locations));
        let Some(handlers) = matched else {
            debug!(method = %request.method(), uri = request.target(), "no location matched");
            return not_found(self.config.not_found_body().clone());
        };

        let chain = HandlerChain::with_fallback(handlers, Arc::clone(&self.fallback));
        drop(locations);

        let ctx = RequestContext::new(request, Arc::clone(&self.config));
        let completion = chain.run(&ctx).await;
        debug!(method = %ctx.request().method(), uri = ctx.request().target(), ?completion, "handler chain finished");

        ctx.finalize().unwrap_or_else(|| {
            error!(uri = ctx.request().target(), "request context finalized twice");
            status_response(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("config", &self.config).finish_non_exhaustive()
    }
}

#[async_trait]
impl Handler for Dispatcher {
    type Error = Infallible;

    async fn call(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Self::Error> {
        Ok(self.dispatch(req).await)
    }
}

fn not_found(body: Bytes) -> Response<Bytes> {
    status_response(StatusCode::NOT_FOUND, body)
}

fn status_response(status: StatusCode, body: Bytes) -> Response<Bytes> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

/// First IPv4 address of a non-loopback interface, the loopback address when
/// there is none.
fn local_ipv4() -> IpAddr {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!(cause = %e, "can't list network interfaces");
            Vec::new()
        }
    };

    interfaces
        .iter()
        .filter(|interface| !interface.is_loopback())
        .map(|interface| interface.ip())
        .find(IpAddr::is_ipv4)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn access_url(ip: IpAddr, port: u16) -> String {
    match port {
        80 => format!("http://{ip}"),
        _ => format!("http://{ip}:{port}"),
    }
}
