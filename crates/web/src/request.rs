//! Read-only view of the request a chain is running for.
//!
//! The transport hands over a fully buffered `Request<Bytes>`; [`RequestInfo`]
//! keeps its head, splits the target into path and query, and decodes the
//! query pairs once so handlers don't have to.

use bytes::Bytes;
use dev_http::protocol::RequestHeader;
use http::uri::PathAndQuery;
use http::{HeaderMap, Method, Request, Uri, Version};
use tracing::warn;

#[derive(Debug)]
pub struct RequestInfo {
    header: RequestHeader,
    query_pairs: Vec<(String, String)>,
    body: Bytes,
}

impl RequestInfo {
    pub fn method(&self) -> &Method {
        self.header.method()
    }

    pub fn uri(&self) -> &Uri {
        self.header.uri()
    }

    pub fn version(&self) -> Version {
        self.header.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.header.headers()
    }

    /// The request target as received, path plus query string.
    pub fn target(&self) -> &str {
        self.uri().path_and_query().map_or("/", PathAndQuery::as_str)
    }

    pub fn path(&self) -> &str {
        self.uri().path()
    }

    /// The raw query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.uri().query()
    }

    /// Decoded query pairs in the order they appear.
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query_pairs
    }

    /// First decoded value of the query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_pairs.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    /// The accumulated request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

impl From<Request<Bytes>> for RequestInfo {
    fn from(request: Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        let header = RequestHeader::from(parts);

        let query_pairs = match header.uri().query() {
            Some(query) => serde_urlencoded::from_str(query).unwrap_or_else(|e| {
                warn!(cause = %e, query, "can't decode query string, ignore it");
                Vec::new()
            }),
            None => Vec::new(),
        };

        Self { header, query_pairs, body }
    }
}
