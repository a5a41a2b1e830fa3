//! The head of a request: request line and headers, no body yet.

use http::header::CONNECTION;
use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

/// A request head wrapping `http::Request<()>`.
///
/// The connection decodes one of these, buffers the body that follows and
/// then attaches it with [`RequestHeader::body`].
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl RequestHeader {
    /// Attaches a body, turning the head into a full `Request<T>`.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|()| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Methods that never carry a body (GET, HEAD, DELETE, OPTIONS, CONNECT)
    /// skip payload decoding entirely.
    pub fn need_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }

    /// Whether the connection stays open after this request is answered.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close` is sent,
    /// HTTP/1.0 only keeps the connection with an explicit `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        let connection = self.headers().get(CONNECTION).and_then(|value| value.to_str().ok());
        let has_token = |token: &str| connection.is_some_and(|value| value.split(',').any(|v| v.trim().eq_ignore_ascii_case(token)));

        match self.version() {
            Version::HTTP_11 => !has_token("close"),
            _ => has_token("keep-alive"),
        }
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(version: Version, connection: Option<&str>) -> RequestHeader {
        let mut builder = Request::builder().method(Method::GET).uri("/").version(version);
        if let Some(value) = connection {
            builder = builder.header(CONNECTION, value);
        }
        builder.body(()).unwrap().into()
    }

    #[test]
    fn keep_alive_by_version() {
        assert!(header(Version::HTTP_11, None).is_keep_alive());
        assert!(!header(Version::HTTP_11, Some("close")).is_keep_alive());
        assert!(!header(Version::HTTP_11, Some("Upgrade, Close")).is_keep_alive());

        assert!(!header(Version::HTTP_10, None).is_keep_alive());
        assert!(header(Version::HTTP_10, Some("Keep-Alive")).is_keep_alive());
    }

    #[test]
    fn body_attach() {
        let request = header(Version::HTTP_11, None).body("payload");
        assert_eq!(request.uri().path(), "/");
        assert_eq!(*request.body(), "payload");
    }

    #[test]
    fn need_body_by_method() {
        let post: RequestHeader = Request::builder().method(Method::POST).body(()).unwrap().into();
        assert!(post.need_body());
        assert!(!header(Version::HTTP_11, None).need_body());
    }
}
