//! Static files under the document root.
//!
//! [`Resource::write`] produces the handler appended to every matched chain.
//! When the handlers before it left the response untouched it serves the file
//! the request path points at, otherwise it just ends the chain so whatever
//! they produced is sent as is.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use mime::Mime;
use thiserror::Error;
use tracing::{debug, warn};

use crate::handler::{Handler, HandlerError, SharedHandler};
use crate::{RequestContext, ServerConfig};

/// Maps a request path onto a file system path.
#[cfg_attr(test, mockall::automock)]
pub trait ResourceResolver: Send + Sync {
    /// `None` when the path can't be served from `document_root`.
    fn resolve(&self, document_root: &Path, path: &str) -> Option<PathBuf>;
}

/// Percent-decodes the path and joins it to the document root, refusing
/// anything that would step outside it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentRootResolver;

impl ResourceResolver for DocumentRootResolver {
    fn resolve(&self, document_root: &Path, path: &str) -> Option<PathBuf> {
        let decoded = urlencoding::decode(path).ok()?;
        let mut resolved = document_root.to_path_buf();
        for component in Path::new(decoded.trim_start_matches('/')).components() {
            match component {
                Component::Normal(segment) => resolved.push(segment),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(resolved)
    }
}

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("request path `{path}` can't be mapped under the document root")]
    InvalidPath { path: String },

    #[error("no file to serve at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("can't read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ResourceError {
    fn io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path: path.to_path_buf() },
            _ => Self::Io { path: path.to_path_buf(), source },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPath { .. } | Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Io { source, .. } if source.kind() == io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Clone)]
pub struct Resource {
    document_root: PathBuf,
    resolver: Arc<dyn ResourceResolver>,
    index_files: Vec<String>,
    content_types: HashMap<String, Mime>,
}

impl Resource {
    pub fn new(document_root: impl Into<PathBuf>) -> Self {
        Self {
            document_root: document_root.into(),
            resolver: Arc::new(DocumentRootResolver),
            index_files: vec!["index.html".to_string()],
            content_types: default_content_types(),
        }
    }

    /// A resource for `config`'s document root and index files, passed
    /// through its `inject_resource` hook.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut resource = Self::new(config.document_root());
        resource.set_index_files(config.index_files());
        config.inject_resource(&mut resource);
        resource
    }

    pub fn document_root(&self) -> &Path {
        &self.document_root
    }

    pub fn set_document_root(&mut self, document_root: impl Into<PathBuf>) {
        self.document_root = document_root.into();
    }

    pub fn set_resolver(&mut self, resolver: impl ResourceResolver + 'static) {
        self.resolver = Arc::new(resolver);
    }

    /// File names tried, in order, when the path is a directory.
    pub fn index_files(&self) -> &[String] {
        &self.index_files
    }

    pub fn set_index_files<I, S>(&mut self, index_files: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.index_files = index_files.into_iter().map(Into::into).collect();
    }

    /// Registers the content type sent for files with `extension`, case-insensitive.
    pub fn set_content_type(&mut self, extension: &str, content_type: Mime) {
        self.content_types.insert(extension.to_ascii_lowercase(), content_type);
    }

    pub fn content_type(&self, path: &Path) -> Mime {
        path.extension()
            .and_then(|extension| extension.to_str())
            .and_then(|extension| self.content_types.get(&extension.to_ascii_lowercase()))
            .cloned()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM)
    }

    /// Reads the file `path` points at, or the first index file when it is a directory.
    pub async fn load(&self, path: &str) -> Result<(Bytes, Mime), ResourceError> {
        let resolved = self
            .resolver
            .resolve(&self.document_root, path)
            .ok_or_else(|| ResourceError::InvalidPath { path: path.to_string() })?;

        let metadata = tokio::fs::metadata(&resolved).await.map_err(|e| ResourceError::io(&resolved, e))?;
        let file = if metadata.is_dir() { self.find_index(&resolved).await? } else { resolved };

        let content = tokio::fs::read(&file).await.map_err(|e| ResourceError::io(&file, e))?;
        Ok((Bytes::from(content), self.content_type(&file)))
    }

    async fn find_index(&self, dir: &Path) -> Result<PathBuf, ResourceError> {
        for index_file in &self.index_files {
            let candidate = dir.join(index_file);
            if tokio::fs::metadata(&candidate).await.is_ok_and(|metadata| metadata.is_file()) {
                return Ok(candidate);
            }
        }
        Err(ResourceError::NotFound { path: dir.to_path_buf() })
    }

    /// The handler that finishes every matched chain.
    pub fn write(&self) -> SharedHandler {
        Arc::new(ResourceWriter { resource: Arc::new(self.clone()) })
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("document_root", &self.document_root)
            .field("index_files", &self.index_files)
            .finish_non_exhaustive()
    }
}

struct ResourceWriter {
    resource: Arc<Resource>,
}

impl Handler for ResourceWriter {
    fn handle(&self, ctx: &RequestContext) -> Result<(), HandlerError> {
        if has_response(ctx) {
            ctx.end();
            return Ok(());
        }

        ctx.stop();
        let resource = Arc::clone(&self.resource);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let path = ctx.request().path();
            match resource.load(path).await {
                Ok((content, content_type)) => {
                    debug!(path, %content_type, len = content.len(), "serve static resource");
                    if let Ok(value) = HeaderValue::from_str(content_type.as_ref()) {
                        ctx.set_header(CONTENT_TYPE, value);
                    }
                    ctx.set_content(content);
                }
                Err(e) => {
                    let status = e.status();
                    if status == StatusCode::NOT_FOUND {
                        debug!(path, cause = %e, "static resource not found");
                    } else {
                        warn!(path, cause = %e, "can't serve static resource");
                    }
                    ctx.set_status(status);
                }
            }
            ctx.end();
        });
        Ok(())
    }
}

fn has_response(ctx: &RequestContext) -> bool {
    let response = ctx.response();
    response.status != StatusCode::OK || !response.content.is_empty()
}

fn default_content_types() -> HashMap<String, Mime> {
    [
        ("html", mime::TEXT_HTML_UTF_8),
        ("htm", mime::TEXT_HTML_UTF_8),
        ("css", mime::TEXT_CSS_UTF_8),
        ("js", mime::APPLICATION_JAVASCRIPT_UTF_8),
        ("mjs", mime::APPLICATION_JAVASCRIPT_UTF_8),
        ("json", mime::APPLICATION_JSON),
        ("map", mime::APPLICATION_JSON),
        ("txt", mime::TEXT_PLAIN_UTF_8),
        ("xml", mime::TEXT_XML),
        ("csv", mime::TEXT_CSV_UTF_8),
        ("png", mime::IMAGE_PNG),
        ("jpg", mime::IMAGE_JPEG),
        ("jpeg", mime::IMAGE_JPEG),
        ("gif", mime::IMAGE_GIF),
        ("bmp", mime::IMAGE_BMP),
        ("svg", mime::IMAGE_SVG),
        ("woff", mime::FONT_WOFF),
        ("woff2", mime::FONT_WOFF2),
        ("pdf", mime::APPLICATION_PDF),
    ]
    .into_iter()
    .map(|(extension, content_type)| (extension.to_string(), content_type))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestInfo;
    use crate::executor::{Completion, HandlerChain};
    use http::{Request, Response};
    use std::fs;
    use tempfile::TempDir;

    fn document_root() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::create_dir_all(dir.path().join("src/app")).unwrap();
        fs::write(dir.path().join("src/app/main.js"), "console.log('dev');").unwrap();
        fs::write(dir.path().join("src/app/data.BIN"), [0_u8, 1, 2]).unwrap();
        dir
    }

    async fn serve(resource: &Resource, uri: &str, before: Vec<SharedHandler>) -> Response<Bytes> {
        let request = RequestInfo::from(Request::builder().uri(uri).body(Bytes::new()).unwrap());
        let ctx = RequestContext::new(request, Arc::new(ServerConfig::builder().build()));

        let chain = HandlerChain::with_fallback(&before, resource.write());
        let completion = chain.run(&ctx).await;

        assert_eq!(completion, Completion::Ended { executed: chain.len() });
        ctx.finalize().unwrap()
    }

    #[test]
    fn resolve_under_root() {
        let root = Path::new("/srv/www");
        let resolver = DocumentRootResolver;

        assert_eq!(resolver.resolve(root, "/src/app/main.js"), Some(root.join("src/app/main.js")));
        assert_eq!(resolver.resolve(root, "/./src/./main.js"), Some(root.join("src/main.js")));
        assert_eq!(resolver.resolve(root, "/my%20docs/a.txt"), Some(root.join("my docs/a.txt")));
        assert_eq!(resolver.resolve(root, "/"), Some(root.to_path_buf()));
    }

    #[test]
    fn refuse_traversal() {
        let root = Path::new("/srv/www");
        let resolver = DocumentRootResolver;

        assert_eq!(resolver.resolve(root, "/../etc/passwd"), None);
        assert_eq!(resolver.resolve(root, "/src/../../etc/passwd"), None);
        assert_eq!(resolver.resolve(root, "/%2e%2e/etc/passwd"), None);
    }

    #[test]
    fn content_types() {
        let mut resource = Resource::new("/srv/www");

        assert_eq!(resource.content_type(Path::new("a/index.HTML")), mime::TEXT_HTML_UTF_8);
        assert_eq!(resource.content_type(Path::new("app.js")), mime::APPLICATION_JAVASCRIPT_UTF_8);
        assert_eq!(resource.content_type(Path::new("Makefile")), mime::APPLICATION_OCTET_STREAM);

        resource.set_content_type("TPL", mime::TEXT_HTML_UTF_8);
        assert_eq!(resource.content_type(Path::new("list.tpl")), mime::TEXT_HTML_UTF_8);
    }

    #[tokio::test]
    async fn serve_file_with_content_type() {
        let root = document_root();
        let resource = Resource::new(root.path());

        let response = serve(&resource, "/src/app/main.js?v=1", vec![]).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/javascript; charset=utf-8");
        assert_eq!(response.body(), &Bytes::from_static(b"console.log('dev');"));
    }

    #[tokio::test]
    async fn unknown_extension_is_octet_stream() {
        let root = document_root();
        let response = serve(&Resource::new(root.path()), "/src/app/data.BIN", vec![]).await;

        assert_eq!(response.headers()[CONTENT_TYPE], "application/octet-stream");
        assert_eq!(response.body().as_ref(), &[0_u8, 1, 2]);
    }

    #[tokio::test]
    async fn directory_serves_index() {
        let root = document_root();
        let response = serve(&Resource::new(root.path()), "/", vec![]).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), &Bytes::from_static(b"<h1>home</h1>"));
    }

    #[tokio::test]
    async fn directory_without_index_is_not_found() {
        let root = document_root();
        let response = serve(&Resource::new(root.path()), "/src/app/", vec![]).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let root = document_root();
        let response = serve(&Resource::new(root.path()), "/nope.css", vec![]).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn traversal_is_not_found() {
        let root = document_root();
        let resource = Resource::new(root.path().join("src"));

        let response = serve(&resource, "/%2e%2e/index.html", vec![]).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn keep_content_from_earlier_handler() {
        let root = document_root();
        let generated: SharedHandler = Arc::new(crate::handler_fn(|ctx: &RequestContext| ctx.set_content("generated")));

        let response = serve(&Resource::new(root.path()), "/index.html", vec![generated]).await;

        assert_eq!(response.body(), &Bytes::from_static(b"generated"));
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn keep_status_from_earlier_handler() {
        let root = document_root();
        let redirect: SharedHandler = Arc::new(crate::handler_fn(|ctx: &RequestContext| {
            ctx.set_status(StatusCode::FOUND);
            ctx.set_header(http::header::LOCATION, HeaderValue::from_static("/index.html"));
        }));

        let response = serve(&Resource::new(root.path()), "/", vec![redirect]).await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[http::header::LOCATION], "/index.html");
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn custom_resolver() {
        let root = document_root();
        let target = root.path().join("src/app/main.js");

        let mut resolver = MockResourceResolver::new();
        resolver
            .expect_resolve()
            .withf(|_, path| path.ends_with("/app.js"))
            .times(1)
            .returning(move |_, _| Some(target.clone()));

        let mut resource = Resource::new(root.path());
        resource.set_resolver(resolver);

        let response = serve(&resource, "/app.js", vec![]).await;
        assert_eq!(response.body(), &Bytes::from_static(b"console.log('dev');"));
    }

    #[test]
    fn from_config_runs_injection() {
        let config = ServerConfig::builder()
            .document_root("/srv/www")
            .index_files(["index.htm"])
            .inject_resource(|resource| resource.set_content_type("tpl", mime::TEXT_HTML_UTF_8))
            .build();

        let resource = Resource::from_config(&config);

        assert_eq!(resource.document_root(), Path::new("/srv/www"));
        assert_eq!(resource.index_files(), &["index.htm".to_string()]);
        assert_eq!(resource.content_type(Path::new("a.tpl")), mime::TEXT_HTML_UTF_8);
    }
}
