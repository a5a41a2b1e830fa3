//! Serves the directory given as first argument (the current one by default)
//! on port 8848, with a couple of mock endpoints in front of it.
//!
//! ```text
//! curl -v http://127.0.0.1:8848/api/user?id=7
//! curl -v http://127.0.0.1:8848/api/slow
//! curl -v -d 'name=dev' http://127.0.0.1:8848/echo
//! ```

use std::time::Duration;

use dev_web::{Location, RequestContext, Server, ServerConfig, ServerSettings, handler_fn};
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Method, StatusCode};
use serde_json::json;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

fn user(ctx: &RequestContext) -> Result<(), serde_json::Error> {
    let Some(id) = ctx.request().query_param("id") else {
        ctx.set_status(StatusCode::BAD_REQUEST);
        ctx.end();
        return Ok(());
    };

    let body = serde_json::to_vec(&json!({ "id": id, "name": format!("user-{id}") }))?;
    ctx.set_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    ctx.set_content(body);
    Ok(())
}

fn slow(ctx: &RequestContext) {
    ctx.stop();
    let ctx = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        ctx.set_content("done after 500ms\n");
        ctx.start();
    });
}

fn echo(ctx: &RequestContext) {
    ctx.set_content(ctx.request().body());
    ctx.end();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = ServerSettings {
        port: Some(8848),
        document_root: std::env::args().nth(1).unwrap_or_else(|| ".".to_string()).into(),
        ..ServerSettings::default()
    };

    let config = ServerConfig::builder()
        .settings(settings)
        .location(Location::glob("/api/user?*")?.handler(handler_fn(user)))
        .location(Location::glob("/api/slow")?.handler(handler_fn(slow)))
        .location(Location::predicate(|request| request.method() == Method::POST).handler(handler_fn(echo)))
        .location(Location::regex(r"\.(html?|css|js|json|png|jpe?g|gif|svg|ico)$")?)
        .location(Location::any())
        .inject_resource(|resource| {
            info!(root = %resource.document_root().display(), "serving static resources");
        })
        .build();

    Server::builder().config(config).build()?.start().await?;
    Ok(())
}
