use anyhow::Context;
use axum::body::Body;
use axum::extract::Request;
use axum::http::uri::PathAndQuery;
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::registry::AppRegistry;
use crate::rewriter;
use crate::utils;

/// Shared upstream HTTP client. The legacy hyper client never follows
/// redirects, so upstream 302s reach the response rewriter intact.
pub type ProxyClient = Client<HttpConnector, Body>;

pub fn build_proxy_client() -> ProxyClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// Error handling mode of a proxied request.
pub enum ErrorMode {
    /// Log and answer 502 with the upstream URL and error in the body.
    Default,
    /// Spark UI semantics, bound to the inbound URL path: kill actions send
    /// the browser back to the page they came from, and an unreachable UI
    /// demotes the registry record so the retry lands on Spark History.
    SparkUi { from_path: String },
}

/// Response rewriting strategy, selected by the route.
pub enum ResponseRewrite {
    PassThrough,
    /// Patch the "no incomplete applications" history page.
    IncompleteApps,
}

/// A single-upstream reverse proxy for one request.
///
/// The value carries the upstream URL (scheme, host and target path), the
/// application id the request belongs to (empty for non-app routes), and
/// the configured error and rewrite hooks.
pub struct SparkReverseProxy {
    upstream: Uri,
    app_id: String,
    registry: Arc<AppRegistry>,
    error_mode: ErrorMode,
    rewrite: ResponseRewrite,
}

impl SparkReverseProxy {
    pub fn new(upstream: Uri, app_id: &str, registry: Arc<AppRegistry>) -> Self {
        Self {
            upstream,
            app_id: app_id.to_string(),
            registry,
            error_mode: ErrorMode::Default,
            rewrite: ResponseRewrite::PassThrough,
        }
    }

    /// Switches the proxy to the Spark UI error handler, remembering the
    /// inbound URL path the handler redirects relative to.
    pub fn with_spark_ui_error_handler(mut self, from_path: &str) -> Self {
        self.error_mode = ErrorMode::SparkUi {
            from_path: from_path.to_string(),
        };
        self
    }

    /// Enables the incomplete-applications page rewriter on the response.
    pub fn with_incomplete_apps_rewriter(mut self) -> Self {
        self.rewrite = ResponseRewrite::IncompleteApps;
        self
    }

    /// Forwards the request to the upstream and post-processes the
    /// response.
    pub async fn serve(self, client: &ProxyClient, mut request: Request) -> Response {
        let upstream_display = self.upstream.to_string();
        let from_browser = utils::is_browser_request(request.headers());

        if let Err(err) = direct_request(&mut request, &self.upstream) {
            error!(
                "Invalid upstream request for application '{}' at URL {}: {:#}",
                self.app_id, upstream_display, err
            );
            return (
                StatusCode::BAD_GATEWAY,
                format!("Invalid upstream URL: {upstream_display}"),
            )
                .into_response();
        }

        match client.request(request).await {
            Ok(response) => {
                let mut response = response.map(Body::new);
                rewrite_redirect_location(&mut response);
                match self.rewrite {
                    ResponseRewrite::IncompleteApps => {
                        rewriter::rewrite_incomplete_page(response).await
                    }
                    ResponseRewrite::PassThrough => response,
                }
            }
            Err(err) => self.handle_error(&upstream_display, from_browser, err),
        }
    }

    fn handle_error(
        &self,
        upstream: &str,
        from_browser: bool,
        err: hyper_util::client::legacy::Error,
    ) -> Response {
        if is_cancel_err(&err) {
            debug!(
                "Request canceled for app '{}' url={}: {}",
                self.app_id, upstream, err
            );
            return StatusCode::BAD_GATEWAY.into_response();
        }

        match &self.error_mode {
            ErrorMode::Default => {
                error!(
                    "An error occurred when accessing the application '{}' at URL: {}, details: {:#}",
                    self.app_id, upstream, err
                );
                (
                    StatusCode::BAD_GATEWAY,
                    format!(
                        "An error occurred when accessing the application '{}' at URL: {}, {}",
                        self.app_id, upstream, err
                    ),
                )
                    .into_response()
            }
            ErrorMode::SparkUi { from_path } => {
                if from_path.contains("/kill") && from_browser {
                    let previous_page = utils::clean_kill_url_path(from_path);
                    info!(
                        "A spark job or stage kill was received '{}' for application '{}', redirecting to previous page: {}",
                        from_path, self.app_id, previous_page
                    );
                    return found_redirect(&previous_page);
                }

                error!(
                    "An error occurred when accessing spark application '{}' at URL: {}, redirect to spark history, details: {:#}",
                    self.app_id, upstream, err
                );
                self.registry.mark_completed(&self.app_id);
                // The retry routes to spark history once the record is Unknown.
                found_redirect(from_path)
            }
        }
    }
}

/// Builds a `302 Found` response with a host-relative `Location`, keeping
/// the client on the proxy.
pub fn found_redirect(location: &str) -> Response {
    let location = HeaderValue::from_str(location)
        .unwrap_or_else(|_| HeaderValue::from_static("/"));
    let mut response = StatusCode::FOUND.into_response();
    response.headers_mut().insert(header::LOCATION, location);
    response
}

/// Hop-by-hop headers the proxy must not forward.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Points the request at the upstream: scheme, authority and path come from
/// the upstream URL, the raw query is preserved from the inbound request,
/// and the `Host` header follows the upstream authority.
fn direct_request(request: &mut Request, upstream: &Uri) -> anyhow::Result<()> {
    let path = upstream.path();
    let path_and_query = match request.uri().query() {
        Some(query) => PathAndQuery::try_from(format!("{path}?{query}"))?,
        None => PathAndQuery::try_from(path.to_string())?,
    };

    let mut parts = upstream.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    *request.uri_mut() = Uri::from_parts(parts)?;

    let authority = upstream.authority().context("upstream URL has no host")?;
    request
        .headers_mut()
        .insert(header::HOST, HeaderValue::from_str(authority.as_str())?);

    for name in HOP_BY_HOP_HEADERS {
        request.headers_mut().remove(name);
    }

    Ok(())
}

/// Strips scheme and host from a `302 Found` `Location` header so the
/// client keeps talking to the proxy instead of the upstream directly.
fn rewrite_redirect_location(response: &mut Response) {
    if response.status() != StatusCode::FOUND {
        return;
    }

    let location = match response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
    {
        Some(location) => location,
        None => {
            warn!("No Location header found in the response");
            return;
        }
    };

    let uri: Uri = match location.parse() {
        Ok(uri) => uri,
        Err(err) => {
            error!("Error parsing Location URL '{}': {}", location, err);
            return;
        }
    };

    if uri.scheme().is_none() && uri.authority().is_none() {
        return;
    }

    let relative = uri
        .path_and_query()
        .map(|path_and_query| path_and_query.as_str())
        .unwrap_or("/")
        .to_string();

    if let Ok(value) = HeaderValue::from_str(&relative) {
        debug!("Rewritten Location header: {}", relative);
        response.headers_mut().insert(header::LOCATION, value);
    }
}

/// Reports whether the error is a request cancellation or timeout rather
/// than a real upstream failure. Typical sources: the browser closed the
/// connection, the user navigated away, or the upstream read timed out.
/// These are expected in a reverse proxy and stay at debug level.
fn is_cancel_err(err: &hyper_util::client::legacy::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(current) = source {
        if let Some(hyper_err) = current.downcast_ref::<hyper::Error>() {
            if hyper_err.is_canceled() || hyper_err.is_timeout() {
                return true;
            }
        }
        if let Some(io_err) = current.downcast_ref::<std::io::Error>() {
            if io_err.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        source = current.source();
    }
    false
}
