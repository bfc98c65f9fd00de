use axum::http::{HeaderMap, Method};
use reqwest::header::{HeaderValue, ACCEPT_ENCODING, HOST};
use tracing::debug;
use url::Url;

use crate::error::RestError;
use crate::models::{SparkApp, SparkAppEnvironment};

/// Spark History REST endpoint for applications, also exposed by live
/// application UIs.
pub const SPARK_APPS_ENDPOINT: &str = "/api/v1/applications";

/// A forwarding client for the Spark applications REST API.
///
/// The client replays an inbound request against an upstream Spark REST
/// endpoint: method and query string are copied, headers and cookies are
/// forwarded, and `Accept-Encoding` is pinned to `identity` so response
/// bodies decode without a decompression step. A cookie store keeps
/// redirect chains authenticated.
pub struct SparkRestClient {
    client: reqwest::Client,
    method: Method,
    headers: HeaderMap,
    base: Url,
}

impl SparkRestClient {
    /// Creates a client bound to `base_url` (scheme + host + port) that
    /// forwards the inbound method, query and headers.
    pub fn new(
        method: &Method,
        headers: &HeaderMap,
        query: Option<&str>,
        base_url: &str,
    ) -> Result<Self, RestError> {
        let mut base = Url::parse(base_url)?;
        base.set_path(SPARK_APPS_ENDPOINT);
        base.set_query(query);

        let mut forwarded = headers.clone();
        // The upstream Host must win over the inbound one.
        forwarded.remove(HOST);
        forwarded.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        let client = reqwest::Client::builder().cookie_store(true).build()?;

        Ok(Self {
            client,
            method: method.clone(),
            headers: forwarded,
            base,
        })
    }

    /// Retrieves the list of applications known to the upstream.
    pub async fn get_applications(&self) -> Result<Vec<SparkApp>, RestError> {
        let url = self.base.clone();
        debug!("Get the list of spark applications from URL: {}", url);
        self.do_request(url).await
    }

    /// Retrieves the application details for the given application id.
    pub async fn get_application_info(&self, app_id: &str) -> Result<SparkApp, RestError> {
        let mut url = self.base.clone();
        url.set_path(&format!("{SPARK_APPS_ENDPOINT}/{app_id}"));
        debug!("Get the application '{}' status from URL: {}", app_id, url);
        self.do_request(url).await
    }

    /// Retrieves the environment properties for the given application id.
    pub async fn get_environment(&self, app_id: &str) -> Result<SparkAppEnvironment, RestError> {
        let mut url = self.base.clone();
        url.set_path(&format!("{SPARK_APPS_ENDPOINT}/{app_id}/environment"));
        debug!(
            "Get the application '{}' environment properties from URL: {}",
            app_id, url
        );
        self.do_request(url).await
    }

    async fn do_request<T>(&self, url: Url) -> Result<T, RestError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .request(self.method.clone(), url)
            .headers(self.headers.clone())
            .send()
            .await?;

        debug!(
            "Upstream response: status={} content-type={:?} content-length={:?}",
            response.status(),
            response.headers().get(reqwest::header::CONTENT_TYPE),
            response.content_length(),
        );

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        // Spark UIs answer HTML until fully initialized; fail fast instead
        // of feeding HTML to the JSON decoder.
        if !content_type.contains("application/json") && !content_type.contains("text/json") {
            return Err(RestError::UpstreamNotReady);
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pins_accept_encoding_and_drops_host() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("proxy.example.com"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, br"));
        headers.insert("cookie", HeaderValue::from_static("JSESSIONID=abc123"));

        let client = SparkRestClient::new(
            &Method::GET,
            &headers,
            Some("status=running&limit=2147483647"),
            "http://localhost:18080",
        )
        .unwrap();

        assert_eq!(client.headers.get(HOST), None);
        assert_eq!(
            client.headers.get(ACCEPT_ENCODING).unwrap(),
            &HeaderValue::from_static("identity")
        );
        assert_eq!(
            client.headers.get("cookie").unwrap(),
            &HeaderValue::from_static("JSESSIONID=abc123")
        );
        assert_eq!(
            client.base.as_str(),
            "http://localhost:18080/api/v1/applications?status=running&limit=2147483647"
        );
    }

    #[test]
    fn test_new_rejects_invalid_base_url() {
        let headers = HeaderMap::new();
        let result = SparkRestClient::new(&Method::GET, &headers, None, "http://_:_");
        assert!(result.is_err());
    }
}
