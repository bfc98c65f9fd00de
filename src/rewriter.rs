use axum::body::{to_bytes, Body};
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::Response;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;
use std::io::{Read, Write};
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Spark's `spark.history.ui.maxApplications` default ceiling; the injected
/// `setAppLimit` call asks the history page for everything.
pub const INCOMPLETE_APPS_LIMIT: i64 = i32::MAX as i64;

const NO_INCOMPLETE_NEEDLE: &str = "No incomplete applications found!";
const NO_INCOMPLETE_BLOCK: &str = "<h4>No incomplete applications found!</h4>";

static SPARK_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<span[^>]*class=["'][^"']*\bversion\b[^"']*["'][^>]*>\s*([0-9]+)"#)
        .expect("spark version regex")
});

/// Patches the Spark History "incomplete applications" page.
///
/// The stock page renders `No incomplete applications found!` until event
/// logs land in the history backend, hiding applications that are already
/// running. The patch replaces that block with the scripts the regular
/// history page uses, so the table is populated from `/api/v1/applications`
/// — which the proxy serves merged with live applications.
///
/// Every failure path restores the original body: a rewriting problem must
/// never surface to the client.
pub async fn rewrite_incomplete_page(response: Response) -> Response {
    let content_type = header_str(&response, CONTENT_TYPE);
    if !content_type.contains("text/html") {
        return response;
    }

    let is_gzip = header_str(&response, CONTENT_ENCODING).contains("gzip");

    let (parts, body) = response.into_parts();
    let raw = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("Failed to read HTML response body: {}", err);
            return Response::from_parts(parts, Body::empty());
        }
    };

    let plain = if is_gzip {
        match gunzip(&raw) {
            Ok(plain) => plain,
            Err(err) => {
                warn!("Failed to decompress HTML response body: {}", err);
                return restore(parts, raw.to_vec());
            }
        }
    } else {
        raw.to_vec()
    };

    let html = String::from_utf8_lossy(&plain);
    if !html.contains(NO_INCOMPLETE_NEEDLE) {
        return restore(parts, raw.to_vec());
    }

    let modified = replace_no_incomplete_block(&html, INCOMPLETE_APPS_LIMIT);

    let body = if is_gzip {
        match gzip(modified.as_bytes()) {
            Ok(compressed) => compressed,
            Err(err) => {
                warn!("Failed to write modified HTML response body: {}", err);
                return restore(parts, raw.to_vec());
            }
        }
    } else {
        modified.into_bytes()
    };

    debug!("Added Spark historypage scripts into 'incomplete applications' page");
    restore(parts, body)
}

/// Rebuilds the response around `body`, fixing the length header. The
/// encoding header is left as received: the body handed in always matches
/// it.
fn restore(mut parts: axum::http::response::Parts, body: Vec<u8>) -> Response {
    parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    Response::from_parts(parts, Body::from(body))
}

fn header_str(response: &Response, name: axum::http::HeaderName) -> String {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

fn gunzip(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(raw);
    let mut plain = Vec::new();
    decoder.read_to_end(&mut plain)?;
    Ok(plain)
}

fn gzip(plain: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(plain)?;
    encoder.finish()
}

/// Replaces the "no incomplete applications" block with the history page
/// scripts. Spark 4 ships `historypage.js` as an ES module, so the
/// `setAppLimit` call has to be an import; Spark 3 takes the classic form.
fn replace_no_incomplete_block(html: &str, limit: i64) -> String {
    let replacement = match spark_major_from_html(html) {
        Some(major) if major >= 4 => {
            debug!("Spark major version {}: using ES module script call", major);
            format!(
                "<script src=\"/static/dataTables.rowsGroup.js\"></script>\n\
                 <script type=\"module\" src=\"/static/historypage.js\"></script>\n\
                 <script type=\"module\">\n  \
                 import {{ setAppLimit }} from \"/static/historypage.js\";\n  \
                 setAppLimit({limit});\n\
                 </script>\n\
                 <div id=\"history-summary\" class=\"row-fluid\"></div>\n"
            )
        }
        major => {
            debug!("Spark major version {:?}: using classic script call", major);
            format!(
                "<script src=\"/static/dataTables.rowsGroup.js\"></script>\n\
                 <div id=\"history-summary\" class=\"row-fluid\"></div>\n\
                 <script src=\"/static/historypage.js\"></script>\n\
                 <script>setAppLimit({limit})</script>\n"
            )
        }
    };

    if html.contains(NO_INCOMPLETE_BLOCK) {
        return html.replacen(NO_INCOMPLETE_BLOCK, &replacement, 1);
    }

    // fallback: replace the bare text
    html.replacen(NO_INCOMPLETE_NEEDLE, &replacement, 1)
}

/// Extracts the Spark *major* version from the UI HTML, looking for a span
/// whose class attribute carries the `version` token:
///
/// ```text
/// <span class="version">3.3.1</span>
/// <span class="version" style="margin-right: 15px;">4.0.0</span>
/// <span class="foo version bar">4.1.1</span>
/// ```
///
/// A lightweight regex is enough here: Spark's page structure is stable and
/// a full HTML parse would be wasted on every proxied response.
fn spark_major_from_html(html: &str) -> Option<u32> {
    SPARK_VERSION_RE
        .captures(html)
        .and_then(|captures| captures[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    const INCOMPLETE_PAGE_3: &str = concat!(
        "<html><head><title>History Server</title></head><body>",
        "<span class=\"version\" style=\"margin-right: 15px;\">3.3.1</span>",
        "<h4>No incomplete applications found!</h4>",
        "</body></html>"
    );

    const INCOMPLETE_PAGE_4: &str = concat!(
        "<html><body>",
        "<span class='navbar-text version'>4.0.0</span>",
        "<h4>No incomplete applications found!</h4>",
        "</body></html>"
    );

    fn html_response(body: Vec<u8>, gzip_encoded: bool) -> Response {
        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/html;charset=utf-8")
            .header(CONTENT_LENGTH, body.len());
        if gzip_encoded {
            builder = builder.header(CONTENT_ENCODING, "gzip");
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    #[test]
    fn test_spark_major_from_html() {
        assert_eq!(spark_major_from_html(INCOMPLETE_PAGE_3), Some(3));
        assert_eq!(spark_major_from_html(INCOMPLETE_PAGE_4), Some(4));
        assert_eq!(spark_major_from_html("<span class=\"ver\">3.3</span>"), None);
        assert_eq!(spark_major_from_html("no version here"), None);
    }

    #[test]
    fn test_replace_block_spark3_uses_classic_script() {
        let patched = replace_no_incomplete_block(INCOMPLETE_PAGE_3, INCOMPLETE_APPS_LIMIT);
        assert!(patched.contains("<script src=\"/static/historypage.js\"></script>"));
        assert!(patched.contains("<script>setAppLimit(2147483647)</script>"));
        assert!(patched.contains("<div id=\"history-summary\" class=\"row-fluid\"></div>"));
        assert!(!patched.contains(NO_INCOMPLETE_NEEDLE));
    }

    #[test]
    fn test_replace_block_spark4_uses_module_import() {
        let patched = replace_no_incomplete_block(INCOMPLETE_PAGE_4, INCOMPLETE_APPS_LIMIT);
        assert!(patched.contains("<script type=\"module\" src=\"/static/historypage.js\"></script>"));
        assert!(patched.contains("import { setAppLimit } from \"/static/historypage.js\";"));
        assert!(patched.contains("setAppLimit(2147483647);"));
    }

    #[test]
    fn test_replace_block_falls_back_to_bare_text() {
        let html = "<html><body>No incomplete applications found!</body></html>";
        let patched = replace_no_incomplete_block(html, INCOMPLETE_APPS_LIMIT);
        assert!(patched.contains("setAppLimit(2147483647)"));
    }

    #[test]
    fn test_gzip_round_trip_preserves_plaintext() {
        let plain = INCOMPLETE_PAGE_3.as_bytes();
        let compressed = gzip(plain).unwrap();
        assert_eq!(gunzip(&compressed).unwrap(), plain);
    }

    #[tokio::test]
    async fn test_rewrite_preserves_gzip_encoding() {
        let compressed = gzip(INCOMPLETE_PAGE_3.as_bytes()).unwrap();
        let response = html_response(compressed, true);

        let rewritten = rewrite_incomplete_page(response).await;

        assert_eq!(
            rewritten.headers().get(CONTENT_ENCODING).unwrap(),
            &HeaderValue::from_static("gzip")
        );
        let body = body_bytes(rewritten).await;
        let plain = String::from_utf8(gunzip(&body).unwrap()).unwrap();
        assert!(plain.contains("setAppLimit(2147483647)"));
        assert!(!plain.contains(NO_INCOMPLETE_NEEDLE));
    }

    #[tokio::test]
    async fn test_rewrite_updates_content_length() {
        let response = html_response(INCOMPLETE_PAGE_3.as_bytes().to_vec(), false);

        let rewritten = rewrite_incomplete_page(response).await;

        let declared: usize = rewritten
            .headers()
            .get(CONTENT_LENGTH)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = body_bytes(rewritten).await;
        assert_eq!(declared, body.len());
    }

    #[tokio::test]
    async fn test_pass_through_without_needle() {
        let html = "<html><body><h4>3 incomplete applications</h4></body></html>";
        let response = html_response(html.as_bytes().to_vec(), false);

        let rewritten = rewrite_incomplete_page(response).await;

        assert_eq!(body_bytes(rewritten).await, html.as_bytes());
    }

    #[tokio::test]
    async fn test_pass_through_non_html() {
        let body = br#"[{"id":"spark-1"}]"#.to_vec();
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.clone()))
            .unwrap();

        let rewritten = rewrite_incomplete_page(response).await;

        assert_eq!(body_bytes(rewritten).await, body);
    }

    #[tokio::test]
    async fn test_corrupt_gzip_restores_original_bytes() {
        let garbage = b"not gzip at all".to_vec();
        let response = html_response(garbage.clone(), true);

        let rewritten = rewrite_incomplete_page(response).await;

        assert_eq!(
            rewritten.headers().get(CONTENT_ENCODING).unwrap(),
            &HeaderValue::from_static("gzip")
        );
        assert_eq!(body_bytes(rewritten).await, garbage);
    }
}
