use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use chrono::{TimeZone, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static KILL_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.*)/[^/]+/kill[/]{0,1}(\?.*)?$").expect("kill path regex"));

/// Strips the trailing `<target>/kill` segment from a Spark job or stage
/// kill path, yielding the page the action was triggered from.
///
/// Paths that do not match the kill pattern are returned unchanged, which
/// also makes the function idempotent.
pub fn clean_kill_url_path(path: &str) -> String {
    match KILL_PATH_RE.captures(path) {
        Some(captures) => captures[1].to_string(),
        None => path.to_string(),
    }
}

/// Converts an epoch timestamp in milliseconds to the Spark History Server
/// time format, always in UTC:
///
/// ```text
/// 1767710303938 -> "2026-01-06T14:38:23.938GMT"
/// ```
pub fn format_spark_time(epoch_millis: i64) -> String {
    match Utc.timestamp_millis_opt(epoch_millis).single() {
        Some(time) => time.format("%Y-%m-%dT%H:%M:%S%.3fGMT").to_string(),
        None => String::new(),
    }
}

/// Merges two lists into one, de-duplicated by the key function.
/// When a key exists on both sides the element from `preferred` wins.
///
/// Elements from `other` keep their positions; `preferred`-only elements are
/// appended after them. Empty keys are discarded. Allocates exactly one
/// output vector of capacity `preferred.len() + other.len()` and one index
/// map sized to `other.len()`.
pub fn merge_by_key<T, F>(preferred: Vec<T>, other: Vec<T>, key_fn: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let mut merged: Vec<T> = Vec::with_capacity(preferred.len() + other.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(other.len());

    for item in other {
        let key = key_fn(&item);
        if key.is_empty() {
            continue;
        }
        index.insert(key.to_string(), merged.len());
        merged.push(item);
    }

    for item in preferred {
        let key = key_fn(&item);
        if key.is_empty() {
            continue;
        }
        match index.get(key) {
            Some(&slot) => merged[slot] = item,
            None => merged.push(item),
        }
    }

    merged
}

/// Reports whether the request originates from a browser, judged by the
/// `Mozilla` marker present in every mainstream browser User-Agent.
pub fn is_browser_request(headers: &HeaderMap) -> bool {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|agent| agent.contains("Mozilla"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_clean_kill_url_path() {
        let cases = vec![
            (
                "/sparkui/spark-4feb1501874842e8854dae05e4e81b19/jobs/job/kill?id=0",
                "/sparkui/spark-4feb1501874842e8854dae05e4e81b19/jobs",
            ),
            (
                "/sparkui/spark-4feb1501874842e8854dae05e4e81b19/stages/stage/kill?id=0",
                "/sparkui/spark-4feb1501874842e8854dae05e4e81b19/stages",
            ),
            (
                "/sparkui/spark-4feb1501874842e8854dae05e4e81b19/jobs/job/kill/?id=2",
                "/sparkui/spark-4feb1501874842e8854dae05e4e81b19/jobs",
            ),
            (
                "/sparkui/spark-4feb1501874842e8854dae05e4e81b19/stages/stage/kill/?id=3",
                "/sparkui/spark-4feb1501874842e8854dae05e4e81b19/stages",
            ),
            (
                "/spark-4feb1501874842e8854dae05e4e81b19/jobs",
                "/spark-4feb1501874842e8854dae05e4e81b19/jobs",
            ),
        ];

        for (input, expected) in cases {
            assert_eq!(clean_kill_url_path(input), expected, "input: {input}");
        }
    }

    #[test]
    fn test_clean_kill_url_path_is_idempotent() {
        let once = clean_kill_url_path("/sparkui/app-1/jobs/job/kill?id=7");
        let twice = clean_kill_url_path(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_format_spark_time() {
        assert_eq!(format_spark_time(1767710303938), "2026-01-06T14:38:23.938GMT");
        assert_eq!(format_spark_time(0), "1970-01-01T00:00:00.000GMT");
    }

    #[test]
    fn test_merge_by_key_prefers_first_argument() {
        let preferred = vec![("a", 1), ("b", 2)];
        let other = vec![("b", 20), ("c", 30)];

        let merged = merge_by_key(preferred, other, |item| item.0);

        assert_eq!(merged, vec![("b", 2), ("c", 30), ("a", 1)]);
    }

    #[test]
    fn test_merge_by_key_discards_empty_keys() {
        let preferred = vec![("", 1), ("a", 2)];
        let other = vec![("", 10), ("b", 20)];

        let merged = merge_by_key(preferred, other, |item| item.0);

        assert_eq!(merged, vec![("b", 20), ("a", 2)]);
    }

    #[test]
    fn test_is_browser_request() {
        let mut headers = HeaderMap::new();
        assert!(!is_browser_request(&headers));

        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8.4.0"));
        assert!(!is_browser_request(&headers));

        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/120.0"),
        );
        assert!(is_browser_request(&headers));
    }
}
