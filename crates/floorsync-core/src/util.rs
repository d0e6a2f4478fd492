//! Helpers shared by the queue, settings and transport code

/// Longest server message carried into a change's `last_error`
const ERROR_EXCERPT_CHARS: usize = 180;

/// Trimmed text, or `None` when nothing but whitespace remains
pub fn non_blank(value: impl AsRef<str>) -> Option<String> {
    let value = value.as_ref().trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Plant server URL with whitespace and trailing slashes removed
///
/// `None` unless the URL has an `http`/`https` scheme (any case) and a host.
pub fn server_url(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_end_matches('/');
    let (scheme, host) = trimmed.split_once("://")?;
    let known = scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https");
    (known && !host.is_empty()).then(|| trimmed.to_string())
}

/// Single-line excerpt of a response body for error messages
pub fn error_excerpt(body: &str) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= ERROR_EXCERPT_CHARS {
        return collapsed;
    }
    let mut excerpt = collapsed.chars().take(ERROR_EXCERPT_CHARS).collect::<String>();
    excerpt.push_str("...");
    excerpt
}

/// Current Unix timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
