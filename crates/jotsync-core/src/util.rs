//! Shared utility functions used across multiple modules.

use reqwest::StatusCode;
use serde::Deserialize;

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Trim a base URL and reject values without an http(s) scheme.
pub fn normalize_http_url(raw: &str, label: &str) -> Result<String, String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(format!("{label} must not be empty"));
    }
    if !is_http_url(trimmed) {
        return Err(format!("{label} must include http:// or https://"));
    }
    Ok(trimmed.to_string())
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in seconds.
pub fn unix_timestamp_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
    msg: Option<String>,
}

/// Condense a failed response body into a one-line message with the status appended.
pub fn describe_http_failure(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<RemoteErrorBody>(body) {
        if let Some(message) = payload
            .message
            .or(payload.msg)
            .or(payload.error_description)
            .or(payload.error)
        {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_text_option_trims_value() {
        assert_eq!(
            normalize_text_option(Some(" https://example.com ".to_string())),
            Some("https://example.com".to_string())
        );
    }

    #[test]
    fn is_http_url_accepts_valid_schemes() {
        assert!(is_http_url("http://localhost"));
        assert!(is_http_url("https://example.com"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("example.com"));
    }

    #[test]
    fn normalize_http_url_trims_trailing_slash() {
        assert_eq!(
            normalize_http_url("https://api.example.com/ ", "API URL").unwrap(),
            "https://api.example.com"
        );
        assert!(normalize_http_url("", "API URL").is_err());
        assert!(normalize_http_url("api.example.com", "API URL").is_err());
    }

    #[test]
    fn describe_http_failure_prefers_json_message() {
        let message = describe_http_failure(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        assert_eq!(message, "Invalid login credentials (400)");
    }

    #[test]
    fn describe_http_failure_falls_back_to_status() {
        assert_eq!(
            describe_http_failure(StatusCode::BAD_GATEWAY, "  "),
            "HTTP 502"
        );
        assert_eq!(
            describe_http_failure(StatusCode::NOT_FOUND, "no such route"),
            "no such route (404)"
        );
    }
}
