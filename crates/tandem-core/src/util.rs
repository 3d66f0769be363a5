//! Small helpers shared by the stores, config and CLI.

/// Trim optional text; blank values become `None`.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// First `max_chars` characters of trimmed text, for log and error output
pub fn clip(value: &str, max_chars: usize) -> String {
    value.trim().chars().take(max_chars).collect()
}

/// Wall clock in Unix milliseconds; every record timestamp uses this unit
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_settings_normalize_to_none() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some(" \t\n".to_string())), None);
        assert_eq!(
            normalize_text_option(Some("  family  ".to_string())).as_deref(),
            Some("family")
        );
    }

    #[test]
    fn only_http_schemes_are_endpoints() {
        assert!(is_http_url("https://eu1-example.upstash.io"));
        assert!(is_http_url("http://127.0.0.1:8079"));
        assert!(!is_http_url("redis://localhost:6379"));
    }

    #[test]
    fn clip_counts_characters_not_bytes() {
        assert_eq!(clip("  héllo wörld  ", 5), "héllo");
        assert_eq!(clip(&"x".repeat(500), 180).len(), 180);
    }

    #[test]
    fn clock_is_in_milliseconds() {
        // 2020-09-13 in ms; a seconds clock would be three orders smaller
        assert!(unix_millis_now() > 1_600_000_000_000);
    }
}
