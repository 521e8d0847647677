pub mod events;
pub mod jobs;
pub mod meta;
pub mod spec;
pub mod status;

use axum::http::HeaderMap;

/// Set by the upstream authenticator; this service never verifies it.
pub const PRINCIPAL_HEADER: &str = "x-lochness-principal";

pub(crate) fn principal(headers: &HeaderMap) -> Option<String> {
    headers
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn principal_ignores_blank_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(principal(&headers), None);
        headers.insert(PRINCIPAL_HEADER, HeaderValue::from_static("  "));
        assert_eq!(principal(&headers), None);
        headers.insert(PRINCIPAL_HEADER, HeaderValue::from_static(" alice "));
        assert_eq!(principal(&headers).as_deref(), Some("alice"));
    }
}
