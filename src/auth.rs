//! Shared-API-key authentication for the HTTP surface.

use axum::http::{header, HeaderMap, StatusCode};

const MISSING_KEY_BODY: &str =
    "API key required. Provide it in Authorization header (Bearer <key>) or X-API-Key header";
const INVALID_KEY_BODY: &str = "Invalid API key";
const UNCONFIGURED_BODY: &str = "Server configuration error";

/// Extracts the presented API key from `Authorization` or `X-API-Key`.
///
/// `Authorization` wins when both are set. A bare token without the
/// `Bearer` prefix is accepted; malformed multi-part values are not.
pub fn presented_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        let mut parts = value.split_whitespace();
        return match (parts.next(), parts.next(), parts.next()) {
            (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
                Some(token.to_string())
            }
            (Some(token), None, None) => Some(token.to_string()),
            _ => None,
        };
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Validates the presented key against the configured one.
///
/// Missing or wrong keys map to 401; a server with no key configured maps
/// to 500, never letting requests through.
pub fn authorize(
    headers: &HeaderMap,
    configured: Option<&str>,
) -> Result<(), (StatusCode, &'static str)> {
    let Some(expected) = configured.filter(|key| !key.is_empty()) else {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, UNCONFIGURED_BODY));
    };
    match presented_key(headers) {
        None => Err((StatusCode::UNAUTHORIZED, MISSING_KEY_BODY)),
        Some(key) if key != expected => Err((StatusCode::UNAUTHORIZED, INVALID_KEY_BODY)),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn bearer_token_is_extracted() {
        let map = headers(&[("authorization", "Bearer sekrit")]);
        assert_eq!(presented_key(&map).as_deref(), Some("sekrit"));
    }

    #[test]
    fn bare_authorization_value_is_accepted() {
        let map = headers(&[("authorization", "sekrit")]);
        assert_eq!(presented_key(&map).as_deref(), Some("sekrit"));
    }

    #[test]
    fn x_api_key_is_a_fallback() {
        let map = headers(&[("x-api-key", "sekrit")]);
        assert_eq!(presented_key(&map).as_deref(), Some("sekrit"));
    }

    #[test]
    fn authorization_wins_over_x_api_key() {
        let map = headers(&[("authorization", "Bearer first"), ("x-api-key", "second")]);
        assert_eq!(presented_key(&map).as_deref(), Some("first"));
    }

    #[test]
    fn malformed_authorization_yields_nothing() {
        let map = headers(&[("authorization", "Basic a b c")]);
        assert_eq!(presented_key(&map), None);
    }

    #[test]
    fn missing_key_is_unauthorized() {
        let err = authorize(&HeaderMap::new(), Some("sekrit")).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn wrong_key_is_unauthorized() {
        let map = headers(&[("x-api-key", "nope")]);
        let err = authorize(&map, Some("sekrit")).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
        assert_eq!(err.1, "Invalid API key");
    }

    #[test]
    fn unconfigured_server_key_is_internal_error() {
        let map = headers(&[("x-api-key", "sekrit")]);
        let err = authorize(&map, None).unwrap_err();
        assert_eq!(err.0, StatusCode::INTERNAL_SERVER_ERROR);
        let err = authorize(&map, Some("")).unwrap_err();
        assert_eq!(err.0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn matching_key_passes() {
        let map = headers(&[("authorization", "bearer sekrit")]);
        assert!(authorize(&map, Some("sekrit")).is_ok());
    }
}
