use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

const PREFLIGHT_MAX_AGE_SECS: u64 = 86400;

pub fn create_cors_layer(allowed_origins: &str) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(parse_allowed_origins(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::ORIGIN,
        ])
        .expose_headers([
            header::CONTENT_LENGTH,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(PREFLIGHT_MAX_AGE_SECS))
}

fn valid_origins(origins: &str) -> Vec<HeaderValue> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("CORS: Invalid origin '{}': {}", origin, e);
                None
            }
        })
        .collect()
}

fn parse_allowed_origins(origins: &str) -> AllowOrigin {
    let origins = valid_origins(origins);

    // Credentials are allowed, so a wildcard origin is not an option here.
    if origins.is_empty() {
        tracing::warn!("CORS: No valid origins configured, cross-origin requests will be refused");
        AllowOrigin::list(Vec::<HeaderValue>::new())
    } else {
        tracing::info!("CORS: Configured with {} allowed origin(s)", origins.len());
        AllowOrigin::list(origins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ALLOWED_ORIGINS;

    #[test]
    fn test_default_origins_are_valid() {
        assert_eq!(valid_origins(DEFAULT_ALLOWED_ORIGINS).len(), 2);
    }

    #[test]
    fn test_blank_and_invalid_origins_are_skipped() {
        let origins = valid_origins(" http://a.example , ,http://b.example\n,");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "http://a.example");

        assert!(valid_origins("http://bad\u{7f}origin").is_empty());
    }

    #[test]
    fn test_create_cors_layer() {
        let _layer = create_cors_layer("");
        let _layer = create_cors_layer(DEFAULT_ALLOWED_ORIGINS);
    }
}
