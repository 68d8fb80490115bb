//! Backend origin resolution.

use reqwest::Url;

use crate::{ApiError, Result};

/// Environment variable holding the configured backend URL.
pub const API_URL_ENV: &str = "MARKETPLACE_API_URL";
/// Environment variable holding the origin the application is served from.
pub const ORIGIN_ENV: &str = "MARKETPLACE_ORIGIN";
/// Environment variable pointing at the token file.
pub const TOKEN_FILE_ENV: &str = "MARKETPLACE_TOKEN_FILE";

fn is_loopback(url: &Url) -> bool {
    match url.host_str() {
        Some(host) => {
            let host = host.trim_start_matches('[').trim_end_matches(']');
            host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1" || host == "::1"
        }
        None => false,
    }
}

fn parse_origin(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|err| ApiError::InvalidRequest(format!("invalid backend url '{raw}': {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::InvalidRequest(format!(
            "backend url '{raw}' must use http or https"
        )));
    }
    Ok(url)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Picks the backend origin from a configured URL and the serving origin.
///
/// A configured loopback URL is ignored when the serving origin is a real
/// host, so a development value cannot leak into a deployment.
pub fn resolve_base_url(configured: Option<&str>, fallback_origin: Option<&str>) -> Result<String> {
    let configured = non_empty(configured).map(parse_origin).transpose()?;
    let fallback = non_empty(fallback_origin).map(parse_origin).transpose()?;

    let chosen = match (configured, fallback) {
        (Some(configured), Some(fallback)) if is_loopback(&configured) && !is_loopback(&fallback) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(configured = %configured, fallback = %fallback, "ignoring loopback backend url outside local development");
            fallback
        }
        (Some(configured), _) => configured,
        (None, Some(fallback)) => fallback,
        (None, None) => {
            return Err(ApiError::InvalidRequest(format!(
                "no backend url configured; set {API_URL_ENV} or {ORIGIN_ENV}"
            )))
        }
    };

    Ok(chosen.as_str().trim_end_matches('/').to_owned())
}

/// Request path as it is appended to the base URL.
pub(crate) fn normalize_path(path: &str) -> &str {
    path.trim().trim_start_matches('/')
}

/// Joins a backend base URL, a request path and query parameters.
pub(crate) fn build_url(base_url: &str, path: &str, params: &crate::Params) -> Result<Url> {
    let joined = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        normalize_path(path)
    );
    let mut url = Url::parse(&joined)
        .map_err(|err| ApiError::InvalidRequest(format!("invalid request url '{joined}': {err}")))?;

    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params.iter());
    }
    Ok(url)
}
