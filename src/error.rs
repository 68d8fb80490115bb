use std::fmt;

/// Why the backend rejected a request with a 4xx status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClientErrorReason {
    /// 400: the request payload or query was malformed.
    BadRequest,
    /// 401: the session is missing or expired.
    SessionExpired,
    /// 403: authenticated but not allowed.
    Forbidden,
    /// 404
    NotFound,
    /// 409: the resource changed underneath the caller.
    Conflict,
    /// 422: the backend rejected one or more fields.
    Validation,
    /// Any other 4xx status.
    Other,
}

impl ClientErrorReason {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::SessionExpired,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            422 => Self::Validation,
            _ => Self::Other,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::BadRequest => "bad request",
            Self::SessionExpired => "session expired",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
            Self::Validation => "validation failed",
            Self::Other => "request rejected",
        }
    }
}

impl fmt::Display for ClientErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Coarse classification callers use to pick a user-facing message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// No response was received.
    Network,
    /// The request itself was at fault (4xx, including exhausted rate limits).
    Client,
    /// The backend or a gateway failed (5xx).
    Server,
}

/// Error type returned by this crate.
///
/// Every variant is `Clone` because one outcome of a deduplicated GET is
/// handed to every caller waiting on it.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ApiError {
    /// No response was received (DNS, connect, TLS, timeout, aborted body).
    #[error("network error: {message}")]
    Network { message: String, timed_out: bool },
    /// 4xx other than 429. Never retried.
    #[error("{reason} (http {status}): {body}")]
    Client {
        status: u16,
        reason: ClientErrorReason,
        body: String,
    },
    /// 429 that was still returned once the retry budget ran out.
    #[error("rate limited after {attempts} attempts: {body}")]
    RateLimited { attempts: usize, body: String },
    /// 502/503 that was still returned once the retry budget ran out.
    #[error("service temporarily unavailable (http {status}) after {attempts} attempts: {body}")]
    ServerUnavailable {
        status: u16,
        attempts: usize,
        body: String,
    },
    /// 504. Not retried by this layer.
    #[error("gateway timeout: {body}")]
    GatewayTimeout { body: String },
    /// 500 and any other 5xx without a dedicated variant.
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    /// Non-success status outside the 4xx/5xx ranges.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// A success response whose body is not valid JSON.
    #[error("decode error: {0}")]
    Decode(String),
    /// The request could not be built (bad path, unserializable body, bad header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The shared attempt task ended without producing a result.
    #[error("request interrupted before completion")]
    Interrupted,
}

impl ApiError {
    /// Maps a terminal non-success status to its error variant.
    ///
    /// `attempts` counts every network attempt made, the first one included.
    pub fn from_status(status: u16, attempts: usize, body: String) -> Self {
        match status {
            429 => Self::RateLimited { attempts, body },
            502 | 503 => Self::ServerUnavailable {
                status,
                attempts,
                body,
            },
            504 => Self::GatewayTimeout { body },
            400..=499 => Self::Client {
                status,
                reason: ClientErrorReason::from_status(status),
                body,
            },
            500..=599 => Self::Server { status, body },
            _ => Self::Http { status, body },
        }
    }

    pub(crate) fn from_transport(err: &reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
            timed_out: err.is_timeout(),
        }
    }

    /// HTTP status of the last response, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. }
            | Self::ServerUnavailable { status, .. }
            | Self::Server { status, .. }
            | Self::Http { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::GatewayTimeout { .. } => Some(504),
            Self::Network { .. }
            | Self::Decode(_)
            | Self::InvalidRequest(_)
            | Self::Interrupted => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network { .. } | Self::Interrupted => ErrorClass::Network,
            Self::Client { .. } | Self::RateLimited { .. } | Self::InvalidRequest(_) => {
                ErrorClass::Client
            }
            Self::ServerUnavailable { .. }
            | Self::GatewayTimeout { .. }
            | Self::Server { .. }
            | Self::Decode(_) => ErrorClass::Server,
            Self::Http { status, .. } if *status >= 500 => ErrorClass::Server,
            Self::Http { .. } => ErrorClass::Client,
        }
    }

    /// True for a 401, which callers answer by asking the user to sign in again.
    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            Self::Client {
                reason: ClientErrorReason::SessionExpired,
                ..
            }
        )
    }

    /// Human-readable reason the backend put in its JSON error payload.
    ///
    /// Looks at the `message` field first, then `error`.
    pub fn backend_message(&self) -> Option<String> {
        let body = match self {
            Self::Client { body, .. }
            | Self::RateLimited { body, .. }
            | Self::ServerUnavailable { body, .. }
            | Self::GatewayTimeout { body }
            | Self::Server { body, .. }
            | Self::Http { body, .. } => body,
            _ => return None,
        };

        let payload: serde_json::Value = serde_json::from_str(body).ok()?;
        ["message", "error"].iter().find_map(|field| match payload.get(field)? {
            serde_json::Value::String(text) => Some(text.clone()),
            serde_json::Value::Array(items) => {
                let joined = items
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .collect::<Vec<_>>()
                    .join("; ");
                (!joined.is_empty()).then_some(joined)
            }
            _ => None,
        })
    }
}
