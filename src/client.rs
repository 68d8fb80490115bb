use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tokio::time::sleep;

use crate::{
    config::{self, build_url},
    inflight::{DedupKey, InFlight},
    token::{FileTokenStore, TokenStore},
    ApiError, ApiRequest, ApiResponse, ClientOptions, Method, Params, Result,
};

#[derive(Clone)]
/// HTTP client for the marketplace REST backend.
///
/// Clones share the connection pool, the token store and the registry of
/// in-flight GET requests. Separately constructed clients share nothing.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Option<Arc<dyn TokenStore>>,
    options: ClientOptions,
    in_flight: InFlight,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("tokens", &self.tokens)
            .field("options", &self.options)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl ApiClient {
    /// Creates an unauthenticated client for `base_url`
    /// (e.g. `https://api.example.com/v1`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            tokens: None,
            options: ClientOptions::default(),
            in_flight: InFlight::default(),
        }
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `MARKETPLACE_API_URL`: configured backend URL
    /// - `MARKETPLACE_ORIGIN`: origin the application is served from, used
    ///   when the API URL is unset or points at localhost in a deployment
    /// - `MARKETPLACE_TOKEN_FILE`: optional path of the token file
    ///
    /// # Example
    ///
    /// ```no_run
    /// use marketplace_http::ApiClient;
    ///
    /// let api = ApiClient::from_env().expect("missing MARKETPLACE_* env vars");
    /// ```
    pub fn from_env() -> std::result::Result<Self, String> {
        let configured = std::env::var(config::API_URL_ENV).ok();
        let origin = std::env::var(config::ORIGIN_ENV).ok();
        let base_url = config::resolve_base_url(configured.as_deref(), origin.as_deref())
            .map_err(|err| err.to_string())?;

        let client = Self::new(base_url);
        match std::env::var(config::TOKEN_FILE_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                Ok(client.with_token_store(FileTokenStore::new(path.trim())))
            }
            _ => Ok(client),
        }
    }

    /// Applies client options such as timeout and retry behavior.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.options = opts;
        self
    }

    /// Reads the bearer token from `store` before every attempt.
    pub fn with_token_store(mut self, store: impl TokenStore + 'static) -> Self {
        self.tokens = Some(Arc::new(store));
        self
    }

    /// Same as [`ApiClient::with_token_store`] for a store shared with other code.
    pub fn with_shared_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.tokens = Some(store);
        self
    }

    /// Uses a preconfigured `reqwest` client (proxies, custom roots, user agent).
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Number of GET requests currently on the wire.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Sends `request`.
    ///
    /// GET requests identical in path, parameters and caller-supplied
    /// `Authorization` share one attempt sequence while it runs. Every method
    /// is retried on 429/502/503 with exponential backoff up to
    /// [`ClientOptions::max_retries`] times.
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse> {
        if request.method != Method::Get {
            return self.send_with_retry(&request).await;
        }

        let key = DedupKey::for_request(&request);
        let client = self.clone();
        #[cfg(feature = "tracing")]
        let path = request.path.clone();

        let join = self
            .in_flight
            .join_or_start(key, async move { client.send_with_retry(&request).await });

        #[cfg(feature = "tracing")]
        {
            if matches!(join, crate::inflight::Join::Joined(_)) {
                tracing::debug!(path = %path, "joining in-flight GET request");
            }
        }

        join.into_future().await
    }

    /// GETs `path` and deserializes the JSON body.
    pub async fn get_json<T, P>(&self, path: &str, params: P) -> Result<T>
    where
        T: DeserializeOwned,
        P: Into<Params>,
    {
        self.request(ApiRequest::get(path).params(params))
            .await?
            .json()
    }

    /// POSTs `body` as JSON and deserializes the response body.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(ApiRequest::post(path).json(body)?)
            .await?
            .json()
    }

    /// PUTs `body` as JSON and deserializes the response body.
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(ApiRequest::put(path).json(body)?)
            .await?
            .json()
    }

    /// PATCHes `body` as JSON and deserializes the response body.
    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(ApiRequest::patch(path).json(body)?)
            .await?
            .json()
    }

    /// DELETEs `path`, returning the raw response.
    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.request(ApiRequest::delete(path)).await
    }

    async fn send_with_retry(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = build_url(&self.base_url, &request.path, &request.params)?;
        let mut attempt = 0usize;
        loop {
            let mut builder = self
                .http
                .request(request.method.to_reqwest(), url.clone())
                .headers(request.headers.clone())
                .timeout(Duration::from_millis(self.options.timeout_ms));

            if let Some(authorization) = self.stored_authorization(request) {
                builder = builder.header(header::AUTHORIZATION, authorization);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|err| ApiError::from_transport(&err))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|err| ApiError::from_transport(&err))?;

            if status.is_success() {
                return ApiResponse::decode(status.as_u16(), &body);
            }

            if should_retry_status(status) && attempt < self.options.max_retries {
                self.wait_before_retry(request, status, attempt).await;
                attempt += 1;
                continue;
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                method = request.method.as_str(),
                path = %request.path,
                status = status.as_u16(),
                attempts = attempt + 1,
                "request failed"
            );

            return Err(ApiError::from_status(status.as_u16(), attempt + 1, body));
        }
    }

    /// `Bearer <token>` from the token store, unless the caller already set
    /// an `Authorization` header.
    fn stored_authorization(&self, request: &ApiRequest) -> Option<header::HeaderValue> {
        if request.headers.contains_key(header::AUTHORIZATION) {
            return None;
        }
        let token = self.tokens.as_ref()?.access_token()?;
        let mut value = header::HeaderValue::from_str(&format!("Bearer {token}")).ok()?;
        value.set_sensitive(true);
        Some(value)
    }

    /// Waits `retry_backoff_ms * 2^attempt` before the next attempt.
    async fn wait_before_retry(&self, _request: &ApiRequest, _status: StatusCode, attempt: usize) {
        let delay_ms = self.options.backoff_ms(attempt);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = _request.method.as_str(),
            path = %_request.path,
            status = _status.as_u16(),
            retry = attempt + 1,
            "retrying request after {} ms",
            delay_ms
        );

        sleep(Duration::from_millis(delay_ms)).await;
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE
    )
}
