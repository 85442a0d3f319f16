use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use http::Method;

use crate::config::ClientConfig;
use crate::error::{ApiError, WireError};
use crate::protocol::messages::ErrorEnvelope;

use super::{ByteStream, Transport};

const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");
const VERSION_HEADER: HeaderName = HeaderName::from_static("anthropic-version");
const BETA_HEADER: HeaderName = HeaderName::from_static("anthropic-beta");
const REQUEST_ID_HEADER: &str = "request-id";
const ERROR_BODY_PREVIEW_BYTES: usize = 512;

fn transport_err(err: reqwest::Error) -> WireError {
    WireError::Transport(err.to_string())
}

fn build_reqwest_client(config: &ClientConfig) -> Result<reqwest::Client, WireError> {
    let pool_idle_timeout = if config.pool_idle_timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(config.pool_idle_timeout_secs))
    };

    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(config.timeout_secs));

    if let Some(proxy_url) = config.proxy.as_deref() {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| WireError::Transport(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !config.use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| WireError::Transport(format!("Failed to build HTTP client: {err}")))
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, WireError> {
    HeaderValue::from_str(value)
        .map_err(|err| WireError::InvalidRequest(format!("invalid {name} header value: {err}")))
}

/// `reqwest`-backed [`Transport`] with the API's auth and version headers
/// attached to every request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: url::Url,
    headers: HeaderMap,
}

impl HttpTransport {
    /// Build a pooled client from the given config.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Transport`] when the HTTP client cannot be built
    /// and [`WireError::InvalidRequest`] when the base URL or a header value
    /// is unusable.
    pub fn new(config: &ClientConfig) -> Result<Self, WireError> {
        let client = build_reqwest_client(config)?;
        Self::with_client(client, config)
    }

    /// Wrap an existing `reqwest` client.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidRequest`] when the base URL or a header
    /// value is unusable.
    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Result<Self, WireError> {
        let mut base_url = url::Url::parse(&config.base_url)
            .map_err(|err| WireError::InvalidRequest(format!("invalid base_url: {err}")))?;
        // `Url::join` replaces the last segment unless the path ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, header_value("x-api-key", &config.api_key)?);
        headers.insert(
            VERSION_HEADER,
            header_value("anthropic-version", &config.api_version)?,
        );
        if let Some(beta) = config.beta.as_deref() {
            headers.insert(BETA_HEADER, header_value("anthropic-beta", beta)?);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            client,
            base_url,
            headers,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &url::Url {
        &self.base_url
    }

    fn resolve(&self, path: &str) -> Result<url::Url, WireError> {
        let resolved = if path.starts_with("http://") || path.starts_with("https://") {
            url::Url::parse(path)
        } else {
            self.base_url.join(path.trim_start_matches('/'))
        };
        resolved.map_err(|err| WireError::InvalidRequest(format!("invalid URL '{path}': {err}")))
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        streaming: bool,
    ) -> Result<reqwest::Response, WireError> {
        let url = self.resolve(path)?;
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .headers(self.headers.clone());
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body)
                .map_err(|err| WireError::InvalidRequest(format!("unserializable body: {err}")))?;
            request = request.body(bytes);
        }
        if streaming {
            request = request.header(ACCEPT, "text/event-stream");
        }

        let response = request.send().await.map_err(transport_err)?;
        let status = response.status();
        tracing::debug!(%method, %url, status = status.as_u16(), "API response");
        if status.is_success() {
            return Ok(response);
        }
        Err(api_error(response).await)
    }

    async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, WireError> {
        let body = response.bytes().await.map_err(transport_err)?;
        serde_json::from_slice(&body)
            .map_err(|err| WireError::Decode(format!("response body is not JSON: {err}")))
    }

    fn into_byte_stream(response: reqwest::Response) -> ByteStream {
        Box::pin(
            response
                .bytes_stream()
                .map(|chunk: Result<Bytes, reqwest::Error>| chunk.map_err(transport_err)),
        )
    }
}

/// Turn a non-2xx response into [`WireError::Api`], keeping the server's
/// error type, message and request id.
async fn api_error(response: reqwest::Response) -> WireError {
    let status = response.status();
    let request_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(err) => return transport_err(err),
    };

    let error = match serde_json::from_slice::<ErrorEnvelope>(&body) {
        Ok(envelope) => ApiError::from_status(
            status.as_u16(),
            envelope.error.error_type,
            envelope.error.message,
            request_id,
        ),
        Err(_) => {
            let preview = &body[..body.len().min(ERROR_BODY_PREVIEW_BYTES)];
            let text = String::from_utf8_lossy(preview);
            let message = if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                text.trim().to_string()
            };
            ApiError::from_status(status.as_u16(), "error", message, request_id)
        }
    };
    tracing::warn!(
        status = status.as_u16(),
        error_type = %error.error_type,
        request_id = error.request_id.as_deref().unwrap_or(""),
        "API returned an error"
    );
    WireError::Api(error)
}

impl Transport for HttpTransport {
    async fn get_json(&self, path: &str) -> Result<serde_json::Value, WireError> {
        let response = self.execute(Method::GET, path, None, false).await?;
        Self::read_json(response).await
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, WireError> {
        let response = self.execute(Method::POST, path, Some(body), false).await?;
        Self::read_json(response).await
    }

    async fn delete_json(&self, path: &str) -> Result<serde_json::Value, WireError> {
        let response = self.execute(Method::DELETE, path, None, false).await?;
        Self::read_json(response).await
    }

    async fn post_stream(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<ByteStream, WireError> {
        let response = self.execute(Method::POST, path, Some(body), true).await?;
        Ok(Self::into_byte_stream(response))
    }

    async fn get_stream(&self, path: &str) -> Result<ByteStream, WireError> {
        let response = self.execute(Method::GET, path, None, false).await?;
        Ok(Self::into_byte_stream(response))
    }
}
