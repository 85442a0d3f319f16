//! The seam between protocol logic and the network.
//!
//! Everything above this module talks to a [`Transport`]; [`HttpTransport`]
//! is the production implementation and tests substitute in-memory fakes.
mod http_transport;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

use crate::error::WireError;

pub use http_transport::HttpTransport;

/// A response body delivered as transport-sized chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, WireError>> + Send>>;

/// Request/response primitives the clients are built on.
///
/// Relative paths (`/v1/messages`) are resolved against the configured base
/// URL; absolute `http(s)://` URLs are used unchanged. A non-2xx response is
/// reported as [`WireError::Api`]; implementations never retry.
pub trait Transport: Send + Sync {
    /// `GET` a JSON resource.
    fn get_json(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<serde_json::Value, WireError>> + Send;

    /// `POST` a JSON body and read a JSON response.
    fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> impl Future<Output = Result<serde_json::Value, WireError>> + Send;

    /// `DELETE` a resource and read the JSON response.
    fn delete_json(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<serde_json::Value, WireError>> + Send;

    /// `POST` a JSON body and stream the response body.
    fn post_stream(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> impl Future<Output = Result<ByteStream, WireError>> + Send;

    /// `GET` a resource and stream the response body.
    fn get_stream(&self, path: &str) -> impl Future<Output = Result<ByteStream, WireError>> + Send;
}

/// Decode a JSON resource into its typed form.
pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
    what: &str,
) -> Result<T, WireError> {
    serde_json::from_value(value).map_err(|err| WireError::Decode(format!("{what}: {err}")))
}
