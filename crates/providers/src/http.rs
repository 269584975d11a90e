//! Transport helpers shared by the adapters.

use futures::{Stream, StreamExt};
use pi_runtime::stream::decode_frames;
use pi_runtime::{Delta, FrameDecoder, PiError, Result};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

pub(crate) fn transport_error(err: reqwest::Error) -> PiError {
    if err.is_decode() {
        return PiError::Decode(err.to_string());
    }
    PiError::Provider {
        status: err.status().map(|s| s.as_u16()),
        message: err.to_string(),
    }
}

/// Send a request, turning non-2xx statuses into `Provider` errors that
/// carry the response body.
pub(crate) async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PiError::Provider {
        status: Some(status.as_u16()),
        message: body,
    })
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.text().await.map_err(transport_error)?;
    serde_json::from_str(&body).map_err(|e| PiError::Decode(format!("response body: {e}")))
}

/// Decode a streaming body with `decoder`.
pub(crate) fn deltas<D: FrameDecoder>(
    response: Response,
    decoder: D,
) -> impl Stream<Item = Result<Delta>> + Send {
    let bytes = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(transport_error));
    decode_frames(bytes, decoder)
}

/// Join a base URL and a path without doubling the slash.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Parse accumulated tool arguments; empty means `{}`.
pub(crate) fn parse_arguments(raw: &str) -> Result<serde_json::Value> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| PiError::Decode(format!("tool arguments: {e}")))
}
