//! JSON-RPC over HTTP.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};

/// Default timeout for a single JSON-RPC round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum response body size (1MB).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// A JSON-RPC endpoint reached over HTTP POST.
///
/// Shared by the chain provider, the key-holder client and the sponsor
/// client. Each call is a single attempt; retries are left to the caller.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    bearer: Option<String>,
    next_id: AtomicI64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            bearer: None,
            next_id: AtomicI64::new(1),
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Call `method` and deserialize its result.
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id.clone(), method).with_params(params);
        trace!(method, id = ?id, "JSON-RPC request");

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(token) = &self.bearer {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout
            } else {
                Error::Http(e)
            }
        })?;

        let body = response.bytes().await?;
        if body.len() > MAX_OUTPUT_SIZE {
            return Err(Error::OutputTooLarge {
                size: body.len(),
                max: MAX_OUTPUT_SIZE,
            });
        }

        let response: JsonRpcResponse = serde_json::from_slice(&body)?;

        // Verify response ID matches
        if response.id != id {
            return Err(Error::InvalidResponse(format!(
                "response ID mismatch: expected {id:?}, got {:?}",
                response.id
            )));
        }

        let result = response.into_result().inspect_err(|e| {
            debug!(method, code = e.code, message = %e.message, "JSON-RPC error");
        })?;
        Ok(serde_json::from_value(result)?)
    }
}
