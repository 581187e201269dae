//! Invocation targets.
//!
//! The runner talks to targets through [`Invoker`] so the HTTP client can be
//! swapped (tests, future non-HTTP job kinds). Timeouts are enforced by the
//! runner around `invoke`, not by implementations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tracing::debug;

use crate::error::InvokeError;

/// A fully resolved call: placeholders expanded, internal headers added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResponse {
    pub status: u16,
    pub body: String,
}

impl InvocationResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, request: &InvocationRequest) -> Result<InvocationResponse, InvokeError>;
}

/// [`Invoker`] over a shared `reqwest` client.
pub struct HttpInvoker {
    client: reqwest::Client,
}

impl HttpInvoker {
    pub fn new(user_agent: &str) -> Result<Self, InvokeError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| InvokeError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, request: &InvocationRequest) -> Result<reqwest::RequestBuilder, InvokeError> {
        let method = Method::from_bytes(request.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| InvokeError::InvalidRequest(format!("bad method '{}'", request.method)))?;
        let url = reqwest::Url::parse(request.url.trim())
            .map_err(|e| InvokeError::InvalidRequest(format!("bad url '{}': {e}", request.url)))?;

        let mut headers = HeaderMap::with_capacity(request.headers.len());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| InvokeError::InvalidRequest(format!("bad header name '{name}'")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| InvokeError::InvalidRequest(format!("bad value for header '{name}'")))?;
            headers.insert(name, value);
        }

        let carries_body = !matches!(method, Method::GET | Method::HEAD);
        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = request.body.as_ref().filter(|_| carries_body) {
            builder = builder.body(body.clone());
        }
        Ok(builder)
    }
}

#[async_trait]
impl Invoker for HttpInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> Result<InvocationResponse, InvokeError> {
        let builder = self.build(request)?;
        debug!(method = %request.method, url = %request.url, "invoking target");

        let response = builder
            .send()
            .await
            .map_err(|e| InvokeError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| InvokeError::Transport(format!("reading body: {e}")))?;

        Ok(InvocationResponse { status, body })
    }
}
