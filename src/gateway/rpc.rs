use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::AuthSession;
use crate::config::Config;
use crate::error::{ClientError, Result};

/// Transport seam between the gateway and the hosted backend. The production
/// implementation speaks HTTP; tests inject an in-memory double.
#[async_trait]
pub trait BackendRpc: Send + Sync {
    /// Invoke a named backend function with JSON arguments.
    async fn call(&self, function: &str, args: Value) -> Result<Value>;

    /// Read rows from a table-like resource.
    async fn select(&self, resource: &str, query: &[(&str, String)]) -> Result<Value>;

    /// Insert a row and return the stored representation.
    async fn insert(&self, resource: &str, row: Value) -> Result<Value>;
}

/// HTTP implementation of [`BackendRpc`]. Every request carries the project
/// api key; the user's bearer token is attached when an identity is present.
pub struct HttpRpc {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    auth: Arc<AuthSession>,
}

impl HttpRpc {
    pub fn new(config: &Config, auth: Arc<AuthSession>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ClientError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.backend_url.clone(),
            api_key: config.api_key.clone(),
            auth,
        })
    }

    fn apply_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("apikey", &self.api_key);
        match self.auth.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if status.is_success() {
            if status == reqwest::StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            return Ok(response.json().await?);
        }

        let message = match response.json::<Value>().await {
            Ok(body) => body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Request failed")
                .to_string(),
            Err(_) => format!("Request failed with status {}", status),
        };

        Err(match status {
            reqwest::StatusCode::NOT_FOUND => ClientError::NotFound(message),
            reqwest::StatusCode::UNAUTHORIZED => ClientError::AuthRequired,
            _ => ClientError::Backend(message),
        })
    }
}

#[async_trait]
impl BackendRpc for HttpRpc {
    async fn call(&self, function: &str, args: Value) -> Result<Value> {
        let url = format!("{}/rpc/{}", self.base_url, function);
        tracing::debug!(function = %function, "Backend RPC call");

        let response = self
            .apply_headers(self.http.post(&url))
            .json(&args)
            .send()
            .await?;

        Self::read_response(response).await
    }

    async fn select(&self, resource: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/rest/{}", self.base_url, resource);

        let response = self
            .apply_headers(self.http.get(&url))
            .query(query)
            .send()
            .await?;

        Self::read_response(response).await
    }

    async fn insert(&self, resource: &str, row: Value) -> Result<Value> {
        let url = format!("{}/rest/{}", self.base_url, resource);

        let response = self
            .apply_headers(self.http.post(&url))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;

        Self::read_response(response).await
    }
}
