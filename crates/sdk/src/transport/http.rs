//! HTTP transport layer for the OpenPact SDK.

use crate::config::ClientConfig;
use crate::error::{OpenPactError, OpenPactResult};
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// HTTP transport for making API requests. Stateless with respect to
/// credentials: the caller passes the access token per request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: Arc<ClientConfig>,
}

impl HttpTransport {
    /// Create a new HTTP transport with the given configuration.
    pub fn new(config: Arc<ClientConfig>) -> OpenPactResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("openpact-sdk/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, config })
    }

    /// Build a URL for the given path.
    fn build_url(&self, path: &str) -> OpenPactResult<url::Url> {
        self.config.base_url.join(path).map_err(OpenPactError::InvalidUrl)
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> OpenPactResult<RequestBuilder> {
        let url = self.build_url(path)?;
        debug!(url = %url, method = %method, "Request");

        let mut builder = self.client.request(method, url);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        Ok(builder)
    }

    /// Execute a request, retrying transient failures.
    async fn execute_with_retry(&self, request_builder: RequestBuilder) -> OpenPactResult<Response> {
        let retry_config = &self.config.retry_config;
        let mut attempts = 0;

        loop {
            let request = request_builder
                .try_clone()
                .ok_or_else(|| OpenPactError::Config("Request cannot be cloned".to_string()))?;

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if response.status().is_success() {
                        return Ok(response);
                    }

                    if attempts < retry_config.max_retries && retry_config.should_retry_status(status) {
                        let backoff = retry_config.backoff_for_attempt(attempts);
                        warn!(
                            status = status,
                            attempt = attempts + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            "Request failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempts += 1;
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    return Err(OpenPactError::from_response(status, &body));
                }
                Err(e) if e.is_timeout() => {
                    if attempts < retry_config.max_retries {
                        let backoff = retry_config.backoff_for_attempt(attempts);
                        warn!(
                            attempt = attempts + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            "Request timed out, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempts += 1;
                        continue;
                    }
                    return Err(OpenPactError::Timeout);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn json<T: DeserializeOwned>(response: Response) -> OpenPactResult<T> {
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(serde_json::from_str("null")?);
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Execute a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, token: Option<&str>) -> OpenPactResult<T> {
        let response = self.execute_with_retry(self.request(Method::GET, path, token)?).await?;
        Self::json(response).await
    }

    /// Execute a POST request.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        token: Option<&str>,
        body: &B,
    ) -> OpenPactResult<T> {
        let builder = self.request(Method::POST, path, token)?.json(body);
        let response = self.execute_with_retry(builder).await?;
        Self::json(response).await
    }

    /// Execute a PUT request.
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        token: Option<&str>,
        body: &B,
    ) -> OpenPactResult<T> {
        let builder = self.request(Method::PUT, path, token)?.json(body);
        let response = self.execute_with_retry(builder).await?;
        Self::json(response).await
    }

    /// Execute a DELETE request without a response body.
    pub async fn delete_no_response(&self, path: &str, token: Option<&str>) -> OpenPactResult<()> {
        self.execute_with_retry(self.request(Method::DELETE, path, token)?).await?;
        Ok(())
    }
}
