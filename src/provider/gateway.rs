//! Provider gateway
//!
//! Single request/response call to the generation service. Every failure
//! (refused connection, timeout, non-2xx status, unreadable body) is turned
//! into a synthetic error `GenerationResponse`; nothing is thrown past this
//! boundary.

use crate::provider::constants::{DEFAULT_TIMEOUT_SECS, GENERATE_PATH};
use crate::provider::error::GatewayError;
use crate::provider::types::{GenerationRequest, GenerationResponse};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Batch-mode client for `POST /generate`
#[derive(Clone)]
pub struct ProviderGateway {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ProviderGateway {
    /// Create a gateway sharing the given HTTP client (connection pooling)
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Create a gateway with the default 60 second timeout
    pub fn with_default_timeout(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self::new(client, base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Full URL of the generation endpoint
    pub fn generate_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), GENERATE_PATH)
    }

    /// Run one generation
    ///
    /// Always returns a response; failures come back with `status = error`,
    /// empty text and the failure in `error_message`.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResponse {
        let provider = request.provider();
        match self.try_generate(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(
                    model = %request.model_id,
                    provider = ?provider,
                    error = %e,
                    "Generation request failed"
                );
                GenerationResponse::failed(e.to_string())
            }
        }
    }

    async fn try_generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GatewayError> {
        let body = request.with_stream(false);
        let url = self.generate_url();
        let start = Instant::now();

        debug!(
            url = %url,
            model = %body.model_id,
            prompt_len = body.user_prompt.len(),
            "Calling generation service"
        );

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            return Err(GatewayError::Provider {
                status: status.as_u16(),
                body: error_body,
            });
        }

        let response_body = response
            .text()
            .await
            .map_err(|e| GatewayError::from_reqwest(e, self.timeout))?;

        let mut parsed: GenerationResponse =
            serde_json::from_str(&response_body).map_err(|e| {
                GatewayError::Protocol(format!("Failed to parse generation response: {}", e))
            })?;

        if parsed.response_time_ms == 0 {
            parsed.response_time_ms = start.elapsed().as_millis() as u64;
        }

        debug!(
            response_len = parsed.text.len(),
            response_time_ms = parsed.response_time_ms,
            "Received generation response"
        );

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::TokenUsage;
    use crate::store::models::ResultStatus;
    use mockito::{Matcher, Server};
    use serial_test::serial;

    fn request() -> GenerationRequest {
        GenerationRequest {
            model_id: "gpt-4o-mini".to_string(),
            system_prompt: "Be brief".to_string(),
            user_prompt: "Say hi".to_string(),
            temperature: 1.0,
            max_tokens: 100,
            top_p: 0.4,
            stream: true,
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_generate_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/generate")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model_id": "gpt-4o-mini",
                "stream": false,
            })))
            .with_status(200)
            .with_body(
                r#"{
                    "text": "hi there",
                    "model": "gpt-4o-mini",
                    "tokens_used": {"input": 5, "output": 2, "total": 7},
                    "response_time_ms": 321,
                    "status": "success",
                    "error_message": null
                }"#,
            )
            .create_async()
            .await;

        let gateway = ProviderGateway::with_default_timeout(reqwest::Client::new(), server.url());
        let response = gateway.generate(&request()).await;

        mock.assert_async().await;
        assert!(response.is_success());
        assert_eq!(response.text, "hi there");
        assert_eq!(response.tokens_used, TokenUsage::new(5, 2));
        assert_eq!(response.response_time_ms, 321);
    }

    #[tokio::test]
    #[serial]
    async fn test_generate_non_2xx_becomes_error_result() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/generate")
            .with_status(500)
            .with_body(r#"{"detail": "boom"}"#)
            .create_async()
            .await;

        let gateway = ProviderGateway::with_default_timeout(reqwest::Client::new(), server.url());
        let response = gateway.generate(&request()).await;

        mock.assert_async().await;
        assert_eq!(response.status, ResultStatus::Error);
        assert!(response.text.is_empty());
        let message = response.error_message.unwrap();
        assert!(message.contains("500"), "got: {}", message);
        assert!(message.contains("boom"), "got: {}", message);
    }

    #[tokio::test]
    #[serial]
    async fn test_generate_invalid_json_becomes_error_result() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/generate")
            .with_status(200)
            .with_body("This is not JSON")
            .create_async()
            .await;

        let gateway = ProviderGateway::with_default_timeout(reqwest::Client::new(), server.url());
        let response = gateway.generate(&request()).await;

        mock.assert_async().await;
        assert_eq!(response.status, ResultStatus::Error);
        assert!(response
            .error_message
            .unwrap()
            .contains("Failed to parse generation response"));
    }

    #[tokio::test]
    async fn test_generate_connection_refused() {
        let gateway = ProviderGateway::with_default_timeout(
            reqwest::Client::new(),
            "http://127.0.0.1:1",
        );
        let response = gateway.generate(&request()).await;

        assert_eq!(response.status, ResultStatus::Error);
        assert!(response.text.is_empty());
        assert!(response.error_message.is_some());
    }

    #[tokio::test]
    async fn test_generate_timeout() {
        // Accept connections but never answer
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });

        let gateway = ProviderGateway::new(
            reqwest::Client::new(),
            format!("http://{}", addr),
            Duration::from_millis(200),
        );
        let response = gateway.generate(&request()).await;
        hold.abort();

        assert_eq!(response.status, ResultStatus::Error);
        assert!(response.text.is_empty());
        assert!(response.error_message.unwrap().contains("timed out"));
    }

    #[test]
    fn test_generate_url_trims_slash() {
        let gateway =
            ProviderGateway::with_default_timeout(reqwest::Client::new(), "http://svc:8000/");
        assert_eq!(gateway.generate_url(), "http://svc:8000/generate");
    }
}
