use reqwest::Client;
use tokio::sync::mpsc;
use url::Url;

use super::sse::parse_sse_stream;
use super::types::{
    ApiError, ChatCompletionRequest, ErrorResponse, ModelInfo, ModelList, StreamEvent,
};

/// HTTP client for one OpenAI-compatible server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Url::parse(base_url).map_err(|e| ApiError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        Ok(Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn parse_error_message(status: reqwest::StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) {
            return parsed.error.message;
        }
        format!("request failed with status {}", status.as_u16())
    }

    /// `GET {base}/models`.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError> {
        let response = self
            .http
            .get(self.endpoint("models"))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                message: Self::parse_error_message(status, &body),
            });
        }

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

        Ok(list.data)
    }

    /// `POST {base}/chat/completions` with `stream: true`, feeding parsed
    /// events through `tx`. Returns an error only when the request itself
    /// cannot be issued or the status is not success; mid-stream failures
    /// arrive as [`StreamEvent::Error`].
    pub async fn stream_chat(
        &self,
        request: ChatCompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.endpoint("chat/completions"))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                message: Self::parse_error_message(status, &body),
            });
        }

        parse_sse_stream(response.bytes_stream(), tx).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = ApiClient::new("http://127.0.0.1:1234/v1/").unwrap();
        assert_eq!(client.endpoint("models"), "http://127.0.0.1:1234/v1/models");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            ApiClient::new("not a url"),
            Err(ApiError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn error_body_message_is_extracted() {
        let message = ApiClient::parse_error_message(
            reqwest::StatusCode::BAD_REQUEST,
            "{\"error\":{\"message\":\"model not loaded\"}}",
        );
        assert_eq!(message, "model not loaded");

        let fallback =
            ApiClient::parse_error_message(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(fallback.contains("500"));
    }
}
