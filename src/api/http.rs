use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

use super::{ApiError, ApiResult, ChatTransport, MessageResponse};
use crate::config::Config;
use crate::types::Message;

#[derive(Serialize)]
struct SendBody<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct HistoryResponse {
    history: Vec<Message>,
}

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Backend client over reqwest.
///
/// Message operations get a 10 s deadline and a flat-delay retry for
/// connection-level failures; health probes get a shorter deadline and no
/// retry. HTTP status errors never consume the retry budget.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    health_timeout: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl HttpTransport {
    pub fn new(config: &Config) -> reqwest::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        // Cookie store carries the backend session, matching the browser
        // client's credentials-included requests.
        let client = Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
            health_timeout: config.health_timeout,
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Issue a request, retrying connection-level failures with a flat
    /// delay. Timeouts abort immediately.
    async fn request_with_retry<F>(&self, build: F) -> ApiResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut remaining = self.retry_attempts;
        loop {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_timeout() => return Err(ApiError::Timeout),
                Err(err) => {
                    if remaining == 0 {
                        return Err(ApiError::Connection(err.to_string()));
                    }
                    remaining -= 1;
                    debug!(error = %err, remaining, "request failed, retrying");
                    time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Map a non-success response to an error, preferring the backend's own
    /// `{"error": ...}` text.
    async fn error_from_response(response: reqwest::Response) -> ApiError {
        let code = response.status().as_u16();
        if code == StatusCode::SERVICE_UNAVAILABLE.as_u16() {
            return ApiError::ServiceBusy;
        }
        match response.json::<ErrorBody>().await {
            Ok(body) => ApiError::Status {
                code,
                message: body.error,
            },
            Err(_) => ApiError::Status {
                code,
                message: format!("Server error ({code})"),
            },
        }
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpTransport {
    async fn send_message(&self, text: &str) -> ApiResult<MessageResponse> {
        let url = self.url("/api/chat/message");
        let response = self
            .request_with_retry(|| {
                self.client
                    .post(&url)
                    .timeout(self.request_timeout)
                    .json(&SendBody { message: text })
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        response
            .json::<MessageResponse>()
            .await
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))
    }

    async fn fetch_history(&self) -> ApiResult<Vec<Message>> {
        let url = self.url("/api/chat/history");
        let response = match self
            .request_with_retry(|| self.client.get(&url).timeout(self.request_timeout))
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "history fetch failed");
                return Ok(Vec::new());
            }
        };

        let status = response.status();
        // An unauthenticated session simply has no history.
        if status == StatusCode::UNAUTHORIZED {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            warn!(%status, "history fetch returned an error status");
            return Ok(Vec::new());
        }
        response
            .json::<HistoryResponse>()
            .await
            .map(|body| body.history)
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))
    }

    async fn delete_message(&self, id: i64) -> ApiResult<()> {
        let url = self.url(&format!("/api/chat/message/{id}"));
        let response = self
            .request_with_retry(|| self.client.delete(&url).timeout(self.request_timeout))
            .await?;

        let status = response.status();
        // Already gone on the server counts as deleted.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Self::error_from_response(response).await)
    }

    async fn check_health(&self) -> ApiResult<bool> {
        let url = self.url("/api/health");
        let response = self
            .client
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ApiError::Timeout
                } else {
                    ApiError::Connection(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Ok(false);
        }
        Ok(response
            .json::<HealthResponse>()
            .await
            .map(|body| body.status == "ok")
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(url: &str) -> HttpTransport {
        let config = Config {
            api_url: url.to_string(),
            request_timeout: Duration::from_millis(250),
            health_timeout: Duration::from_millis(250),
            retry_delay: Duration::from_millis(5),
            ..Config::default()
        };
        HttpTransport::new(&config).expect("build transport")
    }

    #[tokio::test]
    async fn send_message_returns_reply_and_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/message"))
            .and(body_json(json!({"message": "What is a migraine?"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "A migraine is...",
                "message_id": 42
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = transport_for(&server.uri())
            .send_message("What is a migraine?")
            .await
            .expect("send");

        assert_eq!(response.message, "A migraine is...");
        assert_eq!(response.message_id, Some(42));
    }

    #[tokio::test]
    async fn send_message_maps_503_to_service_busy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/message"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = transport_for(&server.uri())
            .send_message("hello")
            .await
            .expect_err("should fail");

        assert!(matches!(err, ApiError::ServiceBusy));
    }

    #[tokio::test]
    async fn send_message_carries_backend_error_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/message"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "Message is required"})),
            )
            .mount(&server)
            .await;

        let err = transport_for(&server.uri())
            .send_message("hello")
            .await
            .expect_err("should fail");

        match err {
            ApiError::Status { code, message } => {
                assert_eq!(code, 400);
                assert_eq!(message, "Message is required");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_message_synthesizes_generic_error_for_unparseable_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/message"))
            .respond_with(ResponseTemplate::new(500).set_body_string("<html>boom</html>"))
            // A status error must not consume the retry budget.
            .expect(1)
            .mount(&server)
            .await;

        let err = transport_for(&server.uri())
            .send_message("hello")
            .await
            .expect_err("should fail");

        match err {
            ApiError::Status { code, message } => {
                assert_eq!(code, 500);
                assert_eq!(message, "Server error (500)");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_message_times_out_without_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/message"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"message": "late", "message_id": 1}))
                    .set_delay(Duration::from_millis(1500)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = transport_for(&server.uri())
            .send_message("hello")
            .await
            .expect_err("should time out");

        assert!(matches!(err, ApiError::Timeout));
    }

    #[tokio::test]
    async fn connection_failures_exhaust_the_retry_budget() {
        // Nothing listens here; every attempt fails at the connection level.
        let transport = transport_for("http://127.0.0.1:9");

        let err = transport
            .send_message("hello")
            .await
            .expect_err("should fail");

        assert!(matches!(err, ApiError::Connection(_)));
    }

    #[tokio::test]
    async fn fetch_history_parses_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chat/history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "history": [
                    {"id": 1, "content": "hi", "is_bot": false, "timestamp": "2024-03-01T09:00:00Z"},
                    {"id": 2, "content": "hello", "is_bot": true, "timestamp": "2024-03-01T09:00:05Z"}
                ]
            })))
            .mount(&server)
            .await;

        let history = transport_for(&server.uri())
            .fetch_history()
            .await
            .expect("fetch");

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, 1);
        assert!(history[1].from_assistant);
    }

    #[tokio::test]
    async fn fetch_history_treats_unauthorized_as_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chat/history"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let history = transport_for(&server.uri())
            .fetch_history()
            .await
            .expect("fetch");

        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn fetch_history_swallows_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chat/history"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let history = transport_for(&server.uri())
            .fetch_history()
            .await
            .expect("fetch");

        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn fetch_history_rejects_malformed_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chat/history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"history": "nope"})))
            .mount(&server)
            .await;

        let err = transport_for(&server.uri())
            .fetch_history()
            .await
            .expect_err("should fail");

        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn delete_message_treats_not_found_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/chat/message/7"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"error": "Message not found"})),
            )
            .mount(&server)
            .await;

        transport_for(&server.uri())
            .delete_message(7)
            .await
            .expect("idempotent delete");
    }

    #[tokio::test]
    async fn delete_message_surfaces_other_errors() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/chat/message/7"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = transport_for(&server.uri())
            .delete_message(7)
            .await
            .expect_err("should fail");

        assert!(matches!(err, ApiError::Status { code: 500, .. }));
    }

    #[tokio::test]
    async fn check_health_reads_status_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&server)
            .await;

        assert!(
            transport_for(&server.uri())
                .check_health()
                .await
                .expect("probe")
        );
    }

    #[tokio::test]
    async fn check_health_is_false_for_unhealthy_or_odd_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "degraded"})))
            .mount(&server)
            .await;

        assert!(
            !transport_for(&server.uri())
                .check_health()
                .await
                .expect("probe")
        );

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(
            !transport_for(&server.uri())
                .check_health()
                .await
                .expect("probe")
        );
    }

    #[tokio::test]
    async fn check_health_errs_when_unreachable() {
        let err = transport_for("http://127.0.0.1:9")
            .check_health()
            .await
            .expect_err("should fail");

        assert!(matches!(err, ApiError::Connection(_)));
    }
}
