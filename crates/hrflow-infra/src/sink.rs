//! Notification sinks.
//!
//! - [`TracingSink`] logs each delivery; used when no webhook is configured.
//! - [`WebhookSink`] POSTs the request as JSON to a configured URL. Any
//!   non-2xx response is a failed attempt. The idempotency key travels in the
//!   `Idempotency-Key` header so the receiver can drop retried duplicates.

use std::time::Duration;

use hrflow_core::workflow::dispatch::{DispatchError, NotificationSink};
use hrflow_types::notification::NotificationRequest;

/// Sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    async fn deliver(&self, request: &NotificationRequest) -> Result<(), DispatchError> {
        tracing::info!(
            key = %request.idempotency_key,
            channel = %request.channel,
            recipients = ?request.recipients,
            "notification delivered to log sink"
        );
        Ok(())
    }
}

/// Sink that POSTs to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// The client timeout is a backstop; the dispatcher enforces the
    /// per-attempt timeout itself.
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl NotificationSink for WebhookSink {
    async fn deliver(&self, request: &NotificationRequest) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(|e| DispatchError::Delivery(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Delivery(format!("HTTP {status}: {body}")));
        }

        tracing::debug!(key = %request.idempotency_key, url = %self.url, "webhook accepted notification");
        Ok(())
    }
}

/// Either sink, chosen from configuration at startup.
#[derive(Debug, Clone)]
pub enum ConfiguredSink {
    Tracing(TracingSink),
    Webhook(WebhookSink),
}

impl ConfiguredSink {
    /// Webhook when `webhook_url` is set, log sink otherwise.
    pub fn from_url(webhook_url: Option<&str>) -> Result<Self, reqwest::Error> {
        Ok(match webhook_url {
            Some(url) => ConfiguredSink::Webhook(WebhookSink::new(url)?),
            None => ConfiguredSink::Tracing(TracingSink),
        })
    }
}

impl NotificationSink for ConfiguredSink {
    async fn deliver(&self, request: &NotificationRequest) -> Result<(), DispatchError> {
        match self {
            ConfiguredSink::Tracing(sink) => sink.deliver(request).await,
            ConfiguredSink::Webhook(sink) => sink.deliver(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use hrflow_types::definition::Channel;
    use serde_json::{Value, json};

    #[derive(Clone, Default)]
    struct Received {
        bodies: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    }

    async fn accept(State(rx): State<Received>, headers: HeaderMap, Json(body): Json<Value>) -> StatusCode {
        let key = headers
            .get("idempotency-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        rx.bodies.lock().unwrap().push((key, body));
        StatusCode::NO_CONTENT
    }

    async fn refuse() -> (StatusCode, &'static str) {
        (StatusCode::SERVICE_UNAVAILABLE, "mail relay down")
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request() -> NotificationRequest {
        NotificationRequest {
            recipients: ["payroll".to_string()].into_iter().collect(),
            channel: Channel::Email,
            payload: json!({"business_id": "EMP-1"}),
            idempotency_key: "i-1:inform:email".into(),
        }
    }

    #[tokio::test]
    async fn test_webhook_posts_json_with_idempotency_key() {
        let received = Received::default();
        let base = serve(
            Router::new()
                .route("/hooks", post(accept))
                .with_state(received.clone()),
        )
        .await;

        let sink = WebhookSink::new(format!("{base}/hooks")).unwrap();
        sink.deliver(&request()).await.unwrap();

        let bodies = received.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].0.as_deref(), Some("i-1:inform:email"));
        assert_eq!(bodies[0].1["channel"], "email");
        assert_eq!(bodies[0].1["payload"]["business_id"], "EMP-1");
    }

    #[tokio::test]
    async fn test_webhook_non_2xx_is_failure() {
        let base = serve(Router::new().route("/hooks", post(refuse))).await;
        let sink = WebhookSink::new(format!("{base}/hooks")).unwrap();
        let err = sink.deliver(&request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Delivery(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_configured_sink_selection() {
        assert!(matches!(ConfiguredSink::from_url(None).unwrap(), ConfiguredSink::Tracing(_)));
        let sink = ConfiguredSink::from_url(Some("http://localhost:1/x")).unwrap();
        assert!(matches!(sink, ConfiguredSink::Webhook(ref w) if w.url() == "http://localhost:1/x"));
        ConfiguredSink::Tracing(TracingSink).deliver(&request()).await.unwrap();
    }
}
