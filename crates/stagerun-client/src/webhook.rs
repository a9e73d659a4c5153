//! Webhook notifier.

use crate::{ClientError, USER_AGENT};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use stagerun_core::notify::{NotificationEvent, NotificationFilter, NotificationKind, Notifier};
use stagerun_core::{Error, Result};
use tracing::debug;
use url::Url;

/// Header carrying the HMAC-SHA256 signature of the body.
pub const SIGNATURE_HEADER: &str = "X-Stagerun-Signature";
/// Header carrying the event kind.
pub const EVENT_HEADER: &str = "X-Stagerun-Event";

/// Posts notification events as JSON to a URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
    filter: NotificationFilter,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: &str, filter: NotificationFilter) -> std::result::Result<Self, ClientError> {
        let url = Url::parse(url).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(format!(
                "{}: unsupported scheme",
                url
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            url,
            filter,
            secret: None,
        })
    }

    /// Sign request bodies with `secret`.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub async fn post(&self, event: &NotificationEvent) -> std::result::Result<(), ClientError> {
        let body = serde_json::to_vec(event).map_err(|e| ClientError::Parse(e.to_string()))?;
        let kind = serde_json::to_value(event.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        let mut request = self
            .client
            .post(self.url.clone())
            .header("User-Agent", USER_AGENT)
            .header("Content-Type", "application/json")
            .header(EVENT_HEADER, kind);

        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(secret, &body));
        }

        let response = request.body(body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, body });
        }

        debug!(url = %self.url, kind = ?event.kind, "Webhook delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> String {
        format!("webhook {}", self.url)
    }

    fn accepts(&self, kind: NotificationKind) -> bool {
        self.filter.accepts(kind)
    }

    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        self.post(event)
            .await
            .map_err(|e| Error::Notification(e.to_string()))
    }
}

/// Signature header value: `sha256=<hex hmac of body>`.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take any size key");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::TestServer;
    use stagerun_core::RunId;
    use stagerun_core::job::BuildOutcome;

    fn event(kind: NotificationKind) -> NotificationEvent {
        NotificationEvent {
            kind,
            outcome: BuildOutcome::Failure,
            previous_outcome: Some(BuildOutcome::Success),
            job_id: RunId::new(),
            job_number: 1,
            job_name: "PYTHON_VERSION=3.6".to_string(),
            build_number: Some(12),
            pull_request: None,
            account: Some("acme".to_string()),
            project: Some("vecto".to_string()),
            message: "test failed".to_string(),
            finished_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_rejects_non_http_urls() {
        assert!(WebhookNotifier::new("ftp://example.com", NotificationFilter::default()).is_err());
        assert!(WebhookNotifier::new("nope", NotificationFilter::default()).is_err());
    }

    #[test]
    fn test_filter_is_applied() {
        let notifier = WebhookNotifier::new(
            "https://hooks.example.com",
            NotificationFilter {
                on_success: false,
                on_failure: true,
                on_status_change: true,
            },
        )
        .unwrap();
        assert!(!notifier.accepts(NotificationKind::Success));
        assert!(notifier.accepts(NotificationKind::StatusChanged));
    }

    #[test]
    fn test_signature_is_stable() {
        let a = sign_payload("key", b"payload");
        let b = sign_payload("key", b"payload");
        let c = sign_payload("other", b"payload");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("sha256="));
        assert_eq!(a.len(), "sha256=".len() + 64);
    }

    #[tokio::test]
    async fn test_post_sends_signed_json() {
        let server = TestServer::start(200, "{}").await;
        let notifier =
            WebhookNotifier::new(&format!("{}/hook", server.base_url), NotificationFilter::default())
                .unwrap()
                .with_secret("s3cret");

        let event = event(NotificationKind::StatusChanged);
        notifier.notify(&event).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.uri.path(), "/hook");
        assert_eq!(request.header(EVENT_HEADER), Some("status_changed"));
        assert_eq!(request.header("content-type"), Some("application/json"));

        let expected = sign_payload("s3cret", &request.body);
        assert_eq!(request.header(SIGNATURE_HEADER), Some(expected.as_str()));

        let payload: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(payload["outcome"], "failure");
        assert_eq!(payload["previous_outcome"], "success");
        assert_eq!(payload["build_number"], 12);
    }

    #[tokio::test]
    async fn test_unsigned_without_secret() {
        let server = TestServer::start(204, "").await;
        let notifier = WebhookNotifier::new(&server.base_url, NotificationFilter::default()).unwrap();

        notifier.notify(&event(NotificationKind::Failure)).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests[0].header(EVENT_HEADER), Some("failure"));
        assert!(requests[0].header(SIGNATURE_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_notification_error() {
        let server = TestServer::start(500, "down").await;
        let notifier = WebhookNotifier::new(&server.base_url, NotificationFilter::default()).unwrap();

        let err = notifier.notify(&event(NotificationKind::Failure)).await.unwrap_err();
        assert!(matches!(err, Error::Notification(_)));
    }
}
