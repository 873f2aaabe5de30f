//! Outbound collaborators: the human review queue and trigger
//! notifications.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use docgate_core::models::{ReviewItem, TriggerEvent};
use docgate_core::store::Store;

use crate::config::NotificationsConfig;

/// Receives documents that need a human decision.
#[async_trait]
pub trait ReviewSink: Send + Sync {
    async fn submit(&self, item: &ReviewItem) -> Result<()>;
}

/// Receives trigger events for delivery.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, event: &TriggerEvent) -> Result<()>;
}

/// Review queue backed by the store's `review_queue`.
pub struct StoreReviewSink {
    store: Arc<dyn Store>,
}

impl StoreReviewSink {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReviewSink for StoreReviewSink {
    async fn submit(&self, item: &ReviewItem) -> Result<()> {
        self.store.enqueue_review(item).await?;
        tracing::info!(
            document_id = %item.document_id,
            reason = %item.reason,
            lowest_confidence = ?item.lowest_confidence,
            "document queued for review"
        );
        Ok(())
    }
}

/// Writes every event to the log.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &TriggerEvent) -> Result<()> {
        tracing::info!(
            category = %event.category,
            document_id = %event.document_id,
            chunk_id = %event.chunk_id,
            score = event.score,
            "trigger fired"
        );
        Ok(())
    }
}

/// POSTs every event as JSON.
pub struct WebhookNotificationSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotificationSink {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, event: &TriggerEvent) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .with_context(|| format!("Webhook request to {} failed", self.url))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Webhook returned {}: {}", status, body);
        }
        tracing::debug!(category = %event.category, url = %self.url, "trigger delivered");
        Ok(())
    }
}

/// Keeps events in memory. Used by tests and embedders that poll.
#[derive(Default)]
pub struct MemoryNotificationSink {
    events: Mutex<Vec<TriggerEvent>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TriggerEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn notify(&self, event: &TriggerEvent) -> Result<()> {
        let mut events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        events.push(event.clone());
        Ok(())
    }
}

/// Webhook sink when a URL is configured, log sink otherwise.
pub fn create_notification_sink(config: &NotificationsConfig) -> Result<Arc<dyn NotificationSink>> {
    match &config.webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "trigger notifications go to webhook");
            Ok(Arc::new(WebhookNotificationSink::new(url, config.timeout_secs)?))
        }
        None => Ok(Arc::new(LogNotificationSink)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, routing::post, Json, Router};
    use chrono::Utc;
    use docgate_core::store::memory::InMemoryStore;

    fn event() -> TriggerEvent {
        TriggerEvent {
            category: "safety".into(),
            chunk_id: "c1".into(),
            document_id: "d1".into(),
            score: 0.91,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_store_review_sink_enqueues() {
        let store = Arc::new(InMemoryStore::new());
        let sink = StoreReviewSink::new(store.clone());
        sink.submit(&ReviewItem {
            document_id: "d1".into(),
            reason: "low_confidence".into(),
            detail: "confidence 0.200 is below threshold 0.300".into(),
            lowest_confidence: Some(0.2),
            text_so_far: "partial".into(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        let items = store.list_reviews().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].reason, "low_confidence");
    }

    #[tokio::test]
    async fn test_webhook_posts_event_json() {
        let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    |State(rx): State<Arc<Mutex<Vec<serde_json::Value>>>>,
                     Json(body): Json<serde_json::Value>| async move {
                        rx.lock().unwrap().push(body);
                    },
                ),
            )
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let sink = WebhookNotificationSink::new(&format!("http://{}/hook", addr), 5).unwrap();
        sink.notify(&event()).await.unwrap();

        let bodies = received.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["category"], "safety");
        assert_eq!(bodies[0]["chunk_id"], "c1");
    }

    #[tokio::test]
    async fn test_webhook_error_status_fails() {
        let app = Router::new().route(
            "/hook",
            post(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let sink = WebhookNotificationSink::new(&format!("http://{}/hook", addr), 5).unwrap();
        assert!(sink.notify(&event()).await.is_err());
    }

    #[test]
    fn test_default_sink_is_log() {
        let sink = create_notification_sink(&NotificationsConfig::default()).unwrap();
        assert_eq!(sink.name(), "log");
    }
}
