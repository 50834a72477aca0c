//! Customer notification collaborators.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// A notification that was not acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers order notifications. `Ok` is the acknowledgement.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn notify(&self, order_id: Uuid, message: &str) -> Result<(), NotifyError>;
}

/// Notifier that only records the notification in the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
  async fn notify(&self, order_id: Uuid, message: &str) -> Result<(), NotifyError> {
    info!(order_id = %order_id, message = %message, "customer notified");
    Ok(())
  }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationBody<'a> {
  order_id: Uuid,
  message: &'a str,
}

/// Notifier that POSTs `{orderId, message}` to a webhook.
pub struct WebhookNotifier {
  client: reqwest::Client,
  url: String,
}

impl WebhookNotifier {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      client: reqwest::Client::new(),
      url: url.into(),
    }
  }
}

#[async_trait]
impl Notifier for WebhookNotifier {
  async fn notify(&self, order_id: Uuid, message: &str) -> Result<(), NotifyError> {
    self
      .client
      .post(&self.url)
      .json(&NotificationBody { order_id, message })
      .send()
      .await
      .and_then(|response| response.error_for_status())
      .map_err(|e| NotifyError(e.to_string()))?;

    info!(order_id = %order_id, url = %self.url, "notification delivered");
    Ok(())
  }
}
