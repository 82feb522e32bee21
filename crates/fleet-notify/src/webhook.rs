//! Chat incoming-webhook delivery.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use serde::Serialize;
use tracing::debug;

use fleet_core::{HttpTransport, TransportError};

use crate::error::{NotifyError, NotifyResult};

pub const USERNAME: &str = "Fleet Controller";
pub const ICON_URL: &str = "https://static.wikia.nocookie.net/starwars/images/a/a7/ISD_arrow.jpg/revision/latest/scale-to-width-down/870?cb=20070424053722";

/// Incoming-webhook message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payload {
    pub username: String,
    pub icon_url: String,
    pub text: String,
}

impl Payload {
    /// A message from the controller's bot identity.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            username: USERNAME.to_string(),
            icon_url: ICON_URL.to_string(),
            text: text.into(),
        }
    }

    pub fn validate(&self) -> NotifyResult<()> {
        if self.username.is_empty() {
            return Err(NotifyError::MissingField("username"));
        }
        if self.text.is_empty() {
            return Err(NotifyError::MissingField("text"));
        }
        Ok(())
    }
}

/// Destination for rendered run messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, payload: &Payload) -> NotifyResult<()>;
}

/// Posts payloads to a webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    transport: HttpTransport,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            transport: HttpTransport::new(url, timeout)?,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, payload: &Payload) -> NotifyResult<()> {
        payload.validate()?;
        let body = serde_json::to_vec(payload)?;

        let response = self.transport.send(Method::POST, "", Some(body)).await?;
        if !response.status.is_success() {
            return Err(NotifyError::Status {
                status: response.status.as_u16(),
                body: response.text(),
            });
        }
        debug!(status = %response.status, "webhook delivered");
        Ok(())
    }
}

/// Keeps payloads in memory instead of sending them.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Payload>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn sent_guard(&self) -> MutexGuard<'_, Vec<Payload>> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sent(&self) -> Vec<Payload> {
        self.sent_guard().clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, payload: &Payload) -> NotifyResult<()> {
        payload.validate()?;
        self.sent_guard().push(payload.clone());
        Ok(())
    }
}
