//! Delayed-delivery job queue client
//!
//! The scheduling pipeline hands fire-later work to an external queue that
//! calls our worker endpoint back no earlier than the requested time. The
//! trait keeps the pipelines testable without a live queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug)]
pub enum QueueError {
    Http(reqwest::Error),
    Api(String),
    /// The message id is not known to the queue (already delivered,
    /// already deleted, or never existed)
    NotFound,
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Http(e) => write!(f, "HTTP error: {}", e),
            QueueError::Api(msg) => write!(f, "queue API error: {}", msg),
            QueueError::NotFound => write!(f, "queue message not found"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<reqwest::Error> for QueueError {
    fn from(e: reqwest::Error) -> Self {
        QueueError::Http(e)
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue an HTTP callback to `url` with a JSON body, delivered no
    /// earlier than `not_before`. Returns the queue's message id.
    async fn publish(
        &self,
        url: &str,
        body: serde_json::Value,
        not_before: DateTime<Utc>,
    ) -> Result<String, QueueError>;

    /// Remove a pending message so it never fires. `NotFound` when the
    /// queue no longer knows the id.
    async fn delete_message(&self, message_id: &str) -> Result<(), QueueError>;
}

/// QStash HTTP client. The destination URL rides in the publish path and
/// the delivery delay in the `Upstash-Not-Before` header (unix seconds).
/// `Upstash-Forward-Authorization` makes the delivery carry our worker
/// token, which the callback endpoint requires.
pub struct QstashClient {
    base_url: String,
    token: String,
    worker_token: String,
    http: Client,
}

impl QstashClient {
    pub fn new(base_url: &str, token: &str, worker_token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            worker_token: worker_token.to_string(),
            http: Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(rename = "messageId")]
    message_id: String,
}

#[async_trait]
impl JobQueue for QstashClient {
    async fn publish(
        &self,
        url: &str,
        body: serde_json::Value,
        not_before: DateTime<Utc>,
    ) -> Result<String, QueueError> {
        let resp = self
            .http
            .post(format!("{}/v2/publish/{}", self.base_url, url))
            .header("Authorization", format!("Bearer {}", self.token))
            .header(
                "Upstash-Forward-Authorization",
                format!("Bearer {}", self.worker_token),
            )
            .header("Upstash-Not-Before", not_before.timestamp().to_string())
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let text = resp.text().await?;
            return Err(QueueError::Api(text));
        }

        let parsed: PublishResponse = resp.json().await?;
        Ok(parsed.message_id)
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), QueueError> {
        let resp = self
            .http
            .delete(format!("{}/v2/messages/{}", self.base_url, message_id))
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(QueueError::NotFound);
        }
        if !resp.status().is_success() {
            let text = resp.text().await?;
            return Err(QueueError::Api(text));
        }
        Ok(())
    }
}
