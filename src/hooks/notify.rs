use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tracing::{error, info};

use crate::hooks::Notifier;

/// Reports run events through `tracing`.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn on_start(&self, task: &str, run_id: u64) -> Result<()> {
        info!(task = %task, run_id = run_id, "Task run started");
        Ok(())
    }

    async fn on_success(&self, task: &str, run_id: u64) -> Result<()> {
        info!(task = %task, run_id = run_id, "Task run completed");
        Ok(())
    }

    async fn on_error(&self, task: &str, run_id: u64, message: &str) -> Result<()> {
        error!(task = %task, run_id = run_id, "Task run failed:\n{}", message);
        Ok(())
    }
}

/// Posts run events as JSON to an incoming-webhook URL (Slack compatible:
/// the payload carries a `text` field).
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    async fn post(&self, payload: serde_json::Value) -> Result<()> {
        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Webhook returned status {} for '{}': {}", status.as_u16(), self.url, body);
        }
        Ok(())
    }
}

fn payload(event: &str, task: &str, run_id: u64, text: String) -> serde_json::Value {
    serde_json::json!({
        "event": event,
        "task": task,
        "run_id": run_id,
        "text": text,
    })
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn on_start(&self, task: &str, run_id: u64) -> Result<()> {
        self.post(payload(
            "start",
            task,
            run_id,
            format!("Task `{}` started, run_id={}", task, run_id),
        ))
        .await
    }

    async fn on_success(&self, task: &str, run_id: u64) -> Result<()> {
        self.post(payload(
            "success",
            task,
            run_id,
            format!("Task `{}` completed, run_id={}", task, run_id),
        ))
        .await
    }

    async fn on_error(&self, task: &str, run_id: u64, message: &str) -> Result<()> {
        self.post(payload(
            "error",
            task,
            run_id,
            format!("Task `{}` failed, run_id={}\n```{}```", task, run_id, message),
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_text_and_ids() {
        let p = payload("error", "demo::add", 7, "boom".into());
        assert_eq!(p["event"], "error");
        assert_eq!(p["run_id"], 7);
        assert_eq!(p["text"], "boom");
    }

    #[tokio::test]
    async fn unreachable_webhook_is_an_error() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook").unwrap();
        assert!(notifier.on_start("demo::add", 0).await.is_err());
    }
}
