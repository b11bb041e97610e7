use std::{collections::BTreeMap, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::config::PushConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub address: String,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
    pub priority: Priority,
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("push transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("push gateway rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// External delivery channel. Best effort: one call, one attempt.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, msg: &PushMessage) -> Result<(), PushError>;
}

/// Posts FCM-style JSON messages to an HTTP push endpoint.
#[derive(Clone)]
pub struct HttpPushGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpPushGateway {
    pub fn new(cfg: &PushConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .context("build push http client")?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            api_key: cfg.api_key.clone(),
        })
    }

    fn payload(msg: &PushMessage) -> serde_json::Value {
        let android_priority = match msg.priority {
            Priority::High => "high",
            Priority::Normal => "normal",
        };
        json!({
            "message": {
                "token": msg.address,
                "notification": { "title": msg.title, "body": msg.body },
                "data": msg.data,
                "android": {
                    "priority": android_priority,
                    "notification": {
                        "channel_id": "medication-reminders",
                        "default_sound": true,
                        "default_vibrate_timings": true,
                    },
                },
                "apns": { "payload": { "aps": { "sound": "default", "badge": 1 } } },
            }
        })
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send(&self, msg: &PushMessage) -> Result<(), PushError> {
        let res = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&Self::payload(msg))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(PushError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!(title = %msg.title, "push accepted by gateway");
        Ok(())
    }
}

#[cfg(test)]
pub use fakes::RecordingGateway;
