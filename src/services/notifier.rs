//! Share notifications for recipients listed on a closed share.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::{config::MailConfig, models::share::Share};

const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("mail provider rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell every address in `share.emails` that the share is ready.
    async fn notify_share(&self, share: &Share) -> Result<(), NotifyError>;
}

/// Sends a dynamic-template mail through SendGrid.
pub struct SendGridNotifier {
    client: reqwest::Client,
    config: MailConfig,
    api_key: String,
}

impl SendGridNotifier {
    pub fn new(config: MailConfig, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            api_key,
        }
    }

    fn payload(&self, share: &Share) -> serde_json::Value {
        let recipients: Vec<_> = share
            .emails
            .iter()
            .map(|address| {
                let name = address.split('@').next().unwrap_or(address);
                json!({ "email": address, "name": name })
            })
            .collect();

        json!({
            "from": { "email": self.config.sender_mail, "name": self.config.sender_name },
            "template_id": self.config.template_id,
            "personalizations": [{
                "to": recipients,
                "dynamic_template_data": {
                    "id": share.id,
                    "name": share.name,
                    "download_limit": share.download_limit,
                    "files": share.attachments.as_deref().unwrap_or_default(),
                }
            }]
        })
    }
}

#[async_trait]
impl Notifier for SendGridNotifier {
    async fn notify_share(&self, share: &Share) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(SENDGRID_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&self.payload(share))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        tracing::info!(share = %share.id, recipients = share.emails.0.len(), "share mail sent");
        Ok(())
    }
}

/// Used when no mail provider is configured: only logs.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_share(&self, share: &Share) -> Result<(), NotifyError> {
        tracing::info!(
            share = %share.id,
            recipients = ?share.emails.0,
            "mail provider not configured, skipping share notification"
        );
        Ok(())
    }
}

/// Pick the notifier matching the configuration.
pub fn from_config(config: &MailConfig) -> Arc<dyn Notifier> {
    match &config.api_key {
        Some(key) => Arc::new(SendGridNotifier::new(config.clone(), key.clone())),
        None => Arc::new(LogNotifier),
    }
}
