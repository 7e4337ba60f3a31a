use crate::config::EmailApiConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    /// Sent as `Idempotency-Key` so a repeated request is delivered once by the provider.
    pub idempotency_key: Option<String>,
}

/// Any 2xx from the provider. The id is missing when the success body was unreadable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmailError {
    /// Network failures, timeouts, rate limiting and 5xx responses.
    #[error("transient email failure: {0}")]
    Transient(String),

    #[error("email rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl EmailError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmailError::Transient(_))
    }

    fn from_status(status: StatusCode, message: String) -> EmailError {
        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            EmailError::Transient(format!("status {}: {}", status.as_u16(), message))
        } else {
            EmailError::Rejected {
                status: status.as_u16(),
                message,
            }
        }
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, EmailError>;
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

/// Transactional email client for the Resend HTTP API.
pub struct ResendClient {
    client: Client,
    api_key: String,
    base_url: String,
    from: String,
}

impl ResendClient {
    pub fn new(config: &EmailApiConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()?;

        Ok(ResendClient {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl EmailSender for ResendClient {
    #[instrument(skip(self, email), fields(subject = %email.subject))]
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, EmailError> {
        let request = SendRequest {
            from: &self.from,
            to: [email.to.as_str()],
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
        };

        let mut builder = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request);
        if let Some(key) = &email.idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| EmailError::Transient(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(EmailError::from_status(status, body));
        }

        // The provider accepted the email; a body we cannot read must not trigger a resend.
        let message_id = match serde_json::from_str::<SendResponse>(&body) {
            Ok(parsed) => Some(parsed.id),
            Err(e) => {
                warn!("email accepted with status {} but response unreadable: {}", status, e);
                None
            }
        };

        Ok(SendReceipt { message_id })
    }
}
