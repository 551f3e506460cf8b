//! Email delivery for password reset links.
//!
//! Handlers build an [`EmailMessage`] and hand it to an [`EmailSender`] after the
//! reset row has been committed. Delivery failures are logged by the caller and
//! never change the HTTP response, so a failed send cannot reveal whether an
//! account exists.
//!
//! `LogEmailSender` is the default when no provider key is configured; it logs the
//! recipient and subject only. `HttpEmailSender` posts a JSON document to a
//! transactional email API with a bearer key.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, Instrument};

use crate::APP_USER_AGENT;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
}

impl EmailMessage {
    #[must_use]
    pub fn password_reset(to: &str, reset_url: &str, ttl_minutes: u64) -> Self {
        Self {
            to: to.to_string(),
            subject: "Reset your password".to_string(),
            text: format!(
                "We received a request to reset your password.\n\n\
                 Open the link below to choose a new one. It expires in {ttl_minutes} minutes \
                 and can be used once.\n\n{reset_url}\n\n\
                 If you did not ask for this, you can ignore this email."
            ),
        }
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error describing why it was not sent.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to,
            subject = %message.subject,
            "email delivery disabled, message logged"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct ApiPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

pub struct HttpEmailSender {
    client: Client,
    api_url: String,
    api_key: SecretString,
    from: String,
}

impl std::fmt::Debug for HttpEmailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmailSender")
            .field("api_url", &self.api_url)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl HttpEmailSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_url: String, api_key: SecretString, from: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build email HTTP client")?;
        Ok(Self {
            client,
            api_url,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let payload = ApiPayload {
            from: &self.from,
            to: [&message.to],
            subject: &message.subject,
            text: &message.text,
        };
        let span = tracing::info_span!("email.send", http.url = %self.api_url);
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .instrument(span)
            .await
            .context("Failed to reach email API")?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(anyhow!("Email API returned {status}"))
        }
    }
}
