//! Completion email delivery through the Resend HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use verity_core::defaults::{EMAIL_FROM, EMAIL_SUBJECT, RESEND_URL};
use verity_core::{Error, Notifier, Result};

const NOTIFY_TIMEOUT_SECS: u64 = 30;

/// Notifier configuration.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub api_key: String,
    pub from: String,
    pub base_url: String,
    pub subject: String,
}

impl NotifierConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            from: EMAIL_FROM.to_string(),
            base_url: RESEND_URL.to_string(),
            subject: EMAIL_SUBJECT.to_string(),
        }
    }

    /// Create config from environment variables.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `RESEND_API_KEY` | required | API key |
    /// | `EMAIL_FROM` | `AI Image Detection <onboarding@resend.dev>` | Sender |
    /// | `RESEND_URL` | `https://api.resend.com` | API base URL |
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("RESEND_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("RESEND_API_KEY not configured".to_string()))?;
        let mut config = Self::new(api_key);
        if let Ok(from) = std::env::var("EMAIL_FROM") {
            config.from = from;
        }
        if let Ok(url) = std::env::var("RESEND_URL") {
            config.base_url = url;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// Email notifier backed by Resend.
pub struct ResendNotifier {
    config: NotifierConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: String,
}

#[derive(Deserialize)]
struct SendEmailResponse {
    id: Option<String>,
}

impl ResendNotifier {
    pub fn new(config: NotifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(NOTIFY_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build email client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(NotifierConfig::from_env()?)
    }
}

/// Minimal HTML escaping for interpolated values.
fn html_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Body of the "report ready" email.
pub fn report_email_html(recipient_name: &str, url: &str) -> String {
    format!(
        "<p>Hi <b>{name}</b>,</p>\
         <p>Your AI Image Detection report is ready.</p>\
         <p><a href=\"{url}\" target=\"_blank\">Download your report</a></p>\
         <p><i>Disclaimer: This report was generated using an AI-based system \
         and may contain inaccuracies.</i></p>\
         <p>Thanks,<br/>AI Image Detection Team</p>",
        name = html_escape(recipient_name),
        url = html_escape(url),
    )
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send_notification(
        &self,
        address: &str,
        recipient_name: &str,
        url: &str,
    ) -> Result<()> {
        let request = SendEmailRequest {
            from: &self.config.from,
            to: vec![address],
            subject: &self.config.subject,
            html: report_email_html(recipient_name, url),
        };

        let endpoint = format!("{}/emails", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Notify(format!("Email request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notify(format!(
                "Email API returned {}: {}",
                status, body
            )));
        }

        let sent: SendEmailResponse = response
            .json()
            .await
            .map_err(|e| Error::Notify(format!("Failed to parse email response: {}", e)))?;

        debug!(
            subsystem = "notify",
            component = "resend",
            op = "send",
            email_id = sent.id.as_deref().unwrap_or("unknown"),
            "Report email sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier(server: &MockServer) -> ResendNotifier {
        ResendNotifier::new(NotifierConfig::new("re_test").with_base_url(server.uri())).unwrap()
    }

    #[test]
    fn test_email_body_escapes_values() {
        let html = report_email_html("<bob>", "https://x/r?a=1&b=2");
        assert!(html.contains("Hi <b>&lt;bob&gt;</b>"));
        assert!(html.contains("href=\"https://x/r?a=1&amp;b=2\""));
        assert!(html.contains("Disclaimer"));
    }

    #[tokio::test]
    async fn test_send_notification_posts_email() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer re_test"))
            .and(body_partial_json(serde_json::json!({
                "from": EMAIL_FROM,
                "to": ["u1@example.com"],
                "subject": "Your AI Image Detection Report is Ready"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "e-1"})))
            .expect(1)
            .mount(&server)
            .await;

        notifier(&server)
            .send_notification("u1@example.com", "u1", "https://signed/url")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_email_is_notify_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid to"))
            .mount(&server)
            .await;

        let err = notifier(&server)
            .send_notification("bad", "u1", "https://signed/url")
            .await
            .unwrap_err();
        match err {
            Error::Notify(msg) => assert!(msg.contains("422")),
            other => panic!("Expected Notify error, got {:?}", other),
        }
    }
}
