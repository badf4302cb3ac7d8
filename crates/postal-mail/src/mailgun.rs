use async_trait::async_trait;
use postal_core::config::MailConfig;
use postal_protocol::MailMessage;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{error::MailError, transport::MailTransport};

/// Mailgun HTTP API transport (`POST /v3/<domain>/messages`).
pub struct MailgunTransport {
    client: reqwest::Client,
    api_key: String,
    domain: String,
    base_url: String,
    sender_local_part: String,
}

/// Body Mailgun returns on both success and failure.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    message: String,
}

impl MailgunTransport {
    pub fn new(domain: String, api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            domain,
            base_url: base_url.unwrap_or_else(|| "https://api.mailgun.net/v3".to_string()),
            sender_local_part: "mailgun".to_string(),
        }
    }

    pub fn from_config(config: &MailConfig) -> Result<Self, MailError> {
        let (domain, api_key) = config
            .credentials()
            .ok_or_else(|| MailError::Config("mail.domain and mail.api_key are required".into()))?;
        let mut transport = Self::new(
            domain.to_string(),
            api_key.to_string(),
            Some(config.base_url.trim_end_matches('/').to_string()),
        );
        transport.sender_local_part = config.sender_local_part.clone();
        Ok(transport)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// `"<display name> <local@domain>"`.
    fn from_header(&self, sender_name: &str) -> String {
        format!("{} <{}@{}>", sender_name, self.sender_local_part, self.domain)
    }

    fn form_fields(&self, msg: &MailMessage) -> Vec<(&'static str, String)> {
        vec![
            ("from", self.from_header(&msg.sender_name)),
            ("to", msg.recipient.clone()),
            ("subject", msg.subject.clone()),
            ("text", msg.body.clone()),
        ]
    }
}

#[async_trait]
impl MailTransport for MailgunTransport {
    fn name(&self) -> &str {
        "mailgun"
    }

    async fn send(&self, msg: &MailMessage) -> Result<(), MailError> {
        let url = format!("{}/{}/messages", self.base_url, self.domain);
        debug!(to = %msg.recipient, "sending message via mailgun");

        let resp = self
            .client
            .post(&url)
            .basic_auth("api", Some(&self.api_key))
            .form(&self.form_fields(msg))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "mailgun API error");
            let message = serde_json::from_str::<ApiResponse>(&text)
                .map(|r| r.message)
                .unwrap_or(text);
            return Err(MailError::Rejected { status, message });
        }

        if let Ok(api_resp) = resp.json::<ApiResponse>().await {
            debug!(id = ?api_resp.id, message = %api_resp.message, "mailgun accepted message");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> MailgunTransport {
        MailgunTransport::new("mg.example.com".into(), "key-abc".into(), None)
    }

    fn message() -> MailMessage {
        MailMessage {
            sender_name: "Valentine Wall".into(),
            recipient: "friend@example.com".into(),
            subject: "Someone sent you a message".into(),
            body: "Open the wall to read it.".into(),
        }
    }

    #[test]
    fn from_header_uses_domain() {
        assert_eq!(
            transport().from_header("Valentine Wall"),
            "Valentine Wall <mailgun@mg.example.com>"
        );
    }

    #[test]
    fn form_carries_every_field() {
        let t = transport();
        let msg = message();
        let fields = t.form_fields(&msg);
        let get = |k: &str| {
            fields
                .iter()
                .find(|(name, _)| *name == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("to"), Some("friend@example.com"));
        assert_eq!(get("subject"), Some("Someone sent you a message"));
        assert_eq!(get("text"), Some("Open the wall to read it."));
        assert_eq!(get("from"), Some("Valentine Wall <mailgun@mg.example.com>"));
    }

    #[test]
    fn from_config_requires_credentials() {
        let config = MailConfig::default();
        assert!(matches!(
            MailgunTransport::from_config(&config),
            Err(MailError::Config(_))
        ));
    }

    #[test]
    fn from_config_applies_overrides() {
        let config = MailConfig {
            domain: Some("mg.example.com".into()),
            api_key: Some("key-abc".into()),
            base_url: "https://api.eu.mailgun.net/v3/".into(),
            sender_local_part: "noreply".into(),
        };
        let t = MailgunTransport::from_config(&config).unwrap();
        assert_eq!(t.base_url, "https://api.eu.mailgun.net/v3");
        assert_eq!(t.from_header("Wall"), "Wall <noreply@mg.example.com>");
    }

    #[tokio::test]
    async fn log_transport_always_succeeds() {
        let t = crate::LogTransport;
        assert_eq!(t.name(), "log");
        assert!(t.send(&message()).await.is_ok());
    }
}
