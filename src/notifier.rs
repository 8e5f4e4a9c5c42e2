use async_trait::async_trait;
use serde_json::json;

use crate::error::AppResult;

/// Outbound email collaborator. Delivery transport lives behind this seam;
/// the messaging core only dispatches best-effort, fire-and-forget sends.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> AppResult<()>;

    async fn send_mention_email(
        &self,
        to: &str,
        author_name: &str,
        channel_name: &str,
        content: &str,
    ) -> AppResult<()> {
        let subject = format!("{} mentioned you in #{}", author_name, channel_name);
        let body = format!(
            "{} mentioned you in #{}:\n\n{}",
            author_name, channel_name, content
        );
        self.send_email(to, &subject, &body).await
    }

    async fn send_channel_added_email(
        &self,
        to: &str,
        actor_name: &str,
        channel_name: &str,
    ) -> AppResult<()> {
        let subject = format!("You were added to #{}", channel_name);
        let body = format!("{} added you to the channel #{}.", actor_name, channel_name);
        self.send_email(to, &subject, &body).await
    }

    async fn send_direct_message_email(
        &self,
        to: &str,
        sender_name: &str,
        content: &str,
    ) -> AppResult<()> {
        let subject = format!("New message from {}", sender_name);
        let body = format!("{} sent you a message:\n\n{}", sender_name, content);
        self.send_email(to, &subject, &body).await
    }
}

/// Posts emails as JSON to a configured HTTP mail relay
pub struct RelayNotifier {
    client: reqwest::Client,
    relay_url: String,
    from: String,
}

impl RelayNotifier {
    pub fn new(relay_url: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            relay_url,
            from,
        }
    }
}

#[async_trait]
impl Notifier for RelayNotifier {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> AppResult<()> {
        let payload = json!({
            "from": self.from,
            "to": to,
            "subject": subject,
            "body": body,
        });

        let response = self
            .client
            .post(&self.relay_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(crate::error::AppError::Delivery(format!(
                "mail relay returned {}",
                response.status()
            )));
        }

        tracing::debug!(to = %to, subject = %subject, "Email handed to relay");
        Ok(())
    }
}

/// Used when no mail relay is configured; sends are logged and dropped
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email(&self, to: &str, subject: &str, _body: &str) -> AppResult<()> {
        tracing::info!(to = %to, subject = %subject, "Mail relay not configured, dropping email");
        Ok(())
    }
}

/// Resolves an already-uploaded attachment id to the URL clients fetch it from
pub trait FileRefProvider: Send + Sync {
    fn url_for(&self, file_id: &str) -> String;
}

pub struct BaseUrlFileProvider {
    base_url: String,
}

impl BaseUrlFileProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl FileRefProvider for BaseUrlFileProvider {
    fn url_for(&self, file_id: &str) -> String {
        format!("{}/{}", self.base_url, file_id)
    }
}
