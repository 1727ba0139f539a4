use anyhow::Context;
use spinup_model::InteractionRef;

pub const DEFAULT_WEBHOOK_API_BASE: &str = "https://discord.com/api/v10";

/// Chat platforms reject follow-up content over this many characters.
const MAX_CONTENT_CHARS: usize = 2000;

/// Delivers a human-readable line back to whoever triggered the command.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn post(&self, target: &InteractionRef, text: &str) -> anyhow::Result<()>;
}

#[derive(Debug, serde::Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

/// Posts to the interaction follow-up webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    api_base: String,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
        }
    }
}

#[async_trait::async_trait]
impl NotificationSink for WebhookNotifier {
    async fn post(&self, target: &InteractionRef, text: &str) -> anyhow::Result<()> {
        let content = truncate_chars(text, MAX_CONTENT_CHARS);
        let url = target.followup_url(&self.api_base);

        let resp = self
            .client
            .post(&url)
            .json(&WebhookMessage { content: &content })
            .send()
            .await
            .context("post follow-up message")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("follow-up webhook returned {status}: {body}");
        }
        Ok(())
    }
}

pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }

    let suffix = "…(truncated)";
    let keep = max_chars.saturating_sub(suffix.chars().count()).max(1);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(suffix);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_chars("server is up", MAX_CONTENT_CHARS), "server is up");
    }

    #[test]
    fn long_text_fits_the_limit() {
        let long = "あ".repeat(MAX_CONTENT_CHARS + 10);
        let out = truncate_chars(&long, MAX_CONTENT_CHARS);
        assert_eq!(out.chars().count(), MAX_CONTENT_CHARS);
        assert!(out.ends_with("…(truncated)"));
    }
}
