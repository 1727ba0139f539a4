use anyhow::Context;

pub const DEFAULT_CHECKIP_URL: &str = "http://checkip.amazonaws.com";

/// The cloud side of the managed server. Both calls must be safe to repeat.
#[async_trait::async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn start(&self, id: &str) -> anyhow::Result<()>;

    /// Public address players connect to.
    async fn describe_endpoint(&self, id: &str) -> anyhow::Result<String>;
}

#[derive(Debug, serde::Serialize)]
struct StartHookRequest<'a> {
    id: &'a str,
}

/// Starts the server through a power-on hook and resolves the endpoint with
/// a check-ip service. The agent runs on the server itself, so the check-ip
/// answer is the server's own public address.
#[derive(Debug, Clone)]
pub struct HttpResourceProvider {
    client: reqwest::Client,
    start_hook_url: Option<String>,
    checkip_url: String,
}

impl HttpResourceProvider {
    pub fn new(
        client: reqwest::Client,
        start_hook_url: Option<String>,
        checkip_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            start_hook_url,
            checkip_url: checkip_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl ResourceProvider for HttpResourceProvider {
    async fn start(&self, id: &str) -> anyhow::Result<()> {
        let Some(url) = self.start_hook_url.as_deref() else {
            anyhow::bail!("SPINUP_START_HOOK_URL is not set");
        };

        self.client
            .post(url)
            .json(&StartHookRequest { id })
            .send()
            .await
            .context("request start hook")?
            .error_for_status()
            .context("start hook returned non-2xx")?;
        Ok(())
    }

    async fn describe_endpoint(&self, _id: &str) -> anyhow::Result<String> {
        let text = self
            .client
            .get(&self.checkip_url)
            .send()
            .await
            .context("request check-ip")?
            .error_for_status()
            .context("check-ip returned non-2xx")?
            .text()
            .await
            .context("read check-ip body")?;

        let ip = text.trim();
        if ip.is_empty() {
            anyhow::bail!("check-ip returned an empty body");
        }
        Ok(ip.to_string())
    }
}
