use std::path::Path;

use anyhow::Context;
use spinup_model::InteractionRef;

/// How long an interaction token stays usable for follow-ups, minus margin.
pub const FOLLOWUP_TTL_SECS: i64 = 870;

/// Left on disk after a start notification so host-side scripts (idle
/// shutdown) can still post to the original interaction.
///
/// `ttl` is unix seconds rendered as a string; existing scripts parse it
/// that way.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FollowupMarker {
    pub url: String,
    pub ttl: String,
}

impl FollowupMarker {
    pub fn new(target: &InteractionRef, api_base: &str, now_unix: i64) -> Self {
        Self {
            url: target.followup_url(api_base),
            ttl: now_unix.saturating_add(FOLLOWUP_TTL_SECS).to_string(),
        }
    }
}

pub async fn write_marker(path: &Path, marker: &FollowupMarker) -> anyhow::Result<()> {
    let body = serde_json::to_vec(marker).context("encode follow-up marker")?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &body)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use spinup_control::testing::interaction;

    use super::*;

    #[tokio::test]
    async fn marker_holds_followup_url_and_string_ttl() {
        let path = std::env::temp_dir().join(format!("spinup-marker-{}.json", uuid::Uuid::new_v4()));
        let marker = FollowupMarker::new(&interaction(), "https://chat.example/api", 1_700_000_000);
        write_marker(&path, &marker).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["url"], "https://chat.example/api/webhooks/app-1/tok-1");
        assert_eq!(v["ttl"], "1700000870");

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
