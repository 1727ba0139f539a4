use std::time::Duration;

use anyhow::Context;

/// Shared outbound client for webhook replies, the start hook and check-ip.
/// `reqwest::Client` is reference-counted, so clones share one pool.
pub fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("spinup/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .context("build http client")
}
