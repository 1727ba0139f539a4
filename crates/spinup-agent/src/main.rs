use std::sync::Arc;

use spinup_control::{
    channel::DbCommandQueue,
    clock::{SharedClock, SystemClock},
    config::Settings,
    http::build_client,
    lease::DbLeaseStore,
    notify::WebhookNotifier,
    params,
    provider::HttpResourceProvider,
    state::init_db_and_migrate,
};
use tokio::sync::watch;

mod followup;
mod heartbeat;
mod worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = Settings::from_env()?;
    let resource_id = params::resolve_from_settings(&settings).await?;
    let db = init_db_and_migrate(&settings.database_url).await?;

    let clock: SharedClock = Arc::new(SystemClock);
    let client = build_client(settings.http_timeout)?;

    let worker = worker::Worker::new(
        resource_id.clone(),
        Arc::new(DbLeaseStore::new(db.clone(), clock.clone(), settings.leases)),
        Arc::new(DbCommandQueue::new(
            db,
            clock.clone(),
            settings.queue_poll_interval,
        )),
        Arc::new(HttpResourceProvider::new(
            client.clone(),
            settings.start_hook_url.clone(),
            settings.checkip_url.clone(),
        )),
        Arc::new(WebhookNotifier::new(client, settings.webhook_api_base.clone())),
        clock,
        worker::WorkerConfig::from_settings(&settings),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "listen for ctrl-c failed");
            return;
        }
        tracing::info!("shutdown requested; finishing current poll");
        let _ = stop_tx.send(true);
    });

    tracing::info!(
        %resource_id,
        heartbeat_interval = ?settings.heartbeat_interval,
        heartbeat_lease = ?settings.leases.heartbeat_lease,
        "spinup-agent running"
    );
    worker.run(stop_rx).await;

    Ok(())
}
