use std::sync::Arc;

use spinup_control::{
    channel::DbCommandQueue,
    clock::{SharedClock, SystemClock},
    config::Settings,
    handler::RequestHandler,
    http::build_client,
    interactions,
    lease::DbLeaseStore,
    notify::WebhookNotifier,
    params,
    provider::HttpResourceProvider,
    state::{AppState, init_db_and_migrate},
};

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

    if settings.start_hook_url.is_none() {
        tracing::warn!("SPINUP_START_HOOK_URL is not set; start requests will not power on the server");
    }

    let handler = RequestHandler::new(
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
    );

    let app = interactions::router(AppState {
        handler: Arc::new(handler),
        reply_delay: settings.reply_delay,
    });

    let addr = settings.listen_addr;
    tracing::info!(%addr, %resource_id, "spinup-control HTTP listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
