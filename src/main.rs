use std::sync::Arc;

use murmur::{
    backend::{LogMailer, Mailer, SqliteAuth, SqliteStore, WebhookMailer},
    config::Config,
    db::Db,
    AppState,
};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await?;
    let store = SqliteStore::new(pool.clone());
    store.migrate().await?;
    info!(database = %config.database_url, "migrations applied");

    let mailer: Arc<dyn Mailer> = match &config.mail_webhook_url {
        Some(url) => Arc::new(WebhookMailer::new(url.clone())),
        None => Arc::new(LogMailer),
    };
    let auth = SqliteAuth::new(pool, mailer, chrono::Duration::minutes(config.otp_ttl_minutes));

    let bind_address = config.bind_address;
    let app_state = AppState {
        db: Db::new(Arc::new(store)),
        auth: Arc::new(auth),
        config: Arc::new(config),
    };

    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!(address = %bind_address, "listening");
    axum::serve(listener, murmur::app(app_state))
        .with_graceful_shutdown(shutdown())
        .await?;
    Ok(())
}

async fn shutdown() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
