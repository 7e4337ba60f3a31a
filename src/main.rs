mod api;
mod common;
mod config;
mod context;
mod curation;
mod database;
mod delivery;
mod email;
mod http_server;
mod scheduler;
mod subscribers;

use crate::config::Config;
use crate::context::AppContext;
use crate::curation::news_api::NewsApiClient;
use crate::database::setup_database;
use crate::email::client::ResendClient;
use crate::http_server::start_http_server;
use crate::scheduler::start_scheduler;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ai_digest=debug,sqlx=warn")),
        )
        .init();

    let pool = setup_database(&config.database_url).await?;
    info!("database ready at {}", config.database_url);

    let news = Arc::new(NewsApiClient::new(&config.news)?);
    let mailer = Arc::new(ResendClient::new(&config.email)?);
    let ctx = AppContext::new(pool, config, news, mailer)?;

    let _scheduler = if ctx.config.scheduler.enabled {
        Some(start_scheduler(ctx.clone()).await?)
    } else {
        info!("in-process scheduler disabled");
        None
    };

    start_http_server(ctx).await
}
