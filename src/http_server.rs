use crate::api;
use crate::context::AppContext;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health_check", get(api::health_check))
        .route("/subscribe", post(api::subscribe))
        .route("/verify", get(api::verify))
        .route("/unsubscribe", get(api::unsubscribe))
        .route(
            "/members/:token/preferences",
            get(api::get_preferences).put(api::update_preferences),
        )
        .route("/members/:token/dashboard", get(api::dashboard))
        .route("/cron/deliver", post(api::cron_deliver))
        .route("/cron/retry", post(api::cron_retry))
        .route("/cron/test", post(api::cron_test))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

pub async fn start_http_server(ctx: AppContext) -> Result<()> {
    let bind_addr = ctx.config.bind_addr.clone();
    let app = router(ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
