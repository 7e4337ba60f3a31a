use crate::common::error::AppError;
use crate::common::time::now_utc;
use crate::context::AppContext;
use crate::delivery::{run_delivery, DeliveryMode, DeliveryReport};
use crate::subscribers::{self, model::PreferencesPatch, model::SubscribeRequest};
use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub async fn health_check() -> StatusCode {
    StatusCode::OK
}

#[derive(Deserialize)]
pub struct TokenQuery {
    token: String,
}

pub async fn subscribe(
    State(ctx): State<AppContext>,
    Json(payload): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = subscribers::subscribe(&ctx, payload, now_utc()).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn verify(
    State(ctx): State<AppContext>,
    Query(params): Query<TokenQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user = subscribers::verify(&ctx, &params.token, now_utc()).await?;
    Ok(Json(json!({
        "email": user.email,
        "verified": user.verified,
        "manage_token": user.manage_token,
    })))
}

pub async fn unsubscribe(
    State(ctx): State<AppContext>,
    Query(params): Query<TokenQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user = subscribers::unsubscribe(&ctx, &params.token, now_utc()).await?;
    Ok(Json(json!({
        "email": user.email,
        "subscribed": user.subscribed,
    })))
}

pub async fn get_preferences(
    State(ctx): State<AppContext>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(subscribers::get_preferences(&ctx, &token).await?))
}

pub async fn update_preferences(
    State(ctx): State<AppContext>,
    Path(token): Path<String>,
    Json(patch): Json<PreferencesPatch>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(
        subscribers::update_preferences(&ctx, &token, patch, now_utc()).await?,
    ))
}

pub async fn dashboard(
    State(ctx): State<AppContext>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(subscribers::dashboard(&ctx, &token, now_utc()).await?))
}

#[derive(Deserialize)]
pub struct DeliverQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Deserialize)]
pub struct TestRequest {
    email: String,
}

#[derive(Serialize)]
struct RunResponse {
    #[serde(flatten)]
    mode: DeliveryMode,
    #[serde(flatten)]
    report: DeliveryReport,
}

pub async fn cron_deliver(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Query(params): Query<DeliverQuery>,
) -> Result<impl IntoResponse, AppError> {
    authorize_cron(&ctx, &headers)?;
    let mode = if params.force {
        DeliveryMode::Manual
    } else {
        DeliveryMode::Scheduled
    };
    run(&ctx, mode).await
}

pub async fn cron_retry(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    authorize_cron(&ctx, &headers)?;
    run(&ctx, DeliveryMode::Retry).await
}

pub async fn cron_test(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(payload): Json<TestRequest>,
) -> Result<impl IntoResponse, AppError> {
    authorize_cron(&ctx, &headers)?;
    run(&ctx, DeliveryMode::Test {
        email: payload.email,
    })
    .await
}

async fn run(ctx: &AppContext, mode: DeliveryMode) -> Result<Json<RunResponse>, AppError> {
    let report = run_delivery(ctx, mode.clone(), now_utc()).await?;
    Ok(Json(RunResponse { mode, report }))
}

fn authorize_cron(ctx: &AppContext, headers: &HeaderMap) -> Result<(), AppError> {
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(AppError::Unauthorized)?;

    if constant_time_eq(provided.as_bytes(), ctx.config.cron_secret.as_bytes()) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
