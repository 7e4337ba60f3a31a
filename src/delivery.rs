use crate::common::error::AppError;
use crate::context::AppContext;
use crate::curation::{fetch_and_curate, model::CuratedContent, personalize};
use crate::delivery::schedule::{due_slot, local_date};
use crate::email::client::OutgoingEmail;
use crate::email::model::{LogKind, SendOutcome};
use crate::email::render::{render_digest, DigestRecipient};
use crate::email::{repository as email_log, send_with_retry};
use crate::subscribers::model::{Topic, User};
use crate::subscribers::repository as users;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

pub mod schedule;

/// A `pending` claim older than this belongs to a run that died and may be taken over.
const STALE_CLAIM_MINUTES: i64 = 30;
const RETRY_LOOKBACK_DAYS: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Subscribers whose slot is open right now.
    Scheduled,
    /// Every eligible subscriber, for today's local date.
    Manual,
    /// Recent transient failures.
    Retry,
    /// A one-off digest to an arbitrary address.
    Test { email: String },
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub considered: usize,
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub empty: usize,
}

struct Target {
    user: User,
    delivery_date: NaiveDate,
    reclaim_failed: bool,
}

pub async fn run_delivery(
    ctx: &AppContext,
    mode: DeliveryMode,
    now: DateTime<Utc>,
) -> Result<DeliveryReport, AppError> {
    let _guard = ctx.delivery_lock.lock().await;

    let report = match &mode {
        DeliveryMode::Test { email } => send_test_digest(ctx, email, now).await?,
        _ => {
            let (considered, targets) = select_targets(ctx, &mode, now).await?;
            deliver(ctx, considered, targets, now).await?
        }
    };

    info!(
        "delivery run {:?} finished: considered={} due={} sent={} failed={} skipped={} empty={}",
        mode,
        report.considered,
        report.due,
        report.sent,
        report.failed,
        report.skipped,
        report.empty
    );

    Ok(report)
}

async fn select_targets(
    ctx: &AppContext,
    mode: &DeliveryMode,
    now: DateTime<Utc>,
) -> Result<(usize, Vec<Target>), AppError> {
    let mut tx = ctx.pool.begin().await?;
    let window = ctx.config.scheduler.delivery_window;

    let selected = match mode {
        DeliveryMode::Scheduled => {
            let eligible = users::get_eligible_users(&mut tx).await?;
            let considered = eligible.len();
            let targets = eligible
                .into_iter()
                .filter_map(|user| {
                    due_slot(&user.preferences, now, window).map(|delivery_date| Target {
                        user,
                        delivery_date,
                        reclaim_failed: false,
                    })
                })
                .collect();
            (considered, targets)
        }
        DeliveryMode::Manual => {
            let eligible = users::get_eligible_users(&mut tx).await?;
            let considered = eligible.len();
            let targets = eligible
                .into_iter()
                .map(|user| Target {
                    delivery_date: local_date(&user.preferences, now),
                    user,
                    reclaim_failed: true,
                })
                .collect();
            (considered, targets)
        }
        DeliveryMode::Retry => {
            let since = now.date_naive() - Duration::days(RETRY_LOOKBACK_DAYS);
            let max_runs = 1 + ctx.config.scheduler.max_retry_runs;
            let failures = email_log::get_retryable_failures(&mut tx, since, max_runs).await?;
            let considered = failures.len();

            let mut targets = Vec::new();
            for log in failures {
                let Some(user_id) = log.user_id else { continue };
                let Ok(delivery_date) = log.delivery_date.parse::<NaiveDate>() else {
                    warn!("email log {} has an invalid date {:?}", log.log_id, log.delivery_date);
                    continue;
                };
                match users::find_by_id(&mut tx, user_id).await? {
                    Some(user) if user.is_eligible() => targets.push(Target {
                        user,
                        delivery_date,
                        reclaim_failed: true,
                    }),
                    _ => {}
                }
            }
            (considered, targets)
        }
        DeliveryMode::Test { .. } => (0, Vec::new()),
    };

    tx.commit().await?;

    Ok(selected)
}

async fn deliver(
    ctx: &AppContext,
    considered: usize,
    targets: Vec<Target>,
    now: DateTime<Utc>,
) -> Result<DeliveryReport, AppError> {
    let mut report = DeliveryReport {
        considered,
        due: targets.len(),
        ..Default::default()
    };
    if targets.is_empty() {
        return Ok(report);
    }

    // Nothing is claimed before curation succeeds, so a news outage leaves no log rows behind.
    let content =
        fetch_and_curate(ctx.news.as_ref(), &ctx.config.news.query, &ctx.rules, now).await?;

    let now_millis = now.timestamp_millis();
    let stale_before = (now - Duration::minutes(STALE_CLAIM_MINUTES)).timestamp_millis();

    for target in targets {
        let user = &target.user;

        let mut tx = ctx.pool.begin().await?;
        let claimed = email_log::claim_digest(
            &mut tx,
            user.user_id,
            &user.email,
            target.delivery_date,
            target.reclaim_failed,
            stale_before,
            now_millis,
        )
        .await?;
        let Some(log_id) = claimed else {
            tx.commit().await?;
            report.skipped += 1;
            continue;
        };
        let interests = users::get_interests(&mut tx, user.user_id).await?;
        tx.commit().await?;

        let composed = compose(ctx, &content, user, &interests, target.delivery_date)?;
        let Some((mut email, article_count)) = composed else {
            let mut tx = ctx.pool.begin().await?;
            email_log::release_claim(&mut tx, log_id).await?;
            tx.commit().await?;
            report.empty += 1;
            continue;
        };

        email.idempotency_key = Some(format!("digest-{log_id}"));
        let outcome = send(ctx, &email, article_count).await;
        match &outcome {
            SendOutcome::Sent { .. } => report.sent += 1,
            SendOutcome::Failed { error, .. } => {
                warn!("digest for user {} failed: {}", user.user_id, error);
                report.failed += 1;
            }
        }

        let mut tx = ctx.pool.begin().await?;
        email_log::record_outcome(&mut tx, log_id, &outcome, now_millis).await?;
        tx.commit().await?;
    }

    Ok(report)
}

/// Renders the digest for a subscriber, or `None` when there is nothing to send them.
fn compose(
    ctx: &AppContext,
    content: &CuratedContent,
    user: &User,
    interests: &[Topic],
    delivery_date: NaiveDate,
) -> Result<Option<(OutgoingEmail, usize)>, AppError> {
    let all_topics = Topic::SELECTABLE;
    let interests: &[Topic] = if interests.is_empty() {
        &all_topics
    } else {
        interests
    };
    let sections = personalize(content, interests, ctx.rules.max_articles_per_section);
    if sections.is_empty() {
        return Ok(None);
    }
    let article_count = sections.iter().map(|s| s.articles.len()).sum();

    let recipient = DigestRecipient {
        email: &user.email,
        name: user.name.as_deref(),
        manage_token: Some(&user.manage_token),
    };
    let email = render_digest(&recipient, &sections, delivery_date, &ctx.config.app_url)?;

    Ok(Some((email, article_count)))
}

async fn send(ctx: &AppContext, email: &OutgoingEmail, article_count: usize) -> SendOutcome {
    let (result, attempts) = send_with_retry(ctx.mailer.as_ref(), email, ctx.retry_policy()).await;
    match result {
        Ok(receipt) => SendOutcome::Sent {
            message_id: receipt.message_id,
            attempts,
            article_count,
        },
        Err(e) => SendOutcome::Failed {
            retryable: e.is_transient(),
            error: e.to_string(),
            attempts,
        },
    }
}

async fn send_test_digest(
    ctx: &AppContext,
    address: &str,
    now: DateTime<Utc>,
) -> Result<DeliveryReport, AppError> {
    let address = crate::subscribers::model::normalize_email(address)
        .map_err(|e| AppError::bad_request(e.to_string()))?;

    let mut tx = ctx.pool.begin().await?;
    let subscriber = users::find_by_email(&mut tx, &address).await?;
    let interests = match &subscriber {
        Some(user) => users::get_interests(&mut tx, user.user_id).await?,
        None => Topic::SELECTABLE.to_vec(),
    };
    tx.commit().await?;

    let mut report = DeliveryReport {
        considered: 1,
        due: 1,
        ..Default::default()
    };

    let content =
        fetch_and_curate(ctx.news.as_ref(), &ctx.config.news.query, &ctx.rules, now).await?;
    let interests = if interests.is_empty() {
        Topic::SELECTABLE.to_vec()
    } else {
        interests
    };
    let sections = personalize(&content, &interests, ctx.rules.max_articles_per_section);
    if sections.is_empty() {
        report.empty = 1;
        return Ok(report);
    }
    let article_count = sections.iter().map(|s| s.articles.len()).sum();

    let recipient = DigestRecipient {
        email: &address,
        name: subscriber.as_ref().and_then(|u| u.name.as_deref()),
        manage_token: None,
    };
    let email = render_digest(&recipient, &sections, now.date_naive(), &ctx.config.app_url)?;
    let outcome = send(ctx, &email, article_count).await;

    match &outcome {
        SendOutcome::Sent { .. } => report.sent = 1,
        SendOutcome::Failed { .. } => report.failed = 1,
    }

    let mut tx = ctx.pool.begin().await?;
    email_log::insert_one_off(
        &mut tx,
        subscriber.as_ref().map(|u| u.user_id),
        &address,
        LogKind::Test,
        now.date_naive(),
        &outcome,
        now.timestamp_millis(),
    )
    .await?;
    tx.commit().await?;

    Ok(report)
}
