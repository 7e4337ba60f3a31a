use crate::common::error::AppError;
use crate::common::time::millis_to_datetime;
use crate::context::AppContext;
use crate::delivery::schedule::next_delivery;
use crate::email::model::{EmailLog, LogKind, SendOutcome};
use crate::email::render::render_verification;
use crate::email::{repository as email_log, send_with_retry};
use crate::subscribers::model::{
    normalize_email, PreferenceError, PreferencesPatch, PreferencesView, SubscribeRequest, User,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

pub mod model;
pub mod repository;

const RECENT_LOG_LIMIT: i64 = 10;

fn invalid(err: PreferenceError) -> AppError {
    AppError::bad_request(err.to_string())
}

fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Serialize, Debug)]
pub struct SubscribeOutcome {
    pub user_id: i64,
    pub verification_required: bool,
    pub verification_sent: bool,
}

#[derive(Serialize, Debug)]
pub struct Dashboard {
    pub verified: bool,
    pub subscribed: bool,
    pub preferences: PreferencesView,
    pub sent: i64,
    pub failed: i64,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub next_delivery: Option<DateTime<Utc>>,
    pub recent: Vec<EmailLog>,
}

/// Creates or refreshes a subscription and mails a verification link when one is needed.
pub async fn subscribe(
    ctx: &AppContext,
    request: SubscribeRequest,
    now: DateTime<Utc>,
) -> Result<SubscribeOutcome, AppError> {
    let email = normalize_email(&request.email).map_err(invalid)?;
    let patch = PreferencesPatch::from(&request);
    let interests = patch.interests().map_err(invalid)?.unwrap_or_default();
    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    let now_millis = now.timestamp_millis();

    let mut tx = ctx.pool.begin().await?;
    let existing = repository::find_by_email(&mut tx, &email).await?;

    let (user_id, verification_token) = match existing {
        None => {
            let prefs = patch.apply(&Default::default()).map_err(invalid)?;
            let token = new_token();
            let user_id = repository::insert_user(
                &mut tx,
                &email,
                name,
                &prefs,
                &token,
                &new_token(),
                now_millis,
            )
            .await?;
            info!("new subscriber {}", user_id);
            (user_id, Some(token))
        }
        Some(user) if user.verified && user.subscribed => {
            return Err(AppError::bad_request("already subscribed"));
        }
        Some(user) => {
            let prefs = patch.apply(&user.preferences).map_err(invalid)?;
            repository::update_preferences(&mut tx, user.user_id, name, &prefs, now_millis).await?;
            repository::set_subscribed(&mut tx, user.user_id, true, now_millis).await?;
            if user.verified {
                info!("subscriber {} re-subscribed", user.user_id);
                (user.user_id, None)
            } else {
                let token = new_token();
                repository::set_verification_token(&mut tx, user.user_id, &token, now_millis)
                    .await?;
                (user.user_id, Some(token))
            }
        }
    };

    repository::replace_interests(&mut tx, user_id, &interests).await?;
    tx.commit().await?;

    let Some(token) = verification_token else {
        return Ok(SubscribeOutcome {
            user_id,
            verification_required: false,
            verification_sent: false,
        });
    };

    let message = render_verification(&email, &token, &ctx.config.app_url)?;
    let (result, attempts) =
        send_with_retry(ctx.mailer.as_ref(), &message, ctx.retry_policy()).await;
    let outcome = match result {
        Ok(receipt) => SendOutcome::Sent {
            message_id: receipt.message_id,
            attempts,
            article_count: 0,
        },
        Err(e) => {
            warn!("verification email for user {} failed: {}", user_id, e);
            SendOutcome::Failed {
                retryable: e.is_transient(),
                error: e.to_string(),
                attempts,
            }
        }
    };
    let verification_sent = matches!(outcome, SendOutcome::Sent { .. });

    let mut tx = ctx.pool.begin().await?;
    email_log::insert_one_off(
        &mut tx,
        Some(user_id),
        &email,
        LogKind::Verification,
        now.date_naive(),
        &outcome,
        now_millis,
    )
    .await?;
    tx.commit().await?;

    Ok(SubscribeOutcome {
        user_id,
        verification_required: true,
        verification_sent,
    })
}

pub async fn verify(ctx: &AppContext, token: &str, now: DateTime<Utc>) -> Result<User, AppError> {
    let mut tx = ctx.pool.begin().await?;
    let user = repository::find_by_verification_token(&mut tx, token)
        .await?
        .ok_or_else(|| AppError::not_found("unknown or used verification token"))?;
    repository::mark_verified(&mut tx, user.user_id, now.timestamp_millis()).await?;
    tx.commit().await?;

    info!("subscriber {} verified", user.user_id);
    Ok(User {
        verified: true,
        ..user
    })
}

pub async fn unsubscribe(
    ctx: &AppContext,
    token: &str,
    now: DateTime<Utc>,
) -> Result<User, AppError> {
    let mut tx = ctx.pool.begin().await?;
    let user = find_member(&mut tx, token).await?;
    repository::set_subscribed(&mut tx, user.user_id, false, now.timestamp_millis()).await?;
    tx.commit().await?;

    info!("subscriber {} unsubscribed", user.user_id);
    Ok(User {
        subscribed: false,
        ..user
    })
}

async fn find_member(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    token: &str,
) -> Result<User, AppError> {
    repository::find_by_manage_token(tx, token)
        .await?
        .ok_or_else(|| AppError::not_found("unknown member token"))
}

pub async fn get_preferences(ctx: &AppContext, token: &str) -> Result<PreferencesView, AppError> {
    let mut tx = ctx.pool.begin().await?;
    let user = find_member(&mut tx, token).await?;
    let interests = repository::get_interests(&mut tx, user.user_id).await?;
    tx.commit().await?;

    Ok(PreferencesView::new(&user, interests))
}

pub async fn update_preferences(
    ctx: &AppContext,
    token: &str,
    patch: PreferencesPatch,
    now: DateTime<Utc>,
) -> Result<PreferencesView, AppError> {
    let interests = patch.interests().map_err(invalid)?;
    let name = patch
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let mut tx = ctx.pool.begin().await?;
    let user = find_member(&mut tx, token).await?;
    let prefs = patch.apply(&user.preferences).map_err(invalid)?;

    repository::update_preferences(&mut tx, user.user_id, name, &prefs, now.timestamp_millis())
        .await?;
    if let Some(topics) = &interests {
        repository::replace_interests(&mut tx, user.user_id, topics).await?;
    }

    let updated = repository::find_by_id(&mut tx, user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("unknown member token"))?;
    let interests = repository::get_interests(&mut tx, user.user_id).await?;
    tx.commit().await?;

    Ok(PreferencesView::new(&updated, interests))
}

pub async fn dashboard(
    ctx: &AppContext,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Dashboard, AppError> {
    let mut tx = ctx.pool.begin().await?;
    let user = find_member(&mut tx, token).await?;
    let interests = repository::get_interests(&mut tx, user.user_id).await?;
    let stats = email_log::get_digest_stats(&mut tx, user.user_id).await?;
    let recent = email_log::get_recent_logs(&mut tx, user.user_id, RECENT_LOG_LIMIT).await?;
    tx.commit().await?;

    let next = if user.is_eligible() {
        next_delivery(&user.preferences, now)
    } else {
        None
    };

    Ok(Dashboard {
        verified: user.verified,
        subscribed: user.subscribed,
        preferences: PreferencesView::new(&user, interests),
        sent: stats.sent,
        failed: stats.failed,
        last_sent_at: stats.last_sent_at.and_then(millis_to_datetime),
        next_delivery: next,
        recent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::curation::tests::FakeNews;
    use crate::database::test_pool;
    use crate::email::client::EmailError;
    use crate::email::model::LogStatus;
    use crate::email::tests::FakeMailer;
    use crate::subscribers::model::{Frequency, Topic};
    use chrono::TimeZone;
    use std::sync::Arc;

    async fn context(mailer: FakeMailer) -> (AppContext, Arc<FakeMailer>) {
        let mailer = Arc::new(mailer);
        let ctx = AppContext::new(
            test_pool().await,
            test_config(),
            Arc::new(FakeNews::new(vec![])),
            mailer.clone(),
        )
        .unwrap();
        (ctx, mailer)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 20, 12, 0, 0).unwrap()
    }

    fn request(email: &str, interests: &[&str]) -> SubscribeRequest {
        SubscribeRequest {
            email: email.to_string(),
            name: None,
            interests: interests.iter().map(|i| i.to_string()).collect(),
            frequency: None,
            send_time: None,
            timezone: None,
            weekly_day: None,
            monthly_day: None,
        }
    }

    fn verification_token(mailer: &FakeMailer, index: usize) -> String {
        let text = &mailer.sent()[index].text;
        let start = text.find("token=").unwrap() + "token=".len();
        text[start..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect()
    }

    async fn user(ctx: &AppContext, email: &str) -> User {
        let mut tx = ctx.pool.begin().await.unwrap();
        let user = repository::find_by_email(&mut tx, email).await.unwrap().unwrap();
        tx.commit().await.unwrap();
        user
    }

    #[tokio::test]
    async fn subscribing_again_before_verifying_rotates_the_token() {
        let (ctx, mailer) = context(FakeMailer::default()).await;

        subscribe(&ctx, request("ada@example.com", &["llms"]), now()).await.unwrap();
        let first = verification_token(&mailer, 0);

        let mut again = request("ADA@example.com", &["policy", "research"]);
        again.frequency = Some("monthly".to_string());
        let outcome = subscribe(&ctx, again, now()).await.unwrap();
        assert!(outcome.verification_required);
        let second = verification_token(&mailer, 1);
        assert_ne!(first, second);

        assert!(matches!(
            verify(&ctx, &first, now()).await,
            Err(AppError::NotFound(_))
        ));
        let verified = verify(&ctx, &second, now()).await.unwrap();
        assert!(verified.verified);
        assert_eq!(verified.preferences.frequency, Frequency::Monthly);

        // Tokens are single use.
        assert!(verify(&ctx, &second, now()).await.is_err());

        let prefs = get_preferences(&ctx, &verified.manage_token).await.unwrap();
        assert_eq!(prefs.interests, vec![Topic::Policy, Topic::Research]);
    }

    #[tokio::test]
    async fn verified_subscribers_cannot_subscribe_twice_until_they_leave() {
        let (ctx, mailer) = context(FakeMailer::default()).await;

        subscribe(&ctx, request("ada@example.com", &["llms"]), now()).await.unwrap();
        let token = verification_token(&mailer, 0);
        let ada = verify(&ctx, &token, now()).await.unwrap();

        let err = subscribe(&ctx, request("ada@example.com", &["llms"]), now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        unsubscribe(&ctx, &ada.manage_token, now()).await.unwrap();
        assert!(!user(&ctx, "ada@example.com").await.subscribed);

        let outcome = subscribe(&ctx, request("ada@example.com", &["tools"]), now())
            .await
            .unwrap();
        assert!(!outcome.verification_required);
        assert_eq!(mailer.sent().len(), 1);

        let back = user(&ctx, "ada@example.com").await;
        assert!(back.subscribed && back.verified);
        assert_eq!(back.manage_token, ada.manage_token);
    }

    #[tokio::test]
    async fn failed_verification_email_is_logged_not_fatal() {
        let (ctx, _) = context(FakeMailer::always_failing(EmailError::Rejected {
            status: 422,
            message: "bad address".to_string(),
        }))
        .await;

        let outcome = subscribe(&ctx, request("ada@example.com", &["llms"]), now())
            .await
            .unwrap();
        assert!(outcome.verification_required);
        assert!(!outcome.verification_sent);

        let mut tx = ctx.pool.begin().await.unwrap();
        let date = now().date_naive();
        let log = email_log::find_log(&mut tx, outcome.user_id, LogKind::Verification, date)
            .await
            .unwrap()
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(log.status, LogStatus::Failed);
        assert!(log.error.unwrap().contains("bad address"));
    }

    #[tokio::test]
    async fn updating_preferences_keeps_unspecified_fields() {
        let (ctx, _) = context(FakeMailer::default()).await;
        subscribe(&ctx, request("ada@example.com", &["llms", "tools"]), now()).await.unwrap();
        let ada = user(&ctx, "ada@example.com").await;

        let patch = PreferencesPatch {
            name: Some("  Ada  ".to_string()),
            timezone: Some("America/New_York".to_string()),
            ..Default::default()
        };
        let view = update_preferences(&ctx, &ada.manage_token, patch, now()).await.unwrap();
        assert_eq!(view.name.as_deref(), Some("Ada"));
        assert_eq!(view.timezone, "America/New_York");
        assert_eq!(view.interests, vec![Topic::Llms, Topic::Tools]);

        let empty = PreferencesPatch {
            interests: Some(vec![]),
            ..Default::default()
        };
        assert!(matches!(
            update_preferences(&ctx, &ada.manage_token, empty, now()).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            update_preferences(&ctx, "nobody", PreferencesPatch::default(), now()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn dashboard_reports_stats_and_next_delivery() {
        let (ctx, mailer) = context(FakeMailer::default()).await;
        subscribe(&ctx, request("ada@example.com", &["llms"]), now()).await.unwrap();
        let ada = user(&ctx, "ada@example.com").await;

        let pending = dashboard(&ctx, &ada.manage_token, now()).await.unwrap();
        assert!(!pending.verified);
        assert!(pending.next_delivery.is_none());
        assert_eq!(pending.recent.len(), 1);
        assert_eq!(pending.recent[0].kind, LogKind::Verification);

        verify(&ctx, &verification_token(&mailer, 0), now()).await.unwrap();
        let board = dashboard(&ctx, &ada.manage_token, now()).await.unwrap();
        assert_eq!((board.sent, board.failed), (0, 0));
        assert!(board.last_sent_at.is_none());
        // Daily at 09:00 UTC; noon has passed, so tomorrow morning.
        assert_eq!(
            board.next_delivery,
            Some(Utc.with_ymd_and_hms(2024, 11, 21, 9, 0, 0).unwrap())
        );

        let sent_at = now() + chrono::Duration::minutes(5);
        let mut tx = ctx.pool.begin().await.unwrap();
        let millis = sent_at.timestamp_millis();
        let log_id = email_log::claim_digest(
            &mut tx,
            ada.user_id,
            &ada.email,
            now().date_naive(),
            false,
            0,
            millis,
        )
        .await
        .unwrap()
        .unwrap();
        let outcome = SendOutcome::Sent {
            message_id: None,
            attempts: 1,
            article_count: 4,
        };
        email_log::record_outcome(&mut tx, log_id, &outcome, millis)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let board = dashboard(&ctx, &ada.manage_token, sent_at).await.unwrap();
        assert_eq!((board.sent, board.failed), (1, 0));
        assert_eq!(board.last_sent_at, Some(sent_at));
        assert_eq!(board.recent[0].kind, LogKind::Digest);
    }
}
