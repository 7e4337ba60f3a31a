use crate::common::error::AppError;
use crate::email::model::{DeliveryStats, EmailLog, LogKind, LogStatus, SendOutcome};
use chrono::NaiveDate;
use sqlx::{query, query_as, query_scalar, Sqlite, Transaction};

const LOG_COLUMNS: &str = "
      log_id
    , user_id
    , recipient
    , kind
    , delivery_date
    , status
    , attempts
    , runs
    , retryable
    , article_count
    , provider_message_id
    , error
    , created_at
    , updated_at
";

/// Claims the digest for `(user, date)`. Returns the log id when this run owns the send.
///
/// A fresh row is inserted as `pending`. An existing row is taken over only if it is `failed`
/// and `reclaim_failed` is set, or if it is a `pending` claim last touched before
/// `stale_before` (a run that died mid-send).
pub async fn claim_digest(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    recipient: &str,
    delivery_date: NaiveDate,
    reclaim_failed: bool,
    stale_before: i64,
    now: i64,
) -> Result<Option<i64>, AppError> {
    let date = delivery_date.to_string();

    let inserted: Option<i64> = query_scalar(
        "
        insert into email_log (
              user_id
            , recipient
            , kind
            , delivery_date
            , status
            , runs
            , created_at
            , updated_at
        ) values (?, ?, ?, ?, ?, 1, ?, ?)
        on conflict do nothing
        returning log_id
        ",
    )
    .bind(user_id)
    .bind(recipient)
    .bind(LogKind::Digest)
    .bind(&date)
    .bind(LogStatus::Pending)
    .bind(now)
    .bind(now)
    .fetch_optional(&mut **tx)
    .await?;

    if inserted.is_some() {
        return Ok(inserted);
    }

    let reclaimed: Option<i64> = query_scalar(
        "
        update email_log
        set status = ?
          , recipient = ?
          , runs = runs + 1
          , updated_at = ?
        where user_id = ?
        and kind = ?
        and delivery_date = ?
        and (
            (status = ? and ?)
            or (status = ? and updated_at < ?)
        )
        returning log_id
        ",
    )
    .bind(LogStatus::Pending)
    .bind(recipient)
    .bind(now)
    .bind(user_id)
    .bind(LogKind::Digest)
    .bind(&date)
    .bind(LogStatus::Failed)
    .bind(reclaim_failed)
    .bind(LogStatus::Pending)
    .bind(stale_before)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(reclaimed)
}

pub async fn record_outcome(
    tx: &mut Transaction<'_, Sqlite>,
    log_id: i64,
    outcome: &SendOutcome,
    now: i64,
) -> Result<(), AppError> {
    match outcome {
        SendOutcome::Sent {
            message_id,
            attempts,
            article_count,
        } => {
            query(
                "
                update email_log
                set status = ?
                  , attempts = attempts + ?
                  , article_count = ?
                  , provider_message_id = ?
                  , error = null
                  , retryable = 0
                  , updated_at = ?
                where log_id = ?
                ",
            )
            .bind(LogStatus::Sent)
            .bind(*attempts as i64)
            .bind(*article_count as i64)
            .bind(message_id)
            .bind(now)
            .bind(log_id)
            .execute(&mut **tx)
            .await?;
        }
        SendOutcome::Failed {
            error,
            attempts,
            retryable,
        } => {
            query(
                "
                update email_log
                set status = ?
                  , attempts = attempts + ?
                  , error = ?
                  , retryable = ?
                  , updated_at = ?
                where log_id = ?
                ",
            )
            .bind(LogStatus::Failed)
            .bind(*attempts as i64)
            .bind(error)
            .bind(*retryable)
            .bind(now)
            .bind(log_id)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}

/// Gives a claim back when there was nothing to send. A first claim disappears; a taken-over
/// failure goes back to `failed` so its history survives.
pub async fn release_claim(tx: &mut Transaction<'_, Sqlite>, log_id: i64) -> Result<(), AppError> {
    query("delete from email_log where log_id = ? and status = ? and runs = 1")
        .bind(log_id)
        .bind(LogStatus::Pending)
        .execute(&mut **tx)
        .await?;

    query(
        "
        update email_log
        set status = ?
          , runs = runs - 1
        where log_id = ?
        and status = ?
        ",
    )
    .bind(LogStatus::Failed)
    .bind(log_id)
    .bind(LogStatus::Pending)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Failed digests worth another run: transient failures, recent, within the run budget.
pub async fn get_retryable_failures(
    tx: &mut Transaction<'_, Sqlite>,
    since: NaiveDate,
    max_runs: i64,
) -> Result<Vec<EmailLog>, AppError> {
    let logs = query_as::<_, EmailLog>(&format!(
        "
        select {LOG_COLUMNS}
        from email_log
        where kind = ?
        and status = ?
        and retryable = 1
        and delivery_date >= ?
        and runs < ?
        and user_id is not null
        order by delivery_date, log_id
        "
    ))
    .bind(LogKind::Digest)
    .bind(LogStatus::Failed)
    .bind(since.to_string())
    .bind(max_runs)
    .fetch_all(&mut **tx)
    .await?;

    Ok(logs)
}

/// Logs a one-off email (test digest or verification) that has no idempotence guarantee.
pub async fn insert_one_off(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: Option<i64>,
    recipient: &str,
    kind: LogKind,
    delivery_date: NaiveDate,
    outcome: &SendOutcome,
    now: i64,
) -> Result<i64, AppError> {
    let log_id: i64 = query_scalar(
        "
        insert into email_log (
              user_id
            , recipient
            , kind
            , delivery_date
            , status
            , runs
            , created_at
            , updated_at
        ) values (?, ?, ?, ?, ?, 1, ?, ?)
        returning log_id
        ",
    )
    .bind(user_id)
    .bind(recipient)
    .bind(kind)
    .bind(delivery_date.to_string())
    .bind(LogStatus::Pending)
    .bind(now)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;

    record_outcome(tx, log_id, outcome, now).await?;

    Ok(log_id)
}

pub async fn get_digest_stats(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
) -> Result<DeliveryStats, AppError> {
    let stats = query_as::<_, DeliveryStats>(
        "
        select
              coalesce(sum(case when status = 'sent' then 1 else 0 end), 0) as sent
            , coalesce(sum(case when status = 'failed' then 1 else 0 end), 0) as failed
            , max(case when status = 'sent' then updated_at end) as last_sent_at
        from email_log
        where user_id = ?
        and kind = 'digest'
        ",
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(stats)
}

pub async fn get_recent_logs(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    limit: i64,
) -> Result<Vec<EmailLog>, AppError> {
    let logs = query_as::<_, EmailLog>(&format!(
        "
        select {LOG_COLUMNS}
        from email_log
        where user_id = ?
        order by created_at desc, log_id desc
        limit ?
        "
    ))
    .bind(user_id)
    .bind(limit)
    .fetch_all(&mut **tx)
    .await?;

    Ok(logs)
}

#[cfg(test)]
pub async fn find_log(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    kind: LogKind,
    delivery_date: NaiveDate,
) -> Result<Option<EmailLog>, AppError> {
    let log = query_as::<_, EmailLog>(&format!(
        "
        select {LOG_COLUMNS}
        from email_log
        where user_id = ?
        and kind = ?
        and delivery_date = ?
        order by log_id desc
        limit 1
        "
    ))
    .bind(user_id)
    .bind(kind)
    .bind(delivery_date.to_string())
    .fetch_optional(&mut **tx)
    .await?;

    Ok(log)
}
