use crate::common::error::AppError;
use crate::subscribers::model::{DeliveryPreferences, Topic, User};
use sqlx::{query, query_as, query_scalar, Sqlite, Transaction};

const USER_COLUMNS: &str = "
      user_id
    , email
    , name
    , verified
    , subscribed
    , manage_token
    , frequency
    , send_time
    , timezone
    , weekly_day
    , monthly_day
    , created_at
";

async fn find_user_by(
    tx: &mut Transaction<'_, Sqlite>,
    column: &str,
    value: &str,
) -> Result<Option<User>, AppError> {
    let user = query_as::<_, User>(&format!(
        "select {USER_COLUMNS} from users where {column} = ?"
    ))
    .bind(value)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(user)
}

pub async fn find_by_email(
    tx: &mut Transaction<'_, Sqlite>,
    email: &str,
) -> Result<Option<User>, AppError> {
    find_user_by(tx, "email", email).await
}

pub async fn find_by_manage_token(
    tx: &mut Transaction<'_, Sqlite>,
    token: &str,
) -> Result<Option<User>, AppError> {
    find_user_by(tx, "manage_token", token).await
}

pub async fn find_by_verification_token(
    tx: &mut Transaction<'_, Sqlite>,
    token: &str,
) -> Result<Option<User>, AppError> {
    find_user_by(tx, "verification_token", token).await
}

pub async fn find_by_id(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
) -> Result<Option<User>, AppError> {
    let user = query_as::<_, User>(&format!(
        "select {USER_COLUMNS} from users where user_id = ?"
    ))
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(user)
}

pub async fn get_eligible_users(tx: &mut Transaction<'_, Sqlite>) -> Result<Vec<User>, AppError> {
    let users = query_as::<_, User>(&format!(
        "
        select {USER_COLUMNS}
        from users
        where verified = 1
        and subscribed = 1
        order by user_id
        "
    ))
    .fetch_all(&mut **tx)
    .await?;

    Ok(users)
}

pub async fn insert_user(
    tx: &mut Transaction<'_, Sqlite>,
    email: &str,
    name: Option<&str>,
    prefs: &DeliveryPreferences,
    verification_token: &str,
    manage_token: &str,
    now: i64,
) -> Result<i64, AppError> {
    let user_id: i64 = query_scalar(
        "
        insert into users (
              email
            , name
            , verified
            , subscribed
            , verification_token
            , manage_token
            , frequency
            , send_time
            , timezone
            , weekly_day
            , monthly_day
            , created_at
            , updated_at
        ) values (?, ?, 0, 1, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        returning user_id
        ",
    )
    .bind(email)
    .bind(name)
    .bind(verification_token)
    .bind(manage_token)
    .bind(prefs.frequency.as_str())
    .bind(prefs.send_time.to_string())
    .bind(prefs.timezone.name())
    .bind(prefs.weekly_day.num_days_from_monday() as i64)
    .bind(prefs.monthly_day as i64)
    .bind(now)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;

    Ok(user_id)
}

pub async fn update_preferences(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    name: Option<&str>,
    prefs: &DeliveryPreferences,
    now: i64,
) -> Result<(), AppError> {
    query(
        "
        update users
        set name = coalesce(?, name)
          , frequency = ?
          , send_time = ?
          , timezone = ?
          , weekly_day = ?
          , monthly_day = ?
          , updated_at = ?
        where user_id = ?
        ",
    )
    .bind(name)
    .bind(prefs.frequency.as_str())
    .bind(prefs.send_time.to_string())
    .bind(prefs.timezone.name())
    .bind(prefs.weekly_day.num_days_from_monday() as i64)
    .bind(prefs.monthly_day as i64)
    .bind(now)
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn set_verification_token(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    token: &str,
    now: i64,
) -> Result<(), AppError> {
    query("update users set verification_token = ?, updated_at = ? where user_id = ?")
        .bind(token)
        .bind(now)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

pub async fn mark_verified(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    now: i64,
) -> Result<(), AppError> {
    query(
        "
        update users
        set verified = 1
          , verification_token = null
          , updated_at = ?
        where user_id = ?
        ",
    )
    .bind(now)
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn set_subscribed(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    subscribed: bool,
    now: i64,
) -> Result<(), AppError> {
    query("update users set subscribed = ?, updated_at = ? where user_id = ?")
        .bind(subscribed)
        .bind(now)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

pub async fn replace_interests(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    topics: &[Topic],
) -> Result<(), AppError> {
    query("delete from interests where user_id = ?")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    for (position, topic) in topics.iter().enumerate() {
        query(
            "
            insert into interests (
                  user_id
                , topic
                , position
            ) values (?, ?, ?)
            ",
        )
        .bind(user_id)
        .bind(topic.as_str())
        .bind(position as i64)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

pub async fn get_interests(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
) -> Result<Vec<Topic>, AppError> {
    let slugs: Vec<String> =
        query_scalar("select topic from interests where user_id = ? order by position")
            .bind(user_id)
            .fetch_all(&mut **tx)
            .await?;

    // Slugs that are no longer known topics are skipped rather than failing the read.
    Ok(slugs.iter().filter_map(|slug| slug.parse().ok()).collect())
}
