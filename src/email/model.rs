use serde::Serialize;
use sqlx::FromRow;

#[derive(sqlx::Type, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(sqlx::Type, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Digest,
    Test,
    Verification,
}

#[derive(FromRow, Serialize, Debug, Clone)]
pub struct EmailLog {
    pub log_id: i64,
    pub user_id: Option<i64>,
    pub recipient: String,
    pub kind: LogKind,
    pub delivery_date: String,
    pub status: LogStatus,
    pub attempts: i64,
    pub runs: i64,
    pub retryable: bool,
    pub article_count: i64,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Outcome of one delivery run for one log row.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Sent {
        message_id: Option<String>,
        attempts: u32,
        article_count: usize,
    },
    Failed {
        error: String,
        attempts: u32,
        retryable: bool,
    },
}

#[derive(FromRow, Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub sent: i64,
    pub failed: i64,
    pub last_sent_at: Option<i64>,
}
