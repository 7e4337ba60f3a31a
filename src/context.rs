use crate::config::Config;
use crate::curation::filter::CurationRules;
use crate::curation::news_api::NewsSource;
use crate::email::client::EmailSender;
use crate::email::RetryPolicy;
use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Everything a handler, a cron job or a delivery run needs.
#[derive(Clone)]
pub struct AppContext {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub rules: Arc<CurationRules>,
    pub news: Arc<dyn NewsSource>,
    pub mailer: Arc<dyn EmailSender>,
    /// Serializes delivery runs inside this process.
    pub delivery_lock: Arc<Mutex<()>>,
}

impl AppContext {
    pub fn new(
        pool: SqlitePool,
        config: Config,
        news: Arc<dyn NewsSource>,
        mailer: Arc<dyn EmailSender>,
    ) -> Result<Self> {
        let rules = CurationRules::from_config(&config.curation)?;

        Ok(AppContext {
            pool,
            config: Arc::new(config),
            rules: Arc::new(rules),
            news,
            mailer,
            delivery_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.email.max_attempts,
            backoff: self.config.email.retry_backoff,
        }
    }
}
