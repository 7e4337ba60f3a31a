use anyhow::{anyhow, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_NEWS_QUERY: &str = concat!(
    "(\"artificial intelligence\" OR \"machine learning\" OR LLM OR OpenAI OR Anthropic",
    " OR \"generative AI\" OR \"neural network\")"
);

const MAX_ARTICLE_AGE_LIMIT_HOURS: i64 = 30 * 24;

const DEFAULT_SOURCE_BLOCKLIST: &[&str] = &[
    "biztoc.com",
    "pypi.org",
    "globenewswire.com",
    "prnewswire.com",
    "slickdeals.net",
    "yahoo entertainment",
];

const DEFAULT_KEYWORD_BLOCKLIST: &[&str] = &[
    "crypto",
    "bitcoin",
    "nft",
    "casino",
    "horoscope",
    "deal alert",
    "coupon",
    "sponsored",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub app_url: String,
    pub cron_secret: String,
    pub news: NewsApiConfig,
    pub email: EmailApiConfig,
    pub scheduler: SchedulerConfig,
    pub curation: CurationConfig,
}

#[derive(Debug, Clone)]
pub struct NewsApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub query: String,
}

#[derive(Debug, Clone)]
pub struct EmailApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub from: String,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub delivery_cron: String,
    pub retry_cron: String,
    pub delivery_window: chrono::Duration,
    pub max_retry_runs: i64,
}

#[derive(Debug, Clone)]
pub struct CurationConfig {
    pub source_whitelist: Vec<String>,
    pub source_blocklist: Vec<String>,
    pub keyword_blocklist: Vec<String>,
    pub max_articles_per_section: usize,
    pub max_article_age: chrono::Duration,
}

impl Config {
    /// Loads `.env` (if present) and reads the configuration from the process environment.
    pub fn from_env() -> Result<Config> {
        dotenv::dotenv().ok();
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let window_minutes: i64 = vars.parsed_or("DELIVERY_WINDOW_MINUTES", 60)?;
        if window_minutes <= 0 || window_minutes > 24 * 60 {
            return Err(anyhow!(
                "DELIVERY_WINDOW_MINUTES must be between 1 and 1440, got {window_minutes}"
            ));
        }

        let max_age_hours: i64 = vars.parsed_or("MAX_ARTICLE_AGE_HOURS", 48)?;
        if !(1..=MAX_ARTICLE_AGE_LIMIT_HOURS).contains(&max_age_hours) {
            return Err(anyhow!(
                "MAX_ARTICLE_AGE_HOURS must be between 1 and {}, got {}",
                MAX_ARTICLE_AGE_LIMIT_HOURS,
                max_age_hours
            ));
        }

        let max_attempts: u32 = vars.parsed_or("MAX_SEND_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(anyhow!("MAX_SEND_ATTEMPTS must be at least 1"));
        }

        Ok(Config {
            database_url: vars.required("DATABASE_URL")?,
            bind_addr: vars.or("BIND_ADDR", "0.0.0.0:3000"),
            app_url: vars
                .or("APP_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            cron_secret: vars.required("CRON_SECRET")?,
            news: NewsApiConfig {
                base_url: vars.or("NEWS_API_URL", "https://newsapi.org/v2"),
                api_key: vars.required("NEWS_API_KEY")?,
                query: vars.or("NEWS_QUERY", DEFAULT_NEWS_QUERY),
            },
            email: EmailApiConfig {
                base_url: vars.or("EMAIL_API_URL", "https://api.resend.com"),
                api_key: vars.required("EMAIL_API_KEY")?,
                from: vars.required("EMAIL_FROM")?,
                max_attempts,
                retry_backoff: Duration::from_secs(vars.parsed_or("RETRY_BACKOFF_SECS", 2)?),
            },
            scheduler: SchedulerConfig {
                enabled: vars.parsed_or("SCHEDULER_ENABLED", true)?,
                delivery_cron: vars.or("DELIVERY_CRON", "0 0 * * * *"),
                retry_cron: vars.or("RETRY_CRON", "0 30 * * * *"),
                delivery_window: chrono::Duration::minutes(window_minutes),
                max_retry_runs: vars.parsed_or("MAX_RETRY_RUNS", 2)?,
            },
            curation: CurationConfig {
                source_whitelist: vars.list_or("SOURCE_WHITELIST", &[]),
                source_blocklist: vars.list_or("SOURCE_BLOCKLIST", DEFAULT_SOURCE_BLOCKLIST),
                keyword_blocklist: vars.list_or("KEYWORD_BLOCKLIST", DEFAULT_KEYWORD_BLOCKLIST),
                max_articles_per_section: vars.parsed_or("MAX_ARTICLES_PER_SECTION", 5)?,
                max_article_age: chrono::Duration::hours(max_age_hours),
            },
        })
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key).ok_or_else(|| anyhow!("{key} must be set"))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse::<T>()
                .with_context(|| format!("{key} has an invalid value: {raw:?}")),
            None => Ok(default),
        }
    }

    fn list_or(&self, key: &str, default: &[&str]) -> Vec<String> {
        match self.get(key) {
            Some(raw) => raw
                .split(',')
                .map(|item| item.trim().to_lowercase())
                .filter(|item| !item.is_empty())
                .collect(),
            None => default.iter().map(|item| item.to_string()).collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "sqlite::memory:"),
            ("CRON_SECRET", "cron-secret"),
            ("NEWS_API_KEY", "news-key"),
            ("EMAIL_API_KEY", "email-key"),
            ("EMAIL_FROM", "digest@example.com"),
            ("RETRY_BACKOFF_SECS", "0"),
        ])
    }

    pub(crate) fn test_config() -> Config {
        let vars = base_vars();
        Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
            .expect("test config is valid")
    }

    #[test]
    fn defaults_are_applied() {
        let config = test_config();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.scheduler.delivery_cron, "0 0 * * * *");
        assert_eq!(config.scheduler.delivery_window, chrono::Duration::minutes(60));
        assert!(config.scheduler.enabled);
        assert_eq!(config.email.max_attempts, 3);
        assert!(config.curation.source_whitelist.is_empty());
        assert!(config
            .curation
            .keyword_blocklist
            .contains(&"crypto".to_string()));
    }

    #[test]
    fn missing_required_variable_is_named() {
        let mut vars = base_vars();
        vars.remove("CRON_SECRET");
        let err = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap_err();
        assert!(err.to_string().contains("CRON_SECRET"));
    }

    #[test]
    fn lists_are_split_and_lowercased() {
        let mut vars = base_vars();
        vars.insert("SOURCE_WHITELIST", " TheVerge.com, wired.com ,,");
        vars.insert("APP_URL", "https://digest.example.com/");
        let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(
            config.curation.source_whitelist,
            vec!["theverge.com".to_string(), "wired.com".to_string()]
        );
        assert_eq!(config.app_url, "https://digest.example.com");
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let mut vars = base_vars();
        vars.insert("DELIVERY_WINDOW_MINUTES", "soon");
        let err = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap_err();
        assert!(err.to_string().contains("DELIVERY_WINDOW_MINUTES"));

        vars.insert("DELIVERY_WINDOW_MINUTES", "0");
        assert!(Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).is_err());
    }

    #[test]
    fn article_age_must_stay_within_a_month() {
        let mut vars = base_vars();
        for hours in ["0", "-5", "721", "9223372036854775807"] {
            vars.insert("MAX_ARTICLE_AGE_HOURS", hours);
            let err = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap_err();
            assert!(err.to_string().contains("MAX_ARTICLE_AGE_HOURS"), "{hours}");
        }

        vars.insert("MAX_ARTICLE_AGE_HOURS", "720");
        let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.curation.max_article_age, chrono::Duration::hours(720));
    }
}
