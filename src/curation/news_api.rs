use crate::config::NewsApiConfig;
use crate::curation::model::RawArticle;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum NewsError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("news api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("news api rate limit exceeded")]
    RateLimited,
}

#[derive(Debug, Clone)]
pub struct NewsQuery {
    pub query: String,
    pub from: DateTime<Utc>,
    pub page_size: u32,
}

#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn fetch(&self, query: &NewsQuery) -> Result<Vec<RawArticle>, NewsError>;
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EverythingResponse {
    status: String,
    #[serde(default)]
    total_results: u64,
    #[serde(default)]
    articles: Vec<RawArticle>,
    code: Option<String>,
    message: Option<String>,
}

/// Client for the NewsAPI `everything` endpoint.
pub struct NewsApiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl NewsApiClient {
    pub fn new(config: &NewsApiConfig) -> Result<Self, NewsError> {
        let client = Client::builder()
            .user_agent(concat!("ai-digest/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| NewsError::RequestFailed(e.to_string()))?;

        Ok(NewsApiClient {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl NewsSource for NewsApiClient {
    #[instrument(skip(self), fields(from = %query.from))]
    async fn fetch(&self, query: &NewsQuery) -> Result<Vec<RawArticle>, NewsError> {
        let from = query.from.to_rfc3339_opts(SecondsFormat::Secs, true);
        let page_size = query.page_size.to_string();

        let response = self
            .client
            .get(format!("{}/everything", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .query(&[
                ("q", query.query.as_str()),
                ("language", "en"),
                ("sortBy", "publishedAt"),
                ("from", from.as_str()),
                ("pageSize", page_size.as_str()),
            ])
            .send()
            .await
            .map_err(|e| NewsError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(NewsError::RateLimited);
        }

        let body = response
            .text()
            .await
            .map_err(|e| NewsError::RequestFailed(e.to_string()))?;

        let parsed: EverythingResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(NewsError::Api {
                    status: status.as_u16(),
                    message: body,
                })
            }
            Err(e) => return Err(NewsError::Parse(e.to_string())),
        };

        if !status.is_success() || parsed.status != "ok" {
            if parsed.code.as_deref() == Some("rateLimited") {
                return Err(NewsError::RateLimited);
            }
            return Err(NewsError::Api {
                status: status.as_u16(),
                message: parsed
                    .message
                    .or(parsed.code)
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        info!(
            "news api returned {} of {} articles",
            parsed.articles.len(),
            parsed.total_results
        );

        Ok(parsed.articles)
    }
}
