use crate::subscribers::model::Topic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug, Clone, Default)]
pub struct RawSource {
    pub id: Option<String>,
    pub name: Option<String>,
}

/// Article as the news API returns it. Everything is optional because the API is not strict.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawArticle {
    #[serde(default)]
    pub source: RawSource,
    pub author: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub url_to_image: Option<String>,
    pub published_at: Option<String>,
    pub content: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Article {
    pub source: String,
    pub domain: String,
    pub title: String,
    pub summary: Option<String>,
    pub url: String,
    pub image_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub topic: Topic,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Section {
    pub topic: Topic,
    pub title: String,
    pub articles: Vec<Article>,
}

impl Section {
    pub fn new(topic: Topic, articles: Vec<Article>) -> Self {
        Section {
            topic,
            title: topic.title().to_string(),
            articles,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct CuratedContent {
    pub fetched_at: DateTime<Utc>,
    pub candidates: usize,
    /// Every article that survived filtering and dedupe, newest first.
    pub articles: Vec<Article>,
    pub sections: Vec<Section>,
}

impl CuratedContent {
    pub fn section(&self, topic: Topic) -> Option<&Section> {
        self.sections.iter().find(|s| s.topic == topic)
    }
}
