use crate::curation::filter::{dedupe, filter_articles, CurationRules};
use crate::curation::model::{Article, CuratedContent, RawArticle, Section};
use crate::curation::news_api::{NewsError, NewsQuery, NewsSource};
use crate::subscribers::model::Topic;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use tracing::info;

pub mod categorize;
pub mod filter;
pub mod model;
pub mod news_api;

const PAGE_SIZE: u32 = 100;

/// Turns raw news API results into deduplicated, categorized sections.
pub fn curate(raw: Vec<RawArticle>, rules: &CurationRules, now: DateTime<Utc>) -> CuratedContent {
    let candidates = raw.len();

    let filtered = filter_articles(raw, rules, now);
    let sorted: Vec<Article> = filtered
        .into_iter()
        .sorted_by(|a, b| b.published_at.cmp(&a.published_at))
        .collect();
    let articles = dedupe(sorted);

    let sections: Vec<Section> = Topic::SELECTABLE
        .iter()
        .chain(std::iter::once(&Topic::General))
        .filter_map(|topic| {
            let picked: Vec<Article> = articles
                .iter()
                .filter(|a| a.topic == *topic)
                .take(rules.max_articles_per_section)
                .cloned()
                .collect();
            (!picked.is_empty()).then(|| Section::new(*topic, picked))
        })
        .collect();

    info!(
        "curated {} articles into {} sections from {} candidates",
        articles.len(),
        sections.len(),
        candidates
    );

    CuratedContent {
        fetched_at: now,
        candidates,
        articles,
        sections,
    }
}

/// Sections for a subscriber, in the order of their interests. Falls back to the newest
/// stories overall when none of their topics has anything; empty means nothing to send.
pub fn personalize(content: &CuratedContent, interests: &[Topic], cap: usize) -> Vec<Section> {
    let sections: Vec<Section> = interests
        .iter()
        .filter_map(|topic| content.section(*topic).cloned())
        .collect();

    if !sections.is_empty() {
        return sections;
    }

    let top: Vec<Article> = content.articles.iter().take(cap).cloned().collect();
    if top.is_empty() {
        return vec![];
    }
    vec![Section::new(Topic::General, top)]
}

pub async fn fetch_and_curate(
    news: &dyn NewsSource,
    query: &str,
    rules: &CurationRules,
    now: DateTime<Utc>,
) -> Result<CuratedContent, NewsError> {
    let query = NewsQuery {
        query: query.to_string(),
        from: now - rules.max_article_age,
        page_size: PAGE_SIZE,
    };
    let raw = news.fetch(&query).await?;

    Ok(curate(raw, rules, now))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::curation::filter::tests::{now, raw, rules};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory news source returning a fixed batch and remembering the queries it saw.
    pub(crate) struct FakeNews {
        pub articles: Vec<RawArticle>,
        pub fail: bool,
        pub queries: Mutex<Vec<NewsQuery>>,
    }

    impl FakeNews {
        pub(crate) fn new(articles: Vec<RawArticle>) -> Self {
            FakeNews {
                articles,
                fail: false,
                queries: Mutex::new(vec![]),
            }
        }

        pub(crate) fn failing() -> Self {
            FakeNews {
                fail: true,
                ..FakeNews::new(vec![])
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NewsSource for FakeNews {
        async fn fetch(&self, query: &NewsQuery) -> Result<Vec<RawArticle>, NewsError> {
            self.queries.lock().unwrap().push(query.clone());
            if self.fail {
                return Err(NewsError::RateLimited);
            }
            Ok(self.articles.clone())
        }
    }

    pub(crate) fn sample_articles() -> Vec<RawArticle> {
        vec![
            raw("Wired", "Senators propose AI safety law", "https://wired.com/policy-1", 1),
            raw(
                "The Verge",
                "OpenAI launches a new coding tool",
                "https://theverge.com/tools-1",
                2,
            ),
            raw("TechCrunch", "AI startup raises $50M", "https://techcrunch.com/biz-1", 3),
            raw(
                "TechCrunch",
                "AI startup raises $50M - TechCrunch",
                "https://techcrunch.com/biz-dup",
                4,
            ),
            raw("Reuters", "Robot makers bet on AI", "https://reuters.com/robots-1", 5),
            raw(
                "Ars Technica",
                "Anthropic releases a Claude update",
                "https://arstechnica.com/tools-2",
                6,
            ),
            raw("Wired", "The week in AI", "https://wired.com/general-1", 7),
        ]
    }

    #[test]
    fn curate_groups_sorts_and_caps() {
        let mut batch = sample_articles();
        batch.push(raw("Blog", "OpenAI releases an app", "https://blog.example/tools-3", 8));
        batch.push(raw("Blog", "Google launches AI tools", "https://blog.example/tools-4", 9));

        let content = curate(batch, &rules(), now());
        assert_eq!(content.candidates, 9);
        assert_eq!(content.articles.len(), 8);

        let topics: Vec<Topic> = content.sections.iter().map(|s| s.topic).collect();
        assert_eq!(
            topics,
            vec![Topic::Business, Topic::Policy, Topic::Robotics, Topic::Tools, Topic::General]
        );

        let tools = content.section(Topic::Tools).unwrap();
        assert_eq!(tools.articles.len(), 3);
        assert_eq!(tools.articles[0].url, "https://theverge.com/tools-1");
        assert!(tools
            .articles
            .windows(2)
            .all(|w| w[0].published_at >= w[1].published_at));
    }

    #[test]
    fn personalize_follows_interest_order() {
        let content = curate(sample_articles(), &rules(), now());
        let sections = personalize(&content, &[Topic::Tools, Topic::Policy, Topic::Llms], 3);
        let topics: Vec<Topic> = sections.iter().map(|s| s.topic).collect();
        assert_eq!(topics, vec![Topic::Tools, Topic::Policy]);
    }

    #[test]
    fn personalize_falls_back_to_top_stories() {
        let content = curate(sample_articles(), &rules(), now());
        let sections = personalize(&content, &[Topic::Research], 2);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].topic, Topic::General);
        assert_eq!(sections[0].title, "Top Stories");
        assert_eq!(sections[0].articles.len(), 2);
        assert_eq!(sections[0].articles[0].url, "https://wired.com/policy-1");

        let empty = curate(vec![], &rules(), now());
        assert!(personalize(&empty, &[Topic::Research], 2).is_empty());
    }

    #[tokio::test]
    async fn fetch_and_curate_queries_the_age_window() {
        let news = FakeNews::new(sample_articles());
        let content = fetch_and_curate(&news, "ai", &rules(), now()).await.unwrap();
        assert!(!content.sections.is_empty());

        let queries = news.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].from, now() - chrono::Duration::hours(48));
        assert_eq!(queries[0].page_size, PAGE_SIZE);
    }
}
