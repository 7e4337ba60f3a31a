use crate::config::CurationConfig;
use crate::curation::categorize::categorize;
use crate::curation::model::{Article, RawArticle};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

const MAX_SUMMARY_CHARS: usize = 280;
const REMOVED_MARKER: &str = "[Removed]";

static AI_RELEVANCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        concat!(
            r"(?i)\b(ai|a\.i\.|artificial intelligence|machine learning|deep learning",
            r"|neural networks?|llms?|large language models?|gpt-?\w*|chatgpt|openai|anthropic",
            r"|claude|gemini|deepmind|copilot|generative|transformers?|chatbots?|agentic|mistral",
            r"|llama|hugging ?face)\b",
        ),
    )
    .expect("ai relevance pattern compiles")
});

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("html tag pattern compiles"));

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("non-alnum pattern compiles"));

#[derive(Debug, Clone)]
pub struct CurationRules {
    pub source_whitelist: Vec<String>,
    pub source_blocklist: Vec<String>,
    pub keyword_blocklist: Option<Regex>,
    pub max_articles_per_section: usize,
    pub max_article_age: Duration,
}

impl CurationRules {
    pub fn from_config(config: &CurationConfig) -> Result<Self, regex::Error> {
        Ok(CurationRules {
            source_whitelist: config.source_whitelist.clone(),
            source_blocklist: config.source_blocklist.clone(),
            keyword_blocklist: keyword_regex(&config.keyword_blocklist)?,
            max_articles_per_section: config.max_articles_per_section,
            max_article_age: config.max_article_age,
        })
    }
}

fn keyword_regex(keywords: &[String]) -> Result<Option<Regex>, regex::Error> {
    if keywords.is_empty() {
        return Ok(None);
    }
    let alternation = keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).map(Some)
}

/// Host of an article url, lowercased and without a leading `www.`.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

fn source_matches(entry: &str, source: &str, domain: &str) -> bool {
    source.eq_ignore_ascii_case(entry)
        || domain == entry
        || domain.ends_with(&format!(".{entry}"))
}

fn listed(list: &[String], source: &str, domain: &str) -> bool {
    list.iter().any(|entry| source_matches(entry, source, domain))
}

fn clean_summary(raw: &str) -> Option<String> {
    let text = HTML_TAG.replace_all(raw, " ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() || text == REMOVED_MARKER {
        return None;
    }
    if text.chars().count() <= MAX_SUMMARY_CHARS {
        return Some(text);
    }
    let truncated: String = text.chars().take(MAX_SUMMARY_CHARS).collect();
    let cut = truncated.rfind(' ').unwrap_or(truncated.len());
    Some(format!("{}...", truncated[..cut].trim_end()))
}

fn parse_published(raw: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw?.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Applies the validity, freshness, source, keyword and relevance filters in that order.
pub fn filter_articles(
    raw: Vec<RawArticle>,
    rules: &CurationRules,
    now: DateTime<Utc>,
) -> Vec<Article> {
    let oldest = now - rules.max_article_age;
    let newest = now + Duration::minutes(5);

    raw.into_iter()
        .filter_map(|item| {
            let title = non_empty(item.title.as_ref())?;
            let url = non_empty(item.url.as_ref())?;
            if title == REMOVED_MARKER {
                return None;
            }
            let domain = domain_of(url)?;

            let published_at = parse_published(item.published_at.as_deref())?;
            if published_at < oldest || published_at > newest {
                debug!("dropping stale or future article: {} ({})", title, published_at);
                return None;
            }

            let source = non_empty(item.source.name.as_ref())
                .unwrap_or(&domain)
                .to_string();
            if listed(&rules.source_blocklist, &source, &domain) {
                debug!("dropping blocked source {}: {}", source, title);
                return None;
            }
            if !rules.source_whitelist.is_empty()
                && !listed(&rules.source_whitelist, &source, &domain)
            {
                return None;
            }

            let summary = item.description.as_deref().and_then(clean_summary);
            let text = format!("{} {}", title, summary.as_deref().unwrap_or(""));
            if let Some(blocklist) = &rules.keyword_blocklist {
                if blocklist.is_match(&text) {
                    debug!("dropping article with blocked keyword: {}", title);
                    return None;
                }
            }
            if !AI_RELEVANCE.is_match(&text) {
                return None;
            }

            Some(Article {
                topic: categorize(title, summary.as_deref()),
                source,
                domain,
                title: title.to_string(),
                summary,
                url: url.to_string(),
                image_url: non_empty(item.url_to_image.as_ref()).map(str::to_string),
                published_at,
            })
        })
        .collect()
}

/// Url identity: host without `www.`, path without trailing slash, no scheme, query or fragment.
pub fn normalize_url(url: &str) -> String {
    match url::Url::parse(url.trim()) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default().to_lowercase();
            let host = host.strip_prefix("www.").unwrap_or(&host);
            format!("{}{}", host, parsed.path().trim_end_matches('/'))
        }
        Err(_) => url.trim().to_lowercase(),
    }
}

/// Title identity: lowercase alphanumerics, with a trailing " - Source" or " | Source" removed.
pub fn normalize_title(title: &str, source: &str) -> String {
    let mut title = title.trim();
    for separator in [" - ", " | "] {
        if let Some((head, tail)) = title.rsplit_once(separator) {
            if tail.trim().eq_ignore_ascii_case(source) {
                title = head;
            }
        }
    }
    NON_ALNUM
        .replace_all(&title.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Keeps the first occurrence of each url and of each title, so callers sort newest first.
pub fn dedupe(articles: Vec<Article>) -> Vec<Article> {
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut seen_titles: HashSet<String> = HashSet::new();

    articles
        .into_iter()
        .filter(|article| {
            let url_key = normalize_url(&article.url);
            let title_key = normalize_title(&article.title, &article.source);
            if seen_urls.contains(&url_key) || seen_titles.contains(&title_key) {
                return false;
            }
            seen_urls.insert(url_key);
            seen_titles.insert(title_key);
            true
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::curation::model::RawSource;
    use crate::subscribers::model::Topic;
    use chrono::TimeZone;

    pub(crate) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 20, 12, 0, 0).unwrap()
    }

    pub(crate) fn raw(source: &str, title: &str, url: &str, hours_ago: i64) -> RawArticle {
        RawArticle {
            source: RawSource {
                id: None,
                name: Some(source.to_string()),
            },
            title: Some(title.to_string()),
            description: Some(format!("{title}. More details inside.")),
            url: Some(url.to_string()),
            published_at: Some((now() - Duration::hours(hours_ago)).to_rfc3339()),
            ..Default::default()
        }
    }

    pub(crate) fn rules() -> CurationRules {
        CurationRules {
            source_whitelist: vec![],
            source_blocklist: vec!["biztoc.com".to_string(), "spam wire".to_string()],
            keyword_blocklist: keyword_regex(&["crypto".to_string(), "deal alert".to_string()])
                .unwrap(),
            max_articles_per_section: 3,
            max_article_age: Duration::hours(48),
        }
    }

    #[test]
    fn drops_invalid_and_removed_articles() {
        let mut missing_url = raw("Wired", "OpenAI ships a model", "", 1);
        missing_url.url = None;
        let removed = raw("[Removed]", "[Removed]", "https://removed.com", 1);
        let kept = raw("Wired", "OpenAI ships a model", "https://www.wired.com/story/x", 1);

        let articles = filter_articles(vec![missing_url, removed, kept], &rules(), now());
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].domain, "wired.com");
        assert_eq!(articles[0].source, "Wired");
    }

    #[test]
    fn drops_stale_future_and_undated_articles() {
        let stale = raw("Wired", "AI news from last week", "https://wired.com/a", 72);
        let future = raw("Wired", "AI news from tomorrow", "https://wired.com/b", -3);
        let mut undated = raw("Wired", "AI news without a date", "https://wired.com/c", 1);
        undated.published_at = Some("yesterday".to_string());
        let fresh = raw("Wired", "AI news from this morning", "https://wired.com/d", 3);

        let articles = filter_articles(vec![stale, future, undated, fresh], &rules(), now());
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].url, "https://wired.com/d");
    }

    #[test]
    fn applies_source_block_and_allow_lists() {
        let blocked_domain = raw("BizToc", "AI stocks rally", "https://news.biztoc.com/x", 1);
        let blocked_name = raw("Spam Wire", "AI press release", "https://spam.example/x", 1);
        let ok = raw("The Verge", "AI press release", "https://theverge.com/x", 1);

        let articles = filter_articles(
            vec![blocked_domain, blocked_name, ok.clone()],
            &rules(),
            now(),
        );
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].source, "The Verge");

        let mut only_wired = rules();
        only_wired.source_whitelist = vec!["wired.com".to_string()];
        let wired = raw("Wired", "OpenAI ships a model", "https://wired.com/y", 1);
        let articles = filter_articles(vec![ok, wired], &only_wired, now());
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].domain, "wired.com");
    }

    #[test]
    fn drops_blocked_keywords_and_off_topic_articles() {
        let crypto = raw("Wired", "AI trading bots and Crypto", "https://wired.com/1", 1);
        let deal = raw("Wired", "Deal alert: AI headphones", "https://wired.com/2", 1);
        let off_topic = raw("Wired", "The best hiking boots", "https://wired.com/3", 1);
        let cryptography = raw("Wired", "AI meets cryptography", "https://wired.com/4", 1);

        let batch = vec![crypto, deal, off_topic, cryptography];
        let articles = filter_articles(batch, &rules(), now());
        let titles: Vec<&str> = articles.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["AI meets cryptography"]);
    }

    #[test]
    fn summaries_are_stripped_and_truncated() {
        assert_eq!(
            clean_summary("<p>OpenAI  <b>released</b>\n a model</p>").as_deref(),
            Some("OpenAI released a model")
        );
        assert_eq!(clean_summary("  "), None);

        let long = "word ".repeat(100);
        let summary = clean_summary(&long).unwrap();
        assert!(summary.ends_with("..."));
        assert!(summary.chars().count() <= MAX_SUMMARY_CHARS + 3);
    }

    #[test]
    fn articles_are_categorized() {
        let articles = filter_articles(
            vec![raw("Wired", "OpenAI raises $6 billion", "https://wired.com/r", 1)],
            &rules(),
            now(),
        );
        assert_eq!(articles[0].topic, Topic::Business);
    }

    #[test]
    fn dedupe_matches_urls_and_titles() {
        let articles = filter_articles(
            vec![
                raw("Wired", "OpenAI ships a model", "https://www.wired.com/story/x/?utm=1", 1),
                raw("Wired", "Another AI story", "http://wired.com/story/x", 2),
                raw("The Verge", "OpenAI ships a model - The Verge", "https://theverge.com/y", 3),
                raw("The Verge", "Anthropic updates Claude", "https://theverge.com/z", 4),
            ],
            &rules(),
            now(),
        );
        let titles: Vec<String> = dedupe(articles).into_iter().map(|a| a.title).collect();
        assert_eq!(titles, vec!["OpenAI ships a model", "Anthropic updates Claude"]);
    }

    #[test]
    fn url_and_title_normalization() {
        assert_eq!(
            normalize_url("https://WWW.Example.com/a/b/?q=1#frag"),
            "example.com/a/b"
        );
        assert_eq!(
            normalize_title("GPT-5: what's new? | TechCrunch", "TechCrunch"),
            "gpt 5 what s new"
        );
        assert_eq!(normalize_title("Keep - this part", "Other"), "keep this part");
    }
}
