use crate::subscribers::model::Topic;
use regex::Regex;
use std::sync::LazyLock;

// Checked in order; the first topic whose pattern matches wins.
static TOPIC_PATTERNS: LazyLock<Vec<(Topic, Regex)>> = LazyLock::new(|| {
    [
        (
            Topic::Policy,
            concat!(
                r"\b(regulat\w*|legislat\w*|lawmakers?|laws?|policy|policies|senate|congress",
                r"|ai act|executive order|bans?|banned|lawsuits?|sues?|sued|copyright|safety",
                r"|ethics?|ethical|bias|privacy|government|ftc|antitrust)\b",
            ),
        ),
        (
            Topic::Research,
            concat!(
                r"\b(research(?:ers?)?|papers?|study|studies|arxiv|benchmarks?|scientists?",
                r"|breakthrough|university|dataset|peer[- ]reviewed)\b",
            ),
        ),
        (
            Topic::Robotics,
            concat!(
                r"\b(robot\w*|humanoids?|autonomous vehicles?|self-driving|drones?|waymo",
                r"|boston dynamics)\b",
            ),
        ),
        (
            Topic::Business,
            concat!(
                r"\b(funding|raises?|raised|valuation|ipo|acquisitions?|acquires?|acquired",
                r"|investors?|investment|revenue|startups?|stocks?|shares|earnings|billion",
                r"|layoffs?|ceo)\b",
            ),
        ),
        (
            Topic::Tools,
            concat!(
                r"\b(launch(?:es|ed)?|release[sd]?|rolls? out|rolled out|apps?|plugins?|apis?|sdk",
                r"|open[- ]source|tools?|toolkit|features?|copilot|beta)\b",
            ),
        ),
        (
            Topic::Llms,
            concat!(
                r"\b(llms?|large language models?|language models?|gpt-?\w*|chatgpt|claude|gemini",
                r"|llama|mistral|chatbots?)\b",
            ),
        ),
    ]
    .into_iter()
    .map(|(topic, pattern)| {
        let regex = Regex::new(&format!("(?i){pattern}")).expect("topic pattern compiles");
        (topic, regex)
    })
    .collect()
});

fn first_match(text: &str) -> Option<Topic> {
    TOPIC_PATTERNS
        .iter()
        .find(|(_, regex)| regex.is_match(text))
        .map(|(topic, _)| *topic)
}

/// The title decides when it matches anything; the summary is only a tie-breaker for vague titles.
pub fn categorize(title: &str, summary: Option<&str>) -> Topic {
    first_match(title)
        .or_else(|| summary.and_then(first_match))
        .unwrap_or(Topic::General)
}
