use crate::curation::model::Section;
use crate::email::client::OutgoingEmail;
use askama::Template;
use chrono::NaiveDate;

pub struct DigestRecipient<'a> {
    pub email: &'a str,
    pub name: Option<&'a str>,
    pub manage_token: Option<&'a str>,
}

struct MemberLinks {
    manage: String,
    unsubscribe: String,
}

#[derive(Template)]
#[template(path = "emails/digest.html")]
struct DigestHtml<'a> {
    subject: &'a str,
    greeting: &'a str,
    article_count: usize,
    sections: &'a [Section],
    links: &'a Option<MemberLinks>,
}

#[derive(Template)]
#[template(path = "emails/digest.txt")]
struct DigestText<'a> {
    subject: &'a str,
    greeting: &'a str,
    article_count: usize,
    sections: &'a [Section],
    links: &'a Option<MemberLinks>,
}

#[derive(Template)]
#[template(path = "emails/verification.html")]
struct VerificationHtml<'a> {
    link: &'a str,
}

#[derive(Template)]
#[template(path = "emails/verification.txt")]
struct VerificationText<'a> {
    link: &'a str,
}

fn greeting(name: Option<&str>) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("Hi {name},"),
        None => "Hi there,".to_string(),
    }
}

pub fn digest_subject(date: NaiveDate) -> String {
    format!("Your AI news digest for {}", date.format("%B %-d, %Y"))
}

pub fn render_digest(
    recipient: &DigestRecipient<'_>,
    sections: &[Section],
    date: NaiveDate,
    app_url: &str,
) -> Result<OutgoingEmail, askama::Error> {
    let subject = digest_subject(date);
    let greeting = greeting(recipient.name);
    let article_count = sections.iter().map(|s| s.articles.len()).sum();
    let links = recipient.manage_token.map(|token| MemberLinks {
        manage: format!("{app_url}/members/{token}/dashboard"),
        unsubscribe: format!("{app_url}/unsubscribe?token={token}"),
    });

    let html = DigestHtml {
        subject: &subject,
        greeting: &greeting,
        article_count,
        sections,
        links: &links,
    }
    .render()?;
    let text = DigestText {
        subject: &subject,
        greeting: &greeting,
        article_count,
        sections,
        links: &links,
    }
    .render()?;

    Ok(OutgoingEmail {
        to: recipient.email.to_string(),
        subject,
        html,
        text,
        idempotency_key: None,
    })
}

pub fn render_verification(
    email: &str,
    token: &str,
    app_url: &str,
) -> Result<OutgoingEmail, askama::Error> {
    let link = format!("{app_url}/verify?token={token}");

    Ok(OutgoingEmail {
        to: email.to_string(),
        subject: "Confirm your AI news digest subscription".to_string(),
        html: VerificationHtml { link: &link }.render()?,
        text: VerificationText { link: &link }.render()?,
        idempotency_key: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curation::model::{Article, Section};
    use crate::subscribers::model::Topic;
    use chrono::{TimeZone, Utc};

    fn article(title: &str, summary: Option<&str>) -> Article {
        Article {
            source: "Wired".to_string(),
            domain: "wired.com".to_string(),
            title: title.to_string(),
            summary: summary.map(str::to_string),
            url: "https://wired.com/story?a=1&b=2".to_string(),
            image_url: None,
            published_at: Utc.with_ymd_and_hms(2024, 11, 20, 8, 0, 0).unwrap(),
            topic: Topic::Llms,
        }
    }

    #[test]
    fn digest_escapes_and_links() {
        let sections = vec![Section::new(
            Topic::Llms,
            vec![
                article("<script>alert(1)</script>", Some("Tom & Jerry")),
                article("Plain title", None),
            ],
        )];
        let recipient = DigestRecipient {
            email: "ada@example.com",
            name: Some("Ada"),
            manage_token: Some("tok123"),
        };
        let date = NaiveDate::from_ymd_opt(2024, 11, 20).unwrap();
        let email = render_digest(&recipient, &sections, date, "https://digest.example").unwrap();

        assert_eq!(email.to, "ada@example.com");
        assert_eq!(email.subject, "Your AI news digest for November 20, 2024");
        assert!(email.html.contains("&lt;script&gt;alert(1)&lt;"));
        assert!(!email.html.contains("<script>"));
        assert!(email.html.contains("Tom &amp; Jerry"));
        assert!(email.html.contains("story?a=1&amp;b=2"));
        assert!(email.html.contains("Large Language Models"));
        assert!(email.html.contains("unsubscribe?token=tok123"));
        assert!(email.html.contains("Hi Ada,"));
        assert!(email.html.contains("Here are 2 stories"));

        // The plain-text part is not HTML-escaped.
        assert!(email.text.contains("* <script>alert(1)</script> (Wired)"));
        assert!(email.text.contains("  Tom & Jerry"));
        assert!(email.text.contains("* Plain title (Wired)"));
        assert!(email
            .text
            .contains("Unsubscribe: https://digest.example/unsubscribe?token=tok123"));
    }

    #[test]
    fn test_digest_has_no_member_links() {
        let recipient = DigestRecipient {
            email: "qa@example.com",
            name: None,
            manage_token: None,
        };
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let email = render_digest(&recipient, &[], date, "https://digest.example").unwrap();
        assert!(email.html.contains("Hi there,"));
        assert!(!email.html.contains("Unsubscribe"));
        assert!(!email.text.contains("Unsubscribe"));
        assert_eq!(email.subject, "Your AI news digest for January 5, 2024");
    }

    #[test]
    fn verification_contains_token_link() {
        let email =
            render_verification("ada@example.com", "abc", "https://digest.example").unwrap();
        assert!(email.html.contains("verify?token=abc"));
        assert!(email
            .text
            .contains("Confirm your email address: https://digest.example/verify?token=abc"));
    }
}
