use chrono::{NaiveTime, Timelike, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreferenceError {
    #[error("invalid email address: {0:?}")]
    InvalidEmail(String),
    #[error("unknown frequency {0:?}, expected daily, weekly or monthly")]
    UnknownFrequency(String),
    #[error("invalid send time {0:?}, expected e.g. \"09:00\" or \"9:30 pm\"")]
    InvalidSendTime(String),
    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),
    #[error("unknown topic {0:?}")]
    UnknownTopic(String),
    #[error("at least one interest is required")]
    NoInterests,
    #[error("weekly day must be between 0 (Monday) and 6 (Sunday), got {0}")]
    InvalidWeeklyDay(i64),
    #[error("monthly day must be between 1 and 31, got {0}")]
    InvalidMonthlyDay(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl FromStr for Frequency {
    type Err = PreferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => Err(PreferenceError::UnknownFrequency(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Llms,
    Research,
    Business,
    Policy,
    Robotics,
    Tools,
    General,
}

impl Topic {
    /// Topics a subscriber can pick. `General` only collects uncategorized articles.
    pub const SELECTABLE: [Topic; 6] = [
        Topic::Llms,
        Topic::Research,
        Topic::Business,
        Topic::Policy,
        Topic::Robotics,
        Topic::Tools,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Llms => "llms",
            Topic::Research => "research",
            Topic::Business => "business",
            Topic::Policy => "policy",
            Topic::Robotics => "robotics",
            Topic::Tools => "tools",
            Topic::General => "general",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Topic::Llms => "Large Language Models",
            Topic::Research => "Research & Papers",
            Topic::Business => "Industry & Funding",
            Topic::Policy => "Policy & Safety",
            Topic::Robotics => "Robotics",
            Topic::Tools => "Tools & Launches",
            Topic::General => "Top Stories",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = PreferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let slug = s.trim().to_lowercase();
        Topic::SELECTABLE
            .iter()
            .find(|topic| topic.as_str() == slug)
            .copied()
            .ok_or_else(|| PreferenceError::UnknownTopic(s.to_string()))
    }
}

/// Preferred local time of day, normalized to minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SendTime(NaiveTime);

impl SendTime {
    pub fn new(hour: u32, minute: u32) -> Option<SendTime> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(SendTime)
    }

    pub fn time(&self) -> NaiveTime {
        self.0
    }
}

impl fmt::Display for SendTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0.hour(), self.0.minute())
    }
}

impl FromStr for SendTime {
    type Err = PreferenceError;

    /// Accepts `"09:00"`, `"9:00"`, `"09:00:00"`, `"9:30 pm"`, `"9am"` and `"12 AM"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PreferenceError::InvalidSendTime(s.to_string());

        let normalized = s.trim().to_lowercase().replace(' ', "");
        let (clock, meridiem) = if let Some(rest) = normalized.strip_suffix("am") {
            (rest, Some(false))
        } else if let Some(rest) = normalized.strip_suffix("pm") {
            (rest, Some(true))
        } else {
            (normalized.as_str(), None)
        };

        let mut parts = clock.split(':');
        let hour: u32 = parse_clock_part(parts.next()).ok_or_else(invalid)?;
        let minute: u32 = match parts.next() {
            Some(part) => parse_clock_part(Some(part)).ok_or_else(invalid)?,
            None if meridiem.is_some() => 0,
            None => return Err(invalid()),
        };
        if let Some(part) = parts.next() {
            // Seconds are accepted and dropped.
            let seconds: u32 = parse_clock_part(Some(part)).ok_or_else(invalid)?;
            if seconds > 59 {
                return Err(invalid());
            }
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        let hour = match meridiem {
            Some(is_pm) => {
                if !(1..=12).contains(&hour) {
                    return Err(invalid());
                }
                match (hour, is_pm) {
                    (12, false) => 0,
                    (12, true) => 12,
                    (h, false) => h,
                    (h, true) => h + 12,
                }
            }
            None => hour,
        };

        SendTime::new(hour, minute).ok_or_else(invalid)
    }
}

fn parse_clock_part(part: Option<&str>) -> Option<u32> {
    let part = part?;
    if part.is_empty() || part.len() > 2 || !part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

impl Serialize for SendTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryPreferences {
    pub frequency: Frequency,
    pub send_time: SendTime,
    pub timezone: Tz,
    pub weekly_day: Weekday,
    pub monthly_day: u32,
}

impl Default for DeliveryPreferences {
    fn default() -> Self {
        DeliveryPreferences {
            frequency: Frequency::Daily,
            send_time: SendTime(NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)),
            timezone: Tz::UTC,
            weekly_day: Weekday::Mon,
            monthly_day: 1,
        }
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, PreferenceError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| PreferenceError::UnknownTimezone(name.to_string()))
}

pub fn parse_weekly_day(day: i64) -> Result<Weekday, PreferenceError> {
    u8::try_from(day)
        .ok()
        .and_then(|d| Weekday::try_from(d).ok())
        .ok_or(PreferenceError::InvalidWeeklyDay(day))
}

pub fn parse_monthly_day(day: i64) -> Result<u32, PreferenceError> {
    if (1..=31).contains(&day) {
        Ok(day as u32)
    } else {
        Err(PreferenceError::InvalidMonthlyDay(day))
    }
}

pub fn parse_interests(raw: &[String]) -> Result<Vec<Topic>, PreferenceError> {
    let mut topics: Vec<Topic> = Vec::new();
    for value in raw {
        let topic: Topic = value.parse()?;
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }
    if topics.is_empty() {
        return Err(PreferenceError::NoInterests);
    }
    Ok(topics)
}

pub fn normalize_email(raw: &str) -> Result<String, PreferenceError> {
    let email = raw.trim().to_lowercase();
    let invalid = || PreferenceError::InvalidEmail(raw.to_string());

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || email.chars().any(char::is_whitespace)
    {
        return Err(invalid());
    }
    Ok(email)
}

#[derive(Debug, Clone)]
pub struct User {
    pub user_id: i64,
    pub email: String,
    pub name: Option<String>,
    pub verified: bool,
    pub subscribed: bool,
    pub manage_token: String,
    pub preferences: DeliveryPreferences,
    pub created_at: i64,
}

impl User {
    pub fn is_eligible(&self) -> bool {
        self.verified && self.subscribed
    }
}

fn decode_error<E>(column: &str, err: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(err),
    }
}

impl<'r> FromRow<'r, SqliteRow> for User {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let frequency: String = row.try_get("frequency")?;
        let send_time: String = row.try_get("send_time")?;
        let timezone: String = row.try_get("timezone")?;
        let weekly_day: i64 = row.try_get("weekly_day")?;
        let monthly_day: i64 = row.try_get("monthly_day")?;

        Ok(User {
            user_id: row.try_get("user_id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            verified: row.try_get("verified")?,
            subscribed: row.try_get("subscribed")?,
            manage_token: row.try_get("manage_token")?,
            preferences: DeliveryPreferences {
                frequency: frequency
                    .parse()
                    .map_err(|e| decode_error("frequency", e))?,
                send_time: send_time
                    .parse()
                    .map_err(|e| decode_error("send_time", e))?,
                timezone: parse_timezone(&timezone).map_err(|e| decode_error("timezone", e))?,
                weekly_day: parse_weekly_day(weekly_day)
                    .map_err(|e| decode_error("weekly_day", e))?,
                monthly_day: parse_monthly_day(monthly_day)
                    .map_err(|e| decode_error("monthly_day", e))?,
            },
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub email: String,
    pub name: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    pub frequency: Option<String>,
    pub send_time: Option<String>,
    pub timezone: Option<String>,
    pub weekly_day: Option<i64>,
    pub monthly_day: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PreferencesPatch {
    pub name: Option<String>,
    pub interests: Option<Vec<String>>,
    pub frequency: Option<String>,
    pub send_time: Option<String>,
    pub timezone: Option<String>,
    pub weekly_day: Option<i64>,
    pub monthly_day: Option<i64>,
}

impl PreferencesPatch {
    /// Applies the patch on top of `current`, validating every provided field.
    pub fn apply(
        &self,
        current: &DeliveryPreferences,
    ) -> Result<DeliveryPreferences, PreferenceError> {
        Ok(DeliveryPreferences {
            frequency: match &self.frequency {
                Some(raw) => raw.parse()?,
                None => current.frequency,
            },
            send_time: match &self.send_time {
                Some(raw) => raw.parse()?,
                None => current.send_time,
            },
            timezone: match &self.timezone {
                Some(raw) => parse_timezone(raw)?,
                None => current.timezone,
            },
            weekly_day: match self.weekly_day {
                Some(day) => parse_weekly_day(day)?,
                None => current.weekly_day,
            },
            monthly_day: match self.monthly_day {
                Some(day) => parse_monthly_day(day)?,
                None => current.monthly_day,
            },
        })
    }

    pub fn interests(&self) -> Result<Option<Vec<Topic>>, PreferenceError> {
        self.interests.as_deref().map(parse_interests).transpose()
    }
}

impl From<&SubscribeRequest> for PreferencesPatch {
    fn from(request: &SubscribeRequest) -> Self {
        PreferencesPatch {
            name: request.name.clone(),
            interests: Some(request.interests.clone()),
            frequency: request.frequency.clone(),
            send_time: request.send_time.clone(),
            timezone: request.timezone.clone(),
            weekly_day: request.weekly_day,
            monthly_day: request.monthly_day,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PreferencesView {
    pub email: String,
    pub name: Option<String>,
    pub interests: Vec<Topic>,
    pub frequency: Frequency,
    pub send_time: SendTime,
    pub timezone: String,
    pub weekly_day: u32,
    pub monthly_day: u32,
}

impl PreferencesView {
    pub fn new(user: &User, interests: Vec<Topic>) -> Self {
        let prefs = &user.preferences;
        PreferencesView {
            email: user.email.clone(),
            name: user.name.clone(),
            interests,
            frequency: prefs.frequency,
            send_time: prefs.send_time,
            timezone: prefs.timezone.name().to_string(),
            weekly_day: prefs.weekly_day.num_days_from_monday(),
            monthly_day: prefs.monthly_day,
        }
    }
}
