use chrono::{DateTime, Duration, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Hour of the day (UTC) every scheduled newsletter is sent at.
pub const SEND_HOUR_UTC: u32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Daily,
    Biweekly,
    Monthly,
}

impl Frequency {
    pub fn parse(frequency: &str) -> Result<Frequency, String> {
        match frequency.trim().to_uppercase().as_str() {
            "DAILY" => Ok(Frequency::Daily),
            "BIWEEKLY" => Ok(Frequency::Biweekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            _ => Err(format!("{} is not a valid frequency", frequency)),
        }
    }

    /// Lower-case label used in the newsletter subject line.
    pub fn label(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Biweekly => "biweekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl AsRef<str> for Frequency {
    fn as_ref(&self) -> &str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Biweekly => "BIWEEKLY",
            Frequency::Monthly => "MONTHLY",
        }
    }
}

/// Computes the next time a newsletter may be sent after `from`.
///
/// A missing frequency uses the monthly interval so an unreadable preference never leads to
/// more mail than the user asked for. The result is always moved to [`SEND_HOUR_UTC`].
pub fn next_send_time(frequency: Option<Frequency>, from: DateTime<Utc>) -> DateTime<Utc> {
    let shifted = match frequency {
        Some(Frequency::Daily) => from + Duration::days(1),
        Some(Frequency::Biweekly) => from + Duration::days(14),
        Some(Frequency::Monthly) | None => from
            .checked_add_months(Months::new(1))
            .unwrap_or_else(|| from + Duration::days(30)),
    };

    at_send_hour(shifted)
}

fn at_send_hour(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(SEND_HOUR_UTC, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(at)
}
