//! Cron expressions and timezones.
//!
//! Accepts the classic five-field form (`min hour dom month dow`, Sunday as 0
//! or 7) as well as the six- and seven-field seconds-first forms understood by
//! the `cron` crate. Five-field input is normalized before parsing.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

use crate::error::{OrchestrationError, Result};

/// Parsed cron expression bound to a timezone
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    normalized: String,
    timezone: Tz,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parse `expression` for the IANA timezone `timezone`
    ///
    /// # Errors
    /// `InvalidTimezone` for an unknown zone, `InvalidCronExpression` for bad syntax
    pub fn parse(expression: &str, timezone: &str) -> Result<Self> {
        let tz = parse_timezone(timezone)?;
        let normalized = normalize_expression(expression)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| OrchestrationError::InvalidCronExpression {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { expression: expression.trim().to_string(), normalized, timezone: tz, schedule })
    }

    /// Expression as supplied
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Seconds-first form handed to the parser
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Timezone firings are computed in
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// First firing strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Next `count` firings after now, in the schedule's timezone
    pub fn upcoming(&self, count: usize) -> Vec<DateTime<Tz>> {
        self.schedule.upcoming(self.timezone).take(count).collect()
    }
}

/// Parse an IANA timezone name
///
/// # Errors
/// `InvalidTimezone` if the name is unknown
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim().parse::<Tz>().map_err(|_| OrchestrationError::InvalidTimezone(name.to_string()))
}

/// Preview the next `count` firings of `expression` in `timezone`
///
/// # Errors
/// Same as [`CronSchedule::parse`]
pub fn next_fire_times(expression: &str, timezone: &str, count: usize) -> Result<Vec<DateTime<Tz>>> {
    Ok(CronSchedule::parse(expression, timezone)?.upcoming(count))
}

/// Convert five-field input to the seconds-first form; six and seven fields pass through
///
/// # Errors
/// `InvalidCronExpression` for a wrong field count or an out-of-range weekday
pub fn normalize_expression(expression: &str) -> Result<String> {
    let invalid = |reason: String| OrchestrationError::InvalidCronExpression {
        expression: expression.to_string(),
        reason,
    };
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.as_slice() {
        [minute, hour, dom, month, dow] => {
            let dow = normalize_weekdays(dow).map_err(invalid)?;
            Ok(format!("0 {} {} {} {} {}", minute, hour, dom, month, dow))
        }
        [_, _, _, _, _, _] | [_, _, _, _, _, _, _] => Ok(fields.join(" ")),
        _ => Err(invalid(format!("expected 5, 6 or 7 fields, found {}", fields.len()))),
    }
}

/// Map classic weekday numbers (0-7, Sunday = 0 or 7) to the parser's 1-7 (Sunday = 1)
fn normalize_weekdays(field: &str) -> std::result::Result<String, String> {
    let parts = field.split(',').map(|part| -> std::result::Result<String, String> {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };
        let mapped = match range.split_once('-') {
            Some((start, end)) => match (weekday(start)?, weekday(end)?) {
                (Some(0), Some(7)) => "1-7".to_string(),
                (Some(a), Some(7)) if step.is_none() => format!("{}-7,1", a + 1),
                (Some(a), Some(7)) => format!("{}-7", a + 1),
                (Some(a), Some(b)) => format!("{}-{}", a % 7 + 1, b % 7 + 1),
                _ => range.to_string(),
            },
            None => match weekday(range)? {
                Some(n) => (n % 7 + 1).to_string(),
                None => range.to_string(),
            },
        };
        Ok(match step {
            Some(step) => format!("{}/{}", mapped, step),
            None => mapped,
        })
    });
    Ok(parts.collect::<std::result::Result<Vec<_>, String>>()?.join(","))
}

/// Numeric weekday, `None` for names and wildcards
fn weekday(raw: &str) -> std::result::Result<Option<u32>, String> {
    if !raw.chars().all(|c| c.is_ascii_digit()) || raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<u32>() {
        Ok(n) if n <= 7 => Ok(Some(n)),
        _ => Err(format!("day of week '{}' is outside 0-7", raw)),
    }
}
