//! Cron evaluation: expression + reference instant -> next matching instant.
//!
//! Field count selects the mode. Five fields (`min hour dom month dow`) are
//! minute-granular and get a `0` seconds field prepended; six fields carry
//! their own seconds field. Anything else is rejected.
//!
//! Day-of-week uses the usual cron numbering: 0 and 7 are Sunday, 1 is
//! Monday. Names (`SUN`-`SAT`) are accepted as well. Numeric weekdays are
//! rewritten to names before the expression reaches the `cron` crate, which
//! numbers days differently.
//!
//! Schedules are evaluated in a time zone, so `0 3 * * *` means 03:00 on
//! the zone's wall clock. Results are always returned in UTC.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

pub use chrono_tz::Tz;

use crate::error::{CronpulseError, Result};

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Parse `expr` into a schedule, or explain why it is unusable.
pub fn parse(expr: &str) -> Result<Schedule> {
    let invalid = |reason: String| CronpulseError::InvalidCron {
        expr: expr.to_string(),
        reason,
    };

    let mut fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => fields.insert(0, "0"),
        6 => {}
        n => return Err(invalid(format!("expected 5 or 6 fields, got {n}"))),
    }

    let weekdays = weekday_names(fields[5]).map_err(invalid)?;
    let normalized = format!("{} {weekdays}", fields[..5].join(" "));

    Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))
}

/// Reject malformed expressions up front (used on job create/update).
pub fn validate(expr: &str) -> Result<()> {
    parse(expr).map(|_| ())
}

/// Resolve an IANA zone name such as `Europe/Berlin`.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| CronpulseError::Config(format!("unknown time zone '{name}'")))
}

/// Earliest instant strictly after `from` matching `expr`, evaluated in `tz`.
///
/// Returns `None` for malformed expressions as well as for expressions that
/// can never match; callers treat both as "do not schedule".
pub fn next_after(expr: &str, from: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    parse(expr)
        .ok()?
        .after(&from.with_timezone(&tz))
        .next()
        .map(|at| at.with_timezone(&Utc))
}

/// The next `count` fire times after `from`, evaluated in `tz`.
pub fn upcoming(
    expr: &str,
    from: DateTime<Utc>,
    count: usize,
    tz: Tz,
) -> Result<Vec<DateTime<Utc>>> {
    Ok(parse(expr)?
        .after(&from.with_timezone(&tz))
        .take(count)
        .map(|at| at.with_timezone(&Utc))
        .collect())
}

/// Rewrite numeric entries of a day-of-week field as day names.
///
/// Entries that already use names, and a bare `*` or `?`, pass through.
fn weekday_names(field: &str) -> std::result::Result<String, String> {
    field
        .split(',')
        .map(weekday_entry)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(|entries| entries.join(","))
}

fn weekday_entry(entry: &str) -> std::result::Result<String, String> {
    let (base, step) = match entry.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (entry, None),
    };
    if base.bytes().any(|b| b.is_ascii_alphabetic()) || (matches!(base, "*" | "?") && step.is_none())
    {
        return Ok(entry.to_string());
    }

    let day = |s: &str| -> std::result::Result<u32, String> {
        match s.parse::<u32>() {
            Ok(n) if n <= 7 => Ok(n),
            _ => Err(format!("invalid day of week '{s}' in '{entry}'")),
        }
    };
    let (first, last) = match base {
        "*" | "?" => (0, 6),
        _ => match base.split_once('-') {
            Some((a, b)) => (day(a)?, day(b)?),
            // `n/step` runs from n to the end of the week.
            None if step.is_some() => (day(base)?, 6),
            None => {
                let n = day(base)?;
                (n, n)
            }
        },
    };
    if first > last {
        return Err(format!("descending day-of-week range '{entry}'"));
    }
    let step = match step {
        None => 1,
        Some(s) => match s.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => return Err(format!("invalid step in '{entry}'")),
        },
    };

    let days: BTreeSet<usize> = (first..=last)
        .step_by(step)
        .map(|d| d as usize % 7)
        .collect();
    Ok(days
        .into_iter()
        .map(|d| WEEKDAYS[d])
        .collect::<Vec<_>>()
        .join(","))
}
