//! Calendar recurrence math.
//!
//! Pure functions computing the next occurrence of a schedule from its
//! recurrence rule. All arithmetic happens in the schedule's timezone
//! (a fixed offset such as "+05:30", or UTC) so day boundaries line up
//! with the recipient's calendar, then converts back to UTC.

use crate::job::{RecurrencePattern, RecurrenceRule};
use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, Offset, Utc};

/// Parse a timezone string into a fixed offset.
///
/// Accepts "UTC", "Z", an empty string, or offsets in "+HH:MM" /
/// "+HHMM" form. Anything else falls back to UTC.
pub fn parse_timezone(timezone: &str) -> FixedOffset {
    fixed_offset(timezone).unwrap_or_else(|| Utc.fix())
}

fn fixed_offset(timezone: &str) -> Option<FixedOffset> {
    let tz = timezone.trim();
    if tz.is_empty() || tz.eq_ignore_ascii_case("utc") || tz == "Z" {
        return Some(Utc.fix());
    }

    let (sign, rest) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Compute the next occurrence after `current` for a recurrence rule.
///
/// Returns `None` when the calendar arithmetic overflows, which
/// terminates the recurrence.
pub fn next_occurrence(
    current: DateTime<Utc>,
    rule: &RecurrenceRule,
    timezone: &str,
) -> Option<DateTime<Utc>> {
    let local = current.with_timezone(&parse_timezone(timezone));
    let interval = rule.interval.max(1);

    let next = match rule.pattern {
        RecurrencePattern::Daily => local.checked_add_signed(Duration::days(i64::from(interval)))?,
        RecurrencePattern::Weekly => {
            if rule.days_of_week.is_empty() {
                local.checked_add_signed(Duration::days(7 * i64::from(interval)))?
            } else {
                let mut days: Vec<u32> = rule
                    .days_of_week
                    .iter()
                    .map(|d| d.number_from_sunday())
                    .collect();
                days.sort_unstable();
                days.dedup();

                let current_day = local.weekday().num_days_from_sunday();
                // Next listed weekday strictly after today, else wrap to
                // the first listed weekday next week.
                let offset_days = match days.iter().find(|&&d| d > current_day) {
                    Some(&d) => d - current_day,
                    None => 7 - current_day + days[0],
                };
                local.checked_add_signed(Duration::days(i64::from(offset_days)))?
            }
        }
        RecurrencePattern::Monthly => {
            // checked_add_months clamps Jan 31 + 1 month to Feb 28/29;
            // an explicit day_of_month re-pins within the target month.
            let advanced = local.checked_add_months(Months::new(interval))?;
            match rule.day_of_month {
                Some(day) => {
                    let last = days_in_month(advanced.year(), advanced.month());
                    advanced.with_day(day.clamp(1, last))?
                }
                None => advanced,
            }
        }
        RecurrencePattern::Yearly => local.checked_add_months(Months::new(12 * interval))?,
    };

    Some(next.with_timezone(&Utc))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}
