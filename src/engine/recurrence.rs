use chrono::{Datelike, Duration};

use crate::calendar::Calendar;
use crate::limits::MAX_OCCURRENCES;
use crate::model::*;

use super::error::ValidationError;
use super::EngineError;

/// Expand a base occurrence into concrete occurrences, in date order.
///
/// Each occurrence keeps the base's local time of day and duration. Daily
/// rules hit every date from the base date through `until`; weekly rules hit
/// the dates in that range whose weekday is in the rule's day set, the base
/// date included only when its weekday is. `until` before the base date yields
/// nothing.
pub fn expand(base: Span, rule: &RecurrenceRule, cal: &Calendar) -> Result<Vec<Span>, EngineError> {
    if rule.kind == RecurrenceKind::Weekly && rule.days_of_week.is_empty() {
        return Err(
            ValidationError::InvalidRecurrence("weekly rule needs at least one weekday").into(),
        );
    }

    let base_local = cal.local(base.start);
    let base_date = base_local.date();
    let time_of_day = base_local.time();
    let duration = base.duration_ms();

    let mut occurrences = Vec::new();
    let mut date = base_date;
    while date <= rule.until {
        let hit = match rule.kind {
            RecurrenceKind::Daily => true,
            RecurrenceKind::Weekly => rule.days_of_week.contains(date.weekday()),
        };
        if hit {
            if occurrences.len() == MAX_OCCURRENCES {
                return Err(EngineError::LimitExceeded("too many occurrences"));
            }
            let start = cal.at(date, time_of_day);
            occurrences.push(Span::new(start, start + duration));
        }
        date += Duration::days(1);
    }
    Ok(occurrences)
}
