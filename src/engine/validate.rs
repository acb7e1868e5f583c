use ulid::Ulid;

use crate::calendar::Calendar;
use crate::model::*;

use super::error::ValidationError;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_timestamps(starts_at: Ms, ends_at: Ms) -> Result<(), EngineError> {
    use crate::limits::*;
    for t in [starts_at, ends_at] {
        if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
    }
    Ok(())
}

/// What the proposed interval is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    New,
    /// Re-validation of an existing booking with a new end. The booking's own
    /// interval is excluded from the overlap check and it may already have begun.
    Extension { booking_id: Ulid },
}

impl Candidate {
    fn excluded(&self) -> Option<Ulid> {
        match self {
            Candidate::New => None,
            Candidate::Extension { booking_id } => Some(*booking_id),
        }
    }
}

/// Check a proposed `[starts_at, ends_at)` against a resource.
///
/// Checks run in a fixed order and the first violation is returned:
/// end after start, not in the past, inside the work window of the start's
/// local date, duration within bounds, then no overlap with another confirmed
/// booking. Nothing is mutated.
pub fn validate_booking(
    rs: &ResourceState,
    starts_at: Ms,
    ends_at: Ms,
    candidate: Candidate,
    now: Ms,
    cal: &Calendar,
) -> Result<Span, EngineError> {
    if ends_at <= starts_at {
        return Err(ValidationError::EndBeforeStart.into());
    }
    if candidate == Candidate::New && starts_at < now {
        return Err(ValidationError::PastStart.into());
    }

    let span = Span::new(starts_at, ends_at);
    let resource = &rs.resource;
    let window = resource.work_window(cal.date_of(starts_at), cal);
    if !window.contains_span(&span) {
        return Err(ValidationError::OutsideWorkHours.into());
    }

    let duration = span.duration_ms();
    if duration < resource.min_duration_ms() {
        return Err(ValidationError::DurationTooShort {
            min_minutes: resource.min_duration,
        }
        .into());
    }
    if duration > resource.max_duration_ms() {
        return Err(ValidationError::DurationTooLong {
            max_minutes: resource.max_duration,
        }
        .into());
    }

    check_no_overlap(rs, &span, candidate.excluded())?;
    Ok(span)
}

pub(crate) fn check_no_overlap(
    rs: &ResourceState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match rs
        .confirmed_overlapping(span)
        .find(|b| Some(b.id) != exclude)
    {
        Some(existing) => Err(EngineError::Overlap(existing.id)),
        None => Ok(()),
    }
}
