use chrono::NaiveDate;

use crate::calendar::Calendar;
use crate::model::*;

// ── Slot grid ─────────────────────────────────────────────────────

/// Slot grid for one resource on one local date.
///
/// Slots are `granularity_ms` wide, contiguous from `work_hours_start`, and
/// only whole slots are emitted: if the work window is not a multiple of the
/// granularity the trailing remainder is dropped. A slot is unavailable when a
/// confirmed booking overlaps it or when it starts before `now`.
pub fn day_slots(
    rs: &ResourceState,
    date: NaiveDate,
    cal: &Calendar,
    granularity_ms: Ms,
    now: Ms,
) -> Vec<TimeSlot> {
    let window = rs.resource.work_window(date, cal);
    if granularity_ms <= 0 || window.end <= window.start {
        return Vec::new();
    }

    let booked: Vec<Span> = rs
        .confirmed_overlapping(&window)
        .map(|b| b.span)
        .collect();

    let mut slots = Vec::with_capacity((window.duration_ms() / granularity_ms) as usize);
    let mut current = window.start;
    // bookings are sorted by start, so a cursor is enough
    let mut bi = 0;
    while current + granularity_ms <= window.end {
        let slot = Span::new(current, current + granularity_ms);
        while bi < booked.len() && booked[bi].end <= slot.start {
            bi += 1;
        }
        let occupied = booked[bi..]
            .iter()
            .take_while(|b| b.start < slot.end)
            .any(|b| b.overlaps(&slot));
        slots.push(TimeSlot {
            start: slot.start,
            end: slot.end,
            is_available: !occupied && slot.start >= now,
        });
        current += granularity_ms;
    }
    slots
}

/// Maximal free intervals of a day: the work window minus confirmed bookings
/// and minus whatever part of it has already elapsed.
pub fn free_windows(
    rs: &ResourceState,
    date: NaiveDate,
    cal: &Calendar,
    now: Ms,
    min_duration_ms: Option<Ms>,
) -> Vec<Span> {
    let window = rs.resource.work_window(date, cal);
    let start = window.start.max(now);
    if start >= window.end {
        return Vec::new();
    }
    let base = [Span::new(start, window.end)];

    let booked: Vec<Span> = rs
        .confirmed_overlapping(&base[0])
        .map(|b| Span::new(b.span.start.max(start), b.span.end.min(window.end)))
        .collect();
    let mut free = subtract_intervals(&base, &merge_overlapping(&booked));

    if let Some(min) = min_duration_ms {
        free.retain(|span| span.duration_ms() >= min);
    }
    free
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

// ── Click-to-select ───────────────────────────────────────────────

/// Next selection after the user clicks the slot starting at `clicked`.
///
/// - occupied (or unknown) slot: selection unchanged
/// - no selection: the clicked slot becomes the selection
/// - the selection's first slot: selection cleared
/// - a slot at or after the selection's end: extends through it when every
///   slot in between is free, otherwise unchanged
/// - anything else: a new selection on the clicked slot
pub fn extend_selection(slots: &[TimeSlot], current: Option<Span>, clicked: Ms) -> Option<Span> {
    let Some(slot) = slots.iter().find(|s| s.start == clicked) else {
        return current;
    };
    if !slot.is_available {
        return current;
    }
    let Some(selection) = current else {
        return Some(slot.span());
    };
    if slot.start == selection.start {
        return None;
    }
    if slot.start >= selection.end {
        let blocked = slots
            .iter()
            .any(|s| s.start >= selection.end && s.start < slot.end && !s.is_available);
        return if blocked {
            Some(selection)
        } else {
            Some(Span::new(selection.start, slot.end))
        };
    }
    Some(slot.span())
}
