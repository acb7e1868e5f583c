use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use chrono::{Datelike, NaiveDate, Timelike};
use ulid::Ulid;

use crate::calendar::Calendar;
use crate::limits::*;
use crate::model::*;
use crate::notify::Notice;

use super::availability::{day_slots, free_windows};
use super::validate::now_ms;
use super::{Engine, EngineError, SharedResourceState};

/// Reminders go out when a booking's start is within this much of the lead time.
const REMINDER_SLACK_MS: Ms = 5 * MINUTE_MS;

impl Engine {
    async fn active_resource(&self, id: Ulid) -> Result<SharedResourceState, EngineError> {
        let rs = self
            .resource_state(&id)
            .ok_or(EngineError::ResourceNotFound(id))?;
        if !rs.read().await.resource.active {
            return Err(EngineError::ResourceNotFound(id));
        }
        Ok(rs)
    }

    /// Slot grid of a resource for one local date.
    pub async fn get_availability(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<DayAvailability, EngineError> {
        let rs = self.active_resource(resource_id).await?;
        let guard = rs.read().await;
        let slots = day_slots(
            &guard,
            date,
            &self.settings.calendar,
            self.settings.slot_ms(),
            now_ms(),
        );
        Ok(DayAvailability {
            resource_id,
            date,
            work_hours_start: guard.resource.work_hours_start,
            work_hours_end: guard.resource.work_hours_end,
            slots,
        })
    }

    /// Maximal free intervals of a resource's day, optionally at least `min_minutes` long.
    pub async fn free_windows(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        min_minutes: Option<u32>,
    ) -> Result<Vec<Span>, EngineError> {
        let rs = self.active_resource(resource_id).await?;
        let guard = rs.read().await;
        Ok(free_windows(
            &guard,
            date,
            &self.settings.calendar,
            now_ms(),
            min_minutes.map(|m| m as Ms * MINUTE_MS),
        ))
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let guard = self.resolve_booking_read(&id).await?;
        guard
            .booking(&id)
            .map(|b| b.observed(now_ms()))
            .ok_or(EngineError::BookingNotFound(id))
    }

    /// Bookings matching `filter`, ordered by start.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, EngineError> {
        if let (Some(from), Some(to)) = (filter.from, filter.to)
            && (to - from).num_days() > MAX_QUERY_DAYS
        {
            return Err(EngineError::LimitExceeded("date range too wide"));
        }

        let now = now_ms();
        let cal = self.settings.calendar;
        let handles: Vec<SharedResourceState> = match filter.resource_id {
            Some(id) => self.resource_state(&id).into_iter().collect(),
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };

        let mut result = Vec::new();
        for rs in handles {
            let guard = rs.read().await;
            for booking in &guard.bookings {
                if filter.owner_id.is_some_and(|o| o != booking.owner_id) {
                    continue;
                }
                let status_ok = match filter.status {
                    Some(status) => booking.status_at(now) == status,
                    None => booking.is_confirmed(),
                };
                if !status_ok {
                    continue;
                }
                let date = cal.date_of(booking.span.start);
                if filter.from.is_some_and(|from| date < from)
                    || filter.to.is_some_and(|to| date > to)
                {
                    continue;
                }
                if filter.upcoming && booking.span.end < now {
                    continue;
                }
                result.push(booking.observed(now));
            }
        }
        result.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id)));
        Ok(result)
    }

    /// Counts for the dashboard. Period counts cover confirmed bookings whose
    /// local start date falls in or after the current day, week or month.
    pub async fn booking_stats(&self, caller: &Caller) -> BookingStats {
        let now = now_ms();
        let cal = self.settings.calendar;
        let today = cal.date_of(now);
        let week_start = Calendar::week_start(today);
        let month_start = Calendar::month_start(today);

        let handles: Vec<SharedResourceState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        let mut stats = BookingStats::default();
        for rs in handles {
            let guard = rs.read().await;
            for booking in &guard.bookings {
                let mine = caller.is(booking.owner_id);
                if mine {
                    stats.my_total += 1;
                }
                if !booking.is_confirmed() {
                    continue;
                }
                let date = cal.date_of(booking.span.start);
                stats.total += 1;
                if date == today {
                    stats.today += 1;
                }
                if date >= week_start {
                    stats.this_week += 1;
                }
                if date >= month_start {
                    stats.this_month += 1;
                }
                if mine && booking.span.end >= now {
                    stats.my_upcoming += 1;
                }
            }
        }
        stats
    }

    /// Reminder notices for confirmed bookings starting about
    /// `reminder_lead_minutes` from `now`. Each booking is returned once.
    pub fn collect_due_reminders(&self, now: Ms) -> Vec<Notice> {
        let lead = self.settings.reminder_lead_minutes as Ms * MINUTE_MS;
        let (lower, upper) = (now + lead - REMINDER_SLACK_MS, now + lead + REMINDER_SLACK_MS);
        let search = Span::new(lower, upper + 1);

        self.reminded.retain(|_, starts_at| *starts_at >= now);

        let mut due = Vec::new();
        for entry in self.state.iter() {
            let rs = entry.value().clone();
            // Busy resources are picked up by a later sweep.
            let Ok(guard) = rs.try_read() else { continue };
            for booking in guard.confirmed_overlapping(&search) {
                let start = booking.span.start;
                if start <= lower || start > upper {
                    continue;
                }
                if self.reminded.insert(booking.id, start).is_some() {
                    continue;
                }
                due.push(Notice::Reminder {
                    booking_id: booking.id,
                    resource_id: booking.resource_id,
                    owner_id: booking.owner_id,
                    title: booking.title.clone(),
                    starts_at: start,
                });
            }
        }
        due
    }

    /// One summary per owner of the confirmed bookings starting on today's
    /// local date. Empty before `summary_hour` and after the day has been
    /// summarized once.
    pub async fn collect_daily_summaries(&self, now: Ms) -> Vec<Notice> {
        let cal = self.settings.calendar;
        if cal.time_of(now).hour() < self.settings.summary_hour {
            return Vec::new();
        }
        let today = cal.date_of(now);
        let day_number = today.num_days_from_ce();
        if self.summarized_day.fetch_max(day_number, Ordering::AcqRel) >= day_number {
            return Vec::new();
        }

        let day = cal.day_span(today);
        // owner -> (count, first start, its resource)
        let mut per_owner: BTreeMap<Ulid, (usize, Ms, Ulid)> = BTreeMap::new();
        let handles: Vec<SharedResourceState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        for rs in handles {
            let guard = rs.read().await;
            for booking in guard.confirmed_overlapping(&day) {
                if booking.span.start < day.start || booking.span.start >= day.end {
                    continue;
                }
                per_owner
                    .entry(booking.owner_id)
                    .and_modify(|(count, first, resource)| {
                        *count += 1;
                        if booking.span.start < *first {
                            *first = booking.span.start;
                            *resource = booking.resource_id;
                        }
                    })
                    .or_insert((1, booking.span.start, booking.resource_id));
            }
        }

        per_owner
            .into_iter()
            .map(|(owner_id, (count, first_starts_at, resource_id))| Notice::DailySummary {
                owner_id,
                count,
                first_starts_at,
                resource_id,
            })
            .collect()
    }
}
