use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar::Calendar;

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Resource catalog ─────────────────────────────────────────────

/// A bookable resource as defined by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub name: String,
    pub work_hours_start: NaiveTime,
    pub work_hours_end: NaiveTime,
    /// Minutes.
    pub min_duration: u32,
    /// Minutes.
    pub max_duration: u32,
    /// Seats, informational only; bookings never share a resource.
    pub capacity: Option<u32>,
    pub active: bool,
}

impl Resource {
    pub const DEFAULT_MIN_DURATION: u32 = 30;
    pub const DEFAULT_MAX_DURATION: u32 = 480;

    pub fn default_work_hours() -> (NaiveTime, NaiveTime) {
        (
            NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            NaiveTime::from_hms_opt(21, 0, 0).unwrap_or(NaiveTime::MIN),
        )
    }

    /// The bookable window `[work_hours_start, work_hours_end)` on a local date.
    pub fn work_window(&self, date: NaiveDate, cal: &Calendar) -> Span {
        Span {
            start: cal.at(date, self.work_hours_start),
            end: cal.at(date, self.work_hours_end),
        }
    }

    pub fn min_duration_ms(&self) -> Ms {
        self.min_duration as Ms * MINUTE_MS
    }

    pub fn max_duration_ms(&self) -> Ms {
        self.max_duration as Ms * MINUTE_MS
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
    /// Never stored; derived at read time once a confirmed booking has ended.
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" | "canceled" => Some(BookingStatus::Cancelled),
            "completed" => Some(BookingStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrenceKind {
    Daily,
    Weekly,
}

/// Set of weekdays as a bitmask, Monday = bit 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DaySet(u8);

impl DaySet {
    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Weekdays in Monday-first order.
    pub fn days(&self) -> impl Iterator<Item = Weekday> + '_ {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .filter(|d| self.contains(*d))
    }
}

impl FromIterator<Weekday> for DaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = DaySet::default();
        for day in iter {
            set.insert(day);
        }
        set
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub kind: RecurrenceKind,
    /// Required and non-empty for weekly rules; ignored for daily.
    pub days_of_week: DaySet,
    /// Last local date that may carry an occurrence.
    pub until: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub owner_id: Ulid,
    pub title: String,
    pub span: Span,
    /// Stored status is `Confirmed` or `Cancelled`.
    pub status: BookingStatus,
    pub recurrence_group_id: Option<Ulid>,
    /// Only set on the first occurrence of a series.
    pub recurrence_rule: Option<RecurrenceRule>,
}

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }

    /// Status as seen by a reader at `now`.
    pub fn status_at(&self, now: Ms) -> BookingStatus {
        match self.status {
            BookingStatus::Confirmed if self.span.end < now => BookingStatus::Completed,
            other => other,
        }
    }

    /// A copy carrying the read-time status.
    pub fn observed(&self, now: Ms) -> Booking {
        Booking {
            status: self.status_at(now),
            ..self.clone()
        }
    }
}

/// Who is asking. Passed explicitly into every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<Ulid>,
    pub is_admin: bool,
}

impl Caller {
    pub fn user(id: Ulid) -> Self {
        Self {
            user_id: Some(id),
            is_admin: false,
        }
    }

    pub fn admin() -> Self {
        Self {
            user_id: None,
            is_admin: true,
        }
    }

    pub fn is(&self, user_id: Ulid) -> bool {
        self.user_id == Some(user_id)
    }

    /// Owners manage their own bookings; admins manage everyone's.
    pub fn may_manage(&self, owner_id: Ulid) -> bool {
        self.is_admin || self.is(owner_id)
    }
}

// ── Per-resource state ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: Resource,
    /// Every booking ever made on the resource (cancelled included), sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl ResourceState {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            bookings: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.resource.id
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Bookings (any status) whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Confirmed bookings overlapping the query window.
    pub fn confirmed_overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        self.overlapping(query).filter(|b| b.is_confirmed())
    }
}

/// The WAL record format. Each variant is one committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        resource: Resource,
    },
    ResourceUpdated {
        resource: Resource,
    },
    ResourceDeactivated {
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingExtended {
        id: Ulid,
        resource_id: Ulid,
        ends_at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        resource_id: Ulid,
    },
}

impl Event {
    /// The resource an event touches.
    pub fn resource_id(&self) -> Ulid {
        match self {
            Event::ResourceRegistered { resource } | Event::ResourceUpdated { resource } => {
                resource.id
            }
            Event::ResourceDeactivated { id } => *id,
            Event::BookingCreated { booking } => booking.resource_id,
            Event::BookingExtended { resource_id, .. }
            | Event::BookingCancelled { resource_id, .. } => *resource_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// One cell of a day's availability grid. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub start: Ms,
    pub end: Ms,
    pub is_available: bool,
}

impl TimeSlot {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAvailability {
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub work_hours_start: NaiveTime,
    pub work_hours_end: NaiveTime,
    pub slots: Vec<TimeSlot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub resource_id: Option<Ulid>,
    pub owner_id: Option<Ulid>,
    /// `None` means everything except cancelled.
    pub status: Option<BookingStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub upcoming: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingStats {
    pub total: u64,
    pub today: u64,
    pub this_week: u64,
    pub this_month: u64,
    pub my_upcoming: u64,
    pub my_total: u64,
}
