use std::sync::Arc;

use chrono::NaiveTime;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::error::{StateError, ValidationError};
use super::recurrence::expand;
use super::validate::{now_ms, validate_booking, validate_timestamps, Candidate};
use super::{Engine, EngineError, WalCommand};

/// A resource definition as submitted to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDraft {
    pub id: Ulid,
    pub name: String,
    pub work_hours_start: NaiveTime,
    pub work_hours_end: NaiveTime,
    pub min_duration: u32,
    pub max_duration: u32,
    pub capacity: Option<u32>,
}

impl ResourceDraft {
    /// Draft with the portal's defaults: 09:00–21:00, 30 to 480 minutes.
    pub fn new(id: Ulid, name: impl Into<String>) -> Self {
        let (work_hours_start, work_hours_end) = Resource::default_work_hours();
        Self {
            id,
            name: name.into(),
            work_hours_start,
            work_hours_end,
            min_duration: Resource::DEFAULT_MIN_DURATION,
            max_duration: Resource::DEFAULT_MAX_DURATION,
            capacity: None,
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidResource("name must not be empty").into());
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if self.work_hours_end <= self.work_hours_start {
            return Err(
                ValidationError::InvalidResource("work hours must end after they start").into(),
            );
        }
        if self.min_duration == 0 || self.min_duration > self.max_duration {
            return Err(ValidationError::InvalidResource(
                "min_duration must be positive and not above max_duration",
            )
            .into());
        }
        Ok(())
    }

    fn into_resource(self, active: bool) -> Resource {
        Resource {
            id: self.id,
            name: self.name.trim().to_string(),
            work_hours_start: self.work_hours_start,
            work_hours_end: self.work_hours_end,
            min_duration: self.min_duration,
            max_duration: self.max_duration,
            capacity: self.capacity,
            active,
        }
    }
}

/// A request to book a resource, optionally recurring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    /// Id of the booking; for recurring requests also the group id.
    pub id: Ulid,
    pub resource_id: Ulid,
    pub owner_id: Ulid,
    pub title: String,
    pub starts_at: Ms,
    pub ends_at: Ms,
    pub recurrence: Option<RecurrenceRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOccurrence {
    pub span: Span,
    pub reason: EngineError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOutcome {
    pub created: Vec<Booking>,
    pub skipped: Vec<SkippedOccurrence>,
}

fn require_admin(caller: &Caller) -> Result<(), EngineError> {
    if caller.is_admin {
        Ok(())
    } else {
        Err(EngineError::Forbidden("only admins manage resources"))
    }
}

fn count_rejection(err: &EngineError) {
    if matches!(err, EngineError::Overlap(_)) {
        metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
    }
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    pub async fn register_resource(
        &self,
        draft: ResourceDraft,
        caller: &Caller,
    ) -> Result<Resource, EngineError> {
        require_admin(caller)?;
        draft.validate()?;

        let _catalog = self.catalog_lock.lock().await;
        if self.state.len() >= MAX_RESOURCES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if self.state.contains_key(&draft.id) {
            return Err(EngineError::AlreadyExists(draft.id));
        }

        let resource = draft.into_resource(true);
        let event = Event::ResourceRegistered {
            resource: resource.clone(),
        };
        self.wal_append(&event).await?;
        self.state.insert(
            resource.id,
            Arc::new(RwLock::new(ResourceState::new(resource.clone()))),
        );
        self.notify.committed(&event);
        info!(resource_id = %resource.id, name = %resource.name, "resource registered");
        Ok(resource)
    }

    /// Replace a resource's definition. Existing bookings are not re-validated.
    pub async fn update_resource(
        &self,
        draft: ResourceDraft,
        caller: &Caller,
    ) -> Result<Resource, EngineError> {
        require_admin(caller)?;
        draft.validate()?;
        let id = draft.id;
        let rs = self
            .resource_state(&id)
            .ok_or(EngineError::ResourceNotFound(id))?;
        let mut guard = rs.write().await;
        if !guard.resource.active {
            return Err(EngineError::ResourceNotFound(id));
        }

        let resource = draft.into_resource(true);
        let event = Event::ResourceUpdated {
            resource: resource.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(resource)
    }

    /// Hide a resource from the catalog. Its bookings stay readable.
    pub async fn deactivate_resource(&self, id: Ulid, caller: &Caller) -> Result<(), EngineError> {
        require_admin(caller)?;
        let rs = self
            .resource_state(&id)
            .ok_or(EngineError::ResourceNotFound(id))?;
        let mut guard = rs.write().await;
        if !guard.resource.active {
            return Err(EngineError::ResourceNotFound(id));
        }
        self.persist_and_apply(&mut guard, &Event::ResourceDeactivated { id })
            .await?;
        self.notify.remove(&id);
        info!(resource_id = %id, "resource deactivated");
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Book a resource once or on a recurrence rule.
    ///
    /// A single booking either commits or returns the first violation.
    /// Recurring requests are best-effort: occurrences are validated and
    /// committed in date order under one write lock, failures are reported in
    /// `skipped`, and only caller-level problems (permission, unknown resource,
    /// bad rule) fail the whole call.
    pub async fn create_booking(
        &self,
        req: BookingRequest,
        caller: &Caller,
    ) -> Result<CreateOutcome, EngineError> {
        if !caller.may_manage(req.owner_id) {
            return Err(EngineError::Forbidden("bookings can only be made for yourself"));
        }
        if req.title.len() > MAX_TITLE_LEN {
            return Err(EngineError::LimitExceeded("title too long"));
        }
        validate_timestamps(req.starts_at, req.ends_at)?;
        if self.booking_to_resource.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let rs = self
            .resource_state(&req.resource_id)
            .ok_or(EngineError::ResourceNotFound(req.resource_id))?;
        let mut guard = rs.write().await;
        if !guard.resource.active {
            return Err(EngineError::ResourceNotFound(req.resource_id));
        }

        let now = now_ms();
        let cal = self.settings.calendar;
        let mut outcome = CreateOutcome::default();

        let Some(rule) = req.recurrence.clone() else {
            if guard.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
                return Err(EngineError::LimitExceeded("too many bookings on resource"));
            }
            let span =
                validate_booking(&guard, req.starts_at, req.ends_at, Candidate::New, now, &cal)
                    .inspect_err(count_rejection)?;
            let booking = Booking {
                id: req.id,
                resource_id: req.resource_id,
                owner_id: req.owner_id,
                title: req.title,
                span,
                status: BookingStatus::Confirmed,
                recurrence_group_id: None,
                recurrence_rule: None,
            };
            self.persist_and_apply(&mut guard, &Event::BookingCreated { booking: booking.clone() })
                .await?;
            metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
            debug!(booking_id = %booking.id, resource_id = %booking.resource_id, "booking created");
            outcome.created.push(booking);
            return Ok(outcome);
        };

        if req.ends_at <= req.starts_at {
            return Err(ValidationError::EndBeforeStart.into());
        }
        let occurrences = expand(Span::new(req.starts_at, req.ends_at), &rule, &cal)?;
        if guard.bookings.len() + occurrences.len() > MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }

        for span in occurrences {
            match validate_booking(&guard, span.start, span.end, Candidate::New, now, &cal) {
                Ok(span) => {
                    let first = outcome.created.is_empty();
                    let booking = Booking {
                        id: if first { req.id } else { Ulid::new() },
                        resource_id: req.resource_id,
                        owner_id: req.owner_id,
                        title: req.title.clone(),
                        span,
                        status: BookingStatus::Confirmed,
                        recurrence_group_id: Some(req.id),
                        recurrence_rule: first.then(|| rule.clone()),
                    };
                    let event = Event::BookingCreated {
                        booking: booking.clone(),
                    };
                    self.persist_and_apply(&mut guard, &event).await?;
                    outcome.created.push(booking);
                }
                Err(reason) => {
                    count_rejection(&reason);
                    outcome.skipped.push(SkippedOccurrence { span, reason });
                }
            }
        }

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL)
            .increment(outcome.created.len() as u64);
        metrics::counter!(crate::observability::OCCURRENCES_SKIPPED_TOTAL)
            .increment(outcome.skipped.len() as u64);
        info!(
            group_id = %req.id,
            resource_id = %req.resource_id,
            created = outcome.created.len(),
            skipped = outcome.skipped.len(),
            "recurring booking processed"
        );
        Ok(outcome)
    }

    /// Move a confirmed booking's end later. Only its owner may do this.
    pub async fn extend_booking(
        &self,
        id: Ulid,
        new_ends_at: Ms,
        caller: &Caller,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let now = now_ms();
        let booking = guard
            .booking(&id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(id))?;

        if !caller.is(booking.owner_id) {
            return Err(EngineError::Forbidden("only the owner can extend a booking"));
        }
        check_confirmed(&booking, now)?;
        validate_timestamps(booking.span.start, new_ends_at)?;
        if new_ends_at <= booking.span.end {
            return Err(ValidationError::NotAnExtension.into());
        }

        let cal = self.settings.calendar;
        validate_booking(
            &guard,
            booking.span.start,
            new_ends_at,
            Candidate::Extension { booking_id: id },
            now,
            &cal,
        )
        .inspect_err(count_rejection)?;

        let event = Event::BookingExtended {
            id,
            resource_id: booking.resource_id,
            ends_at: new_ends_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!(booking_id = %id, ends_at = new_ends_at, "booking extended");

        guard
            .booking(&id)
            .map(|b| b.observed(now))
            .ok_or(EngineError::BookingNotFound(id))
    }

    /// Cancel a confirmed booking. Owners and admins may do this.
    pub async fn cancel_booking(&self, id: Ulid, caller: &Caller) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let now = now_ms();
        let booking = guard
            .booking(&id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(id))?;

        if !caller.may_manage(booking.owner_id) {
            return Err(EngineError::Forbidden("only the owner or an admin can cancel a booking"));
        }
        check_confirmed(&booking, now)?;

        let event = Event::BookingCancelled {
            id,
            resource_id: booking.resource_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!(booking_id = %id, "booking cancelled");

        guard
            .booking(&id)
            .map(|b| b.observed(now))
            .ok_or(EngineError::BookingNotFound(id))
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Every resource is read-locked until the compacted file is swapped in, so
    /// no append can land between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(handles.len());
        for rs in handles {
            guards.push(rs.read_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::ResourceRegistered {
                resource: guard.resource.clone(),
            });
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(guards);

        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn check_confirmed(booking: &Booking, now: Ms) -> Result<(), EngineError> {
    match booking.status_at(now) {
        BookingStatus::Confirmed => Ok(()),
        BookingStatus::Cancelled => Err(StateError::AlreadyCancelled(booking.id).into()),
        BookingStatus::Completed => Err(StateError::AlreadyCompleted(booking.id).into()),
    }
}
