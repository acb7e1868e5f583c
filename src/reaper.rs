use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that sends booking reminders once a minute.
pub async fn run_reminders(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let due = engine.collect_due_reminders(now_ms());
        if due.is_empty() {
            debug!("no bookings to remind about");
            continue;
        }
        let count = due.len();
        for notice in due {
            engine.notify.send(notice);
        }
        metrics::counter!(crate::observability::REMINDERS_SENT_TOTAL).increment(count as u64);
        info!("sent {count} booking reminders");
    }
}

/// Background task that sends each owner a summary of the day's bookings,
/// once per local day after the configured hour.
pub async fn run_daily_summaries(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let summaries = engine.collect_daily_summaries(now_ms()).await;
        if summaries.is_empty() {
            continue;
        }
        let count = summaries.len();
        for notice in summaries {
            engine.notify.send(notice);
        }
        metrics::counter!(crate::observability::DAILY_SUMMARIES_SENT_TOTAL)
            .increment(count as u64);
        info!("sent {count} daily booking summaries");
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Background task that compacts the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BookingRequest, EngineSettings, ResourceDraft};
    use crate::model::*;
    use crate::notify::{Notice, NotifyHub};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("intrabook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compactor_runs_past_threshold() {
        let path = test_wal_path("compactor.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(crate::engine::Engine::new(path, notify).unwrap());

        for i in 0..3 {
            engine
                .register_resource(
                    ResourceDraft::new(Ulid::new(), format!("Room {i}")),
                    &Caller::admin(),
                )
                .await
                .unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 3);

        let task = tokio::spawn(run_compactor(engine.clone(), 2));
        // first tick fires immediately
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if engine.wal_appends_since_compact().await == 0 {
                break;
            }
        }
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        task.abort();
    }

    #[tokio::test]
    async fn reminders_are_broadcast() {
        let path = test_wal_path("reminders.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(crate::engine::Engine::new(path, notify.clone()).unwrap());
        let mut all = notify.subscribe_all();

        let rid = Ulid::new();
        engine
            .register_resource(ResourceDraft::new(rid, "Boardroom"), &Caller::admin())
            .await
            .unwrap();
        let cal = engine.calendar();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let day = cal.date_of(now) + chrono::Duration::days(2);
        let start = cal.at(day, chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        let owner = Ulid::new();
        engine
            .create_booking(
                BookingRequest {
                    id: Ulid::new(),
                    resource_id: rid,
                    owner_id: owner,
                    title: "Quarterly review".into(),
                    starts_at: start,
                    ends_at: start + 60 * MINUTE_MS,
                    recurrence: None,
                },
                &Caller::user(owner),
            )
            .await
            .unwrap();

        // skip the registration and creation notices
        assert!(matches!(all.recv().await.unwrap(), Notice::Committed { .. }));
        assert!(matches!(all.recv().await.unwrap(), Notice::Committed { .. }));

        for notice in engine.collect_due_reminders(start - 30 * MINUTE_MS) {
            engine.notify.send(notice);
        }
        match all.recv().await.unwrap() {
            Notice::Reminder { owner_id, title, .. } => {
                assert_eq!(owner_id, owner);
                assert_eq!(title, "Quarterly review");
            }
            other => panic!("expected a reminder, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn daily_summaries_are_broadcast() {
        let path = test_wal_path("daily_summaries.wal");
        let settings = EngineSettings {
            summary_hour: 0,
            ..EngineSettings::default()
        };
        let today = settings.calendar.date_of(now_ms());
        let rid = Ulid::new();
        let owner = Ulid::new();
        let start = settings.calendar.at(today, chrono::NaiveTime::MIN);
        {
            let mut wal = crate::wal::Wal::open(&path).unwrap();
            wal.append(&Event::ResourceRegistered {
                resource: Resource {
                    id: rid,
                    name: "Focus room".into(),
                    work_hours_start: chrono::NaiveTime::MIN,
                    work_hours_end: chrono::NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
                    min_duration: 30,
                    max_duration: 240,
                    capacity: None,
                    active: true,
                },
            })
            .unwrap();
            wal.append(&Event::BookingCreated {
                booking: Booking {
                    id: Ulid::new(),
                    resource_id: rid,
                    owner_id: owner,
                    title: "Early sync".into(),
                    span: Span::new(start, start + 30 * MINUTE_MS),
                    status: BookingStatus::Confirmed,
                    recurrence_group_id: None,
                    recurrence_rule: None,
                },
            })
            .unwrap();
        }

        let notify = Arc::new(NotifyHub::new());
        let mut all = notify.subscribe_all();
        let engine = Arc::new(Engine::with_settings(path, notify, settings).unwrap());
        let task = tokio::spawn(run_daily_summaries(engine.clone()));

        let notice = tokio::time::timeout(Duration::from_secs(5), all.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            notice,
            Notice::DailySummary {
                owner_id: owner,
                count: 1,
                first_starts_at: start,
                resource_id: rid,
            }
        );
        task.abort();
    }
}
