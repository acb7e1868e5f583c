use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Event, Ms};

const CHANNEL_CAPACITY: usize = 256;

/// What the notification module hears about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// A mutation was durably committed.
    Committed { event: Event },
    /// A confirmed booking starts soon.
    Reminder {
        booking_id: Ulid,
        resource_id: Ulid,
        owner_id: Ulid,
        title: String,
        starts_at: Ms,
    },
    /// An owner's confirmed bookings for the local day, sent once that morning.
    DailySummary {
        owner_id: Ulid,
        count: usize,
        first_starts_at: Ms,
        /// Resource of the first booking.
        resource_id: Ulid,
    },
}

impl Notice {
    pub fn resource_id(&self) -> Ulid {
        match self {
            Notice::Committed { event } => event.resource_id(),
            Notice::Reminder { resource_id, .. } => *resource_id,
            Notice::DailySummary { resource_id, .. } => *resource_id,
        }
    }

    /// JSON payload for external consumers.
    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Broadcast hub for booking notices, per resource plus a firehose.
///
/// Sends are fire-and-forget: a missing or lagging receiver never fails the sender.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notice>>,
    all: broadcast::Sender<Notice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to notices for a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every notice of the tenant.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Notice> {
        self.all.subscribe()
    }

    pub fn send(&self, notice: Notice) {
        if let Some(sender) = self.channels.get(&notice.resource_id()) {
            let _ = sender.send(notice.clone());
        }
        let _ = self.all.send(notice);
    }

    pub fn committed(&self, event: &Event) {
        self.send(Notice::Committed {
            event: event.clone(),
        });
    }

    /// Drop a resource's channel once it is deactivated.
    pub fn remove(&self, resource_id: &Ulid) {
        self.channels.remove(resource_id);
    }
}
