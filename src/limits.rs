use crate::model::Ms;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_RESOURCES_PER_TENANT: usize = 10_000;
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 100_000;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_TITLE_LEN: usize = 200;

/// Upper bound on occurrences produced by a single recurrence rule (one year of dailies).
pub const MAX_OCCURRENCES: usize = 366;

/// Widest date range accepted by listing queries.
pub const MAX_QUERY_DAYS: i64 = 366;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MIN_SLOT_MINUTES: u32 = 5;
pub const MAX_SLOT_MINUTES: u32 = 240;

/// Largest encoded event a WAL frame may carry. Longer length prefixes are corruption.
pub const MAX_EVENT_BYTES: usize = 64 * 1024;
