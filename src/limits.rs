use crate::model::Ms;

const HOUR_MS: Ms = 3_600_000;
const DAY_MS: Ms = 24 * HOUR_MS;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// A single lecture may not run longer than one day.
pub const MAX_LECTURE_DURATION_MS: Ms = DAY_MS;
/// Widest window accepted by calendar and free-window queries.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_ROOM_LEN: usize = 64;
pub const MAX_STUDENTS_PER_LECTURE: usize = 1_000;
pub const MAX_BATCH_SIZE: usize = 1_000;
pub const MAX_QUERY_RESOURCES: usize = 64;
