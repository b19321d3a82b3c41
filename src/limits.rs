//! Hard input bounds, enforced at engine entry points.

use crate::model::{DAY_MS, Ms};

/// 2000-01-01T00:00:00Z. Session times before this are client bugs.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// One class session never spans more than a day.
pub const MAX_SESSION_DURATION_MS: Ms = DAY_MS;
/// Calendar and ranking queries refuse windows wider than this.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

pub const MAX_CODE_LEN: usize = 32;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_EMAIL_LEN: usize = 254;

/// A week has 168 hours; a larger weekly hour limit is a unit mistake.
pub const MAX_WEEK_HOURS: f64 = 168.0;
/// More weekly substitutions than half-hour slots in a week is likewise.
pub const MAX_WEEK_SUBSTITUTIONS: u32 = 336;

// Entity caps.
pub const MAX_QUALIFICATIONS: usize = 10_000;
pub const MAX_SUBJECTS: usize = 50_000;
pub const MAX_LECTURERS: usize = 100_000;
pub const MAX_SESSIONS: usize = 1_000_000;

/// One request line on the wire. Longer lines close the connection.
pub const MAX_LINE_BYTES: usize = 64 * 1024;
