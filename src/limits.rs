//! Hard bounds on user-supplied input. Breaches surface as
//! `EngineError::LimitExceeded`, never as panics or silent truncation.

use chrono::Duration;

pub const MAX_PRINCIPALS: usize = 100_000;
pub const MAX_LOGIN_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 128;

pub const MAX_RULES_PER_MENTOR: usize = 64;
pub const MAX_SESSIONS_PER_MENTOR: usize = 10_000;

pub const MAX_SUBJECT_LEN: usize = 200;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_FEEDBACK_LEN: usize = 2_000;

/// Sessions may not be shorter than a minute or longer than a working day.
pub const MIN_SESSION_MINUTES: i64 = 1;
pub const MAX_SESSION_MINUTES: i64 = 480;

/// Booking without an explicit end gets the platform's one-hour slot.
pub const DEFAULT_SESSION_MINUTES: i64 = 60;

/// Timestamps outside this year range are rejected as garbage input.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2100;

/// Slot generation horizon cap.
pub const MAX_HORIZON_DAYS: u32 = 60;

/// A mentor may start a session at most this early.
pub fn start_grace() -> Duration {
    Duration::minutes(10)
}

/// Join opens this long before the scheduled start...
pub fn join_opens_before() -> Duration {
    Duration::minutes(10)
}

/// ...and stays open this long after it.
pub fn join_expires_after() -> Duration {
    Duration::hours(3)
}
