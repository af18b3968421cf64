use chrono::{Datelike, Duration, NaiveDate};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::rule_for;
use super::conflict::check_no_conflict;
use super::{Engine, EngineError};

/// Enumerate hourly slots for one mentor over `horizon_days` calendar days
/// starting at `from`. Days without an effective rule contribute nothing;
/// days with a rule emit one slot per whole hour in its bounds, free iff the
/// rule is available and no non-terminal session overlaps. A pure, read-only
/// projection: safe to recompute at any time.
pub fn generate_slots(
    ms: &MentorState,
    from: NaiveDate,
    horizon_days: u32,
    exclude: Option<Ulid>,
) -> Vec<Slot> {
    let mut slots = Vec::new();
    for offset in 0..horizon_days {
        let Some(date) = from.checked_add_signed(Duration::days(offset as i64)) else {
            break;
        };
        let day = day_index(date.weekday());
        let Some(rule) = rule_for(&ms.rules, day) else {
            continue;
        };
        for hour in rule.start_hour..rule.end_hour {
            let Some(start) = date.and_hms_opt(hour as u32, 0, 0) else {
                continue;
            };
            let span = Span::new(start, start + Duration::hours(1));
            let available = rule.available && check_no_conflict(ms, &span, exclude).is_ok();
            slots.push(Slot {
                date,
                day,
                hour,
                available,
            });
        }
    }
    slots
}

impl Engine {
    pub async fn generate_slots(
        &self,
        mentor_id: Ulid,
        from: NaiveDate,
        horizon_days: u32,
        exclude_session: Option<Ulid>,
    ) -> Result<Vec<Slot>, EngineError> {
        if horizon_days > MAX_HORIZON_DAYS {
            return Err(EngineError::LimitExceeded("horizon too wide"));
        }
        let ms = self
            .get_mentor(&mentor_id)
            .ok_or(EngineError::NotFound(mentor_id))?;
        let guard = ms.read().await;
        Ok(generate_slots(&guard, from, horizon_days, exclude_session))
    }
}
