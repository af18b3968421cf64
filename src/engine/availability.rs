use crate::model::*;

// ── Availability model ────────────────────────────────────────────
//
// A mentor's weekly calendar is a flat rule list; several rules may name the
// same day and the LAST one wins. Openness is hour-granular, matching the
// platform's one-hour slot convention.

/// The effective rule for a day-of-week, if any.
pub fn rule_for(rules: &[AvailabilityRule], day: u8) -> Option<&AvailabilityRule> {
    rules.iter().rev().find(|r| r.day == day)
}

/// Is the mentor nominally open at this instant? True iff the effective rule
/// for the instant's day is available and the instant's hour lies within
/// `[start_hour, end_hour)`.
pub fn is_open_at(rules: &[AvailabilityRule], instant: Ts) -> bool {
    let Some(rule) = rule_for(rules, weekday_of(instant)) else {
        return false;
    };
    let hour = hour_of(instant);
    rule.available && rule.start_hour <= hour && hour < rule.end_hour
}
