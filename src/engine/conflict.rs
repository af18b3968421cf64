use chrono::{Datelike, Local};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// The canonical clock: server-local naive time.
pub(crate) fn now_ts() -> Ts {
    Local::now().naive_local()
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::Validation(
            "start must be before end".to_string(),
        ));
    }
    if span.start.year() < MIN_VALID_YEAR || span.end.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let minutes = span.duration_minutes();
    if minutes < MIN_SESSION_MINUTES {
        return Err(EngineError::Validation("session too short".to_string()));
    }
    if minutes > MAX_SESSION_MINUTES {
        return Err(EngineError::LimitExceeded("session too long"));
    }
    Ok(())
}

/// The double-booking guard: any session in a non-terminal status whose
/// window overlaps `span` blocks it. `exclude` lets a reschedule check skip
/// the session being moved. Callers hold the mentor lock; the check and the
/// commit that follows form one critical section.
pub(crate) fn check_no_conflict(
    ms: &MentorState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for session in ms.overlapping(span) {
        if exclude == Some(session.id) {
            continue;
        }
        if session.status.blocks_slot() {
            return Err(EngineError::Conflict(session.id));
        }
    }
    Ok(())
}
