use ulid::Ulid;

use crate::directory::Principal;
use crate::limits::*;
use crate::model::*;

use super::availability::is_open_at;
use super::conflict::{check_no_conflict, now_ts, validate_span};
use super::lifecycle::{ensure_mentor_of, ensure_student_of};
use super::{Engine, EngineError};

impl Engine {
    /// Student proposes a new window. The original window stays untouched
    /// (and keeps blocking the calendar) until the mentor approves.
    pub async fn request_reschedule(
        &self,
        caller: &Principal,
        session_id: Ulid,
        new_span: Span,
        reason: String,
    ) -> Result<Session, EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        validate_span(&new_span)?;
        let now = now_ts();
        if new_span.start <= now {
            return Err(EngineError::Validation(
                "new start must be in the future".to_string(),
            ));
        }

        let (mentor_id, mut guard) = self.resolve_session_write(&session_id).await?;
        let s = guard
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        ensure_student_of(caller, s)?;
        if !s.status.is_confirmed() {
            return Err(EngineError::InvalidState {
                current: s.status,
                attempted: "request a reschedule of",
            });
        }
        // is_confirmed excludes RescheduleRequested, so a second pending
        // proposal cannot arise; the guard above already covers it.
        if !is_open_at(&guard.rules, new_span.start) {
            return Err(EngineError::Validation(
                "mentor is not open at the proposed time".to_string(),
            ));
        }
        check_no_conflict(&guard, &new_span, Some(session_id))?;

        let event = Event::RescheduleRequested {
            id: session_id,
            mentor_id,
            requested_by: caller.id,
            requested_at: now,
            span: new_span,
            reason,
        };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        guard
            .session(session_id)
            .cloned()
            .ok_or(EngineError::NotFound(session_id))
    }

    /// Mentor accepts the proposal. Availability and conflicts are checked
    /// again here because the calendar may have drifted since the request;
    /// on success the window swap, the history entry and the status change
    /// land in one event.
    pub async fn approve_reschedule(
        &self,
        caller: &Principal,
        session_id: Ulid,
    ) -> Result<Session, EngineError> {
        let (mentor_id, mut guard) = self.resolve_session_write(&session_id).await?;
        let s = guard
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        ensure_mentor_of(caller, s)?;
        if s.status != SessionStatus::RescheduleRequested {
            return Err(EngineError::InvalidState {
                current: s.status,
                attempted: "approve a reschedule of",
            });
        }
        let proposal = s.reschedule_request.as_ref().ok_or(EngineError::InvalidState {
            current: s.status,
            attempted: "approve a reschedule of",
        })?;
        let new_span = proposal.span;
        if !is_open_at(&guard.rules, new_span.start) {
            return Err(EngineError::Validation(
                "mentor is no longer open at the proposed time".to_string(),
            ));
        }
        check_no_conflict(&guard, &new_span, Some(session_id))?;

        let event = Event::RescheduleApproved {
            id: session_id,
            mentor_id,
            resolved_at: now_ts(),
        };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        guard
            .session(session_id)
            .cloned()
            .ok_or(EngineError::NotFound(session_id))
    }

    /// Mentor declines the proposal: history gains a rejected entry, the
    /// pending request is cleared, and the original window stays in force.
    pub async fn reject_reschedule(
        &self,
        caller: &Principal,
        session_id: Ulid,
        reason: String,
    ) -> Result<Session, EngineError> {
        if reason.trim().is_empty() {
            return Err(EngineError::Validation("rejection reason required".to_string()));
        }
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let (mentor_id, mut guard) = self.resolve_session_write(&session_id).await?;
        let s = guard
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        ensure_mentor_of(caller, s)?;
        if s.status != SessionStatus::RescheduleRequested {
            return Err(EngineError::InvalidState {
                current: s.status,
                attempted: "reject a reschedule of",
            });
        }

        let event = Event::RescheduleRejected {
            id: session_id,
            mentor_id,
            resolved_at: now_ts(),
            reason,
        };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        guard
            .session(session_id)
            .cloned()
            .ok_or(EngineError::NotFound(session_id))
    }
}
