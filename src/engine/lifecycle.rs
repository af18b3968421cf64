use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::directory::{Principal, Role};
use crate::limits::*;
use crate::model::*;

use super::availability::is_open_at;
use super::conflict::{check_no_conflict, now_ts, validate_span};
use super::{Engine, EngineError};

// ── Role guards ──────────────────────────────────────────────────
//
// Checked at the operation boundary. Admin passes every guard; ownership is
// id equality against the session record.

pub(super) fn ensure_admin(caller: &Principal) -> Result<(), EngineError> {
    match caller.role {
        Role::Admin => Ok(()),
        _ => Err(EngineError::Forbidden("administrator only")),
    }
}

pub(super) fn ensure_mentor_of(caller: &Principal, session: &Session) -> Result<(), EngineError> {
    match caller.role {
        Role::Admin => Ok(()),
        Role::Mentor if caller.id == session.mentor_id => Ok(()),
        _ => Err(EngineError::Forbidden("only the session's mentor may do this")),
    }
}

pub(super) fn ensure_student_of(caller: &Principal, session: &Session) -> Result<(), EngineError> {
    match caller.role {
        Role::Admin => Ok(()),
        Role::Student if caller.id == session.student_id => Ok(()),
        _ => Err(EngineError::Forbidden("only the session's student may do this")),
    }
}

pub(super) fn ensure_party(caller: &Principal, session: &Session) -> Result<(), EngineError> {
    match caller.role {
        Role::Admin => Ok(()),
        _ if session.is_party(caller.id) => Ok(()),
        _ => Err(EngineError::Forbidden("not a party to this session")),
    }
}

fn ensure_mentor_self(caller: &Principal, mentor_id: Ulid) -> Result<(), EngineError> {
    match caller.role {
        Role::Admin => Ok(()),
        Role::Mentor if caller.id == mentor_id => Ok(()),
        _ => Err(EngineError::Forbidden("mentors manage only their own availability")),
    }
}

impl Engine {
    // ── Directory administration ─────────────────────────────────

    pub async fn register_mentor(
        &self,
        caller: &Principal,
        id: Ulid,
        login: String,
        name: String,
    ) -> Result<(), EngineError> {
        ensure_admin(caller)?;
        self.validate_registration(id, &login, &name)?;

        let event = Event::MentorRegistered {
            id,
            login: login.clone(),
            name: name.clone(),
        };
        self.wal_append(&event).await?;
        self.directory.insert(Principal {
            id,
            role: Role::Mentor,
            login,
            name,
        });
        self.state
            .insert(id, Arc::new(RwLock::new(MentorState::new(id))));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn register_student(
        &self,
        caller: &Principal,
        id: Ulid,
        login: String,
        name: String,
    ) -> Result<(), EngineError> {
        ensure_admin(caller)?;
        self.validate_registration(id, &login, &name)?;

        let event = Event::StudentRegistered {
            id,
            login: login.clone(),
            name: name.clone(),
        };
        self.wal_append(&event).await?;
        self.directory.insert(Principal {
            id,
            role: Role::Student,
            login,
            name,
        });
        Ok(())
    }

    fn validate_registration(&self, id: Ulid, login: &str, name: &str) -> Result<(), EngineError> {
        if self.directory.len() >= MAX_PRINCIPALS {
            return Err(EngineError::LimitExceeded("too many principals"));
        }
        if login.is_empty() || login.len() > MAX_LOGIN_LEN {
            return Err(EngineError::Validation("bad login length".to_string()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        if self.directory.contains(id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.directory.login_taken(login) {
            return Err(EngineError::LoginTaken(login.to_string()));
        }
        Ok(())
    }

    // ── Availability rules ───────────────────────────────────────

    pub async fn set_rule(
        &self,
        caller: &Principal,
        mentor_id: Ulid,
        rule: AvailabilityRule,
    ) -> Result<(), EngineError> {
        ensure_mentor_self(caller, mentor_id)?;
        if rule.day > 6 {
            return Err(EngineError::Validation("day must be 0..=6".to_string()));
        }
        if rule.start_hour >= rule.end_hour || rule.end_hour > 24 {
            return Err(EngineError::Validation(
                "hours must satisfy 0 <= start < end <= 24".to_string(),
            ));
        }
        let ms = self
            .get_mentor(&mentor_id)
            .ok_or(EngineError::NotFound(mentor_id))?;
        let mut guard = ms.write().await;
        if guard.rules.len() >= MAX_RULES_PER_MENTOR {
            return Err(EngineError::LimitExceeded("too many availability rules"));
        }

        let event = Event::RuleSet { mentor_id, rule };
        self.persist_and_apply(mentor_id, &mut guard, &event).await
    }

    pub async fn clear_rule(
        &self,
        caller: &Principal,
        mentor_id: Ulid,
        day: u8,
    ) -> Result<(), EngineError> {
        ensure_mentor_self(caller, mentor_id)?;
        let ms = self
            .get_mentor(&mentor_id)
            .ok_or(EngineError::NotFound(mentor_id))?;
        let mut guard = ms.write().await;
        if !guard.rules.iter().any(|r| r.day == day) {
            return Err(EngineError::Validation(format!("no rule for day {day}")));
        }

        let event = Event::RuleCleared { mentor_id, day };
        self.persist_and_apply(mentor_id, &mut guard, &event).await
    }

    // ── Booking ──────────────────────────────────────────────────

    /// Create a session in `requested`. The open-hour check, the conflict
    /// check and the commit all happen under one write hold on the mentor,
    /// so two overlapping books cannot both pass.
    #[allow(clippy::too_many_arguments)]
    pub async fn book(
        &self,
        caller: &Principal,
        id: Ulid,
        mentor_id: Ulid,
        student_id: Ulid,
        span: Span,
        subject: String,
        student_choice: StudentChoice,
    ) -> Result<Session, EngineError> {
        match caller.role {
            Role::Admin => {}
            Role::Student if caller.id == student_id => {}
            _ => return Err(EngineError::Forbidden("students book their own sessions")),
        }
        let student = self
            .directory
            .get(student_id)
            .ok_or(EngineError::NotFound(student_id))?;
        if student.role != Role::Student {
            return Err(EngineError::Validation(
                "student_id does not name a student".to_string(),
            ));
        }
        if subject.trim().is_empty() {
            return Err(EngineError::Validation("subject required".to_string()));
        }
        if subject.len() > MAX_SUBJECT_LEN {
            return Err(EngineError::LimitExceeded("subject too long"));
        }
        validate_span(&span)?;
        let now = now_ts();
        if span.start <= now {
            return Err(EngineError::Validation(
                "start must be in the future".to_string(),
            ));
        }
        if self.session_to_mentor.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let ms = self
            .get_mentor(&mentor_id)
            .ok_or(EngineError::NotFound(mentor_id))?;
        let mut guard = ms.write().await;
        if guard.sessions.len() >= MAX_SESSIONS_PER_MENTOR {
            return Err(EngineError::LimitExceeded("too many sessions for mentor"));
        }
        if !is_open_at(&guard.rules, span.start) {
            return Err(EngineError::Validation(
                "mentor is not open at that time".to_string(),
            ));
        }
        check_no_conflict(&guard, &span, None)?;

        let event = Event::SessionRequested {
            id,
            mentor_id,
            student_id,
            span,
            subject,
            student_choice,
            requested_at: now,
        };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        guard.session(id).cloned().ok_or(EngineError::NotFound(id))
    }

    // ── Mentor decisions ─────────────────────────────────────────

    /// Approve a requested session. The conflict is re-checked at approval
    /// time (another session may have been approved in the interim), and the
    /// meeting link is provisioned OUTSIDE the mentor lock with a bounded
    /// timeout; status and link land in one event, so an aborted caller
    /// leaves either the pre- or the post-transition state.
    pub async fn approve(
        &self,
        caller: &Principal,
        session_id: Ulid,
    ) -> Result<Session, EngineError> {
        // Phase 1: validate under a read hold, then release for provisioning.
        let (topic, span) = {
            let (_, guard) = self.resolve_session_read(&session_id).await?;
            let s = guard
                .session(session_id)
                .ok_or(EngineError::NotFound(session_id))?;
            ensure_mentor_of(caller, s)?;
            if s.status != SessionStatus::Requested {
                return Err(EngineError::InvalidState {
                    current: s.status,
                    attempted: "approve",
                });
            }
            check_no_conflict(&guard, &s.span, Some(session_id))?;
            (s.subject.clone(), s.span)
        };

        // Never fails: provisioning errors degrade to the fallback link.
        let meeting = self.meetings.provision(&topic, span, session_id).await;

        // Phase 2: re-validate (state may have moved while unlocked), commit.
        let (mentor_id, mut guard) = self.resolve_session_write(&session_id).await?;
        let s = guard
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        if s.status != SessionStatus::Requested {
            return Err(EngineError::InvalidState {
                current: s.status,
                attempted: "approve",
            });
        }
        check_no_conflict(&guard, &s.span, Some(session_id))?;

        let event = Event::SessionApproved {
            id: session_id,
            mentor_id,
            approved_at: now_ts(),
            meeting,
        };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        guard
            .session(session_id)
            .cloned()
            .ok_or(EngineError::NotFound(session_id))
    }

    pub async fn reject(
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
        if s.status != SessionStatus::Requested {
            return Err(EngineError::InvalidState {
                current: s.status,
                attempted: "reject",
            });
        }

        let event = Event::SessionRejected {
            id: session_id,
            mentor_id,
            rejected_at: now_ts(),
            reason,
        };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        guard
            .session(session_id)
            .cloned()
            .ok_or(EngineError::NotFound(session_id))
    }

    /// Mark an approved session active. Allowed from 10 minutes before the
    /// scheduled start; earlier attempts are not ready yet.
    pub async fn start(
        &self,
        caller: &Principal,
        session_id: Ulid,
    ) -> Result<Session, EngineError> {
        let (mentor_id, mut guard) = self.resolve_session_write(&session_id).await?;
        let s = guard
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        ensure_mentor_of(caller, s)?;
        if !s.status.is_confirmed() {
            return Err(EngineError::InvalidState {
                current: s.status,
                attempted: "start",
            });
        }
        let now = now_ts();
        let opens_at = s.span.start - start_grace();
        if now < opens_at {
            return Err(EngineError::NotReady(opens_at));
        }

        let event = Event::SessionStarted {
            id: session_id,
            mentor_id,
            started_at: now,
        };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        guard
            .session(session_id)
            .cloned()
            .ok_or(EngineError::NotFound(session_id))
    }

    pub async fn complete(
        &self,
        caller: &Principal,
        session_id: Ulid,
    ) -> Result<Session, EngineError> {
        let (mentor_id, mut guard) = self.resolve_session_write(&session_id).await?;
        let s = guard
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        ensure_mentor_of(caller, s)?;
        if s.status != SessionStatus::Active && !s.status.is_confirmed() {
            return Err(EngineError::InvalidState {
                current: s.status,
                attempted: "complete",
            });
        }

        let event = Event::SessionCompleted {
            id: session_id,
            mentor_id,
            completed_at: now_ts(),
        };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        guard
            .session(session_id)
            .cloned()
            .ok_or(EngineError::NotFound(session_id))
    }

    /// Either party may cancel before the session goes active; an active
    /// session is only cancellable by admin override.
    pub async fn cancel(
        &self,
        caller: &Principal,
        session_id: Ulid,
    ) -> Result<Session, EngineError> {
        let (mentor_id, mut guard) = self.resolve_session_write(&session_id).await?;
        let s = guard
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        ensure_party(caller, s)?;
        match s.status {
            SessionStatus::Requested
            | SessionStatus::Approved
            | SessionStatus::Scheduled
            | SessionStatus::RescheduleRequested => {}
            SessionStatus::Active if caller.role == Role::Admin => {}
            _ => {
                return Err(EngineError::InvalidState {
                    current: s.status,
                    attempted: "cancel",
                });
            }
        }

        let event = Event::SessionCancelled {
            id: session_id,
            mentor_id,
            cancelled_by: caller.id,
            cancelled_at: now_ts(),
        };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        guard
            .session(session_id)
            .cloned()
            .ok_or(EngineError::NotFound(session_id))
    }

    // ── Post-completion ──────────────────────────────────────────

    pub async fn rate(
        &self,
        caller: &Principal,
        session_id: Ulid,
        rating: u8,
        feedback: Option<String>,
    ) -> Result<Session, EngineError> {
        if !(1..=5).contains(&rating) {
            return Err(EngineError::Validation("rating must be 1..=5".to_string()));
        }
        if let Some(ref f) = feedback
            && f.len() > MAX_FEEDBACK_LEN
        {
            return Err(EngineError::LimitExceeded("feedback too long"));
        }
        let (mentor_id, mut guard) = self.resolve_session_write(&session_id).await?;
        let s = guard
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        ensure_student_of(caller, s)?;
        if s.status != SessionStatus::Completed {
            return Err(EngineError::InvalidState {
                current: s.status,
                attempted: "rate",
            });
        }
        if s.rating.is_some() {
            return Err(EngineError::Validation("session already rated".to_string()));
        }

        let event = Event::SessionRated {
            id: session_id,
            mentor_id,
            rating,
            feedback,
        };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        guard
            .session(session_id)
            .cloned()
            .ok_or(EngineError::NotFound(session_id))
    }

    /// Hard delete. An owner/admin action outside the state machine; the
    /// lifecycle itself never deletes.
    pub async fn delete_session(
        &self,
        caller: &Principal,
        session_id: Ulid,
    ) -> Result<(), EngineError> {
        let (mentor_id, mut guard) = self.resolve_session_write(&session_id).await?;
        let s = guard
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        ensure_party(caller, s)?;

        let event = Event::SessionDeleted {
            id: session_id,
            mentor_id,
        };
        self.persist_and_apply(mentor_id, &mut guard, &event).await
    }

    // ── Join ─────────────────────────────────────────────────────

    /// Join-link lookup, gated on status and the join window: from 10
    /// minutes before start to 3 hours after start.
    pub async fn join_info(
        &self,
        caller: &Principal,
        session_id: Ulid,
    ) -> Result<JoinInfo, EngineError> {
        let (_, guard) = self.resolve_session_read(&session_id).await?;
        let s = guard
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        ensure_party(caller, s)?;
        if !s.status.is_confirmed() {
            return Err(EngineError::InvalidState {
                current: s.status,
                attempted: "join",
            });
        }
        let now = now_ts();
        let opens_at = s.span.start - join_opens_before();
        let closes_at = s.span.start + join_expires_after();
        if now < opens_at {
            return Err(EngineError::NotReady(opens_at));
        }
        if now > closes_at {
            return Err(EngineError::Expired(closes_at));
        }
        let meeting = s.meeting.as_ref().ok_or(EngineError::InvalidState {
            current: s.status,
            attempted: "join",
        })?;

        let host_side = caller.role == Role::Admin || caller.id == s.mentor_id;
        Ok(JoinInfo {
            session_id,
            provider: meeting.provider.clone(),
            join_url: meeting.join_url.clone(),
            start_url: if host_side {
                meeting.start_url.clone()
            } else {
                None
            },
            password: meeting.password.clone(),
        })
    }
}
