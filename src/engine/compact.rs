use tokio::sync::oneshot;
use ulid::Ulid;

use crate::directory::Role;
use crate::model::*;

use super::{Engine, EngineError, WalCommand};

/// Emit the minimal event sequence whose replay recreates `s` exactly:
/// the original request, the approval, every resolved reschedule in order,
/// any pending proposal, the closing transition, and the rating.
fn session_events(s: &Session) -> Vec<Event> {
    let mut events = Vec::new();

    // The window only ever changes through approved reschedules, so the
    // span at the first resolution is the span the session was booked with.
    let original_span = s
        .reschedule_history
        .first()
        .map(|h| h.old_span)
        .unwrap_or(s.span);

    events.push(Event::SessionRequested {
        id: s.id,
        mentor_id: s.mentor_id,
        student_id: s.student_id,
        span: original_span,
        subject: s.subject.clone(),
        student_choice: s.student_choice,
        requested_at: s.created_at,
    });

    if let (Some(approved_at), Some(meeting)) = (s.approved_at, &s.meeting) {
        events.push(Event::SessionApproved {
            id: s.id,
            mentor_id: s.mentor_id,
            approved_at,
            meeting: meeting.clone(),
        });
    }

    for record in &s.reschedule_history {
        events.push(Event::RescheduleRequested {
            id: s.id,
            mentor_id: s.mentor_id,
            requested_by: record.requested_by,
            requested_at: record.requested_at,
            span: record.proposed_span,
            reason: record.reason.clone(),
        });
        match record.outcome {
            RescheduleOutcome::Approved => events.push(Event::RescheduleApproved {
                id: s.id,
                mentor_id: s.mentor_id,
                resolved_at: record.resolved_at,
            }),
            RescheduleOutcome::Rejected => events.push(Event::RescheduleRejected {
                id: s.id,
                mentor_id: s.mentor_id,
                resolved_at: record.resolved_at,
                reason: record.rejection_reason.clone().unwrap_or_default(),
            }),
        }
    }

    if let Some(proposal) = &s.reschedule_request {
        events.push(Event::RescheduleRequested {
            id: s.id,
            mentor_id: s.mentor_id,
            requested_by: proposal.requested_by,
            requested_at: proposal.requested_at,
            span: proposal.span,
            reason: proposal.reason.clone(),
        });
    }

    if let Some(started_at) = s.started_at {
        events.push(Event::SessionStarted {
            id: s.id,
            mentor_id: s.mentor_id,
            started_at,
        });
    }
    if let Some(completed_at) = s.completed_at {
        events.push(Event::SessionCompleted {
            id: s.id,
            mentor_id: s.mentor_id,
            completed_at,
        });
    }
    if let Some(cancelled_at) = s.cancelled_at {
        events.push(Event::SessionCancelled {
            id: s.id,
            mentor_id: s.mentor_id,
            cancelled_by: s.cancelled_by.unwrap_or(Ulid::nil()),
            cancelled_at,
        });
    }
    if let (Some(rejected_at), Some(reason)) = (s.rejected_at, &s.rejection_reason) {
        events.push(Event::SessionRejected {
            id: s.id,
            mentor_id: s.mentor_id,
            rejected_at,
            reason: reason.clone(),
        });
    }

    if let Some(rating) = s.rating {
        events.push(Event::SessionRated {
            id: s.id,
            mentor_id: s.mentor_id,
            rating,
            feedback: s.feedback.clone(),
        });
    }

    events
}

impl Engine {
    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Rule churn and deleted sessions vanish;
    /// live history is preserved verbatim.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for student in self.list_principals(Role::Student) {
            events.push(Event::StudentRegistered {
                id: student.id,
                login: student.login,
                name: student.name,
            });
        }

        let mentor_states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        for ms in mentor_states {
            let guard = ms.read().await;
            let Some(mentor) = self.directory.get(guard.id) else {
                continue;
            };
            events.push(Event::MentorRegistered {
                id: mentor.id,
                login: mentor.login,
                name: mentor.name,
            });
            for rule in &guard.rules {
                events.push(Event::RuleSet {
                    mentor_id: guard.id,
                    rule: *rule,
                });
            }
            for session in &guard.sessions {
                events.extend(session_events(session));
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
