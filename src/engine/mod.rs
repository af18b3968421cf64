mod availability;
mod compact;
mod conflict;
mod error;
mod lifecycle;
mod queries;
mod reschedule;
mod slots;

pub use availability::{is_open_at, rule_for};
pub use error::EngineError;
pub use queries::SessionFilter;
pub use slots::generate_slots;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::directory::{Directory, Principal, Role};
use crate::meeting::Meetings;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedMentorState = Arc<RwLock<MentorState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedMentorState>,
    pub directory: Directory,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) meetings: Meetings,
    /// Reverse lookup: session id → mentor id
    pub(super) session_to_mentor: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a MentorState (no locking — caller holds the
/// lock). Events carry every timestamp they need, so replay is deterministic.
fn apply_to_mentor(ms: &mut MentorState, event: &Event, session_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RuleSet { rule, .. } => {
            ms.rules.push(*rule);
        }
        Event::RuleCleared { day, .. } => {
            ms.rules.retain(|r| r.day != *day);
        }
        Event::SessionRequested {
            id,
            mentor_id,
            student_id,
            span,
            subject,
            student_choice,
            requested_at,
        } => {
            ms.insert_session(Session {
                id: *id,
                mentor_id: *mentor_id,
                student_id: *student_id,
                span: *span,
                status: SessionStatus::Requested,
                subject: subject.clone(),
                student_choice: *student_choice,
                payment_status: PaymentStatus::Unpaid,
                meeting: None,
                rejection_reason: None,
                created_at: *requested_at,
                approved_at: None,
                rejected_at: None,
                started_at: None,
                completed_at: None,
                cancelled_at: None,
                cancelled_by: None,
                reschedule_request: None,
                reschedule_history: Vec::new(),
                rating: None,
                feedback: None,
            });
            session_index.insert(*id, *mentor_id);
        }
        Event::SessionApproved {
            id,
            approved_at,
            meeting,
            ..
        } => {
            if let Some(s) = ms.session_mut(*id) {
                s.status = SessionStatus::Approved;
                s.approved_at = Some(*approved_at);
                s.meeting = Some(meeting.clone());
            }
        }
        Event::SessionRejected {
            id,
            rejected_at,
            reason,
            ..
        } => {
            if let Some(s) = ms.session_mut(*id) {
                s.status = SessionStatus::Rejected;
                s.rejected_at = Some(*rejected_at);
                s.rejection_reason = Some(reason.clone());
            }
        }
        Event::SessionStarted { id, started_at, .. } => {
            if let Some(s) = ms.session_mut(*id) {
                s.status = SessionStatus::Active;
                s.started_at = Some(*started_at);
            }
        }
        Event::SessionCompleted {
            id, completed_at, ..
        } => {
            if let Some(s) = ms.session_mut(*id) {
                s.status = SessionStatus::Completed;
                s.completed_at = Some(*completed_at);
            }
        }
        Event::SessionCancelled {
            id,
            cancelled_by,
            cancelled_at,
            ..
        } => {
            if let Some(s) = ms.session_mut(*id) {
                s.status = SessionStatus::Cancelled;
                s.cancelled_at = Some(*cancelled_at);
                s.cancelled_by = Some(*cancelled_by);
            }
        }
        Event::RescheduleRequested {
            id,
            requested_by,
            requested_at,
            span,
            reason,
            ..
        } => {
            if let Some(s) = ms.session_mut(*id) {
                s.status = SessionStatus::RescheduleRequested;
                s.reschedule_request = Some(RescheduleProposal {
                    requested_by: *requested_by,
                    requested_at: *requested_at,
                    span: *span,
                    reason: reason.clone(),
                });
            }
        }
        Event::RescheduleApproved {
            id, resolved_at, ..
        } => {
            // The span changes, so the session is pulled out and reinserted
            // to keep the list sorted by start.
            if let Some(mut s) = ms.remove_session(*id) {
                if let Some(proposal) = s.reschedule_request.take() {
                    s.reschedule_history.push(RescheduleRecord {
                        requested_by: proposal.requested_by,
                        requested_at: proposal.requested_at,
                        old_span: s.span,
                        proposed_span: proposal.span,
                        reason: proposal.reason,
                        outcome: RescheduleOutcome::Approved,
                        resolved_at: *resolved_at,
                        rejection_reason: None,
                    });
                    s.span = proposal.span;
                    s.status = SessionStatus::Scheduled;
                }
                ms.insert_session(s);
            }
        }
        Event::RescheduleRejected {
            id,
            resolved_at,
            reason,
            ..
        } => {
            if let Some(s) = ms.session_mut(*id)
                && let Some(proposal) = s.reschedule_request.take()
            {
                s.reschedule_history.push(RescheduleRecord {
                    requested_by: proposal.requested_by,
                    requested_at: proposal.requested_at,
                    old_span: s.span,
                    proposed_span: proposal.span,
                    reason: proposal.reason,
                    outcome: RescheduleOutcome::Rejected,
                    resolved_at: *resolved_at,
                    rejection_reason: Some(reason.clone()),
                });
                s.status = SessionStatus::Scheduled;
            }
        }
        Event::SessionRated {
            id,
            rating,
            feedback,
            ..
        } => {
            if let Some(s) = ms.session_mut(*id) {
                s.rating = Some(*rating);
                s.feedback = feedback.clone();
            }
        }
        Event::SessionDeleted { id, .. } => {
            ms.remove_session(*id);
            session_index.remove(id);
        }
        // Registrations are handled at the DashMap/directory level, not here
        Event::MentorRegistered { .. } | Event::StudentRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        meetings: Meetings,
        admin_login: String,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            directory: Directory::new(admin_login),
            wal_tx,
            notify,
            meetings,
            session_to_mentor: DashMap::new(),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may
        // run inside an async context.
        for event in &events {
            match event {
                Event::MentorRegistered { id, login, name } => {
                    engine.directory.insert(Principal {
                        id: *id,
                        role: Role::Mentor,
                        login: login.clone(),
                        name: name.clone(),
                    });
                    engine
                        .state
                        .insert(*id, Arc::new(RwLock::new(MentorState::new(*id))));
                }
                Event::StudentRegistered { id, login, name } => {
                    engine.directory.insert(Principal {
                        id: *id,
                        role: Role::Student,
                        login: login.clone(),
                        name: name.clone(),
                    });
                }
                other => {
                    if let Some(mentor_id) = event_mentor_id(other)
                        && let Some(entry) = engine.state.get(&mentor_id)
                    {
                        let ms_arc = entry.clone();
                        let mut guard = ms_arc.try_write().expect("replay: uncontended write");
                        apply_to_mentor(&mut guard, other, &engine.session_to_mentor);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn get_mentor(&self, id: &Ulid) -> Option<SharedMentorState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn mentor_for_session(&self, session_id: &Ulid) -> Option<Ulid> {
        self.session_to_mentor.get(session_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call, under the caller's lock hold.
    pub(super) async fn persist_and_apply(
        &self,
        mentor_id: Ulid,
        ms: &mut MentorState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_mentor(ms, event, &self.session_to_mentor);
        self.notify.send(mentor_id, event);
        Ok(())
    }

    /// Lookup session → mentor, get mentor, acquire write lock.
    pub(super) async fn resolve_session_write(
        &self,
        session_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<MentorState>), EngineError> {
        let mentor_id = self
            .mentor_for_session(session_id)
            .ok_or(EngineError::NotFound(*session_id))?;
        let ms = self
            .get_mentor(&mentor_id)
            .ok_or(EngineError::NotFound(mentor_id))?;
        let guard = ms.write_owned().await;
        Ok((mentor_id, guard))
    }

    /// Same lookup, read lock.
    pub(super) async fn resolve_session_read(
        &self,
        session_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockReadGuard<MentorState>), EngineError> {
        let mentor_id = self
            .mentor_for_session(session_id)
            .ok_or(EngineError::NotFound(*session_id))?;
        let ms = self
            .get_mentor(&mentor_id)
            .ok_or(EngineError::NotFound(mentor_id))?;
        let guard = ms.read_owned().await;
        Ok((mentor_id, guard))
    }
}

/// Extract the mentor_id an event routes to (None for registrations).
fn event_mentor_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RuleSet { mentor_id, .. }
        | Event::RuleCleared { mentor_id, .. }
        | Event::SessionRequested { mentor_id, .. }
        | Event::SessionApproved { mentor_id, .. }
        | Event::SessionRejected { mentor_id, .. }
        | Event::SessionStarted { mentor_id, .. }
        | Event::SessionCompleted { mentor_id, .. }
        | Event::SessionCancelled { mentor_id, .. }
        | Event::RescheduleRequested { mentor_id, .. }
        | Event::RescheduleApproved { mentor_id, .. }
        | Event::RescheduleRejected { mentor_id, .. }
        | Event::SessionRated { mentor_id, .. }
        | Event::SessionDeleted { mentor_id, .. } => Some(*mentor_id),
        Event::MentorRegistered { .. } | Event::StudentRegistered { .. } => None,
    }
}
