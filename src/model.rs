use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// All times are naive and compared in one canonical timezone (the server
/// clock). Per-mentor timezones are a documented non-feature.
pub type Ts = NaiveDateTime;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ts,
    pub end: Ts,
}

impl Span {
    pub fn new(start: Ts, end: Ts) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ts) -> bool {
        self.start <= t && t < self.end
    }
}

/// Day-of-week as 0..=6 with Sunday = 0.
pub fn day_index(day: Weekday) -> u8 {
    day.num_days_from_sunday() as u8
}

/// One recurring weekly open-hours rule. Hours are whole-hour bounds,
/// `[start_hour, end_hour)`. Several rules may target the same day; lookup
/// is last-wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub day: u8,
    pub start_hour: u8,
    pub end_hour: u8,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Requested,
    Approved,
    Scheduled,
    Active,
    RescheduleRequested,
    Completed,
    Cancelled,
    Rejected,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Rejected
        )
    }

    /// Non-terminal sessions block their time window for conflict checks.
    pub fn blocks_slot(&self) -> bool {
        !self.is_terminal()
    }

    /// Approved and scheduled are the same phase of the lifecycle; scheduled
    /// is only entered by resolving a reschedule.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, SessionStatus::Approved | SessionStatus::Scheduled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Requested => "requested",
            SessionStatus::Approved => "approved",
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Active => "active",
            SessionStatus::RescheduleRequested => "reschedule_requested",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reward tag picked by the student at booking time. Not scheduling-relevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudentChoice {
    Free,
    Coffee,
    IceCream,
}

impl StudentChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudentChoice::Free => "free",
            StudentChoice::Coffee => "coffee",
            StudentChoice::IceCream => "ice-cream",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Waived,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Waived => "waived",
        }
    }
}

/// Join-link details, set once at approval. `start_url` is the host-side
/// link and is only disclosed to the mentor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingInfo {
    pub provider: String,
    pub join_url: String,
    pub start_url: Option<String>,
    pub password: Option<String>,
}

/// A pending reschedule proposal. At most one per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleProposal {
    pub requested_by: Ulid,
    pub requested_at: Ts,
    pub span: Span,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RescheduleOutcome {
    Approved,
    Rejected,
}

/// A resolved proposal, kept forever for audit. `old_span` is the window the
/// session had when the proposal was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleRecord {
    pub requested_by: Ulid,
    pub requested_at: Ts,
    pub old_span: Span,
    pub proposed_span: Span,
    pub reason: String,
    pub outcome: RescheduleOutcome,
    pub resolved_at: Ts,
    pub rejection_reason: Option<String>,
}

/// The sole source of truth for a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Ulid,
    pub mentor_id: Ulid,
    pub student_id: Ulid,
    pub span: Span,
    pub status: SessionStatus,
    pub subject: String,
    pub student_choice: StudentChoice,
    pub payment_status: PaymentStatus,
    pub meeting: Option<MeetingInfo>,
    pub rejection_reason: Option<String>,
    pub created_at: Ts,
    pub approved_at: Option<Ts>,
    pub rejected_at: Option<Ts>,
    pub started_at: Option<Ts>,
    pub completed_at: Option<Ts>,
    pub cancelled_at: Option<Ts>,
    pub cancelled_by: Option<Ulid>,
    pub reschedule_request: Option<RescheduleProposal>,
    pub reschedule_history: Vec<RescheduleRecord>,
    pub rating: Option<u8>,
    pub feedback: Option<String>,
}

impl Session {
    pub fn is_party(&self, id: Ulid) -> bool {
        self.mentor_id == id || self.student_id == id
    }
}

/// One mentor's scheduling state: weekly rules plus every session booked
/// against them, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct MentorState {
    pub id: Ulid,
    pub rules: Vec<AvailabilityRule>,
    pub sessions: Vec<Session>,
}

impl MentorState {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            rules: Vec::new(),
            sessions: Vec::new(),
        }
    }

    /// Insert a session maintaining sort order by span.start.
    pub fn insert_session(&mut self, session: Session) {
        let pos = self
            .sessions
            .binary_search_by_key(&session.span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.sessions.insert(pos, session);
    }

    pub fn remove_session(&mut self, id: Ulid) -> Option<Session> {
        if let Some(pos) = self.sessions.iter().position(|s| s.id == id) {
            Some(self.sessions.remove(pos))
        } else {
            None
        }
    }

    pub fn session(&self, id: Ulid) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn session_mut(&mut self, id: Ulid) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    /// Return only sessions whose span overlaps the query window.
    /// Uses binary search to skip sessions starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Session> {
        let right_bound = self
            .sessions
            .partition_point(|s| s.span.start < query.end);
        self.sessions[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }
}

/// The event types. This is the WAL record format; replaying the log in
/// order reconstructs directory and scheduling state exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    MentorRegistered {
        id: Ulid,
        login: String,
        name: String,
    },
    StudentRegistered {
        id: Ulid,
        login: String,
        name: String,
    },
    RuleSet {
        mentor_id: Ulid,
        rule: AvailabilityRule,
    },
    RuleCleared {
        mentor_id: Ulid,
        day: u8,
    },
    SessionRequested {
        id: Ulid,
        mentor_id: Ulid,
        student_id: Ulid,
        span: Span,
        subject: String,
        student_choice: StudentChoice,
        requested_at: Ts,
    },
    SessionApproved {
        id: Ulid,
        mentor_id: Ulid,
        approved_at: Ts,
        meeting: MeetingInfo,
    },
    SessionRejected {
        id: Ulid,
        mentor_id: Ulid,
        rejected_at: Ts,
        reason: String,
    },
    SessionStarted {
        id: Ulid,
        mentor_id: Ulid,
        started_at: Ts,
    },
    SessionCompleted {
        id: Ulid,
        mentor_id: Ulid,
        completed_at: Ts,
    },
    SessionCancelled {
        id: Ulid,
        mentor_id: Ulid,
        cancelled_by: Ulid,
        cancelled_at: Ts,
    },
    RescheduleRequested {
        id: Ulid,
        mentor_id: Ulid,
        requested_by: Ulid,
        requested_at: Ts,
        span: Span,
        reason: String,
    },
    RescheduleApproved {
        id: Ulid,
        mentor_id: Ulid,
        resolved_at: Ts,
    },
    RescheduleRejected {
        id: Ulid,
        mentor_id: Ulid,
        resolved_at: Ts,
        reason: String,
    },
    SessionRated {
        id: Ulid,
        mentor_id: Ulid,
        rating: u8,
        feedback: Option<String>,
    },
    SessionDeleted {
        id: Ulid,
        mentor_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

/// One hourly slot in a mentor's generated calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub date: chrono::NaiveDate,
    pub day: u8,
    pub hour: u8,
    pub available: bool,
}

/// Join-link view handed to a session party, shaped by their role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    pub session_id: Ulid,
    pub provider: String,
    pub join_url: String,
    pub start_url: Option<String>,
    pub password: Option<String>,
}

pub fn hour_of(t: Ts) -> u8 {
    t.hour() as u8
}

pub fn weekday_of(t: Ts) -> u8 {
    day_index(t.date().weekday())
}
