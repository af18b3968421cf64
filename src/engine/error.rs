use ulid::Ulid;

use crate::model::{SessionStatus, Ts};

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or out-of-policy input.
    Validation(String),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    LoginTaken(String),
    /// Time-window collision with the named session.
    Conflict(Ulid),
    /// Transition not legal from the current status.
    InvalidState {
        current: SessionStatus,
        attempted: &'static str,
    },
    /// Attempted before the window opens at the given instant.
    NotReady(Ts),
    /// Attempted after the window closed at the given instant.
    Expired(Ts),
    Forbidden(&'static str),
    LimitExceeded(&'static str),
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LoginTaken(login) => write!(f, "login already taken: {login}"),
            EngineError::Conflict(id) => write!(f, "conflict with session: {id}"),
            EngineError::InvalidState { current, attempted } => {
                write!(f, "cannot {attempted} a session in status {current}")
            }
            EngineError::NotReady(opens_at) => {
                write!(f, "not ready: window opens at {opens_at}")
            }
            EngineError::Expired(closed_at) => {
                write!(f, "expired: window closed at {closed_at}")
            }
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
