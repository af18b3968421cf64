use ulid::Ulid;

use crate::directory::{Principal, Role};
use crate::model::*;

use super::lifecycle::ensure_party;
use super::{Engine, EngineError};

/// Range query over sessions: by party, optionally clipped to a window.
/// Time bounds select sessions whose span overlaps `[from, to)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFilter {
    pub mentor_id: Option<Ulid>,
    pub student_id: Option<Ulid>,
    pub from: Option<Ts>,
    pub to: Option<Ts>,
}

fn matches(s: &Session, filter: &SessionFilter) -> bool {
    if let Some(mid) = filter.mentor_id
        && s.mentor_id != mid
    {
        return false;
    }
    if let Some(sid) = filter.student_id
        && s.student_id != sid
    {
        return false;
    }
    if let Some(from) = filter.from
        && s.span.end <= from
    {
        return false;
    }
    if let Some(to) = filter.to
        && s.span.start >= to
    {
        return false;
    }
    true
}

impl Engine {
    pub async fn get_session(
        &self,
        caller: &Principal,
        session_id: Ulid,
    ) -> Result<Session, EngineError> {
        let (_, guard) = self.resolve_session_read(&session_id).await?;
        let s = guard
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        ensure_party(caller, s)?;
        Ok(s.clone())
    }

    /// List sessions visible to the caller. Non-admin callers are pinned to
    /// their own side of the filter; asking for someone else's calendar is
    /// forbidden, not empty.
    pub async fn list_sessions(
        &self,
        caller: &Principal,
        mut filter: SessionFilter,
    ) -> Result<Vec<Session>, EngineError> {
        match caller.role {
            Role::Admin => {}
            Role::Mentor => {
                if filter.mentor_id.is_some_and(|id| id != caller.id)
                    || filter.student_id.is_some()
                {
                    return Err(EngineError::Forbidden("mentors list only their own sessions"));
                }
                filter.mentor_id = Some(caller.id);
            }
            Role::Student => {
                if filter.student_id.is_some_and(|id| id != caller.id)
                    || filter.mentor_id.is_some()
                {
                    return Err(EngineError::Forbidden("students list only their own sessions"));
                }
                filter.student_id = Some(caller.id);
            }
        }

        let mut result = Vec::new();
        if let Some(mentor_id) = filter.mentor_id {
            let ms = self
                .get_mentor(&mentor_id)
                .ok_or(EngineError::NotFound(mentor_id))?;
            let guard = ms.read().await;
            result.extend(guard.sessions.iter().filter(|s| matches(s, &filter)).cloned());
        } else {
            // Student or admin listing: walk every mentor. Sessions within a
            // mentor are start-sorted; the merged listing is re-sorted.
            let mentors: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
            for ms in mentors {
                let guard = ms.read().await;
                result.extend(guard.sessions.iter().filter(|s| matches(s, &filter)).cloned());
            }
            result.sort_by_key(|s| s.span.start);
        }
        Ok(result)
    }

    pub async fn list_rules(&self, mentor_id: Ulid) -> Result<Vec<AvailabilityRule>, EngineError> {
        let ms = self
            .get_mentor(&mentor_id)
            .ok_or(EngineError::NotFound(mentor_id))?;
        let guard = ms.read().await;
        Ok(guard.rules.clone())
    }

    pub fn list_principals(&self, role: Role) -> Vec<Principal> {
        let mut out: Vec<Principal> = self
            .directory
            .iter_principals()
            .into_iter()
            .filter(|p| p.role == role)
            .collect();
        out.sort_by_key(|p| p.id);
        out
    }
}
