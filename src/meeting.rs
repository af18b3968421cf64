use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::warn;
use ulid::Ulid;

use crate::model::{MeetingInfo, Span, Ts};

/// Outbound provisioning is bounded by this; a slow provider degrades to the
/// fallback link instead of stalling approval.
pub const PROVISION_TIMEOUT: Duration = Duration::from_secs(5);

/// Refresh the cached OAuth token this long before it actually expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub enum MeetingError {
    Auth(String),
    Http(String),
    Provider(String),
}

impl std::fmt::Display for MeetingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeetingError::Auth(e) => write!(f, "provider auth failed: {e}"),
            MeetingError::Http(e) => write!(f, "provider request failed: {e}"),
            MeetingError::Provider(e) => write!(f, "provider error: {e}"),
        }
    }
}

impl std::error::Error for MeetingError {}

/// The seam between the lifecycle and whatever actually mints meeting links.
#[async_trait]
pub trait MeetingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_meeting(
        &self,
        topic: &str,
        start: Ts,
        duration_minutes: i64,
    ) -> Result<MeetingInfo, MeetingError>;
}

// ── Zoom server-to-server OAuth client ───────────────────────────

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// An explicit, injectable client owning its token lifecycle. The cached
/// token is refreshed under the mutex when it nears expiry.
pub struct ZoomClient {
    http: reqwest::Client,
    account_id: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct MeetingResponse {
    join_url: String,
    start_url: Option<String>,
    password: Option<String>,
}

impl ZoomClient {
    pub fn new(account_id: String, client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            account_id,
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    async fn bearer_token(&self) -> Result<String, MeetingError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN
        {
            return Ok(token.value.clone());
        }

        let response = self
            .http
            .post("https://zoom.us/oauth/token")
            .query(&[
                ("grant_type", "account_credentials"),
                ("account_id", self.account_id.as_str()),
            ])
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .send()
            .await
            .map_err(|e| MeetingError::Auth(e.to_string()))?
            .error_for_status()
            .map_err(|e| MeetingError::Auth(e.to_string()))?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| MeetingError::Auth(e.to_string()))?;

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }
}

#[async_trait]
impl MeetingProvider for ZoomClient {
    fn name(&self) -> &'static str {
        "zoom"
    }

    async fn create_meeting(
        &self,
        topic: &str,
        start: Ts,
        duration_minutes: i64,
    ) -> Result<MeetingInfo, MeetingError> {
        let token = self.bearer_token().await?;
        let body = serde_json::json!({
            "topic": topic,
            "type": 2,
            "start_time": start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "duration": duration_minutes,
            "settings": { "join_before_host": false },
        });
        let response = self
            .http
            .post("https://api.zoom.us/v2/users/me/meetings")
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| MeetingError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| MeetingError::Provider(e.to_string()))?;
        let meeting: MeetingResponse = response
            .json()
            .await
            .map_err(|e| MeetingError::Provider(e.to_string()))?;

        Ok(MeetingInfo {
            provider: self.name().to_string(),
            join_url: meeting.join_url,
            start_url: meeting.start_url,
            password: meeting.password,
        })
    }
}

// ── Provisioning service ─────────────────────────────────────────

/// Best-effort provisioning: a bounded call into the provider, degrading to
/// a locally generated deterministic link. Losing a video link is less
/// severe than losing the booking, so this never returns an error.
#[derive(Clone)]
pub struct Meetings {
    provider: Option<Arc<dyn MeetingProvider>>,
    fallback_base: String,
    timeout: Duration,
}

impl Meetings {
    pub fn new(provider: Option<Arc<dyn MeetingProvider>>, fallback_base: String) -> Self {
        Self {
            provider,
            fallback_base,
            timeout: PROVISION_TIMEOUT,
        }
    }

    /// No external provider configured; every session gets a local link.
    pub fn disabled(fallback_base: String) -> Self {
        Self::new(None, fallback_base)
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn provision(&self, topic: &str, span: Span, session_id: Ulid) -> MeetingInfo {
        let Some(provider) = &self.provider else {
            return self.fallback(session_id);
        };
        let call = provider.create_meeting(topic, span.start, span.duration_minutes());
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                warn!("meeting provisioning failed, using fallback link: {e}");
                metrics::counter!(crate::observability::MEETING_FALLBACKS_TOTAL).increment(1);
                self.fallback(session_id)
            }
            Err(_) => {
                warn!("meeting provisioning timed out, using fallback link");
                metrics::counter!(crate::observability::MEETING_FALLBACKS_TOTAL).increment(1);
                self.fallback(session_id)
            }
        }
    }

    /// Deterministic per-session link on our own domain.
    fn fallback(&self, session_id: Ulid) -> MeetingInfo {
        let id = session_id.to_string().to_lowercase();
        let password = id[id.len() - 8..].to_string();
        MeetingInfo {
            provider: "fallback".to_string(),
            join_url: format!("{}/{id}", self.fallback_base),
            start_url: Some(format!("{}/{id}?role=host", self.fallback_base)),
            password: Some(password),
        }
    }
}
