use axum::http::{header, HeaderMap};
use docchat_core::{Pipeline, Session};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "docchat_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

/// One-shot message shown on the next page render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }
}

pub struct SessionContext {
    pub session: Session,
    pub notice: Option<Notice>,
}

pub type SharedContext = Arc<tokio::sync::Mutex<SessionContext>>;

struct Slot {
    context: SharedContext,
    last_seen: Instant,
}

struct Slots {
    live: HashMap<Uuid, Slot>,
    last_sweep: Instant,
}

// Upper bound on how often the whole map is scanned for idle sessions.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Live sessions keyed by cookie id. Each session sits behind its own async
/// lock, so requests within a session run one at a time. Sessions are only
/// created by requests that change state; page views never allocate one.
pub struct SessionStore {
    pipeline: Arc<Pipeline>,
    slots: Mutex<Slots>,
    ttl: Duration,
}

pub struct Resolved {
    pub id: Uuid,
    pub context: SharedContext,
    pub created: bool,
}

impl Resolved {
    pub fn set_cookie(&self) -> Option<String> {
        self.created.then(|| session_cookie(self.id))
    }
}

impl SessionStore {
    pub fn new(pipeline: Arc<Pipeline>, ttl: Duration) -> Self {
        Self {
            pipeline,
            slots: Mutex::new(Slots {
                live: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .live
            .len()
    }

    /// Existing session named by the request cookie, if it is still live.
    pub fn lookup(&self, headers: &HeaderMap) -> Option<Resolved> {
        self.lookup_id(session_id_from_headers(headers))
    }

    pub fn lookup_id(&self, requested: Option<Uuid>) -> Option<Resolved> {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        self.sweep(&mut slots, now);
        self.touch(&mut slots, requested?, now)
    }

    /// Existing session, or a new one when the cookie is missing or stale.
    pub fn resolve(&self, headers: &HeaderMap) -> Resolved {
        self.resolve_id(session_id_from_headers(headers))
    }

    pub fn resolve_id(&self, requested: Option<Uuid>) -> Resolved {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        self.sweep(&mut slots, now);
        if let Some(resolved) = requested.and_then(|id| self.touch(&mut slots, id, now)) {
            return resolved;
        }

        let id = Uuid::new_v4();
        let context = Arc::new(tokio::sync::Mutex::new(SessionContext {
            session: Session::with_id(id, Arc::clone(&self.pipeline)),
            notice: None,
        }));
        slots.live.insert(
            id,
            Slot {
                context: Arc::clone(&context),
                last_seen: now,
            },
        );
        info!(session = %id, live = slots.live.len(), "session created");

        Resolved {
            id,
            context,
            created: true,
        }
    }

    fn touch(&self, slots: &mut Slots, id: Uuid, now: Instant) -> Option<Resolved> {
        let idle = now.duration_since(slots.live.get(&id)?.last_seen);
        if idle > self.ttl {
            if let Some(slot) = slots.live.remove(&id) {
                release_in_background(id, slot.context);
            }
            return None;
        }
        let slot = slots.live.get_mut(&id)?;
        slot.last_seen = now;
        Some(Resolved {
            id,
            context: Arc::clone(&slot.context),
            created: false,
        })
    }

    fn sweep(&self, slots: &mut Slots, now: Instant) {
        if now.duration_since(slots.last_sweep) < self.ttl.min(SWEEP_INTERVAL) {
            return;
        }
        slots.last_sweep = now;

        let expired = slots
            .live
            .iter()
            .filter(|(_, slot)| now.duration_since(slot.last_seen) > self.ttl)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in expired {
            if let Some(slot) = slots.live.remove(&id) {
                release_in_background(id, slot.context);
            }
        }
    }
}

fn release_in_background(id: Uuid, context: SharedContext) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };
    runtime.spawn(async move {
        let mut context = context.lock().await;
        match context.session.release().await {
            Ok(()) => info!(session = %id, "idle session released"),
            Err(error) => warn!(session = %id, %error, "failed to release idle session"),
        }
    });
}

pub fn session_id_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .find_map(|value| Uuid::parse_str(value.trim()).ok())
}

pub fn session_cookie(id: Uuid) -> String {
    format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax")
}
