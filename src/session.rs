//! Per-session state.
//!
//! A [`SessionRegistry`] maps document names to responders for one user
//! session. It is insertion-ordered, bounded, and only shrinks when the user
//! evicts a document. [`SessionStore`] owns every live session and hands out
//! one [`SessionContext`] per session id, each behind its own async mutex so
//! a session's actions run one at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::CapacityError;
use crate::responder::ResponderHandle;

/// Bounded, insertion-ordered `name -> responder` map with an active slot.
#[derive(Debug)]
pub struct SessionRegistry {
    entries: Vec<(String, ResponderHandle)>,
    max_documents: usize,
    active: Option<String>,
}

impl SessionRegistry {
    pub fn new(max_documents: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_documents: max_documents.max(1),
            active: None,
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    /// Insert or replace `name`.
    ///
    /// Replacing an existing name is always allowed and keeps its position;
    /// the displaced handle is returned. A new name on a full registry is
    /// refused.
    pub fn register(
        &mut self,
        name: &str,
        handle: ResponderHandle,
    ) -> Result<Option<ResponderHandle>, CapacityError> {
        if let Some(pos) = self.position(name) {
            let previous = std::mem::replace(&mut self.entries[pos].1, handle);
            return Ok(Some(previous));
        }
        if self.entries.len() >= self.max_documents {
            return Err(CapacityError {
                name: name.to_string(),
                max: self.max_documents,
            });
        }
        self.entries.push((name.to_string(), handle));
        Ok(None)
    }

    /// Whether `register(name, ..)` would succeed.
    pub fn can_register(&self, name: &str) -> bool {
        self.position(name).is_some() || self.entries.len() < self.max_documents
    }

    /// Look up `name` and make it the active document.
    pub fn select(&mut self, name: &str) -> Option<ResponderHandle> {
        let handle = self.get(name)?;
        self.active = Some(name.to_string());
        Some(handle)
    }

    /// Look up `name` without changing the active document.
    pub fn get(&self, name: &str) -> Option<ResponderHandle> {
        self.position(name).map(|pos| self.entries[pos].1.clone())
    }

    /// Remove `name`. Returns whether an entry was removed.
    pub fn evict(&mut self, name: &str) -> bool {
        self.remove(name).is_some()
    }

    /// Remove `name`, returning its handle so the caller can release it.
    pub fn remove(&mut self, name: &str) -> Option<ResponderHandle> {
        let pos = self.position(name)?;
        let (_, handle) = self.entries.remove(pos);
        if self.active.as_deref() == Some(name) {
            self.active = self.entries.last().map(|(n, _)| n.clone());
        }
        Some(handle)
    }

    /// The active document, if any.
    pub fn active(&self) -> Option<(&str, ResponderHandle)> {
        let name = self.active.as_deref()?;
        let pos = self.position(name)?;
        Some((self.entries[pos].0.as_str(), self.entries[pos].1.clone()))
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Registered names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResponderHandle)> {
        self.entries.iter().map(|(n, h)| (n.as_str(), h))
    }

    /// Remove every entry, returning the handles.
    pub fn drain(&mut self) -> Vec<ResponderHandle> {
        self.active = None;
        self.entries.drain(..).map(|(_, h)| h).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_documents
    }
}

/// Everything one user session owns.
#[derive(Debug)]
pub struct SessionContext {
    pub id: String,
    pub registry: SessionRegistry,
}

impl SessionContext {
    pub fn new(id: impl Into<String>, max_documents: usize) -> Self {
        Self {
            id: id.into(),
            registry: SessionRegistry::new(max_documents),
        }
    }
}

pub type SharedSession = Arc<Mutex<SessionContext>>;

struct SessionEntry {
    context: SharedSession,
    last_seen: Instant,
}

/// All live sessions, keyed by opaque id.
pub struct SessionStore {
    sessions: StdMutex<HashMap<String, SessionEntry>>,
    max_documents: usize,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(max_documents: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: StdMutex::new(HashMap::new()),
            max_documents,
            idle_timeout,
        }
    }

    /// Return the session for `id`, creating a fresh one when `id` is absent
    /// or unknown. `created` is set when a new session was made.
    ///
    /// Idle sessions are pruned here; their contexts are returned through
    /// `expired` so the caller can release their indexes.
    pub fn resolve(&self, id: Option<&str>) -> Resolved {
        let now = Instant::now();
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let idle = self.idle_timeout;
        let stale: Vec<String> = sessions
            .iter()
            .filter(|(sid, entry)| {
                Some(sid.as_str()) != id && now.duration_since(entry.last_seen) > idle
            })
            .map(|(sid, _)| sid.clone())
            .collect();
        let mut expired = Vec::with_capacity(stale.len());
        for sid in stale {
            if let Some(entry) = sessions.remove(&sid) {
                debug!(session = %sid, "Pruned idle session");
                expired.push(entry.context);
            }
        }

        if let Some(entry) = id.and_then(|id| sessions.get_mut(id)) {
            entry.last_seen = now;
            return Resolved {
                id: id.unwrap_or_default().to_string(),
                context: entry.context.clone(),
                created: false,
                expired,
            };
        }

        let new_id = Uuid::new_v4().simple().to_string();
        let context = Arc::new(Mutex::new(SessionContext::new(
            new_id.clone(),
            self.max_documents,
        )));
        sessions.insert(
            new_id.clone(),
            SessionEntry {
                context: context.clone(),
                last_seen: now,
            },
        );
        info!(session = %new_id, "Started session");
        Resolved {
            id: new_id,
            context,
            created: true,
            expired,
        }
    }

    /// End a session, returning its context so the caller can release it.
    pub fn end(&self, id: &str) -> Option<SharedSession> {
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = sessions.remove(id)?;
        info!(session = %id, "Ended session");
        Some(entry.context)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of [`SessionStore::resolve`].
pub struct Resolved {
    pub id: String,
    pub context: SharedSession,
    pub created: bool,
    pub expired: Vec<SharedSession>,
}
