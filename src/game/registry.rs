//! Process-wide registry of live player sessions.
//!
//! Arena-style: connections get a stable numeric id on insert, entries are
//! only mutated through [`Registry::update`] by the handler owning the
//! connection, and nothing outside the registry holds a `Session` across
//! messages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::hand::Handedness;

/// Per-connection game state
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Client-visible id; clients may rename it on any message
    pub player_id: String,
    /// Armed target sign, uppercased; `None` means idle
    pub target: Option<String>,
    /// Dominant-hand preference, kept for the client's benefit
    pub dominance: Handedness,
}

impl Session {
    fn new(conn_id: u64) -> Self {
        Self {
            player_id: conn_id.to_string(),
            target: None,
            dominance: Handedness::Right,
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, Session>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection; returns its id and initial session snapshot.
    pub fn insert(&self) -> (u64, Session) {
        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let session = Session::new(conn_id);
        self.sessions
            .lock()
            .unwrap()
            .insert(conn_id, session.clone());
        (conn_id, session)
    }

    /// Drop a connection's session; returns it if it was present.
    pub fn remove(&self, conn_id: u64) -> Option<Session> {
        self.sessions.lock().unwrap().remove(&conn_id)
    }

    /// Mutate one session in place; `None` if the connection is gone.
    pub fn update<R>(&self, conn_id: u64, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.lock().unwrap().get_mut(&conn_id).map(f)
    }

    /// Clone out a session snapshot.
    pub fn get(&self, conn_id: u64) -> Option<Session> {
        self.sessions.lock().unwrap().get(&conn_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
