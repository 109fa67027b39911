//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! handed to every connection task. It holds the map of live boards. The map
//! lock is only held to find, create or drop a board; every read or write of
//! a board's objects and roster happens under that board's own mutex, so
//! boards never contend with each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use crate::config::Config;
use crate::message::ServerEvent;

/// Background color of a freshly created board.
pub const DEFAULT_BACKGROUND: &str = "#FFFFFF";

/// Opaque client-defined drawing primitive. Only `id` and `timestamp` are
/// ever touched by the server.
pub type Object = serde_json::Map<String, serde_json::Value>;

/// Outbound queue feeding one connection's socket writer.
pub type ClientTx = mpsc::Sender<Arc<ServerEvent>>;

// =============================================================================
// USERS
// =============================================================================

/// 2D point in board coordinates. A cursor position must carry numeric `x`
/// and `y`; extra fields are dropped, and any other shape makes the whole
/// `cursor_move` malformed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Roster entry shown to every member of a board.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub color: String,
    pub joined_at: String,
}

/// Identity of one connected user within one board.
#[derive(Debug, Clone, PartialEq)]
pub struct UserSession {
    pub id: String,
    pub name: String,
    pub color: String,
    /// Lets a browser tab resume its identity on reconnect.
    pub session_id: String,
    pub joined_at: String,
    pub cursor: Option<Point>,
}

impl UserSession {
    #[must_use]
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
            joined_at: self.joined_at.clone(),
        }
    }
}

/// A connected member: identity plus the queue its connection drains.
pub struct Member {
    /// Distinguishes two connections that claimed the same user id.
    pub connection_id: Uuid,
    pub session: UserSession,
    pub tx: ClientTx,
}

// =============================================================================
// BOARD
// =============================================================================

/// Per-board live state. Exists only while at least one member is connected.
pub struct Board {
    /// Object log in insertion (z) order, oldest first.
    pub objects: Vec<Object>,
    pub background: String,
    /// Presence roster in join order.
    pub users: Vec<UserSummary>,
    /// Connected members keyed by user id.
    pub members: HashMap<String, Member>,
    /// Set once the last member left. A retired board is never mutated again.
    pub retired: bool,
}

impl Board {
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            background: DEFAULT_BACKGROUND.to_owned(),
            users: Vec::new(),
            members: HashMap::new(),
            retired: false,
        }
    }

    /// Full state handed to a newly joined member.
    #[must_use]
    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot { objects: self.objects.clone(), background: self.background.clone(), users: self.users.clone() }
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable copy of a board's objects, background and roster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardSnapshot {
    pub objects: Vec<Object>,
    pub background: String,
    pub users: Vec<UserSummary>,
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub boards: Arc<RwLock<HashMap<String, Arc<Mutex<Board>>>>>,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { boards: Arc::new(RwLock::new(HashMap::new())), config: Arc::new(config) }
    }
}

// =============================================================================
// CLOCK
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

/// Current time as an RFC 3339 string.
#[must_use]
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
