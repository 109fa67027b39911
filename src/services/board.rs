//! Board service — join/part, presence roster, and board lifecycle.
//!
//! DESIGN
//! ======
//! Boards live only in memory. A board is created by the first join to its
//! id and dropped when its last member parts; a later join to the same id
//! starts from an empty log.
//!
//! LOCKING
//! =======
//! The board map lock is held only long enough to fetch, insert or remove a
//! board. Everything else runs under the board's own mutex. The last part
//! marks the board `retired` and wipes it while still holding that mutex,
//! then unlinks it from the map. A joiner that races in and finds a retired
//! board unlinks it itself and retries against a fresh one, so nobody ever
//! observes a half torn-down board.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::services::identity::{self, ResolvedIdentity};
use crate::state::{AppState, Board, BoardSnapshot, ClientTx, Member, Point, UserSession, UserSummary, now_rfc3339};

// =============================================================================
// TYPES
// =============================================================================

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// The member's identity, including the assigned color.
    pub session: UserSession,
    /// Board state as of the join, including the new member in the roster.
    pub snapshot: BoardSnapshot,
}

/// What a part actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    /// The member was removed. `closed` is set when it was the last one.
    Removed { name: String, closed: bool },
    /// A newer connection has taken over this user id; nothing was removed.
    Superseded,
    /// No such board or member (already parted or evicted).
    Absent,
}

// =============================================================================
// ROSTER
// =============================================================================

impl Board {
    /// Insert or refresh a member. The roster never holds two entries for
    /// one user id: a rejoin keeps the user's roster slot and color and
    /// takes over the connection.
    pub fn add_member(&mut self, resolved: ResolvedIdentity, connection_id: Uuid, tx: ClientTx) -> UserSession {
        let existing = self.users.iter().position(|u| u.id == resolved.user_id);
        let color = match existing {
            Some(idx) => self.users[idx].color.clone(),
            None => identity::allocate_color(&self.users).to_owned(),
        };

        let session = UserSession {
            id: resolved.user_id,
            name: resolved.user_name,
            color,
            session_id: resolved.session_id,
            joined_at: now_rfc3339(),
            cursor: None,
        };

        match existing {
            Some(idx) => self.users[idx].name.clone_from(&session.name),
            None => self.users.push(session.summary()),
        }

        self.members
            .insert(session.id.clone(), Member { connection_id, session: session.clone(), tx });
        session
    }

    /// Remove a member if `connection_id` still owns it.
    pub fn remove_member(&mut self, user_id: &str, connection_id: Uuid) -> Departure {
        match self.members.get(user_id) {
            None => return Departure::Absent,
            Some(member) if member.connection_id != connection_id => return Departure::Superseded,
            Some(_) => {}
        }

        let name = self
            .members
            .remove(user_id)
            .map(|m| m.session.name)
            .unwrap_or_default();
        self.users.retain(|u| u.id != user_id);
        Departure::Removed { name, closed: self.members.is_empty() }
    }

    /// Rename a member in both identity and roster. Returns the previous
    /// name, or `None` if the user is not on this board.
    pub fn update_user_name(&mut self, user_id: &str, new_name: &str) -> Option<String> {
        let member = self.members.get_mut(user_id)?;
        let previous = std::mem::replace(&mut member.session.name, new_name.to_owned());
        if let Some(entry) = self.users.iter_mut().find(|u| u.id == user_id) {
            entry.name = new_name.to_owned();
        }
        Some(previous)
    }

    /// Record a member's cursor. Returns the updated identity, or `None` if
    /// the user is not on this board.
    pub fn set_cursor(&mut self, user_id: &str, position: Point) -> Option<&UserSession> {
        let member = self.members.get_mut(user_id)?;
        member.session.cursor = Some(position);
        Some(&member.session)
    }

    #[must_use]
    pub fn user(&self, user_id: &str) -> Option<&UserSession> {
        self.members.get(user_id).map(|m| &m.session)
    }

    /// Wipe all state and mark the board dead. Called with the last member gone.
    fn retire(&mut self) {
        self.retired = true;
        self.objects.clear();
        self.users.clear();
        self.members.clear();
    }
}

// =============================================================================
// LOCK ACCESS
// =============================================================================

/// Run `f` against a live board under its mutex. `None` if the board does
/// not exist or has just been retired.
pub async fn with_board<R>(state: &AppState, board_id: &str, f: impl FnOnce(&mut Board) -> R) -> Option<R> {
    let board = state.boards.read().await.get(board_id).cloned()?;
    let mut guard = board.lock().await;
    if guard.retired {
        return None;
    }
    Some(f(&mut *guard))
}

/// Fetch the board for `board_id`, creating it if absent.
async fn board_or_insert(state: &AppState, board_id: &str) -> Arc<Mutex<Board>> {
    if let Some(board) = state.boards.read().await.get(board_id) {
        return Arc::clone(board);
    }
    let mut boards = state.boards.write().await;
    let board = boards.entry(board_id.to_owned()).or_insert_with(|| {
        info!(%board_id, "created board");
        Arc::new(Mutex::new(Board::new()))
    });
    Arc::clone(board)
}

/// Remove `board` from the map if it is still the entry for `board_id`.
async fn unlink(state: &AppState, board_id: &str, board: &Arc<Mutex<Board>>) {
    let mut boards = state.boards.write().await;
    if boards.get(board_id).is_some_and(|current| Arc::ptr_eq(current, board)) {
        boards.remove(board_id);
    }
}

// =============================================================================
// JOIN / PART
// =============================================================================

/// Join a board, creating it on first use. Returns the member's identity and
/// a snapshot taken in the same critical section as the insert.
pub async fn join_board(
    state: &AppState,
    board_id: &str,
    resolved: ResolvedIdentity,
    connection_id: Uuid,
    tx: ClientTx,
) -> JoinOutcome {
    loop {
        let board = board_or_insert(state, board_id).await;
        let mut guard = board.lock().await;
        if guard.retired {
            drop(guard);
            debug!(%board_id, "join raced board teardown; retrying");
            unlink(state, board_id, &board).await;
            continue;
        }

        let session = guard.add_member(resolved, connection_id, tx);
        let snapshot = guard.snapshot();
        info!(
            %board_id,
            user_id = %session.id,
            user_name = %session.name,
            members = guard.members.len(),
            "user joined board"
        );
        return JoinOutcome { session, snapshot };
    }
}

/// Leave a board. Removing the last member tears the board down.
pub async fn part_board(state: &AppState, board_id: &str, user_id: &str, connection_id: Uuid) -> Departure {
    let Some(board) = state.boards.read().await.get(board_id).cloned() else {
        return Departure::Absent;
    };

    let departure = {
        let mut guard = board.lock().await;
        if guard.retired {
            return Departure::Absent;
        }
        let departure = guard.remove_member(user_id, connection_id);
        if let Departure::Removed { closed: true, .. } = departure {
            guard.retire();
        }
        departure
    };

    match &departure {
        Departure::Removed { closed: true, .. } => {
            unlink(state, board_id, &board).await;
            info!(%board_id, %user_id, "last user left; board closed");
        }
        Departure::Removed { .. } => info!(%board_id, %user_id, "user left board"),
        Departure::Superseded => debug!(%board_id, %user_id, "stale connection parted; user still present"),
        Departure::Absent => {}
    }
    departure
}

// =============================================================================
// PRESENCE
// =============================================================================

/// Rename a user. Returns the previous name, `None` if unknown.
pub async fn update_user_name(state: &AppState, board_id: &str, user_id: &str, new_name: &str) -> Option<String> {
    with_board(state, board_id, |board| board.update_user_name(user_id, new_name))
        .await
        .flatten()
}

/// Record a user's cursor. `false` if the board or user is unknown.
pub async fn set_cursor(state: &AppState, board_id: &str, user_id: &str, position: Point) -> bool {
    with_board(state, board_id, |board| board.set_cursor(user_id, position).is_some())
        .await
        .unwrap_or(false)
}

/// Copy of a user's identity, if present.
pub async fn get_user(state: &AppState, board_id: &str, user_id: &str) -> Option<UserSession> {
    with_board(state, board_id, |board| board.user(user_id).cloned())
        .await
        .flatten()
}

/// Current roster of a board, empty if the board is not live.
pub async fn list_board_users(state: &AppState, board_id: &str) -> Vec<UserSummary> {
    with_board(state, board_id, |board| board.users.clone())
        .await
        .unwrap_or_default()
}

/// Snapshot of a live board.
pub async fn board_snapshot(state: &AppState, board_id: &str) -> Option<BoardSnapshot> {
    with_board(state, board_id, |board| board.snapshot()).await
}

/// Whether a live board exists for `board_id`.
pub async fn contains_board(state: &AppState, board_id: &str) -> bool {
    with_board(state, board_id, |_| ()).await.is_some()
}

/// Number of live boards.
pub async fn board_count(state: &AppState) -> usize {
    state.boards.read().await.len()
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
