//! Object service — the bounded per-board object log.
//!
//! DESIGN
//! ======
//! The log is a `Vec` in insertion order, which doubles as z-order. Lookups
//! are linear scans by `id`; the log is capped (1000 by default) so that
//! stays cheap. Writes are last-write-wins whole-object replacement.
//!
//! The `Board` methods are synchronous and run under the board mutex. The
//! async wrappers below take the lock themselves for callers that do not
//! also need to fan out in the same critical section.

use serde_json::Value;

use crate::services::board::with_board;
use crate::services::identity;
use crate::state::{AppState, Board, Object, now_ms, now_rfc3339};

/// Rewrite a numeric `id` as its decimal string so the object keeps the
/// id its client chose.
pub fn normalize_id(object: &mut Object) {
    if let Some(Value::Number(n)) = object.get("id") {
        let id = n.to_string();
        object.insert("id".into(), Value::String(id));
    }
}

/// Read an object's string id, treating empty strings as absent. Numeric
/// ids are only visible after `normalize_id`.
#[must_use]
pub fn object_id(object: &Object) -> Option<&str> {
    object
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Give an object a synthetic id if it has none, and stamp it with the
/// current server time.
pub fn stamp_object(object: &mut Object) {
    normalize_id(object);
    if object_id(object).is_none() {
        object.insert("id".into(), Value::String(identity::synthetic_object_id(now_ms())));
    }
    object.insert("timestamp".into(), Value::String(now_rfc3339()));
}

impl Board {
    /// Stamp and append an object, evicting the oldest entries past `cap`.
    /// Returns the stored object.
    pub fn append_object(&mut self, mut object: Object, cap: usize) -> Object {
        stamp_object(&mut object);
        self.objects.push(object.clone());
        if self.objects.len() > cap {
            let excess = self.objects.len() - cap;
            self.objects.drain(..excess);
        }
        object
    }

    /// Replace the object whose id is `target` in place. Unknown ids are not
    /// inserted. Returns whether a replacement happened.
    pub fn replace_object(&mut self, target: &str, object: Object) -> bool {
        let Some(slot) = self
            .objects
            .iter_mut()
            .find(|existing| object_id(existing) == Some(target))
        else {
            return false;
        };
        *slot = object;
        true
    }

    /// Drop every object whose id is `target`. Returns whether anything was removed.
    pub fn remove_object(&mut self, target: &str) -> bool {
        let before = self.objects.len();
        self.objects.retain(|existing| object_id(existing) != Some(target));
        self.objects.len() != before
    }

    /// Empty the object log. The roster is untouched.
    pub fn clear_objects(&mut self) {
        self.objects.clear();
    }
}

// =============================================================================
// LOCKING WRAPPERS
// =============================================================================

/// Append an object to a live board. `None` if the board is not live.
pub async fn append_object(state: &AppState, board_id: &str, object: Object) -> Option<Object> {
    let cap = state.config.max_board_objects;
    with_board(state, board_id, |board| board.append_object(object, cap)).await
}

/// Replace an object on a live board. `false` if the board or object is missing.
pub async fn replace_object(state: &AppState, board_id: &str, object_id: &str, object: Object) -> bool {
    with_board(state, board_id, |board| board.replace_object(object_id, object))
        .await
        .unwrap_or(false)
}

/// Remove an object from a live board. `false` if nothing was removed.
pub async fn remove_object(state: &AppState, board_id: &str, object_id: &str) -> bool {
    with_board(state, board_id, |board| board.remove_object(object_id))
        .await
        .unwrap_or(false)
}

/// Clear a live board's object log. `false` if the board is not live.
pub async fn clear_objects(state: &AppState, board_id: &str) -> bool {
    with_board(state, board_id, Board::clear_objects).await.is_some()
}

#[cfg(test)]
#[path = "object_test.rs"]
mod tests;
