use super::*;
use crate::services::board;
use crate::services::identity::ResolvedIdentity;
use crate::state::test_helpers::{anonymous_object, object_with_id, test_app_state};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

fn ids(board: &Board) -> Vec<String> {
    board
        .objects
        .iter()
        .filter_map(|o| object_id(o).map(str::to_owned))
        .collect()
}

async fn live_board(state: &AppState, board_id: &str) -> mpsc::Receiver<std::sync::Arc<crate::message::ServerEvent>> {
    let (tx, rx) = mpsc::channel(8);
    let resolved = ResolvedIdentity { user_id: "u1".into(), user_name: "Ann".into(), session_id: "s1".into() };
    board::join_board(state, board_id, resolved, Uuid::new_v4(), tx).await;
    rx
}

// =============================================================================
// object_id / stamp_object
// =============================================================================

#[test]
fn object_id_ignores_empty_and_non_string_ids() {
    assert_eq!(object_id(&object_with_id("o1")), Some("o1"));
    assert_eq!(object_id(&object_with_id("")), None);
    assert_eq!(object_id(&anonymous_object("rect")), None);

    let mut numeric = Object::new();
    numeric.insert("id".into(), json!(42));
    assert_eq!(object_id(&numeric), None);
}

#[test]
fn stamp_assigns_synthetic_id_and_timestamp() {
    let mut object = anonymous_object("circle");
    stamp_object(&mut object);

    let id = object_id(&object).unwrap();
    assert!(id.starts_with("obj_"));
    assert!(object.get("timestamp").and_then(Value::as_str).is_some());
    assert_eq!(object.get("type"), Some(&json!("circle")));
}

#[test]
fn stamp_keeps_numeric_client_id_as_string() {
    let mut object = Object::new();
    object.insert("id".into(), json!(42));
    stamp_object(&mut object);
    assert_eq!(object.get("id"), Some(&json!("42")));
}

#[test]
fn normalize_leaves_string_and_missing_ids_alone() {
    let mut named = object_with_id("o1");
    normalize_id(&mut named);
    assert_eq!(object_id(&named), Some("o1"));

    let mut anonymous = anonymous_object("rect");
    normalize_id(&mut anonymous);
    assert!(!anonymous.contains_key("id"));
}

#[test]
fn stamp_keeps_client_id_but_overwrites_timestamp() {
    let mut object = object_with_id("mine");
    object.insert("timestamp".into(), json!("yesterday"));
    stamp_object(&mut object);

    assert_eq!(object_id(&object), Some("mine"));
    assert_ne!(object.get("timestamp"), Some(&json!("yesterday")));
}

// =============================================================================
// Board log (sync)
// =============================================================================

#[test]
fn append_preserves_insertion_order() {
    let mut board = Board::new();
    for id in ["a", "b", "c"] {
        board.append_object(object_with_id(id), 1000);
    }
    assert_eq!(ids(&board), ["a", "b", "c"]);
}

#[test]
fn append_past_cap_keeps_latest_in_order() {
    let mut board = Board::new();
    for i in 0..1001 {
        board.append_object(object_with_id(&format!("o{i}")), 1000);
    }
    let ids = ids(&board);
    assert_eq!(ids.len(), 1000);
    assert_eq!(ids.first().map(String::as_str), Some("o1"));
    assert_eq!(ids.last().map(String::as_str), Some("o1000"));
}

#[test]
fn append_returns_stored_object() {
    let mut board = Board::new();
    let stored = board.append_object(anonymous_object("rect"), 1000);
    assert_eq!(board.objects[0], stored);
}

#[test]
fn replace_keeps_position() {
    let mut board = Board::new();
    for id in ["a", "b", "c"] {
        board.append_object(object_with_id(id), 1000);
    }
    let mut updated = object_with_id("b");
    updated.insert("fill".into(), json!("red"));

    assert!(board.replace_object("b", updated.clone()));
    assert_eq!(ids(&board), ["a", "b", "c"]);
    assert_eq!(board.objects[1], updated);
}

#[test]
fn replace_unknown_id_does_not_insert() {
    let mut board = Board::new();
    board.append_object(object_with_id("a"), 1000);
    assert!(!board.replace_object("zzz", object_with_id("zzz")));
    assert_eq!(ids(&board), ["a"]);
}

#[test]
fn remove_drops_matching_object() {
    let mut board = Board::new();
    for id in ["a", "b", "c"] {
        board.append_object(object_with_id(id), 1000);
    }
    assert!(board.remove_object("b"));
    assert_eq!(ids(&board), ["a", "c"]);
}

#[test]
fn remove_absent_is_noop() {
    let mut board = Board::new();
    board.append_object(object_with_id("a"), 1000);
    assert!(!board.remove_object("zzz"));
    assert_eq!(ids(&board), ["a"]);
}

#[test]
fn clear_empties_log_only() {
    let mut board = Board::new();
    board.append_object(object_with_id("a"), 1000);
    board.users.push(crate::state::UserSummary {
        id: "u1".into(),
        name: "Ann".into(),
        color: "#FF6B6B".into(),
        joined_at: String::new(),
    });

    board.clear_objects();
    assert!(board.objects.is_empty());
    assert_eq!(board.users.len(), 1);
    assert_eq!(board.background, "#FFFFFF");
}

// =============================================================================
// Locking wrappers (async)
// =============================================================================

#[tokio::test]
async fn wrappers_report_missing_board() {
    let state = test_app_state();
    assert!(append_object(&state, "nope", object_with_id("a")).await.is_none());
    assert!(!replace_object(&state, "nope", "a", object_with_id("a")).await);
    assert!(!remove_object(&state, "nope", "a").await);
    assert!(!clear_objects(&state, "nope").await);
}

#[tokio::test]
async fn wrappers_mutate_live_board() {
    let state = test_app_state();
    let _rx = live_board(&state, "b1").await;

    let stored = append_object(&state, "b1", anonymous_object("rect")).await.unwrap();
    let id = object_id(&stored).unwrap().to_owned();

    let mut updated = stored.clone();
    updated.insert("fill".into(), json!("blue"));
    assert!(replace_object(&state, "b1", &id, updated).await);

    let snapshot = board::board_snapshot(&state, "b1").await.unwrap();
    assert_eq!(snapshot.objects.len(), 1);
    assert_eq!(snapshot.objects[0].get("fill"), Some(&json!("blue")));

    assert!(remove_object(&state, "b1", &id).await);
    assert!(!remove_object(&state, "b1", &id).await);

    append_object(&state, "b1", object_with_id("x")).await;
    assert!(clear_objects(&state, "b1").await);
    assert!(board::board_snapshot(&state, "b1").await.unwrap().objects.is_empty());
    assert_eq!(board::list_board_users(&state, "b1").await.len(), 1);
}

#[tokio::test]
async fn wrapper_honours_configured_cap() {
    let state = crate::state::test_helpers::test_app_state_with(3, 8);
    let _rx = live_board(&state, "b1").await;
    for i in 0..5 {
        append_object(&state, "b1", object_with_id(&format!("o{i}"))).await;
    }
    let snapshot = board::board_snapshot(&state, "b1").await.unwrap();
    let ids: Vec<_> = snapshot.objects.iter().filter_map(object_id).collect();
    assert_eq!(ids, ["o2", "o3", "o4"]);
}
