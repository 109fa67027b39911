//! Message — the JSON envelopes exchanged over a board connection.
//!
//! ARCHITECTURE
//! ============
//! Every message is a JSON object with a `type` discriminator. Inbound
//! messages decode into `ClientEvent`, outbound ones encode from
//! `ServerEvent`. Field names (including the camelCase ones) are fixed by
//! the browser client and must not change.
//!
//! DESIGN
//! ======
//! Decoding is two-stage so callers can tell garbage from a bad event:
//! text that is not JSON at all is `ParseError::InvalidJson` (fatal for the
//! connection), while valid JSON missing a required field is
//! `ParseError::Malformed` (the event is skipped). Unknown `type` values
//! decode to `ClientEvent::Unknown` and are ignored by the session.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::state::{BoardSnapshot, Object, Point, UserSummary};

// =============================================================================
// INBOUND
// =============================================================================

/// Identity hints sent with `user_join`. Any missing field is minted fresh.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JoinRequest {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    #[serde(rename = "userName", default)]
    pub user_name: Option<String>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    UserJoin(JoinRequest),
    AddObject {
        object: Object,
    },
    ModifyObject {
        object: Object,
        #[serde(default, deserialize_with = "lenient_id")]
        object_id: Option<String>,
    },
    RemoveObject {
        #[serde(default, deserialize_with = "lenient_id")]
        object_id: Option<String>,
        #[serde(default)]
        object: Option<Object>,
    },
    ClearBoard {
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        user_name: Option<String>,
        #[serde(rename = "boardId", default)]
        board_id: Option<String>,
    },
    UpdateUser {
        #[serde(rename = "newName")]
        new_name: String,
        #[serde(rename = "oldName", default)]
        old_name: Option<String>,
    },
    CursorMove {
        position: Point,
    },
    Ping,
    #[serde(other)]
    Unknown,
}

/// Accept an object id given as a string or a number. Anything else counts
/// as absent.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(id)) => Some(id),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid json: {0}")]
    InvalidJson(serde_json::Error),
    #[error("malformed event: {0}")]
    Malformed(serde_json::Error),
}

impl ClientEvent {
    /// Decode one inbound text message.
    ///
    /// # Errors
    ///
    /// `InvalidJson` if the text is not JSON, `Malformed` if it is JSON but
    /// not a well-formed event.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(text).map_err(ParseError::InvalidJson)?;
        Self::deserialize(value).map_err(ParseError::Malformed)
    }

    /// Wire name of the event, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserJoin(_) => "user_join",
            Self::AddObject { .. } => "add_object",
            Self::ModifyObject { .. } => "modify_object",
            Self::RemoveObject { .. } => "remove_object",
            Self::ClearBoard { .. } => "clear_board",
            Self::UpdateUser { .. } => "update_user",
            Self::CursorMove { .. } => "cursor_move",
            Self::Ping => "ping",
            Self::Unknown => "unknown",
        }
    }
}

// =============================================================================
// OUTBOUND
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Snapshot plus the caller's own identity. First message after join.
    Init {
        user_id: String,
        user_name: String,
        user_color: String,
        session_id: String,
        board_data: BoardSnapshot,
        users: Vec<UserSummary>,
    },
    UserJoined {
        user: UserSummary,
    },
    ObjectAdded {
        object: Object,
    },
    ObjectModified {
        object: Object,
        object_id: Option<String>,
    },
    ObjectRemoved {
        object_id: Option<String>,
    },
    ClearBoard {
        user_id: String,
        user_name: String,
        #[serde(rename = "boardId")]
        board_id: String,
    },
    UserUpdated {
        user_id: String,
        #[serde(rename = "oldName")]
        old_name: Option<String>,
        #[serde(rename = "newName")]
        new_name: String,
    },
    CursorMoved {
        user_id: String,
        user_name: String,
        user_color: String,
        position: Point,
    },
    UserLeft {
        user_id: String,
        user_name: String,
    },
    Pong,
}

impl ServerEvent {
    /// Wire name of the event, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::UserJoined { .. } => "user_joined",
            Self::ObjectAdded { .. } => "object_added",
            Self::ObjectModified { .. } => "object_modified",
            Self::ObjectRemoved { .. } => "object_removed",
            Self::ClearBoard { .. } => "clear_board",
            Self::UserUpdated { .. } => "user_updated",
            Self::CursorMoved { .. } => "cursor_moved",
            Self::UserLeft { .. } => "user_left",
            Self::Pong => "pong",
        }
    }

    /// Cursor traffic is high-volume and only logged at debug level.
    #[must_use]
    pub fn is_cursor(&self) -> bool {
        matches!(self, Self::CursorMoved { .. })
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
