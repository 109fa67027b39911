//! Session service — the lifecycle of one board connection.
//!
//! DESIGN
//! ======
//! A `Session` is transport-agnostic: the websocket route feeds it text and
//! writes back whatever it returns, so the whole protocol can be driven from
//! tests with plain channels.
//!
//! LIFECYCLE
//! =========
//! `Connecting → AwaitingJoin → Active → Closing → Closed`
//! 1. Transport accepted → `accept()`
//! 2. First message must be `user_join` → `join()`; anything else is fatal
//! 3. Each later message → `handle_text()`; malformed events are skipped
//! 4. Disconnect, fatal error or eviction → `teardown()`, exactly once
//!
//! A connection only acts on the board while it still owns its member slot.
//! Once evicted or superseded, its next event ends the session.
//!
//! Event handlers mutate the board and fan out inside one critical section
//! so every member sees mutations in commit order. Handlers never write to
//! the socket; only `ping` produces a direct reply.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::message::{ClientEvent, ParseError, ServerEvent};
use crate::services::board::{self, Departure, with_board};
use crate::services::broadcast::{self, Delivery, FALLBACK_NAME};
use crate::services::identity;
use crate::services::object::{normalize_id, object_id};
use crate::state::{AppState, Board, UserSession};

/// Color used in `cursor_moved` when the mover is no longer on the roster.
const FALLBACK_COLOR: &str = "#999999";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    AwaitingJoin,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid json: {0}")]
    InvalidJson(serde_json::Error),
    #[error("first message must be user_join, got {0}")]
    ExpectedJoin(String),
    #[error("message not allowed in phase {0:?}")]
    WrongPhase(Phase),
    #[error("connection no longer holds a seat on the board")]
    Evicted,
    #[error("failed to encode {kind}: {source}")]
    Encode { kind: &'static str, source: serde_json::Error },
    #[error("transport error: {0}")]
    Transport(#[from] axum::Error),
}

/// Everything the transport needs once a join succeeds.
pub struct Joined {
    /// Snapshot to write to the socket before anything from `rx`.
    pub init: ServerEvent,
    /// Events fanned out to this connection by the board.
    pub rx: mpsc::Receiver<Arc<ServerEvent>>,
}

/// Decision returned by an event handler. The session owns delivery.
#[derive(Debug)]
enum Outcome {
    /// Fan out to every member including the sender.
    Broadcast(ServerEvent),
    /// Fan out to every member except the sender.
    BroadcastExcludeSender(ServerEvent),
    /// Nothing to deliver.
    Ignore,
}

// =============================================================================
// SESSION
// =============================================================================

pub struct Session {
    state: AppState,
    board_id: String,
    connection_id: Uuid,
    phase: Phase,
    /// Last known identity; kept after teardown for the `user_left` name.
    user: Option<UserSession>,
}

impl Session {
    #[must_use]
    pub fn new(state: AppState, board_id: impl Into<String>) -> Self {
        Self { state, board_id: board_id.into(), connection_id: Uuid::new_v4(), phase: Phase::Connecting, user: None }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    #[must_use]
    pub fn user(&self) -> Option<&UserSession> {
        self.user.as_ref()
    }

    /// Transport handshake done; wait for `user_join`.
    pub fn accept(&mut self) {
        if self.phase == Phase::Connecting {
            self.phase = Phase::AwaitingJoin;
        }
    }

    /// Handle the first message. On success the user is on the board, peers
    /// have been told, and the caller must send `init` before draining `rx`.
    ///
    /// # Errors
    ///
    /// Any error here is a protocol violation and the connection must close.
    pub async fn join(&mut self, text: &str) -> Result<Joined, SessionError> {
        if self.phase != Phase::AwaitingJoin {
            return Err(SessionError::WrongPhase(self.phase));
        }

        let req = match ClientEvent::parse(text) {
            Ok(ClientEvent::UserJoin(req)) => req,
            Ok(other) => {
                self.phase = Phase::Closing;
                return Err(SessionError::ExpectedJoin(other.kind().to_owned()));
            }
            Err(ParseError::Malformed(e)) => {
                self.phase = Phase::Closing;
                return Err(SessionError::ExpectedJoin(format!("malformed message ({e})")));
            }
            Err(ParseError::InvalidJson(e)) => {
                self.phase = Phase::Closing;
                return Err(SessionError::InvalidJson(e));
            }
        };

        let resolved = identity::resolve(&req);
        let (tx, rx) = mpsc::channel(self.state.config.client_queue_capacity);
        let joined = board::join_board(&self.state, &self.board_id, resolved, self.connection_id, tx).await;
        let session = joined.session;
        self.user = Some(session.clone());
        self.phase = Phase::Active;

        broadcast::broadcast(
            &self.state,
            &self.board_id,
            ServerEvent::UserJoined { user: session.summary() },
            Some(session.id.as_str()),
        )
        .await;

        let init = ServerEvent::Init {
            user_id: session.id,
            user_name: session.name,
            user_color: session.color,
            session_id: session.session_id,
            users: joined.snapshot.users.clone(),
            board_data: joined.snapshot,
        };
        Ok(Joined { init, rx })
    }

    /// Handle one message in the active loop. Returns a direct reply for the
    /// sender, if any.
    ///
    /// # Errors
    ///
    /// `InvalidJson` if the text is not JSON at all, `Evicted` if this
    /// connection lost its seat on the board; either way the connection must
    /// close. Malformed or unknown events are logged and skipped.
    pub async fn handle_text(&mut self, text: &str) -> Result<Option<ServerEvent>, SessionError> {
        if self.phase != Phase::Active {
            return Err(SessionError::WrongPhase(self.phase));
        }
        match ClientEvent::parse(text) {
            Ok(event) => self.handle_event(event).await,
            Err(ParseError::Malformed(e)) => {
                warn!(board_id = %self.board_id, error = %e, "session: skipping malformed event");
                Ok(None)
            }
            Err(ParseError::InvalidJson(e)) => Err(SessionError::InvalidJson(e)),
        }
    }

    /// Apply one decoded event. Returns a direct reply for the sender, if any.
    ///
    /// # Errors
    ///
    /// `WrongPhase` outside the active loop. `Evicted` if another connection
    /// took over this user id or the member was dropped for failing
    /// delivery; the event is discarded and the session moves to `Closing`.
    pub async fn handle_event(&mut self, event: ClientEvent) -> Result<Option<ServerEvent>, SessionError> {
        if self.phase != Phase::Active {
            return Err(SessionError::WrongPhase(self.phase));
        }
        let Some(user_id) = self.user.as_ref().map(|u| u.id.clone()) else {
            return Err(SessionError::WrongPhase(self.phase));
        };

        match &event {
            ClientEvent::Ping => return Ok(Some(ServerEvent::Pong)),
            ClientEvent::CursorMove { .. } => {}
            other => debug!(board_id = %self.board_id, %user_id, kind = other.kind(), "session: event"),
        }

        let renamed = match &event {
            ClientEvent::UpdateUser { new_name, .. } => Some(new_name.clone()),
            _ => None,
        };

        let cap = self.state.config.max_board_objects;
        let board_id = self.board_id.clone();
        let connection_id = self.connection_id;
        let delivery = with_board(&self.state, &self.board_id, |board| {
            if !board
                .members
                .get(&user_id)
                .is_some_and(|m| m.connection_id == connection_id)
            {
                return None;
            }
            let delivery = match dispatch(board, &board_id, &user_id, event, cap) {
                Outcome::Broadcast(out) => board.fan_out(&Arc::new(out), None),
                Outcome::BroadcastExcludeSender(out) => board.fan_out(&Arc::new(out), Some(user_id.as_str())),
                Outcome::Ignore => Delivery::default(),
            };
            Some(delivery)
        })
        .await
        .flatten();

        let Some(delivery) = delivery else {
            warn!(board_id = %self.board_id, %user_id, "session: event from evicted connection; closing");
            self.phase = Phase::Closing;
            return Err(SessionError::Evicted);
        };

        broadcast::prune(&self.state, &self.board_id, &delivery.failed).await;
        if let (Some(name), Some(user)) = (renamed, self.user.as_mut()) {
            user.name = name;
        }
        Ok(None)
    }

    /// Leave the board and tell the remaining members. Runs once; later
    /// calls are no-ops. Nothing is announced if this connection no longer
    /// held the seat: a successor owns it, or eviction already announced
    /// the departure.
    pub async fn teardown(&mut self) {
        if matches!(self.phase, Phase::Closed) {
            return;
        }
        self.phase = Phase::Closing;

        if let Some(user) = &self.user {
            let departure = board::part_board(&self.state, &self.board_id, &user.id, self.connection_id).await;
            if let Departure::Removed { name, .. } = departure {
                let user_name = if name.is_empty() { FALLBACK_NAME.to_owned() } else { name };
                broadcast::broadcast(
                    &self.state,
                    &self.board_id,
                    ServerEvent::UserLeft { user_id: user.id.clone(), user_name },
                    None,
                )
                .await;
            }
            info!(board_id = %self.board_id, user_id = %user.id, "session: closed");
        }

        self.phase = Phase::Closed;
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Apply an event to the board and decide what to fan out. Runs under the
/// board mutex.
fn dispatch(board: &mut Board, board_id: &str, user_id: &str, event: ClientEvent, cap: usize) -> Outcome {
    match event {
        ClientEvent::AddObject { object } => {
            let object = board.append_object(object, cap);
            Outcome::Broadcast(ServerEvent::ObjectAdded { object })
        }
        ClientEvent::ModifyObject { mut object, object_id: target } => {
            normalize_id(&mut object);
            let target = target
                .filter(|id| !id.is_empty())
                .or_else(|| object_id(&object).map(str::to_owned));
            if let Some(target) = &target {
                if object_id(&object).is_none() {
                    object.insert("id".into(), serde_json::Value::String(target.clone()));
                }
                if !board.replace_object(target, object.clone()) {
                    debug!(%board_id, object_id = %target, "modify for unknown object; broadcasting anyway");
                }
            }
            Outcome::Broadcast(ServerEvent::ObjectModified { object, object_id: target })
        }
        ClientEvent::RemoveObject { object_id: target, mut object } => {
            if let Some(object) = object.as_mut() {
                normalize_id(object);
            }
            let target = target
                .filter(|id| !id.is_empty())
                .or_else(|| object.as_ref().and_then(object_id).map(str::to_owned));
            if let Some(target) = &target {
                board.remove_object(target);
            }
            Outcome::Broadcast(ServerEvent::ObjectRemoved { object_id: target })
        }
        ClientEvent::ClearBoard { user_id: claimed_id, user_name, board_id: claimed_board } => {
            board.clear_objects();
            let user_name = user_name.unwrap_or_else(|| {
                board
                    .user(user_id)
                    .map_or_else(|| FALLBACK_NAME.to_owned(), |u| u.name.clone())
            });
            Outcome::Broadcast(ServerEvent::ClearBoard {
                user_id: claimed_id.unwrap_or_else(|| user_id.to_owned()),
                user_name,
                board_id: claimed_board.unwrap_or_else(|| board_id.to_owned()),
            })
        }
        ClientEvent::UpdateUser { new_name, old_name } => {
            let previous = board.update_user_name(user_id, &new_name);
            Outcome::BroadcastExcludeSender(ServerEvent::UserUpdated {
                user_id: user_id.to_owned(),
                old_name: old_name.or(previous),
                new_name,
            })
        }
        ClientEvent::CursorMove { position } => {
            let (user_name, user_color) = board.set_cursor(user_id, position).map_or_else(
                || (FALLBACK_NAME.to_owned(), FALLBACK_COLOR.to_owned()),
                |u| (u.name.clone(), u.color.clone()),
            );
            Outcome::BroadcastExcludeSender(ServerEvent::CursorMoved {
                user_id: user_id.to_owned(),
                user_name,
                user_color,
                position,
            })
        }
        ClientEvent::UserJoin(_) => {
            debug!(%board_id, %user_id, "ignoring repeated user_join");
            Outcome::Ignore
        }
        ClientEvent::Ping | ClientEvent::Unknown => Outcome::Ignore,
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
