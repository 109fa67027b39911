//! Broadcast service — fan-out of server events to board members.
//!
//! DESIGN
//! ======
//! Each connection drains its own bounded queue into its socket. Fan-out
//! never awaits a peer: it `try_send`s one shared `Arc<ServerEvent>` into
//! every recipient queue while holding the board mutex, so all members of a
//! board see events in the same order. A full queue (stalled peer) or a
//! closed one (dead peer) is recorded as a failure.
//!
//! Failed recipients are removed only after the pass, via `prune`, never
//! while iterating members. An evicted member counts as disconnected: `prune`
//! announces `user_left` for it straight away. Removing a member also drops
//! the last sender of its queue, so its connection task sees the queue close
//! and winds down without announcing a second time.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::message::ServerEvent;
use crate::services::board::{self, Departure, with_board};
use crate::state::{AppState, Board};

/// Name announced in `user_left` when the member never had one.
pub const FALLBACK_NAME: &str = "User";

/// A member that could not be reached during fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: String,
    pub connection_id: Uuid,
}

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: Vec<Recipient>,
}

impl Board {
    /// Enqueue `event` for every member except `exclude`. Never blocks.
    #[must_use]
    pub fn fan_out(&self, event: &Arc<ServerEvent>, exclude: Option<&str>) -> Delivery {
        let mut delivery = Delivery::default();
        for (user_id, member) in &self.members {
            if exclude == Some(user_id.as_str()) {
                continue;
            }
            match member.tx.try_send(Arc::clone(event)) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(%user_id, kind = event.kind(), "broadcast: client queue full; evicting");
                    delivery
                        .failed
                        .push(Recipient { user_id: user_id.clone(), connection_id: member.connection_id });
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%user_id, kind = event.kind(), "broadcast: client queue closed");
                    delivery
                        .failed
                        .push(Recipient { user_id: user_id.clone(), connection_id: member.connection_id });
                }
            }
        }
        delivery
    }
}

/// Broadcast an event to a board, optionally excluding one user, then
/// evict anyone it could not reach.
pub async fn broadcast(state: &AppState, board_id: &str, event: ServerEvent, exclude: Option<&str>) -> Delivery {
    let event = Arc::new(event);
    let Some(delivery) = with_board(state, board_id, |board| board.fan_out(&event, exclude)).await else {
        return Delivery::default();
    };
    if !event.is_cursor() {
        debug!(%board_id, kind = event.kind(), delivered = delivery.delivered, "broadcast");
    }
    prune(state, board_id, &delivery.failed).await;
    delivery
}

/// Deregister members that failed delivery and announce each departure to
/// the rest of the board. An announcement that itself fails delivery evicts
/// that member too, so this runs until no failures remain.
pub async fn prune(state: &AppState, board_id: &str, failed: &[Recipient]) {
    let mut pending: Vec<Recipient> = failed.to_vec();
    while let Some(recipient) = pending.pop() {
        let departure = board::part_board(state, board_id, &recipient.user_id, recipient.connection_id).await;
        warn!(%board_id, user_id = %recipient.user_id, ?departure, "evicted unreachable client");

        let Departure::Removed { name, closed: false } = departure else {
            continue;
        };
        let user_name = if name.is_empty() { FALLBACK_NAME.to_owned() } else { name };
        let event = Arc::new(ServerEvent::UserLeft { user_id: recipient.user_id, user_name });
        if let Some(delivery) = with_board(state, board_id, |board| board.fan_out(&event, None)).await {
            pending.extend(delivery.failed);
        }
    }
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
