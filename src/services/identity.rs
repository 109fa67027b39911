//! Identity service — user/session ids, display names and presence colors.
//!
//! DESIGN
//! ======
//! Identities are ephemeral: nothing is stored beyond the life of a board.
//! Color choice is a pure function of the current roster so two users on
//! the same board never share a color until the palette runs out.

use rand::Rng;
use rand::seq::IndexedRandom;
use uuid::Uuid;

use crate::message::JoinRequest;
use crate::state::UserSummary;

/// Presence colors, in allocation order.
pub const PALETTE: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#FFD166", "#06D6A0", "#118AB2", "#EF476F", "#7209B7", "#3A86FF", "#FB5607", "#8338EC",
];

const ADJECTIVES: [&str; 8] = ["Creative", "Artistic", "Clever", "Bright", "Quick", "Witty", "Sharp", "Smart"];
const NOUNS: [&str; 8] = ["Artist", "Designer", "Creator", "Thinker", "Drafter", "Sketch", "Drawer", "Planner"];

/// Identity fields settled before the user is placed on a board. Color is
/// assigned later, under the board lock, against the live roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub user_id: String,
    pub user_name: String,
    pub session_id: String,
}

/// Fill in whatever the client did not supply.
///
/// A client without a user id gets a fresh user id and a fresh session id
/// even if it sent a stale session id.
#[must_use]
pub fn resolve(req: &JoinRequest) -> ResolvedIdentity {
    let user_id = non_empty(req.user_id.as_deref());
    let (user_id, session_id) = match user_id {
        Some(id) => (
            id.to_owned(),
            non_empty(req.session_id.as_deref()).map_or_else(new_id, str::to_owned),
        ),
        None => (new_id(), new_id()),
    };
    let user_name = non_empty(req.user_name.as_deref()).map_or_else(generate_name, str::to_owned);

    ResolvedIdentity { user_id, user_name, session_id }
}

/// Pick the first palette color nobody on the roster is using, falling back
/// to `palette[roster.len() % 10]` once all ten are taken.
#[must_use]
pub fn allocate_color(roster: &[UserSummary]) -> &'static str {
    PALETTE
        .iter()
        .find(|color| !roster.iter().any(|u| u.color == **color))
        .copied()
        .unwrap_or(PALETTE[roster.len() % PALETTE.len()])
}

/// Random "Adjective Noun" display name. Not unique.
#[must_use]
pub fn generate_name() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Quick");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("Artist");
    format!("{adjective} {noun}")
}

/// Synthetic object id: `obj_<millis>_<four random digits>`.
#[must_use]
pub fn synthetic_object_id(now_ms: i64) -> String {
    let suffix: u16 = rand::rng().random_range(1000..=9999);
    format!("obj_{now_ms}_{suffix}")
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
