//! WebSocket handler — one board connection per socket.
//!
//! DESIGN
//! ======
//! The route only moves bytes. Everything protocol-shaped lives in
//! `services::session`; this module feeds it text frames and writes back
//! whatever it returns, plus everything peers fan out to this connection.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade on `/ws/{board_id}` → session accepted
//! 2. First text frame must be `user_join` → `init` written to the socket
//! 3. `select!` over socket reads and the connection's outbound queue
//! 4. Disconnect, fatal error or eviction (queue closed) → teardown, close

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tracing::{debug, info, warn};

use crate::message::ServerEvent;
use crate::services::session::{Joined, Session, SessionError};
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state, board_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, board_id: String) {
    let mut session = Session::new(state, board_id);
    session.accept();
    info!(board_id = %session.board_id(), "ws: client connected");

    if let Err(e) = drive(&mut socket, &mut session).await {
        warn!(board_id = %session.board_id(), error = %e, "ws: closing connection");
    }

    session.teardown().await;
    // The peer may already be gone.
    let _ = socket.send(Message::Close(None)).await;
    info!(board_id = %session.board_id(), "ws: client disconnected");
}

/// Run the handshake and the relay loop until the connection ends.
async fn drive(socket: &mut WebSocket, session: &mut Session) -> Result<(), SessionError> {
    let Some(first) = first_text(socket).await? else {
        return Ok(());
    };
    let Joined { init, mut rx } = session.join(&first).await?;
    send_event(socket, &init).await?;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { return Ok(()) };
                match msg? {
                    Message::Text(text) => {
                        if let Some(reply) = session.handle_text(text.as_str()).await? {
                            send_event(socket, &reply).await?;
                        }
                    }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    warn!(board_id = %session.board_id(), "ws: outbound queue closed; client evicted");
                    return Ok(());
                };
                send_event(socket, &event).await?;
            }
        }
    }
}

/// Wait for the first text frame. `None` if the client leaves first.
async fn first_text(socket: &mut WebSocket) -> Result<Option<String>, SessionError> {
    while let Some(msg) = socket.recv().await {
        match msg? {
            Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
            Message::Binary(_) => return Err(SessionError::ExpectedJoin("binary message".into())),
            Message::Close(_) => return Ok(None),
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    Ok(None)
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), SessionError> {
    let json = serde_json::to_string(event).map_err(|source| SessionError::Encode { kind: event.kind(), source })?;
    if !event.is_cursor() {
        debug!(kind = event.kind(), "ws: send event");
    }
    socket.send(Message::Text(json.into())).await?;
    Ok(())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
