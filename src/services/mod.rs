//! Business logic behind the websocket route. Nothing here touches a socket.

pub mod board;
pub mod broadcast;
pub mod identity;
pub mod object;
pub mod session;
