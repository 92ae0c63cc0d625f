//! WebSocket stream of one session's ledger events.

mod handler;

pub use handler::ws_handler;
