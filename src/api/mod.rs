// HTTP and WebSocket APIs

mod ingestion;
pub mod protocol;
pub mod status;
pub mod websocket;

pub use ingestion::{create_ingestion_router, AppState};
pub use status::{create_status_router, StatusAppState};
pub use websocket::{create_ws_router, ws_handler, RelayConnection, WsAppState};
