//! HTTP surface of the relay

mod api;

pub use api::{router, run_server, AppState};
