//! HTTP API for creating environments

mod handlers;
mod server;
mod types;

pub use handlers::AppState;
pub use server::{router, Server, MAX_BODY_BYTES};
pub use types::*;
