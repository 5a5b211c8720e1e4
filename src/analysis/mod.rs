pub mod dosing;
pub mod dto;
pub mod extract;
pub mod handlers;
pub mod narrative;
pub mod numeric;
pub mod prompt;
pub mod service;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::router()
}
