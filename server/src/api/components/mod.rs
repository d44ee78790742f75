use crate::libs::shared_state::SharedState;
use axum::Router;

pub mod dashboard;
pub mod processes;
pub mod stats;

#[cfg(test)]
mod tests;

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .merge(stats::routes(state.clone()))
        .merge(processes::routes(state.clone()))
        .merge(dashboard::routes())
}
