//! The background loops. Each one owns its task and only talks to the others
//! through the snapshot store.

use crate::libs::shared_state::SharedState;
use gpuview_sampler::LocalSampler;
use tokio::sync::oneshot;

pub mod fleet_poller;
pub mod retention;
pub mod sampling;

/// Starts the sampling loop, the fleet poller and the retention sweeper.
/// `fatal` receives the sampler's error if the local GPUs become unreadable.
pub fn spawn<S: LocalSampler>(state: &SharedState, sampler: S, fatal: oneshot::Sender<String>) {
    let config = &state.app_config;
    log::info!(
        "sampling every {}s, polling every {}s, keeping {}h of history",
        config.sample_interval,
        config.poll_interval,
        config.retention_hours
    );

    tokio::spawn(sampling::run(
        state.store.clone(),
        sampler,
        config.sample_every(),
        fatal,
    ));
    tokio::spawn(fleet_poller::FleetPoller::from_state(state).run(config.poll_every()));
    tokio::spawn(retention::run(
        state.store.clone(),
        config.retention(),
        config.sweep_every(),
    ));
}
