use crate::libs::snapshot_store::{SnapshotStore, StoreRef, Stream};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Drops every record older than `horizon` from both streams. A failing
/// stream does not keep the other one from being swept.
pub fn sweep(store: &dyn SnapshotStore, horizon: DateTime<Utc>) -> eyre::Result<usize> {
    let mut removed = 0;
    let mut failure = None;
    for stream in Stream::ALL {
        match store.delete_older_than(stream, horizon) {
            Ok(n) => removed += n,
            Err(e) => {
                log::error!("retention sweep of the {stream} stream failed: {e}");
                failure = Some(e);
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(removed),
    }
}

/// Sweeps right away, then once per `every`. A failed sweep waits for the
/// next tick. The sweep runs on the blocking pool so the other loops keep
/// their runtime threads.
pub async fn run(store: StoreRef, retention: chrono::Duration, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let horizon = Utc::now() - retention;
        let sweep_store = store.clone();
        match tokio::task::spawn_blocking(move || sweep(sweep_store.as_ref(), horizon)).await {
            Ok(Ok(removed)) => {
                log::info!("retention sweep removed {removed} records older than {horizon}")
            }
            Ok(Err(_)) => {}
            Err(e) => log::error!("retention sweep aborted: {e}"),
        }
    }
}
