use crate::libs::snapshot_store::{SnapshotStore, StoreRef, Stream};
use chrono::Local;
use gpuview_sampler::LocalSampler;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;

#[derive(Debug, PartialEq, Eq)]
pub enum SampleOutcome {
    Stored(u64),
    /// The sampler reported an error, nothing was stored.
    Failed(String),
}

/// Takes one sample and appends it to the local stream. `Err` only for
/// storage failures.
pub async fn sample_once<S: LocalSampler>(
    store: &dyn SnapshotStore,
    sampler: &S,
) -> eyre::Result<SampleOutcome> {
    let mut snapshot = sampler.sample().await;
    if let Some(error) = snapshot.error.take() {
        return Ok(SampleOutcome::Failed(error));
    }
    snapshot.timestamp = Local::now().naive_local();
    let id = store.append_snapshot(Stream::Local, &snapshot)?;
    Ok(SampleOutcome::Stored(id))
}

/// Samples until the sampler fails. The failure is handed to `fatal` so the
/// process can shut down; storage errors only cost the current cycle.
pub async fn run<S: LocalSampler>(
    store: StoreRef,
    sampler: S,
    every: Duration,
    fatal: oneshot::Sender<String>,
) {
    loop {
        match sample_once(store.as_ref(), &sampler).await {
            Ok(SampleOutcome::Stored(id)) => log::trace!("stored local sample {id}"),
            Ok(SampleOutcome::Failed(reason)) => {
                log::error!("local gpu sampling failed, shutting down: {reason}");
                let _ = fatal.send(reason);
                return;
            }
            Err(e) => log::error!("failed to persist local sample: {e}"),
        }
        sleep(every).await;
    }
}

/// Waits for the sampling loop to give up. A loop that died without
/// reporting, a panic in the sampler for one, counts as a failure too.
pub async fn stopped(fatal: oneshot::Receiver<String>) -> String {
    fatal
        .await
        .unwrap_or_else(|_| "sampling loop stopped unexpectedly".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::snapshot_store::{MemoryStore, StoredRecord};
    use chrono::{DateTime, NaiveDateTime, Utc};
    use eyre::eyre;
    use gpuview_shared::HostSnapshot;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replays a script, then keeps failing.
    struct ScriptedSampler(Mutex<VecDeque<HostSnapshot>>);

    impl ScriptedSampler {
        fn new(script: Vec<HostSnapshot>) -> Self {
            Self(Mutex::new(script.into()))
        }
    }

    impl LocalSampler for ScriptedSampler {
        async fn sample(&self) -> HostSnapshot {
            self.0
                .lock()
                .expect("script")
                .pop_front()
                .unwrap_or_else(|| HostSnapshot::failed("gpu-01", NaiveDateTime::default(), "script over"))
        }
    }

    struct CrashingSampler;

    impl LocalSampler for CrashingSampler {
        async fn sample(&self) -> HostSnapshot {
            panic!("driver crashed")
        }
    }

    /// Refuses every write.
    #[derive(Default)]
    struct ReadOnlyStore(AtomicUsize);

    impl SnapshotStore for ReadOnlyStore {
        fn append_at(&self, _: Stream, _: String, _: DateTime<Utc>) -> eyre::Result<u64> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(eyre!("disk full"))
        }
        fn latest(&self, _: Stream) -> eyre::Result<Option<StoredRecord>> {
            Ok(None)
        }
        fn page(&self, _: Stream, _: Option<u64>, _: usize) -> eyre::Result<Vec<StoredRecord>> {
            Ok(vec![])
        }
        fn delete_older_than(&self, _: Stream, _: DateTime<Utc>) -> eyre::Result<usize> {
            Ok(0)
        }
    }

    fn healthy() -> HostSnapshot {
        HostSnapshot::new("gpu-01", NaiveDateTime::default(), vec![])
    }

    #[tokio::test]
    async fn stores_healthy_samples_with_a_fresh_timestamp() {
        let store = MemoryStore::new();
        let sampler = ScriptedSampler::new(vec![healthy()]);

        let outcome = sample_once(&store, &sampler).await.expect("sample");
        assert_eq!(outcome, SampleOutcome::Stored(1));

        let record = store.latest(Stream::Local).expect("latest").expect("some");
        let stored: HostSnapshot = record.decode().expect("decode");
        assert_eq!(stored.hostname, "gpu-01");
        assert!(stored.timestamp > NaiveDateTime::default());
    }

    #[tokio::test]
    async fn sampler_errors_are_not_stored() {
        let store = MemoryStore::new();
        let sampler = ScriptedSampler::new(vec![]);

        let outcome = sample_once(&store, &sampler).await.expect("sample");
        assert_eq!(outcome, SampleOutcome::Failed("script over".into()));
        assert!(store.latest(Stream::Local).expect("latest").is_none());
    }

    #[tokio::test]
    async fn loop_escalates_sampler_failure() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let sampler = ScriptedSampler::new(vec![healthy(), healthy(), healthy()]);
        let (tx, rx) = oneshot::channel();

        let task = tokio::spawn(run(store.clone(), sampler, Duration::from_millis(5), tx));
        let reason = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("loop should fail in time")
            .expect("reason");

        assert_eq!(reason, "script over");
        task.await.expect("loop ends after escalating");
        assert_eq!(store.all(Stream::Local).expect("all").len(), 3);
    }

    #[tokio::test]
    async fn storage_errors_do_not_stop_the_loop() {
        let store = Arc::new(ReadOnlyStore::default());
        let sampler = ScriptedSampler::new(vec![healthy(), healthy()]);
        let (tx, rx) = oneshot::channel();

        tokio::spawn(run(store.clone(), sampler, Duration::from_millis(5), tx));
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("loop should reach the failing sample")
            .expect("reason");

        assert_eq!(store.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_crashed_loop_is_a_failure_too() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let (tx, rx) = oneshot::channel();

        let task = tokio::spawn(run(store, CrashingSampler, Duration::from_millis(5), tx));
        let reason = tokio::time::timeout(Duration::from_secs(5), stopped(rx))
            .await
            .expect("crash should be noticed in time");

        assert_eq!(reason, "sampling loop stopped unexpectedly");
        assert!(task.await.is_err());
    }
}
