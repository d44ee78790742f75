//! Finds the last moment processes let go of a GPU.
//!
//! When a process exits, the driver drops it from the process list before it
//! reports the memory as free. For a few polls the reported usage is then far
//! above what the listed processes hold. Walking the fleet history from the
//! present backwards, the release sits between the first diverging record and
//! the older record right behind it whose usage still adds up.

use crate::libs::snapshot_store::{newest_first, SnapshotStore, StoredRecord, Stream};
use gpuview_shared::{FleetSnapshot, GpuSample};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ReleasedProcess {
    pub user: String,
    pub command: String,
    pub gpu_memory_usage: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseEvent {
    /// The older record, the last one where usage reconciled.
    pub row: u64,
    /// The newer record, the first one where usage diverged.
    pub last_row: u64,
    pub diff_now: u64,
    pub diff_prev: u64,
    pub processes: Vec<ReleasedProcess>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReleaseDetector {
    threshold: u64,
}

impl ReleaseDetector {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    pub fn find(
        &self,
        store: &dyn SnapshotStore,
        hostname: &str,
        gpu_index: u32,
    ) -> eyre::Result<Option<ReleaseEvent>> {
        self.scan(newest_first(store, Stream::Fleet), hostname, gpu_index)
    }

    /// `records` must be ordered newest first. Stops at the first transition.
    pub fn scan<I>(
        &self,
        records: I,
        hostname: &str,
        gpu_index: u32,
    ) -> eyre::Result<Option<ReleaseEvent>>
    where
        I: IntoIterator<Item = eyre::Result<StoredRecord>>,
    {
        let mut newer: Option<(u64, GpuSample)> = None;

        for record in records {
            let record = record?;
            let fleet: FleetSnapshot = match record.decode() {
                Ok(fleet) => fleet,
                Err(e) => {
                    log::warn!("release scan: {e}");
                    continue;
                }
            };
            let Some(gpu) = fleet
                .host(hostname)
                .filter(|h| h.is_healthy())
                .and_then(|h| h.gpu(gpu_index))
            else {
                continue;
            };

            if let Some((last_row, prev)) = &newer {
                let diff_prev = prev.divergence();
                let diff_now = gpu.divergence();
                if diff_prev > self.threshold && diff_now < self.threshold {
                    return Ok(Some(ReleaseEvent {
                        row: record.id,
                        last_row: *last_row,
                        diff_now,
                        diff_prev,
                        processes: vanished(gpu, prev),
                    }));
                }
            }
            newer = Some((record.id, gpu.clone()));
        }

        Ok(None)
    }
}

/// Processes of the users present in `older` but gone from `newer`.
fn vanished(older: &GpuSample, newer: &GpuSample) -> Vec<ReleasedProcess> {
    let remaining = newer.usernames();
    older
        .processes
        .iter()
        .filter(|p| !remaining.contains(p.username.as_str()))
        .map(|p| ReleasedProcess {
            user: p.username.clone(),
            command: p.command.clone(),
            gpu_memory_usage: p.gpu_memory_usage,
        })
        .collect()
}
