use super::{SnapshotStore, StoredRecord, Stream};
use chrono::{DateTime, Utc};
use eyre::eyre;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Store that keeps both streams in process memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    local: RwLock<MemoryStream>,
    fleet: RwLock<MemoryStream>,
}

#[derive(Default)]
struct MemoryStream {
    last_id: u64,
    records: BTreeMap<u64, StoredRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, stream: Stream) -> &RwLock<MemoryStream> {
        match stream {
            Stream::Local => &self.local,
            Stream::Fleet => &self.fleet,
        }
    }

    fn read(&self, stream: Stream) -> eyre::Result<RwLockReadGuard<'_, MemoryStream>> {
        self.lock(stream)
            .read()
            .map_err(|_| eyre!("{stream} stream lock poisoned"))
    }

    fn write(&self, stream: Stream) -> eyre::Result<RwLockWriteGuard<'_, MemoryStream>> {
        self.lock(stream)
            .write()
            .map_err(|_| eyre!("{stream} stream lock poisoned"))
    }
}

impl SnapshotStore for MemoryStore {
    fn append_at(
        &self,
        stream: Stream,
        payload: String,
        created_at: DateTime<Utc>,
    ) -> eyre::Result<u64> {
        let mut s = self.write(stream)?;
        s.last_id += 1;
        let id = s.last_id;
        s.records.insert(
            id,
            StoredRecord {
                id,
                created_at,
                payload,
            },
        );
        Ok(id)
    }

    fn latest(&self, stream: Stream) -> eyre::Result<Option<StoredRecord>> {
        Ok(self.read(stream)?.records.values().next_back().cloned())
    }

    fn page(
        &self,
        stream: Stream,
        before: Option<u64>,
        limit: usize,
    ) -> eyre::Result<Vec<StoredRecord>> {
        let s = self.read(stream)?;
        let page = match before {
            Some(before) => s.records.range(..before).rev().take(limit),
            None => s.records.range(..).rev().take(limit),
        };
        Ok(page.map(|(_, r)| r.clone()).collect())
    }

    fn delete_older_than(&self, stream: Stream, horizon: DateTime<Utc>) -> eyre::Result<usize> {
        let mut s = self.write(stream)?;
        let before = s.records.len();
        s.records.retain(|_, r| r.created_at >= horizon);
        Ok(before - s.records.len())
    }
}
