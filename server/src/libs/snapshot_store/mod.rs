//! Append-only persistence for the `local` and `fleet` snapshot streams.
//!
//! Every backend hands out ids that are strictly increasing per stream; the id,
//! not the snapshot timestamp, is the recency order. `created_at` is the time
//! the store accepted the record and only matters to retention.

use chrono::{DateTime, Utc};
use eyre::eyre;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

mod memory;
mod native;

pub use memory::MemoryStore;
pub use native::NativeStore;


const SCAN_PAGE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Local,
    Fleet,
}

impl Stream {
    pub const ALL: [Stream; 2] = [Stream::Local, Stream::Fleet];

    pub fn name(&self) -> &'static str {
        match self {
            Stream::Local => "local",
            Stream::Fleet => "fleet",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    /// JSON encoded snapshot
    pub payload: String,
}

impl StoredRecord {
    pub fn decode<T: DeserializeOwned>(&self) -> eyre::Result<T> {
        serde_json::from_str(&self.payload)
            .map_err(|e| eyre!("record {} holds a malformed payload: {e}", self.id))
    }
}

pub trait SnapshotStore: Send + Sync {
    /// Adds a record stamped with `created_at` and returns its id.
    fn append_at(
        &self,
        stream: Stream,
        payload: String,
        created_at: DateTime<Utc>,
    ) -> eyre::Result<u64>;

    fn append(&self, stream: Stream, payload: String) -> eyre::Result<u64> {
        self.append_at(stream, payload, Utc::now())
    }

    fn latest(&self, stream: Stream) -> eyre::Result<Option<StoredRecord>>;

    /// At most `limit` records with an id lower than `before` (from the newest
    /// record when `None`), newest first.
    fn page(
        &self,
        stream: Stream,
        before: Option<u64>,
        limit: usize,
    ) -> eyre::Result<Vec<StoredRecord>>;

    /// Removes every record with `created_at < horizon` in one atomic step and
    /// returns how many went away.
    fn delete_older_than(&self, stream: Stream, horizon: DateTime<Utc>) -> eyre::Result<usize>;

    /// The whole stream, newest first.
    fn all(&self, stream: Stream) -> eyre::Result<Vec<StoredRecord>> {
        newest_first(self, stream).collect()
    }
}

pub type StoreRef = Arc<dyn SnapshotStore>;

impl<'a> dyn SnapshotStore + 'a {
    pub fn append_snapshot<T: Serialize>(&self, stream: Stream, snapshot: &T) -> eyre::Result<u64> {
        self.append(stream, serde_json::to_string(snapshot)?)
    }

    pub fn latest_snapshot<T: DeserializeOwned>(
        &self,
        stream: Stream,
    ) -> eyre::Result<Option<(StoredRecord, T)>> {
        let Some(record) = self.latest(stream)? else {
            return Ok(None);
        };
        let snapshot = record.decode()?;
        Ok(Some((record, snapshot)))
    }
}

/// Walks a stream from the newest record backwards, one page at a time, so a
/// scan that stops early never loads the rest of the history.
pub fn newest_first<S: SnapshotStore + ?Sized>(store: &S, stream: Stream) -> NewestFirst<'_, S> {
    NewestFirst {
        store,
        stream,
        before: None,
        buffer: VecDeque::new(),
        exhausted: false,
    }
}

pub struct NewestFirst<'a, S: ?Sized> {
    store: &'a S,
    stream: Stream,
    before: Option<u64>,
    buffer: VecDeque<StoredRecord>,
    exhausted: bool,
}

impl<S: SnapshotStore + ?Sized> Iterator for NewestFirst<'_, S> {
    type Item = eyre::Result<StoredRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.buffer.pop_front() {
            return Some(Ok(record));
        }
        if self.exhausted {
            return None;
        }
        match self.store.page(self.stream, self.before, SCAN_PAGE) {
            Ok(page) => {
                self.exhausted = page.len() < SCAN_PAGE;
                self.before = Some(page.last()?.id);
                self.buffer.extend(page);
                self.buffer.pop_front().map(Ok)
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}
