use super::{SnapshotStore, StoredRecord, Stream};
use crate::models::record::{FleetRow, FleetRowKey, LocalRow, LocalRowKey, StreamSequence};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use native_db::db_type::{KeyOptions, ToInput, ToKeyDefinition};
use native_db::{Database, Models};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

/// Rows removed per write transaction during a sweep.
const SWEEP_BATCH: usize = 512;

static MODELS: LazyLock<Models> = LazyLock::new(|| {
    let mut models = Models::new();
    models.define::<LocalRow>().unwrap();
    models.define::<FleetRow>().unwrap();
    models.define::<StreamSequence>().unwrap();
    models
});

/// Store backed by an embedded native_db file.
///
/// Every append and every sweep batch runs in its own write transaction,
/// which native_db serializes, so writers from different loops never interleave.
#[derive(Clone)]
pub struct NativeStore {
    db: Arc<Database<'static>>,
}

trait StreamRow: ToInput {
    type CreatedAt: ToKeyDefinition<KeyOptions>;

    fn created_at_key() -> Self::CreatedAt;
    fn build(id: u64, created_at: i64, payload: String) -> Self;
    fn into_record(self) -> StoredRecord;
}

macro_rules! stream_row {
    ($row:ty, $key:ident) => {
        impl StreamRow for $row {
            type CreatedAt = $key;

            fn created_at_key() -> $key {
                $key::created_at
            }

            fn build(id: u64, created_at: i64, payload: String) -> Self {
                Self {
                    id,
                    created_at,
                    payload,
                }
            }

            fn into_record(self) -> StoredRecord {
                StoredRecord {
                    id: self.id,
                    created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
                    payload: self.payload,
                }
            }
        }
    };
}

stream_row!(LocalRow, LocalRowKey);
stream_row!(FleetRow, FleetRowKey);

impl NativeStore {
    pub fn open(db_path: &str) -> eyre::Result<Self> {
        let db_path = PathBuf::from_str(db_path)?;
        log::info!("loading db: {db_path:?}");
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let builder = native_db::Builder::new();
        let db: Database = if db_path.exists() {
            builder.open(&MODELS, db_path.as_path())?
        } else {
            builder.create(&MODELS, db_path.as_path())?
        };

        Ok(Self { db: Arc::new(db) })
    }

    pub fn in_memory() -> eyre::Result<Self> {
        let db = native_db::Builder::new().create_in_memory(&MODELS)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn append_row<T: StreamRow>(
        &self,
        stream: Stream,
        payload: String,
        created_at: DateTime<Utc>,
    ) -> eyre::Result<u64> {
        let rw = self.db.rw_transaction()?;

        let key = stream.name().to_owned();
        let current: Option<StreamSequence> = rw.get().primary(key.clone())?;
        let id = current.as_ref().map_or(0, |s| s.last_id) + 1;
        let next = StreamSequence {
            stream: key,
            last_id: id,
        };
        match current {
            Some(old) => rw.update(old, next)?,
            None => rw.insert(next)?,
        }

        rw.insert(T::build(id, created_at.timestamp_millis(), payload))?;
        rw.commit()?;
        Ok(id)
    }

    fn latest_row<T: StreamRow>(&self) -> eyre::Result<Option<StoredRecord>> {
        let r = self.db.r_transaction()?;
        let row: Option<T> = r.scan().primary::<T>()?.all()?.next_back().transpose()?;
        Ok(row.map(T::into_record))
    }

    fn page_rows<T: StreamRow>(
        &self,
        before: Option<u64>,
        limit: usize,
    ) -> eyre::Result<Vec<StoredRecord>> {
        let r = self.db.r_transaction()?;
        let rows: Vec<T> = match before {
            Some(before) => r
                .scan()
                .primary::<T>()?
                .range(..before)?
                .rev()
                .take(limit)
                .try_collect()?,
            None => r
                .scan()
                .primary::<T>()?
                .all()?
                .rev()
                .take(limit)
                .try_collect()?,
        };
        Ok(rows.into_iter().map(T::into_record).collect_vec())
    }

    /// Walks the `created_at` index in batches of [`SWEEP_BATCH`], each batch
    /// in its own write transaction, so appends land between two batches.
    fn delete_rows<T: StreamRow>(&self, horizon: DateTime<Utc>) -> eyre::Result<usize> {
        let cutoff = horizon.timestamp_millis();
        let mut removed = 0;
        loop {
            let rw = self.db.rw_transaction()?;
            let stale: Vec<T> = rw
                .scan()
                .secondary::<T>(T::created_at_key())?
                .range(..cutoff)?
                .take(SWEEP_BATCH)
                .try_collect()?;

            let batch = stale.len();
            for row in stale {
                rw.remove(row)?;
            }
            rw.commit()?;
            removed += batch;
            if batch < SWEEP_BATCH {
                return Ok(removed);
            }
        }
    }
}

impl SnapshotStore for NativeStore {
    fn append_at(
        &self,
        stream: Stream,
        payload: String,
        created_at: DateTime<Utc>,
    ) -> eyre::Result<u64> {
        match stream {
            Stream::Local => self.append_row::<LocalRow>(stream, payload, created_at),
            Stream::Fleet => self.append_row::<FleetRow>(stream, payload, created_at),
        }
    }

    fn latest(&self, stream: Stream) -> eyre::Result<Option<StoredRecord>> {
        match stream {
            Stream::Local => self.latest_row::<LocalRow>(),
            Stream::Fleet => self.latest_row::<FleetRow>(),
        }
    }

    fn page(
        &self,
        stream: Stream,
        before: Option<u64>,
        limit: usize,
    ) -> eyre::Result<Vec<StoredRecord>> {
        match stream {
            Stream::Local => self.page_rows::<LocalRow>(before, limit),
            Stream::Fleet => self.page_rows::<FleetRow>(before, limit),
        }
    }

    fn delete_older_than(&self, stream: Stream, horizon: DateTime<Utc>) -> eyre::Result<usize> {
        let removed = match stream {
            Stream::Local => self.delete_rows::<LocalRow>(horizon)?,
            Stream::Fleet => self.delete_rows::<FleetRow>(horizon)?,
        };
        if removed > 0 {
            log::debug!("removed {removed} {stream} records older than {horizon}");
        }
        Ok(removed)
    }
}
