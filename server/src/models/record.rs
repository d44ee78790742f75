use crate::libs::rmp_serializer::RmpSerde;
use native_db::ToKey;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

/// One sample of this host, as appended by the sampling loop.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[native_model(id = 1, version = 1, with = RmpSerde)]
#[native_db::native_db]
pub struct LocalRow {
    #[primary_key]
    pub id: u64,
    /// unix millis
    #[secondary_key]
    pub created_at: i64,
    pub payload: String,
}

/// One merged fleet poll.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[native_model(id = 2, version = 1, with = RmpSerde)]
#[native_db::native_db]
pub struct FleetRow {
    #[primary_key]
    pub id: u64,
    #[secondary_key]
    pub created_at: i64,
    pub payload: String,
}

/// Highest id ever handed out per stream. Kept apart from the rows so ids are
/// not reused once a sweep empties a stream.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[native_model(id = 3, version = 1, with = RmpSerde)]
#[native_db::native_db]
pub struct StreamSequence {
    #[primary_key]
    pub stream: String,
    pub last_id: u64,
}
