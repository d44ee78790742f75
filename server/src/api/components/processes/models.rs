use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct FindProcessQuery {
    pub hostname: String,
    pub gpuid: u32,
}
