//! `Message`: the Consumer's materialized view of a fetched broker record.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A fetched record. Owned by the Consumer until committed or published to
/// a DLQ; the Worker only borrows it for the duration of `handler.handle`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub high_water_mark: i64,
}

impl Message {
    /// Queue depth behind this record: how far `offset` trails the
    /// partition's latest written offset.
    pub fn lag(&self) -> i64 {
        (self.high_water_mark - self.offset).max(0)
    }
}
