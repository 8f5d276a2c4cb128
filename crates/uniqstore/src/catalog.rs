//! Reference catalog: the user-facing names for stored content.
//!
//! Every upload gets a fresh [`ReferenceRecord`], even when its digest was
//! already stored. Many records may share one digest.
//!
//! Ids come from a single counter owned by the catalog. The counter's
//! high-water mark is persisted *before* the record that uses it, so a crash
//! between the two writes can skip an id but never hand one out twice.

use crate::persistence::KvStore;
use anyhow::{anyhow, Result};
use cas::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

/// Content type recorded for every upload. Only text is accepted.
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

const NEXT_ID_KEY: &str = "next_id";

/// Numeric reference id. Assigned from 0 upward, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceId(pub u64);

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReferenceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(ReferenceId)
    }
}

/// A named pointer at stored content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub id: ReferenceId,
    pub digest: Digest,
    pub name: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

pub struct ReferenceCatalog {
    records: Box<dyn KvStore<ReferenceRecord>>,
    sequence: Box<dyn KvStore<u64>>,
    next_id: Mutex<u64>,
}

impl ReferenceCatalog {
    /// Open over existing stores, resuming the id counter.
    ///
    /// The counter resumes at whichever is larger: the persisted high-water
    /// mark or one past the largest stored id.
    pub fn open(
        records: Box<dyn KvStore<ReferenceRecord>>,
        sequence: Box<dyn KvStore<u64>>,
    ) -> Result<Self> {
        let persisted = sequence.get(NEXT_ID_KEY)?.unwrap_or(0);
        let past_max = records
            .entries()?
            .iter()
            .map(|(_, r)| r.id.0 + 1)
            .max()
            .unwrap_or(0);
        let next_id = persisted.max(past_max);

        tracing::debug!(next_id, records = records.len()?, "reference catalog opened");

        Ok(Self {
            records,
            sequence,
            next_id: Mutex::new(next_id),
        })
    }

    /// Record a new reference to `digest` under a fresh id.
    pub fn append(
        &self,
        digest: &Digest,
        name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Result<ReferenceRecord> {
        let mut next_id = self
            .next_id
            .lock()
            .map_err(|_| anyhow!("catalog counter lock poisoned"))?;

        let id = ReferenceId(*next_id);
        self.sequence.put(NEXT_ID_KEY, id.0 + 1)?;
        *next_id = id.0 + 1;

        let record = ReferenceRecord {
            id,
            digest: digest.clone(),
            name: name.into(),
            content_type: content_type.into(),
            created_at: Utc::now(),
        };
        self.records.put(&id.to_string(), record.clone())?;

        tracing::debug!(id = %id, digest = %digest, name = %record.name, "reference appended");
        Ok(record)
    }

    pub fn get(&self, id: ReferenceId) -> Result<Option<ReferenceRecord>> {
        self.records.get(&id.to_string())
    }

    /// Remove a record. Idempotent. The digest it pointed at is left alone.
    pub fn delete(&self, id: ReferenceId) -> Result<bool> {
        self.records.delete(&id.to_string())
    }

    pub fn len(&self) -> Result<usize> {
        self.records.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The id the next `append` will hand out.
    pub fn next_id(&self) -> Result<ReferenceId> {
        let next_id = self
            .next_id
            .lock()
            .map_err(|_| anyhow!("catalog counter lock poisoned"))?;
        Ok(ReferenceId(*next_id))
    }

    /// Force records and the id high-water mark to disk.
    pub fn flush(&self) -> Result<()> {
        self.sequence.flush()?;
        self.records.flush()
    }
}

/// Last element of a slash-separated path, the way clients expect file names.
///
/// Trailing slashes are ignored, an empty path yields `"."` and a path made
/// only of slashes yields `"/"`.
pub fn display_name(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rfind('/') {
        Some(pos) => trimmed[pos + 1..].to_string(),
        None => trimmed.to_string(),
    }
}
