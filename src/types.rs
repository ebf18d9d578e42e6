// Core Data Types - timed results, windowed batches and validated values
// These types cannot be constructed with invalid data, so the pipeline never
// has to re-check group labels or byte counts downstream.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A metric-stream label that is guaranteed to be non-empty
///
/// Cloning is cheap: every result of a run shares the same allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ValidatedGroup {
    inner: Arc<str>,
}

impl ValidatedGroup {
    const MAX_LENGTH: usize = 256;

    /// Create a new validated group label
    ///
    /// # Invariants
    /// - Non-empty after trimming
    /// - At most 256 bytes
    pub fn new(group: impl Into<String>) -> Result<Self> {
        let group = group.into();
        let trimmed = group.trim();

        ensure!(!trimmed.is_empty(), "Group label cannot be empty");
        ensure!(
            trimmed.len() <= Self::MAX_LENGTH,
            "Group label exceeds maximum length of {} bytes",
            Self::MAX_LENGTH
        );

        Ok(Self {
            inner: Arc::from(trimmed),
        })
    }

    /// Get the label as a string slice
    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for ValidatedGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl TryFrom<String> for ValidatedGroup {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ValidatedGroup> for String {
    fn from(group: ValidatedGroup) -> Self {
        group.inner.to_string()
    }
}

/// One timed application of a transform
#[derive(Debug, Clone, PartialEq)]
pub struct TimedResult<T> {
    pub group: ValidatedGroup,
    pub duration: Duration,
    pub value: T,
}

impl<T> TimedResult<T> {
    pub fn new(group: ValidatedGroup, duration: Duration, value: T) -> Self {
        Self {
            group,
            duration,
            value,
        }
    }
}

/// Results accumulated between two flushes, with the wall time the window covered
#[derive(Debug, Clone, PartialEq)]
pub struct TimedBatch<T> {
    pub items: Vec<TimedResult<T>>,
    pub elapsed: Duration,
}

impl<T> TimedBatch<T> {
    pub fn new(items: Vec<TimedResult<T>>, elapsed: Duration) -> Self {
        Self { items, elapsed }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Split the batch into per-group result lists, ordered by group label
    ///
    /// Arrival order is preserved inside each group.
    pub fn partition_by_group(self) -> BTreeMap<ValidatedGroup, Vec<TimedResult<T>>> {
        let mut groups: BTreeMap<ValidatedGroup, Vec<TimedResult<T>>> = BTreeMap::new();
        for item in self.items {
            groups.entry(item.group.clone()).or_default().push(item);
        }
        groups
    }
}

/// A byte count rendered with decimal units (`1.2 MB`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteSize(i64);

impl ByteSize {
    pub const fn new(bytes: i64) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> i64 {
        self.0
    }

    pub fn kb(&self) -> f64 {
        self.0 as f64 / 1_000.0
    }

    pub fn mb(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn gb(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Estimate how many documents of the given average size fit in this volume
    pub fn to_doc_count(&self, avg_doc_size_bytes: i64) -> i64 {
        if avg_doc_size_bytes <= 0 {
            return 0;
        }
        self.0 / avg_doc_size_bytes
    }
}

impl std::ops::Add for ByteSize {
    type Output = ByteSize;

    fn add(self, rhs: ByteSize) -> ByteSize {
        ByteSize(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut b = self.0;
        if -1000 < b && b < 1000 {
            return write!(f, "{b} bytes");
        }

        const UNITS: [char; 6] = ['k', 'M', 'G', 'T', 'P', 'E'];
        let mut unit = 0;
        while (b <= -999_950 || b >= 999_950) && unit < UNITS.len() - 1 {
            b /= 1000;
            unit += 1;
        }
        write!(f, "{:.1} {}B", b as f64 / 1000.0, UNITS[unit])
    }
}

/// Storage figures for the collection a run writes into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub data_uncompressed: ByteSize,
    pub data_compressed: ByteSize,
    pub doc_count: i64,
    pub avg_doc_size_bytes: Option<ByteSize>,
    pub total_size: ByteSize,
    pub index_sizes: BTreeMap<String, ByteSize>,
    pub index_size: ByteSize,
}
