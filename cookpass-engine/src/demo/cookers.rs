//! Record Analysis Cookers
//!
//! Four cookers over [`Record`]s that together need three passes:
//!
//! | Path                | Depends on                          | Pass |
//! |---------------------|-------------------------------------|------|
//! | `records/count`     | -                                   | 0    |
//! | `records/histogram` | -                                   | 0    |
//! | `records/dominant`  | `records/histogram`                 | 1    |
//! | `records/summary`   | `records/count`, `records/dominant` | 2    |

use super::reader::Record;
use crate::session::isolation::DependencyView;
use crate::types::{CookedData, Cooker, CookerPath, ElementOutcome, KeySubscription};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const COUNT_PATH: &str = "records/count";
pub const HISTOGRAM_PATH: &str = "records/histogram";
pub const DOMINANT_PATH: &str = "records/dominant";
pub const SUMMARY_PATH: &str = "records/summary";

/// The four record cookers in registration order
pub fn standard_cookers() -> Vec<Box<dyn Cooker<Record>>> {
    vec![
        Box::new(RecordCounter::new()),
        Box::new(KeyHistogram::new()),
        Box::new(DominantKey::new()),
        Box::new(Summary::new()),
    ]
}

// ============================================================================
// records/count
// ============================================================================

/// Output of `records/count`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordCount {
    pub total: u64,
    pub key_only: u64,
    /// Records with an empty key or undecodable bytes
    pub corrupt: u64,
}

/// Counts records by shape
pub struct RecordCounter {
    path: CookerPath,
    count: RecordCount,
}

impl RecordCounter {
    pub fn new() -> Self {
        Self {
            path: CookerPath::from(COUNT_PATH),
            count: RecordCount::default(),
        }
    }
}

impl Default for RecordCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Cooker<Record> for RecordCounter {
    fn path(&self) -> &CookerPath {
        &self.path
    }

    fn begin_pass(&mut self, _deps: &DependencyView, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.count = RecordCount::default();
        Ok(())
    }

    fn process(&mut self, record: &Record, _cancel: &CancellationToken) -> anyhow::Result<ElementOutcome> {
        self.count.total += 1;
        if record.key.is_empty() || record.malformed {
            self.count.corrupt += 1;
            return Ok(ElementOutcome::Corrupt);
        }
        if record.value.is_none() {
            self.count.key_only += 1;
        }
        Ok(ElementOutcome::Processed)
    }

    fn output(&self) -> Option<CookedData> {
        Some(Arc::new(self.count))
    }
}

// ============================================================================
// records/histogram
// ============================================================================

/// Output of `records/histogram`: occurrences per key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyCounts(pub BTreeMap<String, u64>);

impl KeyCounts {
    /// Most frequent key; ties go to the lexicographically smallest
    pub fn most_frequent(&self) -> Option<(&str, u64)> {
        let mut best: Option<(&str, u64)> = None;
        for (key, &count) in &self.0 {
            match best {
                Some((_, top)) if top >= count => {}
                _ => best = Some((key.as_str(), count)),
            }
        }
        best
    }
}

/// Counts occurrences of every non-empty key
pub struct KeyHistogram {
    path: CookerPath,
    counts: KeyCounts,
}

impl KeyHistogram {
    pub fn new() -> Self {
        Self {
            path: CookerPath::from(HISTOGRAM_PATH),
            counts: KeyCounts::default(),
        }
    }
}

impl Default for KeyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Cooker<Record> for KeyHistogram {
    fn path(&self) -> &CookerPath {
        &self.path
    }

    fn begin_pass(&mut self, _deps: &DependencyView, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.counts.0.clear();
        Ok(())
    }

    fn process(&mut self, record: &Record, _cancel: &CancellationToken) -> anyhow::Result<ElementOutcome> {
        if record.key.is_empty() || record.malformed {
            return Ok(ElementOutcome::Ignored);
        }
        *self.counts.0.entry(record.key.clone()).or_insert(0) += 1;
        Ok(ElementOutcome::Processed)
    }

    fn output(&self) -> Option<CookedData> {
        Some(Arc::new(self.counts.clone()))
    }
}

// ============================================================================
// records/dominant
// ============================================================================

/// Output of `records/dominant`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DominantReport {
    /// `None` when the source had no keyed records
    pub key: Option<String>,
    pub occurrences: u64,
    pub distinct_values: usize,
    /// Sum of the values that parse as numbers
    pub numeric_sum: Option<f64>,
}

/// Profiles the values of the most frequent key
///
/// Subscribes only to that key, so the rest of the source is never routed
/// here.
pub struct DominantKey {
    path: CookerPath,
    dependencies: Vec<CookerPath>,
    target: Option<String>,
    values: BTreeSet<String>,
    occurrences: u64,
    numeric_sum: Option<f64>,
}

impl DominantKey {
    pub fn new() -> Self {
        Self {
            path: CookerPath::from(DOMINANT_PATH),
            dependencies: vec![CookerPath::from(HISTOGRAM_PATH)],
            target: None,
            values: BTreeSet::new(),
            occurrences: 0,
            numeric_sum: None,
        }
    }
}

impl Default for DominantKey {
    fn default() -> Self {
        Self::new()
    }
}

impl Cooker<Record> for DominantKey {
    fn path(&self) -> &CookerPath {
        &self.path
    }

    fn dependencies(&self) -> Vec<CookerPath> {
        self.dependencies.clone()
    }

    fn subscription(&self) -> KeySubscription<String> {
        KeySubscription::keys(self.target.iter().cloned())
    }

    fn begin_pass(&mut self, deps: &DependencyView, _cancel: &CancellationToken) -> anyhow::Result<()> {
        let histogram = deps.query::<KeyCounts>(&CookerPath::from(HISTOGRAM_PATH))?;
        self.target = histogram.most_frequent().map(|(key, _)| key.to_string());
        self.values.clear();
        self.occurrences = 0;
        self.numeric_sum = None;

        debug!(cooker = %self.path, target = ?self.target, "Dominant key selected");
        Ok(())
    }

    fn process(&mut self, record: &Record, _cancel: &CancellationToken) -> anyhow::Result<ElementOutcome> {
        if record.malformed {
            return Ok(ElementOutcome::Ignored);
        }
        self.occurrences += 1;
        let Some(value) = &record.value else {
            return Ok(ElementOutcome::Ignored);
        };
        if let Ok(number) = value.parse::<f64>() {
            *self.numeric_sum.get_or_insert(0.0) += number;
        }
        self.values.insert(value.clone());
        Ok(ElementOutcome::Processed)
    }

    fn output(&self) -> Option<CookedData> {
        Some(Arc::new(DominantReport {
            key: self.target.clone(),
            occurrences: self.occurrences,
            distinct_values: self.values.len(),
            numeric_sum: self.numeric_sum,
        }))
    }
}

// ============================================================================
// records/summary
// ============================================================================

/// Output of `records/summary`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryReport {
    pub total_records: u64,
    pub corrupt_records: u64,
    pub dominant: DominantReport,
    /// Keyed records whose key is not the dominant one
    pub other_records: u64,
    /// Share of keyed records carrying the dominant key, in percent
    pub dominant_share: f64,
}

impl fmt::Display for SummaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "records:        {}", self.total_records)?;
        writeln!(f, "corrupt:        {}", self.corrupt_records)?;
        match &self.dominant.key {
            Some(key) => {
                writeln!(
                    f,
                    "dominant key:   {} ({} records, {:.1}%)",
                    key, self.dominant.occurrences, self.dominant_share
                )?;
                writeln!(f, "distinct vals:  {}", self.dominant.distinct_values)?;
                if let Some(sum) = self.dominant.numeric_sum {
                    writeln!(f, "numeric sum:    {}", sum)?;
                }
            }
            None => writeln!(f, "dominant key:   none")?,
        }
        write!(f, "other records:  {}", self.other_records)
    }
}

/// Final report combining the record count and the dominant key profile
pub struct Summary {
    path: CookerPath,
    dependencies: Vec<CookerPath>,
    count: RecordCount,
    dominant: DominantReport,
    other_records: u64,
}

impl Summary {
    pub fn new() -> Self {
        Self {
            path: CookerPath::from(SUMMARY_PATH),
            dependencies: vec![CookerPath::from(COUNT_PATH), CookerPath::from(DOMINANT_PATH)],
            count: RecordCount::default(),
            dominant: DominantReport::default(),
            other_records: 0,
        }
    }

    fn report(&self) -> SummaryReport {
        let keyed = self.count.total - self.count.corrupt;
        let dominant_share = if keyed == 0 {
            0.0
        } else {
            self.dominant.occurrences as f64 * 100.0 / keyed as f64
        };
        SummaryReport {
            total_records: self.count.total,
            corrupt_records: self.count.corrupt,
            dominant: self.dominant.clone(),
            other_records: self.other_records,
            dominant_share,
        }
    }
}

impl Default for Summary {
    fn default() -> Self {
        Self::new()
    }
}

impl Cooker<Record> for Summary {
    fn path(&self) -> &CookerPath {
        &self.path
    }

    fn dependencies(&self) -> Vec<CookerPath> {
        self.dependencies.clone()
    }

    fn begin_pass(&mut self, deps: &DependencyView, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.count = *deps.query::<RecordCount>(&CookerPath::from(COUNT_PATH))?;
        self.dominant = (*deps.query::<DominantReport>(&CookerPath::from(DOMINANT_PATH))?).clone();
        self.other_records = 0;
        Ok(())
    }

    fn process(&mut self, record: &Record, _cancel: &CancellationToken) -> anyhow::Result<ElementOutcome> {
        if record.key.is_empty() || record.malformed {
            return Ok(ElementOutcome::Ignored);
        }
        if self.dominant.key.as_deref() != Some(record.key.as_str()) {
            self.other_records += 1;
        }
        Ok(ElementOutcome::Processed)
    }

    fn output(&self) -> Option<CookedData> {
        Some(Arc::new(self.report()))
    }
}
