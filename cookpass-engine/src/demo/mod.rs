//! Record file analysis used by the `cookpass-engine` binary
//!
//! A small multi-pass workload over `key<delimiter>value` files: counting,
//! a key histogram, a profile of the most frequent key (which needs the
//! histogram first), and a summary (which needs both).

pub mod cookers;
pub mod reader;

pub use cookers::{
    standard_cookers, DominantReport, KeyCounts, RecordCount, SummaryReport, COUNT_PATH,
    DOMINANT_PATH, HISTOGRAM_PATH, SUMMARY_PATH,
};
pub use reader::{LineFileReader, Record};
