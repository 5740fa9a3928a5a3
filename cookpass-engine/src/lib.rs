//! cookpass-engine library interface
//!
//! Multi-pass scheduling of cookers over a streamed source. Exposes public
//! APIs for the binary and for integration testing.

pub mod demo;
pub mod error;
pub mod schedule;
pub mod session;
pub mod types;

pub use crate::error::{HookKind, ProcessingError, ScheduleError};
pub use crate::schedule::{CookerDescriptor, Schedule};
pub use crate::session::isolation::{DependencyError, DependencyView, ResultStore};
pub use crate::session::progress::{NoProgress, ProgressSink, ProgressTracker, WatchProgress};
pub use crate::session::{PassStatistics, ProcessingReport, ProcessingSession, SessionState};
pub use crate::types::{
    CookedData, Cooker, CookerPath, ElementOutcome, ElementSink, KeySubscription, PassCapability,
    ReaderError, SinkError, SourceElement, SourceReader,
};
