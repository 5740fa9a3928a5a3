//! Core Types and Trait Definitions for cookpass
//!
//! Defines the collaborator seams of the multi-pass engine:
//! - **SourceElement:** items streamed by a source
//! - **Cooker:** a processing unit that receives one pass over the source
//! - **SourceReader:** the source itself, driven once per pass
//! - **ElementSink:** where a reader delivers elements during a pass

use crate::session::isolation::DependencyView;
use crate::session::progress::ProgressTracker;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Common Types
// ============================================================================

/// Stable unique identifier of a cooker
///
/// Dependencies are declared by path, and paths are compared by exact string
/// equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookerPath(String);

impl CookerPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for CookerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CookerPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for CookerPath {
    fn from(path: String) -> Self {
        Self(path)
    }
}

/// Output a cooker publishes once its pass has finished
pub type CookedData = Arc<dyn Any + Send + Sync>;

/// Item produced by a source stream
///
/// Elements are immutable once produced. The key identifies the element for
/// grouping and decides which cookers it is routed to.
pub trait SourceElement: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;
}

/// Which element keys a cooker wants to receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySubscription<K: Eq + Hash> {
    /// Every element of the pass
    All,
    /// Only elements whose key is in the set
    Keys(HashSet<K>),
}

impl<K: Eq + Hash> KeySubscription<K> {
    pub fn keys(keys: impl IntoIterator<Item = K>) -> Self {
        KeySubscription::Keys(keys.into_iter().collect())
    }

    pub fn accepts(&self, key: &K) -> bool {
        match self {
            KeySubscription::All => true,
            KeySubscription::Keys(keys) => keys.contains(key),
        }
    }
}

impl<K: Eq + Hash> Default for KeySubscription<K> {
    fn default() -> Self {
        KeySubscription::All
    }
}

/// Result of handing one element to a cooker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementOutcome {
    /// The cooker consumed the element
    Processed,
    /// The cooker looked at the element and chose not to use it
    Ignored,
    /// The element was malformed; counted but not fatal
    Corrupt,
}

/// Maximum number of passes a source can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassCapability {
    Unlimited,
    Limited(NonZeroUsize),
}

impl PassCapability {
    /// Capability of at most `passes` passes (zero is treated as one)
    pub fn at_most(passes: usize) -> Self {
        PassCapability::Limited(NonZeroUsize::new(passes).unwrap_or(NonZeroUsize::MIN))
    }

    /// The cap as a plain count, `None` when unlimited
    pub fn limit(&self) -> Option<usize> {
        match self {
            PassCapability::Unlimited => None,
            PassCapability::Limited(n) => Some(n.get()),
        }
    }

    /// Combine with an optional configured cap, keeping the tighter bound
    pub fn tighten(self, configured: Option<usize>) -> Self {
        match (self.limit(), configured) {
            (_, None) => self,
            (None, Some(cap)) => Self::at_most(cap),
            (Some(own), Some(cap)) => Self::at_most(own.min(cap)),
        }
    }
}

impl fmt::Display for PassCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassCapability::Unlimited => f.write_str("unlimited"),
            PassCapability::Limited(n) => write!(f, "{}", n),
        }
    }
}

// ============================================================================
// Cooker Trait
// ============================================================================

/// Processing unit that receives one linear pass over a source
///
/// Hooks run in this order within the cooker's pass:
/// `begin_pass` → `subscription` → `process` (per routed element) →
/// `end_pass` → `output`. Cookers whose dependencies run in earlier passes
/// read those results through the [`DependencyView`] given to `begin_pass`.
///
/// # Example
/// ```rust,ignore
/// struct LineCounter {
///     path: CookerPath,
///     lines: u64,
/// }
///
/// impl Cooker<Line> for LineCounter {
///     fn path(&self) -> &CookerPath { &self.path }
///
///     fn process(&mut self, _line: &Line, _cancel: &CancellationToken) -> anyhow::Result<ElementOutcome> {
///         self.lines += 1;
///         Ok(ElementOutcome::Processed)
///     }
///
///     fn output(&self) -> Option<CookedData> {
///         Some(Arc::new(self.lines))
///     }
/// }
/// ```
pub trait Cooker<E: SourceElement>: Send {
    /// Unique path of this cooker
    fn path(&self) -> &CookerPath;

    /// Paths of cookers whose output this cooker reads
    fn dependencies(&self) -> Vec<CookerPath> {
        Vec::new()
    }

    /// Keys to route to this cooker, asked once per pass after `begin_pass`
    fn subscription(&self) -> KeySubscription<E::Key> {
        KeySubscription::All
    }

    /// Called before the source is read in this cooker's pass
    fn begin_pass(
        &mut self,
        _dependencies: &DependencyView,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once for each routed element
    fn process(&mut self, element: &E, cancel: &CancellationToken) -> anyhow::Result<ElementOutcome>;

    /// Called after the source finished this cooker's pass
    fn end_pass(&mut self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }

    /// Result made available to dependent cookers after `end_pass`
    fn output(&self) -> Option<CookedData> {
        None
    }
}

// ============================================================================
// Source Reader Trait
// ============================================================================

/// Destination of elements during a pass
pub trait ElementSink<E: SourceElement> {
    /// Hand one element to the active cookers
    ///
    /// An error means the pass cannot continue and the reader should return
    /// it (`ReaderError` converts from `SinkError`).
    fn deliver(&mut self, element: &E) -> Result<(), SinkError>;
}

/// Why a sink refused an element
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("delivery cancelled")]
    Cancelled,

    #[error("cooker {cooker} failed; pass aborted")]
    CookerFailed { cooker: CookerPath },
}

/// Reader failure for one pass
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The reader observed cancellation
    #[error("source reading cancelled")]
    Cancelled,

    /// The sink refused an element
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// The source could not be read
    #[error("source reader failed: {0}")]
    Failed(#[source] anyhow::Error),
}

/// Streamed source driven once per pass
///
/// # Example
/// ```rust,ignore
/// #[async_trait::async_trait]
/// impl SourceReader<Line> for LinesInMemory {
///     fn max_passes(&self) -> PassCapability { PassCapability::Unlimited }
///
///     async fn run_pass(
///         &mut self,
///         sink: &mut (dyn ElementSink<Line> + Send),
///         progress: &ProgressTracker,
///         cancel: &CancellationToken,
///     ) -> Result<(), ReaderError> {
///         for (i, line) in self.lines.iter().enumerate() {
///             if cancel.is_cancelled() {
///                 return Err(ReaderError::Cancelled);
///             }
///             sink.deliver(line)?;
///             progress.report_fraction(i as u64 + 1, self.lines.len() as u64);
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait SourceReader<E: SourceElement>: Send {
    /// How many passes this source supports
    fn max_passes(&self) -> PassCapability {
        PassCapability::Unlimited
    }

    /// Stream every element of the source to `sink` exactly once
    async fn run_pass(
        &mut self,
        sink: &mut (dyn ElementSink<E> + Send),
        progress: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<(), ReaderError>;
}
