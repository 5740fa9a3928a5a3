//! Element routing for one pass
//!
//! The active set is built fresh for every pass and only lent to the router,
//! so no activation state survives from one pass to the next.

use crate::schedule::CookerHandle;
use crate::types::{Cooker, CookerPath, ElementOutcome, ElementSink, KeySubscription, SinkError, SourceElement};
use serde::Serialize;
use std::hash::Hash;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cookers allowed to observe elements in the current pass
pub(crate) struct ActiveSet<K: Eq + Hash> {
    entries: Vec<(CookerHandle, KeySubscription<K>)>,
}

impl<K: Eq + Hash> ActiveSet<K> {
    pub(crate) fn new(entries: Vec<(CookerHandle, KeySubscription<K>)>) -> Self {
        Self { entries }
    }

    pub(crate) fn handles(&self) -> impl Iterator<Item = CookerHandle> + '_ {
        self.entries.iter().map(|(handle, _)| *handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Per-pass delivery counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassStatistics {
    pub pass: usize,
    pub active_cookers: usize,
    /// Elements the reader delivered
    pub elements: u64,
    /// Element deliveries to cookers (one element may reach several)
    pub deliveries: u64,
    pub processed: u64,
    pub ignored: u64,
    pub corrupt: u64,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

/// Sink handed to the reader; delivers elements to active cookers in
/// registration order
pub(crate) struct ElementRouter<'a, E: SourceElement> {
    cookers: &'a mut [Box<dyn Cooker<E>>],
    active: &'a ActiveSet<E::Key>,
    cancel: &'a CancellationToken,
    stats: PassStatistics,
    failure: Option<(CookerPath, anyhow::Error)>,
}

impl<'a, E: SourceElement> ElementRouter<'a, E> {
    pub(crate) fn new(
        pass: usize,
        cookers: &'a mut [Box<dyn Cooker<E>>],
        active: &'a ActiveSet<E::Key>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            cookers,
            active,
            cancel,
            stats: PassStatistics {
                pass,
                active_cookers: active.len(),
                ..PassStatistics::default()
            },
            failure: None,
        }
    }

    /// Statistics and the first cooker failure, if any
    pub(crate) fn finish(self) -> (PassStatistics, Option<(CookerPath, anyhow::Error)>) {
        (self.stats, self.failure)
    }
}

impl<E: SourceElement> ElementSink<E> for ElementRouter<'_, E> {
    fn deliver(&mut self, element: &E) -> Result<(), SinkError> {
        if let Some((cooker, _)) = &self.failure {
            return Err(SinkError::CookerFailed {
                cooker: cooker.clone(),
            });
        }
        if self.cancel.is_cancelled() {
            return Err(SinkError::Cancelled);
        }

        self.stats.elements += 1;
        let key = element.key();
        let active = self.active;

        for (handle, subscription) in &active.entries {
            if !subscription.accepts(&key) {
                continue;
            }
            let cooker = &mut self.cookers[*handle];
            self.stats.deliveries += 1;

            match cooker.process(element, self.cancel) {
                Ok(ElementOutcome::Processed) => self.stats.processed += 1,
                Ok(ElementOutcome::Ignored) => self.stats.ignored += 1,
                Ok(ElementOutcome::Corrupt) => {
                    self.stats.corrupt += 1;
                    debug!(cooker = %cooker.path(), key = ?key, "Cooker reported corrupt element");
                }
                Err(e) => {
                    let path = cooker.path().clone();
                    self.failure = Some((path.clone(), e));
                    return Err(SinkError::CookerFailed { cooker: path });
                }
            }
        }

        Ok(())
    }
}
