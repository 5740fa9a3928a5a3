//! Test Helper Utilities
//!
//! Scripted sources and recording cookers shared by the session tests.

#![allow(dead_code)]

pub mod log_capture;

pub use log_capture::{LogCapture, LogRecord};

use async_trait::async_trait;
use cookpass_engine::error::HookKind;
use cookpass_engine::session::isolation::DependencyError;
use cookpass_engine::{
    CookedData, Cooker, CookerPath, DependencyView, ElementOutcome, ElementSink, KeySubscription,
    PassCapability, ProgressSink, ProgressTracker, ReaderError, SourceElement, SourceReader,
};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Elements
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: u32,
}

impl SourceElement for Item {
    type Key = u32;

    fn key(&self) -> u32 {
        self.key
    }
}

pub fn items(keys: &[u32]) -> Vec<Item> {
    keys.iter().map(|&key| Item { key }).collect()
}

// ============================================================================
// Journal
// ============================================================================

/// Ordered log of hook calls shared by all test cookers and readers
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn has(&self, entry: &str) -> bool {
        self.position(entry).is_some()
    }

    /// Entries starting with `prefix`
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    /// Assert `first` was journaled strictly before `second`
    pub fn assert_before(&self, first: &str, second: &str) {
        let entries = self.entries();
        let a = entries.iter().position(|e| e == first);
        let b = entries.iter().position(|e| e == second);
        match (a, b) {
            (Some(a), Some(b)) => assert!(
                a < b,
                "expected {} before {}, journal: {:?}",
                first,
                second,
                entries
            ),
            _ => panic!("missing {} or {} in journal: {:?}", first, second, entries),
        }
    }
}

// ============================================================================
// Recording cooker
// ============================================================================

/// Cooker that journals every hook as `<path>:<event>`
///
/// Journal entries:
/// - `A:begin`, `A:end`
/// - `A:process:<key>`
/// - `A:read:<dep>` / `A:missing:<dep>` for each declared dependency
/// - `A:lookup:<path>:undeclared` / `A:lookup:<path>:visible`
///
/// Publishes the number of processed elements as a `u64`, or nothing after
/// the first run when built with [`RecordingCooker::publishing_once`].
pub struct RecordingCooker {
    path: CookerPath,
    dependencies: Vec<CookerPath>,
    journal: Journal,
    subscription: KeySubscription<u32>,
    fail_in: Option<HookKind>,
    cancel_in: Option<(HookKind, CancellationToken)>,
    lookup: Option<CookerPath>,
    publish_once: bool,
    runs: usize,
    processed: u64,
}

impl RecordingCooker {
    pub fn new(path: &str, journal: &Journal) -> Self {
        Self {
            path: CookerPath::from(path),
            dependencies: Vec::new(),
            journal: journal.clone(),
            subscription: KeySubscription::All,
            fail_in: None,
            cancel_in: None,
            lookup: None,
            publish_once: false,
            runs: 0,
            processed: 0,
        }
    }

    pub fn depends_on(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|d| CookerPath::from(*d)).collect();
        self
    }

    pub fn subscribed_to(mut self, keys: &[u32]) -> Self {
        self.subscription = KeySubscription::keys(keys.iter().copied());
        self
    }

    pub fn failing_in(mut self, hook: HookKind) -> Self {
        self.fail_in = Some(hook);
        self
    }

    /// Cancel `token` from inside `hook`, then return successfully
    pub fn cancelling_in(mut self, hook: HookKind, token: &CancellationToken) -> Self {
        self.cancel_in = Some((hook, token.clone()));
        self
    }

    /// Query `path` in `begin_pass` and journal whether it was reachable
    pub fn looking_up(mut self, path: &str) -> Self {
        self.lookup = Some(CookerPath::from(path));
        self
    }

    /// Produce no output once `begin_pass` has been called a second time
    pub fn publishing_once(mut self) -> Self {
        self.publish_once = true;
        self
    }

    pub fn boxed(self) -> Box<dyn Cooker<Item>> {
        Box::new(self)
    }

    fn hook(&self, hook: HookKind) -> anyhow::Result<()> {
        if let Some((at, token)) = &self.cancel_in {
            if *at == hook {
                token.cancel();
            }
        }
        if self.fail_in == Some(hook) {
            anyhow::bail!("{} failed on purpose in {}", self.path, hook);
        }
        Ok(())
    }
}

impl Cooker<Item> for RecordingCooker {
    fn path(&self) -> &CookerPath {
        &self.path
    }

    fn dependencies(&self) -> Vec<CookerPath> {
        self.dependencies.clone()
    }

    fn subscription(&self) -> KeySubscription<u32> {
        self.subscription.clone()
    }

    fn begin_pass(&mut self, deps: &DependencyView, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.journal.push(format!("{}:begin", self.path));
        self.runs += 1;
        for dependency in &self.dependencies {
            match deps.query_raw(dependency) {
                Ok(_) => self.journal.push(format!("{}:read:{}", self.path, dependency)),
                Err(_) => self.journal.push(format!("{}:missing:{}", self.path, dependency)),
            }
        }
        if let Some(target) = &self.lookup {
            let outcome = match deps.query_raw(target) {
                Err(DependencyError::Undeclared { .. }) => "undeclared",
                _ => "visible",
            };
            self.journal.push(format!("{}:lookup:{}:{}", self.path, target, outcome));
        }
        self.processed = 0;
        self.hook(HookKind::BeginPass)
    }

    fn process(&mut self, item: &Item, _cancel: &CancellationToken) -> anyhow::Result<ElementOutcome> {
        self.journal.push(format!("{}:process:{}", self.path, item.key));
        self.hook(HookKind::Process)?;
        self.processed += 1;
        Ok(ElementOutcome::Processed)
    }

    fn end_pass(&mut self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.journal.push(format!("{}:end", self.path));
        self.hook(HookKind::EndPass)
    }

    fn output(&self) -> Option<CookedData> {
        if self.publish_once && self.runs > 1 {
            return None;
        }
        Some(Arc::new(self.processed))
    }
}

// ============================================================================
// Scripted reader
// ============================================================================

/// In-memory source replaying the same items on every pass
pub struct ScriptedReader {
    items: Vec<Item>,
    capability: PassCapability,
    journal: Option<Journal>,
    progress_script: Option<Vec<u8>>,
    fail_on_pass: Option<usize>,
    cancel_at: Option<(usize, usize, CancellationToken)>,
    passes_run: usize,
}

impl ScriptedReader {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            capability: PassCapability::Unlimited,
            journal: None,
            progress_script: None,
            fail_on_pass: None,
            cancel_at: None,
            passes_run: 0,
        }
    }

    pub fn with_capability(mut self, capability: PassCapability) -> Self {
        self.capability = capability;
        self
    }

    /// Journal `reader:pass<n>` at the start of every pass
    pub fn journaled(mut self, journal: &Journal) -> Self {
        self.journal = Some(journal.clone());
        self
    }

    /// Report these raw values instead of item-based progress
    pub fn with_progress_script(mut self, values: &[u8]) -> Self {
        self.progress_script = Some(values.to_vec());
        self
    }

    pub fn failing_on_pass(mut self, pass: usize) -> Self {
        self.fail_on_pass = Some(pass);
        self
    }

    /// Cancel `token` just before delivering item `index` of pass `pass`
    pub fn cancelling_at(mut self, pass: usize, index: usize, token: &CancellationToken) -> Self {
        self.cancel_at = Some((pass, index, token.clone()));
        self
    }

    /// Number of times `run_pass` was invoked
    pub fn passes_run(&self) -> usize {
        self.passes_run
    }
}

#[async_trait]
impl SourceReader<Item> for ScriptedReader {
    fn max_passes(&self) -> PassCapability {
        self.capability
    }

    async fn run_pass(
        &mut self,
        sink: &mut (dyn ElementSink<Item> + Send),
        progress: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<(), ReaderError> {
        let pass = self.passes_run;
        self.passes_run += 1;
        if let Some(journal) = &self.journal {
            journal.push(format!("reader:pass{}", pass));
        }

        if self.fail_on_pass == Some(pass) {
            return Err(ReaderError::Failed(anyhow::anyhow!("source vanished")));
        }

        let total = self.items.len() as u64;
        for (index, item) in self.items.iter().enumerate() {
            if let Some((at_pass, at_index, token)) = &self.cancel_at {
                if *at_pass == pass && *at_index == index {
                    token.cancel();
                }
            }
            if cancel.is_cancelled() {
                return Err(ReaderError::Cancelled);
            }
            sink.deliver(item)?;
            if self.progress_script.is_none() {
                progress.report_fraction(index as u64 + 1, total);
            }
            tokio::task::yield_now().await;
        }

        if let Some(script) = &self.progress_script {
            for &value in script {
                progress.report(value);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Progress sink collecting every reported value
pub fn collecting_progress() -> (Arc<Mutex<Vec<u8>>>, Arc<dyn ProgressSink>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let progress: Arc<dyn ProgressSink> = Arc::new(move |value: u8| sink.lock().unwrap().push(value));
    (seen, progress)
}
