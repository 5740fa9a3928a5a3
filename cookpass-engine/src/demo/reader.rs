//! Delimited Record File Reader
//!
//! Streams `key<delimiter>value` lines from a file, once per pass.
//!
//! # Format
//! - One record per line; blank lines are skipped
//! - Text before the first delimiter is the key, the rest is the value
//! - A line without the delimiter is a key-only record
//! - Invalid UTF-8 is decoded lossily and the record is marked malformed
//!
//! Progress is reported by bytes consumed relative to the file size.

use crate::session::progress::ProgressTracker;
use crate::types::{ElementSink, PassCapability, ReaderError, SourceElement, SourceReader};
use anyhow::Context;
use async_trait::async_trait;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One parsed line of a record file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Option<String>,
    /// 1-based line number in the source file
    pub line: u64,
    /// The raw line was not valid UTF-8
    pub malformed: bool,
}

impl Record {
    /// Parse one line; surrounding whitespace of key and value is dropped
    pub fn parse(text: &str, line: u64, delimiter: char) -> Self {
        match text.split_once(delimiter) {
            Some((key, value)) => Self {
                key: key.trim().to_string(),
                value: Some(value.trim().to_string()),
                line,
                malformed: false,
            },
            None => Self {
                key: text.trim().to_string(),
                value: None,
                line,
                malformed: false,
            },
        }
    }

    /// Parse one raw line, replacing invalid UTF-8 sequences
    pub fn from_bytes(raw: &[u8], line: u64, delimiter: char) -> Self {
        let text = String::from_utf8_lossy(raw);
        let malformed = matches!(text, Cow::Owned(_));
        Self {
            malformed,
            ..Self::parse(&text, line, delimiter)
        }
    }
}

impl SourceElement for Record {
    type Key = String;

    fn key(&self) -> String {
        self.key.clone()
    }
}

/// File-backed source of [`Record`]s
#[derive(Debug, Clone)]
pub struct LineFileReader {
    path: PathBuf,
    delimiter: char,
    capability: PassCapability,
    passes_run: usize,
}

impl LineFileReader {
    /// Reader for `path` splitting on `delimiter`, with unlimited passes
    pub fn new(path: impl Into<PathBuf>, delimiter: char) -> Self {
        Self {
            path: path.into(),
            delimiter,
            capability: PassCapability::Unlimited,
            passes_run: 0,
        }
    }

    /// Limit how many passes this reader will admit to
    pub fn with_capability(mut self, capability: PassCapability) -> Self {
        self.capability = capability;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Passes completed so far
    pub fn passes_run(&self) -> usize {
        self.passes_run
    }
}

#[async_trait]
impl SourceReader<Record> for LineFileReader {
    fn max_passes(&self) -> PassCapability {
        self.capability
    }

    async fn run_pass(
        &mut self,
        sink: &mut (dyn ElementSink<Record> + Send),
        progress: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<(), ReaderError> {
        let file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))
            .map_err(ReaderError::Failed)?;
        let total_bytes = file
            .metadata()
            .await
            .with_context(|| format!("Failed to stat {}", self.path.display()))
            .map_err(ReaderError::Failed)?
            .len();

        let mut reader = BufReader::new(file);
        let mut buffer: Vec<u8> = Vec::new();
        let mut consumed: u64 = 0;
        let mut line_number: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                debug!(line = line_number, "Record reader cancelled");
                return Err(ReaderError::Cancelled);
            }

            buffer.clear();
            let read = reader
                .read_until(b'\n', &mut buffer)
                .await
                .with_context(|| format!("Failed to read {} after line {}", self.path.display(), line_number))
                .map_err(ReaderError::Failed)?;
            if read == 0 {
                break;
            }
            consumed += read as u64;
            line_number += 1;

            let mut raw = buffer.as_slice();
            while let [rest @ .., b'\n' | b'\r'] = raw {
                raw = rest;
            }
            if !raw.trim_ascii().is_empty() {
                sink.deliver(&Record::from_bytes(raw, line_number, self.delimiter))?;
            }
            progress.report_fraction(consumed, total_bytes);
        }

        self.passes_run += 1;
        debug!(
            path = %self.path.display(),
            lines = line_number,
            bytes = consumed,
            "Record pass complete"
        );
        Ok(())
    }
}
