//! Error types for cookpass-engine
//!
//! Configuration faults abort before any pass runs. Cancellation is reported
//! separately from faults. Hook and reader failures abort the remaining
//! schedule. Nothing at this layer is retried.

use crate::types::CookerPath;
use std::fmt;
use thiserror::Error;

/// Scheduling failure (fatal configuration fault)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// In-set dependencies form a cycle; lists every cooker left unresolved
    #[error("dependency cycle among cookers: {}", join_paths(.cookers))]
    Cycle { cookers: Vec<CookerPath> },

    /// Two cookers registered under one path
    #[error("duplicate cooker path: {0}")]
    DuplicateCooker(CookerPath),

    /// A cooker registered with an empty path
    #[error("cooker #{index} has an empty path")]
    EmptyPath { index: usize },

    /// Strict mode: an out-of-set dependency has no external result
    #[error("cooker {cooker} depends on {dependency}, which is neither registered nor supplied")]
    UnresolvedDependency {
        cooker: CookerPath,
        dependency: CookerPath,
    },
}

fn join_paths(paths: &[CookerPath]) -> String {
    paths
        .iter()
        .map(CookerPath::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn pass_suffix(pass: &Option<usize>) -> String {
    match pass {
        Some(p) => format!(" during pass {}", p),
        None => String::new(),
    }
}

/// Cooker lifecycle hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    BeginPass,
    Process,
    EndPass,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::BeginPass => f.write_str("begin_pass"),
            HookKind::Process => f.write_str("process"),
            HookKind::EndPass => f.write_str("end_pass"),
        }
    }
}

/// Outcome of a failed `process_source`
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Dependency graph cannot be scheduled
    #[error("Configuration error: {0}")]
    Configuration(#[from] ScheduleError),

    /// Cancellation was observed; `pass` is `None` before the first pass
    #[error("Processing cancelled{}", pass_suffix(.pass))]
    Cancelled { pass: Option<usize> },

    /// A cooker hook failed
    #[error("Cooker {cooker} failed in {hook}: {source}")]
    Hook {
        cooker: CookerPath,
        hook: HookKind,
        #[source]
        source: anyhow::Error,
    },

    /// The source reader failed
    #[error("Source reader failed during pass {pass}: {source}")]
    Reader {
        pass: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl ProcessingError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessingError::Cancelled { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ProcessingError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_cookers() {
        let err = ScheduleError::Cycle {
            cookers: vec![CookerPath::from("a"), CookerPath::from("b")],
        };
        assert_eq!(err.to_string(), "dependency cycle among cookers: a, b");
    }

    #[test]
    fn test_cancelled_message() {
        assert_eq!(
            ProcessingError::Cancelled { pass: Some(1) }.to_string(),
            "Processing cancelled during pass 1"
        );
        assert_eq!(
            ProcessingError::Cancelled { pass: None }.to_string(),
            "Processing cancelled"
        );
    }

    #[test]
    fn test_hook_message() {
        let err = ProcessingError::Hook {
            cooker: CookerPath::from("x"),
            hook: HookKind::EndPass,
            source: anyhow::anyhow!("boom"),
        };
        assert_eq!(err.to_string(), "Cooker x failed in end_pass: boom");
        assert!(!err.is_cancelled());
    }
}
