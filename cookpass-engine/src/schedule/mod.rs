//! Pass scheduling
//!
//! The leveler assigns every registered cooker to a pass so that all of its
//! in-set dependencies run in strictly earlier passes. The budget enforcer
//! then trims the tail of that schedule to what the source can perform.

pub mod budget;
pub mod leveler;

pub use budget::enforce_pass_budget;
pub use leveler::level_cookers;

use crate::types::CookerPath;
use cookpass_common::events::DisableReason;
use serde::Serialize;

/// Index of a cooker in registration order
pub type CookerHandle = usize;

/// Path and declared dependencies of one registered cooker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookerDescriptor {
    pub path: CookerPath,
    pub dependencies: Vec<CookerPath>,
}

impl CookerDescriptor {
    /// Create a descriptor, dropping repeated dependency paths
    pub fn new(path: impl Into<CookerPath>, dependencies: impl IntoIterator<Item = CookerPath>) -> Self {
        let mut unique: Vec<CookerPath> = Vec::new();
        for dependency in dependencies {
            if !unique.contains(&dependency) {
                unique.push(dependency);
            }
        }
        Self {
            path: path.into(),
            dependencies: unique,
        }
    }
}

/// One traversal of the source with its ordered cooker set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pass {
    pub index: usize,
    pub cookers: Vec<CookerHandle>,
}

/// A cooker excluded from execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisabledCooker {
    pub handle: CookerHandle,
    pub path: CookerPath,
    /// Pass the leveler originally assigned
    pub pass: usize,
    pub reason: DisableReason,
}

/// A dependency on a path outside the registered set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalDependency {
    pub cooker: CookerHandle,
    pub dependency: CookerPath,
}

/// Ordered passes plus the cookers that will not run
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    paths: Vec<CookerPath>,
    passes: Vec<Pass>,
    disabled: Vec<DisabledCooker>,
    external: Vec<ExternalDependency>,
}

impl Schedule {
    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn disabled(&self) -> &[DisabledCooker] {
        &self.disabled
    }

    /// Out-of-set dependencies of scheduled (not disabled) cookers
    pub fn external_dependencies(&self) -> impl Iterator<Item = &ExternalDependency> {
        self.external
            .iter()
            .filter(|dep| self.pass_of(dep.cooker).is_some())
    }

    /// Path of a registered cooker
    pub fn path(&self, handle: CookerHandle) -> Option<&CookerPath> {
        self.paths.get(handle)
    }

    /// Pass a cooker runs in, `None` if disabled or unknown
    pub fn pass_of(&self, handle: CookerHandle) -> Option<usize> {
        self.passes
            .iter()
            .find(|pass| pass.cookers.contains(&handle))
            .map(|pass| pass.index)
    }

    /// Cooker paths per pass, for reporting
    pub fn plan(&self) -> Vec<Vec<CookerPath>> {
        self.passes
            .iter()
            .map(|pass| {
                pass.cookers
                    .iter()
                    .filter_map(|&handle| self.paths.get(handle).cloned())
                    .collect()
            })
            .collect()
    }
}
