//! Dependency graph leveling
//!
//! Each cooker's pass index is the length of its longest in-set dependency
//! chain: 0 without in-set dependencies, otherwise
//! `1 + max(level of each in-set dependency)`. Levels are computed with a
//! Kahn traversal over an arena of descriptors, so a cooker is leveled only
//! after all of its dependencies. Whatever the traversal cannot reach sits on
//! or behind a cycle.
//!
//! Dependencies on paths outside the registered set are recorded as external
//! and do not affect leveling.

use super::{CookerDescriptor, CookerHandle, ExternalDependency, Pass, Schedule};
use crate::error::ScheduleError;
use crate::types::CookerPath;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Assign every cooker to the earliest pass its dependencies allow
///
/// Within a pass cookers keep registration order. Zero descriptors yield a
/// schedule with zero passes.
pub fn level_cookers(descriptors: &[CookerDescriptor]) -> Result<Schedule, ScheduleError> {
    let index = index_paths(descriptors)?;

    // Edges as handle lists: dependency handles per cooker, and the reverse
    let mut depends_on: Vec<Vec<CookerHandle>> = Vec::with_capacity(descriptors.len());
    let mut dependents: Vec<Vec<CookerHandle>> = vec![Vec::new(); descriptors.len()];
    let mut external = Vec::new();

    for (handle, descriptor) in descriptors.iter().enumerate() {
        let mut in_set = Vec::new();
        for dependency in &descriptor.dependencies {
            match index.get(dependency) {
                Some(&dep) => {
                    in_set.push(dep);
                    dependents[dep].push(handle);
                }
                None => external.push(ExternalDependency {
                    cooker: handle,
                    dependency: dependency.clone(),
                }),
            }
        }
        depends_on.push(in_set);
    }

    let mut unresolved: Vec<usize> = depends_on.iter().map(Vec::len).collect();
    let mut levels: Vec<Option<usize>> = vec![None; descriptors.len()];
    let mut ready: VecDeque<CookerHandle> = (0..descriptors.len())
        .filter(|&handle| unresolved[handle] == 0)
        .collect();

    while let Some(handle) = ready.pop_front() {
        let level = depends_on[handle]
            .iter()
            .filter_map(|&dep| levels[dep])
            .map(|dep_level| dep_level + 1)
            .max()
            .unwrap_or(0);
        levels[handle] = Some(level);

        for &dependent in &dependents[handle] {
            unresolved[dependent] -= 1;
            if unresolved[dependent] == 0 {
                ready.push_back(dependent);
            }
        }
    }

    let stuck: Vec<CookerPath> = levels
        .iter()
        .enumerate()
        .filter(|(_, level)| level.is_none())
        .map(|(handle, _)| descriptors[handle].path.clone())
        .collect();
    if !stuck.is_empty() {
        return Err(ScheduleError::Cycle { cookers: stuck });
    }

    let pass_count = levels.iter().flatten().map(|level| level + 1).max().unwrap_or(0);
    let mut passes: Vec<Pass> = (0..pass_count)
        .map(|index| Pass {
            index,
            cookers: Vec::new(),
        })
        .collect();
    for (handle, level) in levels.iter().enumerate() {
        if let Some(level) = level {
            passes[*level].cookers.push(handle);
        }
    }

    debug!(
        cookers = descriptors.len(),
        passes = pass_count,
        external_dependencies = external.len(),
        "Leveled cooker dependency graph"
    );

    Ok(Schedule {
        paths: descriptors.iter().map(|d| d.path.clone()).collect(),
        passes,
        disabled: Vec::new(),
        external,
    })
}

fn index_paths(
    descriptors: &[CookerDescriptor],
) -> Result<HashMap<&CookerPath, CookerHandle>, ScheduleError> {
    let mut index = HashMap::with_capacity(descriptors.len());
    for (handle, descriptor) in descriptors.iter().enumerate() {
        if descriptor.path.is_empty() {
            return Err(ScheduleError::EmptyPath { index: handle });
        }
        if index.insert(&descriptor.path, handle).is_some() {
            return Err(ScheduleError::DuplicateCooker(descriptor.path.clone()));
        }
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cooker(path: &str, deps: &[&str]) -> CookerDescriptor {
        CookerDescriptor::new(path, deps.iter().map(|d| CookerPath::from(*d)))
    }

    fn plan(schedule: &Schedule) -> Vec<Vec<String>> {
        schedule
            .plan()
            .into_iter()
            .map(|pass| pass.into_iter().map(|p| p.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_zero_cookers_yields_zero_passes() {
        let schedule = level_cookers(&[]).unwrap();
        assert_eq!(schedule.pass_count(), 0);
        assert!(schedule.disabled().is_empty());
    }

    #[test]
    fn test_independent_cookers_share_pass_zero() {
        let schedule = level_cookers(&[cooker("a", &[]), cooker("b", &[])]).unwrap();
        assert_eq!(plan(&schedule), vec![vec!["a", "b"]]);
    }

    #[test]
    fn test_diamond_example() {
        // A, B free; C needs A; D needs B and C
        let schedule = level_cookers(&[
            cooker("A", &[]),
            cooker("B", &[]),
            cooker("C", &["A"]),
            cooker("D", &["B", "C"]),
        ])
        .unwrap();

        assert_eq!(plan(&schedule), vec![vec!["A", "B"], vec!["C"], vec!["D"]]);
        assert_eq!(schedule.pass_of(3), Some(2));
    }

    #[test]
    fn test_level_is_longest_chain_not_registration_order() {
        // Registered before its dependency; still lands after it
        let schedule = level_cookers(&[
            cooker("late", &["mid"]),
            cooker("mid", &["root"]),
            cooker("root", &[]),
            cooker("shortcut", &["root"]),
        ])
        .unwrap();

        assert_eq!(
            plan(&schedule),
            vec![vec!["root"], vec!["mid", "shortcut"], vec!["late"]]
        );
    }

    #[test]
    fn test_pass_index_exceeds_every_dependency() {
        let descriptors = vec![
            cooker("a", &[]),
            cooker("b", &["a"]),
            cooker("c", &["a", "b"]),
            cooker("d", &[]),
            cooker("e", &["d", "c"]),
            cooker("f", &["d"]),
        ];
        let schedule = level_cookers(&descriptors).unwrap();

        for (handle, descriptor) in descriptors.iter().enumerate() {
            let own = schedule.pass_of(handle).unwrap();
            for dep in &descriptor.dependencies {
                let dep_handle = descriptors.iter().position(|d| &d.path == dep).unwrap();
                assert!(own > schedule.pass_of(dep_handle).unwrap());
            }
        }
        // Longest chain a → b → c → e has four cookers
        assert_eq!(schedule.pass_count(), 4);
    }

    #[test]
    fn test_external_dependencies_do_not_affect_leveling() {
        let schedule = level_cookers(&[cooker("a", &["other-source/x"]), cooker("b", &["a"])]).unwrap();

        assert_eq!(plan(&schedule), vec![vec!["a"], vec!["b"]]);
        let external: Vec<_> = schedule.external_dependencies().collect();
        assert_eq!(external.len(), 1);
        assert_eq!(external[0].cooker, 0);
        assert_eq!(external[0].dependency, CookerPath::from("other-source/x"));
    }

    #[test]
    fn test_cycle_is_configuration_fault() {
        let result = level_cookers(&[
            cooker("free", &[]),
            cooker("x", &["z"]),
            cooker("y", &["x"]),
            cooker("z", &["y"]),
        ]);

        match result {
            Err(ScheduleError::Cycle { cookers }) => {
                assert_eq!(
                    cookers,
                    vec![CookerPath::from("x"), CookerPath::from("y"), CookerPath::from("z")]
                );
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_reports_cookers_behind_it() {
        let result = level_cookers(&[cooker("x", &["y"]), cooker("y", &["x"]), cooker("tail", &["y"])]);
        assert!(matches!(result, Err(ScheduleError::Cycle { cookers }) if cookers.len() == 3));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let result = level_cookers(&[cooker("me", &["me"])]);
        assert!(matches!(result, Err(ScheduleError::Cycle { .. })));
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let result = level_cookers(&[cooker("a", &[]), cooker("a", &[])]);
        assert_eq!(result.unwrap_err(), ScheduleError::DuplicateCooker("a".into()));
    }

    #[test]
    fn test_empty_path_rejected() {
        let result = level_cookers(&[cooker("a", &[]), cooker("", &[])]);
        assert_eq!(result.unwrap_err(), ScheduleError::EmptyPath { index: 1 });
    }

    #[test]
    fn test_repeated_dependency_counts_once() {
        let descriptor = cooker("b", &["a", "a"]);
        assert_eq!(descriptor.dependencies.len(), 1);

        let schedule = level_cookers(&[cooker("a", &[]), descriptor]).unwrap();
        assert_eq!(schedule.pass_count(), 2);
    }
}
