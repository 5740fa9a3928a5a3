//! Pass budget enforcement
//!
//! When the leveled schedule needs more passes than the source can perform,
//! the tail passes are dropped and their cookers disabled. Dropping only the
//! tail keeps every surviving cooker's dependencies in earlier, surviving
//! passes.

use super::{DisabledCooker, Schedule};
use crate::types::PassCapability;
use cookpass_common::events::DisableReason;
use tracing::warn;

/// Number of passes that will execute for `required` leveled passes
pub fn passes_to_execute(required: usize, capability: PassCapability) -> usize {
    match capability.limit() {
        None => required,
        Some(allowed) => required.min(allowed),
    }
}

/// Truncate `schedule` to `capability`, disabling every cooker in the dropped
/// passes
///
/// Each disabled cooker is logged at warn level with its path.
pub fn enforce_pass_budget(mut schedule: Schedule, capability: PassCapability) -> Schedule {
    let required = schedule.passes.len();
    let allowed = passes_to_execute(required, capability);
    if allowed == required {
        return schedule;
    }

    let reason = DisableReason::PassBudgetExceeded { required, allowed };
    for pass in schedule.passes.drain(allowed..) {
        for handle in pass.cookers {
            let path = schedule.paths[handle].clone();
            warn!(
                cooker = %path,
                pass = pass.index,
                required_passes = required,
                allowed_passes = allowed,
                "Disabling cooker: {}",
                reason
            );
            schedule.disabled.push(DisabledCooker {
                handle,
                path,
                pass: pass.index,
                reason,
            });
        }
    }

    schedule
}
