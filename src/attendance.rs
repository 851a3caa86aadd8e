use std::time::Duration;

use crate::election::Role;

/// Interval at which a peer re-announces itself for the given role.
///
/// The scheduler calls roll at the base frequency. Every other peer calls at
/// half that rate, as a fallback in case the scheduler becomes unreachable.
pub fn attendance_period(role: Role, roll_call_frequency: Duration) -> Duration {
    match role {
        Role::Scheduler => roll_call_frequency,
        Role::Worker | Role::Unset => roll_call_frequency * 2,
    }
}
