//! Transition detection and the notification decision.

use super::types::HealthState;

/// What to do with a freshly classified state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionDecision {
    /// The state differs from the previously stored one; a transition
    /// record is emitted only in this case.
    pub changed: bool,
    /// Alert on any change into a degraded state, and on recovery from a
    /// degraded state into online. Unchanged states never re-notify.
    pub should_notify: bool,
}

pub fn observe(
    previous: HealthState,
    new: HealthState,
    notifications_enabled: bool,
) -> TransitionDecision {
    let changed = previous != new;
    let degradation = new.is_degraded();
    let recovery = new == HealthState::Online && previous.is_degraded();

    TransitionDecision {
        changed,
        should_notify: changed && notifications_enabled && (degradation || recovery),
    }
}
