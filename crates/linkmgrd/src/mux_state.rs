//! MUX state debouncer.
//!
//! Driver/orchestrator notifications flip the MUX label only after a
//! configured number of consecutive identical notifications; a different
//! notification restarts the count. The composite can also force a label
//! directly (entering `Wait` while a toggle is in flight).

use mux_types::MuxState;
use tracing::debug;

/// A MUX state label as reported by the driver or echoed by the database.
///
/// `Failure` is a transport-level failure of the driver RPC itself; it is
/// debounced like `Unknown` but additionally asks the composite to issue a
/// fresh probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxNotification {
    Active,
    Standby,
    Unknown,
    Error,
    Failure,
}

impl MuxNotification {
    fn target_label(&self) -> MuxState {
        match self {
            MuxNotification::Active => MuxState::Active,
            MuxNotification::Standby => MuxState::Standby,
            MuxNotification::Unknown | MuxNotification::Failure => MuxState::Unknown,
            MuxNotification::Error => MuxState::Error,
        }
    }
}

/// Outcome of feeding one notification to the debouncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MuxStateStep {
    /// The label the machine flipped to, if it flipped.
    pub new_label: Option<MuxState>,
    /// The notification suggests the driver should be re-probed.
    pub probe_hint: bool,
}

/// Debounces driver notifications into the MUX dimension of the composite.
pub struct MuxStateMachine {
    port_name: String,
    current: MuxState,
    threshold: u32,
    active_count: u32,
    standby_count: u32,
    unknown_count: u32,
    error_count: u32,
}

impl MuxStateMachine {
    pub fn new(port_name: impl Into<String>, initial: MuxState, threshold: u32) -> Self {
        Self {
            port_name: port_name.into(),
            current: initial,
            threshold: threshold.max(1),
            active_count: 0,
            standby_count: 0,
            unknown_count: 0,
            error_count: 0,
        }
    }

    pub fn current(&self) -> MuxState {
        self.current
    }

    /// Force the machine into `label`, resetting all counters. Used by the
    /// composite when it drives the MUX dimension itself (`Wait` entry on a
    /// toggle, alignment after a driver probe).
    pub fn enter(&mut self, label: MuxState) {
        debug!("{}: mux state machine enters {}", self.port_name, label);
        self.current = label;
        self.reset_counts();
    }

    /// Feed one notification through the debounce.
    pub fn handle_notification(&mut self, notification: MuxNotification) -> MuxStateStep {
        let probe_hint = matches!(notification, MuxNotification::Failure);
        let target = notification.target_label();

        if target == self.current {
            self.reset_counts();
            return MuxStateStep {
                new_label: None,
                probe_hint,
            };
        }

        let count = match target {
            MuxState::Active => {
                self.standby_count = 0;
                self.unknown_count = 0;
                self.error_count = 0;
                self.active_count += 1;
                self.active_count
            }
            MuxState::Standby => {
                self.active_count = 0;
                self.unknown_count = 0;
                self.error_count = 0;
                self.standby_count += 1;
                self.standby_count
            }
            MuxState::Unknown => {
                self.active_count = 0;
                self.standby_count = 0;
                self.error_count = 0;
                self.unknown_count += 1;
                self.unknown_count
            }
            MuxState::Error => {
                self.active_count = 0;
                self.standby_count = 0;
                self.unknown_count = 0;
                self.error_count += 1;
                self.error_count
            }
            MuxState::Wait => unreachable!("notifications never target Wait"),
        };

        if count >= self.threshold {
            debug!(
                "{}: mux state {} -> {} after {} notifications",
                self.port_name, self.current, target, count
            );
            self.current = target;
            self.reset_counts();
            MuxStateStep {
                new_label: Some(target),
                probe_hint,
            }
        } else {
            MuxStateStep {
                new_label: None,
                probe_hint,
            }
        }
    }

    fn reset_counts(&mut self) {
        self.active_count = 0;
        self.standby_count = 0;
        self.unknown_count = 0;
        self.error_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn machine(threshold: u32) -> MuxStateMachine {
        MuxStateMachine::new("Ethernet0", MuxState::Wait, threshold)
    }

    #[test]
    fn test_flip_requires_threshold() {
        let mut sm = machine(2);
        assert_eq!(sm.handle_notification(MuxNotification::Active).new_label, None);
        assert_eq!(
            sm.handle_notification(MuxNotification::Active).new_label,
            Some(MuxState::Active)
        );
        assert_eq!(sm.current(), MuxState::Active);
    }

    #[test]
    fn test_different_label_resets_count() {
        let mut sm = machine(2);
        sm.handle_notification(MuxNotification::Active);
        sm.handle_notification(MuxNotification::Standby);
        // The active streak was broken; one more Active is not enough...
        assert_eq!(sm.handle_notification(MuxNotification::Active).new_label, None);
        // ...two are.
        assert_eq!(
            sm.handle_notification(MuxNotification::Active).new_label,
            Some(MuxState::Active)
        );
    }

    #[test]
    fn test_same_label_is_idempotent() {
        let mut sm = machine(1);
        sm.handle_notification(MuxNotification::Standby);
        assert_eq!(sm.current(), MuxState::Standby);
        let step = sm.handle_notification(MuxNotification::Standby);
        assert_eq!(step.new_label, None);
        assert_eq!(sm.current(), MuxState::Standby);
    }

    #[test]
    fn test_failure_is_unknown_with_probe_hint() {
        let mut sm = machine(1);
        let step = sm.handle_notification(MuxNotification::Failure);
        assert_eq!(step.new_label, Some(MuxState::Unknown));
        assert!(step.probe_hint);
    }

    #[test]
    fn test_error_label() {
        let mut sm = machine(2);
        sm.handle_notification(MuxNotification::Error);
        let step = sm.handle_notification(MuxNotification::Error);
        assert_eq!(step.new_label, Some(MuxState::Error));
        assert!(!step.probe_hint);
    }

    #[test]
    fn test_enter_overrides_and_resets() {
        let mut sm = machine(2);
        sm.handle_notification(MuxNotification::Active);
        sm.enter(MuxState::Wait);
        assert_eq!(sm.current(), MuxState::Wait);
        // The pre-enter streak no longer counts.
        assert_eq!(sm.handle_notification(MuxNotification::Active).new_label, None);
    }
}
