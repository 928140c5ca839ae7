//! Host link-layer state debouncer.

use mux_types::LinkState;
use tracing::debug;

/// Debounces host link up/down notifications into the link dimension of
/// the composite.
pub struct LinkStateMachine {
    port_name: String,
    current: LinkState,
    threshold: u32,
    up_count: u32,
    down_count: u32,
}

impl LinkStateMachine {
    pub fn new(port_name: impl Into<String>, initial: LinkState, threshold: u32) -> Self {
        Self {
            port_name: port_name.into(),
            current: initial,
            threshold: threshold.max(1),
            up_count: 0,
            down_count: 0,
        }
    }

    pub fn current(&self) -> LinkState {
        self.current
    }

    /// Feed one link notification through the debounce; returns the new
    /// label when it flips.
    pub fn handle_notification(&mut self, state: LinkState) -> Option<LinkState> {
        if state == self.current {
            self.up_count = 0;
            self.down_count = 0;
            return None;
        }

        let count = match state {
            LinkState::Up => {
                self.down_count = 0;
                self.up_count += 1;
                self.up_count
            }
            LinkState::Down => {
                self.up_count = 0;
                self.down_count += 1;
                self.down_count
            }
        };

        if count >= self.threshold {
            debug!("{}: link state {} -> {}", self.port_name, self.current, state);
            self.current = state;
            self.up_count = 0;
            self.down_count = 0;
            Some(state)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_debounce_up() {
        let mut sm = LinkStateMachine::new("Ethernet0", LinkState::Down, 2);
        assert_eq!(sm.handle_notification(LinkState::Up), None);
        assert_eq!(sm.handle_notification(LinkState::Up), Some(LinkState::Up));
        assert_eq!(sm.current(), LinkState::Up);
    }

    #[test]
    fn test_opposing_event_resets() {
        let mut sm = LinkStateMachine::new("Ethernet0", LinkState::Down, 2);
        sm.handle_notification(LinkState::Up);
        sm.handle_notification(LinkState::Down);
        assert_eq!(sm.handle_notification(LinkState::Up), None);
        assert_eq!(sm.handle_notification(LinkState::Up), Some(LinkState::Up));
    }

    #[test]
    fn test_steady_state_is_idempotent() {
        let mut sm = LinkStateMachine::new("Ethernet0", LinkState::Up, 2);
        assert_eq!(sm.handle_notification(LinkState::Up), None);
        assert_eq!(sm.current(), LinkState::Up);
    }

    #[test]
    fn test_threshold_one_flips_immediately() {
        let mut sm = LinkStateMachine::new("Ethernet0", LinkState::Down, 1);
        assert_eq!(sm.handle_notification(LinkState::Up), Some(LinkState::Up));
    }
}
