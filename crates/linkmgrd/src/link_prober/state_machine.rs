//! Link prober state debouncer for active/standby ports.
//!
//! Raw heartbeat classifications (self reply, peer reply, no reply) are
//! debounced into the coarse prober label. "Good" transitions (towards
//! Active or Standby) use the positive threshold; "bad" transitions
//! (towards Unknown) use the negative threshold. Counters reset whenever
//! an opposing event arrives.

use mux_types::LinkProberState;
use tracing::debug;

/// One heartbeat classification from the prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProberEvent {
    /// Our own GUID came back.
    IcmpSelf,
    /// A foreign GUID came back: the peer ToR reaches the server.
    IcmpPeer,
    /// The interval elapsed without any reply.
    IcmpUnknown,
}

/// Debounces [`ProberEvent`]s into {Active, Standby, Unknown, Wait}.
pub struct LinkProberStateMachine {
    port_name: String,
    current: LinkProberState,
    positive_threshold: u32,
    negative_threshold: u32,
    self_count: u32,
    peer_count: u32,
    unknown_count: u32,
}

impl LinkProberStateMachine {
    pub fn new(
        port_name: impl Into<String>,
        initial: LinkProberState,
        positive_threshold: u32,
        negative_threshold: u32,
    ) -> Self {
        Self {
            port_name: port_name.into(),
            current: initial,
            positive_threshold: positive_threshold.max(1),
            negative_threshold: negative_threshold.max(1),
            self_count: 0,
            peer_count: 0,
            unknown_count: 0,
        }
    }

    pub fn current(&self) -> LinkProberState {
        self.current
    }

    /// Force the machine into `label`, resetting all counters. The
    /// composite re-initializes the prober dimension this way after a MUX
    /// toggle.
    pub fn enter(&mut self, label: LinkProberState) {
        debug!("{}: link prober state machine enters {}", self.port_name, label);
        self.current = label;
        self.reset_counts();
    }

    /// Feed one classification through the debounce; returns the new label
    /// when it flips.
    pub fn handle_event(&mut self, event: ProberEvent) -> Option<LinkProberState> {
        let next = match event {
            ProberEvent::IcmpSelf => {
                self.peer_count = 0;
                self.unknown_count = 0;
                if self.current == LinkProberState::Active {
                    self.self_count = 0;
                    return None;
                }
                self.self_count += 1;
                (self.self_count >= self.positive_threshold).then_some(LinkProberState::Active)
            }
            ProberEvent::IcmpPeer => {
                self.self_count = 0;
                self.unknown_count = 0;
                if self.current == LinkProberState::Standby {
                    self.peer_count = 0;
                    return None;
                }
                self.peer_count += 1;
                (self.peer_count >= self.positive_threshold).then_some(LinkProberState::Standby)
            }
            ProberEvent::IcmpUnknown => {
                self.self_count = 0;
                self.peer_count = 0;
                match self.current {
                    // An active/standby port waits out silence in Wait; it
                    // can only leave on a definite reply.
                    LinkProberState::Wait => {
                        self.unknown_count = 0;
                        return None;
                    }
                    LinkProberState::Unknown => {
                        self.unknown_count = 0;
                        return None;
                    }
                    _ => {
                        self.unknown_count += 1;
                        (self.unknown_count >= self.negative_threshold)
                            .then_some(LinkProberState::Unknown)
                    }
                }
            }
        };

        match next {
            Some(label) if label != self.current => {
                debug!(
                    "{}: link prober state {} -> {}",
                    self.port_name, self.current, label
                );
                self.current = label;
                self.reset_counts();
                Some(label)
            }
            _ => None,
        }
    }

    fn reset_counts(&mut self) {
        self.self_count = 0;
        self.peer_count = 0;
        self.unknown_count = 0;
    }
}
