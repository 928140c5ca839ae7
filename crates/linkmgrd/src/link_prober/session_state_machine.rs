//! Link prober session debouncers for active/active ports.
//!
//! An active/active port runs two independent sessions over the same
//! heartbeat stream: the self session tracks whether our own probes come
//! back, the peer session tracks whether the peer ToR's probes are seen.
//! Peer transitions are published independently of the composite, tagged
//! with the session id.

use mux_types::LinkProberState;
use tracing::debug;

/// Classification consumed by the self session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfSessionEvent {
    IcmpSelf,
    IcmpUnknown,
}

/// Classification consumed by a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSessionEvent {
    IcmpPeerActive,
    IcmpPeerUnknown,
}

/// The self session: `SelfInit` until enough evidence accumulates, then
/// `SelfUp` or `SelfDown`.
pub struct SelfSessionStateMachine {
    port_name: String,
    current: LinkProberState,
    positive_threshold: u32,
    negative_threshold: u32,
    self_count: u32,
    unknown_count: u32,
}

impl SelfSessionStateMachine {
    pub fn new(port_name: impl Into<String>, positive_threshold: u32, negative_threshold: u32) -> Self {
        Self {
            port_name: port_name.into(),
            current: LinkProberState::SelfInit,
            positive_threshold: positive_threshold.max(1),
            negative_threshold: negative_threshold.max(1),
            self_count: 0,
            unknown_count: 0,
        }
    }

    pub fn current(&self) -> LinkProberState {
        self.current
    }

    pub fn enter(&mut self, label: LinkProberState) {
        debug!("{}: self session enters {}", self.port_name, label);
        self.current = label;
        self.self_count = 0;
        self.unknown_count = 0;
    }

    pub fn handle_event(&mut self, event: SelfSessionEvent) -> Option<LinkProberState> {
        let next = match event {
            SelfSessionEvent::IcmpSelf => {
                self.unknown_count = 0;
                if self.current == LinkProberState::SelfUp {
                    self.self_count = 0;
                    return None;
                }
                self.self_count += 1;
                (self.self_count >= self.positive_threshold).then_some(LinkProberState::SelfUp)
            }
            SelfSessionEvent::IcmpUnknown => {
                self.self_count = 0;
                if self.current == LinkProberState::SelfDown {
                    self.unknown_count = 0;
                    return None;
                }
                self.unknown_count += 1;
                (self.unknown_count >= self.negative_threshold).then_some(LinkProberState::SelfDown)
            }
        };

        match next {
            Some(label) if label != self.current => {
                debug!("{}: self session {} -> {}", self.port_name, self.current, label);
                self.current = label;
                self.self_count = 0;
                self.unknown_count = 0;
                Some(label)
            }
            _ => None,
        }
    }
}

/// A peer session: `PeerInit` until enough evidence accumulates, then
/// `PeerUp` or `PeerDown`.
pub struct PeerSessionStateMachine {
    port_name: String,
    current: LinkProberState,
    positive_threshold: u32,
    negative_threshold: u32,
    active_count: u32,
    unknown_count: u32,
}

impl PeerSessionStateMachine {
    pub fn new(port_name: impl Into<String>, positive_threshold: u32, negative_threshold: u32) -> Self {
        Self {
            port_name: port_name.into(),
            current: LinkProberState::PeerInit,
            positive_threshold: positive_threshold.max(1),
            negative_threshold: negative_threshold.max(1),
            active_count: 0,
            unknown_count: 0,
        }
    }

    pub fn current(&self) -> LinkProberState {
        self.current
    }

    pub fn handle_event(&mut self, event: PeerSessionEvent) -> Option<LinkProberState> {
        let next = match event {
            PeerSessionEvent::IcmpPeerActive => {
                self.unknown_count = 0;
                if self.current == LinkProberState::PeerUp {
                    self.active_count = 0;
                    return None;
                }
                self.active_count += 1;
                (self.active_count >= self.positive_threshold).then_some(LinkProberState::PeerUp)
            }
            PeerSessionEvent::IcmpPeerUnknown => {
                self.active_count = 0;
                if self.current == LinkProberState::PeerDown {
                    self.unknown_count = 0;
                    return None;
                }
                self.unknown_count += 1;
                (self.unknown_count >= self.negative_threshold).then_some(LinkProberState::PeerDown)
            }
        };

        match next {
            Some(label) if label != self.current => {
                debug!("{}: peer session {} -> {}", self.port_name, self.current, label);
                self.current = label;
                self.active_count = 0;
                self.unknown_count = 0;
                Some(label)
            }
            _ => None,
        }
    }
}

/// The peer prober dimension of the active/active composite: `PeerWait`
/// until the peer's reachability is established, then `PeerActive` or
/// `PeerUnknown`. This drives the peer MUX decision, while the peer
/// *session* above is what gets published per session id.
pub struct PeerStateMachine {
    port_name: String,
    current: LinkProberState,
    positive_threshold: u32,
    negative_threshold: u32,
    active_count: u32,
    unknown_count: u32,
}

impl PeerStateMachine {
    pub fn new(port_name: impl Into<String>, positive_threshold: u32, negative_threshold: u32) -> Self {
        Self {
            port_name: port_name.into(),
            current: LinkProberState::PeerWait,
            positive_threshold: positive_threshold.max(1),
            negative_threshold: negative_threshold.max(1),
            active_count: 0,
            unknown_count: 0,
        }
    }

    pub fn current(&self) -> LinkProberState {
        self.current
    }

    pub fn enter(&mut self, label: LinkProberState) {
        self.current = label;
        self.active_count = 0;
        self.unknown_count = 0;
    }

    pub fn handle_event(&mut self, event: PeerSessionEvent) -> Option<LinkProberState> {
        let next = match event {
            PeerSessionEvent::IcmpPeerActive => {
                self.unknown_count = 0;
                if self.current == LinkProberState::PeerActive {
                    self.active_count = 0;
                    return None;
                }
                self.active_count += 1;
                (self.active_count >= self.positive_threshold).then_some(LinkProberState::PeerActive)
            }
            PeerSessionEvent::IcmpPeerUnknown => {
                self.active_count = 0;
                if self.current == LinkProberState::PeerUnknown {
                    self.unknown_count = 0;
                    return None;
                }
                self.unknown_count += 1;
                (self.unknown_count >= self.negative_threshold)
                    .then_some(LinkProberState::PeerUnknown)
            }
        };

        match next {
            Some(label) if label != self.current => {
                debug!("{}: peer prober {} -> {}", self.port_name, self.current, label);
                self.current = label;
                self.active_count = 0;
                self.unknown_count = 0;
                Some(label)
            }
            _ => None,
        }
    }
}
