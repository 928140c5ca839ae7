//! Composite state machines.
//!
//! The composite reduces the child-machine labels — (prober, mux, link) —
//! into the side effects the system must take. Transitions are pure: each
//! handler mutates the composite tuple and returns [`Action`] values; the
//! port runtime interprets actions against the real prober, driver client
//! and state-store publisher, and tests interpret them against recorders.

mod active_active;
mod active_standby;

pub use active_active::ActiveActiveStateMachine;
pub use active_standby::ActiveStandbyStateMachine;

use std::fmt;
use std::time::Duration;

use mux_types::{LinkManagerHealth, LinkProberState, LinkState, MuxState};

use crate::port_event::TimerKind;

/// The composite 3-tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeState {
    pub link_prober: LinkProberState,
    pub mux: MuxState,
    pub link: LinkState,
}

impl CompositeState {
    pub fn new(link_prober: LinkProberState, mux: MuxState, link: LinkState) -> Self {
        Self {
            link_prober,
            mux,
            link,
        }
    }
}

impl fmt::Display for CompositeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.link_prober, self.mux, self.link)
    }
}

/// Why a MUX toggle was requested. Published with every switching metric.
///
/// The `HarewareStateUnknown` spelling is the string the ecosystem already
/// consumes from the state store; it is kept verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchCause {
    PeerHeartbeatMissing,
    PeerLinkDown,
    TlvSwitchActiveCommand,
    LinkDown,
    TransceiverDaemonTimeout,
    MatchingHardwareState,
    ConfigMuxMode,
    HardwareStateUnknown,
    DefaultRouteNa,
}

impl fmt::Display for SwitchCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwitchCause::PeerHeartbeatMissing => "PeerHeartbeatMissing",
            SwitchCause::PeerLinkDown => "PeerLinkDown",
            SwitchCause::TlvSwitchActiveCommand => "TlvSwitchActiveCommand",
            SwitchCause::LinkDown => "LinkDown",
            SwitchCause::TransceiverDaemonTimeout => "TransceiverDaemonTimeout",
            SwitchCause::MatchingHardwareState => "MatchingHardwareState",
            SwitchCause::ConfigMuxMode => "ConfigMuxMode",
            SwitchCause::HardwareStateUnknown => "HarewareStateUnknown",
            SwitchCause::DefaultRouteNa => "DefaultRouteNA",
        };
        write!(f, "{}", s)
    }
}

/// Switching metric phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchingPhase {
    Start,
    End,
}

/// Side effects requested by a composite transition, interpreted by the
/// port runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    // Prober control.
    InitializeProber,
    StartProbing,
    UpdateEthernetFrame,
    ProbePeerTor,
    SuspendTx(Duration),
    ResumeTx,
    ShutdownTx,
    RestartTx,
    SendPeerSwitchCommand,
    SendPeerProbeCommand,
    DecreaseProbeInterval(Duration),
    RevertProbeInterval,
    ResetIcmpPacketCounts,
    /// Re-align the prober child machine with the composite.
    EnterProberState(LinkProberState),

    // Driver control.
    SetMuxState(MuxState),
    ProbeMux,

    // Timers.
    StartTimer { kind: TimerKind, factor: u32 },
    CancelTimer(TimerKind),

    // State-store publications.
    PublishMuxState(MuxState),
    PublishPeerMuxState(MuxState),
    PublishHealth(LinkManagerHealth),
    PublishSwitchingMetric {
        phase: SwitchingPhase,
        cause: SwitchCause,
    },
    PublishProberMetric {
        label: LinkProberState,
        session_id: String,
    },
    PublishPckLossRatio {
        unknown: u64,
        total: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_composite_display() {
        let state = CompositeState::new(LinkProberState::Active, MuxState::Wait, LinkState::Up);
        assert_eq!(state.to_string(), "(active, wait, up)");
    }

    #[test]
    fn test_switch_cause_database_strings() {
        assert_eq!(SwitchCause::HardwareStateUnknown.to_string(), "HarewareStateUnknown");
        assert_eq!(SwitchCause::DefaultRouteNa.to_string(), "DefaultRouteNA");
        assert_eq!(SwitchCause::TlvSwitchActiveCommand.to_string(), "TlvSwitchActiveCommand");
    }
}
