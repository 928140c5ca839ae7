//! State labels for the per-port state machines.
//!
//! Each dimension of the composite state is a small label enum. Labels
//! render as the lowercase strings published to the state store and parse
//! back from them.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// MUX forwarding state as debounced from driver/orchestrator notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuxState {
    /// This ToR forwards server traffic.
    Active,
    /// The peer ToR forwards server traffic.
    Standby,
    /// The driver cannot tell which side forwards.
    Unknown,
    /// The driver reported a hardware fault.
    Error,
    /// A toggle request is in flight; waiting for the driver to answer.
    Wait,
}

impl MuxState {
    /// The opposite forwarding side, where one exists.
    pub fn opposite(&self) -> MuxState {
        match self {
            MuxState::Active => MuxState::Standby,
            MuxState::Standby => MuxState::Active,
            other => *other,
        }
    }
}

impl fmt::Display for MuxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MuxState::Active => "active",
            MuxState::Standby => "standby",
            MuxState::Unknown => "unknown",
            MuxState::Error => "error",
            MuxState::Wait => "wait",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for MuxState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MuxState::Active),
            "standby" => Ok(MuxState::Standby),
            "unknown" => Ok(MuxState::Unknown),
            "error" => Ok(MuxState::Error),
            "wait" => Ok(MuxState::Wait),
            _ => Err(ParseError::InvalidMuxState(s.to_string())),
        }
    }
}

/// Host link-layer operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Up,
    Down,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Up => "up",
            LinkState::Down => "down",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for LinkState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(LinkState::Up),
            "down" => Ok(LinkState::Down),
            _ => Err(ParseError::InvalidLinkState(s.to_string())),
        }
    }
}

/// Link prober state as debounced from heartbeat replies.
///
/// Active/standby ports use `Active`/`Standby`/`Unknown`/`Wait`.
/// Active/active ports run two parallel sessions: the self session uses
/// `SelfInit`/`SelfUp`/`SelfDown`, the peer session `PeerInit`/`PeerUp`/
/// `PeerDown`; the peer of an active/standby port moves through
/// `PeerWait`/`PeerActive`/`PeerUnknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkProberState {
    Active,
    Standby,
    Unknown,
    Wait,
    SelfInit,
    SelfUp,
    SelfDown,
    PeerInit,
    PeerUp,
    PeerDown,
    PeerWait,
    PeerActive,
    PeerUnknown,
}

impl LinkProberState {
    /// True for the labels owned by an active/active self session.
    pub fn is_self_session(&self) -> bool {
        matches!(
            self,
            LinkProberState::SelfInit | LinkProberState::SelfUp | LinkProberState::SelfDown
        )
    }

    /// True for the labels owned by a peer session.
    pub fn is_peer_session(&self) -> bool {
        matches!(
            self,
            LinkProberState::PeerInit
                | LinkProberState::PeerUp
                | LinkProberState::PeerDown
                | LinkProberState::PeerWait
                | LinkProberState::PeerActive
                | LinkProberState::PeerUnknown
        )
    }
}

impl fmt::Display for LinkProberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkProberState::Active => "active",
            LinkProberState::Standby => "standby",
            LinkProberState::Unknown => "unknown",
            LinkProberState::Wait => "wait",
            LinkProberState::SelfInit => "selfinit",
            LinkProberState::SelfUp => "selfup",
            LinkProberState::SelfDown => "selfdown",
            LinkProberState::PeerInit => "peerinit",
            LinkProberState::PeerUp => "peerup",
            LinkProberState::PeerDown => "peerdown",
            LinkProberState::PeerWait => "peerwait",
            LinkProberState::PeerActive => "peeractive",
            LinkProberState::PeerUnknown => "peerunknown",
        };
        write!(f, "{}", s)
    }
}

/// Per-port MUX mode from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuxMode {
    /// Reconcile automatically from probe/driver/link signals.
    Auto,
    /// Pin this ToR active.
    Active,
    /// Operator-driven; no automatic toggles.
    Manual,
    /// Pin this ToR standby.
    Standby,
    /// Detach the port from reconciliation entirely.
    Detach,
}

impl fmt::Display for MuxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MuxMode::Auto => "auto",
            MuxMode::Active => "active",
            MuxMode::Manual => "manual",
            MuxMode::Standby => "standby",
            MuxMode::Detach => "detach",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for MuxMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(MuxMode::Auto),
            "active" => Ok(MuxMode::Active),
            "manual" => Ok(MuxMode::Manual),
            "standby" => Ok(MuxMode::Standby),
            "detach" => Ok(MuxMode::Detach),
            _ => Err(ParseError::InvalidMuxMode(s.to_string())),
        }
    }
}

/// Cable attachment model of a dual-homed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortCableType {
    /// Exactly one ToR forwards at a time through a MUX cable.
    #[serde(rename = "active-standby")]
    ActiveStandby,
    /// Each ToR independently forwards to its own attachment.
    #[serde(rename = "active-active")]
    ActiveActive,
}

impl fmt::Display for PortCableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortCableType::ActiveStandby => "active-standby",
            PortCableType::ActiveActive => "active-active",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PortCableType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active-standby" => Ok(PortCableType::ActiveStandby),
            "active-active" => Ok(PortCableType::ActiveActive),
            _ => Err(ParseError::InvalidCableType(s.to_string())),
        }
    }
}

/// Default-route state from the route monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultRoute {
    Ok,
    Na,
}

impl fmt::Display for DefaultRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DefaultRoute::Ok => "ok",
            DefaultRoute::Na => "na",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DefaultRoute {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(DefaultRoute::Ok),
            "na" => Ok(DefaultRoute::Na),
            _ => Err(ParseError::InvalidDefaultRoute(s.to_string())),
        }
    }
}

/// Health label published by the composite state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkManagerHealth {
    Uninitialized,
    Healthy,
    Unhealthy,
}

impl fmt::Display for LinkManagerHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkManagerHealth::Uninitialized => "uninitialized",
            LinkManagerHealth::Healthy => "healthy",
            LinkManagerHealth::Unhealthy => "unhealthy",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mux_state_roundtrip() {
        for state in [
            MuxState::Active,
            MuxState::Standby,
            MuxState::Unknown,
            MuxState::Error,
            MuxState::Wait,
        ] {
            assert_eq!(state.to_string().parse::<MuxState>().unwrap(), state);
        }
    }

    #[test]
    fn test_mux_state_opposite() {
        assert_eq!(MuxState::Active.opposite(), MuxState::Standby);
        assert_eq!(MuxState::Standby.opposite(), MuxState::Active);
        assert_eq!(MuxState::Unknown.opposite(), MuxState::Unknown);
        assert_eq!(MuxState::Wait.opposite(), MuxState::Wait);
    }

    #[test]
    fn test_link_state_parse() {
        assert_eq!("up".parse::<LinkState>().unwrap(), LinkState::Up);
        assert_eq!("down".parse::<LinkState>().unwrap(), LinkState::Down);
        assert!("flapping".parse::<LinkState>().is_err());
    }

    #[test]
    fn test_prober_session_partition() {
        assert!(LinkProberState::SelfUp.is_self_session());
        assert!(LinkProberState::PeerDown.is_peer_session());
        assert!(LinkProberState::PeerActive.is_peer_session());
        assert!(!LinkProberState::Active.is_self_session());
        assert!(!LinkProberState::Active.is_peer_session());
    }

    #[test]
    fn test_mux_mode_roundtrip() {
        for mode in [
            MuxMode::Auto,
            MuxMode::Active,
            MuxMode::Manual,
            MuxMode::Standby,
            MuxMode::Detach,
        ] {
            assert_eq!(mode.to_string().parse::<MuxMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_cable_type_parse() {
        assert_eq!(
            "active-standby".parse::<PortCableType>().unwrap(),
            PortCableType::ActiveStandby
        );
        assert_eq!(
            "active-active".parse::<PortCableType>().unwrap(),
            PortCableType::ActiveActive
        );
        assert!("active".parse::<PortCableType>().is_err());
    }

    #[test]
    fn test_health_display() {
        assert_eq!(LinkManagerHealth::Healthy.to_string(), "healthy");
        assert_eq!(LinkManagerHealth::Unhealthy.to_string(), "unhealthy");
        assert_eq!(LinkManagerHealth::Uninitialized.to_string(), "uninitialized");
    }
}
