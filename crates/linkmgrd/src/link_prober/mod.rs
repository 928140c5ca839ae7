//! ICMP link prober.
//!
//! Sends heartbeats carrying this instance's GUID to the server, receives
//! the echoes, and classifies each interval as self-reachable,
//! peer-reachable or silent. Peer commands (switch-active, mux-probe)
//! piggyback on the heartbeat TLV tail.

pub mod frame;
pub mod payload;
pub mod prober;
pub mod session_state_machine;
pub mod socket;
pub mod state_machine;

pub use frame::{parse_heartbeat, HeartbeatFrame, ParsedHeartbeat};
pub use payload::{IcmpPayload, TlvCommand, MUX_MAX_ICMP_BUFFER_SIZE};
pub use prober::{LinkProber, ProberReport};
pub use session_state_machine::{
    PeerSessionEvent, PeerSessionStateMachine, PeerStateMachine, SelfSessionEvent,
    SelfSessionStateMachine,
};
pub use socket::{ProbeSocket, RawProbeSocket};
pub use state_machine::{LinkProberStateMachine, ProberEvent};
