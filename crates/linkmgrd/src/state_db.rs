//! State-store publisher seam.
//!
//! The inputs of the state-store adapter (config, link, address and peer
//! updates) arrive through [`crate::mux_port::MuxPort`] methods; this
//! trait covers the outputs the composite publishes. Local state is the
//! source of truth: a failed publish is logged and retried at the next
//! state change.

use async_trait::async_trait;
use mux_types::{LinkManagerHealth, LinkProberState, MuxState};

use crate::error::LinkMgrResult;
use crate::link_manager::{SwitchCause, SwitchingPhase};

/// Publishes per-port state into the switch state store. Implementations
/// must be thread-safe; all calls are made from port event loops.
#[async_trait]
pub trait StateDbPublisher: Send + Sync {
    async fn publish_mux_state(&self, port: &str, state: MuxState) -> LinkMgrResult<()>;

    async fn publish_peer_mux_state(&self, port: &str, state: MuxState) -> LinkMgrResult<()>;

    async fn publish_health(&self, port: &str, health: LinkManagerHealth) -> LinkMgrResult<()>;

    async fn publish_switching_metric(
        &self,
        port: &str,
        phase: SwitchingPhase,
        cause: SwitchCause,
    ) -> LinkMgrResult<()>;

    async fn publish_link_prober_metric(
        &self,
        port: &str,
        label: LinkProberState,
        session_id: &str,
    ) -> LinkMgrResult<()>;

    async fn publish_pck_loss_ratio(
        &self,
        port: &str,
        unknown: u64,
        total: u64,
    ) -> LinkMgrResult<()>;
}
