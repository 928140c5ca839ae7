//! MUX driver client seam.
//!
//! The daemon never programs the cable itself; it asks the transceiver
//! driver for transitions and state reads, and the driver answers
//! asynchronously through the port's notification inputs
//! (`on_mux_state_notification`, `on_probe_mux_state_notification`,
//! `on_get_mux_state_notification`).

use async_trait::async_trait;
use mux_types::MuxState;

use crate::error::LinkMgrResult;

/// Client for the cable driver. Implementations must be thread-safe; all
/// calls are made from port event loops.
#[async_trait]
pub trait DriverClient: Send + Sync {
    /// Request a toggle to `target`. The reply arrives as a notification.
    async fn set_mux_state(&self, port: &str, target: MuxState) -> LinkMgrResult<()>;

    /// Ask for the driver-reported state. The reply arrives as a probe
    /// notification.
    async fn probe_mux_state(&self, port: &str) -> LinkMgrResult<()>;
}
