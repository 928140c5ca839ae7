//! Common types for the dual-ToR MUX control plane.
//!
//! This crate provides the type-safe primitives shared by the link manager
//! daemon and its tests:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`MuxState`], [`LinkState`], [`LinkProberState`]: per-dimension state labels
//! - [`MuxMode`], [`PortCableType`]: per-port configuration enums
//! - [`DefaultRoute`], [`LinkManagerHealth`]: route monitor and health labels
//!
//! All label enums render as the lowercase strings used in the switch state
//! store, and parse back from them.

mod labels;
mod mac;

pub use labels::{
    DefaultRoute, LinkManagerHealth, LinkProberState, LinkState, MuxMode, MuxState, PortCableType,
};
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid MUX state: {0}")]
    InvalidMuxState(String),

    #[error("invalid link state: {0}")]
    InvalidLinkState(String),

    #[error("invalid MUX mode: {0}")]
    InvalidMuxMode(String),

    #[error("invalid cable type: {0}")]
    InvalidCableType(String),

    #[error("invalid default route state: {0}")]
    InvalidDefaultRoute(String),
}
