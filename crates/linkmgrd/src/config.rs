//! Per-port and daemon-wide configuration.
//!
//! [`MuxPortConfig`] carries the immutable parameters of one port. The
//! addresses and MACs start unset and are filled in from state-store
//! updates before the port activates; everything else is fixed at load
//! time from the daemon configuration file.

use std::net::Ipv4Addr;
use std::time::Duration;

use mux_types::{MacAddress, MuxMode, PortCableType};
use serde::Deserialize;

use crate::error::{LinkMgrError, LinkMgrResult};

/// Default heartbeat interval in milliseconds.
pub const DEFAULT_TIMEOUT_IPV4_MSEC: u64 = 100;

/// Default decreased interval used during a switchover-measurement window.
pub const DEFAULT_DECREASED_INTERVAL_MSEC: u64 = 10;

/// Suspend duration is this many heartbeat intervals.
pub const SUSPEND_INTERVAL_FACTOR: u64 = 5;

/// Default cap applied to every geometric backoff factor.
pub const DEFAULT_MAX_BACKOFF_FACTOR: u32 = 128;

/// Minimum admin-forwarding sync interval (active/active), seconds.
pub const MIN_OSCILLATION_INTERVAL_SEC: u64 = 300;

/// Immutable (per-port) configuration parameters.
#[derive(Debug, Clone)]
pub struct MuxPortConfig {
    /// Port name, e.g. "Ethernet4".
    pub port_name: String,
    /// Server (blade) identifier; also the ICMP echo identifier.
    pub server_id: u16,
    /// Heartbeat interval.
    pub timeout_ipv4: Duration,
    /// Interval during a switchover-measurement window.
    pub decreased_interval: Duration,
    /// How long TX is suspended when yielding to the peer.
    pub suspend_timeout: Duration,
    /// Debounce for "good" transitions (P).
    pub positive_state_change_retry_count: u32,
    /// Debounce for "bad" transitions (N).
    pub negative_state_change_retry_count: u32,
    /// Debounce for driver notifications (M).
    pub mux_state_change_retry_count: u32,
    /// Debounce for link up/down (L).
    pub link_state_change_retry_count: u32,
    /// Cap on the geometric backoff factors.
    pub max_backoff_factor: u32,
    /// Admin-forwarding periodic sync interval (active/active).
    pub oscillation_interval: Duration,
    /// Whether the periodic sync is enabled.
    pub oscillation_enabled: bool,
    /// This ToR's MAC address.
    pub tor_mac: MacAddress,
    /// VLAN interface MAC, used as source when `use_tor_mac_as_src_mac` is unset.
    pub vlan_mac: MacAddress,
    /// Server MAC address (heartbeat destination).
    pub server_mac: MacAddress,
    /// Loopback IPv4 used as the probe source.
    pub loopback_ipv4: Ipv4Addr,
    /// Server (blade) IPv4 address.
    pub server_ipv4: Ipv4Addr,
    /// SoC IPv4 address (active/active attachments).
    pub soc_ipv4: Option<Ipv4Addr>,
    /// Configured MUX mode.
    pub mode: MuxMode,
    /// Cable attachment model.
    pub port_cable_type: PortCableType,
    /// Source heartbeats from the ToR MAC instead of the VLAN MAC.
    pub use_tor_mac_as_src_mac: bool,
    /// Gate TX probing on default-route availability.
    pub enable_default_route_feature: bool,
    /// Measure switchover overhead with a decreased probing interval.
    pub enable_switchover_measurement: bool,
}

impl MuxPortConfig {
    /// Create a config with defaults for the given port.
    pub fn new(port_name: impl Into<String>, server_id: u16) -> Self {
        let timeout_ipv4 = Duration::from_millis(DEFAULT_TIMEOUT_IPV4_MSEC);
        Self {
            port_name: port_name.into(),
            server_id,
            timeout_ipv4,
            decreased_interval: Duration::from_millis(DEFAULT_DECREASED_INTERVAL_MSEC),
            suspend_timeout: timeout_ipv4 * SUSPEND_INTERVAL_FACTOR as u32,
            positive_state_change_retry_count: 1,
            negative_state_change_retry_count: 3,
            mux_state_change_retry_count: 1,
            link_state_change_retry_count: 1,
            max_backoff_factor: DEFAULT_MAX_BACKOFF_FACTOR,
            oscillation_interval: Duration::from_secs(MIN_OSCILLATION_INTERVAL_SEC),
            oscillation_enabled: false,
            tor_mac: MacAddress::ZERO,
            vlan_mac: MacAddress::ZERO,
            server_mac: MacAddress::ZERO,
            loopback_ipv4: Ipv4Addr::UNSPECIFIED,
            server_ipv4: Ipv4Addr::UNSPECIFIED,
            soc_ipv4: None,
            mode: MuxMode::Auto,
            port_cable_type: PortCableType::ActiveStandby,
            use_tor_mac_as_src_mac: false,
            enable_default_route_feature: false,
            enable_switchover_measurement: false,
        }
    }

    /// Set the cable type (builder pattern).
    pub fn with_cable_type(mut self, cable_type: PortCableType) -> Self {
        self.port_cable_type = cable_type;
        self
    }

    /// Set the heartbeat interval and rescale the suspend timeout.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.timeout_ipv4 = interval;
        self.suspend_timeout = interval * SUSPEND_INTERVAL_FACTOR as u32;
        self
    }

    /// Set the debounce thresholds (builder pattern).
    pub fn with_retry_counts(mut self, positive: u32, negative: u32, mux: u32, link: u32) -> Self {
        self.positive_state_change_retry_count = positive.max(1);
        self.negative_state_change_retry_count = negative.max(1);
        self.mux_state_change_retry_count = mux.max(1);
        self.link_state_change_retry_count = link.max(1);
        self
    }

    /// Source MAC for heartbeat frames.
    pub fn src_mac(&self) -> MacAddress {
        if self.use_tor_mac_as_src_mac {
            self.tor_mac
        } else {
            self.vlan_mac
        }
    }

    /// Destination IPv4 of the heartbeat: the SoC address for
    /// active/active attachments, the server address otherwise.
    pub fn probe_target_ipv4(&self) -> Ipv4Addr {
        match self.port_cable_type {
            PortCableType::ActiveActive => self.soc_ipv4.unwrap_or(self.server_ipv4),
            PortCableType::ActiveStandby => self.server_ipv4,
        }
    }

    /// How long a MUX toggle may stay unanswered before the wait timer fires.
    pub fn mux_wait_timeout(&self) -> Duration {
        let third = self.timeout_ipv4 / 3;
        third.max(Duration::from_millis(1))
    }
}

/// One port entry in the daemon configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct PortConfigEntry {
    pub name: String,
    pub server_id: u16,
    #[serde(default)]
    pub server_ipv4: Option<Ipv4Addr>,
    #[serde(default)]
    pub soc_ipv4: Option<Ipv4Addr>,
    #[serde(default)]
    pub server_mac: Option<MacAddress>,
    #[serde(default)]
    pub mode: Option<MuxMode>,
    #[serde(default)]
    pub cable_type: Option<PortCableType>,
}

/// Daemon configuration file contents.
///
/// Recognized option names follow the linkmgrd configuration surface:
/// `timeoutIpv4_msec`, `decreasedInterval_msec`, `positiveRetryCount`,
/// `negativeRetryCount`, `muxStateRetryCount`, `linkStateRetryCount`,
/// `torMac`, `loopbackIpv4`, `useTorMacAsSrcMac`,
/// `enableDefaultRouteFeature`, `enableSwitchoverMeasurement`.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(rename = "timeoutIpv4_msec", default = "default_timeout_msec")]
    pub timeout_ipv4_msec: u64,
    #[serde(rename = "decreasedInterval_msec", default = "default_decreased_msec")]
    pub decreased_interval_msec: u64,
    /// Overrides the default of five heartbeat intervals.
    #[serde(rename = "suspendTimeout_msec", default)]
    pub suspend_timeout_msec: Option<u64>,
    #[serde(rename = "positiveRetryCount", default = "default_one")]
    pub positive_retry_count: u32,
    #[serde(rename = "negativeRetryCount", default = "default_three")]
    pub negative_retry_count: u32,
    #[serde(rename = "muxStateRetryCount", default = "default_one")]
    pub mux_state_retry_count: u32,
    #[serde(rename = "linkStateRetryCount", default = "default_one")]
    pub link_state_retry_count: u32,
    #[serde(rename = "oscillationInterval_sec", default = "default_oscillation_sec")]
    pub oscillation_interval_sec: u64,
    #[serde(rename = "enableOscillation", default)]
    pub enable_oscillation: bool,
    #[serde(rename = "torMac", default)]
    pub tor_mac: Option<MacAddress>,
    #[serde(rename = "vlanMac", default)]
    pub vlan_mac: Option<MacAddress>,
    #[serde(rename = "loopbackIpv4", default)]
    pub loopback_ipv4: Option<Ipv4Addr>,
    #[serde(rename = "useTorMacAsSrcMac", default)]
    pub use_tor_mac_as_src_mac: bool,
    #[serde(rename = "enableDefaultRouteFeature", default)]
    pub enable_default_route_feature: bool,
    #[serde(rename = "enableSwitchoverMeasurement", default)]
    pub enable_switchover_measurement: bool,
    #[serde(default)]
    pub ports: Vec<PortConfigEntry>,
}

fn default_timeout_msec() -> u64 {
    DEFAULT_TIMEOUT_IPV4_MSEC
}

fn default_decreased_msec() -> u64 {
    DEFAULT_DECREASED_INTERVAL_MSEC
}

fn default_one() -> u32 {
    1
}

fn default_three() -> u32 {
    3
}

fn default_oscillation_sec() -> u64 {
    MIN_OSCILLATION_INTERVAL_SEC
}

impl DaemonConfig {
    /// Parse the daemon configuration from a JSON string.
    pub fn from_json(json: &str) -> LinkMgrResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| LinkMgrError::parse(format!("daemon config: {}", e)))
    }

    /// Materialize the per-port config for one port entry, applying
    /// global defaults and per-port overrides.
    pub fn port_config(&self, entry: &PortConfigEntry) -> MuxPortConfig {
        let mut config = MuxPortConfig::new(&entry.name, entry.server_id)
            .with_probe_interval(Duration::from_millis(self.timeout_ipv4_msec))
            .with_retry_counts(
                self.positive_retry_count,
                self.negative_retry_count,
                self.mux_state_retry_count,
                self.link_state_retry_count,
            );
        config.decreased_interval = Duration::from_millis(self.decreased_interval_msec);
        if let Some(msec) = self.suspend_timeout_msec {
            config.suspend_timeout = Duration::from_millis(msec);
        }
        config.oscillation_interval = Duration::from_secs(
            self.oscillation_interval_sec.max(MIN_OSCILLATION_INTERVAL_SEC),
        );
        config.oscillation_enabled = self.enable_oscillation;
        config.use_tor_mac_as_src_mac = self.use_tor_mac_as_src_mac;
        config.enable_default_route_feature = self.enable_default_route_feature;
        config.enable_switchover_measurement = self.enable_switchover_measurement;

        if let Some(mac) = self.tor_mac {
            config.tor_mac = mac;
        }
        if let Some(mac) = self.vlan_mac {
            config.vlan_mac = mac;
        }
        if let Some(addr) = self.loopback_ipv4 {
            config.loopback_ipv4 = addr;
        }
        if let Some(addr) = entry.server_ipv4 {
            config.server_ipv4 = addr;
        }
        if let Some(mac) = entry.server_mac {
            config.server_mac = mac;
        }
        config.soc_ipv4 = entry.soc_ipv4;
        if let Some(mode) = entry.mode {
            config.mode = mode;
        }
        if let Some(cable_type) = entry.cable_type {
            config.port_cable_type = cable_type;
        }

        config
    }
}
