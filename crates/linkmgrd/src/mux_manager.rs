//! Daemon-wide port directory.
//!
//! Owns every [`MuxPort`], creates them from the daemon configuration and
//! fans daemon-level updates (ToR MAC, mode changes, removal) out to the
//! right port. State-store subscriptions land here and are dispatched by
//! port name.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use mux_types::{DefaultRoute, LinkState, MacAddress, MuxMode, MuxState};
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::driver::DriverClient;
use crate::mux_port::MuxPort;
use crate::mux_state::MuxNotification;
use crate::state_db::StateDbPublisher;

pub struct MuxManager {
    config: DaemonConfig,
    driver: Arc<dyn DriverClient>,
    publisher: Arc<dyn StateDbPublisher>,
    ports: HashMap<String, MuxPort>,
}

impl MuxManager {
    pub fn new(
        config: DaemonConfig,
        driver: Arc<dyn DriverClient>,
        publisher: Arc<dyn StateDbPublisher>,
    ) -> Self {
        Self {
            config,
            driver,
            publisher,
            ports: HashMap::new(),
        }
    }

    /// Create every configured port and seed it with what the config file
    /// already knows; the rest of the init signals arrive from the state
    /// store.
    pub fn initialize(&mut self) {
        let entries = self.config.ports.clone();
        for entry in &entries {
            let port_config = self.config.port_config(entry);
            let name = port_config.port_name.clone();
            let tor_mac = port_config.tor_mac;
            let server_mac = port_config.server_mac;
            let server_ipv4 = port_config.server_ipv4;
            let soc_ipv4 = port_config.soc_ipv4;
            let mode = port_config.mode;

            let port = MuxPort::new(port_config, self.driver.clone(), self.publisher.clone());
            if !tor_mac.is_zero() {
                port.set_tor_mac(tor_mac);
            }
            if !server_mac.is_zero() {
                port.set_server_mac(server_mac);
            }
            if !server_ipv4.is_unspecified() {
                port.set_server_ipv4(server_ipv4);
            }
            if let Some(addr) = soc_ipv4 {
                port.set_soc_ipv4(addr);
            }
            port.set_mux_mode(mode);

            info!("created MUX port {}", name);
            self.ports.insert(name, port);
        }
        info!("MUX manager initialized with {} ports", self.ports.len());
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn port(&self, name: &str) -> Option<&MuxPort> {
        self.ports.get(name)
    }

    /// Insert a port created elsewhere (tests use this with fake sockets).
    pub fn add_port(&mut self, port: MuxPort) {
        self.ports.insert(port.port_name().to_string(), port);
    }

    /// Tear down one port; its sockets, timers and buffers go with it.
    pub async fn remove_port(&mut self, name: &str) {
        if let Some(port) = self.ports.remove(name) {
            info!("removing MUX port {}", name);
            port.shutdown().await;
        }
    }

    /// Tear down every port.
    pub async fn shutdown(&mut self) {
        let names: Vec<String> = self.ports.keys().cloned().collect();
        for name in names {
            self.remove_port(&name).await;
        }
    }

    /// The switch's own MAC became known; every port needs it before
    /// activation.
    pub fn update_tor_mac(&self, mac: MacAddress) {
        for port in self.ports.values() {
            port.set_tor_mac(mac);
        }
    }

    // --- per-port dispatch of state-store updates -------------------------

    pub fn handle_server_ipv4_update(&self, port_name: &str, addr: Ipv4Addr) {
        self.dispatch(port_name, |port| port.set_server_ipv4(addr));
    }

    pub fn handle_soc_ipv4_update(&self, port_name: &str, addr: Ipv4Addr) {
        self.dispatch(port_name, |port| port.set_soc_ipv4(addr));
    }

    pub fn handle_server_mac_update(&self, port_name: &str, mac: MacAddress) {
        self.dispatch(port_name, |port| port.set_server_mac(mac));
    }

    pub fn handle_link_state_update(&self, port_name: &str, state: LinkState) {
        self.dispatch(port_name, |port| port.set_link_state(state));
    }

    pub fn handle_peer_link_state_update(&self, port_name: &str, state: LinkState) {
        self.dispatch(port_name, |port| port.set_peer_link_state(state));
    }

    pub fn handle_peer_mux_state_update(&self, port_name: &str, state: MuxState) {
        self.dispatch(port_name, |port| port.set_peer_mux_state(state));
    }

    pub fn handle_mux_mode_update(&self, port_name: &str, mode: MuxMode) {
        self.dispatch(port_name, |port| port.set_mux_mode(mode));
    }

    pub fn handle_default_route_update(&self, state: DefaultRoute) {
        for port in self.ports.values() {
            port.set_default_route(state);
        }
    }

    pub fn handle_reset_pck_loss_count(&self, port_name: &str) {
        self.dispatch(port_name, |port| port.reset_pck_loss_count());
    }

    // --- driver notification dispatch ------------------------------------

    pub fn handle_mux_state_notification(&self, port_name: &str, state: MuxNotification) {
        self.dispatch(port_name, |port| port.on_mux_state_notification(state));
    }

    pub fn handle_probe_mux_state_notification(&self, port_name: &str, state: MuxNotification) {
        self.dispatch(port_name, |port| {
            port.on_probe_mux_state_notification(state)
        });
    }

    pub fn handle_get_mux_state_notification(&self, port_name: &str, state: MuxNotification) {
        self.dispatch(port_name, |port| port.on_get_mux_state_notification(state));
    }

    fn dispatch<F: FnOnce(&MuxPort)>(&self, port_name: &str, f: F) {
        match self.ports.get(port_name) {
            Some(port) => f(port),
            None => warn!("update for unknown port {}", port_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MuxPortConfig;
    use crate::error::LinkMgrResult;
    use crate::link_manager::{SwitchCause, SwitchingPhase};
    use crate::link_prober::ProbeSocket;
    use async_trait::async_trait;
    use mux_types::{LinkManagerHealth, LinkProberState};
    use pretty_assertions::assert_eq;

    struct NullDriver;

    #[async_trait]
    impl DriverClient for NullDriver {
        async fn set_mux_state(&self, _port: &str, _target: MuxState) -> LinkMgrResult<()> {
            Ok(())
        }

        async fn probe_mux_state(&self, _port: &str) -> LinkMgrResult<()> {
            Ok(())
        }
    }

    struct NullPublisher;

    #[async_trait]
    impl StateDbPublisher for NullPublisher {
        async fn publish_mux_state(&self, _port: &str, _state: MuxState) -> LinkMgrResult<()> {
            Ok(())
        }

        async fn publish_peer_mux_state(&self, _port: &str, _state: MuxState) -> LinkMgrResult<()> {
            Ok(())
        }

        async fn publish_health(
            &self,
            _port: &str,
            _health: LinkManagerHealth,
        ) -> LinkMgrResult<()> {
            Ok(())
        }

        async fn publish_switching_metric(
            &self,
            _port: &str,
            _phase: SwitchingPhase,
            _cause: SwitchCause,
        ) -> LinkMgrResult<()> {
            Ok(())
        }

        async fn publish_link_prober_metric(
            &self,
            _port: &str,
            _label: LinkProberState,
            _session_id: &str,
        ) -> LinkMgrResult<()> {
            Ok(())
        }

        async fn publish_pck_loss_ratio(
            &self,
            _port: &str,
            _unknown: u64,
            _total: u64,
        ) -> LinkMgrResult<()> {
            Ok(())
        }
    }

    struct NullSocket;

    impl ProbeSocket for NullSocket {
        fn open(&mut self, _config: &MuxPortConfig) -> LinkMgrResult<()> {
            Ok(())
        }

        fn send(&mut self, frame: &[u8]) -> LinkMgrResult<usize> {
            Ok(frame.len())
        }
    }

    fn manager_with_config(json: &str) -> MuxManager {
        let config = DaemonConfig::from_json(json).unwrap();
        MuxManager::new(config, Arc::new(NullDriver), Arc::new(NullPublisher))
    }

    #[tokio::test]
    async fn test_manager_creates_configured_ports() {
        let mut manager = manager_with_config(
            r#"{
                "torMac": "04:3f:72:00:00:01",
                "loopbackIpv4": "10.212.64.1",
                "ports": [
                    {"name": "Ethernet0", "server_id": 0, "server_ipv4": "192.168.0.2"},
                    {"name": "Ethernet4", "server_id": 4, "server_ipv4": "192.168.0.3"}
                ]
            }"#,
        );
        manager.initialize();
        assert_eq!(manager.port_count(), 2);
        assert!(manager.port("Ethernet0").is_some());
        assert!(manager.port("Ethernet4").is_some());
        assert!(manager.port("Ethernet8").is_none());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_port_tears_down() {
        let mut manager = manager_with_config(
            r#"{"ports": [{"name": "Ethernet0", "server_id": 0}]}"#,
        );
        manager.initialize();
        assert_eq!(manager.port_count(), 1);

        manager.remove_port("Ethernet0").await;
        assert_eq!(manager.port_count(), 0);
        // Removing twice is harmless.
        manager.remove_port("Ethernet0").await;
    }

    #[tokio::test]
    async fn test_dispatch_to_unknown_port_is_ignored() {
        let manager = manager_with_config(r#"{"ports": []}"#);
        manager.handle_link_state_update("Ethernet99", LinkState::Up);
        manager.handle_mux_mode_update("Ethernet99", MuxMode::Auto);
    }

    #[tokio::test]
    async fn test_add_port_with_fake_socket() {
        let mut manager = manager_with_config(r#"{"ports": []}"#);
        let config = MuxPortConfig::new("Ethernet8", 8);
        let port = MuxPort::with_socket(
            config,
            Arc::new(NullDriver),
            Arc::new(NullPublisher),
            Box::new(NullSocket),
        );
        manager.add_port(port);
        assert_eq!(manager.port_count(), 1);
        manager.shutdown().await;
    }
}
