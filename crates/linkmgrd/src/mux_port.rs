//! Per-port façade.
//!
//! [`MuxPort`] binds one port's prober, child state machines and composite
//! to the external collaborators (driver client, state-store publisher).
//! Every input — state-store updates, driver notifications, received
//! frames, timer expiries — becomes a [`PortEvent`] consumed by the
//! port's single event-loop task, so all per-port state is serialized.
//!
//! The composite may not drive side effects until three initialization
//! signals have arrived: the probe target IPv4 (server, or SoC for
//! active/active), the server MAC and the ToR MAC.

use std::net::Ipv4Addr;
use std::sync::Arc;

use mux_types::{
    DefaultRoute, LinkProberState, LinkState, MacAddress, MuxMode, MuxState, PortCableType,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MuxPortConfig;
use crate::driver::DriverClient;
use crate::link_manager::{
    Action, ActiveActiveStateMachine, ActiveStandbyStateMachine,
};
use crate::link_prober::{
    LinkProber, LinkProberStateMachine, PeerSessionEvent, PeerSessionStateMachine,
    PeerStateMachine, ProbeSocket, ProberEvent, ProberReport, RawProbeSocket, SelfSessionEvent,
    SelfSessionStateMachine,
};
use crate::link_state::LinkStateMachine;
use crate::mux_state::{MuxNotification, MuxStateMachine};
use crate::port_event::{port_channel, PortEvent, PortSender, TimerKind, TimerService};
use crate::state_db::StateDbPublisher;

const INIT_ADDRESS: u8 = 0b001;
const INIT_SERVER_MAC: u8 = 0b010;
const INIT_TOR_MAC: u8 = 0b100;
const INIT_COMPLETE: u8 = 0b111;

/// Handle to one port's event loop.
pub struct MuxPort {
    port_name: String,
    sender: PortSender,
    task: JoinHandle<()>,
}

impl MuxPort {
    /// Create a port over the production raw socket.
    pub fn new(
        config: MuxPortConfig,
        driver: Arc<dyn DriverClient>,
        publisher: Arc<dyn StateDbPublisher>,
    ) -> Self {
        let (sender, receiver) = port_channel();
        let socket = Box::new(RawProbeSocket::new(sender.clone()));
        Self::spawn(config, driver, publisher, socket, sender, receiver)
    }

    /// Create a port with an injected transport (tests).
    pub fn with_socket(
        config: MuxPortConfig,
        driver: Arc<dyn DriverClient>,
        publisher: Arc<dyn StateDbPublisher>,
        socket: Box<dyn ProbeSocket>,
    ) -> Self {
        let (sender, receiver) = port_channel();
        Self::spawn(config, driver, publisher, socket, sender, receiver)
    }

    fn spawn(
        config: MuxPortConfig,
        driver: Arc<dyn DriverClient>,
        publisher: Arc<dyn StateDbPublisher>,
        socket: Box<dyn ProbeSocket>,
        sender: PortSender,
        receiver: tokio::sync::mpsc::UnboundedReceiver<PortEvent>,
    ) -> Self {
        let port_name = config.port_name.clone();
        let runtime = PortRuntime::new(config, driver, publisher, socket, sender.clone());
        let task = tokio::spawn(runtime.run(receiver));
        Self {
            port_name,
            sender,
            task,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// The raw event channel, for wiring and tests.
    pub fn sender(&self) -> PortSender {
        self.sender.clone()
    }

    fn post(&self, event: PortEvent) {
        if self.sender.send(event).is_err() {
            warn!("{}: port event loop is gone", self.port_name);
        }
    }

    // --- state-store inputs ----------------------------------------------

    pub fn set_server_ipv4(&self, addr: Ipv4Addr) {
        self.post(PortEvent::ServerIpv4(addr));
    }

    pub fn set_soc_ipv4(&self, addr: Ipv4Addr) {
        self.post(PortEvent::SoCIpv4(addr));
    }

    pub fn set_server_mac(&self, mac: MacAddress) {
        self.post(PortEvent::ServerMac(mac));
    }

    pub fn set_tor_mac(&self, mac: MacAddress) {
        self.post(PortEvent::TorMac(mac));
    }

    pub fn set_link_state(&self, state: LinkState) {
        self.post(PortEvent::LinkState(state));
    }

    pub fn set_peer_link_state(&self, state: LinkState) {
        self.post(PortEvent::PeerLinkState(state));
    }

    pub fn set_peer_mux_state(&self, state: MuxState) {
        self.post(PortEvent::PeerMuxState(state));
    }

    pub fn set_mux_mode(&self, mode: MuxMode) {
        self.post(PortEvent::MuxMode(mode));
    }

    pub fn set_default_route(&self, route: DefaultRoute) {
        self.post(PortEvent::DefaultRoute(route));
    }

    pub fn reset_pck_loss_count(&self) {
        self.post(PortEvent::ResetPckLossCount);
    }

    // --- driver notifications --------------------------------------------

    pub fn on_mux_state_notification(&self, state: MuxNotification) {
        self.post(PortEvent::MuxStateNotification(state));
    }

    pub fn on_probe_mux_state_notification(&self, state: MuxNotification) {
        self.post(PortEvent::ProbeMuxStateNotification(state));
    }

    pub fn on_get_mux_state_notification(&self, state: MuxNotification) {
        self.post(PortEvent::GetMuxStateNotification(state));
    }

    /// Stop the port's event loop and release its resources.
    pub async fn shutdown(self) {
        let _ = self.sender.send(PortEvent::Shutdown);
        let _ = self.task.await;
    }
}

/// The cable-type specific machinery of a port.
enum Machines {
    ActiveStandby {
        prober_sm: LinkProberStateMachine,
        composite: ActiveStandbyStateMachine,
    },
    ActiveActive {
        self_sm: SelfSessionStateMachine,
        peer_session_sm: PeerSessionStateMachine,
        peer_sm: PeerStateMachine,
        composite: ActiveActiveStateMachine,
    },
}

/// Everything a port owns; lives inside the port task.
struct PortRuntime {
    config: MuxPortConfig,
    driver: Arc<dyn DriverClient>,
    publisher: Arc<dyn StateDbPublisher>,
    timers: TimerService,
    prober: LinkProber,
    machines: Machines,
    mux_sm: MuxStateMachine,
    link_sm: LinkStateMachine,
    init_mask: u8,
}

impl PortRuntime {
    fn new(
        config: MuxPortConfig,
        driver: Arc<dyn DriverClient>,
        publisher: Arc<dyn StateDbPublisher>,
        socket: Box<dyn ProbeSocket>,
        sender: PortSender,
    ) -> Self {
        let machines = match config.port_cable_type {
            PortCableType::ActiveStandby => Machines::ActiveStandby {
                prober_sm: LinkProberStateMachine::new(
                    &config.port_name,
                    LinkProberState::Wait,
                    config.positive_state_change_retry_count,
                    config.negative_state_change_retry_count,
                ),
                composite: ActiveStandbyStateMachine::new(config.clone()),
            },
            PortCableType::ActiveActive => Machines::ActiveActive {
                self_sm: SelfSessionStateMachine::new(
                    &config.port_name,
                    config.positive_state_change_retry_count,
                    config.negative_state_change_retry_count,
                ),
                peer_session_sm: PeerSessionStateMachine::new(
                    &config.port_name,
                    config.positive_state_change_retry_count,
                    config.negative_state_change_retry_count,
                ),
                peer_sm: PeerStateMachine::new(
                    &config.port_name,
                    config.positive_state_change_retry_count,
                    config.negative_state_change_retry_count,
                ),
                composite: ActiveActiveStateMachine::new(config.clone()),
            },
        };
        let mux_sm = MuxStateMachine::new(
            &config.port_name,
            MuxState::Wait,
            config.mux_state_change_retry_count,
        );
        let link_sm = LinkStateMachine::new(
            &config.port_name,
            LinkState::Down,
            config.link_state_change_retry_count,
        );
        Self {
            prober: LinkProber::new(socket),
            timers: TimerService::new(sender),
            config,
            driver,
            publisher,
            machines,
            mux_sm,
            link_sm,
            init_mask: 0,
        }
    }

    async fn run(mut self, mut receiver: tokio::sync::mpsc::UnboundedReceiver<PortEvent>) {
        info!("{}: port event loop started", self.config.port_name);
        while let Some(event) = receiver.recv().await {
            if matches!(event, PortEvent::Shutdown) {
                break;
            }
            self.handle_event(event).await;
        }
        info!("{}: port event loop stopped", self.config.port_name);
    }

    async fn handle_event(&mut self, event: PortEvent) {
        match event {
            PortEvent::ServerIpv4(addr) => {
                self.config.server_ipv4 = addr;
                if self.config.port_cable_type == PortCableType::ActiveStandby {
                    self.init_mask |= INIT_ADDRESS;
                }
                self.refresh_frame();
                self.maybe_activate().await;
            }
            PortEvent::SoCIpv4(addr) => {
                self.config.soc_ipv4 = Some(addr);
                if self.config.port_cable_type == PortCableType::ActiveActive {
                    self.init_mask |= INIT_ADDRESS;
                }
                self.refresh_frame();
                self.maybe_activate().await;
            }
            PortEvent::ServerMac(mac) => {
                self.config.server_mac = mac;
                self.init_mask |= INIT_SERVER_MAC;
                self.refresh_frame();
                self.maybe_activate().await;
            }
            PortEvent::TorMac(mac) => {
                self.config.tor_mac = mac;
                if self.config.vlan_mac.is_zero() {
                    self.config.vlan_mac = mac;
                }
                self.init_mask |= INIT_TOR_MAC;
                self.refresh_frame();
                self.maybe_activate().await;
            }
            PortEvent::LinkState(state) => {
                if let Some(label) = self.link_sm.handle_notification(state) {
                    let actions = match &mut self.machines {
                        Machines::ActiveStandby { composite, .. } => {
                            composite.handle_link_state_change(label)
                        }
                        Machines::ActiveActive { composite, .. } => {
                            composite.handle_link_state_change(label)
                        }
                    };
                    self.perform_all(actions).await;
                }
            }
            PortEvent::PeerLinkState(state) => {
                let actions = match &mut self.machines {
                    Machines::ActiveStandby { composite, .. } => {
                        composite.handle_peer_link_state(state)
                    }
                    Machines::ActiveActive { .. } => Vec::new(),
                };
                self.perform_all(actions).await;
            }
            PortEvent::PeerMuxState(state) => {
                let actions = match &mut self.machines {
                    Machines::ActiveActive { composite, .. } => {
                        composite.handle_peer_mux_state(state)
                    }
                    Machines::ActiveStandby { .. } => Vec::new(),
                };
                self.perform_all(actions).await;
            }
            PortEvent::MuxMode(mode) => {
                let actions = match &mut self.machines {
                    Machines::ActiveStandby { composite, .. } => composite.handle_mux_config(mode),
                    Machines::ActiveActive { composite, .. } => composite.handle_mux_config(mode),
                };
                self.perform_all(actions).await;
            }
            PortEvent::DefaultRoute(route) => {
                let actions = match &mut self.machines {
                    Machines::ActiveStandby { composite, .. } => {
                        composite.handle_default_route_change(route)
                    }
                    Machines::ActiveActive { composite, .. } => {
                        composite.handle_default_route_change(route)
                    }
                };
                self.perform_all(actions).await;
            }
            PortEvent::ResetPckLossCount => {
                let reports = self.prober.reset_icmp_packet_counts();
                self.handle_reports(reports).await;
            }
            PortEvent::MuxStateNotification(notification) => {
                let step = self.mux_sm.handle_notification(notification);
                if step.probe_hint {
                    self.perform(Action::ProbeMux).await;
                }
                if let Some(label) = step.new_label {
                    let actions = match &mut self.machines {
                        Machines::ActiveStandby { composite, .. } => {
                            composite.handle_mux_state_change(label)
                        }
                        Machines::ActiveActive { composite, .. } => {
                            composite.handle_mux_state_change(label)
                        }
                    };
                    self.perform_all(actions).await;
                }
            }
            PortEvent::ProbeMuxStateNotification(notification)
            | PortEvent::GetMuxStateNotification(notification) => {
                // Probe replies bypass the debounce: the composite asked
                // the question and wants the answer as-is.
                if matches!(notification, MuxNotification::Failure) {
                    self.perform(Action::ProbeMux).await;
                }
                let label = match notification {
                    MuxNotification::Active => MuxState::Active,
                    MuxNotification::Standby => MuxState::Standby,
                    MuxNotification::Error => MuxState::Error,
                    MuxNotification::Unknown | MuxNotification::Failure => MuxState::Unknown,
                };
                self.mux_sm.enter(label);
                let actions = match &mut self.machines {
                    Machines::ActiveStandby { composite, .. } => {
                        composite.handle_probe_mux_notification(label)
                    }
                    Machines::ActiveActive { composite, .. } => {
                        composite.handle_probe_mux_notification(label)
                    }
                };
                self.perform_all(actions).await;
            }
            PortEvent::RxFrame(frame) => {
                let reports = self.prober.handle_rx_frame(&self.config, &frame);
                self.handle_reports(reports).await;
            }
            PortEvent::Timer { kind, generation } => {
                if !self.timers.is_current(kind, generation) {
                    debug!("{}: stale {:?} completion", self.config.port_name, kind);
                    return;
                }
                self.handle_timer(kind).await;
            }
            PortEvent::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    async fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::ProbeInterval => {
                let reports = self.prober.on_interval(&self.config, &mut self.timers);
                self.handle_reports(reports).await;
            }
            TimerKind::Suspend => {
                let reports = self.prober.on_suspend_expiry();
                self.handle_reports(reports).await;
            }
            TimerKind::Switchover => {
                self.prober.revert_probe_interval(&mut self.timers);
            }
            TimerKind::MuxWait => {
                let actions = match &mut self.machines {
                    Machines::ActiveStandby { composite, .. } => composite.handle_mux_wait_timeout(),
                    Machines::ActiveActive { composite, .. } => composite.handle_mux_wait_timeout(),
                };
                self.perform_all(actions).await;
            }
            TimerKind::MuxProbe => {
                let actions = match &mut self.machines {
                    Machines::ActiveStandby { composite, .. } => {
                        composite.handle_mux_probe_timeout()
                    }
                    Machines::ActiveActive { composite, .. } => composite.handle_mux_probe_timeout(),
                };
                self.perform_all(actions).await;
            }
            TimerKind::PeerMuxWait => {
                let actions = match &mut self.machines {
                    Machines::ActiveActive { composite, .. } => {
                        composite.handle_peer_mux_wait_timeout()
                    }
                    Machines::ActiveStandby { .. } => Vec::new(),
                };
                self.perform_all(actions).await;
            }
            TimerKind::Oscillation => {
                let actions = match &mut self.machines {
                    Machines::ActiveActive { composite, .. } => {
                        composite.handle_oscillation_timeout()
                    }
                    Machines::ActiveStandby { .. } => Vec::new(),
                };
                self.perform_all(actions).await;
            }
        }
    }

    /// Map prober observations onto the child machines and the composite.
    async fn handle_reports(&mut self, reports: Vec<ProberReport>) {
        for report in reports {
            let mut actions = Vec::new();
            let mut metrics: Vec<(LinkProberState, &str)> = Vec::new();
            match &mut self.machines {
                Machines::ActiveStandby {
                    prober_sm,
                    composite,
                } => match report {
                    ProberReport::HeartbeatSelf => {
                        if let Some(label) = prober_sm.handle_event(ProberEvent::IcmpSelf) {
                            metrics.push((label, ""));
                            actions = composite.handle_link_prober_state_change(label);
                        }
                    }
                    ProberReport::HeartbeatPeer => {
                        if let Some(label) = prober_sm.handle_event(ProberEvent::IcmpPeer) {
                            metrics.push((label, ""));
                            actions = composite.handle_link_prober_state_change(label);
                        }
                    }
                    ProberReport::HeartbeatUnknown => {
                        if let Some(label) = prober_sm.handle_event(ProberEvent::IcmpUnknown) {
                            metrics.push((label, ""));
                            actions = composite.handle_link_prober_state_change(label);
                        }
                    }
                    ProberReport::SwitchActiveRequest => {
                        actions = composite.handle_switch_active_request();
                    }
                    ProberReport::MuxProbeRequest => {
                        actions = composite.handle_mux_probe_request();
                    }
                    ProberReport::SwitchCommandComplete => {
                        actions = composite.handle_switch_active_command_completion();
                    }
                    ProberReport::SuspendExpired => {
                        actions = composite.handle_suspend_timer_expiry();
                    }
                    ProberReport::PckLossRatio { unknown, total } => {
                        actions = composite.handle_pck_loss_ratio(unknown, total);
                    }
                },
                Machines::ActiveActive {
                    self_sm,
                    peer_session_sm,
                    peer_sm,
                    composite,
                } => match report {
                    ProberReport::HeartbeatSelf => {
                        if let Some(label) = self_sm.handle_event(SelfSessionEvent::IcmpSelf) {
                            metrics.push((label, "self"));
                            actions = composite.handle_self_session_state_change(label);
                        }
                    }
                    ProberReport::HeartbeatPeer => {
                        if let Some(label) =
                            peer_session_sm.handle_event(PeerSessionEvent::IcmpPeerActive)
                        {
                            metrics.push((label, "peer"));
                        }
                        if let Some(label) =
                            peer_sm.handle_event(PeerSessionEvent::IcmpPeerActive)
                        {
                            actions = composite.handle_peer_prober_state_change(label);
                        }
                    }
                    ProberReport::HeartbeatUnknown => {
                        if let Some(label) = self_sm.handle_event(SelfSessionEvent::IcmpUnknown) {
                            metrics.push((label, "self"));
                            actions = composite.handle_self_session_state_change(label);
                        }
                        if let Some(label) =
                            peer_session_sm.handle_event(PeerSessionEvent::IcmpPeerUnknown)
                        {
                            metrics.push((label, "peer"));
                        }
                        if let Some(label) =
                            peer_sm.handle_event(PeerSessionEvent::IcmpPeerUnknown)
                        {
                            let mut more = composite.handle_peer_prober_state_change(label);
                            actions.append(&mut more);
                        }
                    }
                    ProberReport::MuxProbeRequest => {
                        actions = composite.handle_mux_probe_request();
                    }
                    ProberReport::SwitchActiveRequest | ProberReport::SwitchCommandComplete => {
                        debug!(
                            "{}: ignoring switchover command on active/active port",
                            self.config.port_name
                        );
                    }
                    ProberReport::SuspendExpired => {}
                    ProberReport::PckLossRatio { unknown, total } => {
                        actions = composite.handle_pck_loss_ratio(unknown, total);
                    }
                },
            }
            for (label, session) in metrics {
                let session_id = if session.is_empty() {
                    self.config.port_name.clone()
                } else {
                    session.to_string()
                };
                if let Err(e) = self
                    .publisher
                    .publish_link_prober_metric(&self.config.port_name, label, &session_id)
                    .await
                {
                    warn!("{}: prober metric publish failed: {}", self.config.port_name, e);
                }
            }
            self.perform_all(actions).await;
        }
    }

    fn refresh_frame(&mut self) {
        if self.init_mask & (INIT_SERVER_MAC | INIT_TOR_MAC) != 0 {
            if let Err(e) = self.prober.update_ethernet_frame(&self.config) {
                warn!("{}: frame rebuild failed: {}", self.config.port_name, e);
            }
        }
    }

    async fn maybe_activate(&mut self) {
        if self.init_mask != INIT_COMPLETE {
            return;
        }
        let actions = match &mut self.machines {
            Machines::ActiveStandby { composite, .. } => {
                if composite.is_activated() {
                    return;
                }
                composite.activate()
            }
            Machines::ActiveActive { composite, .. } => {
                if composite.is_activated() {
                    return;
                }
                composite.activate()
            }
        };
        self.perform_all(actions).await;
    }

    async fn perform_all(&mut self, actions: Vec<Action>) {
        for action in actions {
            self.perform(action).await;
        }
    }

    /// Interpret one composite action against the real collaborators.
    async fn perform(&mut self, action: Action) {
        let port = self.config.port_name.clone();
        match action {
            Action::InitializeProber => {
                if let Err(e) = self.prober.initialize(&self.config) {
                    // Unrecoverable: the port stays inactive rather than
                    // oscillating on a dead socket.
                    error!("{}: prober initialization failed: {}", port, e);
                }
            }
            Action::StartProbing => {
                self.prober.start_probing(&self.config, &mut self.timers);
            }
            Action::UpdateEthernetFrame => {
                if let Err(e) = self.prober.update_ethernet_frame(&self.config) {
                    warn!("{}: frame rebuild failed: {}", port, e);
                }
            }
            Action::ProbePeerTor => {
                self.prober.probe_peer_tor(&self.config);
            }
            Action::SuspendTx(duration) => {
                self.prober.suspend_tx_probes(duration, &mut self.timers);
            }
            Action::ResumeTx => {
                self.prober.resume_tx_probes(&mut self.timers);
            }
            Action::ShutdownTx => {
                self.prober.shutdown_tx_probes();
            }
            Action::RestartTx => {
                self.prober.restart_tx_probes();
            }
            Action::SendPeerSwitchCommand => {
                self.prober.send_peer_switch_command(&self.config);
            }
            Action::SendPeerProbeCommand => {
                self.prober.send_peer_probe_command(&self.config);
            }
            Action::DecreaseProbeInterval(window) => {
                self.prober
                    .decrease_probe_interval_after_switch(window, &self.config, &mut self.timers);
            }
            Action::RevertProbeInterval => {
                self.prober.revert_probe_interval(&mut self.timers);
            }
            Action::ResetIcmpPacketCounts => {
                let reports = self.prober.reset_icmp_packet_counts();
                for report in reports {
                    if let ProberReport::PckLossRatio { unknown, total } = report {
                        if let Err(e) = self
                            .publisher
                            .publish_pck_loss_ratio(&port, unknown, total)
                            .await
                        {
                            warn!("{}: loss ratio publish failed: {}", port, e);
                        }
                    }
                }
            }
            Action::EnterProberState(label) => match &mut self.machines {
                Machines::ActiveStandby { prober_sm, .. } => prober_sm.enter(label),
                Machines::ActiveActive { self_sm, .. } => self_sm.enter(label),
            },
            Action::SetMuxState(target) => {
                self.mux_sm.enter(MuxState::Wait);
                if let Err(e) = self.driver.set_mux_state(&port, target).await {
                    warn!("{}: driver toggle failed: {}", port, e);
                    self.post_self(PortEvent::MuxStateNotification(MuxNotification::Failure));
                }
            }
            Action::ProbeMux => {
                if let Err(e) = self.driver.probe_mux_state(&port).await {
                    warn!("{}: driver probe failed: {}", port, e);
                    self.post_self(PortEvent::MuxStateNotification(MuxNotification::Failure));
                }
            }
            Action::StartTimer { kind, factor } => {
                let duration = self.timer_duration(kind) * factor.max(1);
                self.timers.arm(kind, duration);
            }
            Action::CancelTimer(kind) => {
                self.timers.cancel(kind);
            }
            Action::PublishMuxState(state) => {
                if let Err(e) = self.publisher.publish_mux_state(&port, state).await {
                    warn!("{}: mux state publish failed: {}", port, e);
                }
            }
            Action::PublishPeerMuxState(state) => {
                if let Err(e) = self.publisher.publish_peer_mux_state(&port, state).await {
                    warn!("{}: peer mux state publish failed: {}", port, e);
                }
            }
            Action::PublishHealth(health) => {
                if let Err(e) = self.publisher.publish_health(&port, health).await {
                    warn!("{}: health publish failed: {}", port, e);
                }
            }
            Action::PublishSwitchingMetric { phase, cause } => {
                if let Err(e) = self
                    .publisher
                    .publish_switching_metric(&port, phase, cause)
                    .await
                {
                    warn!("{}: switching metric publish failed: {}", port, e);
                }
            }
            Action::PublishProberMetric { label, session_id } => {
                if let Err(e) = self
                    .publisher
                    .publish_link_prober_metric(&port, label, &session_id)
                    .await
                {
                    warn!("{}: prober metric publish failed: {}", port, e);
                }
            }
            Action::PublishPckLossRatio { unknown, total } => {
                if let Err(e) = self
                    .publisher
                    .publish_pck_loss_ratio(&port, unknown, total)
                    .await
                {
                    warn!("{}: loss ratio publish failed: {}", port, e);
                }
            }
        }
    }

    /// Base duration per timer kind; factors scale it geometrically.
    fn timer_duration(&self, kind: TimerKind) -> std::time::Duration {
        match kind {
            TimerKind::MuxWait | TimerKind::PeerMuxWait => self.config.mux_wait_timeout(),
            TimerKind::MuxProbe => self.config.timeout_ipv4,
            TimerKind::Oscillation => self.config.oscillation_interval,
            TimerKind::ProbeInterval => self.config.timeout_ipv4,
            TimerKind::Suspend => self.config.suspend_timeout,
            TimerKind::Switchover => self.config.suspend_timeout,
        }
    }

    fn post_self(&self, event: PortEvent) {
        // Failures become events on our own queue, like any other input.
        let _ = self.timers.sender().send(event);
    }
}
