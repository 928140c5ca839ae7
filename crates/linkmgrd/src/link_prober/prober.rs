//! The per-port link prober.
//!
//! Owns the heartbeat TX frame and the probe socket, runs the probing
//! cadence off the port's interval timer, classifies received echoes and
//! reports them to the port runtime. Peer commands ride the TLV tail for
//! a fixed number of heartbeats and are then removed again.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::MuxPortConfig;
use crate::error::LinkMgrResult;
use crate::link_prober::frame::{parse_heartbeat, HeartbeatFrame};
use crate::link_prober::payload::{instance_guid, TlvCommand, TLV_COMMAND};
use crate::link_prober::socket::ProbeSocket;
use crate::port_event::{TimerKind, TimerService};

/// Publish the loss ratio every this many intervals.
const PCK_LOSS_PUBLISH_CADENCE: u64 = 100;

/// What the prober observed; the port runtime maps these onto the child
/// state machines and the composite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProberReport {
    /// Our own heartbeat came back.
    HeartbeatSelf,
    /// A peer heartbeat was seen.
    HeartbeatPeer,
    /// An interval elapsed without any reply.
    HeartbeatUnknown,
    /// The peer requested that we yield the active side.
    SwitchActiveRequest,
    /// The peer requested a driver probe.
    MuxProbeRequest,
    /// The outgoing switch-active command heartbeats completed.
    SwitchCommandComplete,
    /// The TX suspension elapsed; transmission resumed.
    SuspendExpired,
    /// Periodic loss accounting.
    PckLossRatio { unknown: u64, total: u64 },
}

pub struct LinkProber {
    frame: HeartbeatFrame,
    socket: Box<dyn ProbeSocket>,
    initialized: bool,
    probing: bool,
    suspend_tx: bool,
    shutdown_tx: bool,
    decreased_interval: bool,

    /// Any heartbeat (self or peer) seen since the last interval tick.
    reply_seen: bool,

    rx_self_seq: u16,
    rx_peer_seq: u16,

    icmp_unknown_event_count: u64,
    icmp_packet_count: u64,

    /// Command heartbeats still to send, and a completion report owed.
    command_heartbeats_left: u32,
    command_completion_due: bool,
}

impl LinkProber {
    pub fn new(socket: Box<dyn ProbeSocket>) -> Self {
        Self {
            frame: HeartbeatFrame::new(),
            socket,
            initialized: false,
            probing: false,
            suspend_tx: false,
            shutdown_tx: false,
            decreased_interval: false,
            reply_seen: false,
            rx_self_seq: 0,
            rx_peer_seq: 0,
            icmp_unknown_event_count: 0,
            icmp_packet_count: 0,
            command_heartbeats_left: 0,
            command_completion_due: false,
        }
    }

    pub fn is_probing(&self) -> bool {
        self.probing
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_tx
    }

    /// Open the socket, install the receive filter and build the frame.
    pub fn initialize(&mut self, config: &MuxPortConfig) -> LinkMgrResult<()> {
        self.socket.open(config)?;
        self.frame.rebuild(config)?;
        self.initialized = true;
        info!("{}: link prober initialized", config.port_name);
        Ok(())
    }

    /// Arm the probing cadence.
    pub fn start_probing(&mut self, config: &MuxPortConfig, timers: &mut TimerService) {
        self.probing = true;
        self.reply_seen = false;
        timers.arm(TimerKind::ProbeInterval, self.probing_interval(config));
        info!("{}: probing started", config.port_name);
    }

    fn probing_interval(&self, config: &MuxPortConfig) -> Duration {
        if self.decreased_interval {
            config.decreased_interval
        } else {
            config.timeout_ipv4
        }
    }

    /// One probing interval elapsed: account the silence, send the next
    /// heartbeat, re-arm.
    pub fn on_interval(
        &mut self,
        config: &MuxPortConfig,
        timers: &mut TimerService,
    ) -> Vec<ProberReport> {
        let mut reports = Vec::new();
        if !self.probing {
            return reports;
        }

        if !self.reply_seen {
            self.icmp_unknown_event_count += 1;
            reports.push(ProberReport::HeartbeatUnknown);
        }
        self.reply_seen = false;

        self.send_heartbeat(config, &mut reports);

        self.icmp_packet_count += 1;
        if self.icmp_packet_count % PCK_LOSS_PUBLISH_CADENCE == 0 {
            reports.push(ProberReport::PckLossRatio {
                unknown: self.icmp_unknown_event_count,
                total: self.icmp_packet_count,
            });
        }

        timers.arm(TimerKind::ProbeInterval, self.probing_interval(config));
        reports
    }

    /// The sequence advances every interval whether or not the heartbeat
    /// actually leaves the box.
    fn send_heartbeat(&mut self, config: &MuxPortConfig, reports: &mut Vec<ProberReport>) {
        self.frame.advance();
        if self.suspend_tx || self.shutdown_tx {
            return;
        }
        if let Err(e) = self.socket.send(self.frame.frame()) {
            // Keep state; the next interval retries.
            warn!("{}: heartbeat send failed: {}", config.port_name, e);
            return;
        }
        if self.command_heartbeats_left > 0 {
            self.command_heartbeats_left -= 1;
            if self.command_heartbeats_left == 0 {
                if let Err(e) = self.frame.set_sentinel_tail() {
                    warn!("{}: failed to restore TLV tail: {}", config.port_name, e);
                }
                if self.command_completion_due {
                    self.command_completion_due = false;
                    reports.push(ProberReport::SwitchCommandComplete);
                }
            }
        }
    }

    /// Classify one received frame.
    pub fn handle_rx_frame(&mut self, config: &MuxPortConfig, frame: &[u8]) -> Vec<ProberReport> {
        let mut reports = Vec::new();
        let parsed = match parse_heartbeat(frame) {
            Ok(parsed) => parsed,
            Err(e) => {
                // Malformed traffic is dropped without touching counters.
                debug!("{}: dropping frame: {}", config.port_name, e);
                return reports;
            }
        };
        if parsed.icmp_id != config.server_id {
            return reports;
        }

        let is_self = parsed.payload.guid == instance_guid();
        self.reply_seen = true;
        if is_self {
            self.rx_self_seq = parsed.icmp_seq;
            reports.push(ProberReport::HeartbeatSelf);
        } else {
            self.rx_peer_seq = parsed.icmp_seq;
            reports.push(ProberReport::HeartbeatPeer);

            // Commands are honored only from the peer; our own echoes
            // carry whatever we sent.
            for tlv in parsed.tlv_iter() {
                let tlv = match tlv {
                    Ok(tlv) => tlv,
                    Err(e) => {
                        debug!("{}: bad TLV, dropping rest: {}", config.port_name, e);
                        break;
                    }
                };
                if tlv.tlv_type != TLV_COMMAND || tlv.value.is_empty() {
                    continue;
                }
                match TlvCommand::from_u8(tlv.value[0]) {
                    Some(TlvCommand::SwitchActive) => {
                        reports.push(ProberReport::SwitchActiveRequest);
                    }
                    Some(TlvCommand::MuxProbe) => {
                        reports.push(ProberReport::MuxProbeRequest);
                    }
                    Some(TlvCommand::None) | None => {}
                }
            }
        }
        reports
    }

    // --- TX control -------------------------------------------------------

    /// Pause transmission for `duration`; reception and the sequence keep
    /// running.
    pub fn suspend_tx_probes(&mut self, duration: Duration, timers: &mut TimerService) {
        self.suspend_tx = true;
        timers.arm(TimerKind::Suspend, duration);
        debug!("probe TX suspended for {:?}", duration);
    }

    /// Resume transmission, disarming the suspend timer.
    pub fn resume_tx_probes(&mut self, timers: &mut TimerService) {
        self.suspend_tx = false;
        timers.cancel(TimerKind::Suspend);
    }

    /// The suspend window elapsed on its own.
    pub fn on_suspend_expiry(&mut self) -> Vec<ProberReport> {
        self.suspend_tx = false;
        vec![ProberReport::SuspendExpired]
    }

    /// Stop transmission indefinitely (default route lost, detach).
    pub fn shutdown_tx_probes(&mut self) {
        self.shutdown_tx = true;
    }

    /// Undo [`Self::shutdown_tx_probes`].
    pub fn restart_tx_probes(&mut self) {
        self.shutdown_tx = false;
    }

    /// Recompute the static frame headers after a MAC or IP change.
    pub fn update_ethernet_frame(&mut self, config: &MuxPortConfig) -> LinkMgrResult<()> {
        self.frame.rebuild(config)
    }

    /// Send one out-of-cadence heartbeat towards the peer ToR.
    pub fn probe_peer_tor(&mut self, config: &MuxPortConfig) {
        if !self.initialized || self.shutdown_tx {
            return;
        }
        self.frame.advance();
        if let Err(e) = self.socket.send(self.frame.frame()) {
            warn!("{}: peer probe send failed: {}", config.port_name, e);
        }
    }

    /// Carry a switch-active command in the next heartbeats; a completion
    /// report follows the last one.
    pub fn send_peer_switch_command(&mut self, config: &MuxPortConfig) {
        if let Err(e) = self.frame.set_command_tail(TlvCommand::SwitchActive) {
            warn!("{}: failed to build switch command: {}", config.port_name, e);
            return;
        }
        self.command_heartbeats_left = config.positive_state_change_retry_count + 1;
        self.command_completion_due = true;
        info!("{}: sending switch-active command to peer", config.port_name);
    }

    /// Carry a mux-probe command in the next heartbeats.
    pub fn send_peer_probe_command(&mut self, config: &MuxPortConfig) {
        if let Err(e) = self.frame.set_command_tail(TlvCommand::MuxProbe) {
            warn!("{}: failed to build probe command: {}", config.port_name, e);
            return;
        }
        self.command_heartbeats_left = config.positive_state_change_retry_count + 1;
        self.command_completion_due = false;
        info!("{}: sending mux-probe command to peer", config.port_name);
    }

    /// Switchover-measurement window: probe faster until `window` elapses.
    pub fn decrease_probe_interval_after_switch(
        &mut self,
        window: Duration,
        config: &MuxPortConfig,
        timers: &mut TimerService,
    ) {
        self.decreased_interval = true;
        timers.arm(TimerKind::Switchover, window);
        timers.arm(TimerKind::ProbeInterval, self.probing_interval(config));
    }

    /// End the measurement window.
    pub fn revert_probe_interval(&mut self, timers: &mut TimerService) {
        self.decreased_interval = false;
        timers.cancel(TimerKind::Switchover);
    }

    /// Zero the loss counters and publish the reset immediately.
    pub fn reset_icmp_packet_counts(&mut self) -> Vec<ProberReport> {
        self.icmp_unknown_event_count = 0;
        self.icmp_packet_count = 0;
        vec![ProberReport::PckLossRatio {
            unknown: 0,
            total: 0,
        }]
    }

    #[cfg(test)]
    pub(crate) fn tx_frame(&self) -> &[u8] {
        self.frame.frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link_prober::frame::HeartbeatFrame;
    use crate::link_prober::payload::PAYLOAD_OFFSET;
    use crate::port_event::port_channel;
    use mux_types::PortCableType;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    /// In-memory transport capturing transmitted frames.
    struct FakeSocket {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl FakeSocket {
        fn pair() -> (Box<dyn ProbeSocket>, Arc<Mutex<Vec<Vec<u8>>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            (Box::new(FakeSocket { sent: sent.clone() }), sent)
        }
    }

    impl ProbeSocket for FakeSocket {
        fn open(&mut self, _config: &MuxPortConfig) -> LinkMgrResult<()> {
            Ok(())
        }

        fn send(&mut self, frame: &[u8]) -> LinkMgrResult<usize> {
            self.sent.lock().unwrap().push(frame.to_vec());
            Ok(frame.len())
        }
    }

    fn config() -> MuxPortConfig {
        let mut config = MuxPortConfig::new("Ethernet0", 9)
            .with_cable_type(PortCableType::ActiveStandby)
            .with_retry_counts(2, 2, 2, 2);
        config.tor_mac = "04:3f:72:00:00:01".parse().unwrap();
        config.vlan_mac = "04:3f:72:00:00:02".parse().unwrap();
        config.server_mac = "b8:ce:f6:00:00:09".parse().unwrap();
        config.loopback_ipv4 = "10.212.64.1".parse().unwrap();
        config.server_ipv4 = "192.168.0.9".parse().unwrap();
        config
    }

    fn prober() -> (LinkProber, Arc<Mutex<Vec<Vec<u8>>>>) {
        let (socket, sent) = FakeSocket::pair();
        let mut prober = LinkProber::new(socket);
        prober.initialize(&config()).unwrap();
        (prober, sent)
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_sends_heartbeat_and_reports_silence() {
        let (tx, _rx) = port_channel();
        let mut timers = TimerService::new(tx);
        let (mut prober, sent) = prober();
        prober.start_probing(&config(), &mut timers);

        let reports = prober.on_interval(&config(), &mut timers);
        // Nothing was received before the first tick.
        assert!(reports.contains(&ProberReport::HeartbeatUnknown));
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_reply_suppresses_unknown() {
        let (tx, _rx) = port_channel();
        let mut timers = TimerService::new(tx);
        let (mut prober, _sent) = prober();
        prober.start_probing(&config(), &mut timers);
        prober.on_interval(&config(), &mut timers);

        // Loop the TX frame back.
        let echoed = prober.tx_frame().to_vec();
        let reports = prober.handle_rx_frame(&config(), &echoed);
        assert_eq!(reports, vec![ProberReport::HeartbeatSelf]);

        let reports = prober.on_interval(&config(), &mut timers);
        assert!(!reports.contains(&ProberReport::HeartbeatUnknown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_reply_classified_by_guid() {
        let (tx, _rx) = port_channel();
        let (mut prober, _sent) = prober();
        let mut timers = TimerService::new(tx);
        prober.start_probing(&config(), &mut timers);
        prober.on_interval(&config(), &mut timers);

        // A peer frame is ours with a different GUID.
        let mut peer_frame = prober.tx_frame().to_vec();
        peer_frame[PAYLOAD_OFFSET + 8] ^= 0xff;
        let reports = prober.handle_rx_frame(&config(), &peer_frame);
        assert_eq!(reports, vec![ProberReport::HeartbeatPeer]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_switch_command_detected() {
        let (tx, _rx) = port_channel();
        let (mut prober, _sent) = prober();
        let mut timers = TimerService::new(tx);
        prober.start_probing(&config(), &mut timers);

        // Build a peer frame carrying the switch command.
        let mut peer = HeartbeatFrame::new();
        peer.rebuild(&config()).unwrap();
        peer.set_command_tail(TlvCommand::SwitchActive).unwrap();
        let mut bytes = peer.frame().to_vec();
        bytes[PAYLOAD_OFFSET + 8] ^= 0xff;

        let reports = prober.handle_rx_frame(&config(), &bytes);
        assert!(reports.contains(&ProberReport::HeartbeatPeer));
        assert!(reports.contains(&ProberReport::SwitchActiveRequest));
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_in_own_echo_is_ignored() {
        let (tx, _rx) = port_channel();
        let (mut prober, _sent) = prober();
        let mut timers = TimerService::new(tx);
        prober.start_probing(&config(), &mut timers);
        prober.send_peer_switch_command(&config());
        prober.on_interval(&config(), &mut timers);

        let echoed = prober.tx_frame().to_vec();
        let reports = prober.handle_rx_frame(&config(), &echoed);
        assert_eq!(reports, vec![ProberReport::HeartbeatSelf]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_blocks_tx_but_advances_seq() {
        let (tx, _rx) = port_channel();
        let (mut prober, sent) = prober();
        let mut timers = TimerService::new(tx);
        prober.start_probing(&config(), &mut timers);
        prober.on_interval(&config(), &mut timers);
        assert_eq!(sent.lock().unwrap().len(), 1);

        prober.suspend_tx_probes(Duration::from_millis(500), &mut timers);
        prober.on_interval(&config(), &mut timers);
        prober.on_interval(&config(), &mut timers);
        assert_eq!(sent.lock().unwrap().len(), 1);

        let reports = prober.on_suspend_expiry();
        assert_eq!(reports, vec![ProberReport::SuspendExpired]);
        prober.on_interval(&config(), &mut timers);
        assert_eq!(sent.lock().unwrap().len(), 2);

        // The sequence kept advancing across the gap.
        let frames = sent.lock().unwrap();
        let first = parse_heartbeat(&frames[0]).unwrap().payload.seq;
        let last = parse_heartbeat(&frames[1]).unwrap().payload.seq;
        assert_eq!(last - first, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_command_rides_n_heartbeats_then_completes() {
        let config = config();
        let (tx, _rx) = port_channel();
        let (mut prober, sent) = prober();
        let mut timers = TimerService::new(tx);
        prober.start_probing(&config, &mut timers);

        prober.send_peer_switch_command(&config);
        let mut completion_seen = false;
        for _ in 0..(config.positive_state_change_retry_count + 1) {
            let reports = prober.on_interval(&config, &mut timers);
            if reports.contains(&ProberReport::SwitchCommandComplete) {
                completion_seen = true;
            }
        }
        assert!(completion_seen);

        // Command heartbeats carried the TLV; afterwards it is gone.
        let frames = sent.lock().unwrap();
        let with_command = frames
            .iter()
            .filter(|f| {
                parse_heartbeat(f)
                    .unwrap()
                    .tlv_iter()
                    .filter_map(|t| t.ok())
                    .any(|t| t.tlv_type == TLV_COMMAND)
            })
            .count();
        assert_eq!(
            with_command,
            (config.positive_state_change_retry_count + 1) as usize
        );
        drop(frames);

        prober.on_interval(&config, &mut timers);
        let frames = sent.lock().unwrap();
        let last = frames.last().unwrap();
        assert_eq!(
            parse_heartbeat(last).unwrap().tlv_iter().count(),
            0,
            "sentinel-only tail must be restored"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_and_restart_tx() {
        let (tx, _rx) = port_channel();
        let (mut prober, sent) = prober();
        let mut timers = TimerService::new(tx);
        prober.start_probing(&config(), &mut timers);

        prober.shutdown_tx_probes();
        prober.on_interval(&config(), &mut timers);
        assert_eq!(sent.lock().unwrap().len(), 0);

        prober.restart_tx_probes();
        prober.on_interval(&config(), &mut timers);
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loss_ratio_cadence_and_reset() {
        let config = config();
        let (tx, _rx) = port_channel();
        let (mut prober, _sent) = prober();
        let mut timers = TimerService::new(tx);
        prober.start_probing(&config, &mut timers);

        let mut ratio = None;
        for _ in 0..PCK_LOSS_PUBLISH_CADENCE {
            for report in prober.on_interval(&config, &mut timers) {
                if let ProberReport::PckLossRatio { unknown, total } = report {
                    ratio = Some((unknown, total));
                }
            }
        }
        let (unknown, total) = ratio.expect("no loss ratio after 100 intervals");
        assert_eq!(total, PCK_LOSS_PUBLISH_CADENCE);
        assert_eq!(unknown, PCK_LOSS_PUBLISH_CADENCE);

        let reports = prober.reset_icmp_packet_counts();
        assert_eq!(
            reports,
            vec![ProberReport::PckLossRatio {
                unknown: 0,
                total: 0
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_dropped_silently() {
        let (tx, _rx) = port_channel();
        let (mut prober, _sent) = prober();
        let mut timers = TimerService::new(tx);
        prober.start_probing(&config(), &mut timers);

        assert!(prober.handle_rx_frame(&config(), &[0u8; 20]).is_empty());

        // Wrong echo identifier: filtered.
        let mut other = HeartbeatFrame::new();
        let mut other_config = config();
        other_config.server_id = 77;
        other.rebuild(&other_config).unwrap();
        assert!(prober
            .handle_rx_frame(&config(), other.frame())
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_decreased_interval_window() {
        let config = config();
        let (tx, _rx) = port_channel();
        let (mut prober, _sent) = prober();
        let mut timers = TimerService::new(tx);
        prober.start_probing(&config, &mut timers);

        prober.decrease_probe_interval_after_switch(
            Duration::from_millis(1000),
            &config,
            &mut timers,
        );
        assert_eq!(prober.probing_interval(&config), config.decreased_interval);

        prober.revert_probe_interval(&mut timers);
        assert_eq!(prober.probing_interval(&config), config.timeout_ipv4);
    }
}
