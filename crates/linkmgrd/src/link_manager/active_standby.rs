//! Active/standby composite state machine.
//!
//! Reduces the (prober, mux, link) tuple into toggle requests, probe
//! requests, TX suspensions and publications. Exactly one ToR may forward
//! at a time; this machine decides when to take the MUX, when to yield it
//! to the peer, and when to distrust the driver.
//!
//! Every handler mutates the composite in place and returns the actions
//! the port runtime must perform. A toggle in flight is represented by the
//! MUX dimension sitting in `Wait` with the mux-wait timer armed; further
//! toggle requests are latched and executed when `Wait` exits.

use mux_types::{
    DefaultRoute, LinkManagerHealth, LinkProberState, LinkState, MuxMode, MuxState,
};
use tracing::{info, warn};

use crate::config::MuxPortConfig;
use crate::link_manager::{Action, CompositeState, SwitchCause, SwitchingPhase};
use crate::port_event::TimerKind;

pub struct ActiveStandbyStateMachine {
    config: MuxPortConfig,
    composite: CompositeState,
    health: LinkManagerHealth,
    activated: bool,
    mux_mode: MuxMode,
    peer_link_state: LinkState,
    default_route: DefaultRoute,

    // Repeated-corner accounting.
    wait_active_up_count: u32,
    active_unknown_up_count: u32,
    standby_unknown_up_count: u32,
    mux_probe_retry_count: u32,

    // Geometric backoff factors, bounded by the configured cap.
    mux_unknown_backoff_factor: u32,
    wait_standby_up_backoff_factor: u32,
    unknown_active_up_backoff_factor: u32,
    mux_wait_backoff_factor: u32,

    // Work latched while a toggle is in flight.
    pending_mux_mode_change: bool,
    target_mux_mode: MuxMode,
    pending_toggle: Option<(MuxState, SwitchCause)>,

    // Switching metric bracketing.
    switch_in_flight_cause: Option<SwitchCause>,
    // Cause carried by an outstanding peer switch command.
    send_switch_command_cause: Option<SwitchCause>,
}

impl ActiveStandbyStateMachine {
    pub fn new(config: MuxPortConfig) -> Self {
        let mode = config.mode;
        Self {
            config,
            composite: CompositeState::new(LinkProberState::Wait, MuxState::Wait, LinkState::Down),
            health: LinkManagerHealth::Uninitialized,
            activated: false,
            mux_mode: mode,
            peer_link_state: LinkState::Down,
            default_route: DefaultRoute::Ok,
            wait_active_up_count: 0,
            active_unknown_up_count: 0,
            standby_unknown_up_count: 0,
            mux_probe_retry_count: 0,
            mux_unknown_backoff_factor: 1,
            wait_standby_up_backoff_factor: 1,
            unknown_active_up_backoff_factor: 1,
            mux_wait_backoff_factor: 1,
            pending_mux_mode_change: false,
            target_mux_mode: MuxMode::Auto,
            pending_toggle: None,
            switch_in_flight_cause: None,
            send_switch_command_cause: None,
        }
    }

    pub fn composite(&self) -> CompositeState {
        self.composite
    }

    pub fn health(&self) -> LinkManagerHealth {
        self.health
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    /// Activate after all init signals (server IPv4, server MAC, ToR MAC)
    /// have arrived: start the prober and learn the driver state.
    pub fn activate(&mut self) -> Vec<Action> {
        if self.activated {
            return Vec::new();
        }
        self.activated = true;
        info!("{}: composite state machine activated", self.config.port_name);

        self.composite.mux = MuxState::Wait;
        vec![
            Action::InitializeProber,
            Action::StartProbing,
            Action::ProbeMux,
            Action::StartTimer {
                kind: TimerKind::MuxWait,
                factor: 1,
            },
            Action::PublishHealth(LinkManagerHealth::Uninitialized),
        ]
    }

    // --- child label changes ---------------------------------------------

    pub fn handle_link_prober_state_change(&mut self, label: LinkProberState) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.composite.link_prober == label {
            return actions;
        }
        let mut next = self.composite;
        next.link_prober = label;
        if !self.activated {
            self.composite = next;
            return actions;
        }
        self.transition(&mut next, &mut actions);
        self.commit(next, &mut actions);
        actions
    }

    pub fn handle_mux_state_change(&mut self, label: MuxState) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.composite.mux == label {
            return actions;
        }
        let mut next = self.composite;
        next.mux = label;
        if !self.activated {
            self.composite = next;
            return actions;
        }
        self.transition(&mut next, &mut actions);
        self.commit(next, &mut actions);
        actions
    }

    pub fn handle_link_state_change(&mut self, label: LinkState) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.composite.link == label {
            return actions;
        }
        let mut next = self.composite;
        next.link = label;
        if !self.activated {
            self.composite = next;
            return actions;
        }
        self.transition(&mut next, &mut actions);
        self.commit(next, &mut actions);
        actions
    }

    // --- driver replies ---------------------------------------------------

    /// Direct reply to a driver probe; not debounced.
    pub fn handle_probe_mux_notification(&mut self, label: MuxState) -> Vec<Action> {
        self.handle_mux_state_change(label)
    }

    /// Reply to a one-shot driver state read; treated like a probe reply.
    pub fn handle_get_mux_notification(&mut self, label: MuxState) -> Vec<Action> {
        self.handle_mux_state_change(label)
    }

    // --- prober notifications --------------------------------------------

    /// The TX suspension elapsed. If we are still blackholing (prober
    /// Unknown, MUX active), ask the driver what the hardware really does.
    pub fn handle_suspend_timer_expiry(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.activated {
            return actions;
        }
        if self.composite.link_prober == LinkProberState::Unknown
            && self.composite.mux == MuxState::Active
            && self.composite.link == LinkState::Up
        {
            let mut next = self.composite;
            next.mux = MuxState::Wait;
            let factor = self.unknown_active_up_backoff_factor;
            self.unknown_active_up_backoff_factor =
                (factor * 2).min(self.config.max_backoff_factor);
            actions.push(Action::ProbeMux);
            actions.push(Action::StartTimer {
                kind: TimerKind::MuxWait,
                factor,
            });
            self.commit(next, &mut actions);
        }
        actions
    }

    /// The prober finished sending the peer switch command heartbeats.
    pub fn handle_switch_active_command_completion(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if let Some(cause) = self.send_switch_command_cause.take() {
            let mut next = self.composite;
            self.switch_mux_state(&mut next, MuxState::Standby, cause, false, &mut actions);
            self.commit(next, &mut actions);
        }
        actions
    }

    /// The peer asked us to yield the active side (TLV switch command).
    pub fn handle_switch_active_request(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.activated {
            return actions;
        }
        info!(
            "{}: peer requested switchover, yielding active",
            self.config.port_name
        );
        let mut next = self.composite;
        next.link_prober = LinkProberState::Wait;
        actions.push(Action::EnterProberState(LinkProberState::Wait));
        self.switch_mux_state(
            &mut next,
            MuxState::Standby,
            SwitchCause::TlvSwitchActiveCommand,
            false,
            &mut actions,
        );
        self.commit(next, &mut actions);
        actions
    }

    /// The peer asked us to probe our driver (TLV probe command).
    pub fn handle_mux_probe_request(&mut self) -> Vec<Action> {
        if self.activated {
            vec![Action::ProbeMux]
        } else {
            Vec::new()
        }
    }

    // --- timers -----------------------------------------------------------

    /// The driver did not answer a toggle within the wait timeout.
    pub fn handle_mux_wait_timeout(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.activated || self.composite.mux != MuxState::Wait {
            return actions;
        }
        let factor = self.mux_wait_backoff_factor;
        if factor >= self.config.max_backoff_factor {
            warn!(
                "{}: driver stalled answering a toggle, classifying MUX unknown",
                self.config.port_name
            );
            if self.switch_in_flight_cause.take().is_some() {
                actions.push(Action::PublishSwitchingMetric {
                    phase: SwitchingPhase::End,
                    cause: SwitchCause::TransceiverDaemonTimeout,
                });
            }
            let mut next = self.composite;
            next.mux = MuxState::Unknown;
            self.transition(&mut next, &mut actions);
            self.commit(next, &mut actions);
        } else {
            self.mux_wait_backoff_factor = (factor * 2).min(self.config.max_backoff_factor);
            actions.push(Action::ProbeMux);
            actions.push(Action::StartTimer {
                kind: TimerKind::MuxWait,
                factor: self.mux_wait_backoff_factor,
            });
        }
        actions
    }

    /// Periodic probe of an uncertain or mismatched driver state.
    pub fn handle_mux_probe_timeout(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.activated {
            return actions;
        }
        match (self.composite.link_prober, self.composite.mux, self.composite.link) {
            (prober, MuxState::Unknown, _) => {
                self.mux_probe_retry_count += 1;
                if self.mux_probe_retry_count > self.config.negative_state_change_retry_count {
                    // The driver never recovered; force the MUX to the side
                    // the prober implies.
                    let target = match prober {
                        LinkProberState::Active => MuxState::Active,
                        _ => MuxState::Standby,
                    };
                    let mut next = self.composite;
                    self.switch_mux_state(
                        &mut next,
                        target,
                        SwitchCause::HardwareStateUnknown,
                        true,
                        &mut actions,
                    );
                    self.commit(next, &mut actions);
                } else {
                    self.probe_uncertain_mux(&mut actions);
                }
            }
            (_, MuxState::Error, _) => {
                self.probe_uncertain_mux(&mut actions);
            }
            (LinkProberState::Standby, MuxState::Active, LinkState::Up)
            | (LinkProberState::Unknown, MuxState::Standby, LinkState::Up) => {
                actions.push(Action::ProbeMux);
                actions.push(Action::StartTimer {
                    kind: TimerKind::MuxProbe,
                    factor: 1,
                });
            }
            (LinkProberState::Wait, MuxState::Standby, LinkState::Up) => {
                let factor = self.wait_standby_up_backoff_factor;
                self.wait_standby_up_backoff_factor =
                    (factor * 2).min(self.config.max_backoff_factor);
                actions.push(Action::ProbeMux);
                actions.push(Action::StartTimer {
                    kind: TimerKind::MuxProbe,
                    factor,
                });
            }
            _ => {}
        }
        actions
    }

    // --- configuration and environment ------------------------------------

    pub fn handle_mux_config(&mut self, mode: MuxMode) -> Vec<Action> {
        let mut actions = Vec::new();
        self.target_mux_mode = mode;
        if !self.activated {
            self.mux_mode = mode;
            return actions;
        }
        if self.composite.mux == MuxState::Wait {
            // Executed when Wait exits.
            self.pending_mux_mode_change = true;
            return actions;
        }
        self.apply_mode(mode, &mut actions);
        actions
    }

    pub fn handle_default_route_change(&mut self, route: DefaultRoute) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.default_route == route {
            return actions;
        }
        self.default_route = route;
        if !self.activated || !self.config.enable_default_route_feature {
            return actions;
        }
        match route {
            DefaultRoute::Na => {
                // Stop pretending the uplink works.
                actions.push(Action::ShutdownTx);
                if self.composite.mux == MuxState::Active {
                    let mut next = self.composite;
                    self.switch_mux_state(
                        &mut next,
                        MuxState::Standby,
                        SwitchCause::DefaultRouteNa,
                        false,
                        &mut actions,
                    );
                    self.commit(next, &mut actions);
                } else {
                    self.update_health(&mut actions);
                }
            }
            DefaultRoute::Ok => {
                actions.push(Action::RestartTx);
                self.update_health(&mut actions);
            }
        }
        actions
    }

    pub fn handle_peer_link_state(&mut self, label: LinkState) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.peer_link_state == label {
            return actions;
        }
        self.peer_link_state = label;
        if !self.activated {
            return actions;
        }
        if label == LinkState::Down && self.composite.mux == MuxState::Standby {
            // The forwarding peer lost its link; take over.
            let mut next = self.composite;
            self.switch_mux_state(
                &mut next,
                MuxState::Active,
                SwitchCause::PeerLinkDown,
                false,
                &mut actions,
            );
            self.commit(next, &mut actions);
        }
        actions
    }

    pub fn handle_pck_loss_ratio(&mut self, unknown: u64, total: u64) -> Vec<Action> {
        vec![Action::PublishPckLossRatio { unknown, total }]
    }

    pub fn handle_reset_pck_loss_count(&mut self) -> Vec<Action> {
        vec![Action::ResetIcmpPacketCounts]
    }

    // --- transition core --------------------------------------------------

    /// One action per reachable corner of the cube.
    fn transition(&mut self, next: &mut CompositeState, actions: &mut Vec<Action>) {
        use LinkProberState as P;
        use LinkState as L;
        use MuxState as M;

        match (next.link_prober, next.mux, next.link) {
            // Steady states.
            (P::Active, M::Active, L::Up) | (P::Standby, M::Standby, L::Up) => {
                self.reset_reconciliation(actions);
            }

            // The peer answers probes while we forward: confirm the real
            // forwarding state before touching anything.
            (P::Standby, M::Active, L::Up) => {
                actions.push(Action::ProbeMux);
                actions.push(Action::StartTimer {
                    kind: TimerKind::MuxProbe,
                    factor: 1,
                });
            }

            // We may be blackholing the server. Go quiet so the peer can
            // take over; on repeat, yield outright.
            (P::Unknown, M::Active, L::Up) => {
                if self.active_unknown_up_count == 0 {
                    self.active_unknown_up_count += 1;
                    actions.push(Action::SuspendTx(self.config.suspend_timeout));
                } else {
                    self.active_unknown_up_count += 1;
                    self.switch_mux_state(
                        next,
                        M::Standby,
                        SwitchCause::PeerHeartbeatMissing,
                        false,
                        actions,
                    );
                }
            }

            // Hearing nothing while the peer forwards is the expected shape
            // of standby; keep confirming the driver agrees.
            (P::Unknown, M::Standby, L::Up) => {
                self.standby_unknown_up_count += 1;
                actions.push(Action::StartTimer {
                    kind: TimerKind::MuxProbe,
                    factor: 1,
                });
            }

            // Our heartbeats come back although the driver says standby:
            // the hardware is forwarding us, make the driver match.
            (P::Active, M::Standby, L::Up) => {
                self.switch_mux_state(
                    next,
                    M::Active,
                    SwitchCause::MatchingHardwareState,
                    false,
                    actions,
                );
            }

            // Driver uncertain: probe with geometric backoff. The probe
            // timeout handler escalates to a forced toggle.
            (_, M::Unknown, L::Up) => {
                self.probe_uncertain_mux(actions);
            }
            (_, M::Error, _) => {
                self.probe_uncertain_mux(actions);
            }

            (P::Wait, M::Active, L::Up) => {
                self.wait_active_up_count += 1;
                if self.wait_active_up_count >= self.config.positive_state_change_retry_count {
                    actions.push(Action::ProbePeerTor);
                }
            }
            (P::Wait, M::Standby, L::Up) => {
                let factor = self.wait_standby_up_backoff_factor;
                self.wait_standby_up_backoff_factor =
                    (factor * 2).min(self.config.max_backoff_factor);
                actions.push(Action::StartTimer {
                    kind: TimerKind::MuxProbe,
                    factor,
                });
            }

            // A toggle is in flight; the mux-wait timer bounds it.
            (_, M::Wait, _) => {}

            // Link loss while we forward: hand the MUX to the peer.
            (_, M::Active, L::Down) => {
                self.switch_mux_state(next, M::Standby, SwitchCause::LinkDown, false, actions);
            }

            // Link down on the standby side changes nothing.
            (_, _, L::Down) => {}

            // Session labels never reach an active/standby composite.
            _ => {}
        }
    }

    /// Record the toggle, drive the MUX dimension to `Wait`, hand the
    /// request to the driver and bound it with the wait timer.
    fn switch_mux_state(
        &mut self,
        next: &mut CompositeState,
        target: MuxState,
        cause: SwitchCause,
        force: bool,
        actions: &mut Vec<Action>,
    ) {
        if next.mux == MuxState::Wait && !force {
            // A toggle is already in flight; latch this one.
            self.pending_toggle = Some((target, cause));
            return;
        }
        if self.mux_mode == MuxMode::Manual && cause != SwitchCause::ConfigMuxMode {
            return;
        }
        info!(
            "{}: requesting MUX toggle to {} (cause {})",
            self.config.port_name, target, cause
        );
        // A superseded toggle still gets its switching-end bracket.
        if let Some(previous) = self.switch_in_flight_cause.take() {
            actions.push(Action::PublishSwitchingMetric {
                phase: SwitchingPhase::End,
                cause: previous,
            });
        }
        self.switch_in_flight_cause = Some(cause);
        actions.push(Action::PublishSwitchingMetric {
            phase: SwitchingPhase::Start,
            cause,
        });
        next.mux = MuxState::Wait;
        // The prober re-learns which side it is on once the MUX settles.
        next.link_prober = LinkProberState::Wait;
        actions.push(Action::EnterProberState(LinkProberState::Wait));
        actions.push(Action::SetMuxState(target));
        actions.push(Action::StartTimer {
            kind: TimerKind::MuxWait,
            factor: 1,
        });
        if self.config.enable_switchover_measurement {
            actions.push(Action::DecreaseProbeInterval(self.config.suspend_timeout));
        }
    }

    fn probe_uncertain_mux(&mut self, actions: &mut Vec<Action>) {
        let factor = self.mux_unknown_backoff_factor;
        self.mux_unknown_backoff_factor = (factor * 2).min(self.config.max_backoff_factor);
        actions.push(Action::ProbeMux);
        actions.push(Action::StartTimer {
            kind: TimerKind::MuxProbe,
            factor,
        });
    }

    fn reset_reconciliation(&mut self, actions: &mut Vec<Action>) {
        self.wait_active_up_count = 0;
        self.active_unknown_up_count = 0;
        self.standby_unknown_up_count = 0;
        self.mux_probe_retry_count = 0;
        self.mux_unknown_backoff_factor = 1;
        self.wait_standby_up_backoff_factor = 1;
        self.unknown_active_up_backoff_factor = 1;
        self.mux_wait_backoff_factor = 1;
        actions.push(Action::CancelTimer(TimerKind::MuxProbe));
    }

    /// Install `next` as the current composite, emitting the bookkeeping
    /// that belongs to the edges crossed.
    fn commit(&mut self, next: CompositeState, actions: &mut Vec<Action>) {
        let old = self.composite;
        if old != next {
            info!(
                "{}: composite state {} -> {}",
                self.config.port_name, old, next
            );
        }

        if old.mux == MuxState::Wait && next.mux != MuxState::Wait {
            actions.push(Action::CancelTimer(TimerKind::MuxWait));
            self.mux_wait_backoff_factor = 1;
            if let Some(cause) = self.switch_in_flight_cause.take() {
                actions.push(Action::PublishSwitchingMetric {
                    phase: SwitchingPhase::End,
                    cause,
                });
                if self.config.enable_switchover_measurement {
                    actions.push(Action::RevertProbeInterval);
                }
            }
        }
        if matches!(old.mux, MuxState::Unknown | MuxState::Error)
            && matches!(next.mux, MuxState::Active | MuxState::Standby)
        {
            actions.push(Action::CancelTimer(TimerKind::MuxProbe));
            self.mux_unknown_backoff_factor = 1;
            self.mux_probe_retry_count = 0;
        }
        if old.link_prober == LinkProberState::Unknown
            && next.link_prober != LinkProberState::Unknown
        {
            actions.push(Action::ResumeTx);
            self.active_unknown_up_count = 0;
            self.standby_unknown_up_count = 0;
        }
        if old.mux != next.mux && next.mux != MuxState::Wait {
            actions.push(Action::PublishMuxState(next.mux));
        }

        self.composite = next;
        self.update_health(actions);

        // Work latched while the toggle was in flight runs now.
        if old.mux == MuxState::Wait && next.mux != MuxState::Wait {
            if self.pending_mux_mode_change {
                self.pending_mux_mode_change = false;
                let mode = self.target_mux_mode;
                self.apply_mode(mode, actions);
            } else if let Some((target, cause)) = self.pending_toggle.take() {
                if next.mux != target {
                    let mut renext = self.composite;
                    self.switch_mux_state(&mut renext, target, cause, false, actions);
                    self.composite = renext;
                }
            }
        }
    }

    fn apply_mode(&mut self, mode: MuxMode, actions: &mut Vec<Action>) {
        let previous = self.mux_mode;
        self.mux_mode = mode;
        info!("{}: mux mode {} -> {}", self.config.port_name, previous, mode);

        if previous == MuxMode::Detach && mode != MuxMode::Detach {
            actions.push(Action::RestartTx);
        }
        match mode {
            MuxMode::Active => {
                if matches!(self.composite.mux, MuxState::Standby | MuxState::Unknown) {
                    let mut next = self.composite;
                    self.switch_mux_state(
                        &mut next,
                        MuxState::Active,
                        SwitchCause::ConfigMuxMode,
                        false,
                        actions,
                    );
                    self.commit(next, actions);
                }
            }
            MuxMode::Standby => {
                if matches!(self.composite.mux, MuxState::Active | MuxState::Unknown) {
                    // Ask the peer to take over first; the toggle follows
                    // when the command heartbeats finish.
                    self.send_switch_command_cause = Some(SwitchCause::ConfigMuxMode);
                    actions.push(Action::SendPeerSwitchCommand);
                }
            }
            MuxMode::Detach => {
                actions.push(Action::ShutdownTx);
                if self.health != LinkManagerHealth::Unhealthy {
                    self.health = LinkManagerHealth::Unhealthy;
                    actions.push(Action::PublishHealth(LinkManagerHealth::Unhealthy));
                }
            }
            MuxMode::Auto | MuxMode::Manual => {}
        }
    }

    /// Healthy iff the MUX matches the prober-implied side, the link is up,
    /// and (when gated) the default route exists.
    fn update_health(&mut self, actions: &mut Vec<Action>) {
        if !self.activated {
            return;
        }
        let aligned = matches!(
            (self.composite.link_prober, self.composite.mux),
            (LinkProberState::Active, MuxState::Active)
                | (LinkProberState::Standby, MuxState::Standby)
        );
        let route_ok = !self.config.enable_default_route_feature
            || self.default_route == DefaultRoute::Ok;
        let health = if aligned && self.composite.link == LinkState::Up && route_ok {
            LinkManagerHealth::Healthy
        } else {
            LinkManagerHealth::Unhealthy
        };
        if health != self.health {
            self.health = health;
            actions.push(Action::PublishHealth(health));
        }
    }
}
