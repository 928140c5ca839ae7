//! Active/active composite state machine.
//!
//! Each ToR independently decides to forward or drop, so this composite is
//! flatter than the active/standby one: the self session drives our own
//! MUX side, and the peer session drives the peer MUX state we publish on
//! the peer's behalf. There is no suspend/yield dance; silence simply
//! means "request standby".

use mux_types::{
    DefaultRoute, LinkManagerHealth, LinkProberState, LinkState, MuxMode, MuxState,
};
use tracing::{info, warn};

use crate::config::MuxPortConfig;
use crate::link_manager::{Action, CompositeState, SwitchCause, SwitchingPhase};
use crate::port_event::TimerKind;

pub struct ActiveActiveStateMachine {
    config: MuxPortConfig,
    composite: CompositeState,
    peer_prober: LinkProberState,
    peer_mux: MuxState,
    health: LinkManagerHealth,
    activated: bool,
    mux_mode: MuxMode,
    default_route: DefaultRoute,

    mux_unknown_backoff_factor: u32,
    mux_probe_retry_count: u32,
    mux_wait_backoff_factor: u32,
    peer_wait_backoff_factor: u32,

    pending_toggle: Option<(MuxState, SwitchCause)>,
    switch_in_flight_cause: Option<SwitchCause>,
    /// The peer-side state we requested and are waiting to see confirmed.
    peer_mux_requested: Option<MuxState>,
}

impl ActiveActiveStateMachine {
    pub fn new(config: MuxPortConfig) -> Self {
        let mode = config.mode;
        Self {
            config,
            composite: CompositeState::new(
                LinkProberState::SelfInit,
                MuxState::Wait,
                LinkState::Down,
            ),
            peer_prober: LinkProberState::PeerWait,
            peer_mux: MuxState::Wait,
            health: LinkManagerHealth::Uninitialized,
            activated: false,
            mux_mode: mode,
            default_route: DefaultRoute::Ok,
            mux_unknown_backoff_factor: 1,
            mux_probe_retry_count: 0,
            mux_wait_backoff_factor: 1,
            peer_wait_backoff_factor: 1,
            pending_toggle: None,
            switch_in_flight_cause: None,
            peer_mux_requested: None,
        }
    }

    pub fn composite(&self) -> CompositeState {
        self.composite
    }

    pub fn peer_prober(&self) -> LinkProberState {
        self.peer_prober
    }

    pub fn peer_mux(&self) -> MuxState {
        self.peer_mux
    }

    pub fn health(&self) -> LinkManagerHealth {
        self.health
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    /// Activate after SoC IPv4, server MAC and ToR MAC are known.
    pub fn activate(&mut self) -> Vec<Action> {
        if self.activated {
            return Vec::new();
        }
        self.activated = true;
        info!("{}: composite state machine activated", self.config.port_name);

        self.composite.mux = MuxState::Wait;
        let mut actions = vec![
            Action::InitializeProber,
            Action::StartProbing,
            Action::ProbeMux,
            Action::StartTimer {
                kind: TimerKind::MuxWait,
                factor: 1,
            },
            Action::PublishHealth(LinkManagerHealth::Uninitialized),
        ];
        if self.config.oscillation_enabled {
            actions.push(Action::StartTimer {
                kind: TimerKind::Oscillation,
                factor: 1,
            });
        }
        actions
    }

    // --- self session -----------------------------------------------------

    pub fn handle_self_session_state_change(&mut self, label: LinkProberState) -> Vec<Action> {
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

    pub fn handle_probe_mux_notification(&mut self, label: MuxState) -> Vec<Action> {
        self.handle_mux_state_change(label)
    }

    // --- peer session -----------------------------------------------------

    /// The peer prober dimension flipped; drive the peer MUX to match.
    pub fn handle_peer_prober_state_change(&mut self, label: LinkProberState) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.peer_prober == label {
            return actions;
        }
        self.peer_prober = label;
        if !self.activated {
            return actions;
        }
        match label {
            LinkProberState::PeerActive => {
                self.request_peer_mux(MuxState::Active, &mut actions);
            }
            LinkProberState::PeerUnknown => {
                self.request_peer_mux(MuxState::Standby, &mut actions);
            }
            _ => {}
        }
        actions
    }

    /// State-store confirmation of the peer MUX state.
    pub fn handle_peer_mux_state(&mut self, label: MuxState) -> Vec<Action> {
        let mut actions = Vec::new();
        self.peer_mux = label;
        if self.peer_mux_requested == Some(label) {
            self.peer_mux_requested = None;
            self.peer_wait_backoff_factor = 1;
            actions.push(Action::CancelTimer(TimerKind::PeerMuxWait));
        }
        actions
    }

    pub fn handle_peer_mux_wait_timeout(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.activated {
            return actions;
        }
        if let Some(requested) = self.peer_mux_requested {
            let factor = self.peer_wait_backoff_factor;
            self.peer_wait_backoff_factor = (factor * 2).min(self.config.max_backoff_factor);
            warn!(
                "{}: peer MUX request {} unconfirmed, retrying",
                self.config.port_name, requested
            );
            actions.push(Action::PublishPeerMuxState(requested));
            actions.push(Action::StartTimer {
                kind: TimerKind::PeerMuxWait,
                factor: self.peer_wait_backoff_factor,
            });
        }
        actions
    }

    // --- timers -----------------------------------------------------------

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

    pub fn handle_mux_probe_timeout(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.activated {
            return actions;
        }
        if matches!(self.composite.mux, MuxState::Unknown | MuxState::Error) {
            self.mux_probe_retry_count += 1;
            if self.composite.mux == MuxState::Unknown
                && self.mux_probe_retry_count > self.config.negative_state_change_retry_count
            {
                let target = self.prober_implied_side();
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
        actions
    }

    /// Periodic admin-forwarding sync: confirm the driver still agrees
    /// with the prober; a contradictory reply flows through the normal
    /// transition and requests a toggle.
    pub fn handle_oscillation_timeout(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.activated || !self.config.oscillation_enabled {
            return actions;
        }
        actions.push(Action::ProbeMux);
        actions.push(Action::StartTimer {
            kind: TimerKind::Oscillation,
            factor: 1,
        });
        actions
    }

    // --- configuration and environment ------------------------------------

    pub fn handle_mux_config(&mut self, mode: MuxMode) -> Vec<Action> {
        let mut actions = Vec::new();
        let previous = self.mux_mode;
        self.mux_mode = mode;
        if !self.activated {
            return actions;
        }
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
                        &mut actions,
                    );
                    self.commit(next, &mut actions);
                }
            }
            MuxMode::Standby => {
                if matches!(self.composite.mux, MuxState::Active | MuxState::Unknown) {
                    let mut next = self.composite;
                    self.switch_mux_state(
                        &mut next,
                        MuxState::Standby,
                        SwitchCause::ConfigMuxMode,
                        false,
                        &mut actions,
                    );
                    self.commit(next, &mut actions);
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

    /// The peer asked us to probe our driver (TLV probe command).
    pub fn handle_mux_probe_request(&mut self) -> Vec<Action> {
        if self.activated {
            vec![Action::ProbeMux]
        } else {
            Vec::new()
        }
    }

    pub fn handle_pck_loss_ratio(&mut self, unknown: u64, total: u64) -> Vec<Action> {
        vec![Action::PublishPckLossRatio { unknown, total }]
    }

    pub fn handle_reset_pck_loss_count(&mut self) -> Vec<Action> {
        vec![Action::ResetIcmpPacketCounts]
    }

    // --- transition core --------------------------------------------------

    fn transition(&mut self, next: &mut CompositeState, actions: &mut Vec<Action>) {
        use LinkProberState as P;
        use LinkState as L;
        use MuxState as M;

        match (next.link_prober, next.mux, next.link) {
            // Steady states.
            (P::SelfUp, M::Active, L::Up) | (P::SelfDown, M::Standby, _) => {
                self.reset_reconciliation(actions);
            }

            // The server answers us: forward. A request racing an
            // in-flight toggle is latched by switch_mux_state.
            (P::SelfUp, M::Standby, L::Up)
            | (P::SelfUp, M::Unknown, L::Up)
            | (P::SelfUp, M::Wait, L::Up) => {
                self.switch_mux_state(
                    next,
                    M::Active,
                    SwitchCause::MatchingHardwareState,
                    false,
                    actions,
                );
            }

            // Silence: stop forwarding, this side is useless.
            (P::SelfDown, M::Active, _)
            | (P::SelfDown, M::Unknown, _)
            | (P::SelfDown, M::Wait, _) => {
                if self.config.enable_default_route_feature
                    && self.default_route == DefaultRoute::Na
                {
                    actions.push(Action::ShutdownTx);
                }
                self.switch_mux_state(
                    next,
                    M::Standby,
                    SwitchCause::PeerHeartbeatMissing,
                    false,
                    actions,
                );
            }

            // Uncertain driver with no session verdict yet: keep probing
            // with backoff; the probe timeout handler escalates to a
            // forced toggle.
            (P::SelfInit, M::Unknown, _) | (_, M::Error, _) => {
                self.probe_uncertain_mux(actions);
            }

            // Link loss: stop forwarding.
            (_, M::Active, L::Down) => {
                self.switch_mux_state(next, M::Standby, SwitchCause::LinkDown, false, actions);
            }

            // A toggle is in flight; the mux-wait timer bounds it.
            (_, M::Wait, _) => {}

            _ => {}
        }
    }

    fn prober_implied_side(&self) -> MuxState {
        match self.composite.link_prober {
            LinkProberState::SelfUp => MuxState::Active,
            _ => MuxState::Standby,
        }
    }

    fn switch_mux_state(
        &mut self,
        next: &mut CompositeState,
        target: MuxState,
        cause: SwitchCause,
        force: bool,
        actions: &mut Vec<Action>,
    ) {
        if next.mux == MuxState::Wait && !force {
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
        actions.push(Action::SetMuxState(target));
        actions.push(Action::StartTimer {
            kind: TimerKind::MuxWait,
            factor: 1,
        });
    }

    fn request_peer_mux(&mut self, target: MuxState, actions: &mut Vec<Action>) {
        if self.peer_mux == target {
            return;
        }
        info!(
            "{}: requesting peer MUX state {}",
            self.config.port_name, target
        );
        self.peer_mux_requested = Some(target);
        actions.push(Action::PublishPeerMuxState(target));
        actions.push(Action::StartTimer {
            kind: TimerKind::PeerMuxWait,
            factor: 1,
        });
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
        self.mux_probe_retry_count = 0;
        self.mux_unknown_backoff_factor = 1;
        self.mux_wait_backoff_factor = 1;
        actions.push(Action::CancelTimer(TimerKind::MuxProbe));
    }

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
            }
        }
        if matches!(old.mux, MuxState::Unknown | MuxState::Error)
            && matches!(next.mux, MuxState::Active | MuxState::Standby)
        {
            actions.push(Action::CancelTimer(TimerKind::MuxProbe));
            self.mux_unknown_backoff_factor = 1;
            self.mux_probe_retry_count = 0;
        }
        if old.mux != next.mux && next.mux != MuxState::Wait {
            actions.push(Action::PublishMuxState(next.mux));
        }

        self.composite = next;
        self.update_health(actions);

        if old.mux == MuxState::Wait && next.mux != MuxState::Wait {
            if let Some((target, cause)) = self.pending_toggle.take() {
                if next.mux != target {
                    let mut renext = self.composite;
                    self.switch_mux_state(&mut renext, target, cause, false, actions);
                    self.composite = renext;
                }
            }
        }
    }

    /// Healthy iff the MUX matches the self session, the link is up, and
    /// (when gated) the default route exists.
    fn update_health(&mut self, actions: &mut Vec<Action>) {
        if !self.activated {
            return;
        }
        let aligned = matches!(
            (self.composite.link_prober, self.composite.mux),
            (LinkProberState::SelfUp, MuxState::Active)
                | (LinkProberState::SelfDown, MuxState::Standby)
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

#[cfg(test)]
mod tests {
    use super::*;
    use mux_types::PortCableType;
    use pretty_assertions::assert_eq;

    fn config() -> MuxPortConfig {
        MuxPortConfig::new("Ethernet4", 4)
            .with_cable_type(PortCableType::ActiveActive)
            .with_retry_counts(2, 2, 2, 2)
    }

    fn activated_machine() -> ActiveActiveStateMachine {
        let mut sm = ActiveActiveStateMachine::new(config());
        sm.activate();
        sm
    }

    fn has_toggle(actions: &[Action], target: MuxState) -> bool {
        actions.iter().any(|a| *a == Action::SetMuxState(target))
    }

    #[test]
    fn test_self_up_reaches_active_steady() {
        let mut sm = activated_machine();
        sm.handle_link_state_change(LinkState::Up);
        sm.handle_mux_state_change(MuxState::Active);
        let actions = sm.handle_self_session_state_change(LinkProberState::SelfUp);

        assert_eq!(
            sm.composite(),
            CompositeState::new(LinkProberState::SelfUp, MuxState::Active, LinkState::Up)
        );
        assert_eq!(sm.health(), LinkManagerHealth::Healthy);
        assert!(!has_toggle(&actions, MuxState::Active));
    }

    #[test]
    fn test_self_up_with_standby_mux_requests_active() {
        let mut sm = activated_machine();
        sm.handle_link_state_change(LinkState::Up);
        sm.handle_mux_state_change(MuxState::Standby);
        let actions = sm.handle_self_session_state_change(LinkProberState::SelfUp);

        assert!(has_toggle(&actions, MuxState::Active));
        assert_eq!(sm.composite().mux, MuxState::Wait);
    }

    #[test]
    fn test_self_down_requests_standby() {
        let mut sm = activated_machine();
        sm.handle_link_state_change(LinkState::Up);
        sm.handle_mux_state_change(MuxState::Active);
        sm.handle_self_session_state_change(LinkProberState::SelfUp);

        let actions = sm.handle_self_session_state_change(LinkProberState::SelfDown);
        assert!(has_toggle(&actions, MuxState::Standby));

        let actions = sm.handle_mux_state_change(MuxState::Standby);
        assert_eq!(
            sm.composite(),
            CompositeState::new(LinkProberState::SelfDown, MuxState::Standby, LinkState::Up)
        );
        // Standby with a dead self session is the correct, aligned shape.
        assert_eq!(sm.health(), LinkManagerHealth::Healthy);
        assert!(actions.contains(&Action::PublishMuxState(MuxState::Standby)));
    }

    #[test]
    fn test_link_down_requests_standby() {
        let mut sm = activated_machine();
        sm.handle_link_state_change(LinkState::Up);
        sm.handle_mux_state_change(MuxState::Active);
        sm.handle_self_session_state_change(LinkProberState::SelfUp);

        let actions = sm.handle_link_state_change(LinkState::Down);
        assert!(has_toggle(&actions, MuxState::Standby));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::PublishSwitchingMetric {
                phase: SwitchingPhase::Start,
                cause: SwitchCause::LinkDown,
            }
        )));
    }

    #[test]
    fn test_peer_session_drives_peer_mux() {
        let mut sm = activated_machine();

        let actions = sm.handle_peer_prober_state_change(LinkProberState::PeerActive);
        assert!(actions.contains(&Action::PublishPeerMuxState(MuxState::Active)));
        assert_eq!(sm.peer_prober(), LinkProberState::PeerActive);

        // Confirmation cancels the peer wait timer.
        let actions = sm.handle_peer_mux_state(MuxState::Active);
        assert!(actions.contains(&Action::CancelTimer(TimerKind::PeerMuxWait)));
        assert_eq!(sm.peer_mux(), MuxState::Active);

        let actions = sm.handle_peer_prober_state_change(LinkProberState::PeerUnknown);
        assert!(actions.contains(&Action::PublishPeerMuxState(MuxState::Standby)));
    }

    #[test]
    fn test_peer_wait_timeout_retries_with_backoff() {
        let mut sm = activated_machine();
        sm.handle_peer_prober_state_change(LinkProberState::PeerActive);

        let mut factors = Vec::new();
        for _ in 0..5 {
            let actions = sm.handle_peer_mux_wait_timeout();
            assert!(actions.contains(&Action::PublishPeerMuxState(MuxState::Active)));
            for action in &actions {
                if let Action::StartTimer {
                    kind: TimerKind::PeerMuxWait,
                    factor,
                } = action
                {
                    factors.push(*factor);
                }
            }
        }
        assert!(factors.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_unknown_unknown_probe_escalates() {
        let mut sm = activated_machine();
        sm.handle_link_state_change(LinkState::Up);

        // Driver uncertain before the self session settles.
        let actions = sm.handle_mux_state_change(MuxState::Unknown);
        assert!(actions.contains(&Action::ProbeMux));

        let mut forced = false;
        for _ in 0..10 {
            let actions = sm.handle_mux_probe_timeout();
            if actions.iter().any(|a| matches!(
                a,
                Action::PublishSwitchingMetric {
                    phase: SwitchingPhase::Start,
                    cause: SwitchCause::HardwareStateUnknown,
                }
            )) {
                assert!(has_toggle(&actions, MuxState::Standby));
                forced = true;
                break;
            }
        }
        assert!(forced, "probe retries never escalated");
    }

    #[test]
    fn test_oscillation_probes_periodically() {
        let mut base = config();
        base.oscillation_enabled = true;
        let mut sm = ActiveActiveStateMachine::new(base);
        let actions = sm.activate();
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::StartTimer {
                kind: TimerKind::Oscillation,
                ..
            }
        )));

        let actions = sm.handle_oscillation_timeout();
        assert!(actions.contains(&Action::ProbeMux));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::StartTimer {
                kind: TimerKind::Oscillation,
                ..
            }
        )));
    }

    #[test]
    fn test_scenario_active_active_full_flow() {
        // From (SelfInit, Wait, Up): self replies and a driver Active
        // reach (SelfUp, Active, Up); silence then requests Standby.
        let mut sm = activated_machine();
        sm.handle_link_state_change(LinkState::Up);

        sm.handle_mux_state_change(MuxState::Active);
        sm.handle_self_session_state_change(LinkProberState::SelfUp);
        assert_eq!(
            sm.composite(),
            CompositeState::new(LinkProberState::SelfUp, MuxState::Active, LinkState::Up)
        );
        assert_eq!(sm.health(), LinkManagerHealth::Healthy);

        let actions = sm.handle_self_session_state_change(LinkProberState::SelfDown);
        assert!(has_toggle(&actions, MuxState::Standby));
        assert_eq!(sm.composite().link_prober, LinkProberState::SelfDown);
    }

    #[test]
    fn test_default_route_na_shuts_probing() {
        let mut base = config();
        base.enable_default_route_feature = true;
        let mut sm = ActiveActiveStateMachine::new(base);
        sm.activate();
        sm.handle_link_state_change(LinkState::Up);
        sm.handle_mux_state_change(MuxState::Active);
        sm.handle_self_session_state_change(LinkProberState::SelfUp);

        let actions = sm.handle_default_route_change(DefaultRoute::Na);
        assert!(actions.contains(&Action::ShutdownTx));
        assert!(has_toggle(&actions, MuxState::Standby));
    }

    #[test]
    fn test_toggle_latched_while_wait() {
        let mut sm = activated_machine();
        sm.handle_link_state_change(LinkState::Up);
        sm.handle_mux_state_change(MuxState::Standby);
        let actions = sm.handle_self_session_state_change(LinkProberState::SelfUp);
        assert!(has_toggle(&actions, MuxState::Active));
        assert_eq!(sm.composite().mux, MuxState::Wait);

        // A second decision while the toggle is in flight must not call
        // the driver again.
        let actions = sm.handle_self_session_state_change(LinkProberState::SelfDown);
        assert!(!has_toggle(&actions, MuxState::Standby));

        // The driver confirms Active; the latched standby request runs.
        let actions = sm.handle_mux_state_change(MuxState::Active);
        assert!(has_toggle(&actions, MuxState::Standby));
    }

    #[test]
    fn test_manual_mode_suppresses_toggles() {
        let mut sm = activated_machine();
        sm.handle_link_state_change(LinkState::Up);
        sm.handle_mux_state_change(MuxState::Active);
        sm.handle_self_session_state_change(LinkProberState::SelfUp);
        sm.handle_mux_config(MuxMode::Manual);

        let actions = sm.handle_self_session_state_change(LinkProberState::SelfDown);
        assert!(!has_toggle(&actions, MuxState::Standby));
    }
}
