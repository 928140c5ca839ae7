//! Shared test harness: a fake port that wires the real child state
//! machines to the real composite and records every action the composite
//! requests, the way the port runtime would interpret them.

#![allow(dead_code)]

use std::time::Duration;

use mux_types::{
    DefaultRoute, LinkManagerHealth, LinkProberState, LinkState, MuxMode, MuxState, PortCableType,
};
use sonic_linkmgrd::config::MuxPortConfig;
use sonic_linkmgrd::link_manager::{
    Action, ActiveStandbyStateMachine, CompositeState, SwitchCause, SwitchingPhase,
};
use sonic_linkmgrd::link_prober::{LinkProberStateMachine, ProberEvent};
use sonic_linkmgrd::link_state::LinkStateMachine;
use sonic_linkmgrd::mux_state::{MuxNotification, MuxStateMachine};
use sonic_linkmgrd::port_event::TimerKind;

pub fn test_config() -> MuxPortConfig {
    let mut config = MuxPortConfig::new("Ethernet0", 0)
        .with_cable_type(PortCableType::ActiveStandby)
        .with_retry_counts(2, 2, 2, 2);
    config.tor_mac = "04:3f:72:00:00:01".parse().unwrap();
    config.vlan_mac = "04:3f:72:00:00:02".parse().unwrap();
    config.server_mac = "b8:ce:f6:00:00:09".parse().unwrap();
    config.loopback_ipv4 = "10.212.64.1".parse().unwrap();
    config.server_ipv4 = "192.168.0.2".parse().unwrap();
    config
}

/// An active/standby port with real children and composite, fake edges.
pub struct FakeMuxPort {
    pub prober_sm: LinkProberStateMachine,
    pub mux_sm: MuxStateMachine,
    pub link_sm: LinkStateMachine,
    pub composite: ActiveStandbyStateMachine,
    pub actions: Vec<Action>,
    pub suspended: bool,
}

impl FakeMuxPort {
    pub fn new(config: MuxPortConfig) -> Self {
        Self {
            prober_sm: LinkProberStateMachine::new(
                &config.port_name,
                LinkProberState::Wait,
                config.positive_state_change_retry_count,
                config.negative_state_change_retry_count,
            ),
            mux_sm: MuxStateMachine::new(
                &config.port_name,
                MuxState::Wait,
                config.mux_state_change_retry_count,
            ),
            link_sm: LinkStateMachine::new(
                &config.port_name,
                LinkState::Down,
                config.link_state_change_retry_count,
            ),
            composite: ActiveStandbyStateMachine::new(config),
            actions: Vec::new(),
            suspended: false,
        }
    }

    pub fn activated() -> Self {
        let mut port = Self::new(test_config());
        port.activate();
        port
    }

    pub fn activate(&mut self) {
        let actions = self.composite.activate();
        self.absorb(actions);
    }

    /// Mirror the interpretation the port runtime performs on the
    /// machinery the harness owns, then record the action.
    fn absorb(&mut self, actions: Vec<Action>) {
        for action in actions {
            match &action {
                Action::EnterProberState(label) => self.prober_sm.enter(*label),
                Action::SetMuxState(_) => self.mux_sm.enter(MuxState::Wait),
                Action::SuspendTx(_) => self.suspended = true,
                Action::ResumeTx => self.suspended = false,
                _ => {}
            }
            self.actions.push(action);
        }
    }

    pub fn clear_actions(&mut self) {
        self.actions.clear();
    }

    // --- event feeds ------------------------------------------------------

    pub fn post_link(&mut self, state: LinkState, times: u32) {
        for _ in 0..times {
            if let Some(label) = self.link_sm.handle_notification(state) {
                let actions = self.composite.handle_link_state_change(label);
                self.absorb(actions);
            }
        }
    }

    pub fn post_prober(&mut self, event: ProberEvent, times: u32) {
        for _ in 0..times {
            if let Some(label) = self.prober_sm.handle_event(event) {
                let actions = self.composite.handle_link_prober_state_change(label);
                self.absorb(actions);
            }
        }
    }

    pub fn post_mux_notification(&mut self, notification: MuxNotification, times: u32) {
        for _ in 0..times {
            let step = self.mux_sm.handle_notification(notification);
            if let Some(label) = step.new_label {
                let actions = self.composite.handle_mux_state_change(label);
                self.absorb(actions);
            }
        }
    }

    /// A direct driver probe reply (bypasses the debounce).
    pub fn probe_reply(&mut self, label: MuxState) {
        self.mux_sm.enter(label);
        let actions = self.composite.handle_probe_mux_notification(label);
        self.absorb(actions);
    }

    pub fn set_mux_mode(&mut self, mode: MuxMode) {
        let actions = self.composite.handle_mux_config(mode);
        self.absorb(actions);
    }

    pub fn set_default_route(&mut self, route: DefaultRoute) {
        let actions = self.composite.handle_default_route_change(route);
        self.absorb(actions);
    }

    pub fn receive_switch_active_command(&mut self) {
        let actions = self.composite.handle_switch_active_request();
        self.absorb(actions);
    }

    pub fn switch_command_sent(&mut self) {
        let actions = self.composite.handle_switch_active_command_completion();
        self.absorb(actions);
    }

    pub fn fire_suspend_timer(&mut self) {
        self.suspended = false;
        let actions = self.composite.handle_suspend_timer_expiry();
        self.absorb(actions);
    }

    pub fn fire_mux_wait_timer(&mut self) {
        let actions = self.composite.handle_mux_wait_timeout();
        self.absorb(actions);
    }

    pub fn fire_mux_probe_timer(&mut self) {
        let actions = self.composite.handle_mux_probe_timeout();
        self.absorb(actions);
    }

    /// Reach (Active, Active, Up) steady state the way scenario S1 does.
    pub fn to_active_steady(&mut self) {
        self.post_link(LinkState::Up, 2);
        self.post_prober(ProberEvent::IcmpSelf, 2);
        self.post_mux_notification(MuxNotification::Active, 2);
        assert_eq!(
            self.composite.composite(),
            CompositeState::new(LinkProberState::Active, MuxState::Active, LinkState::Up)
        );
        self.clear_actions();
    }

    // --- assertions -------------------------------------------------------

    pub fn composite(&self) -> CompositeState {
        self.composite.composite()
    }

    pub fn health(&self) -> LinkManagerHealth {
        self.composite.health()
    }

    pub fn toggles_to(&self, target: MuxState) -> usize {
        self.actions
            .iter()
            .filter(|a| **a == Action::SetMuxState(target))
            .count()
    }

    pub fn toggle_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::SetMuxState(_)))
            .count()
    }

    pub fn probe_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::ProbeMux))
            .count()
    }

    pub fn switching_starts(&self) -> Vec<SwitchCause> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::PublishSwitchingMetric {
                    phase: SwitchingPhase::Start,
                    cause,
                } => Some(*cause),
                _ => None,
            })
            .collect()
    }

    pub fn switching_ends(&self) -> Vec<SwitchCause> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::PublishSwitchingMetric {
                    phase: SwitchingPhase::End,
                    cause,
                } => Some(*cause),
                _ => None,
            })
            .collect()
    }

    pub fn suspend_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::SuspendTx(_)))
            .count()
    }

    pub fn timer_factors(&self, kind: TimerKind) -> Vec<u32> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::StartTimer { kind: k, factor } if *k == kind => Some(*factor),
                _ => None,
            })
            .collect()
    }

    pub fn has_action(&self, action: &Action) -> bool {
        self.actions.contains(action)
    }

    pub fn suspend_duration(&self) -> Option<Duration> {
        self.actions.iter().find_map(|a| match a {
            Action::SuspendTx(d) => Some(*d),
            _ => None,
        })
    }
}
