//! Per-port event loop plumbing.
//!
//! Every port owns one serialized event loop: a spawned task draining an
//! unbounded channel of [`PortEvent`]s. State-store updates, driver
//! notifications, received frames and timer expiries all arrive as events,
//! so all per-port state is touched from exactly one task.
//!
//! Timers are generation-stamped: arming bumps the generation and spawns a
//! sleep task that posts `Timer { kind, generation }` back to the channel.
//! A handler compares the carried generation against the current one and
//! ignores stale completions, which makes cancelled timers inert without
//! any cross-task synchronization.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use mux_types::{DefaultRoute, LinkState, MacAddress, MuxMode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::mux_state::MuxNotification;

/// Timers owned by a port. Prober timers (interval, suspend, switchover)
/// and composite timers (mux wait/probe, peer wait, oscillation) share the
/// same mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Heartbeat cadence.
    ProbeInterval,
    /// TX suspension window.
    Suspend,
    /// Switchover-measurement window (decreased interval active).
    Switchover,
    /// Bound on how long a MUX toggle may stay unanswered.
    MuxWait,
    /// Cadence for re-probing an uncertain driver.
    MuxProbe,
    /// Bound on a peer-side toggle (active/active).
    PeerMuxWait,
    /// Admin-forwarding periodic sync (active/active).
    Oscillation,
}

/// Everything a port's event loop consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A frame accepted by the prober's receive filter.
    RxFrame(Vec<u8>),
    /// A timer completion; stale generations are ignored.
    Timer { kind: TimerKind, generation: u64 },

    // State-store inputs.
    ServerIpv4(Ipv4Addr),
    SoCIpv4(Ipv4Addr),
    ServerMac(MacAddress),
    TorMac(MacAddress),
    LinkState(LinkState),
    PeerLinkState(LinkState),
    PeerMuxState(mux_types::MuxState),
    MuxMode(MuxMode),
    DefaultRoute(DefaultRoute),
    ResetPckLossCount,

    // Driver notifications.
    MuxStateNotification(MuxNotification),
    ProbeMuxStateNotification(MuxNotification),
    GetMuxStateNotification(MuxNotification),

    /// Stop the port's event loop.
    Shutdown,
}

/// Sender half of a port's event channel.
pub type PortSender = mpsc::UnboundedSender<PortEvent>;
/// Receiver half of a port's event channel.
pub type PortReceiver = mpsc::UnboundedReceiver<PortEvent>;

/// Create a port event channel.
pub fn port_channel() -> (PortSender, PortReceiver) {
    mpsc::unbounded_channel()
}

/// One generation-stamped timer.
struct PortTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl PortTimer {
    fn new() -> Self {
        Self {
            generation: 0,
            handle: None,
        }
    }
}

/// The set of timers owned by one port.
///
/// Arming a kind cancels its previous instance; the stale completion, if
/// already queued, fails the generation check and is dropped.
pub struct TimerService {
    sender: PortSender,
    timers: HashMap<TimerKind, PortTimer>,
}

impl TimerService {
    pub fn new(sender: PortSender) -> Self {
        Self {
            sender,
            timers: HashMap::new(),
        }
    }

    /// The port event channel this service posts completions to.
    pub fn sender(&self) -> PortSender {
        self.sender.clone()
    }

    /// Arm `kind` to fire once after `duration`.
    pub fn arm(&mut self, kind: TimerKind, duration: Duration) {
        let timer = self.timers.entry(kind).or_insert_with(PortTimer::new);
        if let Some(handle) = timer.handle.take() {
            handle.abort();
        }
        timer.generation += 1;
        let generation = timer.generation;
        let sender = self.sender.clone();
        timer.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = sender.send(PortEvent::Timer { kind, generation });
        }));
    }

    /// Disarm `kind`; an in-flight completion becomes stale.
    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(timer) = self.timers.get_mut(&kind) {
            if let Some(handle) = timer.handle.take() {
                handle.abort();
            }
            timer.generation += 1;
        }
    }

    /// True if `generation` is the live generation for `kind`.
    pub fn is_current(&self, kind: TimerKind, generation: u64) -> bool {
        self.timers
            .get(&kind)
            .map(|t| t.generation == generation)
            .unwrap_or(false)
    }

    /// True if `kind` currently has a live (unfired, uncancelled) timer.
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.timers
            .get(&kind)
            .and_then(|t| t.handle.as_ref())
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        for timer in self.timers.values_mut() {
            if let Some(handle) = timer.handle.take() {
                handle.abort();
            }
        }
    }
}
