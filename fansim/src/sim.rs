//! Discrete event simulator for fanjoin engines.

use std::collections::BinaryHeap;

use fanjoin::{
    AuthResult, BootstrapConfig, Command, Duration, Error, Eui64, Event, FrameKind, JoinState,
    JoinStatus, PanId, ProbeKind, Role, RoutingEvent, Timestamp, TICK,
};
use hashbrown::HashMap;

use crate::event::{ScenarioAction, ScheduledEvent, SequenceNumber, SimEvent};
use crate::metrics::{JoinSnapshot, SimMetrics, SimulationResult};
use crate::node::SimNode;
use crate::topology::Topology;

/// PAN rooted by every simulated border router.
pub const SIM_PAN_ID: PanId = 0x0F0F;

/// Network name shared by every simulated node.
pub const SIM_NETWORK_NAME: &str = "sim";

/// Registration lifetime handed out by simulated parents.
const REGISTRATION_LIFETIME: Duration = Duration::from_secs(7200);

/// Rank step per hop.
const RANK_INCREASE: u16 = 256;

/// Discrete event simulator for fanjoin networks.
///
/// Engines are driven directly through `handle_event`. Everything outside
/// the engine (security handshake, routing registration, probe answers)
/// is scripted from the commands each engine emits.
pub struct Simulator {
    nodes: HashMap<Eui64, SimNode>,
    topology: Topology,
    current_time: Timestamp,
    event_queue: BinaryHeap<ScheduledEvent>,
    metrics: SimMetrics,
    next_seq: u64,
    /// RNG state for frame loss.
    rng_state: u64,
    snapshot_interval: Option<Duration>,
    next_snapshot: Option<Timestamp>,
    /// Time from AuthStart to AuthResult.
    auth_delay: Duration,
    /// Time from RegisterAddress to DaoDone.
    dao_delay: Duration,
    /// Template every node's configuration is derived from.
    config: BootstrapConfig,
}

impl Simulator {
    pub fn new(seed: u64) -> Self {
        let mut config = BootstrapConfig::default();
        config.network_name = SIM_NETWORK_NAME.into();
        Self {
            nodes: HashMap::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            rng_state: seed,
            snapshot_interval: None,
            next_snapshot: None,
            auth_delay: Duration::from_secs(1),
            dao_delay: Duration::from_secs(2),
            config,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    /// Replace the configuration template. Role and PAN id are set per node.
    pub fn with_config(mut self, config: BootstrapConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_auth_delay(mut self, delay: Duration) -> Self {
        self.auth_delay = delay;
        self
    }

    /// Add a node and bring its interface up.
    pub fn add_node(&mut self, addr: Eui64, role: Role, seed: u64) -> Result<(), Error> {
        let mut config = self.config.clone();
        config.role = role;
        if role == Role::BorderRouter && config.pan_id.is_none() {
            config.pan_id = Some(SIM_PAN_ID);
        }

        let mut node = SimNode::new(addr, config, seed, self.current_time)?;
        node.handle_event(Event::DiscoveryStart, self.current_time);
        self.nodes.insert(addr, node);
        self.process_commands(addr);
        self.schedule(self.current_time + TICK, SimEvent::Tick { node: addr });
        Ok(())
    }

    pub fn node(&self, addr: &Eui64) -> Option<&SimNode> {
        self.nodes.get(addr)
    }

    pub fn node_mut(&mut self, addr: &Eui64) -> Option<&mut SimNode> {
        self.nodes.get_mut(addr)
    }

    /// All node addresses, sorted.
    pub fn node_addrs(&self) -> Vec<Eui64> {
        let mut addrs: Vec<Eui64> = self.nodes.keys().copied().collect();
        addrs.sort_unstable();
        addrs
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    pub fn schedule(&mut self, time: Timestamp, event: SimEvent) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, SimEvent::ScenarioAction(action));
    }

    /// Hand `event` to `node` after `delay`.
    fn deliver_later(&mut self, node: Eui64, delay: Duration, event: Event) {
        self.schedule(self.current_time + delay, SimEvent::Deliver { node, event });
    }

    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while self.event_queue.peek().is_some_and(|e| e.time <= end_time) {
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
            self.maybe_take_snapshot();
        }

        self.advance_time(end_time);
        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_event(&mut self, event: SimEvent) {
        match event {
            SimEvent::FrameDelivery { to, frame } => {
                self.feed(to, Event::Frame(frame));
                self.metrics.frames_delivered += 1;
            }
            SimEvent::Tick { node } => {
                if self.nodes.contains_key(&node) {
                    self.feed(node, Event::Tick);
                    self.schedule(self.current_time + TICK, SimEvent::Tick { node });
                }
            }
            SimEvent::Deliver { node, event } => self.feed(node, event),
            SimEvent::ScenarioAction(action) => self.execute_action(action),
        }
    }

    /// Run one event through a node, then serve whatever it asked for.
    fn feed(&mut self, addr: Eui64, event: Event) {
        let now = self.current_time;
        match self.nodes.get_mut(&addr) {
            Some(node) => node.handle_event(event, now),
            None => return,
        }
        self.process_commands(addr);
    }

    fn process_commands(&mut self, addr: Eui64) {
        let commands = match self.nodes.get(&addr) {
            Some(node) => node.take_commands(),
            None => return,
        };
        for command in commands {
            self.serve_command(addr, command);
        }
    }

    fn serve_command(&mut self, addr: Eui64, command: Command) {
        match command {
            Command::Transmit(request) => self.broadcast(addr, request.kind),
            Command::AuthStart { pan_id, target } => self.authenticate(addr, pan_id, target),
            Command::RegisterAddress { parent } => self.register(addr, parent),
            Command::Poison { .. } => {
                if let Some(node) = self.nodes.get_mut(&addr) {
                    node.routing_mut().detach();
                }
                self.deliver_later(
                    addr,
                    Duration::from_secs(1),
                    Event::Routing(RoutingEvent::PoisonFinished),
                );
            }
            Command::SendProbe { addr: target, kind } => self.probe(addr, target, kind),
            Command::Status(JoinStatus::Connected) => {
                self.metrics.record_connected(addr, self.current_time);
            }
            Command::NeighborUnreachable(neighbor) => {
                log::debug!("{:02x?} lost neighbor {:02x?}", addr, neighbor);
                self.metrics.unreachable_reports += 1;
            }
            // Schedules, snapshots and persistence have no simulated effect.
            _ => {}
        }
    }

    /// Put the sender's current frame of `kind` on air.
    fn broadcast(&mut self, sender: Eui64, kind: FrameKind) {
        let frame = match self.nodes.get(&sender) {
            Some(node) => node.outbound_frame(kind),
            None => return,
        };
        self.metrics.frames_sent += 1;

        let mut deliveries = Vec::new();
        for neighbor in self.topology.neighbors(sender) {
            let Some(link) = self.topology.get_link(sender, neighbor) else {
                continue;
            };
            let (loss_rate, delay, rssi) = (link.loss_rate, link.delay, link.rssi);
            if loss_rate > 0.0 && self.random_f64() < loss_rate {
                self.metrics.frames_dropped += 1;
                continue;
            }
            deliveries.push((neighbor, delay, rssi));
        }

        for (neighbor, delay, rssi) in deliveries {
            let mut frame = frame.clone();
            frame.rssi = rssi;
            self.schedule(
                self.current_time + delay,
                SimEvent::FrameDelivery {
                    to: neighbor,
                    frame,
                },
            );
        }
    }

    /// Succeeds when the target is in range and already attached to the PAN.
    fn authenticate(&mut self, addr: Eui64, pan_id: PanId, target: Eui64) {
        self.metrics.auth_attempts += 1;
        let authenticator_ready = self.topology.is_connected(addr, target)
            && self
                .nodes
                .get(&target)
                .is_some_and(|t| t.is_joined() && t.pan_id() == Some(pan_id));
        let result = if authenticator_ready {
            AuthResult::Ok
        } else {
            AuthResult::TxError(target)
        };
        self.deliver_later(addr, self.auth_delay, Event::AuthResult(result));
    }

    /// Attach below `parent` and register both ends as neighbors.
    fn register(&mut self, addr: Eui64, parent: Eui64) {
        let parent_cost = self
            .nodes
            .get(&parent)
            .filter(|_| self.topology.is_connected(addr, parent))
            .map(SimNode::routing_cost);
        let Some(parent_cost) = parent_cost else {
            self.deliver_later(
                addr,
                self.dao_delay,
                Event::Routing(RoutingEvent::NoMoreDiscovery),
            );
            return;
        };

        if let Some(node) = self.nodes.get_mut(&addr) {
            node.routing_mut()
                .attach(parent, parent_cost.saturating_add(RANK_INCREASE));
        }
        let delay = self
            .topology
            .get_link(addr, parent)
            .map_or(Duration::ZERO, |link| link.delay);
        self.deliver_later(
            addr,
            delay,
            Event::NeighborRegistered {
                addr: parent,
                lifetime: REGISTRATION_LIFETIME,
                child: false,
            },
        );
        self.deliver_later(
            parent,
            delay,
            Event::NeighborRegistered {
                addr,
                lifetime: REGISTRATION_LIFETIME,
                child: true,
            },
        );
        self.deliver_later(addr, self.dao_delay, Event::Routing(RoutingEvent::DaoDone));
    }

    fn probe(&mut self, addr: Eui64, target: Eui64, kind: ProbeKind) {
        self.metrics.probes_sent += 1;
        let acked = self.nodes.contains_key(&target) && self.topology.is_connected(addr, target);
        let delay = self
            .topology
            .get_link(addr, target)
            .map_or(Duration::ZERO, |link| link.delay);

        self.deliver_later(
            addr,
            delay,
            Event::ProbeStatus {
                addr: target,
                acked,
            },
        );
        if acked {
            let answer = match kind {
                ProbeKind::Unreachability => Event::ProbeResponse { addr: target },
                ProbeKind::LinkQuality => Event::EtxSample { addr: target },
            };
            self.deliver_later(addr, delay + delay, answer);
        }
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        log::debug!("t={:?} scenario action {:?}", self.current_time, action);
        match action {
            ScenarioAction::Partition { groups } => self.topology.partition(&groups),
            ScenarioAction::HealPartition => self.topology.heal(),
            ScenarioAction::DisableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { from, to, rate } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
            ScenarioAction::Disconnect { node, fast } => {
                self.feed(node, Event::Disconnect { fast });
            }
            ScenarioAction::TakeSnapshot => self.take_snapshot(),
        }
    }

    fn maybe_take_snapshot(&mut self) {
        if let Some(next) = self.next_snapshot {
            if self.current_time >= next {
                self.take_snapshot();
                if let Some(interval) = self.snapshot_interval {
                    self.next_snapshot = Some(next + interval);
                }
            }
        }
    }

    pub fn take_snapshot(&mut self) {
        let mut snapshot = JoinSnapshot::new(self.current_time);
        for (&addr, node) in &self.nodes {
            snapshot.record_node(addr, node.state(), node.pan_id(), node.parent());
        }
        self.metrics.add_snapshot(snapshot);
    }

    /// Nodes currently in `state`, sorted.
    pub fn nodes_in(&self, state: JoinState) -> Vec<Eui64> {
        let mut addrs: Vec<Eui64> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.state() == state)
            .map(|(&a, _)| a)
            .collect();
        addrs.sort_unstable();
        addrs
    }

    /// Uniform in [0, 1).
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        ((self.rng_state >> 11) as f64) / ((1u64 << 53) as f64)
    }
}
