//! Event types and priority queue ordering for the join simulator.

use std::cmp::Ordering;

use fanjoin::{Eui64, Event, Frame, Timestamp};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Partition the network into isolated groups.
    Partition { groups: Vec<Vec<Eui64>> },
    /// Heal all partitions (restore full connectivity).
    HealPartition,
    /// Disable a specific link.
    DisableLink { from: Eui64, to: Eui64 },
    /// Enable a specific link.
    EnableLink { from: Eui64, to: Eui64 },
    /// Set loss rate on a link.
    SetLossRate { from: Eui64, to: Eui64, rate: f64 },
    /// Administrative disconnect of one node.
    Disconnect { node: Eui64, fast: bool },
    /// Take a join snapshot for metrics.
    TakeSnapshot,
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// A frame arrives at a node's radio.
    FrameDelivery { to: Eui64, frame: Frame },
    /// Periodic engine tick for a node.
    Tick { node: Eui64 },
    /// A scripted collaborator answers (auth, routing, probe outcome).
    Deliver { node: Eui64, event: Event },
    /// Execute a scenario action.
    ScenarioAction(ScenarioAction),
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: Timestamp,
    /// Tie-breaker for events at the same time.
    pub seq: SequenceNumber,
    pub event: SimEvent,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: SimEvent) -> Self {
        Self { time, seq, event }
    }
}

// BinaryHeap is a max-heap; reverse for earliest-first.
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
