//! Metrics collection for simulation analysis.

use fanjoin::{Eui64, JoinState, PanId, Timestamp};
use hashbrown::HashMap;

/// Join state of every node at one instant.
#[derive(Debug, Clone)]
pub struct JoinSnapshot {
    pub time: Timestamp,
    pub states: HashMap<Eui64, JoinState>,
    pub pan_ids: HashMap<Eui64, Option<PanId>>,
    /// Routing parent, `None` for the border router and detached nodes.
    pub parents: HashMap<Eui64, Option<Eui64>>,
}

impl JoinSnapshot {
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            states: HashMap::new(),
            pan_ids: HashMap::new(),
            parents: HashMap::new(),
        }
    }

    pub fn record_node(
        &mut self,
        addr: Eui64,
        state: JoinState,
        pan_id: Option<PanId>,
        parent: Option<Eui64>,
    ) {
        self.states.insert(addr, state);
        self.pan_ids.insert(addr, pan_id);
        self.parents.insert(addr, parent);
    }

    pub fn joined_count(&self) -> usize {
        self.states.values().filter(|&&s| s == JoinState::Done).count()
    }

    /// Every node is attached and they all agree on one PAN.
    pub fn all_joined(&self) -> bool {
        !self.states.is_empty()
            && self.joined_count() == self.states.len()
            && self.pan_count() == 1
    }

    /// Distinct PAN ids among nodes that have one.
    pub fn pan_count(&self) -> usize {
        let mut pans: Vec<PanId> = self.pan_ids.values().flatten().copied().collect();
        pans.sort_unstable();
        pans.dedup();
        pans.len()
    }

    /// Hops from `addr` to a node without a parent. `None` on a loop.
    pub fn depth(&self, addr: Eui64) -> Option<usize> {
        let mut current = addr;
        for hops in 0..=self.parents.len() {
            match self.parents.get(&current).copied().flatten() {
                Some(parent) => current = parent,
                None => return Some(hops),
            }
        }
        None
    }

    pub fn max_depth(&self) -> usize {
        self.parents
            .keys()
            .filter_map(|&addr| self.depth(addr))
            .max()
            .unwrap_or(0)
    }
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    pub frames_sent: u64,
    /// Frames lost to link loss.
    pub frames_dropped: u64,
    pub frames_delivered: u64,
    pub auth_attempts: u64,
    pub probes_sent: u64,
    pub unreachable_reports: u64,
    /// Every time each node reported itself connected.
    pub connected_at: HashMap<Eui64, Vec<Timestamp>>,
    pub snapshots: Vec<JoinSnapshot>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, snapshot: JoinSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub(crate) fn record_connected(&mut self, addr: Eui64, time: Timestamp) {
        self.connected_at.entry(addr).or_default().push(time);
    }

    /// How many times `addr` reported itself connected.
    pub fn connect_count(&self, addr: &Eui64) -> usize {
        self.connected_at.get(addr).map_or(0, Vec::len)
    }

    /// First snapshot in which every node had joined.
    pub fn convergence_time(&self) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|s| s.all_joined())
            .map(|s| s.time)
    }

    pub fn latest_snapshot(&self) -> Option<&JoinSnapshot> {
        self.snapshots.last()
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub end_time: Timestamp,
    pub metrics: SimMetrics,
    /// Simulation stopped because nothing was left to do.
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Every node ended attached to the same PAN.
    pub fn converged(&self) -> bool {
        self.metrics
            .latest_snapshot()
            .is_some_and(JoinSnapshot::all_joined)
    }

    pub fn final_joined_count(&self) -> usize {
        self.metrics
            .latest_snapshot()
            .map_or(0, JoinSnapshot::joined_count)
    }

    pub fn final_max_depth(&self) -> usize {
        self.metrics
            .latest_snapshot()
            .map_or(0, JoinSnapshot::max_depth)
    }
}
