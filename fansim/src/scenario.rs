//! Scenario builder for setting up and running simulations.

use fanjoin::{Duration, Eui64, Role, Timestamp};

use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::sim::Simulator;
use crate::topology::Topology;

/// Type of topology to generate.
#[derive(Debug, Clone)]
enum TopologyType {
    FullyConnected,
    /// Each node hears only its neighbors in index order.
    Chain,
    /// Node 0 is the hub.
    Star,
    Custom(Topology),
}

/// Address of the node at `index`.
pub fn node_addr(index: usize) -> Eui64 {
    [0x02, 0, 0, 0, 0, 0, (index >> 8) as u8, index as u8]
}

/// Builder for simulation scenarios.
///
/// Node 0 is the border router; every other node is a router unless
/// overridden with [`ScenarioBuilder::with_role`].
pub struct ScenarioBuilder {
    num_nodes: usize,
    seed: u64,
    /// Must be set before `build`.
    topology_type: Option<TopologyType>,
    loss_rate: f64,
    delay: Duration,
    roles: Vec<(usize, Role)>,
    /// Actions with node indices in place of addresses.
    actions: Vec<(Timestamp, ScenarioAction)>,
    snapshot_interval: Option<Duration>,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ScenarioBuilder {
    /// Create a scenario with `num_nodes` nodes.
    ///
    /// A topology must be chosen before calling `build()`.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            seed: 42,
            topology_type: None,
            loss_rate: 0.0,
            delay: Duration::from_millis(5),
            roles: Vec::new(),
            actions: Vec::new(),
            snapshot_interval: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn topology(mut self, topo: Topology) -> Self {
        self.topology_type = Some(TopologyType::Custom(topo));
        self
    }

    pub fn fully_connected(mut self) -> Self {
        self.topology_type = Some(TopologyType::FullyConnected);
        self
    }

    pub fn chain_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Chain);
        self
    }

    pub fn star_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Star);
        self
    }

    pub fn with_role(mut self, index: usize, role: Role) -> Self {
        self.roles.push((index, role));
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    /// Partition the network at `time` into groups of node indices.
    pub fn partition_at(mut self, time: Timestamp, groups: Vec<Vec<usize>>) -> Self {
        let groups = groups
            .into_iter()
            .map(|g| g.into_iter().map(node_addr).collect())
            .collect();
        self.actions
            .push((time, ScenarioAction::Partition { groups }));
        self
    }

    pub fn heal_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, ScenarioAction::HealPartition));
        self
    }

    /// Administratively disconnect node `index` at `time`.
    pub fn disconnect_at(mut self, time: Timestamp, index: usize, fast: bool) -> Self {
        self.actions.push((
            time,
            ScenarioAction::Disconnect {
                node: node_addr(index),
                fast,
            },
        ));
        self
    }

    pub fn snapshot_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, ScenarioAction::TakeSnapshot));
        self
    }

    fn role_of(&self, index: usize) -> Role {
        self.roles
            .iter()
            .rev()
            .find(|(i, _)| *i == index)
            .map(|&(_, role)| role)
            .unwrap_or(if index == 0 {
                Role::BorderRouter
            } else {
                Role::Router
            })
    }

    /// Build the simulator with all nodes and topology.
    ///
    /// # Panics
    ///
    /// Panics if no topology was chosen or a node fails bring-up.
    pub fn build(self) -> (Simulator, Vec<Eui64>) {
        let addrs: Vec<Eui64> = (0..self.num_nodes).map(node_addr).collect();

        let mut topo = match self.topology_type.clone() {
            Some(TopologyType::FullyConnected) => Topology::fully_connected(&addrs),
            Some(TopologyType::Chain) => Topology::chain(&addrs),
            Some(TopologyType::Star) => Topology::star(&addrs),
            Some(TopologyType::Custom(t)) => t,
            None => panic!(
                "Topology must be explicitly specified. \
                Use .fully_connected(), .chain_topology(), .star_topology() or .topology()"
            ),
        };
        if self.loss_rate > 0.0 {
            topo.set_global_loss_rate(self.loss_rate);
        }
        topo.set_global_delay(self.delay);

        let mut sim = Simulator::new(self.seed).with_topology(topo);
        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }

        for (i, &addr) in addrs.iter().enumerate() {
            let node_seed = self.seed.wrapping_add(i as u64 * 1000);
            if let Err(e) = sim.add_node(addr, self.role_of(i), node_seed) {
                panic!("node {} failed bring-up: {}", i, e);
            }
        }

        for (time, action) in self.actions {
            sim.schedule_action(time, action);
        }

        (sim, addrs)
    }

    pub fn run_for(self, duration: Duration) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_for(duration)
    }

    pub fn run_until(self, time: Timestamp) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_until(time)
    }
}

/// A border router plus `num_nodes - 1` routers, all in range of each other.
pub fn simple_scenario(num_nodes: usize) -> ScenarioBuilder {
    ScenarioBuilder::new(num_nodes).fully_connected()
}
