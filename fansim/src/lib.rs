//! fansim - Discrete event simulator for fanjoin bootstrap testing.
//!
//! Runs many real fanjoin engines in one process against a scripted
//! radio, security handshake and routing layer, without real-time delays.
//!
//! # Features
//!
//! - **Discrete event simulation**: deterministic ordering by (time, sequence)
//! - **Real engines**: every node is an unmodified `fanjoin::Engine`
//! - **Configurable topology**: fully connected, chain, star, or custom
//! - **Link properties**: RSSI, frame loss, delay per link
//! - **Scenario builder**: partitions, healing and administrative disconnects
//! - **Metrics collection**: join snapshots, frame counts, convergence time
//!
//! # Example
//!
//! ```
//! use fansim::{simple_scenario, Duration};
//!
//! // A border router and two routers, run for twenty minutes
//! let result = simple_scenario(3)
//!     .with_seed(42)
//!     .run_for(Duration::from_secs(1200));
//!
//! assert!(result.converged());
//! ```
//!
//! # Architecture
//!
//! The simulator pops the earliest event, feeds it to the addressed engine
//! through `handle_event`, then drains that engine's command queue:
//!
//! - `Transmit` becomes frame deliveries to every in-range neighbor
//! - `AuthStart` succeeds after a delay if the target is attached
//! - `RegisterAddress` attaches the node below its parent and answers `DaoDone`
//! - `SendProbe` is acknowledged while the link is up
//! - `Poison` detaches the node and answers `PoisonFinished`

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

pub use event::{ScenarioAction, ScheduledEvent, SimEvent};
pub use fanjoin::{Duration, Eui64, JoinState, Timestamp};
pub use metrics::{JoinSnapshot, SimMetrics, SimulationResult};
pub use node::SimNode;
pub use scenario::{node_addr, simple_scenario, ScenarioBuilder};
pub use sim::{Simulator, SIM_PAN_ID};
pub use topology::{Link, Topology};

#[cfg(test)]
mod tests {
    use fanjoin::debug::DebugEvent;

    use super::*;

    #[test]
    fn test_single_border_router_converges() {
        let result = ScenarioBuilder::new(1)
            .fully_connected()
            .run_for(Duration::from_secs(5));

        let snapshot = result.metrics.latest_snapshot().unwrap();
        assert!(result.converged());
        assert_eq!(snapshot.pan_count(), 1);
        assert_eq!(snapshot.pan_ids.get(&node_addr(0)), Some(&Some(SIM_PAN_ID)));
    }

    /// Hub border router, five routers that only hear the hub.
    #[test]
    fn test_star_joins_below_hub() {
        let (mut sim, nodes) = ScenarioBuilder::new(6)
            .with_seed(7)
            .star_topology()
            .with_snapshot_interval(Duration::from_secs(30))
            .build();

        let result = sim.run_for(Duration::from_secs(1200));

        assert!(result.converged(), "star should join within 20 minutes");
        assert_eq!(result.final_joined_count(), 6);
        assert_eq!(result.final_max_depth(), 1);
        for spoke in &nodes[1..] {
            assert_eq!(sim.node(spoke).and_then(|n| n.parent()), Some(nodes[0]));
        }
        assert!(result.metrics.convergence_time().is_some());
    }

    /// Border router at one end of a four node chain.
    #[test]
    fn test_chain_joins_hop_by_hop() {
        let (mut sim, nodes) = ScenarioBuilder::new(4)
            .with_seed(42)
            .chain_topology()
            .build();

        let result = sim.run_for(Duration::from_secs(1800));

        assert!(result.converged(), "chain should join within 30 minutes");
        assert_eq!(result.final_max_depth(), 3);
        for pair in nodes.windows(2) {
            assert_eq!(sim.node(&pair[1]).and_then(|n| n.parent()), Some(pair[0]));
        }
        let costs: Vec<u16> = nodes
            .iter()
            .filter_map(|a| sim.node(a).map(|n| n.routing_cost()))
            .collect();
        assert_eq!(costs, [0, 256, 512, 768]);
    }

    #[test]
    fn test_disconnect_then_rejoin() {
        let (mut sim, nodes) = simple_scenario(2)
            .with_seed(3)
            .disconnect_at(Timestamp::from_secs(600), 1, true)
            .build();

        let joined = sim.run_until(Timestamp::from_secs(599));
        assert!(joined.converged());

        sim.run_until(Timestamp::from_secs(602));
        let router = sim.node(&nodes[1]).unwrap();
        assert!(!router.is_joined());
        assert_eq!(router.parent(), None);

        let result = sim.run_until(Timestamp::from_secs(1800));
        assert!(result.converged(), "router should rejoin after leaving");
        assert_eq!(result.metrics.connect_count(&nodes[1]), 2);
    }

    #[test]
    fn test_debug_trace_records_join_path() {
        let (mut sim, nodes) = simple_scenario(2).with_seed(11).build();
        sim.run_for(Duration::from_secs(900));

        let events = sim.node(&nodes[1]).unwrap().take_debug_events();
        let states: Vec<JoinState> = events
            .iter()
            .filter_map(|e| match e {
                DebugEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect();
        assert_eq!(states.first(), Some(&JoinState::ActiveScan));
        assert_eq!(states.last(), Some(&JoinState::Done));
        assert!(events
            .iter()
            .any(|e| matches!(e, DebugEvent::ConfigurationLearned { .. })));
    }

    #[test]
    fn test_partition_during_scan_delays_join() {
        let result = simple_scenario(3)
            .with_seed(5)
            .partition_at(Timestamp::ZERO, vec![vec![0], vec![1, 2]])
            .run_for(Duration::from_secs(600));

        assert!(!result.converged());
        assert_eq!(result.final_joined_count(), 1);
        assert_eq!(result.metrics.auth_attempts, 0);
    }
}
