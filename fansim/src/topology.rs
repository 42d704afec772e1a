//! Radio topology and link properties.

use fanjoin::{Duration, Eui64};
use hashbrown::HashMap;

/// Properties of a radio link between two nodes.
#[derive(Debug, Clone)]
pub struct Link {
    /// Received signal strength in dBm, both directions.
    pub rssi: i16,
    /// Frame loss rate (0.0 to 1.0).
    pub loss_rate: f64,
    /// Air time plus processing delay.
    pub delay: Duration,
    /// Whether the link is currently up.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            rssi: -70,
            loss_rate: 0.0,
            delay: Duration::from_millis(5),
            active: true,
        }
    }
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
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
}

/// Who can hear whom.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Bidirectional links keyed by (lower, higher) address.
    links: HashMap<(Eui64, Eui64), Link>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every node hears every other node.
    pub fn fully_connected(nodes: &[Eui64]) -> Self {
        let mut topo = Self::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                topo.add_link(a, b, Link::default());
            }
        }
        topo
    }

    /// Each node hears only its predecessor and successor.
    pub fn chain(nodes: &[Eui64]) -> Self {
        let mut topo = Self::new();
        for pair in nodes.windows(2) {
            topo.add_link(pair[0], pair[1], Link::default());
        }
        topo
    }

    /// The first node hears everyone; the rest hear only the first.
    pub fn star(nodes: &[Eui64]) -> Self {
        let mut topo = Self::new();
        let Some((&hub, spokes)) = nodes.split_first() else {
            return topo;
        };
        for &spoke in spokes {
            topo.add_link(hub, spoke, Link::default());
        }
        topo
    }

    pub fn add_link(&mut self, a: Eui64, b: Eui64, link: Link) {
        self.links.insert(Self::canonical_pair(a, b), link);
    }

    pub fn get_link(&self, a: Eui64, b: Eui64) -> Option<&Link> {
        self.links.get(&Self::canonical_pair(a, b))
    }

    pub fn get_link_mut(&mut self, a: Eui64, b: Eui64) -> Option<&mut Link> {
        self.links.get_mut(&Self::canonical_pair(a, b))
    }

    /// Link exists and is up.
    pub fn is_connected(&self, a: Eui64, b: Eui64) -> bool {
        self.get_link(a, b).is_some_and(|link| link.active)
    }

    /// Nodes reachable from `node` over active links, in address order.
    pub fn neighbors(&self, node: Eui64) -> Vec<Eui64> {
        let mut result: Vec<Eui64> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| match node {
                n if n == a => Some(b),
                n if n == b => Some(a),
                _ => None,
            })
            .collect();
        result.sort_unstable();
        result
    }

    /// Disable every link crossing between groups.
    pub fn partition(&mut self, groups: &[Vec<Eui64>]) {
        for (&(a, b), link) in self.links.iter_mut() {
            let a_group = groups.iter().position(|g| g.contains(&a));
            let b_group = groups.iter().position(|g| g.contains(&b));
            if a_group != b_group {
                link.active = false;
            }
        }
    }

    /// Re-enable all links.
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }

    pub fn set_global_loss_rate(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for link in self.links.values_mut() {
            link.loss_rate = rate;
        }
    }

    pub fn set_global_delay(&mut self, delay: Duration) {
        for link in self.links.values_mut() {
            link.delay = delay;
        }
    }

    fn canonical_pair(a: Eui64, b: Eui64) -> (Eui64, Eui64) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(n: u8) -> Vec<Eui64> {
        (0..n).map(|i| [2, 0, 0, 0, 0, 0, 0, i]).collect()
    }

    #[test]
    fn test_links_are_symmetric() {
        let nodes = addrs(2);
        let mut topo = Topology::new();
        topo.add_link(nodes[1], nodes[0], Link::new().with_rssi(-80));
        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert_eq!(topo.get_link(nodes[0], nodes[1]).map(|l| l.rssi), Some(-80));
    }

    #[test]
    fn test_chain_neighbors() {
        let nodes = addrs(4);
        let topo = Topology::chain(&nodes);
        assert_eq!(topo.neighbors(nodes[0]), [nodes[1]]);
        assert_eq!(topo.neighbors(nodes[1]), [nodes[0], nodes[2]]);
        assert!(!topo.is_connected(nodes[0], nodes[3]));
    }

    #[test]
    fn test_star_hub_hears_everyone() {
        let nodes = addrs(6);
        let topo = Topology::star(&nodes);
        assert_eq!(topo.neighbors(nodes[0]).len(), 5);
        for &spoke in &nodes[1..] {
            assert_eq!(topo.neighbors(spoke), [nodes[0]]);
        }
    }

    #[test]
    fn test_partition_and_heal() {
        let nodes = addrs(4);
        let mut topo = Topology::fully_connected(&nodes);
        topo.partition(&[vec![nodes[0], nodes[1]], vec![nodes[2], nodes[3]]]);
        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(!topo.is_connected(nodes[1], nodes[2]));
        assert!(topo.neighbors(nodes[0]).len() == 1);

        topo.heal();
        assert!(topo.is_connected(nodes[1], nodes[2]));
    }

    #[test]
    fn test_loss_rate_clamped() {
        let nodes = addrs(2);
        let mut topo = Topology::fully_connected(&nodes);
        topo.set_global_loss_rate(1.5);
        assert_eq!(topo.get_link(nodes[0], nodes[1]).map(|l| l.loss_rate), Some(1.0));
    }
}
