//! Neighbor table.
//!
//! Tracks every link-layer neighbor the engine knows about: heard-only
//! (temporary) entries created from PA/PCS, the neighbor bound for
//! authentication, and registered parents and children. Liveness probing
//! reads these entries but never owns them.
//!
//! The table is bounded by `max_neighbors`. When full, a temporary entry older
//! than `temp_link_min_timeout` can be reclaimed; otherwise insertion fails.
//! Churn during discovery can leave the map oversized, so it shrinks after a
//! run of removals without insertions.

use hashbrown::HashMap;

use crate::channel::UnicastSchedule;
use crate::time::{Duration, Timestamp};
use crate::types::{BroadcastTiming, Eui64, UnicastTiming, ETX_SAMPLE_MAX};

/// Per-neighbor state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NeighborInfo {
    pub addr: Eui64,
    /// Authenticated link (keys established or the neighbor registered with us).
    pub trusted: bool,
    /// Heard only; reclaimable once older than the minimum temporary lifetime.
    pub temporary: bool,
    /// Registered us as its parent.
    pub child: bool,
    pub created_at: Timestamp,
    /// Last registration refresh.
    pub refreshed_at: Timestamp,
    /// Registration lifetime.
    pub lifetime: Duration,
    pub rssi: i16,
    /// Routing cost advertised in the neighbor's last PA.
    pub routing_cost: Option<u16>,
    pub utt: Option<UnicastTiming>,
    pub us: Option<UnicastSchedule>,
    pub bt: Option<BroadcastTiming>,
    /// Link-quality samples taken since the link was created (saturates at
    /// [`ETX_SAMPLE_MAX`]).
    pub etx_samples: u8,
    /// A liveness probe is outstanding.
    pub nud_active: bool,
}

impl NeighborInfo {
    fn new(addr: Eui64, now: Timestamp, lifetime: Duration) -> Self {
        Self {
            addr,
            trusted: false,
            temporary: true,
            child: false,
            created_at: now,
            refreshed_at: now,
            lifetime,
            rssi: 0,
            routing_cost: None,
            utt: None,
            us: None,
            bt: None,
            etx_samples: 0,
            nud_active: false,
        }
    }

    /// Time since the last registration refresh.
    pub fn since_refresh(&self, now: Timestamp) -> Duration {
        now.saturating_sub(self.refreshed_at)
    }
}

/// Bounded neighbor table keyed by EUI-64.
#[derive(Clone, Debug)]
pub struct NeighborTable {
    entries: HashMap<Eui64, NeighborInfo>,
    max_neighbors: usize,
    removals_since_add: u8,
    shrink_threshold: u8,
}

impl NeighborTable {
    pub fn new(max_neighbors: usize) -> Self {
        let threshold = (max_neighbors / 16).clamp(1, u8::MAX as usize) as u8;
        Self {
            entries: HashMap::new(),
            max_neighbors,
            removals_since_add: 0,
            shrink_threshold: threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_neighbors
    }

    pub fn contains(&self, addr: &Eui64) -> bool {
        self.entries.contains_key(addr)
    }

    pub fn get(&self, addr: &Eui64) -> Option<&NeighborInfo> {
        self.entries.get(addr)
    }

    pub fn get_mut(&mut self, addr: &Eui64) -> Option<&mut NeighborInfo> {
        self.entries.get_mut(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NeighborInfo> {
        self.entries.values()
    }

    /// Oldest temporary entry created before `now - min_age`.
    fn reclaimable(&self, now: Timestamp, min_age: Duration) -> Option<Eui64> {
        self.entries
            .values()
            .filter(|n| n.temporary && now.saturating_sub(n.created_at) >= min_age)
            .min_by_key(|n| (n.created_at, n.addr))
            .map(|n| n.addr)
    }

    /// Find or create an entry for `addr`.
    ///
    /// New entries are temporary with lifetime `temp_link_min_timeout`.
    /// Returns `None` when the table is full and nothing can be reclaimed.
    pub fn upsert_temporary(
        &mut self,
        addr: Eui64,
        now: Timestamp,
        temp_link_min_timeout: Duration,
    ) -> Option<&mut NeighborInfo> {
        if !self.entries.contains_key(&addr) {
            if self.entries.len() >= self.max_neighbors {
                let victim = self.reclaimable(now, temp_link_min_timeout)?;
                log::debug!("reclaiming temporary neighbor {:02x?}", victim);
                self.remove(&victim);
            }
            self.removals_since_add = 0;
            self.entries
                .insert(addr, NeighborInfo::new(addr, now, temp_link_min_timeout));
        }
        self.entries.get_mut(&addr)
    }

    /// Bind `addr` as the authentication target: a non-temporary entry.
    pub fn bind(
        &mut self,
        addr: Eui64,
        now: Timestamp,
        temp_link_min_timeout: Duration,
    ) -> Option<&mut NeighborInfo> {
        let entry = self.upsert_temporary(addr, now, temp_link_min_timeout)?;
        entry.temporary = false;
        entry.refreshed_at = now;
        Some(entry)
    }

    /// Address registration made or refreshed.
    pub fn register(
        &mut self,
        addr: Eui64,
        lifetime: Duration,
        child: bool,
        now: Timestamp,
        temp_link_min_timeout: Duration,
    ) -> bool {
        let Some(entry) = self.upsert_temporary(addr, now, temp_link_min_timeout) else {
            return false;
        };
        entry.trusted = true;
        entry.temporary = false;
        entry.child = child;
        entry.lifetime = lifetime;
        entry.refreshed_at = now;
        true
    }

    /// Store the timing IEs a neighbor advertised.
    pub fn update_schedule(
        &mut self,
        addr: &Eui64,
        utt: Option<UnicastTiming>,
        us: Option<UnicastSchedule>,
        bt: Option<BroadcastTiming>,
        rssi: i16,
    ) {
        if let Some(entry) = self.entries.get_mut(addr) {
            if utt.is_some() {
                entry.utt = utt;
            }
            if us.is_some() {
                entry.us = us;
            }
            if bt.is_some() {
                entry.bt = bt;
            }
            entry.rssi = rssi;
        }
    }

    pub fn record_etx_sample(&mut self, addr: &Eui64) {
        if let Some(entry) = self.entries.get_mut(addr) {
            entry.etx_samples = (entry.etx_samples + 1).min(ETX_SAMPLE_MAX);
        }
    }

    pub fn remove(&mut self, addr: &Eui64) -> Option<NeighborInfo> {
        let removed = self.entries.remove(addr);
        if removed.is_some() {
            self.removals_since_add = self.removals_since_add.saturating_add(1);
            if self.removals_since_add >= self.shrink_threshold {
                self.entries.shrink_to_fit();
                self.removals_since_add = 0;
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.entries.shrink_to_fit();
        self.removals_since_add = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMP: Duration = Duration::from_secs(260);

    fn addr(n: u8) -> Eui64 {
        [0, 0, 0, 0, 0, 0, 0, n]
    }

    #[test]
    fn test_upsert_creates_temporary_once() {
        let mut table = NeighborTable::new(4);
        let now = Timestamp::from_secs(1);
        let entry = table.upsert_temporary(addr(1), now, TEMP).unwrap();
        assert!(entry.temporary);
        assert!(!entry.trusted);
        entry.routing_cost = Some(512);

        // Second upsert returns the same entry untouched.
        let entry = table.upsert_temporary(addr(1), Timestamp::from_secs(5), TEMP).unwrap();
        assert_eq!(entry.routing_cost, Some(512));
        assert_eq!(entry.created_at, now);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_full_table_reclaims_only_old_temporary() {
        let mut table = NeighborTable::new(2);
        table.upsert_temporary(addr(1), Timestamp::from_secs(0), TEMP).unwrap();
        table.bind(addr(2), Timestamp::from_secs(0), TEMP).unwrap();

        // Too early: addr(1) is still within its minimum lifetime.
        assert!(table
            .upsert_temporary(addr(3), Timestamp::from_secs(100), TEMP)
            .is_none());

        // Old enough: addr(1) goes, bound addr(2) stays.
        assert!(table
            .upsert_temporary(addr(3), Timestamp::from_secs(300), TEMP)
            .is_some());
        assert!(!table.contains(&addr(1)));
        assert!(table.contains(&addr(2)));
        assert!(table.contains(&addr(3)));
    }

    #[test]
    fn test_register_makes_trusted() {
        let mut table = NeighborTable::new(4);
        let now = Timestamp::from_secs(10);
        assert!(table.register(addr(1), Duration::from_secs(7200), true, now, TEMP));
        let entry = table.get(&addr(1)).unwrap();
        assert!(entry.trusted && entry.child && !entry.temporary);
        assert_eq!(entry.lifetime, Duration::from_secs(7200));
        assert_eq!(
            entry.since_refresh(Timestamp::from_secs(70)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_schedule_update_keeps_missing_ies() {
        let mut table = NeighborTable::new(4);
        table.upsert_temporary(addr(1), Timestamp::ZERO, TEMP).unwrap();
        table.update_schedule(&addr(1), Some(UnicastTiming { ufsi: 9 }), None, None, -70);
        table.update_schedule(&addr(1), None, None, None, -60);
        let entry = table.get(&addr(1)).unwrap();
        assert_eq!(entry.utt, Some(UnicastTiming { ufsi: 9 }));
        assert_eq!(entry.rssi, -60);

        // Unknown neighbors are ignored.
        table.update_schedule(&addr(2), None, None, None, -60);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_etx_samples_saturate() {
        let mut table = NeighborTable::new(4);
        table.upsert_temporary(addr(1), Timestamp::ZERO, TEMP).unwrap();
        for _ in 0..10 {
            table.record_etx_sample(&addr(1));
        }
        assert_eq!(table.get(&addr(1)).unwrap().etx_samples, ETX_SAMPLE_MAX);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut table = NeighborTable::new(32);
        for n in 0..10 {
            table.upsert_temporary(addr(n), Timestamp::ZERO, TEMP).unwrap();
        }
        assert!(table.remove(&addr(3)).is_some());
        assert!(table.remove(&addr(3)).is_none());
        assert_eq!(table.len(), 9);
        table.clear();
        assert!(table.is_empty());
    }
}
