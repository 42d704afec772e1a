//! Candidate parent store.
//!
//! This module provides [`CandidateStore`], a fixed-capacity pool of neighbor
//! summaries learned from PAN advertisements, kept in rank order.
//!
//! # Design Rationale
//!
//! Records live in an arena of slots. Callers only ever hold a
//! [`CandidateHandle`] (slot index plus generation), so a handle to an evicted
//! record goes stale instead of silently pointing at whoever reused the slot.
//!
//! Two index lists thread the arena:
//! - `free`: slots available for allocation
//! - `ranked`: occupied slots, best first
//!
//! The ranked list is never re-sorted wholesale. An observation removes the
//! record from its position and re-inserts it at the first position it
//! outranks, so the list is sorted after every operation.
//!
//! # Ranking
//!
//! [`rank_cmp`] is a total order. Ties are broken in this sequence:
//! transmit failures, link acceptability, weighted PAN cost, signal strength,
//! address, PAN id. No two distinct `(pan_id, addr)` records compare equal,
//! which keeps [`CandidateStore::best`] stable under repeated insertion.

use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::channel::ExcludedChannels;
use crate::time::{Duration, Timestamp};
use crate::types::{Eui64, PanId, PanInformation, CANDIDATE_MAX_TX_FAILURES, PS_WEIGHT, RC_WEIGHT};

/// Stable reference to a record in a [`CandidateStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CandidateHandle {
    index: u16,
    generation: u16,
}

/// Advertised PAN cost fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CandidateMetrics {
    pub routing_cost: u16,
    pub pan_size: u16,
    pub use_parent_bs: bool,
    pub rpl_routing_method: bool,
    pub fan_tps_version: u8,
}

impl CandidateMetrics {
    /// `routing_cost / RC_WEIGHT + pan_size / PS_WEIGHT`.
    pub fn weighted_cost(&self) -> u32 {
        self.routing_cost as u32 / RC_WEIGHT + self.pan_size as u32 / PS_WEIGHT
    }
}

impl From<PanInformation> for CandidateMetrics {
    fn from(info: PanInformation) -> Self {
        Self {
            routing_cost: info.routing_cost,
            pan_size: info.pan_size,
            use_parent_bs: info.use_parent_bs,
            rpl_routing_method: info.rpl_routing_method,
            fan_tps_version: info.fan_tps_version,
        }
    }
}

/// One candidate parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateRecord {
    pub pan_id: PanId,
    pub addr: Eui64,
    pub metrics: CandidateMetrics,
    /// Last received signal strength, dBm.
    pub rssi: i16,
    pub heard_at: Timestamp,
    pub tx_failures: u8,
    pub link_acceptable: bool,
    /// Channels the candidate does not listen on.
    pub excluded: ExcludedChannels,
}

/// RSL hysteresis band.
///
/// Signal above `accept_above` makes a link acceptable, below `reject_below`
/// makes it unacceptable; in between the previous verdict stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RslThresholds {
    pub accept_above: i16,
    pub reject_below: i16,
}

impl RslThresholds {
    /// Band centered on `device_min_sens + threshold`.
    pub fn new(device_min_sens: i16, threshold: i16, hysteresis: i16) -> Self {
        let center = device_min_sens.saturating_add(threshold);
        Self {
            accept_above: center.saturating_add(hysteresis),
            reject_below: center.saturating_sub(hysteresis),
        }
    }

    pub fn apply(&self, previous: bool, rssi: i16) -> bool {
        if rssi > self.accept_above {
            true
        } else if rssi < self.reject_below {
            false
        } else {
            previous
        }
    }
}

/// Total order over candidates. `Less` means `a` ranks ahead of `b`.
pub fn rank_cmp(a: &CandidateRecord, b: &CandidateRecord) -> Ordering {
    a.tx_failures
        .cmp(&b.tx_failures)
        .then_with(|| b.link_acceptable.cmp(&a.link_acceptable))
        .then_with(|| a.metrics.weighted_cost().cmp(&b.metrics.weighted_cost()))
        .then_with(|| b.rssi.cmp(&a.rssi))
        .then_with(|| a.addr.cmp(&b.addr))
        .then_with(|| a.pan_id.cmp(&b.pan_id))
}

#[derive(Clone, Debug, Default)]
struct Slot {
    generation: u16,
    record: Option<CandidateRecord>,
}

/// Fixed-capacity ranked pool of candidate parents.
#[derive(Clone, Debug)]
pub struct CandidateStore {
    slots: Vec<Slot>,
    free: Vec<u16>,
    ranked: Vec<u16>,
    per_pan_cap: usize,
    rsl: RslThresholds,
}

impl CandidateStore {
    /// Create a store with `capacity` slots (at most `u16::MAX`).
    pub fn new(capacity: usize, per_pan_cap: usize, rsl: RslThresholds) -> Self {
        let capacity = capacity.min(u16::MAX as usize);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        // Pop order hands out slot 0 first.
        let free = (0..capacity as u16).rev().collect();
        Self {
            slots,
            free,
            ranked: Vec::with_capacity(capacity),
            per_pan_cap,
            rsl,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    pub fn per_pan_cap(&self) -> usize {
        self.per_pan_cap
    }

    /// Change the per-PAN cap. Takes effect on the next `observe` or `age_out`.
    pub fn set_per_pan_cap(&mut self, cap: usize) {
        self.per_pan_cap = cap;
    }

    pub fn get(&self, handle: CandidateHandle) -> Option<&CandidateRecord> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.record.as_ref()
    }

    /// Records in rank order, best first.
    pub fn iter(&self) -> impl Iterator<Item = &CandidateRecord> + '_ {
        self.ranked
            .iter()
            .filter_map(move |&idx| self.slots[idx as usize].record.as_ref())
    }

    fn record(&self, idx: u16) -> Option<&CandidateRecord> {
        self.slots.get(idx as usize).and_then(|s| s.record.as_ref())
    }

    fn handle(&self, idx: u16) -> CandidateHandle {
        CandidateHandle {
            index: idx,
            generation: self.slots[idx as usize].generation,
        }
    }

    fn find(&self, pan_id: PanId, addr: &Eui64) -> Option<u16> {
        self.ranked.iter().copied().find(|&idx| {
            self.record(idx)
                .is_some_and(|r| r.pan_id == pan_id && r.addr == *addr)
        })
    }

    fn count_pan(&self, pan_id: PanId) -> usize {
        self.iter().filter(|r| r.pan_id == pan_id).count()
    }

    /// Lowest-ranked record of `pan_id`.
    fn worst_of_pan(&self, pan_id: PanId) -> Option<u16> {
        self.ranked
            .iter()
            .rev()
            .copied()
            .find(|&idx| self.record(idx).is_some_and(|r| r.pan_id == pan_id))
    }

    /// Lowest-ranked record of any PAN other than `pan_id` holding more than the cap.
    fn worst_over_cap(&self, pan_id: PanId) -> Option<u16> {
        self.ranked.iter().rev().copied().find(|&idx| {
            self.record(idx)
                .is_some_and(|r| r.pan_id != pan_id && self.count_pan(r.pan_id) > self.per_pan_cap)
        })
    }

    fn unlink(&mut self, idx: u16) {
        if let Some(pos) = self.ranked.iter().position(|&i| i == idx) {
            self.ranked.remove(pos);
        }
    }

    fn release(&mut self, idx: u16) {
        self.unlink(idx);
        let slot = &mut self.slots[idx as usize];
        if slot.record.take().is_some() {
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(idx);
        }
    }

    /// Place an unlinked occupied slot at its rank position.
    fn link_ranked(&mut self, idx: u16) {
        let Some(new) = self.record(idx) else {
            return;
        };
        let pos = self
            .ranked
            .iter()
            .position(|&other| {
                self.record(other)
                    .is_some_and(|r| rank_cmp(new, r) == Ordering::Less)
            })
            .unwrap_or(self.ranked.len());
        self.ranked.insert(pos, idx);
    }

    /// Whether `candidate` would rank ahead of the record in slot `idx`.
    fn outranks(&self, candidate: &CandidateRecord, idx: u16) -> bool {
        self.record(idx)
            .is_some_and(|r| rank_cmp(candidate, r) == Ordering::Less)
    }

    /// Record an advertisement from `addr` in `pan_id`.
    ///
    /// Updates the existing record or allocates a new one. Returns `None` when
    /// the observation was rejected for lack of room.
    pub fn observe(
        &mut self,
        pan_id: PanId,
        addr: Eui64,
        metrics: CandidateMetrics,
        rssi: i16,
        excluded: ExcludedChannels,
        now: Timestamp,
    ) -> Option<CandidateHandle> {
        if let Some(idx) = self.find(pan_id, &addr) {
            self.unlink(idx);
            let rsl = self.rsl;
            if let Some(record) = self.slots[idx as usize].record.as_mut() {
                record.metrics = metrics;
                record.link_acceptable = rsl.apply(record.link_acceptable, rssi);
                record.rssi = rssi;
                record.heard_at = now;
                record.excluded = excluded;
            }
            self.link_ranked(idx);
            return Some(self.handle(idx));
        }

        let candidate = CandidateRecord {
            pan_id,
            addr,
            metrics,
            rssi,
            heard_at: now,
            tx_failures: 0,
            link_acceptable: self.rsl.apply(false, rssi),
            excluded,
        };

        if self.count_pan(pan_id) >= self.per_pan_cap {
            // PAN full: only displace its own worst.
            let worst = self.worst_of_pan(pan_id)?;
            if !self.outranks(&candidate, worst) {
                return None;
            }
            self.release(worst);
        } else if self.free.is_empty() {
            let victim = match self.worst_over_cap(pan_id) {
                Some(idx) => idx,
                None => {
                    let worst = *self.ranked.last()?;
                    if !self.outranks(&candidate, worst) {
                        return None;
                    }
                    worst
                }
            };
            self.release(victim);
        }

        let idx = self.free.pop()?;
        self.slots[idx as usize].record = Some(candidate);
        self.link_ranked(idx);
        Some(self.handle(idx))
    }

    /// Highest-ranked link-acceptable record, or the list head when none is.
    pub fn best(&self) -> Option<CandidateHandle> {
        let idx = self
            .ranked
            .iter()
            .copied()
            .find(|&idx| self.record(idx).is_some_and(|r| r.link_acceptable))
            .or_else(|| self.ranked.first().copied())?;
        Some(self.handle(idx))
    }

    /// Count a transmit failure against every record for `addr`.
    ///
    /// Records past [`CANDIDATE_MAX_TX_FAILURES`] are evicted, the rest
    /// re-ranked. Returns the number of records evicted.
    pub fn mark_failure(&mut self, addr: &Eui64) -> usize {
        let matching: Vec<u16> = self
            .ranked
            .iter()
            .copied()
            .filter(|&idx| self.record(idx).is_some_and(|r| r.addr == *addr))
            .collect();

        let mut evicted = 0;
        for idx in matching {
            let failures = match self.slots[idx as usize].record.as_mut() {
                Some(record) => {
                    record.tx_failures = record.tx_failures.saturating_add(1);
                    record.tx_failures
                }
                None => continue,
            };
            if failures > CANDIDATE_MAX_TX_FAILURES {
                self.release(idx);
                evicted += 1;
            } else {
                self.unlink(idx);
                self.link_ranked(idx);
            }
        }
        evicted
    }

    /// Evict every record for `addr`. Returns the number removed.
    pub fn remove(&mut self, addr: &Eui64) -> usize {
        let matching: Vec<u16> = self
            .ranked
            .iter()
            .copied()
            .filter(|&idx| self.record(idx).is_some_and(|r| r.addr == *addr))
            .collect();
        let removed = matching.len();
        for idx in matching {
            self.release(idx);
        }
        removed
    }

    /// Evict records not heard within `max_age`, and all but the best
    /// `per_pan_cap` records of `pan_id`. Returns the number evicted.
    pub fn age_out(
        &mut self,
        now: Timestamp,
        max_age: Duration,
        per_pan_cap: usize,
        pan_id: PanId,
    ) -> usize {
        let mut kept = 0usize;
        let mut evict = Vec::new();
        for &idx in &self.ranked {
            let Some(record) = self.record(idx) else {
                continue;
            };
            if now.saturating_sub(record.heard_at) > max_age {
                evict.push(idx);
                continue;
            }
            if record.pan_id == pan_id {
                kept += 1;
                if kept > per_pan_cap {
                    evict.push(idx);
                }
            }
        }
        let evicted = evict.len();
        for idx in evict {
            self.release(idx);
        }
        evicted
    }

    /// Return every record to the free pool.
    pub fn reset(&mut self) {
        while let Some(&idx) = self.ranked.last() {
            self.release(idx);
        }
    }
}
