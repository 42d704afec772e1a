//! Neighbor liveness (NUD) engine.
//!
//! Two halves:
//! - [`schedule_policy`] decides whether a neighbor needs probing right now.
//! - [`ProbePool`] runs the outstanding probes: jittered first transmission,
//!   response timeout, bounded retries, and the final verdict.
//!
//! Probe entries refer to neighbors by address only; the neighbor table keeps
//! ownership. A neighbor never has more than one outstanding probe.

use alloc::vec::Vec;

use crate::time::Duration;
use crate::traits::Random;
use crate::types::{
    Eui64, ETX_SAMPLE_MAX, PROBE_INIT_BASE, PROBE_JITTER_MAX, PROBE_JITTER_MIN,
    PROBE_MAX_RETRIES, PROBE_RESPONSE_TIMEOUT,
};

/// What a probe is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    /// Full unreachability detection. Exhausting retries removes the neighbor.
    Unreachability,
    /// Lightweight link-quality sample. Failure is silent.
    LinkQuality,
}

/// Outcome of advancing the probe pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeAction {
    /// Transmit a probe now.
    Send { addr: Eui64, kind: ProbeKind },
    /// Unreachability confirmed; evict the neighbor.
    Remove(Eui64),
    /// Entry released without a verdict.
    Released(Eui64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ProbeEntry {
    neighbor: Eui64,
    kind: ProbeKind,
    wait_response: bool,
    retry_count: u8,
    timer: Duration,
}

fn jitter<R: Random>(rng: &mut R, min: Duration, max: Duration) -> Duration {
    Duration::from_millis(rng.gen_range(min.as_millis(), max.as_millis().saturating_add(1)))
}

/// Fixed-capacity pool of outstanding probes.
#[derive(Clone, Debug)]
pub struct ProbePool {
    entries: Vec<Option<ProbeEntry>>,
}

impl ProbePool {
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize(capacity, None);
        Self { entries }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_probing(&self, addr: &Eui64) -> bool {
        self.position(addr).is_some()
    }

    fn position(&self, addr: &Eui64) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.neighbor == *addr))
    }

    /// Start probing `addr`. Fails when already probing it or the pool is full.
    pub fn start<R: Random>(&mut self, addr: Eui64, kind: ProbeKind, rng: &mut R) -> bool {
        if self.is_probing(&addr) {
            return false;
        }
        let Some(slot) = self.entries.iter_mut().find(|e| e.is_none()) else {
            return false;
        };
        *slot = Some(ProbeEntry {
            neighbor: addr,
            kind,
            wait_response: false,
            retry_count: 0,
            timer: jitter(rng, PROBE_JITTER_MIN, PROBE_JITTER_MAX),
        });
        true
    }

    /// Advance every entry by `elapsed`.
    pub fn tick<R: Random>(&mut self, elapsed: Duration, rng: &mut R) -> Vec<ProbeAction> {
        let mut actions = Vec::new();
        for slot in self.entries.iter_mut() {
            let Some(entry) = slot.as_mut() else {
                continue;
            };
            entry.timer -= elapsed;
            if !entry.timer.is_zero() {
                continue;
            }

            if !entry.wait_response {
                entry.wait_response = true;
                entry.timer = PROBE_RESPONSE_TIMEOUT;
                actions.push(ProbeAction::Send {
                    addr: entry.neighbor,
                    kind: entry.kind,
                });
                continue;
            }

            // Sent, no answer.
            let addr = entry.neighbor;
            match entry.kind {
                ProbeKind::Unreachability if entry.retry_count < PROBE_MAX_RETRIES => {
                    entry.retry_count += 1;
                    entry.wait_response = false;
                    entry.timer = jitter(rng, PROBE_JITTER_MIN, PROBE_RESPONSE_TIMEOUT);
                }
                ProbeKind::Unreachability => {
                    *slot = None;
                    actions.push(ProbeAction::Remove(addr));
                }
                ProbeKind::LinkQuality => {
                    *slot = None;
                    actions.push(ProbeAction::Released(addr));
                }
            }
        }
        actions
    }

    /// The probe to `addr` could not be transmitted.
    ///
    /// Retries with fresh jitter while retries remain; otherwise releases the
    /// entry. Returns true if the entry was released.
    pub fn send_failed<R: Random>(&mut self, addr: &Eui64, rng: &mut R) -> bool {
        let Some(pos) = self.position(addr) else {
            return false;
        };
        let slot = &mut self.entries[pos];
        match slot.as_mut() {
            Some(entry) if entry.retry_count < PROBE_MAX_RETRIES => {
                entry.retry_count += 1;
                entry.wait_response = false;
                entry.timer = jitter(rng, PROBE_JITTER_MIN, PROBE_RESPONSE_TIMEOUT);
                false
            }
            _ => {
                *slot = None;
                true
            }
        }
    }

    /// Link-layer acknowledgement of a probe. Completes link-quality probes.
    pub fn acked(&mut self, addr: &Eui64) -> bool {
        match self.position(addr) {
            Some(pos) if self.entries[pos].is_some_and(|e| e.kind == ProbeKind::LinkQuality) => {
                self.entries[pos] = None;
                true
            }
            _ => false,
        }
    }

    /// The neighbor answered. Releases its entry.
    pub fn response_received(&mut self, addr: &Eui64) -> bool {
        self.cancel(addr)
    }

    /// Release any entry bound to `addr`.
    pub fn cancel(&mut self, addr: &Eui64) -> bool {
        match self.position(addr) {
            Some(pos) => {
                self.entries[pos] = None;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
    }
}

/// What the liveness policy needs to know about one neighbor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LivenessView {
    pub trusted: bool,
    pub temporary: bool,
    pub child: bool,
    pub parent: bool,
    pub parent_candidate: bool,
    /// Registration lifetime.
    pub link_lifetime: Duration,
    /// Time since the registration was last refreshed.
    pub since_refresh: Duration,
    pub etx_samples: u8,
}

/// Decide whether `view` warrants a probe now. Evaluated about once a second.
///
/// In the first half of the registration lifetime only parent candidates that
/// still lack [`ETX_SAMPLE_MAX`] link-quality samples are probed. Each sample
/// doubles the wait before the next one.
///
/// In the second half only children and parents are probed, with a
/// probability that rises across three bands as the deadline approaches;
/// from 1.5x half the lifetime on, always.
pub fn schedule_policy<R: Random>(view: &LivenessView, rng: &mut R) -> Option<ProbeKind> {
    if !view.trusted || view.temporary {
        return None;
    }
    let half = view.link_lifetime.div(2);
    let since = view.since_refresh;

    if since < half {
        if view.etx_samples >= ETX_SAMPLE_MAX || !view.parent_candidate {
            return None;
        }
        let period = PROBE_INIT_BASE.saturating_mul(1 << view.etx_samples);
        let window_open = Duration::from_secs(1 << view.etx_samples);
        if since >= period {
            return Some(ProbeKind::LinkQuality);
        }
        if since > window_open && rng.gen_range(0, period.as_secs()) < 2 {
            return Some(ProbeKind::LinkQuality);
        }
        return None;
    }

    if !view.child && !view.parent {
        return None;
    }
    let sixth = half.div(6);
    let one_in = if since < half + sixth {
        20
    } else if since < half + sixth.saturating_mul(2) {
        8
    } else if since < half + half.div(2) {
        3
    } else {
        return Some(ProbeKind::Unreachability);
    };
    (rng.gen_range(0, one_in) == 0).then_some(ProbeKind::Unreachability)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::test_impls::MockRandom;

    fn addr(n: u8) -> Eui64 {
        [0, 0, 0, 0, 0, 0, 0, n]
    }

    /// Tick in 100 ms steps until `pred` matches an action or `limit` passes.
    fn run_until(
        pool: &mut ProbePool,
        rng: &mut MockRandom,
        limit: Duration,
        mut pred: impl FnMut(&ProbeAction) -> bool,
    ) -> Vec<ProbeAction> {
        let mut all = Vec::new();
        let mut elapsed = Duration::ZERO;
        while elapsed < limit {
            let actions = pool.tick(Duration::from_millis(100), rng);
            elapsed += Duration::from_millis(100);
            let done = actions.iter().any(&mut pred);
            all.extend(actions);
            if done {
                break;
            }
        }
        all
    }

    #[test]
    fn test_one_probe_per_neighbor_and_bounded_pool() {
        let mut rng = MockRandom::new();
        let mut pool = ProbePool::new(2);
        assert!(pool.start(addr(1), ProbeKind::Unreachability, &mut rng));
        assert!(!pool.start(addr(1), ProbeKind::LinkQuality, &mut rng));
        assert!(pool.start(addr(2), ProbeKind::LinkQuality, &mut rng));
        assert!(!pool.start(addr(3), ProbeKind::LinkQuality, &mut rng));
        assert_eq!(pool.len(), 2);
        assert!(pool.cancel(&addr(1)));
        assert!(pool.start(addr(3), ProbeKind::LinkQuality, &mut rng));
    }

    #[test]
    fn test_first_send_within_jitter_window() {
        let mut rng = MockRandom::new();
        let mut pool = ProbePool::new(1);
        pool.start(addr(1), ProbeKind::Unreachability, &mut rng);
        let actions = run_until(&mut pool, &mut rng, PROBE_JITTER_MAX + Duration::from_secs(1), |a| {
            matches!(a, ProbeAction::Send { .. })
        });
        assert_eq!(
            actions,
            [ProbeAction::Send { addr: addr(1), kind: ProbeKind::Unreachability }]
        );
    }

    #[test]
    fn test_unanswered_unreachability_probe_removes_neighbor_once() {
        let mut rng = MockRandom::with_seed(3);
        let mut pool = ProbePool::new(4);
        pool.start(addr(7), ProbeKind::Unreachability, &mut rng);

        let actions = run_until(&mut pool, &mut rng, Duration::from_secs(300), |a| {
            matches!(a, ProbeAction::Remove(_))
        });
        let sends = actions
            .iter()
            .filter(|a| matches!(a, ProbeAction::Send { .. }))
            .count();
        let removes: Vec<&ProbeAction> = actions
            .iter()
            .filter(|a| matches!(a, ProbeAction::Remove(_)))
            .collect();
        assert_eq!(sends, 1 + PROBE_MAX_RETRIES as usize);
        assert_eq!(removes, [&ProbeAction::Remove(addr(7))]);
        assert!(!pool.is_probing(&addr(7)));
        assert!(pool.is_empty());

        // Nothing further happens.
        assert!(pool.tick(Duration::from_secs(100), &mut rng).is_empty());
    }

    #[test]
    fn test_unanswered_link_quality_probe_is_silent() {
        let mut rng = MockRandom::new();
        let mut pool = ProbePool::new(1);
        pool.start(addr(1), ProbeKind::LinkQuality, &mut rng);
        let actions = run_until(&mut pool, &mut rng, Duration::from_secs(200), |a| {
            matches!(a, ProbeAction::Released(_))
        });
        assert!(actions.contains(&ProbeAction::Released(addr(1))));
        assert!(!actions.iter().any(|a| matches!(a, ProbeAction::Remove(_))));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_response_releases_entry() {
        let mut rng = MockRandom::new();
        let mut pool = ProbePool::new(1);
        pool.start(addr(1), ProbeKind::Unreachability, &mut rng);
        run_until(&mut pool, &mut rng, Duration::from_secs(100), |a| {
            matches!(a, ProbeAction::Send { .. })
        });
        assert!(pool.response_received(&addr(1)));
        assert!(pool.is_empty());
        assert!(!pool.response_received(&addr(1)));
    }

    #[test]
    fn test_ack_completes_only_link_quality() {
        let mut rng = MockRandom::new();
        let mut pool = ProbePool::new(2);
        pool.start(addr(1), ProbeKind::Unreachability, &mut rng);
        pool.start(addr(2), ProbeKind::LinkQuality, &mut rng);
        assert!(!pool.acked(&addr(1)));
        assert!(pool.acked(&addr(2)));
        assert!(pool.is_probing(&addr(1)));
        assert!(!pool.is_probing(&addr(2)));
    }

    #[test]
    fn test_send_failure_retries_then_releases() {
        let mut rng = MockRandom::new();
        let mut pool = ProbePool::new(1);
        pool.start(addr(1), ProbeKind::Unreachability, &mut rng);
        for _ in 0..PROBE_MAX_RETRIES {
            assert!(!pool.send_failed(&addr(1), &mut rng));
            assert!(pool.is_probing(&addr(1)));
        }
        assert!(pool.send_failed(&addr(1), &mut rng));
        assert!(pool.is_empty());
    }

    fn registered(lifetime_secs: u64, since_secs: u64) -> LivenessView {
        LivenessView {
            trusted: true,
            link_lifetime: Duration::from_secs(lifetime_secs),
            since_refresh: Duration::from_secs(since_secs),
            ..Default::default()
        }
    }

    #[test]
    fn test_policy_skips_untrusted_and_temporary() {
        let mut rng = MockRandom::new();
        let mut view = registered(600, 600);
        view.child = true;
        view.trusted = false;
        assert_eq!(schedule_policy(&view, &mut rng), None);
        view.trusted = true;
        view.temporary = true;
        assert_eq!(schedule_policy(&view, &mut rng), None);
    }

    #[test]
    fn test_policy_always_probes_past_deadline_band() {
        let mut rng = MockRandom::new();
        // Half lifetime 300 s; 1.5x that is 450 s.
        let mut view = registered(600, 450);
        view.parent = true;
        for _ in 0..50 {
            assert_eq!(schedule_policy(&view, &mut rng), Some(ProbeKind::Unreachability));
        }
        // Neither child nor parent: left to expire.
        view.parent = false;
        assert_eq!(schedule_policy(&view, &mut rng), None);
    }

    #[test]
    fn test_policy_probability_rises_across_bands() {
        let mut rng = MockRandom::with_seed(11);
        let mut hits = [0u32; 3];
        // Half lifetime 600 s, bands at [600, 700), [700, 800), [800, 900).
        for (band, since) in [650u64, 750, 850].into_iter().enumerate() {
            let mut view = registered(1200, since);
            view.child = true;
            for _ in 0..6000 {
                if schedule_policy(&view, &mut rng).is_some() {
                    hits[band] += 1;
                }
            }
        }
        assert!(hits[0] < hits[1] && hits[1] < hits[2], "{hits:?}");
        assert!(hits[0] > 0);
    }

    #[test]
    fn test_policy_link_quality_for_candidates_early() {
        let mut rng = MockRandom::new();
        let mut view = registered(7200, 8);
        view.parent_candidate = true;
        // 8 s with no samples reaches the base period.
        assert_eq!(schedule_policy(&view, &mut rng), Some(ProbeKind::LinkQuality));

        // Before the window opens, never.
        view.etx_samples = 2;
        view.since_refresh = Duration::from_secs(3);
        for _ in 0..100 {
            assert_eq!(schedule_policy(&view, &mut rng), None);
        }

        // Enough samples: done.
        view.etx_samples = ETX_SAMPLE_MAX;
        view.since_refresh = Duration::from_secs(1000);
        assert_eq!(schedule_policy(&view, &mut rng), None);

        // Not a candidate: no early probing.
        view.etx_samples = 0;
        view.parent_candidate = false;
        assert_eq!(schedule_policy(&view, &mut rng), None);
    }
}
