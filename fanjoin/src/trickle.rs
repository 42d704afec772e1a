//! Trickle timer (RFC 6206).
//!
//! One instance per advertisement category (PA, PAS, PC, PCS). Consistent
//! observations suppress transmissions within the current interval,
//! inconsistent ones shrink the interval back to `Imin` so a change spreads
//! quickly. The timer only decides *when* a transmission is due; the caller
//! builds and sends the frame.

use crate::time::Duration;
use crate::traits::Random;

/// Shape of a trickle timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrickleParams {
    pub imin: Duration,
    pub imax: Duration,
    /// Redundancy constant. Zero disables suppression.
    pub k: u8,
}

impl TrickleParams {
    pub fn is_valid(&self) -> bool {
        !self.imin.is_zero() && self.imin <= self.imax
    }
}

/// A single trickle timer instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Trickle {
    /// Current interval length.
    i: Duration,
    /// Fire point within the current interval.
    t: Duration,
    /// Time elapsed in the current interval.
    now: Duration,
    /// Consistent observations in the current interval.
    c: u32,
    /// Whether this interval's fire point has passed.
    fired_point: bool,
    running: bool,
}

impl Trickle {
    pub const fn new() -> Self {
        Self {
            i: Duration::ZERO,
            t: Duration::ZERO,
            now: Duration::ZERO,
            c: 0,
            fired_point: false,
            running: false,
        }
    }

    /// Start with a random interval in `[Imin, Imax]`.
    pub fn start<R: Random>(&mut self, params: &TrickleParams, rng: &mut R) {
        let lo = params.imin.as_millis();
        let hi = params.imax.as_millis().max(lo);
        self.i = Duration::from_millis(rng.gen_range(lo, hi.saturating_add(1)));
        self.running = true;
        self.begin_interval(rng);
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.c = 0;
        self.now = Duration::ZERO;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn interval(&self) -> Duration {
        self.i
    }

    pub fn counter(&self) -> u32 {
        self.c
    }

    fn begin_interval<R: Random>(&mut self, rng: &mut R) {
        let half = self.i.as_millis() / 2;
        self.t = Duration::from_millis(rng.gen_range(half, self.i.as_millis().max(half)));
        self.now = Duration::ZERO;
        self.c = 0;
        self.fired_point = false;
    }

    /// Advance by `elapsed`. Returns true when a transmission is due.
    ///
    /// A transmission is due when the fire point is crossed and fewer than
    /// `k` consistent messages were heard this interval. Reaching the end of
    /// the interval doubles it, capped at `Imax`.
    ///
    /// Time left over past the end of an interval carries into the next one.
    /// A step spanning several fire points still reports one transmission.
    pub fn tick<R: Random>(&mut self, elapsed: Duration, params: &TrickleParams, rng: &mut R) -> bool {
        if !self.running {
            return false;
        }
        self.now += elapsed;

        let mut fire = false;
        loop {
            if !self.fired_point && self.now >= self.t {
                self.fired_point = true;
                fire |= params.k == 0 || self.c < params.k as u32;
            }
            if self.now < self.i || self.i.is_zero() {
                break;
            }
            let carry = self.now.saturating_sub(self.i);
            self.i = self.i.saturating_mul(2).min(params.imax).max(params.imin);
            self.begin_interval(rng);
            self.now = carry;
        }
        fire
    }

    /// A consistent message was heard.
    pub fn heard_consistent(&mut self) {
        if self.running {
            self.c = self.c.saturating_add(1);
        }
    }

    /// An inconsistent message was heard; restart at `Imin` unless already there.
    ///
    /// No-op on a stopped timer.
    pub fn heard_inconsistent<R: Random>(&mut self, params: &TrickleParams, rng: &mut R) {
        if self.running && self.i != params.imin {
            self.i = params.imin;
            self.begin_interval(rng);
        }
    }

    /// Time until the next possible transmission.
    ///
    /// When this interval's fire point already passed, this is the time until
    /// the interval ends (the earliest the next one can fire is later still).
    pub fn time_until_next_fire(&self) -> Option<Duration> {
        if !self.running {
            return None;
        }
        if self.fired_point {
            Some(self.i.saturating_sub(self.now))
        } else {
            Some(self.t.saturating_sub(self.now))
        }
    }
}
