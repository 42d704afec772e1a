//! Seams between the join engine and its host.
//!
//! The engine owns no radio, no clock and no routing protocol. These traits let
//! it run against:
//! - Real hardware time or a simulated clock
//! - A hardware RNG or a deterministic generator
//! - A live RPL instance or a scripted stand-in

use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::time::Timestamp;
use crate::types::{Command, Eui64, Event};

/// Queue size for the inbound event channel.
pub(crate) const EVENT_QUEUE_SIZE: usize = 16;

/// Queue size for the outbound command channel.
///
/// A single event can produce several commands (a state transition emits a
/// schedule update, a status report and a frame), so this is deeper than the
/// event queue.
pub(crate) const COMMAND_QUEUE_SIZE: usize = 32;

/// Mutex type used for channels.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// Inbound event channel: host to engine.
pub type EventChannel = Channel<ChannelMutex, Event, EVENT_QUEUE_SIZE>;

/// Outbound command channel: engine to host.
pub type CommandChannel = Channel<ChannelMutex, Command, COMMAND_QUEUE_SIZE>;

/// Time source abstraction.
///
/// # Example (testing with MockClock)
///
/// ```
/// use fanjoin::traits::test_impls::MockClock;
/// use fanjoin::{Clock, Duration, Timestamp};
///
/// let clock = MockClock::new();
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), Timestamp::from_secs(10));
/// ```
///
/// # Example (embedded with embassy)
///
/// ```text
/// struct EmbassyClock;
///
/// impl Clock for EmbassyClock {
///     type SleepFuture<'a> = impl Future<Output = ()>;
///
///     fn now(&self) -> Timestamp {
///         Timestamp::from_millis(embassy_time::Instant::now().as_millis())
///     }
///
///     fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
///         embassy_time::Timer::at(embassy_time::Instant::from_millis(time.as_millis()))
///     }
/// }
/// ```
pub trait Clock {
    /// Future type returned by sleep_until.
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    /// Get the current timestamp.
    fn now(&self) -> Timestamp;

    /// Sleep until the given timestamp.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// Random number generator.
///
/// Used for trickle fire points, probe jitter, discovery back-off and fixed
/// channel selection.
pub trait Random {
    /// Generate a random u64 in the range [min, max). Returns `min` when
    /// `max <= min`.
    fn gen_range(&mut self, min: u64, max: u64) -> u64;

    /// Generate a random u32.
    fn gen_u32(&mut self) -> u32 {
        self.gen_range(0, u32::MAX as u64 + 1) as u32
    }

    /// Generate a random u16.
    fn gen_u16(&mut self) -> u16 {
        self.gen_range(0, u16::MAX as u64 + 1) as u16
    }
}

/// Read-only view of the routing collaborator.
///
/// The engine consults routing state when classifying advertisements and when
/// deciding which neighbors deserve liveness probes. It never drives routing
/// directly; requests go out as [`Command`]s.
pub trait Routing {
    /// Our current rank, or `None` when not attached to a DODAG.
    fn current_rank(&self) -> Option<u16>;

    /// Whether `addr` is one of our selected DODAG parents.
    fn is_dodag_parent(&self, addr: &Eui64) -> bool;

    /// Whether `addr` is in the routing parent candidate set.
    fn is_parent_candidate(&self, addr: &Eui64) -> bool;

    /// Whether we are attached to any DODAG.
    fn have_dodag(&self) -> bool;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing and doc tests.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use alloc::vec::Vec;
    use core::cell::Cell;
    use core::future::{ready, Ready};

    use super::*;

    /// Mock clock for testing (synchronous, time advances manually).
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn at(time: Timestamp) -> Self {
            Self {
                current: Cell::new(time),
            }
        }

        /// Jump to the given timestamp.
        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        /// Advance time by the given duration.
        pub fn advance(&self, duration: crate::time::Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
            // Tests drive time manually.
            ready(())
        }
    }

    /// Mock random for testing (deterministic).
    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            // Simple LCG; the low bits cycle quickly, so draw from the high ones.
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let range = max.saturating_sub(min);
            if range == 0 {
                return min;
            }
            min + ((self.state >> 16) % range)
        }
    }

    /// Scripted routing state.
    #[derive(Default)]
    pub struct MockRouting {
        pub rank: Option<u16>,
        pub parents: Vec<Eui64>,
        pub candidates: Vec<Eui64>,
        pub dodag: bool,
    }

    impl MockRouting {
        pub fn new() -> Self {
            Self::default()
        }

        /// Attached with the given rank.
        pub fn attached(rank: u16) -> Self {
            Self {
                rank: Some(rank),
                dodag: true,
                ..Self::default()
            }
        }
    }

    impl Routing for MockRouting {
        fn current_rank(&self) -> Option<u16> {
            self.rank
        }

        fn is_dodag_parent(&self, addr: &Eui64) -> bool {
            self.parents.contains(addr)
        }

        fn is_parent_candidate(&self, addr: &Eui64) -> bool {
            self.candidates.contains(addr) || self.parents.contains(addr)
        }

        fn have_dodag(&self) -> bool {
            self.dodag
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_impls::*;
    use super::*;

    #[test]
    fn test_mock_random_stays_in_range() {
        let mut rng = MockRandom::new();
        for _ in 0..1000 {
            let v = rng.gen_range(10, 20);
            assert!((10..20).contains(&v));
        }
        assert_eq!(rng.gen_range(5, 5), 5);
        assert_eq!(rng.gen_range(7, 3), 7);
    }

    #[test]
    fn test_mock_random_covers_small_ranges() {
        let mut rng = MockRandom::with_seed(1);
        let mut seen = [false; 4];
        for _ in 0..200 {
            seen[rng.gen_range(0, 4) as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_mock_routing_candidates_include_parents() {
        let mut routing = MockRouting::attached(512);
        routing.parents.push([1; 8]);
        assert!(routing.is_parent_candidate(&[1; 8]));
        assert!(!routing.is_parent_candidate(&[2; 8]));
        assert_eq!(routing.current_rank(), Some(512));
        assert!(routing.have_dodag());
    }
}
