//! SimNode wrapper and simulated collaborators for fanjoin engines.

use std::cell::Cell;
use std::future::{ready, Ready};
use std::sync::{Arc, Mutex};

use fanjoin::debug::{DebugEmitter, DebugEvent};
use fanjoin::{
    BootstrapConfig, Clock, Command, Duration, Engine, Error, Eui64, Event, Frame, FrameKind,
    JoinState, PanId, Random, Role, Routing, Timestamp,
};

/// Clock driven by the simulator.
pub struct SimClock {
    current: Cell<Timestamp>,
}

impl SimClock {
    pub fn at(time: Timestamp) -> Self {
        Self {
            current: Cell::new(time),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }

    pub fn advance(&self, duration: Duration) {
        self.current.set(self.current.get() + duration);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::at(Timestamp::ZERO)
    }
}

impl Clock for SimClock {
    type SleepFuture<'a> = Ready<()>;

    fn now(&self) -> Timestamp {
        self.current.get()
    }

    fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
        ready(())
    }
}

/// Deterministic LCG, one per node.
pub struct SimRandom {
    state: u64,
}

impl SimRandom {
    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let range = max.saturating_sub(min);
        if range == 0 {
            return min;
        }
        min + ((self.state >> 16) % range)
    }
}

/// Scripted routing state: one parent, rank set on registration.
#[derive(Debug, Clone, Default)]
pub struct SimRouting {
    pub rank: Option<u16>,
    pub parent: Option<Eui64>,
}

impl SimRouting {
    pub fn attach(&mut self, parent: Eui64, rank: u16) {
        self.parent = Some(parent);
        self.rank = Some(rank);
    }

    pub fn detach(&mut self) {
        self.parent = None;
        self.rank = None;
    }
}

impl Routing for SimRouting {
    fn current_rank(&self) -> Option<u16> {
        self.rank
    }

    fn is_dodag_parent(&self, addr: &Eui64) -> bool {
        self.parent.as_ref() == Some(addr)
    }

    fn is_parent_candidate(&self, addr: &Eui64) -> bool {
        self.is_dodag_parent(addr)
    }

    fn have_dodag(&self) -> bool {
        self.rank.is_some()
    }
}

/// Collects debug events into a shared buffer.
struct Recorder(Arc<Mutex<Vec<DebugEvent>>>);

impl DebugEmitter for Recorder {
    fn emit(&mut self, event: DebugEvent) {
        if let Ok(mut events) = self.0.lock() {
            events.push(event);
        }
    }
}

/// Engine type used for simulated nodes.
pub type SimEngine = Engine<SimRandom, SimClock, SimRouting>;

/// A simulated interface: one engine plus its debug trace.
pub struct SimNode {
    inner: SimEngine,
    debug_events: Arc<Mutex<Vec<DebugEvent>>>,
    /// When the node was created.
    pub created_at: Timestamp,
}

impl SimNode {
    pub fn new(
        addr: Eui64,
        config: BootstrapConfig,
        seed: u64,
        created_at: Timestamp,
    ) -> Result<Self, Error> {
        let mut inner = Engine::new(
            SimRandom::with_seed(seed),
            SimClock::at(created_at),
            SimRouting::default(),
            addr,
            config,
        )?;
        let debug_events = Arc::new(Mutex::new(Vec::new()));
        inner.set_debug_emitter(Box::new(Recorder(Arc::clone(&debug_events))));
        Ok(Self {
            inner,
            debug_events,
            created_at,
        })
    }

    pub fn addr(&self) -> Eui64 {
        *self.inner.own_addr()
    }

    pub fn inner(&self) -> &SimEngine {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut SimEngine {
        &mut self.inner
    }

    pub fn role(&self) -> Role {
        self.inner.config().role
    }

    pub fn state(&self) -> JoinState {
        self.inner.state()
    }

    pub fn is_joined(&self) -> bool {
        self.inner.state() == JoinState::Done
    }

    pub fn pan_id(&self) -> Option<PanId> {
        self.inner.pan_id()
    }

    pub fn parent(&self) -> Option<Eui64> {
        self.inner.routing().parent
    }

    pub fn routing_cost(&self) -> u16 {
        self.inner.routing_cost()
    }

    pub fn routing_mut(&mut self) -> &mut SimRouting {
        self.inner.routing_mut()
    }

    /// Feed one event at `now`.
    pub fn handle_event(&mut self, event: Event, now: Timestamp) {
        // Keep clock.now() consistent for anything that reads it.
        self.inner.clock().set(now);
        self.inner.handle_event(event, now);
    }

    /// Frame the engine would put on air for `kind`.
    pub fn outbound_frame(&self, kind: FrameKind) -> Frame {
        self.inner.outbound_frame(kind)
    }

    /// Drain the engine's command queue.
    pub fn take_commands(&self) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Ok(command) = self.inner.commands().try_receive() {
            commands.push(command);
        }
        commands
    }

    pub fn take_debug_events(&self) -> Vec<DebugEvent> {
        match self.debug_events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(_) => Vec::new(),
        }
    }
}
