//! Debug events for protocol tracing.
//!
//! Compiled into the event stream only with the `debug` feature. The simulator
//! installs an emitter to reconstruct join timelines.

use crate::stats::{DropReason, TrickleKind};
use crate::time::Timestamp;
use crate::types::{Eui64, FrameKind, JoinState, PanId};

/// Trait for receiving debug events from an engine.
/// Implemented by test harnesses to collect/print events.
pub trait DebugEmitter: Send {
    /// Called when a debug event is emitted.
    fn emit(&mut self, event: DebugEvent);
}

/// Debug events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// Join state changed.
    StateChanged {
        timestamp: Timestamp,
        from: JoinState,
        to: JoinState,
    },
    /// A candidate was picked for authentication.
    CandidateSelected {
        pan_id: PanId,
        addr: Eui64,
        routing_cost: u16,
        rssi: i16,
    },
    /// Inbound frame dropped.
    FrameDropped {
        kind: FrameKind,
        from: Eui64,
        reason: DropReason,
    },
    /// A trickle timer requested a transmission.
    TrickleFired { timer: TrickleKind },
    /// First PAN configuration learned.
    ConfigurationLearned {
        parent: Eui64,
        pan_version: u16,
        bsi: u16,
    },
    /// PAN version moved forward.
    PanVersionChanged { old: u16, new: u16 },
    /// Configuration from an unexpected broadcast schedule rejected.
    BsiRejected { from: Eui64, bsi: u16, ours: u16 },
    /// Liveness probe started.
    ProbeStarted { addr: Eui64, unreachability: bool },
    /// Liveness probe exhausted its retries.
    NeighborUnreachable { addr: Eui64 },
}

/// Emit a debug event from inside an `impl Engine` block.
///
/// Expands to nothing without the `debug` feature, so the event expression is
/// never evaluated.
#[cfg(feature = "debug")]
macro_rules! emit_debug {
    ($engine:expr, $event:expr) => {
        if let Some(emitter) = $engine.debug_emitter.as_mut() {
            emitter.emit($event);
        }
    };
}

#[cfg(not(feature = "debug"))]
macro_rules! emit_debug {
    ($engine:expr, $event:expr) => {};
}
