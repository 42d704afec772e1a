#![forbid(unsafe_code)]
//! fanjoin - Join and attach engine for Wi-SUN style field area mesh networks
//!
//! Takes a node from "interface up" to "attached to a PAN with a routing
//! parent", keeps it attached, and tears the attachment down when asked.
//!
//! This crate is `no_std` but **requires the `alloc` crate**. Pools are
//! heap-allocated once at bring-up with sizes fixed by [`BootstrapConfig`].
//!
//! # Key Properties
//!
//! - Four trickle timers pace PAN advertisements, configurations and their solicits
//! - Candidate parents are ranked by transmit failures, link quality and routing cost
//! - Neighbor liveness is checked with probes scheduled from registration lifetimes
//! - PAN versions use serial-number arithmetic and survive wrap-around
//! - No radio, codec, security handshake or routing protocol inside: those are
//!   collaborators reached through [`Command`]s and the [`Routing`] trait
//!
//! # Example (basic usage)
//!
//! ```
//! use fanjoin::traits::test_impls::{MockClock, MockRandom, MockRouting};
//! use fanjoin::{BootstrapConfig, Engine, Event, JoinState, Timestamp};
//!
//! let mut config = BootstrapConfig::default();
//! config.network_name = "field-area-7".into();
//!
//! let mut engine = Engine::new(
//!     MockRandom::new(),
//!     MockClock::new(),
//!     MockRouting::new(),
//!     [0x02, 0, 0, 0, 0, 0, 0, 1],
//!     config,
//! )
//! .unwrap();
//!
//! engine.handle_event(Event::DiscoveryStart, Timestamp::ZERO);
//! assert_eq!(engine.state(), JoinState::ActiveScan);
//!
//! // The host drains commands: schedule, status, and later transmit requests.
//! while let Ok(command) = engine.commands().try_receive() {
//!     let _ = command;
//! }
//! ```
//!
//! # Example (integration pattern)
//!
//! ```text
//! use fanjoin::{Engine, Event, Command};
//!
//! // Implement Clock, Random and Routing for your platform...
//!
//! // let mut engine = Engine::new(random, clock, routing, eui64, config)?;
//! // engine.events().send(Event::DiscoveryStart).await;
//!
//! // Spawn the engine's run loop
//! // spawn(async move { engine.run().await });
//!
//! // Serve its commands
//! // match engine.commands().receive().await {
//! //     Command::Transmit(req) => radio.send(codec.encode(engine.outbound_frame(req.kind))),
//! //     Command::AuthStart { pan_id, target } => supplicant.start(pan_id, target),
//! //     ...
//! // }
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Frames, events, commands, states, protocol constants
//! - [`traits`] - Clock, Random and Routing traits
//! - [`engine`] - Engine struct, event loop and public API
//! - [`bootstrap`] - Join state machine
//! - [`trickle`] - RFC 6206 trickle timer
//! - [`candidate`] - Candidate parent store
//! - [`neighbor`] - Neighbor table
//! - [`nud`] - Neighbor liveness probes
//! - [`channel`] - Channel plans and hopping schedule
//! - [`serial`] - RFC 1982 sequence comparison
//! - [`stats`] - Counters
//! - [`time`] - Timestamp and Duration types
//! - [`config`] - Bring-up configuration

#![no_std]

// Prevent test/debug features from being used in release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It includes a predictable random source unsuitable for deployment."
);

#[cfg(all(feature = "debug", not(test), not(debug_assertions)))]
compile_error!(
    "The `debug` feature must not be enabled in release builds. \
     It adds protocol tracing overhead intended only for development and simulation."
);

extern crate alloc;

#[macro_use]
pub mod debug;

mod analyzer;
pub mod bootstrap;
pub mod candidate;
pub mod channel;
pub mod config;
pub mod engine;
pub mod neighbor;
pub mod nud;
pub mod serial;
pub mod stats;
pub mod time;
pub mod traits;
pub mod trickle;
pub mod types;

// Re-export main types at crate root
pub use candidate::{CandidateHandle, CandidateRecord, CandidateStore};
pub use channel::{ChannelMask, ChannelPlan, HoppingSchedule};
pub use config::{BootstrapConfig, NetworkSize};
pub use engine::Engine;
pub use nud::ProbeKind;
pub use stats::{DropReason, JoinStats, TrickleKind};
pub use time::{Duration, Timestamp, TICK};
pub use traits::{Clock, CommandChannel, EventChannel, Random, Routing};
pub use trickle::{Trickle, TrickleParams};
pub use types::{
    AuthResult, Command, Error, Eui64, Event, Frame, FrameKind, InfoSnapshot, JoinState,
    JoinStatus, PanId, Role, RoutingEvent, SecurityLevel, TransmitRequest,
};
