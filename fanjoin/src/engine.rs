//! Engine: the per-interface join context and its event loop.
//!
//! One [`Engine`] exists per network interface. It owns the four trickle
//! timers, the candidate store, the neighbor table and the probe pool, and is
//! driven by a serialized stream of [`Event`]s. Everything it wants from the
//! outside world leaves as a [`Command`].
//!
//! The protocol logic lives in sibling modules as further `impl Engine` blocks:
//! - [`analyzer`](crate::analyzer): inbound PAN frames
//! - [`bootstrap`](crate::bootstrap): join state transitions

#[cfg(feature = "debug")]
use alloc::boxed::Box;
use alloc::vec::Vec;

use embassy_sync::channel::Channel;

use crate::candidate::{CandidateStore, RslThresholds};
use crate::channel::HoppingSchedule;
use crate::config::BootstrapConfig;
#[cfg(feature = "debug")]
use crate::debug::{DebugEmitter, DebugEvent};
use crate::neighbor::NeighborTable;
#[cfg(feature = "debug")]
use crate::nud::ProbeKind;
use crate::nud::{schedule_policy, LivenessView, ProbeAction, ProbePool};
use crate::stats::{JoinStats, TrickleKind};
use crate::time::{Duration, Timestamp, TICK};
use crate::traits::{Clock, CommandChannel, EventChannel, Random, Routing};
use crate::trickle::{Trickle, TrickleParams};
use crate::types::{
    BroadcastTiming, Command, Error, Eui64, Event, Frame, FrameKind, GtkHash, InfoSnapshot,
    JoinState, PanId, PanInformation, Role, TransmitRequest, UnicastTiming, NUD_EVAL_INTERVAL,
    PAN_CAP_DISCOVERY,
};

/// Join engine for one interface.
pub struct Engine<R, Clk, Rt>
where
    R: Random,
    Clk: Clock,
    Rt: Routing,
{
    // Dependencies
    pub(crate) random: R,
    pub(crate) clock: Clk,
    pub(crate) routing: Rt,

    // Channels
    pub(crate) events: EventChannel,
    pub(crate) commands: CommandChannel,

    // Identity and configuration
    pub(crate) config: BootstrapConfig,
    pub(crate) own_addr: Eui64,
    pub(crate) trickle_params: TrickleParams,

    // Join state
    pub(crate) state: JoinState,
    /// Countdown to the current state's next action.
    pub(crate) state_timer: Option<Duration>,
    pub(crate) last_advance: Option<Timestamp>,

    // PAN
    pub(crate) pan_id: Option<PanId>,
    pub(crate) pan_version: Option<u16>,
    pub(crate) gtk_hash: Option<GtkHash>,
    pub(crate) configuration_learned: bool,
    pub(crate) primary_parent: Option<Eui64>,
    pub(crate) auth_target: Option<(PanId, Eui64)>,
    pub(crate) pan_size: u16,
    pub(crate) use_parent_bs: bool,
    pub(crate) schedule: HoppingSchedule,
    /// Superseded BSI and the end of its cool-down.
    pub(crate) bsi_block: Option<(u16, Timestamp)>,

    // Keep-alive
    pub(crate) pan_timeout_left: Duration,
    pub(crate) pan_timeout_warned: bool,
    /// Border router: time until the next PAN version increment.
    pub(crate) pan_version_timer: Duration,
    pub(crate) pcs_count: u8,

    // Advertisement timers, indexed by TrickleKind
    pub(crate) trickles: [Trickle; 4],

    // Pools
    pub(crate) candidates: CandidateStore,
    pub(crate) neighbors: NeighborTable,
    pub(crate) probes: ProbePool,

    // Housekeeping
    pub(crate) nud_eval_left: Duration,
    pub(crate) snapshot_left: Duration,

    // Metrics
    pub(crate) stats: JoinStats,

    #[cfg(feature = "debug")]
    pub(crate) debug_emitter: Option<Box<dyn DebugEmitter>>,
}

impl<R, Clk, Rt> Engine<R, Clk, Rt>
where
    R: Random,
    Clk: Clock,
    Rt: Routing,
{
    /// Bring up an interface.
    ///
    /// Fails on an invalid configuration or an unsupported channel plan.
    pub fn new(
        mut random: R,
        clock: Clk,
        routing: Rt,
        own_addr: Eui64,
        config: BootstrapConfig,
    ) -> Result<Self, Error> {
        config.validate()?;
        let schedule = HoppingSchedule::configure(&config.hopping, &mut random).map_err(|e| {
            log::warn!("interface bring-up failed: {}", e);
            e
        })?;

        let rsl = RslThresholds::new(
            config.device_min_sens,
            config.candidate_threshold,
            config.candidate_hysteresis,
        );

        Ok(Self {
            random,
            clock,
            routing,

            events: Channel::new(),
            commands: Channel::new(),

            trickle_params: config.trickle_params(),
            candidates: CandidateStore::new(config.candidate_pool_size, PAN_CAP_DISCOVERY, rsl),
            neighbors: NeighborTable::new(config.max_neighbors),
            probes: ProbePool::new(config.probe_pool_size),
            pan_timeout_left: config.pan_timeout,
            snapshot_left: config.snapshot_interval,
            own_addr,

            state: JoinState::Idle,
            state_timer: None,
            last_advance: None,

            pan_id: None,
            pan_version: None,
            gtk_hash: None,
            configuration_learned: false,
            primary_parent: None,
            auth_target: None,
            pan_size: 0,
            use_parent_bs: true,
            schedule,
            bsi_block: None,

            pan_timeout_warned: false,
            pan_version_timer: Duration::ZERO,
            pcs_count: 0,

            trickles: [Trickle::new(), Trickle::new(), Trickle::new(), Trickle::new()],

            nud_eval_left: NUD_EVAL_INTERVAL,

            stats: JoinStats::new(),

            #[cfg(feature = "debug")]
            debug_emitter: None,

            config,
        })
    }

    /// Install a debug event sink.
    #[cfg(feature = "debug")]
    pub fn set_debug_emitter(&mut self, emitter: Box<dyn DebugEmitter>) {
        self.debug_emitter = Some(emitter);
    }

    // --- Accessors ---

    pub fn state(&self) -> JoinState {
        self.state
    }

    pub fn own_addr(&self) -> &Eui64 {
        &self.own_addr
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    pub fn pan_id(&self) -> Option<PanId> {
        self.pan_id
    }

    pub fn pan_version(&self) -> Option<u16> {
        self.pan_version
    }

    pub fn primary_parent(&self) -> Option<Eui64> {
        self.primary_parent
    }

    pub fn is_configuration_learned(&self) -> bool {
        self.configuration_learned
    }

    pub fn schedule(&self) -> &HoppingSchedule {
        &self.schedule
    }

    pub fn candidates(&self) -> &CandidateStore {
        &self.candidates
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn probes(&self) -> &ProbePool {
        &self.probes
    }

    pub fn trickle(&self, kind: TrickleKind) -> &Trickle {
        &self.trickles[kind.index()]
    }

    pub fn stats(&self) -> &JoinStats {
        &self.stats
    }

    pub fn routing(&self) -> &Rt {
        &self.routing
    }

    pub fn routing_mut(&mut self) -> &mut Rt {
        &mut self.routing
    }

    pub fn clock(&self) -> &Clk {
        &self.clock
    }

    /// Inbound event channel.
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// Outbound command channel.
    pub fn commands(&self) -> &CommandChannel {
        &self.commands
    }

    /// Our routing cost: zero for a border router, the routing rank otherwise.
    pub fn routing_cost(&self) -> u16 {
        if self.config.role == Role::BorderRouter {
            0
        } else {
            self.routing.current_rank().unwrap_or(u16::MAX)
        }
    }

    /// Current neighbor/PAN info for operator tooling.
    pub fn snapshot(&self) -> InfoSnapshot {
        InfoSnapshot {
            routing_cost: self.routing_cost(),
            join_state: self.state.ordinal(),
            pan_id: self.pan_id,
            parent: self.primary_parent,
        }
    }

    /// Best remaining authentication target.
    pub fn next_auth_target(&self) -> Option<(PanId, Eui64)> {
        let handle = self.candidates.best()?;
        let record = self.candidates.get(handle)?;
        Some((record.pan_id, record.addr))
    }

    /// Decoded IE set for an outbound frame of `kind`, for the codec layer.
    pub fn outbound_frame(&self, kind: FrameKind) -> Frame {
        let pan_id = match kind {
            FrameKind::PanAdvertSolicit => 0xFFFF,
            _ => self.pan_id.unwrap_or(0xFFFF),
        };
        let mut frame = Frame::new(kind, self.own_addr, pan_id);
        frame.utt = Some(UnicastTiming::default());
        frame.us = Some(self.schedule.unicast_schedule());
        if kind.is_discovery() {
            frame.network_name = Some(self.config.network_name.clone());
        }
        match kind {
            FrameKind::PanAdvert => {
                frame.pan_info = Some(PanInformation {
                    pan_size: self.pan_size,
                    routing_cost: self.routing_cost(),
                    use_parent_bs: self.use_parent_bs,
                    rpl_routing_method: true,
                    fan_tps_version: 1,
                });
            }
            FrameKind::PanConfig => {
                frame.bt = Some(BroadcastTiming::default());
                frame.bs = Some(self.schedule.broadcast_schedule());
                frame.pan_version = self.pan_version;
                frame.gtk_hash = Some(self.gtk_hash.unwrap_or_default());
            }
            FrameKind::PanAdvertSolicit | FrameKind::PanConfigSolicit => {}
        }
        frame
    }

    // --- Event loop ---

    /// Run the engine: consume events from [`Engine::events`] and tick every [`TICK`].
    pub async fn run(&mut self) -> ! {
        use embassy_futures::select::{select, Either};

        loop {
            let wake = self.clock.now() + TICK;
            let result = select(self.events.receive(), self.clock.sleep_until(wake)).await;
            let now = self.clock.now();
            match result {
                Either::First(event) => self.handle_event(event, now),
                Either::Second(()) => self.handle_event(Event::Tick, now),
            }
        }
    }

    /// Process one event at `now`.
    ///
    /// Timers are advanced to `now` first, so a frame is always judged against
    /// up-to-date timer state.
    pub fn handle_event(&mut self, event: Event, now: Timestamp) {
        self.advance_timers(now);

        match event {
            Event::Tick => {}
            Event::DiscoveryStart => self.on_discovery_start(now),
            Event::Frame(frame) => self.handle_frame(frame, now),
            Event::AuthResult(result) => self.on_auth_result(result, now),
            Event::Routing(event) => self.on_routing_event(event, now),
            Event::Disconnect { fast } => self.disconnect(fast, now),
            Event::ProbeStatus { addr, acked } => {
                let released = if acked {
                    self.probes.acked(&addr)
                } else {
                    self.probes.send_failed(&addr, &mut self.random)
                };
                if released {
                    self.clear_nud_flag(&addr);
                }
            }
            Event::ProbeResponse { addr } => {
                if self.probes.response_received(&addr) {
                    log::debug!("probe answered by {:02x?}", addr);
                }
                self.clear_nud_flag(&addr);
            }
            Event::NeighborRegistered {
                addr,
                lifetime,
                child,
            } => {
                let temp = self.config.temp_link_min_timeout;
                if !self.neighbors.register(addr, lifetime, child, now, temp) {
                    self.stats.record_neighbor_rejected();
                }
            }
            Event::EtxSample { addr } => self.neighbors.record_etx_sample(&addr),
            Event::NeighborRemoved { addr } => {
                self.probes.cancel(&addr);
                self.neighbors.remove(&addr);
            }
        }
    }

    fn advance_timers(&mut self, now: Timestamp) {
        let elapsed = match self.last_advance {
            Some(last) => now.saturating_sub(last),
            None => Duration::ZERO,
        };
        self.last_advance = Some(now);
        if elapsed.is_zero() {
            return;
        }

        self.tick_trickles(elapsed, now);
        self.tick_probes(elapsed);
        self.tick_keepalive(elapsed, now);
        self.tick_housekeeping(elapsed, now);
        self.tick_state(elapsed, now);
    }

    fn tick_trickles(&mut self, elapsed: Duration, now: Timestamp) {
        for kind in [
            TrickleKind::PanAdvert,
            TrickleKind::PanAdvertSolicit,
            TrickleKind::PanConfig,
            TrickleKind::PanConfigSolicit,
        ] {
            let fired =
                self.trickles[kind.index()].tick(elapsed, &self.trickle_params, &mut self.random);
            if fired {
                self.on_trickle_fire(kind, now);
            }
        }
    }

    fn tick_probes(&mut self, elapsed: Duration) {
        if self.probes.is_empty() {
            return;
        }
        for action in self.probes.tick(elapsed, &mut self.random) {
            match action {
                ProbeAction::Send { addr, kind } => {
                    log::debug!("probing {:02x?} ({:?})", addr, kind);
                    self.push_command(Command::SendProbe { addr, kind });
                }
                ProbeAction::Remove(addr) => {
                    log::info!("neighbor {:02x?} unreachable", addr);
                    self.stats.record_probe_exhausted();
                    emit_debug!(self, DebugEvent::NeighborUnreachable { addr });
                    self.neighbors.remove(&addr);
                    self.push_command(Command::NeighborUnreachable(addr));
                }
                ProbeAction::Released(addr) => self.clear_nud_flag(&addr),
            }
        }
    }

    fn tick_housekeeping(&mut self, elapsed: Duration, now: Timestamp) {
        if let Some((_, until)) = self.bsi_block {
            if now >= until {
                self.bsi_block = None;
            }
        }

        if matches!(self.state, JoinState::RplScan | JoinState::Done) {
            self.nud_eval_left -= elapsed;
            if self.nud_eval_left.is_zero() {
                self.nud_eval_left = NUD_EVAL_INTERVAL;
                self.evaluate_liveness(now);
            }
        }

        if self.state != JoinState::Idle && !self.config.snapshot_interval.is_zero() {
            self.snapshot_left -= elapsed;
            if self.snapshot_left.is_zero() {
                self.snapshot_left = self.config.snapshot_interval;
                let snapshot = self.snapshot();
                self.push_command(Command::Snapshot(snapshot));
            }
        }
    }

    fn tick_state(&mut self, elapsed: Duration, now: Timestamp) {
        let Some(left) = self.state_timer else {
            return;
        };
        let left = left.saturating_sub(elapsed);
        if left.is_zero() {
            self.state_timer = None;
            self.on_state_timer(now);
        } else {
            self.state_timer = Some(left);
        }
    }

    /// Start probes for neighbors the liveness policy picks.
    fn evaluate_liveness(&mut self, now: Timestamp) {
        let mut views: Vec<(Eui64, LivenessView)> = self
            .neighbors
            .iter()
            .filter(|n| !n.nud_active)
            .map(|n| {
                let view = LivenessView {
                    trusted: n.trusted,
                    temporary: n.temporary,
                    child: n.child,
                    parent: self.routing.is_dodag_parent(&n.addr),
                    parent_candidate: self.routing.is_parent_candidate(&n.addr),
                    link_lifetime: n.lifetime,
                    since_refresh: n.since_refresh(now),
                    etx_samples: n.etx_samples,
                };
                (n.addr, view)
            })
            .collect();
        // Map order is not stable; keep random draws reproducible.
        views.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        for (addr, view) in views {
            let Some(kind) = schedule_policy(&view, &mut self.random) else {
                continue;
            };
            if !self.probes.start(addr, kind, &mut self.random) {
                continue;
            }
            self.stats.record_probe_started();
            emit_debug!(
                self,
                DebugEvent::ProbeStarted {
                    addr,
                    unreachability: kind == ProbeKind::Unreachability,
                }
            );
            if let Some(neighbor) = self.neighbors.get_mut(&addr) {
                neighbor.nud_active = true;
            }
        }
    }

    pub(crate) fn clear_nud_flag(&mut self, addr: &Eui64) {
        if let Some(neighbor) = self.neighbors.get_mut(addr) {
            neighbor.nud_active = false;
        }
    }

    /// Release every probe and clear the matching neighbor flags.
    pub(crate) fn abandon_probes(&mut self) {
        self.probes.clear();
        let addrs: Vec<Eui64> = self
            .neighbors
            .iter()
            .filter(|n| n.nud_active)
            .map(|n| n.addr)
            .collect();
        for addr in addrs {
            self.clear_nud_flag(&addr);
        }
    }

    // --- Outbound ---

    /// Queue a command for the host. A full queue drops the command.
    pub(crate) fn push_command(&mut self, command: Command) {
        if self.commands.try_send(command).is_err() {
            self.stats.record_command_dropped();
            log::warn!("{}, command dropped", Error::CommandQueueFull);
        }
    }

    /// Request transmission of an advertisement-class frame.
    pub(crate) fn transmit(&mut self, kind: FrameKind) {
        self.stats.record_tx(kind);
        self.push_command(Command::Transmit(TransmitRequest {
            kind,
            channels: self.schedule.channel_mask,
            security: kind.security(),
        }));
    }

    pub(crate) fn start_trickle(&mut self, kind: TrickleKind) {
        self.trickles[kind.index()].start(&self.trickle_params, &mut self.random);
    }

    pub(crate) fn stop_trickles(&mut self) {
        self.trickles.iter_mut().for_each(Trickle::stop);
    }

    pub(crate) fn feed_consistent(&mut self, kind: TrickleKind) {
        self.stats.record_consistent(kind);
        self.trickles[kind.index()].heard_consistent();
    }

    pub(crate) fn feed_inconsistent(&mut self, kind: TrickleKind) {
        self.stats.record_inconsistent(kind);
        self.trickles[kind.index()].heard_inconsistent(&self.trickle_params, &mut self.random);
    }

    /// Uniform duration in `[min, max]`.
    pub(crate) fn random_duration(&mut self, min: Duration, max: Duration) -> Duration {
        Duration::from_millis(
            self.random
                .gen_range(min.as_millis(), max.as_millis().saturating_add(1)),
        )
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;
    use crate::channel::{ChannelPlan, RegulatoryDomain};
    use crate::nud::ProbeKind;
    use crate::traits::test_impls::{MockClock, MockRandom, MockRouting};

    const ALL_TRICKLES: [TrickleKind; 4] = [
        TrickleKind::PanAdvert,
        TrickleKind::PanAdvertSolicit,
        TrickleKind::PanConfig,
        TrickleKind::PanConfigSolicit,
    ];

    fn running_trickles(engine: &TestEngine) -> Vec<bool> {
        ALL_TRICKLES
            .iter()
            .map(|&kind| engine.trickle(kind).is_running())
            .collect()
    }

    #[test]
    fn test_new_engine_is_idle() {
        let engine = engine();
        assert_eq!(engine.state(), JoinState::Idle);
        assert_eq!(engine.pan_id(), None);
        assert!(engine.candidates().is_empty());
        assert_eq!(engine.candidates().capacity(), 10);
        assert_eq!(engine.probes().capacity(), 5);
        assert_eq!(engine.snapshot().join_state, 0);
        assert!(drain(&engine).is_empty());
    }

    #[test]
    fn test_new_rejects_unsupported_plan() {
        let mut config = config();
        config.hopping.channel_plan = ChannelPlan::Regulatory {
            domain: RegulatoryDomain::Japan,
            operating_class: 9,
        };
        let result = Engine::new(MockRandom::new(), MockClock::new(), MockRouting::new(), OWN, config);
        assert_eq!(result.err(), Some(Error::UnsupportedOperatingClass));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = config();
        config.max_neighbors = 0;
        let result = Engine::new(MockRandom::new(), MockClock::new(), MockRouting::new(), OWN, config);
        assert!(matches!(result.err(), Some(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_full_command_queue_counts_drops() {
        let mut engine = engine();
        for _ in 0..40 {
            engine.push_command(Command::DaoRefresh);
        }
        assert_eq!(engine.stats().commands_dropped, 40 - 32);
        assert_eq!(drain(&engine).len(), 32);
    }

    #[test]
    fn test_outbound_frames_carry_required_ies() {
        let mut engine = engine();
        engine.pan_id = Some(0x1234);
        engine.pan_version = Some(7);

        let pa = engine.outbound_frame(FrameKind::PanAdvert);
        assert_eq!(pa.pan_id, 0x1234);
        assert_eq!(pa.network_name.as_deref(), Some(NETWORK));
        assert!(pa.utt.is_some() && pa.us.is_some());
        assert_eq!(pa.pan_info.unwrap().routing_cost, u16::MAX);

        let pas = engine.outbound_frame(FrameKind::PanAdvertSolicit);
        assert_eq!(pas.pan_id, 0xFFFF);

        let pc = engine.outbound_frame(FrameKind::PanConfig);
        assert!(pc.network_name.is_none());
        assert_eq!(pc.pan_version, Some(7));
        assert!(pc.bs.is_some() && pc.gtk_hash.is_some());
    }

    #[test]
    fn test_snapshot_reported_periodically() {
        let mut config = config();
        config.snapshot_interval = Duration::from_secs(10);
        let mut engine = engine_with(config);
        at(&mut engine, 0, Event::DiscoveryStart);
        drain(&engine);

        tick_until(&mut engine, Timestamp::ZERO, Duration::from_secs(10), |_| false);
        let snapshots: Vec<InfoSnapshot> = drain(&engine)
            .into_iter()
            .filter_map(|c| match c {
                Command::Snapshot(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].join_state, JoinState::ActiveScan.ordinal());
    }

    #[test]
    fn test_neighbor_events_update_table() {
        let mut engine = engine();
        at(
            &mut engine,
            1,
            Event::NeighborRegistered {
                addr: peer(1),
                lifetime: Duration::from_secs(7200),
                child: true,
            },
        );
        at(&mut engine, 2, Event::EtxSample { addr: peer(1) });
        let n = engine.neighbors().get(&peer(1)).unwrap();
        assert!(n.trusted && n.child);
        assert_eq!(n.etx_samples, 1);

        at(&mut engine, 3, Event::NeighborRemoved { addr: peer(1) });
        assert!(engine.neighbors().get(&peer(1)).is_none());
    }

    #[test]
    fn test_children_get_probed_near_deadline() {
        let mut engine = engine();
        engine.state = JoinState::Done;
        engine.configuration_learned = true;
        at(
            &mut engine,
            0,
            Event::NeighborRegistered {
                addr: peer(1),
                lifetime: Duration::from_secs(100),
                child: true,
            },
        );
        // Past 1.5x half the lifetime the policy always probes.
        engine.handle_event(Event::Tick, Timestamp::from_secs(80));
        tick_until(&mut engine, Timestamp::from_secs(80), Duration::from_secs(2), |e| {
            e.probes().is_probing(&peer(1))
        });
        assert!(engine.probes().is_probing(&peer(1)));
        assert!(engine.neighbors().get(&peer(1)).unwrap().nud_active);
        assert_eq!(engine.stats().probes_started, 1);
    }

    #[test]
    fn test_disconnect_during_rpl_scan_releases_liveness_checks() {
        let (mut engine, now) = engine_checking_child(JoinState::RplScan);
        engine.start_trickle(TrickleKind::PanAdvert);
        engine.start_trickle(TrickleKind::PanConfig);
        engine.start_trickle(TrickleKind::PanConfigSolicit);

        engine.handle_event(Event::Disconnect { fast: false }, now + TICK);

        assert_eq!(engine.state(), JoinState::ActiveScan);
        assert!(engine.probes().is_empty());
        assert!(!engine.neighbors().get(&peer(1)).unwrap().nud_active);
        // Only the discovery solicit runs again.
        assert_eq!(running_trickles(&engine), [false, true, false, false]);
    }

    #[test]
    fn test_disconnect_when_joined_releases_liveness_checks() {
        let (mut engine, now) = engine_checking_child(JoinState::Done);
        for kind in ALL_TRICKLES {
            engine.start_trickle(kind);
        }

        engine.handle_event(Event::Disconnect { fast: true }, now + TICK);

        assert_eq!(engine.state(), JoinState::Leaving);
        assert!(engine.probes().is_empty());
        assert!(!engine.neighbors().get(&peer(1)).unwrap().nud_active);
        assert_eq!(running_trickles(&engine), [false; 4]);
    }

    #[test]
    fn test_silent_child_is_declared_unreachable() {
        let (mut engine, start) = engine_checking_child(JoinState::Done);

        let mut sends = 0;
        let mut unreachable = 0;
        let mut now = start;
        while now < start + Duration::from_secs(130) {
            now += TICK;
            engine.handle_event(Event::Tick, now);
            for command in drain(&engine) {
                match command {
                    Command::SendProbe {
                        addr,
                        kind: ProbeKind::Unreachability,
                    } if addr == peer(1) => sends += 1,
                    Command::NeighborUnreachable(addr) if addr == peer(1) => unreachable += 1,
                    _ => {}
                }
            }
        }

        // First attempt plus two retries, then one verdict.
        assert_eq!(sends, 3);
        assert_eq!(unreachable, 1);
        assert!(!engine.neighbors().contains(&peer(1)));
        assert!(engine.probes().is_empty());
        assert_eq!(engine.stats().probes_exhausted, 1);
    }

    #[test]
    fn test_trickle_fires_before_frame_at_same_instant() {
        let mut engine = engine();
        engine.state = JoinState::Done;
        engine.configuration_learned = true;
        engine.pan_id = Some(0x1234);
        *engine.routing_mut() = MockRouting::attached(512);
        at(&mut engine, 0, Event::Tick);
        engine.start_trickle(TrickleKind::PanAdvert);
        drain(&engine);

        let wait = engine
            .trickle(TrickleKind::PanAdvert)
            .time_until_next_fire()
            .unwrap();
        // Dearer advert counts as consistent; with k = 1 it would suppress the fire.
        let frame = pan_advert(&engine, peer(2), 0x1234, 1024, -60);
        engine.handle_event(Event::Frame(frame), Timestamp::ZERO + wait);

        let adverts = drain(&engine)
            .into_iter()
            .filter(|c| matches!(c, Command::Transmit(req) if req.kind == FrameKind::PanAdvert))
            .count();
        assert_eq!(adverts, 1);
        assert_eq!(engine.trickle(TrickleKind::PanAdvert).counter(), 1);
        assert_eq!(engine.stats().consistent(TrickleKind::PanAdvert), 1);
    }
}
