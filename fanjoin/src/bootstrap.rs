//! Join state machine.
//!
//! ```text
//!            DiscoveryStart
//!   Idle ─────────────────► ActiveScan ◄────────────────────────────┐
//!                             │  best candidate                     │
//!                             ▼                                     │
//!                       Authenticating ── failure / no candidates ──┤
//!                             │  auth ok                            │
//!                             ▼                                     │
//!                         ConfigScan ──── solicits exhausted ───────┤
//!                             │  PAN config learned (+1..2 s)       │
//!                             ▼                                     │
//!                          RplScan ─────── no more discovery ───────┤
//!                             │  DAO acknowledged                   │
//!                             ▼                                     │
//!                           Done ── disconnect ──► Leaving ─────────┘
//! ```
//!
//! A border router skips straight from `Idle` to `Done`.

use crate::engine::Engine;
use crate::stats::TrickleKind;
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, Random, Routing};
use crate::types::{
    AuthResult, Command, Eui64, JoinState, JoinStatus, PanId, Role, RoutingEvent,
    CANDIDATE_MAX_AGE, CONFIG_APPLY_DELAY_MAX, CONFIG_APPLY_DELAY_MIN, DIS_INTERVAL_MAX,
    DIS_INTERVAL_MIN, NUD_EVAL_INTERVAL, PAN_CAP_ACTIVE, PAN_CAP_DISCOVERY,
    PAN_TIMEOUT_WARNING_DIVISOR, PAN_VERSION_REFRESH_DIVISOR,
};
#[cfg(feature = "debug")]
use crate::debug::DebugEvent;

impl<R, Clk, Rt> Engine<R, Clk, Rt>
where
    R: Random,
    Clk: Clock,
    Rt: Routing,
{
    pub(crate) fn set_state(&mut self, to: JoinState, now: Timestamp) {
        let from = self.state;
        if from == to {
            return;
        }
        log::info!("join state {:?} -> {:?} at {:?}", from, to, now);
        emit_debug!(
            self,
            DebugEvent::StateChanged {
                timestamp: now,
                from,
                to,
            }
        );
        self.state = to;
    }

    pub(crate) fn on_discovery_start(&mut self, now: Timestamp) {
        self.push_command(Command::RoutingLimits {
            parent_candidate_max: self.config.rpl_parent_candidate_max,
            selected_parent_max: self.config.rpl_selected_parent_max,
        });
        if self.config.role == Role::BorderRouter {
            self.start_border_router(now);
        } else {
            self.enter_active_scan(now);
        }
    }

    /// Rebuild the local hopping schedule from configuration.
    fn reconfigure_schedule(&mut self) {
        match crate::channel::HoppingSchedule::configure(&self.config.hopping, &mut self.random) {
            Ok(schedule) => self.schedule = schedule,
            Err(e) => log::warn!("keeping previous hopping schedule: {}", e),
        }
    }

    // --- Discovery ---

    pub(crate) fn enter_active_scan(&mut self, now: Timestamp) {
        self.set_state(JoinState::ActiveScan, now);
        self.stop_trickles();
        self.start_trickle(TrickleKind::PanAdvertSolicit);
        self.abandon_probes();

        self.candidates.set_per_pan_cap(PAN_CAP_DISCOVERY);
        self.candidates.age_out(now, CANDIDATE_MAX_AGE, usize::MAX, 0);

        self.configuration_learned = false;
        self.primary_parent = None;
        self.auth_target = None;
        self.pcs_count = 0;
        self.pan_timeout_warned = false;

        self.reconfigure_schedule();
        self.push_command(Command::SetChannelSchedule(self.schedule.clone()));
        self.push_command(Command::Status(JoinStatus::Connecting));

        let first_solicit = self.trickles[TrickleKind::PanAdvertSolicit.index()]
            .time_until_next_fire()
            .unwrap_or(Duration::ZERO);
        let wait = self.discovery_wait();
        self.state_timer = Some(first_solicit + wait);
    }

    /// One discovery interval plus jitter.
    fn discovery_wait(&mut self) -> Duration {
        let imin = self.trickle_params.imin;
        imin + Duration::from_millis(self.random.gen_range(0, imin.as_millis()))
    }

    /// Discovery wait expired: bind the best candidate or keep listening.
    fn discovery_step(&mut self, now: Timestamp) {
        match self.next_auth_target() {
            Some((pan_id, addr)) => self.start_authentication(pan_id, addr, now),
            None => {
                log::debug!("no candidate parent yet, reconfiguring for discovery");
                self.reconfigure_schedule();
                self.push_command(Command::SetChannelSchedule(self.schedule.clone()));
                let wait = self.discovery_wait();
                self.state_timer = Some(wait);
            }
        }
    }

    /// Bind `addr` in `pan_id` as authentication target.
    fn start_authentication(&mut self, pan_id: PanId, addr: Eui64, now: Timestamp) {
        if self.pan_id != Some(pan_id) {
            let old = self.pan_id;
            log::info!("PAN id {:?} -> {:#06x}", old, pan_id);
            self.neighbors.clear();
            self.probes.clear();
            self.pan_id = Some(pan_id);
            self.push_command(Command::Status(JoinStatus::PanIdChanged { old, new: pan_id }));
        }

        let temp = self.config.temp_link_min_timeout;
        if self.neighbors.bind(addr, now, temp).is_none() {
            log::warn!("neighbor table full, authenticating {:02x?} unbound", addr);
            self.stats.record_neighbor_rejected();
        }

        #[cfg(feature = "debug")]
        if let Some(record) = self.candidates.best().and_then(|h| self.candidates.get(h)) {
            let event = DebugEvent::CandidateSelected {
                pan_id,
                addr,
                routing_cost: record.metrics.routing_cost,
                rssi: record.rssi,
            };
            emit_debug!(self, event);
        }

        self.stop_trickles();
        self.candidates.set_per_pan_cap(PAN_CAP_ACTIVE);
        self.candidates.age_out(now, CANDIDATE_MAX_AGE, PAN_CAP_ACTIVE, pan_id);

        self.auth_target = Some((pan_id, addr));
        self.state_timer = None;
        self.set_state(JoinState::Authenticating, now);
        self.push_command(Command::AuthStart {
            pan_id,
            target: addr,
        });
    }

    pub(crate) fn on_auth_result(&mut self, result: AuthResult, now: Timestamp) {
        if self.state != JoinState::Authenticating {
            log::debug!("ignoring {:?} outside authentication", result);
            return;
        }
        match result {
            AuthResult::Ok => {
                if let Some((_, addr)) = self.auth_target {
                    if let Some(neighbor) = self.neighbors.get_mut(&addr) {
                        neighbor.trusted = true;
                    }
                }
                self.enter_config_scan(now);
            }
            AuthResult::TxError(addr) => {
                let evicted = self.candidates.mark_failure(&addr);
                log::info!("authenticator {:02x?} unreachable ({} evicted)", addr, evicted);
                match self.next_auth_target() {
                    Some((pan_id, next)) => self.start_authentication(pan_id, next, now),
                    None => self.enter_active_scan(now),
                }
            }
            AuthResult::Failure => {
                if let Some((_, addr)) = self.auth_target {
                    self.candidates.remove(&addr);
                }
                log::warn!("authentication failed, restarting discovery");
                self.enter_active_scan(now);
            }
        }
    }

    // --- Configuration ---

    fn enter_config_scan(&mut self, now: Timestamp) {
        self.set_state(JoinState::ConfigScan, now);
        self.stop_trickles();
        self.pcs_count = 0;
        self.start_trickle(TrickleKind::PanConfigSolicit);
        self.state_timer = None;
        if self.configuration_learned {
            self.arm_config_apply();
        }
    }

    /// Short settle delay between learning the configuration and using it.
    pub(crate) fn arm_config_apply(&mut self) {
        let delay = self.random_duration(CONFIG_APPLY_DELAY_MIN, CONFIG_APPLY_DELAY_MAX);
        self.state_timer = Some(delay);
    }

    fn enter_rpl_scan(&mut self, now: Timestamp) {
        self.set_state(JoinState::RplScan, now);
        self.stop_trickles();
        self.nud_eval_left = NUD_EVAL_INTERVAL;
        if let Some(parent) = self.primary_parent {
            self.push_command(Command::RegisterAddress { parent });
        }
        self.arm_discovery_solicit();
    }

    fn arm_discovery_solicit(&mut self) {
        let wait = self.random_duration(DIS_INTERVAL_MIN, DIS_INTERVAL_MAX);
        self.state_timer = Some(wait);
    }

    fn enter_done(&mut self, now: Timestamp) {
        self.set_state(JoinState::Done, now);
        self.state_timer = None;
        self.reset_pan_timeout();
        if self.config.role.advertises() {
            self.start_trickle(TrickleKind::PanAdvert);
            self.start_trickle(TrickleKind::PanConfig);
        }
        self.push_command(Command::Status(JoinStatus::Connected));
    }

    pub(crate) fn reset_pan_timeout(&mut self) {
        self.pan_timeout_left = self.config.pan_timeout;
        self.pan_timeout_warned = false;
    }

    // --- Timers ---

    pub(crate) fn on_trickle_fire(&mut self, kind: TrickleKind, now: Timestamp) {
        emit_debug!(self, DebugEvent::TrickleFired { timer: kind });
        match kind {
            TrickleKind::PanAdvert | TrickleKind::PanConfig => {
                if self.state == JoinState::Done && self.config.role.advertises() {
                    self.transmit(kind.frame_kind());
                }
            }
            TrickleKind::PanAdvertSolicit => {
                if self.state == JoinState::ActiveScan {
                    self.transmit(kind.frame_kind());
                }
            }
            TrickleKind::PanConfigSolicit => {
                if self.state != JoinState::ConfigScan || self.configuration_learned {
                    return;
                }
                if self.pcs_count >= crate::types::PCS_MAX {
                    log::info!("no PAN configuration after {} solicits", self.pcs_count);
                    self.enter_active_scan(now);
                } else {
                    self.pcs_count += 1;
                    self.transmit(kind.frame_kind());
                }
            }
        }
    }

    pub(crate) fn on_state_timer(&mut self, now: Timestamp) {
        match self.state {
            JoinState::ActiveScan => self.discovery_step(now),
            JoinState::ConfigScan => {
                if self.configuration_learned {
                    self.enter_rpl_scan(now);
                }
            }
            JoinState::RplScan => {
                if self.config.role.advertises() && !self.routing.have_dodag() {
                    self.push_command(Command::TransmitDiscoverySolicit);
                }
                self.arm_discovery_solicit();
            }
            JoinState::Leaving => self.finish_leaving(now),
            JoinState::Idle | JoinState::Authenticating | JoinState::Done => {}
        }
    }

    /// PAN keep-alive for nodes, PAN version refresh for the border router.
    pub(crate) fn tick_keepalive(&mut self, elapsed: Duration, now: Timestamp) {
        if self.state != JoinState::Done {
            return;
        }

        if self.config.role == Role::BorderRouter {
            self.pan_version_timer -= elapsed;
            if self.pan_version_timer.is_zero() {
                self.pan_version_timer = self.config.pan_timeout.div(PAN_VERSION_REFRESH_DIVISOR);
                let old = self.pan_version.unwrap_or(0);
                let new = old.wrapping_add(1);
                self.pan_version = Some(new);
                log::debug!("PAN version {} -> {}", old, new);
                emit_debug!(self, DebugEvent::PanVersionChanged { old, new });
                self.feed_inconsistent(TrickleKind::PanConfig);
            }
            return;
        }

        self.pan_timeout_left -= elapsed;
        if self.pan_timeout_left.is_zero() {
            log::warn!("PAN timeout, no configuration refresh heard");
            self.disconnect(true, now);
            return;
        }
        let warning = self.config.pan_timeout.div(PAN_TIMEOUT_WARNING_DIVISOR);
        if !self.pan_timeout_warned && self.pan_timeout_left < warning {
            self.pan_timeout_warned = true;
            self.push_command(Command::DaoRefresh);
        }
    }

    // --- Routing ---

    pub(crate) fn on_routing_event(&mut self, event: RoutingEvent, now: Timestamp) {
        match (event, self.state) {
            (RoutingEvent::DaoDone, JoinState::RplScan) => self.enter_done(now),
            (RoutingEvent::LocalRepairStart, JoinState::Done) => {
                self.set_state(JoinState::RplScan, now);
                self.stop_trickles();
                self.abandon_probes();
                self.arm_discovery_solicit();
                self.push_command(Command::Status(JoinStatus::Disconnected));
            }
            (RoutingEvent::NoMoreDiscovery, JoinState::RplScan) => self.enter_active_scan(now),
            (RoutingEvent::PoisonFinished, JoinState::Leaving) => self.finish_leaving(now),
            (event, state) => log::debug!("ignoring {:?} in {:?}", event, state),
        }
    }

    // --- Leaving ---

    /// Administrative or timeout-driven disconnect.
    pub(crate) fn disconnect(&mut self, fast: bool, now: Timestamp) {
        match self.state {
            JoinState::Idle | JoinState::Leaving => {}
            JoinState::Done => {
                self.set_state(JoinState::Leaving, now);
                self.stop_trickles();
                self.abandon_probes();
                self.push_command(Command::Poison { fast });
                self.push_command(Command::Status(JoinStatus::Disconnected));
                self.state_timer = Some(if fast {
                    self.config.disconnect_timeout_fast
                } else {
                    self.config.disconnect_timeout_normal
                });
            }
            _ => self.enter_active_scan(now),
        }
    }

    fn finish_leaving(&mut self, now: Timestamp) {
        self.state_timer = None;
        if self.config.role == Role::BorderRouter {
            self.set_state(JoinState::Idle, now);
        } else {
            self.enter_active_scan(now);
        }
    }

    // --- Border router ---

    fn start_border_router(&mut self, now: Timestamp) {
        let Some(pan_id) = self.config.pan_id else {
            log::warn!("border router without a PAN id");
            return;
        };
        self.reconfigure_schedule();
        let bsi = match self.config.stored_bsi {
            Some(stored) => stored.wrapping_add(1),
            None => self.random.gen_u16(),
        };
        self.schedule.bsi = bsi;
        self.pan_id = Some(pan_id);
        self.push_command(Command::PersistBorderRouterIds { pan_id, bsi });

        let version = match self.config.initial_pan_version {
            Some(version) => version,
            None => self.random.gen_u16(),
        };
        self.pan_version = Some(version);
        self.configuration_learned = true;
        self.primary_parent = None;
        self.pan_version_timer = self.config.pan_timeout.div(PAN_VERSION_REFRESH_DIVISOR);
        log::info!("rooting PAN {:#06x}, bsi {}, version {}", pan_id, bsi, version);

        self.set_state(JoinState::Done, now);
        self.state_timer = None;
        self.stop_trickles();
        self.start_trickle(TrickleKind::PanAdvert);
        self.start_trickle(TrickleKind::PanConfig);
        self.push_command(Command::SetChannelSchedule(self.schedule.clone()));
        self.push_command(Command::Status(JoinStatus::Connected));
    }
}
