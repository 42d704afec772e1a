//! Inbound PAN frame analysis.
//!
//! Every frame passes the same screening before its kind-specific handler:
//! 1. The engine must be joining (not `Idle` or `Leaving`).
//! 2. Discovery frames must carry our network name.
//! 3. Unicast timing and schedule IEs must be present.
//! 4. The sender's channel plan must be one we can follow.
//!
//! Handlers classify each frame as consistent or inconsistent for the trickle
//! timers and feed candidate, neighbor and PAN state.

use crate::engine::Engine;
use crate::serial::serial_gt;
use crate::stats::{DropReason, TrickleKind};
use crate::time::Timestamp;
use crate::traits::{Clock, Random, Routing};
use crate::types::{
    Command, Frame, FrameKind, JoinState, Role, CANDIDATE_MAX_AGE, PAN_CAP_ACTIVE,
    PAN_CAP_DISCOVERY,
};
#[cfg(feature = "debug")]
use crate::debug::DebugEvent;

impl<R, Clk, Rt> Engine<R, Clk, Rt>
where
    R: Random,
    Clk: Clock,
    Rt: Routing,
{
    pub(crate) fn handle_frame(&mut self, frame: Frame, now: Timestamp) {
        let result = self.screen_frame(&frame).and_then(|()| match frame.kind {
            FrameKind::PanAdvert => self.analyze_pan_advert(&frame, now),
            FrameKind::PanAdvertSolicit => self.analyze_pan_advert_solicit(&frame),
            FrameKind::PanConfig => self.analyze_pan_config(&frame, now),
            FrameKind::PanConfigSolicit => self.analyze_pan_config_solicit(&frame, now),
        });

        match result {
            Ok(()) => self.stats.record_rx(frame.kind),
            Err(reason) => {
                log::trace!("dropped {:?} from {:02x?}: {:?}", frame.kind, frame.src, reason);
                self.stats.record_drop(reason);
                emit_debug!(
                    self,
                    DebugEvent::FrameDropped {
                        kind: frame.kind,
                        from: frame.src,
                        reason,
                    }
                );
            }
        }
    }

    fn screen_frame(&self, frame: &Frame) -> Result<(), DropReason> {
        if matches!(self.state, JoinState::Idle | JoinState::Leaving) {
            return Err(DropReason::NotJoining);
        }
        if frame.kind.is_discovery()
            && frame.network_name.as_deref() != Some(self.config.network_name.as_str())
        {
            return Err(DropReason::NetworkName);
        }
        let (Some(_), Some(us)) = (frame.utt, frame.us.as_ref()) else {
            return Err(DropReason::Malformed);
        };
        if !self.schedule.accepts(us) {
            return Err(DropReason::ChannelPlan);
        }
        Ok(())
    }

    fn refresh_neighbor_schedule(&mut self, frame: &Frame) {
        self.neighbors
            .update_schedule(&frame.src, frame.utt, frame.us, frame.bt, frame.rssi);
    }

    // --- PAN advertisement ---

    fn analyze_pan_advert(&mut self, frame: &Frame, now: Timestamp) -> Result<(), DropReason> {
        let info = frame.pan_info.ok_or(DropReason::Malformed)?;
        if !info.rpl_routing_method {
            return Err(DropReason::UnsupportedRouting);
        }

        if self.config.role != Role::BorderRouter {
            let cap = if self.state == JoinState::ActiveScan {
                PAN_CAP_DISCOVERY
            } else {
                PAN_CAP_ACTIVE
            };
            let excluded = frame.us.map(|us| us.excluded).unwrap_or_default();
            let observed =
                self.candidates
                    .observe(frame.pan_id, frame.src, info.into(), frame.rssi, excluded, now);
            if observed.is_none() {
                self.stats.record_candidate_rejected();
            }
            self.candidates
                .age_out(now, CANDIDATE_MAX_AGE, cap, frame.pan_id);
        }

        if self.state == JoinState::ActiveScan || self.pan_id != Some(frame.pan_id) {
            self.refresh_neighbor_schedule(frame);
            return Ok(());
        }

        let temp = self.config.temp_link_min_timeout;
        match self.neighbors.upsert_temporary(frame.src, now, temp) {
            Some(neighbor) => neighbor.routing_cost = Some(info.routing_cost),
            None => self.stats.record_neighbor_rejected(),
        }
        self.refresh_neighbor_schedule(frame);

        if self.primary_parent == Some(frame.src) {
            self.pan_size = info.pan_size;
            self.use_parent_bs = info.use_parent_bs;
        }

        if info.routing_cost >= self.routing_cost() {
            self.feed_consistent(TrickleKind::PanAdvert);
        } else {
            self.feed_inconsistent(TrickleKind::PanAdvert);
        }
        Ok(())
    }

    fn analyze_pan_advert_solicit(&mut self, frame: &Frame) -> Result<(), DropReason> {
        self.refresh_neighbor_schedule(frame);
        self.feed_inconsistent(TrickleKind::PanAdvert);
        self.feed_consistent(TrickleKind::PanAdvertSolicit);

        // Someone else is scanning too; stop waiting out a long round.
        if self.state == JoinState::ActiveScan {
            let half = self.trickle_params.imin.div(2);
            if let Some(left) = self.state_timer {
                if left > half {
                    let shortened = self.random.gen_range(0, half.as_millis());
                    self.state_timer = Some(crate::time::Duration::from_millis(shortened));
                }
            }
        }
        Ok(())
    }

    // --- PAN configuration ---

    fn analyze_pan_config(&mut self, frame: &Frame, now: Timestamp) -> Result<(), DropReason> {
        if self.state == JoinState::ActiveScan {
            return Err(DropReason::NotJoining);
        }
        if self.pan_id != Some(frame.pan_id) {
            return Err(DropReason::PanMismatch);
        }
        let (Some(bs), Some(version), Some(gtk_hash)) = (frame.bs, frame.pan_version, frame.gtk_hash)
        else {
            return Err(DropReason::MissingIe);
        };

        self.refresh_neighbor_schedule(frame);

        if self.config.role == Role::BorderRouter {
            if self.pan_version == Some(version) {
                self.feed_consistent(TrickleKind::PanConfig);
            } else {
                self.feed_inconsistent(TrickleKind::PanConfig);
            }
            return Ok(());
        }

        if let Some((blocked, until)) = self.bsi_block {
            if bs.bsi == blocked && now < until {
                // Still hearing the pre-restart schedule; extend the cool-down.
                self.bsi_block = Some((blocked, now + self.config.pan_timeout));
                self.stats.record_bsi_rejected();
                return Ok(());
            }
        }

        if self.configuration_learned && self.use_parent_bs && bs.bsi != self.schedule.bsi {
            let ours = self.schedule.bsi;
            if bs.bsi == ours.wrapping_add(1) {
                log::info!("broadcast schedule {} -> {}, border router restarted", ours, bs.bsi);
                self.bsi_block = Some((ours, now + self.config.pan_timeout));
                self.disconnect(false, now);
            } else {
                log::warn!("rejecting broadcast schedule {} from {:02x?}", bs.bsi, frame.src);
                self.stats.record_bsi_rejected();
                emit_debug!(
                    self,
                    DebugEvent::BsiRejected {
                        from: frame.src,
                        bsi: bs.bsi,
                        ours,
                    }
                );
            }
            return Ok(());
        }

        if self.configuration_learned {
            let current = self.pan_version.unwrap_or(version);
            if version == current {
                self.feed_consistent(TrickleKind::PanConfig);
                return Ok(());
            }
            if !serial_gt(version, current) {
                log::debug!("stale PAN version {} (have {})", version, current);
                return Ok(());
            }
            self.feed_inconsistent(TrickleKind::PanConfig);
            log::debug!("PAN version {} -> {}", current, version);
            emit_debug!(
                self,
                DebugEvent::PanVersionChanged {
                    old: current,
                    new: version,
                }
            );
        }

        self.pan_version = Some(version);
        if self.gtk_hash != Some(gtk_hash) {
            self.gtk_hash = Some(gtk_hash);
            self.push_command(Command::GtkHashChanged(gtk_hash));
        }
        self.reset_pan_timeout();

        if !self.configuration_learned {
            self.configuration_learned = true;
            self.primary_parent = Some(frame.src);
            self.schedule.synchronize_to_parent(&bs);
            self.push_command(Command::SetChannelSchedule(self.schedule.clone()));
            log::info!(
                "PAN configuration learned from {:02x?}, version {}",
                frame.src,
                version
            );
            emit_debug!(
                self,
                DebugEvent::ConfigurationLearned {
                    parent: frame.src,
                    pan_version: version,
                    bsi: bs.bsi,
                }
            );
            if self.state == JoinState::ConfigScan {
                self.arm_config_apply();
            }
        }
        Ok(())
    }

    fn analyze_pan_config_solicit(
        &mut self,
        frame: &Frame,
        now: Timestamp,
    ) -> Result<(), DropReason> {
        if self.pan_id != Some(frame.pan_id) {
            return Err(DropReason::PanMismatch);
        }
        let temp = self.config.temp_link_min_timeout;
        if self.neighbors.upsert_temporary(frame.src, now, temp).is_none() {
            self.stats.record_neighbor_rejected();
        }
        self.refresh_neighbor_schedule(frame);
        self.feed_consistent(TrickleKind::PanConfigSolicit);
        self.feed_inconsistent(TrickleKind::PanConfig);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;

    use crate::channel::{ChannelPlan, RegulatoryDomain};
    use crate::engine::test_util::*;
    use crate::stats::{DropReason, TrickleKind};
    use crate::time::{Duration, Timestamp};
    use crate::types::*;

    /// Router that has learned PAN 0x10 version 5 from `peer(1)`, bsi 77.
    fn attached() -> TestEngine {
        let mut engine = engine();
        engine.state = JoinState::Done;
        engine.pan_id = Some(0x10);
        engine.pan_version = Some(5);
        engine.gtk_hash = Some([[5; 8]; 4]);
        engine.configuration_learned = true;
        engine.primary_parent = Some(peer(1));
        engine.schedule.bsi = 77;
        engine.start_trickle(TrickleKind::PanConfig);
        engine.start_trickle(TrickleKind::PanAdvert);
        at(&mut engine, 0, Event::Tick);
        engine
    }

    #[test]
    fn test_idle_engine_drops_everything() {
        let mut engine = engine();
        let frame = pan_advert(&engine, peer(1), 0x10, 256, -50);
        at(&mut engine, 0, Event::Frame(frame));
        assert_eq!(engine.stats().dropped(DropReason::NotJoining), 1);
        assert!(engine.candidates().is_empty());
    }

    #[test]
    fn test_wrong_network_name_dropped() {
        let mut engine = engine();
        at(&mut engine, 0, Event::DiscoveryStart);
        let mut frame = pan_advert(&engine, peer(1), 0x10, 256, -50);
        frame.network_name = Some(String::from("other-net"));
        at(&mut engine, 1, Event::Frame(frame));
        assert_eq!(engine.stats().dropped(DropReason::NetworkName), 1);
        assert_eq!(engine.stats().rx(FrameKind::PanAdvert), 0);
        assert!(engine.candidates().is_empty());
    }

    #[test]
    fn test_missing_schedule_is_malformed() {
        let mut engine = engine();
        at(&mut engine, 0, Event::DiscoveryStart);
        let mut frame = pan_advert(&engine, peer(1), 0x10, 256, -50);
        frame.us = None;
        at(&mut engine, 1, Event::Frame(frame));
        assert_eq!(engine.stats().dropped(DropReason::Malformed), 1);
    }

    #[test]
    fn test_incompatible_channel_plan_dropped() {
        let mut engine = engine();
        at(&mut engine, 0, Event::DiscoveryStart);
        let mut frame = pan_advert(&engine, peer(1), 0x10, 256, -50);
        if let Some(us) = frame.us.as_mut() {
            us.channel_plan = ChannelPlan::Regulatory {
                domain: RegulatoryDomain::Europe,
                operating_class: 1,
            };
        }
        at(&mut engine, 1, Event::Frame(frame));
        assert_eq!(engine.stats().dropped(DropReason::ChannelPlan), 1);
    }

    #[test]
    fn test_advert_without_routing_method_dropped() {
        let mut engine = engine();
        at(&mut engine, 0, Event::DiscoveryStart);
        let mut frame = pan_advert(&engine, peer(1), 0x10, 256, -50);
        if let Some(info) = frame.pan_info.as_mut() {
            info.rpl_routing_method = false;
        }
        at(&mut engine, 1, Event::Frame(frame));
        assert_eq!(engine.stats().dropped(DropReason::UnsupportedRouting), 1);
        assert!(engine.candidates().is_empty());
    }

    #[test]
    fn test_discovery_adverts_fill_candidate_store() {
        let mut engine = engine();
        at(&mut engine, 0, Event::DiscoveryStart);
        for n in 1..=7u8 {
            let frame = pan_advert(&engine, peer(n), 0x10, 256 * n as u16, -50);
            at(&mut engine, 1, Event::Frame(frame));
        }
        // Per-PAN discovery cap holds the five cheapest.
        assert_eq!(engine.candidates().len(), PAN_CAP_DISCOVERY);
        let addrs: alloc::vec::Vec<Eui64> = engine.candidates().iter().map(|r| r.addr).collect();
        assert_eq!(addrs, [peer(1), peer(2), peer(3), peer(4), peer(5)]);
        assert_eq!(engine.stats().rx(FrameKind::PanAdvert), 7);
    }

    #[test]
    fn test_advert_cost_feeds_trickle() {
        let mut engine = attached();
        *engine.routing_mut() = crate::traits::test_impls::MockRouting::attached(512);

        let cheaper = pan_advert(&engine, peer(2), 0x10, 256, -50);
        at(&mut engine, 1, Event::Frame(cheaper));
        assert_eq!(engine.stats().inconsistent(TrickleKind::PanAdvert), 1);

        let dearer = pan_advert(&engine, peer(3), 0x10, 768, -50);
        at(&mut engine, 2, Event::Frame(dearer));
        assert_eq!(engine.stats().consistent(TrickleKind::PanAdvert), 1);

        let neighbor = engine.neighbors().get(&peer(3)).unwrap();
        assert!(neighbor.temporary);
        assert_eq!(neighbor.routing_cost, Some(768));
    }

    #[test]
    fn test_parent_advert_updates_pan_size() {
        let mut engine = attached();
        let frame = pan_advert(&engine, peer(1), 0x10, 256, -50);
        at(&mut engine, 1, Event::Frame(frame));
        assert_eq!(engine.outbound_frame(FrameKind::PanAdvert).pan_info.unwrap().pan_size, 10);
    }

    #[test]
    fn test_solicit_shortens_discovery_wait() {
        let mut engine = engine();
        at(&mut engine, 0, Event::DiscoveryStart);
        let before = engine.state_timer.unwrap();
        assert!(before > Duration::from_millis(7_500));

        let frame = solicit(&engine, FrameKind::PanAdvertSolicit, peer(9), 0xFFFF);
        at(&mut engine, 0, Event::Frame(frame));
        assert!(engine.state_timer.unwrap() < Duration::from_millis(7_500));
        assert_eq!(engine.stats().consistent(TrickleKind::PanAdvertSolicit), 1);
        assert_eq!(engine.stats().inconsistent(TrickleKind::PanAdvert), 1);
    }

    #[test]
    fn test_equal_pan_version_is_consistent() {
        let mut engine = attached();
        let interval = engine.trickle(TrickleKind::PanConfig).interval();
        drain(&engine);

        let frame = pan_config(&engine, peer(1), 0x10, 5, 77);
        at(&mut engine, 1, Event::Frame(frame));

        assert_eq!(engine.stats().consistent(TrickleKind::PanConfig), 1);
        assert_eq!(engine.stats().inconsistent(TrickleKind::PanConfig), 0);
        assert_eq!(engine.trickle(TrickleKind::PanConfig).counter(), 1);
        assert_eq!(engine.trickle(TrickleKind::PanConfig).interval(), interval);
        assert_eq!(engine.state(), JoinState::Done);
        assert_eq!(engine.pan_version(), Some(5));
        assert!(drain(&engine).is_empty());
    }

    #[test]
    fn test_newer_pan_version_adopted() {
        let mut engine = attached();
        at(&mut engine, 3000, Event::Tick);
        drain(&engine);

        let frame = pan_config(&engine, peer(2), 0x10, 6, 77);
        at(&mut engine, 3001, Event::Frame(frame));
        assert_eq!(engine.pan_version(), Some(6));
        assert_eq!(engine.stats().inconsistent(TrickleKind::PanConfig), 1);
        assert_eq!(engine.primary_parent(), Some(peer(1)));
        assert!(drain(&engine).contains(&Command::GtkHashChanged([[6; 8]; 4])));

        // Timeout restarted: well past the original deadline and still attached.
        at(&mut engine, 4000, Event::Tick);
        assert_eq!(engine.state(), JoinState::Done);
    }

    #[test]
    fn test_stale_pan_version_ignored() {
        let mut engine = attached();
        let frame = pan_config(&engine, peer(2), 0x10, 4, 77);
        at(&mut engine, 1, Event::Frame(frame));
        assert_eq!(engine.pan_version(), Some(5));
        assert_eq!(engine.stats().consistent(TrickleKind::PanConfig), 0);
        assert_eq!(engine.stats().inconsistent(TrickleKind::PanConfig), 0);
    }

    #[test]
    fn test_pan_version_wraps() {
        let mut engine = attached();
        engine.pan_version = Some(u16::MAX);
        let frame = pan_config(&engine, peer(1), 0x10, 0, 77);
        at(&mut engine, 1, Event::Frame(frame));
        assert_eq!(engine.pan_version(), Some(0));
    }

    #[test]
    fn test_config_for_other_pan_dropped() {
        let mut engine = attached();
        let frame = pan_config(&engine, peer(1), 0x11, 6, 77);
        at(&mut engine, 1, Event::Frame(frame));
        assert_eq!(engine.stats().dropped(DropReason::PanMismatch), 1);
        assert_eq!(engine.pan_version(), Some(5));
    }

    #[test]
    fn test_config_without_version_dropped() {
        let mut engine = attached();
        let mut frame = pan_config(&engine, peer(1), 0x10, 6, 77);
        frame.pan_version = None;
        at(&mut engine, 1, Event::Frame(frame));
        assert_eq!(engine.stats().dropped(DropReason::MissingIe), 1);
    }

    #[test]
    fn test_unexpected_bsi_rejected() {
        let mut engine = attached();
        let frame = pan_config(&engine, peer(2), 0x10, 6, 300);
        at(&mut engine, 1, Event::Frame(frame));
        assert_eq!(engine.stats().bsi_rejected, 1);
        assert_eq!(engine.pan_version(), Some(5));
        assert_eq!(engine.state(), JoinState::Done);
    }

    #[test]
    fn test_next_bsi_means_restart() {
        let mut engine = attached();
        let frame = pan_config(&engine, peer(1), 0x10, 1, 78);
        at(&mut engine, 1, Event::Frame(frame));
        assert_eq!(engine.state(), JoinState::Leaving);
        assert_eq!(engine.bsi_block, Some((77, Timestamp::from_secs(3601))));
    }

    #[test]
    fn test_blocked_bsi_ignored_during_rejoin() {
        let mut engine = attached();
        engine.bsi_block = Some((77, Timestamp::from_secs(100)));
        engine.configuration_learned = false;
        engine.state = JoinState::ConfigScan;

        let stale = pan_config(&engine, peer(1), 0x10, 5, 77);
        at(&mut engine, 1, Event::Frame(stale));
        assert!(!engine.is_configuration_learned());
        assert_eq!(engine.stats().bsi_rejected, 1);

        let fresh = pan_config(&engine, peer(2), 0x10, 1, 78);
        at(&mut engine, 2, Event::Frame(fresh));
        assert!(engine.is_configuration_learned());
        assert_eq!(engine.primary_parent(), Some(peer(2)));
        assert_eq!(engine.schedule().bsi, 78);
    }

    #[test]
    fn test_config_solicit_adds_neighbor_and_resets_config_trickle() {
        let mut engine = attached();
        let frame = solicit(&engine, FrameKind::PanConfigSolicit, peer(4), 0x10);
        at(&mut engine, 1, Event::Frame(frame));
        assert!(engine.neighbors().contains(&peer(4)));
        assert_eq!(engine.stats().consistent(TrickleKind::PanConfigSolicit), 1);
        assert_eq!(engine.stats().inconsistent(TrickleKind::PanConfig), 1);
        assert_eq!(
            engine.trickle(TrickleKind::PanConfig).interval(),
            engine.config().disc_imin
        );
    }

    #[test]
    fn test_border_router_config_consistency() {
        let mut config = config();
        config.role = Role::BorderRouter;
        config.pan_id = Some(0x10);
        config.initial_pan_version = Some(3);
        let mut engine = engine_with(config);
        at(&mut engine, 0, Event::DiscoveryStart);

        let same = pan_config(&engine, peer(1), 0x10, 3, 0);
        at(&mut engine, 1, Event::Frame(same));
        assert_eq!(engine.stats().consistent(TrickleKind::PanConfig), 1);

        let old = pan_config(&engine, peer(1), 0x10, 2, 0);
        at(&mut engine, 2, Event::Frame(old));
        assert_eq!(engine.stats().inconsistent(TrickleKind::PanConfig), 1);
        assert_eq!(engine.pan_version(), Some(3));
    }

    #[test]
    fn test_border_router_ignores_adverts_for_candidates() {
        let mut config = config();
        config.role = Role::BorderRouter;
        config.pan_id = Some(0x10);
        let mut engine = engine_with(config);
        at(&mut engine, 0, Event::DiscoveryStart);
        let frame = pan_advert(&engine, peer(1), 0x10, 256, -50);
        at(&mut engine, 1, Event::Frame(frame));
        assert!(engine.candidates().is_empty());
        assert_eq!(engine.stats().consistent(TrickleKind::PanAdvert), 1);
    }
}
