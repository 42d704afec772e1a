//! Bring-up configuration for one interface.
//!
//! [`BootstrapConfig`] is handed to [`Engine::new`](crate::Engine::new) and
//! fixed for the engine's lifetime. Start from a network-size preset and
//! override what the deployment needs.
//!
//! # Presets
//!
//! Discovery trickle shape and PAN timeout per expected network size:
//!
//! | Preset | disc_imin | disc_imax | disc_k | pan_timeout |
//! |--------|----------:|----------:|-------:|------------:|
//! | `Small` | 15 s | 60 s | 1 | 3600 s |
//! | `Medium` | 60 s | 480 s | 1 | 3600 s |
//! | `Large` | 60 s | 960 s | 1 | 3600 s |
//!
//! # Memory Footprint
//!
//! Approximate RAM for the bounded pools (excluding code and stack):
//! - `candidate_pool_size * 64` bytes (candidate records)
//! - `probe_pool_size * 24` bytes (probe entries)
//! - `max_neighbors * 96` bytes (neighbor table)
//!
//! # Example
//!
//! ```
//! use fanjoin::{BootstrapConfig, NetworkSize, Role};
//!
//! let mut config = BootstrapConfig::for_network_size(NetworkSize::Medium);
//! config.role = Role::Host;
//! config.network_name = "field-area-7".into();
//! assert!(config.validate().is_ok());
//! ```

use alloc::string::String;

use crate::channel::{
    ChannelFunction, ChannelMask, ChannelPlan, HoppingParams, RegulatoryDomain,
    FIXED_CHANNEL_UNSET, MAX_CHANNELS,
};
use crate::time::Duration;
use crate::trickle::TrickleParams;
use crate::types::{Error, PanId, Role};

/// Expected network size; selects the discovery trickle shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkSize {
    Small,
    Medium,
    Large,
}

/// Interface configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub role: Role,
    /// Discovery frames for other network names are ignored.
    pub network_name: String,
    pub hopping: HoppingParams,

    // Discovery trickle
    pub disc_imin: Duration,
    pub disc_imax: Duration,
    pub disc_k: u8,

    /// Keep-alive deadline: no newer PAN configuration within this window
    /// disconnects the node.
    pub pan_timeout: Duration,
    /// Minimum age before a temporary neighbor slot can be reclaimed.
    pub temp_link_min_timeout: Duration,

    // Soft caps passed to the routing collaborator
    pub rpl_parent_candidate_max: u8,
    pub rpl_selected_parent_max: u8,

    // Pool sizes
    pub candidate_pool_size: usize,
    pub probe_pool_size: usize,
    pub max_neighbors: usize,

    // RSL hysteresis, dBm
    pub device_min_sens: i16,
    pub candidate_threshold: i16,
    pub candidate_hysteresis: i16,

    // Leaving
    pub disconnect_timeout_fast: Duration,
    pub disconnect_timeout_normal: Duration,

    /// Period of [`Command::Snapshot`](crate::Command::Snapshot) reports.
    pub snapshot_interval: Duration,

    // Border router seeds
    pub pan_id: Option<PanId>,
    pub stored_bsi: Option<u16>,
    pub initial_pan_version: Option<u16>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self::for_network_size(NetworkSize::Small)
    }
}

impl BootstrapConfig {
    pub fn for_network_size(size: NetworkSize) -> Self {
        let (disc_imin, disc_imax) = match size {
            NetworkSize::Small => (Duration::from_secs(15), Duration::from_secs(60)),
            NetworkSize::Medium => (Duration::from_secs(60), Duration::from_secs(480)),
            NetworkSize::Large => (Duration::from_secs(60), Duration::from_secs(960)),
        };
        Self {
            role: Role::Router,
            network_name: String::new(),
            hopping: default_hopping(),
            disc_imin,
            disc_imax,
            disc_k: 1,
            pan_timeout: Duration::from_secs(3600),
            temp_link_min_timeout: Duration::from_secs(260),
            rpl_parent_candidate_max: 5,
            rpl_selected_parent_max: 2,
            candidate_pool_size: 10,
            probe_pool_size: 5,
            max_neighbors: 32,
            device_min_sens: -93,
            candidate_threshold: 10,
            candidate_hysteresis: 3,
            disconnect_timeout_fast: Duration::from_secs(8),
            disconnect_timeout_normal: Duration::from_secs(60),
            snapshot_interval: Duration::from_secs(60),
            pan_id: None,
            stored_bsi: None,
            initial_pan_version: None,
        }
    }

    /// Discovery trickle shape shared by all four advertisement timers.
    pub fn trickle_params(&self) -> TrickleParams {
        TrickleParams {
            imin: self.disc_imin,
            imax: self.disc_imax,
            k: self.disc_k,
        }
    }

    /// Reject configurations the engine cannot run with.
    ///
    /// Channel-plan support is checked separately when the hopping schedule
    /// is built.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.trickle_params().is_valid() {
            return Err(Error::InvalidConfig("disc_imin must be nonzero and <= disc_imax"));
        }
        if self.pan_timeout.is_zero() {
            return Err(Error::InvalidConfig("pan_timeout must be nonzero"));
        }
        if self.candidate_pool_size == 0 || self.candidate_pool_size > u16::MAX as usize {
            return Err(Error::InvalidConfig("candidate_pool_size out of range"));
        }
        if self.probe_pool_size == 0 {
            return Err(Error::InvalidConfig("probe_pool_size must be nonzero"));
        }
        if self.max_neighbors == 0 {
            return Err(Error::InvalidConfig("max_neighbors must be nonzero"));
        }
        if self.candidate_hysteresis < 0 {
            return Err(Error::InvalidConfig("candidate_hysteresis must not be negative"));
        }
        if self.rpl_selected_parent_max > self.rpl_parent_candidate_max {
            return Err(Error::InvalidConfig(
                "rpl_selected_parent_max exceeds rpl_parent_candidate_max",
            ));
        }
        if self.role == Role::BorderRouter && self.pan_id.is_none() {
            return Err(Error::InvalidConfig("border router needs a pan_id"));
        }
        Ok(())
    }
}

/// North America operating class 1, both directions on DH1CF.
fn default_hopping() -> HoppingParams {
    HoppingParams {
        channel_plan: ChannelPlan::Regulatory {
            domain: RegulatoryDomain::NorthAmerica,
            operating_class: 1,
        },
        uc_function: ChannelFunction::Dh1Cf,
        bc_function: ChannelFunction::Dh1Cf,
        uc_fixed_channel: FIXED_CHANNEL_UNSET,
        bc_fixed_channel: FIXED_CHANNEL_UNSET,
        uc_dwell_ms: 255,
        bc_dwell_ms: 255,
        bc_interval_ms: 1020,
        allowed_channels: ChannelMask::first_n(MAX_CHANNELS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_preset_values() {
        let config = BootstrapConfig::for_network_size(NetworkSize::Small);
        assert_eq!(config.disc_imin, Duration::from_secs(15));
        assert_eq!(config.disc_imax, Duration::from_secs(60));
        assert_eq!(config.disc_k, 1);
        assert_eq!(config.pan_timeout, Duration::from_secs(3600));
        assert_eq!(config.temp_link_min_timeout, Duration::from_secs(260));
    }

    #[test]
    fn test_medium_and_large_preset_values() {
        let medium = BootstrapConfig::for_network_size(NetworkSize::Medium);
        assert_eq!(medium.disc_imin, Duration::from_secs(60));
        assert_eq!(medium.disc_imax, Duration::from_secs(480));

        let large = BootstrapConfig::for_network_size(NetworkSize::Large);
        assert_eq!(large.disc_imin, Duration::from_secs(60));
        assert_eq!(large.disc_imax, Duration::from_secs(960));
        assert!(medium.disc_imax < large.disc_imax);
    }

    #[test]
    fn test_presets_validate() {
        for size in [NetworkSize::Small, NetworkSize::Medium, NetworkSize::Large] {
            assert_eq!(BootstrapConfig::for_network_size(size).validate(), Ok(()));
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = BootstrapConfig::default();
        config.disc_imin = Duration::from_secs(120);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = BootstrapConfig::default();
        config.candidate_pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = BootstrapConfig::default();
        config.rpl_selected_parent_max = 9;
        assert!(config.validate().is_err());

        let mut config = BootstrapConfig::default();
        config.role = Role::BorderRouter;
        assert!(config.validate().is_err());
        config.pan_id = Some(0x1234);
        assert!(config.validate().is_ok());
    }
}
