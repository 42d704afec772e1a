//! Channel-hopping configuration.
//!
//! Turns a regulatory domain and requested channel plan into the concrete
//! schedule the link layer hops over:
//! - the 256-bit channel mask of usable channels
//! - the excluded-channel descriptor advertised in schedule IEs, encoded as a
//!   short range list or as a bitmask, whichever is smaller
//! - fixed-channel selection for the fixed channel function
//!
//! Discovery and steady state both go through [`HoppingSchedule::configure`];
//! once a parent is chosen its broadcast schedule is copied in with
//! [`HoppingSchedule::synchronize_to_parent`].

use core::fmt;

use crate::traits::Random;
use crate::types::Error;

/// Number of channels a [`ChannelMask`] can describe.
pub const MAX_CHANNELS: u16 = 256;

/// Fixed channel value meaning "pick one at random from the mask".
pub const FIXED_CHANNEL_UNSET: u16 = 0xFFFF;

/// Maximum number of excluded ranges carried in range encoding.
pub const MAX_EXCLUDED_RANGES: usize = 3;

/// Encoded size of a range list: fixed header plus one entry per range.
const RANGE_HEADER_LEN: usize = 3;
const RANGE_ENTRY_LEN: usize = 4;

/// Draw budget per channel before [`randomize_fixed_channel`] stops drawing.
const FIXED_CHANNEL_DRAWS_PER_CHANNEL: u32 = 8;

/// Set of channel numbers 0..256.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelMask([u32; 8]);

impl ChannelMask {
    pub const EMPTY: ChannelMask = ChannelMask([0; 8]);

    /// Mask with channels `0..n` set.
    pub fn first_n(n: u16) -> Self {
        let mut mask = Self::EMPTY;
        for ch in 0..n.min(MAX_CHANNELS) {
            mask.set(ch);
        }
        mask
    }

    #[inline]
    pub fn set(&mut self, ch: u16) {
        if ch < MAX_CHANNELS {
            self.0[(ch / 32) as usize] |= 1 << (ch % 32);
        }
    }

    #[inline]
    pub fn clear(&mut self, ch: u16) {
        if ch < MAX_CHANNELS {
            self.0[(ch / 32) as usize] &= !(1 << (ch % 32));
        }
    }

    #[inline]
    pub fn contains(&self, ch: u16) -> bool {
        ch < MAX_CHANNELS && self.0[(ch / 32) as usize] & (1 << (ch % 32)) != 0
    }

    pub fn count(&self) -> u16 {
        self.0.iter().map(|w| w.count_ones() as u16).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    pub fn intersection(&self, other: &ChannelMask) -> ChannelMask {
        let mut out = [0u32; 8];
        for (i, word) in out.iter_mut().enumerate() {
            *word = self.0[i] & other.0[i];
        }
        ChannelMask(out)
    }

    /// Set channels in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (0..MAX_CHANNELS).filter(move |ch| self.contains(*ch))
    }
}

impl fmt::Debug for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelMask({} channels, [", self.count())?;
        for (i, w) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:08x}", w)?;
        }
        write!(f, "])")
    }
}

/// Regulatory domains with a known channel table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegulatoryDomain {
    NorthAmerica = 0x01,
    Japan = 0x02,
    Europe = 0x03,
    India = 0x05,
    Brazil = 0x07,
    Korea = 0x09,
}

impl RegulatoryDomain {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::NorthAmerica),
            0x02 => Some(Self::Japan),
            0x03 => Some(Self::Europe),
            0x05 => Some(Self::India),
            0x07 => Some(Self::Brazil),
            0x09 => Some(Self::Korea),
            _ => None,
        }
    }
}

/// How a node describes the channels it hops over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelPlan {
    /// Regulatory domain plus operating class.
    Regulatory {
        domain: RegulatoryDomain,
        operating_class: u8,
    },
    /// Regulatory domain plus channel plan identifier.
    PlanId {
        domain: RegulatoryDomain,
        plan_id: u8,
    },
    /// Explicit first-channel frequency, spacing, and channel count.
    Explicit {
        ch0_khz: u32,
        spacing_khz: u32,
        channel_count: u16,
    },
}

impl ChannelPlan {
    /// Number of channels in this plan.
    pub fn channel_count(&self) -> Result<u16, Error> {
        match *self {
            ChannelPlan::Regulatory {
                domain,
                operating_class,
            } => channel_count(domain, operating_class),
            ChannelPlan::PlanId { domain, plan_id } => channel_count_for_plan_id(domain, plan_id),
            ChannelPlan::Explicit { channel_count, .. } => {
                if channel_count == 0 || channel_count > MAX_CHANNELS {
                    Err(Error::UnsupportedChannelPlan)
                } else {
                    Ok(channel_count)
                }
            }
        }
    }

    /// Full channel set for this plan before local selection.
    pub fn global_mask(&self) -> Result<ChannelMask, Error> {
        let count = self.channel_count()?;
        Ok(match *self {
            ChannelPlan::Regulatory {
                domain,
                operating_class,
            } => build_mask(domain, operating_class, 0, count),
            ChannelPlan::PlanId { domain, plan_id } => build_mask(domain, 0, plan_id, count),
            ChannelPlan::Explicit { .. } => ChannelMask::first_n(count),
        })
    }

    /// Whether a neighbor advertising `other` hops over the same channels.
    ///
    /// Regulatory plans must agree on domain and class, explicit plans on all
    /// three parameters. Plans of different kinds never match.
    pub fn is_compatible(&self, other: &ChannelPlan) -> bool {
        self == other
    }
}

/// Channel count for a domain and operating class.
pub fn channel_count(domain: RegulatoryDomain, operating_class: u8) -> Result<u16, Error> {
    use RegulatoryDomain::*;
    let count = match (domain, operating_class) {
        (NorthAmerica | Brazil, 1) => 129,
        (NorthAmerica | Brazil, 2) => 64,
        (NorthAmerica | Brazil, 3) => 42,
        (Europe, 1) => 69,
        (Europe, 2) => 35,
        (Europe, 3) => 55,
        (Europe, 4) => 27,
        (Japan, 1) => 38,
        (Japan, 2) => 18,
        (Japan, 3) => 12,
        (India, 1) => 19,
        (India, 2) => 10,
        (Korea, 1) => 32,
        (Korea, 2) => 16,
        _ => return Err(Error::UnsupportedOperatingClass),
    };
    Ok(count)
}

/// Channel count for a domain and channel plan identifier.
pub fn channel_count_for_plan_id(domain: RegulatoryDomain, plan_id: u8) -> Result<u16, Error> {
    use RegulatoryDomain::*;
    match (domain, plan_id) {
        (NorthAmerica | Brazil, 1) => Ok(136),
        (NorthAmerica | Brazil, 2) => Ok(64),
        (NorthAmerica | Brazil, 5) => Ok(42),
        (NorthAmerica | Brazil, _) => Err(Error::UnsupportedChannelPlan),
        _ => Err(Error::UnsupportedRegulatoryDomain),
    }
}

/// Channels Brazil reserves inside the 902-928 MHz band, per class or plan id.
fn brazil_reserved(operating_class: u8, plan_id: u8) -> Option<(u16, u16)> {
    match (operating_class, plan_id) {
        (1, _) | (_, 1) => Some((26, 64)),
        (2, _) | (_, 2) => Some((13, 32)),
        (3, _) | (_, 5) => Some((8, 21)),
        _ => None,
    }
}

/// Usable channels for a plan.
///
/// Pure table lookup: channels `0..channel_count`, minus the ranges a domain
/// reserves. Pass 0 for whichever of `operating_class` / `plan_id` is unused.
pub fn build_mask(
    domain: RegulatoryDomain,
    operating_class: u8,
    plan_id: u8,
    channel_count: u16,
) -> ChannelMask {
    let mut mask = ChannelMask::first_n(channel_count);
    if domain == RegulatoryDomain::Brazil {
        if let Some((lo, hi)) = brazil_reserved(operating_class, plan_id) {
            for ch in lo..=hi.min(channel_count.saturating_sub(1)) {
                mask.clear(ch);
            }
        }
    }
    mask
}

/// Channel function selector from schedule IEs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelFunction {
    Fixed = 0,
    Tr51Cf = 1,
    Dh1Cf = 2,
}

impl ChannelFunction {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Fixed),
            1 => Some(Self::Tr51Cf),
            2 => Some(Self::Dh1Cf),
            _ => None,
        }
    }
}

/// Inclusive run of excluded channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChannelRange {
    pub start: u16,
    pub end: u16,
}

/// Excluded-channel descriptor as carried in schedule IEs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExcludedChannels {
    /// Nothing excluded.
    #[default]
    None,
    /// Up to [`MAX_EXCLUDED_RANGES`] runs.
    Ranges {
        ranges: [ChannelRange; MAX_EXCLUDED_RANGES],
        count: u8,
    },
    /// One bit per channel for `channel_count` channels.
    Mask {
        mask: ChannelMask,
        channel_count: u16,
    },
}

impl ExcludedChannels {
    /// Bytes this descriptor takes once encoded.
    pub fn encoded_len(&self) -> usize {
        match self {
            ExcludedChannels::None => 0,
            ExcludedChannels::Ranges { count, .. } => {
                RANGE_HEADER_LEN + RANGE_ENTRY_LEN * *count as usize
            }
            ExcludedChannels::Mask { channel_count, .. } => (*channel_count as usize).div_ceil(8),
        }
    }

    pub fn ranges(&self) -> &[ChannelRange] {
        match self {
            ExcludedChannels::Ranges { ranges, count } => {
                &ranges[..(*count as usize).min(MAX_EXCLUDED_RANGES)]
            }
            _ => &[],
        }
    }

    /// Decode into the set of excluded channels.
    pub fn to_mask(&self) -> ChannelMask {
        match self {
            ExcludedChannels::None => ChannelMask::EMPTY,
            ExcludedChannels::Ranges { .. } => {
                let mut mask = ChannelMask::EMPTY;
                for range in self.ranges() {
                    for ch in range.start..=range.end.min(MAX_CHANNELS - 1) {
                        mask.set(ch);
                    }
                }
                mask
            }
            ExcludedChannels::Mask {
                mask,
                channel_count,
            } => mask.intersection(&ChannelMask::first_n(*channel_count)),
        }
    }
}

/// Build the excluded-channel descriptor for a locally selected channel set.
///
/// A channel is excluded when the plan allows it (`global_mask`) but the
/// node does not use it (`selected_mask`). Contiguous exclusions are grouped
/// into ranges; the range list is used only when it fits in
/// [`MAX_EXCLUDED_RANGES`] entries and encodes smaller than the bitmask.
pub fn compute_excluded(
    selected_mask: &ChannelMask,
    global_mask: &ChannelMask,
    channel_count: u16,
) -> ExcludedChannels {
    let channel_count = channel_count.min(MAX_CHANNELS);
    let mut ranges = [ChannelRange::default(); MAX_EXCLUDED_RANGES];
    let mut run_count = 0usize;
    let mut in_run = false;
    let mut excluded = ChannelMask::EMPTY;

    for ch in 0..channel_count {
        if global_mask.contains(ch) && !selected_mask.contains(ch) {
            excluded.set(ch);
            if !in_run {
                if run_count < MAX_EXCLUDED_RANGES {
                    ranges[run_count] = ChannelRange { start: ch, end: ch };
                }
                run_count += 1;
                in_run = true;
            } else if run_count <= MAX_EXCLUDED_RANGES {
                ranges[run_count - 1].end = ch;
            }
        } else {
            in_run = false;
        }
    }

    if run_count == 0 {
        return ExcludedChannels::None;
    }

    let bitmask_len = (channel_count as usize).div_ceil(8);
    let range_len = RANGE_HEADER_LEN + RANGE_ENTRY_LEN * run_count;
    if run_count <= MAX_EXCLUDED_RANGES && range_len < bitmask_len {
        ExcludedChannels::Ranges {
            ranges,
            count: run_count as u8,
        }
    } else {
        ExcludedChannels::Mask {
            mask: excluded,
            channel_count,
        }
    }
}

/// Resolve the fixed channel.
///
/// A configured channel is returned unchanged. [`FIXED_CHANNEL_UNSET`] draws
/// uniformly from `0..channel_count` until a channel present in `mask` comes
/// up. A pathological generator stops after a bounded number of draws and
/// the lowest usable channel is taken instead.
pub fn randomize_fixed_channel<R: Random>(
    configured: u16,
    channel_count: u16,
    mask: &ChannelMask,
    rng: &mut R,
) -> Result<u16, Error> {
    if configured != FIXED_CHANNEL_UNSET {
        return Ok(configured);
    }
    let channel_count = channel_count.min(MAX_CHANNELS);
    let first_usable = (0..channel_count)
        .find(|ch| mask.contains(*ch))
        .ok_or(Error::EmptyChannelMask)?;

    let budget = channel_count as u32 * FIXED_CHANNEL_DRAWS_PER_CHANNEL;
    for _ in 0..budget {
        let ch = rng.gen_range(0, channel_count as u64) as u16;
        if mask.contains(ch) {
            return Ok(ch);
        }
    }
    Ok(first_usable)
}

/// Locally configured hopping parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoppingParams {
    pub channel_plan: ChannelPlan,
    pub uc_function: ChannelFunction,
    pub bc_function: ChannelFunction,
    /// Unicast fixed channel, or [`FIXED_CHANNEL_UNSET`].
    pub uc_fixed_channel: u16,
    /// Broadcast fixed channel, or [`FIXED_CHANNEL_UNSET`].
    pub bc_fixed_channel: u16,
    pub uc_dwell_ms: u8,
    pub bc_dwell_ms: u8,
    pub bc_interval_ms: u32,
    /// Channels this node is willing to use.
    pub allowed_channels: ChannelMask,
}

/// Unicast schedule advertised by a neighbor (US-IE contents).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnicastSchedule {
    pub channel_plan: ChannelPlan,
    /// Raw selector; validated with [`ChannelFunction::from_u8`].
    pub channel_function: u8,
    pub fixed_channel: u16,
    pub dwell_ms: u8,
    pub excluded: ExcludedChannels,
}

/// Broadcast schedule advertised in configuration frames (BS-IE contents).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BroadcastSchedule {
    pub channel_plan: ChannelPlan,
    pub channel_function: u8,
    pub fixed_channel: u16,
    pub dwell_ms: u8,
    pub interval_ms: u32,
    /// Broadcast schedule identifier.
    pub bsi: u16,
}

/// The interface's active hopping schedule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoppingSchedule {
    pub channel_plan: ChannelPlan,
    pub channel_count: u16,
    pub uc_function: ChannelFunction,
    pub bc_function: ChannelFunction,
    pub uc_fixed_channel: u16,
    pub bc_fixed_channel: u16,
    pub uc_dwell_ms: u8,
    pub bc_dwell_ms: u8,
    pub bc_interval_ms: u32,
    pub bsi: u16,
    /// Channels actually hopped over.
    pub channel_mask: ChannelMask,
    pub excluded: ExcludedChannels,
}

impl HoppingSchedule {
    /// Build a schedule from local parameters.
    ///
    /// Fails on an unsupported plan or when the allowed channels leave
    /// nothing to hop over.
    pub fn configure<R: Random>(params: &HoppingParams, rng: &mut R) -> Result<Self, Error> {
        let channel_count = params.channel_plan.channel_count()?;
        let global = params.channel_plan.global_mask()?;
        let channel_mask = global.intersection(&params.allowed_channels);
        if channel_mask.is_empty() {
            return Err(Error::EmptyChannelMask);
        }
        let excluded = compute_excluded(&params.allowed_channels, &global, channel_count);

        let uc_fixed_channel = if params.uc_function == ChannelFunction::Fixed {
            randomize_fixed_channel(params.uc_fixed_channel, channel_count, &channel_mask, rng)?
        } else {
            params.uc_fixed_channel
        };
        let bc_fixed_channel = if params.bc_function == ChannelFunction::Fixed {
            randomize_fixed_channel(params.bc_fixed_channel, channel_count, &channel_mask, rng)?
        } else {
            params.bc_fixed_channel
        };

        Ok(Self {
            channel_plan: params.channel_plan,
            channel_count,
            uc_function: params.uc_function,
            bc_function: params.bc_function,
            uc_fixed_channel,
            bc_fixed_channel,
            uc_dwell_ms: params.uc_dwell_ms,
            bc_dwell_ms: params.bc_dwell_ms,
            bc_interval_ms: params.bc_interval_ms,
            bsi: 0,
            channel_mask,
            excluded,
        })
    }

    /// Adopt the parent's broadcast timing.
    pub fn synchronize_to_parent(&mut self, parent: &BroadcastSchedule) {
        if let Some(function) = ChannelFunction::from_u8(parent.channel_function) {
            self.bc_function = function;
            if function == ChannelFunction::Fixed {
                self.bc_fixed_channel = parent.fixed_channel;
            }
        }
        self.bc_dwell_ms = parent.dwell_ms;
        self.bc_interval_ms = parent.interval_ms;
        self.bsi = parent.bsi;
    }

    /// Whether a neighbor's unicast schedule can be followed.
    pub fn accepts(&self, schedule: &UnicastSchedule) -> bool {
        self.channel_plan.is_compatible(&schedule.channel_plan)
            && ChannelFunction::from_u8(schedule.channel_function).is_some()
    }

    pub fn unicast_schedule(&self) -> UnicastSchedule {
        UnicastSchedule {
            channel_plan: self.channel_plan,
            channel_function: self.uc_function as u8,
            fixed_channel: self.uc_fixed_channel,
            dwell_ms: self.uc_dwell_ms,
            excluded: self.excluded,
        }
    }

    pub fn broadcast_schedule(&self) -> BroadcastSchedule {
        BroadcastSchedule {
            channel_plan: self.channel_plan,
            channel_function: self.bc_function as u8,
            fixed_channel: self.bc_fixed_channel,
            dwell_ms: self.bc_dwell_ms,
            interval_ms: self.bc_interval_ms,
            bsi: self.bsi,
        }
    }
}
