//! Counters for dropped, accepted and generated traffic.

use crate::types::FrameKind;

/// Why an inbound frame was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Discovery frame for another network.
    NetworkName,
    /// Required IE missing or undecodable.
    Malformed,
    /// Channel plan or channel function we cannot follow.
    ChannelPlan,
    /// Frame for a PAN other than ours.
    PanMismatch,
    /// Configuration frame without required metadata.
    MissingIe,
    /// Not in a state that processes this frame.
    NotJoining,
    /// Advertiser does not run the routing method we need.
    UnsupportedRouting,
}

impl DropReason {
    pub const COUNT: usize = 7;

    pub fn index(self) -> usize {
        match self {
            DropReason::NetworkName => 0,
            DropReason::Malformed => 1,
            DropReason::ChannelPlan => 2,
            DropReason::PanMismatch => 3,
            DropReason::MissingIe => 4,
            DropReason::NotJoining => 5,
            DropReason::UnsupportedRouting => 6,
        }
    }
}

/// Which trickle instance an observation fed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrickleKind {
    PanAdvert,
    PanAdvertSolicit,
    PanConfig,
    PanConfigSolicit,
}

impl TrickleKind {
    pub fn index(self) -> usize {
        match self {
            TrickleKind::PanAdvert => 0,
            TrickleKind::PanAdvertSolicit => 1,
            TrickleKind::PanConfig => 2,
            TrickleKind::PanConfigSolicit => 3,
        }
    }

    /// Frame kind this timer schedules.
    pub fn frame_kind(self) -> FrameKind {
        match self {
            TrickleKind::PanAdvert => FrameKind::PanAdvert,
            TrickleKind::PanAdvertSolicit => FrameKind::PanAdvertSolicit,
            TrickleKind::PanConfig => FrameKind::PanConfig,
            TrickleKind::PanConfigSolicit => FrameKind::PanConfigSolicit,
        }
    }
}

/// Engine counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JoinStats {
    /// Frames accepted for processing, indexed by [`FrameKind::index`].
    pub rx: [u32; 4],
    /// Transmit requests issued, indexed by [`FrameKind::index`].
    pub tx: [u32; 4],
    /// Drops, indexed by [`DropReason::index`].
    pub dropped: [u32; DropReason::COUNT],
    /// Consistent observations, indexed by [`TrickleKind::index`].
    pub consistent: [u32; 4],
    /// Inconsistent observations, indexed by [`TrickleKind::index`].
    pub inconsistent: [u32; 4],
    pub candidates_rejected: u32,
    pub neighbors_rejected: u32,
    pub probes_started: u32,
    pub probes_exhausted: u32,
    pub bsi_rejected: u32,
    pub commands_dropped: u32,
}

impl JoinStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rx(&self, kind: FrameKind) -> u32 {
        self.rx[kind.index()]
    }

    pub fn tx(&self, kind: FrameKind) -> u32 {
        self.tx[kind.index()]
    }

    pub fn dropped(&self, reason: DropReason) -> u32 {
        self.dropped[reason.index()]
    }

    pub fn total_dropped(&self) -> u32 {
        self.dropped.iter().sum()
    }

    pub fn consistent(&self, kind: TrickleKind) -> u32 {
        self.consistent[kind.index()]
    }

    pub fn inconsistent(&self, kind: TrickleKind) -> u32 {
        self.inconsistent[kind.index()]
    }

    pub(crate) fn record_rx(&mut self, kind: FrameKind) {
        self.rx[kind.index()] += 1;
    }

    pub(crate) fn record_tx(&mut self, kind: FrameKind) {
        self.tx[kind.index()] += 1;
    }

    pub(crate) fn record_drop(&mut self, reason: DropReason) {
        self.dropped[reason.index()] += 1;
    }

    pub(crate) fn record_consistent(&mut self, kind: TrickleKind) {
        self.consistent[kind.index()] += 1;
    }

    pub(crate) fn record_inconsistent(&mut self, kind: TrickleKind) {
        self.inconsistent[kind.index()] += 1;
    }

    pub(crate) fn record_candidate_rejected(&mut self) {
        self.candidates_rejected += 1;
    }

    pub(crate) fn record_neighbor_rejected(&mut self) {
        self.neighbors_rejected += 1;
    }

    pub(crate) fn record_probe_started(&mut self) {
        self.probes_started += 1;
    }

    pub(crate) fn record_probe_exhausted(&mut self) {
        self.probes_exhausted += 1;
    }

    pub(crate) fn record_bsi_rejected(&mut self) {
        self.bsi_rejected += 1;
    }

    pub(crate) fn record_command_dropped(&mut self) {
        self.commands_dropped += 1;
    }
}
