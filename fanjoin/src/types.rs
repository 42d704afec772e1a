//! Core types, constants, and host-facing messages for the join engine.

use alloc::string::String;
use core::fmt;

use crate::channel::{BroadcastSchedule, ChannelMask, HoppingSchedule, UnicastSchedule};
use crate::nud::ProbeKind;
use crate::time::Duration;

// Candidate parent store
pub const PAN_CAP_DISCOVERY: usize = 5; // per-PAN records kept while scanning
pub const PAN_CAP_ACTIVE: usize = 2; // per-PAN records kept once authenticating
pub const CANDIDATE_MAX_AGE: Duration = Duration::from_secs(3600);
pub const CANDIDATE_MAX_TX_FAILURES: u8 = 2;
pub const RC_WEIGHT: u32 = 256;
pub const PS_WEIGHT: u32 = 64;

// Bootstrap timing
pub const PCS_MAX: u8 = 5;
pub const CONFIG_APPLY_DELAY_MIN: Duration = Duration::from_secs(1);
pub const CONFIG_APPLY_DELAY_MAX: Duration = Duration::from_secs(2);
pub const DIS_INTERVAL_MIN: Duration = Duration::from_secs(15);
pub const DIS_INTERVAL_MAX: Duration = Duration::from_secs(30);
pub const PAN_VERSION_REFRESH_DIVISOR: u64 = 4;
pub const PAN_TIMEOUT_WARNING_DIVISOR: u64 = 10;
pub const NUD_EVAL_INTERVAL: Duration = Duration::from_secs(1);

// Neighbor liveness
pub const PROBE_JITTER_MIN: Duration = Duration::from_millis(100);
pub const PROBE_JITTER_MAX: Duration = Duration::from_secs(90);
pub const PROBE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
pub const PROBE_MAX_RETRIES: u8 = 2;
pub const ETX_SAMPLE_MAX: u8 = 3;
pub const PROBE_INIT_BASE: Duration = Duration::from_secs(8);

/// IEEE EUI-64 hardware address.
pub type Eui64 = [u8; 8];

/// PAN identifier.
pub type PanId = u16;

/// Hashes of the four group temporal keys, as carried in PAN configuration.
pub type GtkHash = [[u8; 8]; 4];

/// Advertisement frame categories handled by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    PanAdvert,
    PanAdvertSolicit,
    PanConfig,
    PanConfigSolicit,
}

impl FrameKind {
    pub const ALL: [FrameKind; 4] = [
        FrameKind::PanAdvert,
        FrameKind::PanAdvertSolicit,
        FrameKind::PanConfig,
        FrameKind::PanConfigSolicit,
    ];

    /// Stable index for per-kind counters.
    pub fn index(self) -> usize {
        match self {
            FrameKind::PanAdvert => 0,
            FrameKind::PanAdvertSolicit => 1,
            FrameKind::PanConfig => 2,
            FrameKind::PanConfigSolicit => 3,
        }
    }

    /// Discovery-phase frames carry the network name and travel unsecured.
    pub fn is_discovery(self) -> bool {
        !matches!(self, FrameKind::PanConfig)
    }

    pub fn security(self) -> SecurityLevel {
        if self.is_discovery() {
            SecurityLevel::None
        } else {
            SecurityLevel::EncMic64
        }
    }
}

/// Link-layer security requested for a transmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecurityLevel {
    None,
    EncMic64,
}

/// What this interface does once attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Joins a PAN and forwards for others (advertises PA/PC).
    Router,
    /// Joins a PAN as a leaf; never advertises.
    Host,
    /// Roots a PAN; never joins.
    BorderRouter,
}

impl Role {
    pub fn advertises(self) -> bool {
        !matches!(self, Role::Host)
    }
}

/// PAN-IE contents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PanInformation {
    pub pan_size: u16,
    pub routing_cost: u16,
    pub use_parent_bs: bool,
    pub rpl_routing_method: bool,
    pub fan_tps_version: u8,
}

/// UTT-IE contents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnicastTiming {
    /// Unicast fractional sequence interval.
    pub ufsi: u32,
}

/// BT-IE contents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastTiming {
    pub slot_number: u16,
    pub interval_offset_ms: u32,
}

/// A received advertisement-class frame, already decoded by the codec layer.
///
/// Every IE is optional: absence means the sender left it out or the codec
/// could not decode it. The analyzer treats both the same.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub src: Eui64,
    pub pan_id: PanId,
    /// Received signal strength in dBm.
    pub rssi: i16,
    pub network_name: Option<String>,
    pub utt: Option<UnicastTiming>,
    pub us: Option<UnicastSchedule>,
    pub pan_info: Option<PanInformation>,
    pub bt: Option<BroadcastTiming>,
    pub bs: Option<BroadcastSchedule>,
    pub pan_version: Option<u16>,
    pub gtk_hash: Option<GtkHash>,
}

impl Frame {
    /// A frame with no IEs.
    pub fn new(kind: FrameKind, src: Eui64, pan_id: PanId) -> Self {
        Self {
            kind,
            src,
            pan_id,
            rssi: 0,
            network_name: None,
            utt: None,
            us: None,
            pan_info: None,
            bt: None,
            bs: None,
            pan_version: None,
            gtk_hash: None,
        }
    }
}

/// Bootstrap join state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinState {
    Idle,
    ActiveScan,
    Authenticating,
    ConfigScan,
    RplScan,
    Done,
    Leaving,
}

impl JoinState {
    /// Join-state ordinal reported to operator tooling (1..=5, 0 when not joining).
    pub fn ordinal(self) -> u8 {
        match self {
            JoinState::ActiveScan => 1,
            JoinState::Authenticating => 2,
            JoinState::ConfigScan => 3,
            JoinState::RplScan => 4,
            JoinState::Done => 5,
            JoinState::Idle | JoinState::Leaving => 0,
        }
    }
}

/// Connection status reported upward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinStatus {
    Connecting,
    Connected,
    Disconnected,
    PanIdChanged { old: Option<PanId>, new: PanId },
}

/// Authentication completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthResult {
    Ok,
    /// The authenticator could not be reached; try the next candidate.
    TxError(Eui64),
    Failure,
}

/// Notifications from the routing collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingEvent {
    DaoDone,
    LocalRepairStart,
    NoMoreDiscovery,
    PoisonFinished,
}

/// Inbound events, delivered serially to [`Engine::handle_event`](crate::Engine::handle_event).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Periodic timer tick.
    Tick,
    /// Interface is up; start joining (or rooting, for a border router).
    DiscoveryStart,
    Frame(Frame),
    AuthResult(AuthResult),
    Routing(RoutingEvent),
    /// Administrative disconnect. `fast` shortens the teardown window.
    Disconnect { fast: bool },
    /// Link-layer outcome of a probe transmission.
    ProbeStatus { addr: Eui64, acked: bool },
    /// The neighbor answered an unreachability probe.
    ProbeResponse { addr: Eui64 },
    /// Address registration with a neighbor was made or refreshed.
    NeighborRegistered {
        addr: Eui64,
        lifetime: Duration,
        child: bool,
    },
    /// A link-quality sample was taken for this neighbor.
    EtxSample { addr: Eui64 },
    /// The host dropped this neighbor.
    NeighborRemoved { addr: Eui64 },
}

/// Link-layer transmit request for an advertisement-class frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransmitRequest {
    pub kind: FrameKind,
    /// Channels to send the asynchronous frame on.
    pub channels: ChannelMask,
    pub security: SecurityLevel,
}

/// Periodic neighbor/PAN snapshot for operator tooling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InfoSnapshot {
    pub routing_cost: u16,
    pub join_state: u8,
    pub pan_id: Option<PanId>,
    pub parent: Option<Eui64>,
}

/// Outbound commands, consumed by the host integration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Transmit(TransmitRequest),
    SetChannelSchedule(HoppingSchedule),
    SendProbe { addr: Eui64, kind: ProbeKind },
    AuthStart { pan_id: PanId, target: Eui64 },
    RegisterAddress { parent: Eui64 },
    TransmitDiscoverySolicit,
    Poison { fast: bool },
    /// PAN timeout is close; refresh routing registrations.
    DaoRefresh,
    RoutingLimits {
        parent_candidate_max: u8,
        selected_parent_max: u8,
    },
    PersistBorderRouterIds { pan_id: PanId, bsi: u16 },
    GtkHashChanged(GtkHash),
    NeighborUnreachable(Eui64),
    Status(JoinStatus),
    Snapshot(InfoSnapshot),
}

/// Error type for engine bring-up and command delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    UnsupportedRegulatoryDomain,
    UnsupportedOperatingClass,
    UnsupportedChannelPlan,
    EmptyChannelMask,
    InvalidConfig(&'static str),
    CommandQueueFull,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedRegulatoryDomain => write!(f, "unsupported regulatory domain"),
            Error::UnsupportedOperatingClass => write!(f, "unsupported operating class"),
            Error::UnsupportedChannelPlan => write!(f, "unsupported channel plan"),
            Error::EmptyChannelMask => write!(f, "channel mask leaves no usable channel"),
            Error::InvalidConfig(what) => write!(f, "invalid configuration: {}", what),
            Error::CommandQueueFull => write!(f, "command queue full"),
        }
    }
}
