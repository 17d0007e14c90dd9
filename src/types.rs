use core::fmt;

pub const STEADY_ID_LEN: usize = 10;
pub const EPHEM_ID_LEN: usize = 16;
pub const MAX_STEADY_BLOCKS: usize = 3;
// Capacity for all path ids of a fully stitched ephemeral reservation.
pub const MAX_PATH_IDS_LEN: usize = MAX_STEADY_BLOCKS * STEADY_ID_LEN + EPHEM_ID_LEN;

pub const TICK_SECS: u32 = 4;
pub const TICK_NANOS: u64 = TICK_SECS as u64 * 1_000_000_000;
// Reservation lifetimes, expressed in ticks: 16 s ephemeral, 320 s steady.
pub const MAX_EPHEM_TICKS: u32 = 4;
pub const MAX_STEADY_TICKS: u32 = 80;
pub const EPHEM_WINDOW_NANOS: u64 = MAX_EPHEM_TICKS as u64 * TICK_NANOS;
pub const STEADY_WINDOW_NANOS: u64 = MAX_STEADY_TICKS as u64 * TICK_NANOS;
// Timestamp scale: the 32-bit timestamp spans the family window.
pub const TS_TO_NANO_EPHEM: f64 = EPHEM_WINDOW_NANOS as f64 / 4_294_967_296.0;
pub const TS_TO_NANO_STEADY: f64 = STEADY_WINDOW_NANOS as f64 / 4_294_967_296.0;
// Per-hop freshness budgets for request and data packets.
pub const MAX_REQUEST_HOP_NANOS: u64 = 1_000_000_000;
pub const MAX_DATA_HOP_NANOS: u64 = 50_000_000;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    InvalidExtnLength,
    InvalidSteadyIdLen,
    InvalidEphemIdLen,
    InvalidFlagCombo,
    IncompatiblePathTypes,
    UnknownRequestType,
    NotSupported,
    SofTooShort,
    InvalidSofType,
    SofIndexRange,
    BadHvf,
    BadDvf,
    BadPldHash,
    BadHopAuthenticator,
    Expired,
    StaleTimestamp,
    TimestampWindow,
    InvalidIndex,
    InvalidId,
    InfoModified,
    InvalidInterface,
    InvalidState,
    MissingExtension,
    AdmissionDenied,
    ClientDenied,
    FlowLimitExceeded,
    NotifyConflict,
    NoListener,
    Timeout,
    Transport,
    Crypto,
    Internal,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Error::InvalidExtnLength => "invalid extension length",
            Error::InvalidSteadyIdLen => "invalid steady reservation id length",
            Error::InvalidEphemIdLen => "invalid ephemeral reservation id length",
            Error::InvalidFlagCombo => "invalid extension flag combination",
            Error::IncompatiblePathTypes => "incompatible path types",
            Error::UnknownRequestType => "unknown request type",
            Error::NotSupported => "request type reserved but not supported",
            Error::SofTooShort => "opaque field too short",
            Error::InvalidSofType => "invalid opaque field type",
            Error::SofIndexRange => "opaque field index out of range",
            Error::BadHvf => "bad hop verification field",
            Error::BadDvf => "bad destination validation field",
            Error::BadPldHash => "bad payload hash",
            Error::BadHopAuthenticator => "bad hop authenticator",
            Error::Expired => "reservation expired",
            Error::StaleTimestamp => "too much time elapsed since packet construction",
            Error::TimestampWindow => "expiration outside the timestamp window",
            Error::InvalidIndex => "invalid reservation index",
            Error::InvalidId => "invalid reservation id",
            Error::InfoModified => "info field has been modified",
            Error::InvalidInterface => "egress interface not in topology",
            Error::InvalidState => "invalid reservation state",
            Error::MissingExtension => "reservation extension not available",
            Error::AdmissionDenied => "admission denied",
            Error::ClientDenied => "client denied",
            Error::FlowLimitExceeded => "reserved bandwidth limit exceeded",
            Error::NotifyConflict => "listener already registered",
            Error::NoListener => "no listener registered",
            Error::Timeout => "timed out",
            Error::Transport => "transport failure",
            Error::Crypto => "crypto failure",
            Error::Internal => "internal error",
        };
        f.write_str(s)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Reservation identifier: 10 bytes for steady pipes, 16 for ephemeral
/// flows. The first 8 bytes are the owning AS, the rest a local suffix.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResvId {
    Steady([u8; STEADY_ID_LEN]),
    Ephemeral([u8; EPHEM_ID_LEN]),
}

impl ResvId {
    pub fn steady_from_raw(b: &[u8]) -> Result<Self> {
        if b.len() != STEADY_ID_LEN {
            return Err(Error::InvalidSteadyIdLen);
        }
        let mut id = [0u8; STEADY_ID_LEN];
        id.copy_from_slice(b);
        Ok(ResvId::Steady(id))
    }

    pub fn ephem_from_raw(b: &[u8]) -> Result<Self> {
        if b.len() != EPHEM_ID_LEN {
            return Err(Error::InvalidEphemIdLen);
        }
        let mut id = [0u8; EPHEM_ID_LEN];
        id.copy_from_slice(b);
        Ok(ResvId::Ephemeral(id))
    }

    /// New steady id owned by `owner`, suffix from the rng.
    pub fn new_steady(owner: AsId, rng: &mut dyn rand_core::RngCore) -> Self {
        let mut id = [0u8; STEADY_ID_LEN];
        id[..8].copy_from_slice(&owner.0.to_be_bytes());
        rng.fill_bytes(&mut id[8..]);
        ResvId::Steady(id)
    }

    /// New ephemeral id owned by `owner`, suffix from the rng.
    pub fn new_ephem(owner: AsId, rng: &mut dyn rand_core::RngCore) -> Self {
        let mut id = [0u8; EPHEM_ID_LEN];
        id[..8].copy_from_slice(&owner.0.to_be_bytes());
        rng.fill_bytes(&mut id[8..]);
        ResvId::Ephemeral(id)
    }

    pub fn len(&self) -> usize {
        match self {
            ResvId::Steady(_) => STEADY_ID_LEN,
            ResvId::Ephemeral(_) => EPHEM_ID_LEN,
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn is_steady(&self) -> bool {
        matches!(self, ResvId::Steady(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ResvId::Steady(b) => b,
            ResvId::Ephemeral(b) => b,
        }
    }

    pub fn write(&self, b: &mut [u8]) {
        b[..self.len()].copy_from_slice(self.as_bytes());
    }
}

impl fmt::Display for ResvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_bytes() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ResvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResvId::Steady(_) => write!(f, "Steady({})", self),
            ResvId::Ephemeral(_) => write!(f, "Ephemeral({})", self),
        }
    }
}

/// Autonomous system identifier, 8 bytes on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct AsId(pub u64);

impl AsId {
    pub const LEN: usize = 8;

    pub fn from_raw(b: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&b[..8]);
        AsId(u64::from_be_bytes(raw))
    }

    pub fn write(&self, b: &mut [u8]) {
        b[..8].copy_from_slice(&self.0.to_be_bytes());
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:x}:{:x}:{:x}",
            self.0 >> 48,
            (self.0 >> 32) & 0xffff,
            (self.0 >> 16) & 0xffff,
            self.0 & 0xffff
        )
    }
}

/// End-host address, only used as key derivation input.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum HostAddr {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl HostAddr {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            HostAddr::V4(b) => b,
            HostAddr::V6(b) => b,
        }
    }
}

/// Interface identifier, 12 bits on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
pub struct IfId(pub u16);

impl fmt::Display for IfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse expiration time unit. Wall clock = tick * TICK_SECS.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Tick(pub u32);

impl Tick {
    pub fn from_secs(secs: u64) -> Self {
        Tick((secs / TICK_SECS as u64) as u32)
    }

    pub fn nanos(&self) -> u64 {
        self.0 as u64 * TICK_NANOS
    }

    pub fn add(&self, ticks: u32) -> Tick {
        Tick(self.0.saturating_add(ticks))
    }

    pub fn min(self, other: Tick) -> Tick {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }
}

/// Bandwidth class. Class 0 reserves nothing; the allowance grows by
/// sqrt(2) per class starting from 16 kbps.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct BwCls(pub u8);

impl BwCls {
    pub const MAX: BwCls = BwCls(255);

    pub fn bps(&self) -> u64 {
        if self.0 == 0 {
            return 0;
        }
        let mut bps = 16_000f64;
        for _ in 1..self.0 {
            bps *= core::f64::consts::SQRT_2;
        }
        bps as u64
    }

    pub fn min(self, other: BwCls) -> BwCls {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }
}

/// Request latency class: class n maps to 32 ms << n, capped at an hour.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Rlc(pub u8);

impl Rlc {
    const BASE_NANOS: u64 = 32_000_000;
    const CAP_NANOS: u64 = 3_600_000_000_000;

    pub fn nanos(&self) -> u64 {
        let shift = self.0.min(20) as u32;
        (Self::BASE_NANOS << shift).min(Self::CAP_NANOS)
    }

    /// Smallest class whose duration covers `nanos` (ceil), or the
    /// largest class not exceeding it (floor).
    pub fn from_nanos(nanos: u64, ceil: bool) -> Rlc {
        let mut cls = 0u8;
        while Rlc(cls).nanos() < nanos && Rlc(cls).nanos() < Self::CAP_NANOS {
            cls += 1;
        }
        if !ceil && cls > 0 && Rlc(cls).nanos() > nanos {
            cls -= 1;
        }
        Rlc(cls)
    }

    #[cfg(feature = "std")]
    pub fn duration(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.nanos())
    }
}

/// Reservation index, 0..=15. A reservation id can hold several versions
/// distinguished by index; renewal bumps it modulo 16.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Index(pub u8);

impl Index {
    pub fn add(&self, n: u8) -> Index {
        Index((self.0 + n) % 16)
    }
}

/// Traffic split between best-effort and reserved share.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct SplitCls(pub u8);

/// End properties of a steady reservation.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct EndProps(pub u8);

impl EndProps {
    pub const START_LOCAL: u8 = 0x01;
    pub const END_LOCAL: u8 = 0x02;
    pub const TELESCOPE_BASE: u8 = 0x04;

    pub fn telescope_base(&self) -> bool {
        self.0 & Self::TELESCOPE_BASE != 0
    }
}

/// Path type of a reservation block. Steady blocks are directional
/// segments; a full path stitches them in a valid order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PathType {
    None,
    Up,
    Down,
    Core,
    Peering,
    Ephemeral,
}

impl PathType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(PathType::None),
            1 => Ok(PathType::Up),
            2 => Ok(PathType::Down),
            3 => Ok(PathType::Core),
            4 => Ok(PathType::Peering),
            5 => Ok(PathType::Ephemeral),
            _ => Err(Error::IncompatiblePathTypes),
        }
    }

    pub fn to_u8(&self) -> u8 {
        match self {
            PathType::None => 0,
            PathType::Up => 1,
            PathType::Down => 2,
            PathType::Core => 3,
            PathType::Peering => 4,
            PathType::Ephemeral => 5,
        }
    }

    /// Whether a block of this type may directly follow one of `prev`.
    /// Allowed chains: Up→{Core,Peering,Down}, Core→Down, Peering→Down,
    /// and any single block after the None sentinel.
    pub fn valid_after(&self, prev: PathType) -> bool {
        match prev {
            PathType::None => !matches!(self, PathType::None),
            PathType::Up => matches!(self, PathType::Core | PathType::Peering | PathType::Down),
            PathType::Core => matches!(self, PathType::Down),
            PathType::Peering => matches!(self, PathType::Down),
            PathType::Down | PathType::Ephemeral => false,
        }
    }

    /// Down segments are traversed against the reservation direction.
    pub fn reversed(&self) -> bool {
        matches!(self, PathType::Down)
    }
}

impl Default for PathType {
    fn default() -> Self {
        PathType::None
    }
}

impl fmt::Display for PathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PathType::None => "none",
            PathType::Up => "up",
            PathType::Down => "down",
            PathType::Core => "core",
            PathType::Peering => "peering",
            PathType::Ephemeral => "ephemeral",
        };
        f.write_str(s)
    }
}

/// State of a reservation store entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
    Temp,
    Pending,
    Active,
    Voided,
}

impl State {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(State::Temp),
            1 => Ok(State::Pending),
            2 => Ok(State::Active),
            3 => Ok(State::Voided),
            _ => Err(Error::InvalidState),
        }
    }

    pub fn to_u8(&self) -> u8 {
        match self {
            State::Temp => 0,
            State::Pending => 1,
            State::Active => 2,
            State::Voided => 3,
        }
    }
}

/// Reason a request was rejected. Ordered by severity; merges keep the
/// maximum.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum FailCode {
    None,
    InvalidInfo,
    AdmissionFailed,
    ClientDenied,
}

impl FailCode {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(FailCode::None),
            1 => Ok(FailCode::InvalidInfo),
            2 => Ok(FailCode::AdmissionFailed),
            3 => Ok(FailCode::ClientDenied),
            _ => Err(Error::UnknownRequestType),
        }
    }

    pub fn to_u8(&self) -> u8 {
        match self {
            FailCode::None => 0,
            FailCode::InvalidInfo => 1,
            FailCode::AdmissionFailed => 2,
            FailCode::ClientDenied => 3,
        }
    }

    pub fn merge(&self, other: FailCode) -> FailCode {
        if other > *self {
            other
        } else {
            *self
        }
    }
}

impl Default for FailCode {
    fn default() -> Self {
        FailCode::None
    }
}

/// Per-AS secret value from which hop authenticators are derived.
#[derive(Clone, Copy)]
pub struct Sv(pub [u8; 32]);
