//! Typed QMI client layer.
//!
//! The daemon consumes a higher-level typed QMI client; it never parses TLVs
//! itself. Each service family gets its own module with the typed inputs and
//! outputs its operations exchange, mirroring how the original stack exposes
//! one client object per service. The traits here are the integrator seam: a
//! production binding implements them over the real device multiplexer, tests
//! implement them with scripted mocks.

pub mod dms;
pub mod nas;
pub mod pool;
pub mod uim;
pub mod wda;
pub mod wds;
pub mod wms;

pub use pool::ClientPool;

use core::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::TransportError;

/// QMI service families the daemon talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Dms,
    Nas,
    Wds,
    Uim,
    Wms,
    Wda,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Service::Dms => "dms",
            Service::Nas => "nas",
            Service::Wds => "wds",
            Service::Uim => "uim",
            Service::Wms => "wms",
            Service::Wda => "wda",
        };
        f.write_str(s)
    }
}

/// Flags used when opening the control device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub sync: bool,
    pub version_info: bool,
    pub proxy: bool,
    pub net_802_3: bool,
    pub net_no_qos_header: bool,
}

/// Link-layer framing the kernel expects on the WWAN network interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Unknown,
    Ethernet8023,
    RawIp,
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataFormat::Unknown => "unknown",
            DataFormat::Ethernet8023 => "802.3",
            DataFormat::RawIp => "raw-ip",
        };
        f.write_str(s)
    }
}

/// QMI protocol errors, surfaced verbatim by numeric code.
///
/// The named variants are the ones the daemon inspects; everything else rides
/// in [`ProtocolError::Other`]. Numbering follows the QMI result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    MalformedMessage,
    NoMemory,
    Internal,
    Aborted,
    IncorrectPin,
    NoNetworkFound,
    CallFailed,
    OutOfCall,
    MissingArgument,
    NoEffect,
    PinBlocked,
    PinAlwaysBlocked,
    UimUninitialized,
    DeviceNotReady,
    NoSim,
    Other(u16),
}

impl ProtocolError {
    /// Highest code still mapped onto the wire as `100 + code`; anything
    /// beyond degrades to the generic unknown status.
    pub const MAX_WIRE_MAPPED: u16 = 91;

    pub fn code(&self) -> u16 {
        match self {
            ProtocolError::MalformedMessage => 1,
            ProtocolError::NoMemory => 2,
            ProtocolError::Internal => 3,
            ProtocolError::Aborted => 4,
            ProtocolError::IncorrectPin => 12,
            ProtocolError::NoNetworkFound => 13,
            ProtocolError::CallFailed => 14,
            ProtocolError::OutOfCall => 15,
            ProtocolError::MissingArgument => 17,
            ProtocolError::NoEffect => 26,
            ProtocolError::PinBlocked => 35,
            ProtocolError::PinAlwaysBlocked => 36,
            ProtocolError::UimUninitialized => 37,
            ProtocolError::DeviceNotReady => 52,
            ProtocolError::NoSim => 82,
            ProtocolError::Other(code) => *code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1 => ProtocolError::MalformedMessage,
            2 => ProtocolError::NoMemory,
            3 => ProtocolError::Internal,
            4 => ProtocolError::Aborted,
            12 => ProtocolError::IncorrectPin,
            13 => ProtocolError::NoNetworkFound,
            14 => ProtocolError::CallFailed,
            15 => ProtocolError::OutOfCall,
            17 => ProtocolError::MissingArgument,
            26 => ProtocolError::NoEffect,
            35 => ProtocolError::PinBlocked,
            36 => ProtocolError::PinAlwaysBlocked,
            37 => ProtocolError::UimUninitialized,
            52 => ProtocolError::DeviceNotReady,
            82 => ProtocolError::NoSim,
            other => ProtocolError::Other(other),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MalformedMessage => f.write_str("malformed message"),
            ProtocolError::NoMemory => f.write_str("no memory"),
            ProtocolError::Internal => f.write_str("internal"),
            ProtocolError::Aborted => f.write_str("aborted"),
            ProtocolError::IncorrectPin => f.write_str("incorrect pin"),
            ProtocolError::NoNetworkFound => f.write_str("no network found"),
            ProtocolError::CallFailed => f.write_str("call failed"),
            ProtocolError::OutOfCall => f.write_str("out of call"),
            ProtocolError::MissingArgument => f.write_str("missing argument"),
            ProtocolError::NoEffect => f.write_str("no effect"),
            ProtocolError::PinBlocked => f.write_str("pin blocked"),
            ProtocolError::PinAlwaysBlocked => f.write_str("pin always blocked"),
            ProtocolError::UimUninitialized => f.write_str("uim uninitialized"),
            ProtocolError::DeviceNotReady => f.write_str("device not ready"),
            ProtocolError::NoSim => f.write_str("no sim"),
            ProtocolError::Other(code) => write!(f, "protocol error {code}"),
        }
    }
}

/// Failure of a single QMI client call.
#[derive(Debug, Clone, PartialEq)]
pub enum QmiError {
    /// The modem answered with a QMI protocol-level error.
    Protocol(ProtocolError),
    /// The call never completed at the transport layer.
    Transport(TransportError),
}

impl QmiError {
    pub fn is_protocol(&self, e: ProtocolError) -> bool {
        matches!(self, QmiError::Protocol(p) if *p == e)
    }
}

impl fmt::Display for QmiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QmiError::Protocol(e) => write!(f, "QMI protocol error: {e}"),
            QmiError::Transport(e) => write!(f, "QMI transport error: {e}"),
        }
    }
}

/// Unsolicited notifications delivered outside the request/response flow.
#[derive(Debug, Clone)]
pub enum Indication {
    ServingSystem(nas::ServingSystem),
    NewMessage {
        storage: wms::StorageType,
        index: u32,
        mode: wms::MessageMode,
    },
}

/// Common surface of a typed service client.
pub trait ServiceClient {
    fn service(&self) -> Service;

    /// Releases the client id back to the device. The client must not be
    /// used afterwards.
    async fn release(&self) -> Result<(), QmiError>;
}

/// The control device: open/close lifecycle, client allocation, kernel data
/// format negotiation, and the unsolicited indication stream.
pub trait QmiDevice {
    type Dms: dms::DmsClient + 'static;
    type Nas: nas::NasClient + 'static;
    type Wds: wds::WdsClient + 'static;
    type Uim: uim::UimClient + 'static;
    type Wms: wms::WmsClient + 'static;
    type Wda: wda::WdaClient + 'static;

    fn path(&self) -> &str;
    fn is_open(&self) -> bool;

    async fn open(&self, flags: OpenFlags) -> Result<(), QmiError>;
    async fn close(&self) -> Result<(), QmiError>;

    /// Kernel-side expected data format (sysfs; synchronous and cheap).
    fn expected_data_format(&self) -> DataFormat;
    fn set_expected_data_format(&self, format: DataFormat) -> Result<(), QmiError>;

    async fn allocate_dms(&self) -> Result<Self::Dms, QmiError>;
    async fn allocate_nas(&self) -> Result<Self::Nas, QmiError>;
    async fn allocate_wds(&self) -> Result<Self::Wds, QmiError>;
    async fn allocate_uim(&self) -> Result<Self::Uim, QmiError>;
    async fn allocate_wms(&self) -> Result<Self::Wms, QmiError>;
    async fn allocate_wda(&self) -> Result<Self::Wda, QmiError>;

    /// Subscribes to the device's unsolicited indication stream. Indications
    /// are only produced after the matching service-level registration calls
    /// have been issued.
    fn subscribe_indications(&self) -> UnboundedReceiver<Indication>;
}

/// Applies the per-call timeout budget every handler attaches to its QMI
/// calls. Elapsed budgets surface as transport timeouts.
pub async fn call<T, E, F>(timeout_secs: u64, fut: F) -> Result<T, E>
where
    E: From<QmiError>,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(Duration::from_secs(timeout_secs), fut).await {
        Ok(res) => res,
        Err(_) => Err(QmiError::Transport(TransportError::Timeout).into()),
    }
}
