//! Wireless Data Service client.

use std::net::Ipv4Addr;

use super::{QmiError, ServiceClient};

/// Packet data handle reported when the modem keeps a pre-existing global
/// session alive (mapped from a no-effect start).
pub const GLOBAL_PACKET_DATA_HANDLE: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    Ipv4,
    Ipv6,
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Authentication {
    pub pap: bool,
    pub chap: bool,
}

/// Input TLVs for Start Network; absent options are simply not sent.
#[derive(Debug, Clone, Default)]
pub struct StartNetworkInput {
    pub apn: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub authentication: Option<Authentication>,
    pub ip_family_preference: Option<IpFamily>,
}

/// Call-end details the modem attaches to a failed start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallEndReasons {
    pub reason: Option<u16>,
    pub verbose_type: Option<u16>,
    pub verbose_reason: Option<i16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartNetworkError {
    pub error: QmiError,
    pub reasons: CallEndReasons,
}

impl From<QmiError> for StartNetworkError {
    fn from(error: QmiError) -> Self {
        Self {
            error,
            reasons: CallEndReasons::default(),
        }
    }
}

/// Settings requested from Get Current Settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestedSettings {
    pub ip_address: bool,
    pub dns_address: bool,
    pub gateway_info: bool,
    pub mtu: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IpSettings {
    pub ipv4_address: Option<Ipv4Addr>,
    pub ipv4_subnet_mask: Option<Ipv4Addr>,
    pub ipv4_gateway: Option<Ipv4Addr>,
    pub primary_dns: Option<Ipv4Addr>,
    pub secondary_dns: Option<Ipv4Addr>,
    pub mtu: Option<u32>,
}

/// Counter selection mask for Get Packet Statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatisticsMask {
    pub tx_packets_ok: bool,
    pub rx_packets_ok: bool,
    pub tx_packets_error: bool,
    pub rx_packets_error: bool,
    pub tx_overflows: bool,
    pub rx_overflows: bool,
    pub tx_bytes_ok: bool,
    pub rx_bytes_ok: bool,
    pub tx_packets_dropped: bool,
    pub rx_packets_dropped: bool,
}

impl StatisticsMask {
    pub fn all() -> Self {
        Self {
            tx_packets_ok: true,
            rx_packets_ok: true,
            tx_packets_error: true,
            rx_packets_error: true,
            tx_overflows: true,
            rx_overflows: true,
            tx_bytes_ok: true,
            rx_bytes_ok: true,
            tx_packets_dropped: true,
            rx_packets_dropped: true,
        }
    }

    pub fn bytes_only() -> Self {
        Self {
            tx_bytes_ok: true,
            rx_bytes_ok: true,
            ..Self::default()
        }
    }
}

/// Packet statistics output.
///
/// The `last_call_*` counters are valid even when the command itself reports
/// an out-of-call protocol error, so the protocol result rides alongside the
/// TLVs instead of replacing them.
#[derive(Debug, Clone)]
pub struct PacketStatistics {
    pub result: Result<(), super::ProtocolError>,
    pub tx_packets_ok: Option<u32>,
    pub rx_packets_ok: Option<u32>,
    pub tx_packets_error: Option<u32>,
    pub rx_packets_error: Option<u32>,
    pub tx_overflows: Option<u32>,
    pub rx_overflows: Option<u32>,
    pub tx_bytes_ok: Option<u64>,
    pub rx_bytes_ok: Option<u64>,
    pub last_call_tx_bytes_ok: Option<u64>,
    pub last_call_rx_bytes_ok: Option<u64>,
}

impl Default for PacketStatistics {
    fn default() -> Self {
        Self {
            result: Ok(()),
            tx_packets_ok: None,
            rx_packets_ok: None,
            tx_packets_error: None,
            rx_packets_error: None,
            tx_overflows: None,
            rx_overflows: None,
            tx_bytes_ok: None,
            rx_bytes_ok: None,
            last_call_tx_bytes_ok: None,
            last_call_rx_bytes_ok: None,
        }
    }
}

pub trait WdsClient: ServiceClient {
    async fn set_ip_family(&self, family: IpFamily) -> Result<(), QmiError>;

    /// Brings up a packet data session; returns the packet data handle.
    async fn start_network(&self, input: &StartNetworkInput) -> Result<u32, StartNetworkError>;

    async fn stop_network(&self, packet_data_handle: u32) -> Result<(), QmiError>;

    async fn get_current_settings(
        &self,
        requested: RequestedSettings,
    ) -> Result<IpSettings, QmiError>;

    /// Fails only at the transport layer; protocol-level failures are
    /// reported inside [`PacketStatistics::result`].
    async fn get_packet_statistics(
        &self,
        mask: StatisticsMask,
    ) -> Result<PacketStatistics, QmiError>;
}
