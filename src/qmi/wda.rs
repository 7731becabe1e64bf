//! Wireless Data Administration client, used only during link-layer
//! negotiation and released right after.

use super::{QmiError, ServiceClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayerProtocol {
    Unknown,
    Ethernet8023,
    RawIp,
}

impl core::fmt::Display for LinkLayerProtocol {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LinkLayerProtocol::Unknown => f.write_str("unknown"),
            LinkLayerProtocol::Ethernet8023 => f.write_str("802.3"),
            LinkLayerProtocol::RawIp => f.write_str("raw-ip"),
        }
    }
}

pub trait WdaClient: ServiceClient {
    /// Link-layer protocol currently negotiated by the modem.
    async fn get_data_format(&self) -> Result<LinkLayerProtocol, QmiError>;
}
