//! Network Access Service client.

use super::{QmiError, ServiceClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAction {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    NotRegistered,
    Registered,
    NotRegisteredSearching,
    RegistrationDenied,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoamingIndicator {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioInterface {
    Gsm,
    Umts,
    Lte,
}

/// Current PLMN as reported in the serving-system TLV set.
#[derive(Debug, Clone, Default)]
pub struct Plmn {
    pub mcc: u16,
    pub mnc: u16,
    pub description: Option<String>,
}

/// Serving-system report, shared by the solicited response and the
/// unsolicited indication.
#[derive(Debug, Clone)]
pub struct ServingSystem {
    pub registration_state: RegistrationState,
    pub roaming: Option<RoamingIndicator>,
    pub plmn: Option<Plmn>,
    pub lac: Option<u16>,
    pub cid: Option<u32>,
}

/// One RX chain of a TX/RX info report. Power in tenths of a dBm.
#[derive(Debug, Clone, Copy)]
pub struct RxChainInfo {
    pub radio_tuned: bool,
    pub power: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct TxInfo {
    pub in_traffic: bool,
    pub power: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TxRxInfo {
    pub rx_chain_0: Option<RxChainInfo>,
    pub rx_chain_1: Option<RxChainInfo>,
    pub tx: Option<TxInfo>,
}

/// Per-technology RSSI set from Get Signal Info; absent entries mean the
/// technology reported no strength TLV.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalInfo {
    pub gsm_rssi: Option<i8>,
    pub wcdma_rssi: Option<i8>,
    pub lte_rssi: Option<i8>,
}

#[derive(Debug, Clone, Copy)]
pub struct SignalStrength {
    pub rssi: i8,
    pub radio_interface: RadioInterface,
}

pub trait NasClient: ServiceClient {
    /// Fire-and-forget attach request; the interesting outcome arrives via
    /// serving-system indications.
    async fn initiate_network_register(&self, action: RegisterAction) -> Result<(), QmiError>;

    /// Enables or disables serving-system event indications.
    async fn register_indications(&self, serving_system_events: bool) -> Result<(), QmiError>;

    async fn get_serving_system(&self) -> Result<ServingSystem, QmiError>;

    /// Explicit network scan; the result set is not consumed, only the
    /// completion matters.
    async fn network_scan(&self) -> Result<(), QmiError>;

    async fn get_tx_rx_info(&self, radio_interface: RadioInterface) -> Result<TxRxInfo, QmiError>;
    async fn get_signal_info(&self) -> Result<SignalInfo, QmiError>;
    async fn get_signal_strength(&self) -> Result<SignalStrength, QmiError>;
}
