//! Device Management Service client.

use super::{QmiError, ServiceClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Online,
    LowPower,
    FactoryTestMode,
    Offline,
    Reset,
    Shutdown,
    PersistentLowPower,
    ModeOnlyLowPower,
    Unknown,
}

/// Identifiers reported by DMS Get IDs.
#[derive(Debug, Clone, Default)]
pub struct DeviceIds {
    pub imei: Option<String>,
    pub esn: Option<String>,
    pub meid: Option<String>,
}

pub trait DmsClient: ServiceClient {
    async fn get_manufacturer(&self) -> Result<String, QmiError>;
    async fn get_model(&self) -> Result<String, QmiError>;
    async fn get_revision(&self) -> Result<String, QmiError>;
    async fn get_hardware_revision(&self) -> Result<String, QmiError>;
    async fn get_ids(&self) -> Result<DeviceIds, QmiError>;

    /// IMSI of the provisioned SIM, via the DMS UIM shim.
    async fn uim_get_imsi(&self) -> Result<String, QmiError>;
    async fn uim_get_iccid(&self) -> Result<String, QmiError>;

    async fn get_operating_mode(&self) -> Result<OperatingMode, QmiError>;
    async fn set_operating_mode(&self, mode: OperatingMode) -> Result<(), QmiError>;

    /// Modem wallclock in milliseconds since the GPS epoch (1980-01-06 UTC).
    async fn get_time(&self) -> Result<u64, QmiError>;
}
