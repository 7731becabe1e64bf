//! User Identity Module service client.

use super::{QmiError, ServiceClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinId {
    Pin1,
    Pin2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    PrimaryGwProvisioning,
    CardSlot1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Absent,
    Present,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationType {
    Unknown,
    Sim,
    Usim,
    Ruim,
    Csim,
    Isim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationState {
    Unknown,
    Detected,
    Pin1OrUpinPinRequired,
    Puk1OrUpinPukRequired,
    CheckPersonalizationState,
    Pin1Blocked,
    Illegal,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    Unknown,
    EnabledNotVerified,
    EnabledVerified,
    Disabled,
    Blocked,
    PermanentlyBlocked,
}

#[derive(Debug, Clone)]
pub struct Application {
    pub application_type: ApplicationType,
    pub state: ApplicationState,
    pub pin1_state: PinState,
    pub pin1_retries: u8,
    pub puk1_retries: u8,
}

#[derive(Debug, Clone)]
pub struct Card {
    pub state: CardState,
    /// Card error code when `state` is `Error`.
    pub error_code: Option<u8>,
    pub applications: Vec<Application>,
}

#[derive(Debug, Clone, Default)]
pub struct CardStatus {
    pub cards: Vec<Card>,
}

pub trait UimClient: ServiceClient {
    async fn get_card_status(&self) -> Result<CardStatus, QmiError>;

    async fn verify_pin(
        &self,
        session: SessionType,
        pin_id: PinId,
        pin: &str,
    ) -> Result<(), QmiError>;

    async fn set_pin_protection(
        &self,
        session: SessionType,
        pin_id: PinId,
        enabled: bool,
        pin: &str,
    ) -> Result<(), QmiError>;

    async fn change_pin(
        &self,
        session: SessionType,
        pin_id: PinId,
        old_pin: &str,
        new_pin: &str,
    ) -> Result<(), QmiError>;

    /// Reads a transparent elementary file. `file_path` is the raw
    /// little-endian path bytes leading to `file_id`.
    async fn read_transparent(
        &self,
        session: SessionType,
        file_id: u16,
        file_path: &[u8],
    ) -> Result<Vec<u8>, QmiError>;

    /// Active physical slot, 1-based.
    async fn get_slot_status(&self) -> Result<u8, QmiError>;
    async fn switch_slot(&self, slot: u8) -> Result<(), QmiError>;
}

/// Elementary files the daemon reads, with their full paths.
pub mod files {
    /// EFad, administrative data (MNC length lives in byte 3).
    pub const EF_AD: (u16, [u8; 4]) = (0x6FAD, [0x00, 0x3F, 0x20, 0x7F]);
    /// EFoplmnwact, operator PLMN list with access technologies.
    pub const EF_OPLMNWACT: (u16, [u8; 4]) = (0x6F61, [0x00, 0x3F, 0x20, 0x7F]);
}
