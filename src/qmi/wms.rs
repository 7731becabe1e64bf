//! Wireless Messaging Service client.

use super::{QmiError, ServiceClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    /// SIM storage.
    Uim,
    /// Modem non-volatile storage.
    Nv,
}

impl core::fmt::Display for StorageType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StorageType::Uim => f.write_str("uim"),
            StorageType::Nv => f.write_str("nv"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageMode {
    Cdma,
    GsmWcdma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    MtRead,
    MtNotRead,
    MoSent,
    MoNotSent,
}

impl core::fmt::Display for MessageTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MessageTag::MtRead => f.write_str("read"),
            MessageTag::MtNotRead => f.write_str("not-read"),
            MessageTag::MoSent => f.write_str("sent"),
            MessageTag::MoNotSent => f.write_str("not-sent"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Cdma,
    GsmWcdmaPointToPoint,
    GsmWcdmaBroadcast,
    Mwi,
}

#[derive(Debug, Clone, Copy)]
pub struct MessageListEntry {
    pub memory_index: u32,
    pub tag: MessageTag,
}

#[derive(Debug, Clone)]
pub struct RawMessage {
    pub tag: MessageTag,
    pub format: MessageFormat,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    PointToPoint,
    Broadcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Class0,
    Class1,
    Class2,
    Class3,
    ClassNone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptAction {
    Discard,
    StoreAndNotify,
    TransferOnly,
    TransferAndAck,
}

/// One route of the default routing table.
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub message_type: MessageType,
    pub message_class: MessageClass,
    pub storage: StorageType,
    pub receipt_action: ReceiptAction,
}

pub trait WmsClient: ServiceClient {
    async fn list_messages(
        &self,
        storage: StorageType,
        tag: MessageTag,
        mode: MessageMode,
    ) -> Result<Vec<MessageListEntry>, QmiError>;

    async fn raw_read(
        &self,
        storage: StorageType,
        memory_index: u32,
        mode: MessageMode,
    ) -> Result<RawMessage, QmiError>;

    async fn delete(
        &self,
        storage: StorageType,
        memory_index: u32,
        mode: MessageMode,
    ) -> Result<(), QmiError>;

    async fn set_routes(&self, routes: &[Route]) -> Result<(), QmiError>;

    /// Enables or disables the new-MT-message indication.
    async fn set_event_report(&self, new_mt_message_indicator: bool) -> Result<(), QmiError>;
}
