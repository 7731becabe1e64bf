//! A single decoded SMS part.

/// Index used for parts that are not stored on the modem.
pub const INVALID_INDEX: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PduType {
    #[default]
    Unknown,
    Deliver,
    Submit,
    StatusReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmsEncoding {
    #[default]
    Unknown,
    Gsm7,
    EightBit,
    Ucs2,
}

/// Concatenation descriptor from the user-data header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Concat {
    pub reference: u16,
    pub max: u8,
    pub sequence: u8,
}

/// One part, decoded from a single 3GPP PDU.
#[derive(Debug, Clone)]
pub struct SmsPart {
    pub index: u32,
    pub pdu_type: PduType,
    pub smsc: Option<String>,
    pub number: Option<String>,
    pub timestamp: Option<String>,
    pub discharge_timestamp: Option<String>,
    pub text: Option<String>,
    pub data: Option<Vec<u8>>,
    pub encoding: SmsEncoding,
    pub class: Option<u8>,
    /// Relative validity period in minutes.
    pub validity_relative: Option<u32>,
    pub delivery_state: Option<u8>,
    pub message_reference: Option<u8>,
    pub delivery_report_request: bool,
    pub concat: Option<Concat>,
}

impl SmsPart {
    pub fn new(index: u32, pdu_type: PduType) -> Self {
        Self {
            index,
            pdu_type,
            ..Self::default()
        }
    }

    /// Whether this part belongs to a multipart message.
    pub fn should_concat(&self) -> bool {
        self.concat.is_some()
    }
}

impl Default for SmsPart {
    fn default() -> Self {
        Self {
            index: INVALID_INDEX,
            pdu_type: PduType::Unknown,
            smsc: None,
            number: None,
            timestamp: None,
            discharge_timestamp: None,
            text: None,
            data: None,
            encoding: SmsEncoding::Unknown,
            class: None,
            validity_relative: None,
            delivery_state: None,
            message_reference: None,
            delivery_report_request: false,
            concat: None,
        }
    }
}
