//! SMS assembly: single and multipart messages built from decoded parts.

pub mod part;
pub mod pdu;

pub use part::{Concat, PduType, SmsEncoding, SmsPart};

use crate::error::Error;
use crate::qmi::wms::StorageType;

/// Contents frozen once every part of a message is present.
#[derive(Debug, Clone, Default)]
pub struct AssembledSms {
    pub pdu_type: PduType,
    pub text: String,
    pub data: Vec<u8>,
    pub smsc: Option<String>,
    pub number: Option<String>,
    pub timestamp: Option<String>,
}

/// A message being collected, keyed by `(storage, reference)` when
/// multipart. Sequence numbers in multipart messages start at 1; singlepart
/// messages ignore sequence.
#[derive(Debug)]
pub struct Sms {
    storage: StorageType,
    multipart_reference: Option<u16>,
    max_parts: u8,
    parts: Vec<SmsPart>,
    assembled: Option<AssembledSms>,
}

impl Sms {
    fn singlepart(storage: StorageType, part: SmsPart) -> Self {
        let mut sms = Self {
            storage,
            multipart_reference: None,
            max_parts: 1,
            parts: vec![part],
            assembled: None,
        };
        sms.assemble();
        sms
    }

    fn multipart(storage: StorageType, reference: u16, max_parts: u8) -> Self {
        Self {
            storage,
            multipart_reference: Some(reference),
            max_parts,
            parts: Vec::with_capacity(usize::from(max_parts)),
            assembled: None,
        }
    }

    pub fn storage(&self) -> StorageType {
        self.storage
    }

    pub fn is_multipart(&self) -> bool {
        self.multipart_reference.is_some()
    }

    pub fn multipart_reference(&self) -> Option<u16> {
        self.multipart_reference
    }

    pub fn is_complete(&self) -> bool {
        self.parts.len() == usize::from(self.max_parts)
    }

    /// Frozen contents, present once the message is complete.
    pub fn assembled(&self) -> Option<&AssembledSms> {
        self.assembled.as_ref()
    }

    pub fn parts(&self) -> &[SmsPart] {
        &self.parts
    }

    fn has_part_index(&self, index: u32) -> bool {
        self.parts.iter().any(|p| p.index == index)
    }

    fn sequence_of(part: &SmsPart) -> u8 {
        part.concat.map(|c| c.sequence).unwrap_or(0)
    }

    fn take_part(&mut self, part: SmsPart) -> Result<(), Error> {
        if !self.is_multipart() {
            return Err(Error::Unknown(
                "This SMS is not a multipart message".to_string(),
            ));
        }
        if self.parts.len() >= usize::from(self.max_parts) {
            return Err(Error::Unknown(format!(
                "Already took {} parts, cannot take more",
                self.parts.len()
            )));
        }

        let sequence = Self::sequence_of(&part);
        if sequence > self.max_parts {
            return Err(Error::Unknown(format!(
                "Cannot take part with sequence {sequence}, maximum is {}",
                self.max_parts
            )));
        }
        if self.parts.iter().any(|p| Self::sequence_of(p) == sequence) {
            return Err(Error::Unknown(format!(
                "Cannot take part, sequence {sequence} already taken"
            )));
        }

        let at = self
            .parts
            .iter()
            .position(|p| Self::sequence_of(p) > sequence)
            .unwrap_or(self.parts.len());
        self.parts.insert(at, part);

        if self.is_complete() {
            self.assemble();
        }
        Ok(())
    }

    /// Concatenates text and data in sequence order; metadata comes from the
    /// first part.
    fn assemble(&mut self) {
        let mut assembled = AssembledSms::default();
        for part in &self.parts {
            if let Some(text) = &part.text {
                assembled.text.push_str(text);
            }
            if let Some(data) = &part.data {
                assembled.data.extend_from_slice(data);
            }
        }

        // The parts vector is sorted by sequence, so [0] is part 1.
        let first = &self.parts[0];
        assembled.pdu_type = first.pdu_type;
        assembled.smsc = first.smsc.clone();
        assembled.number = first.number.clone();
        assembled.timestamp = first.timestamp.clone();

        self.assembled = Some(assembled);
    }
}

/// Flat arena of messages under assembly. Completed messages stay in the
/// list so duplicate storage indices keep being rejected.
#[derive(Debug, Default)]
pub struct SmsList {
    messages: Vec<Sms>,
}

impl SmsList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, handle: usize) -> Option<&Sms> {
        self.messages.get(handle)
    }

    /// Offers a decoded part to the list. Returns the handle of the message
    /// the part completed, if any.
    pub fn take_part(
        &mut self,
        part: SmsPart,
        storage: StorageType,
    ) -> Result<Option<usize>, Error> {
        // A (storage, index) pair is ingested at most once.
        if part.index != part::INVALID_INDEX
            && self
                .messages
                .iter()
                .any(|sms| sms.storage == storage && sms.has_part_index(part.index))
        {
            return Err(Error::Unknown(format!(
                "A part with index {} was already taken",
                part.index
            )));
        }

        if let Some(concat) = part.concat {
            if let Some(at) = self.messages.iter().position(|sms| {
                sms.storage == storage && sms.multipart_reference == Some(concat.reference)
            }) {
                let sms = &mut self.messages[at];
                let was_complete = sms.is_complete();
                sms.take_part(part)?;
                return Ok((!was_complete && sms.is_complete()).then_some(at));
            }

            let mut sms = Sms::multipart(storage, concat.reference, concat.max);
            sms.take_part(part)?;
            let complete = sms.is_complete();
            self.messages.push(sms);
            return Ok(complete.then_some(self.messages.len() - 1));
        }

        self.messages.push(Sms::singlepart(storage, part));
        Ok(Some(self.messages.len() - 1))
    }
}
