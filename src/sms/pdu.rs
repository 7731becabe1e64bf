//! 3GPP 23.040 PDU decoding and submit-PDU construction.

use log::{debug, warn};

use crate::charsets;
use crate::error::Error;
use crate::sms::part::{Concat, PduType, SmsEncoding, SmsPart};

const PDU_SIZE: usize = 200;

const TP_MTI_MASK: u8 = 0x03;
const TP_MTI_DELIVER: u8 = 0x00;
const TP_MTI_SUBMIT: u8 = 0x01;
const TP_MTI_STATUS_REPORT: u8 = 0x02;

const NUMBER_TYPE_MASK: u8 = 0x70;
const NUMBER_TYPE_INTL: u8 = 0x10;
const NUMBER_TYPE_ALPHA: u8 = 0x50;
const NUMBER_PLAN_MASK: u8 = 0x0f;
const NUMBER_PLAN_TELEPHONE: u8 = 0x01;

const TP_SRI: u8 = 0x20;
const TP_UDHI: u8 = 0x40;

const DCS_CLASS_VALID: u8 = 0x10;
const DCS_CLASS_MASK: u8 = 0x03;
const DCS_CODING_UCS2: u8 = 0x08;
const DCS_CODING_8BIT: u8 = 0x04;

fn bcd_char(nibble: u8) -> Option<char> {
    match nibble {
        0..=9 => Some(char::from(b'0' + nibble)),
        10 => Some('*'),
        11 => Some('#'),
        12 => Some('a'),
        13 => Some('b'),
        14 => Some('c'),
        _ => None,
    }
}

/// Semi-octet BCD to string; a 0xF nibble terminates.
fn semi_octets_to_bcd_string(octets: &[u8]) -> String {
    let mut out = String::with_capacity(octets.len() * 2);
    for &octet in octets {
        match bcd_char(octet & 0xf) {
            Some(c) => out.push(c),
            None => return out,
        }
        match bcd_char((octet >> 4) & 0xf) {
            Some(c) => out.push(c),
            None => return out,
        }
    }
    out
}

fn char_to_bcd(c: char) -> Option<u8> {
    match c {
        '0'..='9' => Some(c as u8 - b'0'),
        '*' => Some(10),
        '#' => Some(11),
        'a' => Some(12),
        'b' => Some(13),
        'c' => Some(14),
        _ => None,
    }
}

fn string_to_bcd_semi_octets(digits: &str) -> Option<Vec<u8>> {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = Vec::with_capacity(chars.len().div_ceil(2));
    for pair in chars.chunks(2) {
        let low = char_to_bcd(pair[0])?;
        // Odd-length addresses are padded with 0xF.
        let high = if pair.len() == 2 { char_to_bcd(pair[1])? } else { 0xf };
        out.push((high << 4) | low);
    }
    Some(out)
}

/// Decodes an address field. `address` starts at the type-of-address byte;
/// `len` is in semi-octets (digits).
fn decode_address(address: &[u8], len: usize) -> String {
    let addr_type = address[0] & NUMBER_TYPE_MASK;
    let addr_plan = address[0] & NUMBER_PLAN_MASK;
    let digits = &address[1..];

    if addr_type == NUMBER_TYPE_ALPHA {
        let unpacked = charsets::gsm_unpack(digits, (len * 4) / 7, 0);
        charsets::gsm_unpacked_to_utf8(&unpacked)
    } else if addr_type == NUMBER_TYPE_INTL && addr_plan == NUMBER_PLAN_TELEPHONE {
        let mut out = String::with_capacity(len + 1);
        out.push('+');
        out.push_str(&semi_octets_to_bcd_string(&digits[..len.div_ceil(2)]));
        out
    } else {
        semi_octets_to_bcd_string(&digits[..len.div_ceil(2)])
    }
}

/// Decodes a 7-byte timestamp into `YYMMDDHHMMSS±ZZ`.
fn decode_timestamp(ts: &[u8]) -> String {
    let mut out = semi_octets_to_bcd_string(&ts[..6]);
    let quarters = u32::from(ts[6] & 0x7) * 10 + u32::from((ts[6] >> 4) & 0xf);
    let hours = quarters / 4;
    out.push(if ts[6] & 0x08 != 0 { '-' } else { '+' });
    out.push(char::from(b'0' + (hours / 10) as u8));
    out.push(char::from(b'0' + (hours % 10) as u8));
    out
}

/// Encoding selected by the TP-DCS coding groups.
fn encoding_from_dcs(dcs: u8) -> SmsEncoding {
    match (dcs >> 4) & 0xf {
        // General data coding group.
        0..=3 => match dcs & 0x0c {
            0x08 => SmsEncoding::Ucs2,
            // Reserved coding treated as default alphabet.
            0x00 | 0x0c => SmsEncoding::Gsm7,
            0x04 => SmsEncoding::EightBit,
            _ => SmsEncoding::Unknown,
        },
        // Message waiting groups.
        0xc | 0xd => SmsEncoding::Gsm7,
        0xe => SmsEncoding::Ucs2,
        // Data coding / message class group.
        0xf => {
            if dcs & 0x04 == 0 {
                SmsEncoding::Gsm7
            } else {
                SmsEncoding::EightBit
            }
        }
        // Reserved groups are treated as default alphabet.
        _ => SmsEncoding::Gsm7,
    }
}

/// Decodes user data into text; failures yield an empty string so the part
/// can still be assembled and deleted.
fn decode_text(text: &[u8], len: usize, encoding: SmsEncoding, bit_offset: u8) -> String {
    let decoded = match encoding {
        SmsEncoding::Gsm7 => {
            let unpacked = charsets::gsm_unpack(text, len, bit_offset);
            Some(charsets::gsm_unpacked_to_utf8(&unpacked))
        }
        SmsEncoding::Ucs2 => charsets::ucs2be_to_utf8(&text[..len.min(text.len())]),
        _ => None,
    };

    match decoded {
        Some(utf8) => utf8,
        None => {
            warn!(
                "couldn't decode text in PDU (encoding {encoding:?}, bit offset {bit_offset}): [{}]",
                charsets::bin2hexstr(text)
            );
            String::new()
        }
    }
}

/// TP-VP relative byte to minutes.
fn relative_to_validity(relative: u8) -> u32 {
    let relative = u32::from(relative);
    if relative <= 143 {
        return (relative + 1) * 5;
    }
    if relative <= 167 {
        return 720 + (relative - 143) * 30;
    }
    (relative - 166) * 1440
}

/// Minutes to the closest not-smaller TP-VP relative byte.
fn validity_to_relative(validity: u32) -> u8 {
    if validity == 0 {
        return 167; // 24 hours
    }

    let mut validity = validity;
    if validity <= 720 {
        if validity % 5 != 0 {
            validity += 5;
        }
        return ((validity / 5) - 1) as u8;
    }

    if validity <= 1440 {
        if validity % 30 != 0 {
            validity += 30;
        }
        validity = validity.min(1440);
        return (143 + (validity - 720) / 30) as u8;
    }

    if validity <= 43200 {
        if validity % 1440 != 0 {
            validity += 1440;
        }
        validity = validity.min(43200);
        return (167 + (validity - 1440) / 1440) as u8;
    }

    if validity <= 635_040 {
        if validity % 10080 != 0 {
            validity += 10080;
        }
        validity = validity.min(635_040);
        return (196 + (validity - 40320) / 10080) as u8;
    }

    255 // 63 weeks
}

macro_rules! size_check {
    ($pdu:expr, $required:expr, $what:expr) => {
        if $pdu.len() < $required {
            return Err(Error::InvalidInput(format!(
                "PDU too short, {}: {} < {}",
                $what,
                $pdu.len(),
                $required
            )));
        }
    };
}

/// Decodes a binary 3GPP PDU into an [`SmsPart`].
pub fn decode(index: u32, pdu: &[u8]) -> Result<SmsPart, Error> {
    let mut part = SmsPart::new(index, PduType::Unknown);

    // SMSC address precedes the TPDU; its first byte counts bytes.
    size_check!(pdu, 1, "cannot read SMSC address length");
    let smsc_len = usize::from(pdu[0]);
    let mut offset = 1;
    if smsc_len > 0 {
        size_check!(pdu, offset + smsc_len, "cannot read SMSC address");
        part.smsc = Some(decode_address(&pdu[1..1 + smsc_len], 2 * (smsc_len - 1)));
        offset += smsc_len;
    }

    size_check!(pdu, offset + 1, "cannot read TP-MTI");
    let first_octet = pdu[offset];
    let pdu_type = first_octet & TP_MTI_MASK;
    part.pdu_type = match pdu_type {
        TP_MTI_DELIVER => PduType::Deliver,
        TP_MTI_SUBMIT => PduType::Submit,
        TP_MTI_STATUS_REPORT => PduType::StatusReport,
        other => {
            return Err(Error::Unknown(format!("Unhandled message type: 0x{other:02x}")));
        }
    };

    part.delivery_report_request = first_octet & TP_SRI != 0;
    let validity_format = if pdu_type == TP_MTI_SUBMIT { first_octet & 0x18 } else { 0 };
    let has_udh = first_octet & TP_UDHI != 0;
    offset += 1;

    // TP-MR, in SUBMIT and STATUS REPORT PDUs.
    if pdu_type == TP_MTI_SUBMIT || pdu_type == TP_MTI_STATUS_REPORT {
        size_check!(pdu, offset + 1, "cannot read message reference");
        part.message_reference = Some(pdu[offset]);
        offset += 1;
    }

    // TP-DA / TP-OA / TP-RA; first byte counts digits.
    size_check!(pdu, offset + 1, "cannot read number of digits in number");
    let addr_digits = usize::from(pdu[offset]);
    offset += 1;
    let addr_bytes = (addr_digits + 1) >> 1;
    size_check!(pdu, offset + 1 + addr_bytes, "cannot read number");
    part.number = Some(decode_address(&pdu[offset..offset + 1 + addr_bytes], addr_digits));
    offset += 1 + addr_bytes;

    // The following offsets are optional, 0 meaning absent.
    let mut tp_pid_offset = 0usize;
    let mut tp_dcs_offset = 0usize;
    let mut tp_udl_offset = 0usize;

    match pdu_type {
        TP_MTI_DELIVER => {
            size_check!(pdu, offset + 9, "cannot read PID/DCS/Timestamp");
            tp_pid_offset = offset;
            tp_dcs_offset = offset + 1;
            part.timestamp = Some(decode_timestamp(&pdu[offset + 2..offset + 9]));
            offset += 9;
            tp_udl_offset = offset;
        }
        TP_MTI_SUBMIT => {
            size_check!(
                pdu,
                offset + 2 + usize::from(validity_format != 0),
                "cannot read PID/DCS/Validity"
            );
            tp_pid_offset = offset;
            tp_dcs_offset = offset + 1;
            offset += 2;

            match validity_format {
                0x00 => {}
                0x10 => {
                    part.validity_relative = Some(relative_to_validity(pdu[offset]));
                    offset += 1;
                }
                // Enhanced and absolute formats are skipped, 7 bytes each.
                0x08 | 0x18 => offset += 7,
                _ => unreachable!(),
            }
            tp_udl_offset = offset;
        }
        TP_MTI_STATUS_REPORT => {
            // Two timestamps: reception at the SMSC, then discharge.
            size_check!(pdu, offset + 15, "cannot read Timestamps/TP-STATUS");
            part.timestamp = Some(decode_timestamp(&pdu[offset..offset + 7]));
            part.discharge_timestamp = Some(decode_timestamp(&pdu[offset + 7..offset + 14]));
            part.delivery_state = Some(pdu[offset + 14]);
            offset += 15;

            // Optional TP-PI selects which trailing fields are present.
            if offset < pdu.len() {
                let pi = pdu[offset];
                let mut next = offset + 1;
                if pi & 0x01 != 0 {
                    tp_pid_offset = next;
                    next += 1;
                }
                if pi & 0x02 != 0 {
                    tp_dcs_offset = next;
                    next += 1;
                }
                if pi & 0x04 != 0 {
                    tp_udl_offset = next;
                }
            }
        }
        _ => unreachable!(),
    }

    if tp_pid_offset > 0 {
        size_check!(pdu, tp_pid_offset + 1, "cannot read TP-PID");
        debug!("  PID: {}", pdu[tp_pid_offset]);
    }

    let mut encoding = SmsEncoding::Unknown;
    if tp_dcs_offset > 0 {
        size_check!(pdu, tp_dcs_offset + 1, "cannot read TP-DCS");
        let dcs = pdu[tp_dcs_offset];
        encoding = encoding_from_dcs(dcs);
        part.encoding = encoding;
        if dcs & DCS_CLASS_VALID != 0 {
            part.class = Some(dcs & DCS_CLASS_MASK);
        }
    }

    if tp_udl_offset > 0 {
        size_check!(pdu, tp_udl_offset + 1, "cannot read TP-UDL");
        let mut ud_elements = usize::from(pdu[tp_udl_offset]);
        let mut ud_bytes = if encoding == SmsEncoding::Gsm7 {
            (7 * (ud_elements + 1)) / 8
        } else {
            ud_elements
        };
        let mut ud_offset = tp_udl_offset + 1;
        size_check!(pdu, ud_offset + ud_bytes, "cannot read TP-UD");

        let mut bit_offset = 0u8;
        if has_udh {
            let udhl = usize::from(pdu[ud_offset]) + 1;
            let end = ud_offset + udhl;
            size_check!(pdu, end, "cannot read UDH");
            if udhl > ud_bytes {
                return Err(Error::InvalidInput("UDH longer than user data".to_string()));
            }

            let mut ie_offset = ud_offset + 1;
            while ie_offset + 1 < end {
                let ie_id = pdu[ie_offset];
                let ie_len = usize::from(pdu[ie_offset + 1]);
                ie_offset += 2;

                match ie_id {
                    // Concatenation, 8-bit reference. An IE claiming to be
                    // part 0, or part N of M with N > M, is ignored.
                    0x00 => {
                        if ie_offset + 2 < end
                            && pdu[ie_offset + 2] != 0
                            && pdu[ie_offset + 2] <= pdu[ie_offset + 1]
                        {
                            part.concat = Some(Concat {
                                reference: u16::from(pdu[ie_offset]),
                                max: pdu[ie_offset + 1],
                                sequence: pdu[ie_offset + 2],
                            });
                        }
                    }
                    // Concatenation, 16-bit reference.
                    0x08 => {
                        if ie_offset + 3 < end
                            && pdu[ie_offset + 3] != 0
                            && pdu[ie_offset + 3] <= pdu[ie_offset + 2]
                        {
                            part.concat = Some(Concat {
                                reference: (u16::from(pdu[ie_offset]) << 8)
                                    | u16::from(pdu[ie_offset + 1]),
                                max: pdu[ie_offset + 2],
                                sequence: pdu[ie_offset + 3],
                            });
                        }
                    }
                    _ => {}
                }

                ie_offset += ie_len;
            }

            // Step past the header so it never decodes as text.
            ud_offset += udhl;
            ud_bytes -= udhl;
            if encoding == SmsEncoding::Gsm7 {
                bit_offset = ((7 - (udhl % 7)) % 7) as u8;
                let consumed = (udhl * 8 + usize::from(bit_offset)) / 7;
                ud_elements = ud_elements.saturating_sub(consumed);
            } else {
                ud_elements = ud_elements.saturating_sub(udhl);
            }
        }

        match encoding {
            SmsEncoding::Gsm7 | SmsEncoding::Ucs2 => {
                part.text = Some(decode_text(&pdu[ud_offset..], ud_elements, encoding, bit_offset));
            }
            _ => {
                // Likely binary data in an encoding we cannot name.
                size_check!(pdu, ud_offset + ud_bytes, "cannot read user data");
                part.data = Some(pdu[ud_offset..ud_offset + ud_bytes].to_vec());
            }
        }
    }

    Ok(part)
}

/// Decodes a hex-encoded 3GPP PDU.
pub fn decode_hex(index: u32, hexpdu: &str) -> Result<SmsPart, Error> {
    let pdu = charsets::hexstr2bin(hexpdu).ok_or_else(|| {
        Error::InvalidInput("Couldn't convert 3GPP PDU from hex to binary".to_string())
    })?;
    decode(index, &pdu)
}

/// A constructed submit PDU: the raw bytes and the byte index where the
/// message starts (after the SMSC field).
#[derive(Debug, Clone)]
pub struct SubmitPdu {
    pub bytes: Vec<u8>,
    pub msg_start: usize,
}

/// Encodes an address field into `buf`; returns the bytes written. For SMSC
/// addresses the size prefix counts octets, otherwise digits.
fn encode_address(address: &str, buf: &mut Vec<u8>, is_smsc: bool) -> Result<usize, Error> {
    let mut type_byte = 0x80; // bit 7 always set
    let digits = if let Some(stripped) = address.strip_prefix('+') {
        type_byte |= NUMBER_TYPE_INTL;
        stripped
    } else {
        address
    };
    type_byte |= NUMBER_PLAN_TELEPHONE;

    let bcd = string_to_bcd_semi_octets(digits)
        .ok_or_else(|| Error::InvalidInput(format!("Invalid number '{address}'")))?;
    if bcd.is_empty() {
        return Err(Error::InvalidInput(format!("Invalid number '{address}'")));
    }

    if is_smsc {
        buf.push(bcd.len() as u8 + 1);
    } else {
        buf.push(digits.chars().count() as u8);
    }
    buf.push(type_byte);
    buf.extend_from_slice(&bcd);
    Ok(bcd.len() + 2)
}

/// Builds a submit PDU from a part carrying a destination and either text or
/// data.
pub fn encode_submit(part: &SmsPart) -> Result<SubmitPdu, Error> {
    if part.pdu_type != PduType::Submit {
        return Err(Error::InvalidInput(
            "Invalid PDU type to generate a 'submit' PDU".to_string(),
        ));
    }
    let number = part
        .number
        .as_deref()
        .ok_or_else(|| Error::InvalidInput("submit PDU needs a destination".to_string()))?;

    let mut pdu = Vec::with_capacity(PDU_SIZE);

    let msg_start = match part.smsc.as_deref() {
        Some(smsc) => {
            encode_address(smsc, &mut pdu, true)?;
            pdu.len()
        }
        None => {
            pdu.push(0x00); // default SMSC
            1
        }
    };

    let mut first_octet = TP_MTI_SUBMIT;
    if part.validity_relative.unwrap_or(0) > 0 {
        first_octet |= 0x10; // TP-VPF relative
    }
    let concat = part.concat;
    if concat.is_some() {
        first_octet |= TP_UDHI;
    }
    // Delivery report in singlepart messages or the last part of a multipart.
    if part.delivery_report_request
        && concat.map_or(true, |c| c.sequence == c.max)
    {
        first_octet |= TP_SRI;
    }
    pdu.push(first_octet);

    pdu.push(0x00); // TP-MR, filled in by the device

    encode_address(number, &mut pdu, false)?;

    pdu.push(0x00); // TP-PID

    let mut dcs = 0x00;
    if let Some(class) = part.class {
        if class <= 3 {
            dcs |= DCS_CLASS_VALID | class;
        }
    }
    match part.encoding {
        SmsEncoding::Ucs2 => dcs |= DCS_CODING_UCS2,
        SmsEncoding::Gsm7 => {}
        _ => dcs |= DCS_CODING_8BIT,
    }
    pdu.push(dcs);

    if let Some(validity) = part.validity_relative {
        if validity > 0 {
            pdu.push(validity_to_relative(validity));
        }
    }

    let udl_index = pdu.len();
    pdu.push(0);

    let mut shift = 0u8;
    if let Some(c) = concat {
        pdu.extend_from_slice(&[0x05, 0x00, 0x03, c.reference as u8, c.max, c.sequence]);
        // A 6-byte UDH is 48 bits; one padding bit septet-aligns the payload.
        shift = 1;
    }

    match part.encoding {
        SmsEncoding::Gsm7 => {
            let text = part.text.as_deref().unwrap_or("");
            let unpacked = charsets::utf8_to_unpacked_gsm(text);
            if unpacked.is_empty() {
                return Err(Error::InvalidInput(
                    "Failed to convert message text to GSM".to_string(),
                ));
            }
            pdu[udl_index] = unpacked.len() as u8 + if concat.is_some() { 7 } else { 0 };
            let packed = charsets::gsm_pack(&unpacked, shift);
            pdu.extend_from_slice(&packed);
        }
        SmsEncoding::Ucs2 => {
            let text = part.text.as_deref().unwrap_or("");
            let encoded = charsets::utf8_to_ucs2be(text).ok_or_else(|| {
                Error::InvalidInput("Failed to convert message text to UCS2".to_string())
            })?;
            pdu[udl_index] = encoded.len() as u8 + if concat.is_some() { 6 } else { 0 };
            pdu.extend_from_slice(&encoded);
        }
        _ => {
            let data = part
                .data
                .as_deref()
                .ok_or_else(|| Error::InvalidInput("submit PDU needs text or data".to_string()))?;
            pdu[udl_index] = data.len() as u8 + if concat.is_some() { 6 } else { 0 };
            pdu.extend_from_slice(data);
        }
    }

    if pdu.len() > PDU_SIZE {
        return Err(Error::InvalidInput("PDU too long".to_string()));
    }

    Ok(SubmitPdu { bytes: pdu, msg_start })
}

/// Splits `text` into per-part chunks, preferring the GSM default alphabet
/// when every character is representable. Singlepart bodies fit 160 septets
/// or 70 UCS-2 characters; multipart chunks fit 153 septets or 67 UCS-2
/// characters to leave room for the UDH.
pub fn split_text(text: &str) -> Option<(Vec<String>, SmsEncoding)> {
    let (_, gsm_unsupported) = charsets::gsm_encoded_len(text);

    if gsm_unsupported > 0 {
        let encoded = charsets::utf8_to_ucs2be(text)?;
        if encoded.len() <= 140 {
            return Some((vec![text.to_string()], SmsEncoding::Ucs2));
        }
        let chunks = encoded
            .chunks(134)
            .map(|chunk| charsets::ucs2be_to_utf8(chunk))
            .collect::<Option<Vec<_>>>()?;
        return Some((chunks, SmsEncoding::Ucs2));
    }

    let (septets, _) = charsets::gsm_encoded_len(text);
    if septets <= 160 {
        return Some((vec![text.to_string()], SmsEncoding::Gsm7));
    }

    // Chunk on character boundaries, never splitting an escaped pair.
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_septets = 0;
    for c in text.chars() {
        let (char_septets, _) = charsets::gsm_encoded_len(c.encode_utf8(&mut [0u8; 4]));
        if current_septets + char_septets > 153 {
            chunks.push(std::mem::take(&mut current));
            current_septets = 0;
        }
        current.push(c);
        current_septets += char_septets;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    Some((chunks, SmsEncoding::Gsm7))
}

/// Splits raw 8-bit payloads: one chunk up to 140 bytes, otherwise 134-byte
/// chunks.
pub fn split_data(data: &[u8]) -> Vec<Vec<u8>> {
    if data.len() <= 140 {
        return vec![data.to_vec()];
    }
    data.chunks(134).map(|c| c.to_vec()).collect()
}
