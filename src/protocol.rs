//! Command table and per-command frame constructors/parsers.
//!
//! The payload shape of every command is fixed: the builders here are the
//! single source of truth for field order, shared by the daemon (responses)
//! and by tests (requests). All of it rides on [`crate::message`].

use crate::error::status;
use crate::message::{MessageBuilder, MessageReader, MessageType};
use crate::registration::RegistrationStatus;

/// Well-known filesystem path of the daemon's Unix socket.
pub const SOCKET_PATH: &str = "/tmp/rmfd-server";

/// Command verbs, a closed enumeration. Unknown codes are an explicit error
/// at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Unknown,
    GetManufacturer,
    GetModel,
    GetSoftwareRevision,
    GetHardwareRevision,
    GetImei,
    GetImsi,
    GetIccid,
    Unlock,
    EnablePin,
    ChangePin,
    GetPowerStatus,
    SetPowerStatus,
    GetPowerInfo,
    GetSignalInfo,
    GetRegistrationStatus,
    GetConnectionStatus,
    GetConnectionStats,
    Connect,
    Disconnect,
    IsModemAvailable,
    GetSimInfo,
    IsSimLocked,
    PowerCycle,
    GetRegistrationTimeout,
    SetRegistrationTimeout,
    GetDataPort,
    GetSimSlot,
    SetSimSlot,
}

impl Command {
    pub fn code(self) -> u32 {
        match self {
            Command::Unknown => 0,
            Command::GetManufacturer => 1,
            Command::GetModel => 2,
            Command::GetSoftwareRevision => 3,
            Command::GetHardwareRevision => 4,
            Command::GetImei => 5,
            Command::GetImsi => 6,
            Command::GetIccid => 7,
            Command::Unlock => 8,
            Command::EnablePin => 9,
            Command::ChangePin => 10,
            Command::GetPowerStatus => 11,
            Command::SetPowerStatus => 12,
            Command::GetPowerInfo => 13,
            Command::GetSignalInfo => 14,
            Command::GetRegistrationStatus => 15,
            Command::GetConnectionStatus => 16,
            Command::GetConnectionStats => 17,
            Command::Connect => 18,
            Command::Disconnect => 19,
            Command::IsModemAvailable => 20,
            Command::GetSimInfo => 21,
            Command::IsSimLocked => 22,
            Command::PowerCycle => 23,
            Command::GetRegistrationTimeout => 24,
            Command::SetRegistrationTimeout => 25,
            Command::GetDataPort => 26,
            Command::GetSimSlot => 27,
            Command::SetSimSlot => 28,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Command::Unknown,
            1 => Command::GetManufacturer,
            2 => Command::GetModel,
            3 => Command::GetSoftwareRevision,
            4 => Command::GetHardwareRevision,
            5 => Command::GetImei,
            6 => Command::GetImsi,
            7 => Command::GetIccid,
            8 => Command::Unlock,
            9 => Command::EnablePin,
            10 => Command::ChangePin,
            11 => Command::GetPowerStatus,
            12 => Command::SetPowerStatus,
            13 => Command::GetPowerInfo,
            14 => Command::GetSignalInfo,
            15 => Command::GetRegistrationStatus,
            16 => Command::GetConnectionStatus,
            17 => Command::GetConnectionStats,
            18 => Command::Connect,
            19 => Command::Disconnect,
            20 => Command::IsModemAvailable,
            21 => Command::GetSimInfo,
            22 => Command::IsSimLocked,
            23 => Command::PowerCycle,
            24 => Command::GetRegistrationTimeout,
            25 => Command::SetRegistrationTimeout,
            26 => Command::GetDataPort,
            27 => Command::GetSimSlot,
            28 => Command::SetSimSlot,
            _ => return None,
        })
    }
}

/// Data connection lifecycle, in wire numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Disconnecting,
    Connecting,
    Connected,
}

impl From<ConnectionStatus> for u32 {
    fn from(v: ConnectionStatus) -> Self {
        match v {
            ConnectionStatus::Disconnected => 0,
            ConnectionStatus::Disconnecting => 1,
            ConnectionStatus::Connecting => 2,
            ConnectionStatus::Connected => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerStatus {
    Full,
    Low,
}

impl From<PowerStatus> for u32 {
    fn from(v: PowerStatus) -> Self {
        match v {
            PowerStatus::Full => 0,
            PowerStatus::Low => 1,
        }
    }
}

/// One PLMN record from the SIM's operator list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlmnInfo {
    pub mcc: u32,
    pub mnc: u32,
    pub gsm: bool,
    pub umts: bool,
    pub lte: bool,
}

/// Per-radio-interface TX/RX power report. Power values are in tenths of a
/// dBm; consumers divide by ten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioPowerInfo {
    pub in_traffic: bool,
    pub tx_power: i32,
    pub rx0_radio_tuned: bool,
    pub rx0_power: i32,
    pub rx1_radio_tuned: bool,
    pub rx1_power: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioSignalInfo {
    pub available: bool,
    pub rssi: i32,
    pub quality: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatsReport {
    pub tx_packets_ok: u32,
    pub rx_packets_ok: u32,
    pub tx_packets_error: u32,
    pub rx_packets_error: u32,
    pub tx_packets_overflow: u32,
    pub rx_packets_overflow: u32,
    pub tx_bytes_ok: u64,
    pub rx_bytes_ok: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistrationInfo {
    pub status: RegistrationStatus,
    pub operator_description: String,
    pub operator_mcc: u32,
    pub operator_mnc: u32,
    pub lac: u32,
    pub cid: u32,
}

fn request(command: Command) -> MessageBuilder {
    MessageBuilder::new(MessageType::Request, command.code(), status::OK)
}

fn response(command: Command) -> MessageBuilder {
    MessageBuilder::new(MessageType::Response, command.code(), status::OK)
}

/// Error frame: mapped status plus a descriptive string.
pub fn error_response(command: u32, wire_status: u32, msg: &str) -> Vec<u8> {
    let mut b = MessageBuilder::new(MessageType::Response, command, wire_status);
    b.add_string(Some(msg));
    b.serialize()
}

/// Response carrying a single string (identity reads, data port).
pub fn string_response(command: Command, value: &str) -> Vec<u8> {
    let mut b = response(command);
    b.add_string(Some(value));
    b.serialize()
}

/// Response with an empty payload (plain acks).
pub fn empty_response(command: Command) -> Vec<u8> {
    response(command).serialize()
}

/// Request with an empty payload.
pub fn empty_request(command: Command) -> Vec<u8> {
    request(command).serialize()
}

pub fn unlock_request(pin: &str) -> Vec<u8> {
    let mut b = request(Command::Unlock);
    b.add_string(Some(pin));
    b.serialize()
}

pub fn unlock_request_parse(reader: &mut MessageReader<'_>) -> Result<String, crate::error::Error> {
    Ok(reader.read_string()?.to_owned())
}

pub fn enable_pin_request(enable: bool, pin: &str) -> Vec<u8> {
    let mut b = request(Command::EnablePin);
    b.add_u32(u32::from(enable)).add_string(Some(pin));
    b.serialize()
}

pub fn enable_pin_request_parse(
    reader: &mut MessageReader<'_>,
) -> Result<(bool, String), crate::error::Error> {
    let enable = reader.read_u32()? != 0;
    let pin = reader.read_string()?.to_owned();
    Ok((enable, pin))
}

pub fn change_pin_request(pin: &str, new_pin: &str) -> Vec<u8> {
    let mut b = request(Command::ChangePin);
    b.add_string(Some(pin)).add_string(Some(new_pin));
    b.serialize()
}

pub fn change_pin_request_parse(
    reader: &mut MessageReader<'_>,
) -> Result<(String, String), crate::error::Error> {
    let pin = reader.read_string()?.to_owned();
    let new_pin = reader.read_string()?.to_owned();
    Ok((pin, new_pin))
}

pub fn is_sim_locked_response(locked: bool) -> Vec<u8> {
    let mut b = response(Command::IsSimLocked);
    b.add_u32(u32::from(locked));
    b.serialize()
}

pub fn get_sim_info_response(mcc: u32, mnc: u32, plmns: &[PlmnInfo]) -> Vec<u8> {
    let mut b = response(Command::GetSimInfo);
    b.add_u32(mcc).add_u32(mnc).add_u32(plmns.len() as u32);
    for plmn in plmns {
        b.add_u32(plmn.mcc)
            .add_u32(plmn.mnc)
            .add_u32(u32::from(plmn.gsm))
            .add_u32(u32::from(plmn.umts))
            .add_u32(u32::from(plmn.lte));
    }
    b.serialize()
}

pub fn get_power_status_response(power_status: PowerStatus) -> Vec<u8> {
    let mut b = response(Command::GetPowerStatus);
    b.add_u32(power_status.into());
    b.serialize()
}

pub fn set_power_status_request(power_status: u32) -> Vec<u8> {
    let mut b = request(Command::SetPowerStatus);
    b.add_u32(power_status);
    b.serialize()
}

pub fn get_power_info_response(gsm: &RadioPowerInfo, umts: &RadioPowerInfo, lte: &RadioPowerInfo) -> Vec<u8> {
    let mut b = response(Command::GetPowerInfo);
    for info in [gsm, umts, lte] {
        b.add_u32(u32::from(info.in_traffic))
            .add_i32(info.tx_power)
            .add_u32(u32::from(info.rx0_radio_tuned))
            .add_i32(info.rx0_power)
            .add_u32(u32::from(info.rx1_radio_tuned))
            .add_i32(info.rx1_power);
    }
    b.serialize()
}

pub fn get_signal_info_response(gsm: &RadioSignalInfo, umts: &RadioSignalInfo, lte: &RadioSignalInfo) -> Vec<u8> {
    let mut b = response(Command::GetSignalInfo);
    for info in [gsm, umts, lte] {
        b.add_u32(u32::from(info.available))
            .add_i32(info.rssi)
            .add_u32(info.quality);
    }
    b.serialize()
}

pub fn get_registration_status_response(info: &RegistrationInfo) -> Vec<u8> {
    let mut b = response(Command::GetRegistrationStatus);
    b.add_u32(info.status.into())
        .add_string(Some(&info.operator_description))
        .add_u32(info.operator_mcc)
        .add_u32(info.operator_mnc)
        .add_u32(info.lac)
        .add_u32(info.cid);
    b.serialize()
}

pub fn get_registration_timeout_response(timeout_secs: u32) -> Vec<u8> {
    let mut b = response(Command::GetRegistrationTimeout);
    b.add_u32(timeout_secs);
    b.serialize()
}

pub fn set_registration_timeout_request(timeout_secs: u32) -> Vec<u8> {
    let mut b = request(Command::SetRegistrationTimeout);
    b.add_u32(timeout_secs);
    b.serialize()
}

pub fn get_connection_status_response(connection_status: ConnectionStatus) -> Vec<u8> {
    let mut b = response(Command::GetConnectionStatus);
    b.add_u32(connection_status.into());
    b.serialize()
}

pub fn get_connection_stats_response(stats: &ConnectionStatsReport) -> Vec<u8> {
    let mut b = response(Command::GetConnectionStats);
    b.add_u32(stats.tx_packets_ok)
        .add_u32(stats.rx_packets_ok)
        .add_u32(stats.tx_packets_error)
        .add_u32(stats.rx_packets_error)
        .add_u32(stats.tx_packets_overflow)
        .add_u32(stats.rx_packets_overflow)
        .add_u64(stats.tx_bytes_ok)
        .add_u64(stats.rx_bytes_ok);
    b.serialize()
}

pub fn connect_request(apn: &str, user: &str, password: &str) -> Vec<u8> {
    let mut b = request(Command::Connect);
    b.add_string(Some(apn))
        .add_string(Some(user))
        .add_string(Some(password));
    b.serialize()
}

pub fn connect_request_parse(
    reader: &mut MessageReader<'_>,
) -> Result<(String, String, String), crate::error::Error> {
    let apn = reader.read_string()?.to_owned();
    let user = reader.read_string()?.to_owned();
    let password = reader.read_string()?.to_owned();
    Ok((apn, user, password))
}

pub fn is_modem_available_response(available: bool) -> Vec<u8> {
    let mut b = response(Command::IsModemAvailable);
    b.add_u32(u32::from(available));
    b.serialize()
}

pub fn get_sim_slot_response(slot: u32) -> Vec<u8> {
    let mut b = response(Command::GetSimSlot);
    b.add_u32(slot);
    b.serialize()
}

pub fn set_sim_slot_request(slot: u32) -> Vec<u8> {
    let mut b = request(Command::SetSimSlot);
    b.add_u32(slot);
    b.serialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes_round_trip() {
        for code in 0..=28 {
            let cmd = Command::from_code(code).unwrap();
            assert_eq!(cmd.code(), code);
        }
        assert!(Command::from_code(29).is_none());
        assert!(Command::from_code(0xFFFF).is_none());
    }

    #[test]
    fn error_frames_carry_status_and_message() {
        let buf = error_response(Command::Connect.code(), 104, "no modem");
        let mut reader = MessageReader::new(&buf).unwrap();
        assert_eq!(reader.message_type(), MessageType::Response);
        assert_eq!(reader.command(), Command::Connect.code());
        assert_eq!(reader.status(), 104);
        assert_eq!(reader.read_string().unwrap(), "no modem");
    }

    #[test]
    fn connect_request_round_trips() {
        let buf = connect_request("internet", "user", "pass");
        let mut reader = MessageReader::new(&buf).unwrap();
        let (apn, user, password) = connect_request_parse(&mut reader).unwrap();
        assert_eq!(apn, "internet");
        assert_eq!(user, "user");
        assert_eq!(password, "pass");
    }

    #[test]
    fn sim_info_response_carries_plmn_list() {
        let plmns = [
            PlmnInfo { mcc: 214, mnc: 3, gsm: true, umts: true, lte: false },
            PlmnInfo { mcc: 214, mnc: 3, gsm: false, umts: false, lte: true },
        ];
        let buf = get_sim_info_response(214, 7, &plmns);
        let mut reader = MessageReader::new(&buf).unwrap();
        assert_eq!(reader.read_u32().unwrap(), 214);
        assert_eq!(reader.read_u32().unwrap(), 7);
        assert_eq!(reader.read_u32().unwrap(), 2);
        assert_eq!(reader.read_u32().unwrap(), 214);
        assert_eq!(reader.read_u32().unwrap(), 3);
        assert_eq!(reader.read_u32().unwrap(), 1);
        assert_eq!(reader.read_u32().unwrap(), 1);
        assert_eq!(reader.read_u32().unwrap(), 0);
    }

    #[test]
    fn connection_stats_response_layout() {
        let stats = ConnectionStatsReport {
            tx_packets_ok: 1,
            rx_packets_ok: 2,
            tx_packets_error: 3,
            rx_packets_error: 4,
            tx_packets_overflow: 5,
            rx_packets_overflow: 6,
            tx_bytes_ok: 7,
            rx_bytes_ok: 8,
        };
        let buf = get_connection_stats_response(&stats);
        let mut reader = MessageReader::new(&buf).unwrap();
        for expected in 1..=6u32 {
            assert_eq!(reader.read_u32().unwrap(), expected);
        }
        assert_eq!(reader.read_u64().unwrap(), 7);
        assert_eq!(reader.read_u64().unwrap(), 8);
    }
}
