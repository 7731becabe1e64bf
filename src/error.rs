//! Daemon error kinds and their mapping to on-the-wire status codes.

use core::fmt;

use crate::qmi::{ProtocolError, QmiError};

/// Response status codes carried in the IPC message header.
pub mod status {
    pub const OK: u32 = 0;
    pub const ERROR_UNKNOWN: u32 = 1;
    pub const ERROR_INVALID_REQUEST: u32 = 2;
    pub const ERROR_UNKNOWN_COMMAND: u32 = 3;
    pub const ERROR_NO_MODEM: u32 = 4;
    pub const ERROR_PIN_REQUIRED: u32 = 5;
    pub const ERROR_PUK_REQUIRED: u32 = 6;
    pub const ERROR_SIM_ERROR: u32 = 7;
    pub const ERROR_INVALID_PIN: u32 = 8;
    pub const ERROR_INVALID_STATE: u32 = 9;
    pub const ERROR_INVALID_INPUT: u32 = 10;
    pub const ERROR_NOT_SUPPORTED: u32 = 11;

    /// QMI protocol error `n` maps to `QMI_BASE + n`.
    pub const QMI_BASE: u32 = 100;
}

/// Transport-level failures below the message layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    SocketFailed,
    ConnectFailed,
    SendFailed,
    PollFailed,
    Timeout,
    ChannelError,
    ChannelHup,
    RecvFailed,
    RecvNotFull,
    InvalidMsgLength,
    NoMemory,
    NoMatch,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportError::SocketFailed => "socket failed",
            TransportError::ConnectFailed => "connect failed",
            TransportError::SendFailed => "send failed",
            TransportError::PollFailed => "poll failed",
            TransportError::Timeout => "timed out",
            TransportError::ChannelError => "channel error",
            TransportError::ChannelHup => "channel hangup",
            TransportError::RecvFailed => "recv failed",
            TransportError::RecvNotFull => "short recv",
            TransportError::InvalidMsgLength => "invalid message length",
            TransportError::NoMemory => "no memory",
            TransportError::NoMatch => "no match",
        };
        f.write_str(s)
    }
}

/// Internal daemon error.
///
/// Every variant carries the descriptive string that ends up in the error
/// frame sent back to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    MalformedFrame(String),
    UnknownCommand(u32),
    NoModem(String),
    InvalidState(String),
    InvalidInput(String),
    NotSupported(String),
    Unknown(String),
    Qmi(QmiError),
    /// A QMI failure whose user-visible text was replaced with a more
    /// descriptive reason (verbose call-end reasons, SIM remaps). The wire
    /// status still follows the QMI error.
    QmiVerbose(QmiError, String),
    Transport(TransportError),
}

impl Error {
    /// Wire status code for an error frame (§6.1).
    pub fn wire_status(&self) -> u32 {
        match self {
            Error::MalformedFrame(_) => status::ERROR_INVALID_REQUEST,
            Error::UnknownCommand(_) => status::ERROR_UNKNOWN_COMMAND,
            Error::NoModem(_) => status::ERROR_NO_MODEM,
            Error::InvalidState(_) => status::ERROR_INVALID_STATE,
            Error::InvalidInput(_) => status::ERROR_INVALID_INPUT,
            Error::NotSupported(_) => status::ERROR_NOT_SUPPORTED,
            Error::Unknown(_) => status::ERROR_UNKNOWN,
            Error::Qmi(QmiError::Protocol(e)) | Error::QmiVerbose(QmiError::Protocol(e), _) => {
                if e.code() <= ProtocolError::MAX_WIRE_MAPPED {
                    status::QMI_BASE + u32::from(e.code())
                } else {
                    status::ERROR_UNKNOWN
                }
            }
            Error::Qmi(_) | Error::QmiVerbose(..) => status::ERROR_UNKNOWN,
            Error::Transport(_) => status::ERROR_UNKNOWN,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedFrame(msg) => write!(f, "malformed frame: {msg}"),
            Error::UnknownCommand(code) => write!(f, "unknown command received (0x{code:X})"),
            Error::NoModem(msg)
            | Error::InvalidState(msg)
            | Error::InvalidInput(msg)
            | Error::NotSupported(msg)
            | Error::Unknown(msg) => f.write_str(msg),
            Error::Qmi(e) => write!(f, "{e}"),
            Error::QmiVerbose(_, msg) => f.write_str(msg),
            Error::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl From<QmiError> for Error {
    fn from(e: QmiError) -> Self {
        Error::Qmi(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}
