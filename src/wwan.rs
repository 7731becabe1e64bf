//! WWAN network interface bring-up and tear-down.
//!
//! The interface itself is configured by a fixed helper program spawned as a
//! one-shot subprocess; the daemon only maps its exit status. Static
//! configuration passes every field positionally, with a literal `-` for
//! absent values.

use std::net::Ipv4Addr;

use log::debug;
use tokio::process::Command;

use crate::error::Error;

/// Helper program driving the interface.
pub const HELPER_PROGRAM: &str = "rmfd-port-data-wwan-service";

/// Static IPv4 configuration handed to the helper when the link layer is
/// raw-IP.
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    pub address: Option<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub dns1: Option<Ipv4Addr>,
    pub dns2: Option<Ipv4Addr>,
    pub mtu: Option<u32>,
}

fn field<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// The external data port a connection runs over.
pub trait PortData {
    fn interface(&self) -> &str;

    /// Brings the interface up; DHCP takes over configuration.
    async fn setup_start(&self) -> Result<(), Error>;

    /// Brings the interface down.
    async fn setup_stop(&self) -> Result<(), Error>;

    /// Brings the interface up with a static configuration.
    async fn setup_static(&self, config: &StaticConfig) -> Result<(), Error>;
}

/// [`PortData`] implementation spawning the WWAN helper.
#[derive(Debug, Clone)]
pub struct WwanPort {
    interface: String,
}

impl WwanPort {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    async fn run_helper(&self, verb: &str, args: &[String]) -> Result<(), Error> {
        debug!(
            "{verb} WWAN interface '{}': {HELPER_PROGRAM} {} {verb} {}",
            self.interface,
            self.interface,
            args.join(" ")
        );

        let status = Command::new(HELPER_PROGRAM)
            .arg(&self.interface)
            .arg(verb)
            .args(args)
            .status()
            .await
            .map_err(|e| {
                Error::Unknown(format!(
                    "couldn't {verb} WWAN interface '{}': {e}",
                    self.interface
                ))
            })?;

        if !status.success() {
            return Err(Error::Unknown(format!(
                "couldn't {verb} WWAN interface '{}': failed with code {}",
                self.interface,
                status.code().unwrap_or(-1)
            )));
        }

        debug!("WWAN interface '{}' {verb} done", self.interface);
        Ok(())
    }
}

impl PortData for WwanPort {
    fn interface(&self) -> &str {
        &self.interface
    }

    async fn setup_start(&self) -> Result<(), Error> {
        self.run_helper("start", &[]).await
    }

    async fn setup_stop(&self) -> Result<(), Error> {
        self.run_helper("stop", &[]).await
    }

    async fn setup_static(&self, config: &StaticConfig) -> Result<(), Error> {
        let args = [
            field(config.address),
            field(config.subnet_mask),
            field(config.gateway),
            field(config.dns1),
            field(config.dns2),
            field(config.mtu),
        ];
        self.run_helper("static", &args).await
    }
}
