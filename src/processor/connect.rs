//! Data connection lifecycle: iterative bring-up, tear-down, statistics.

use std::time::Duration;

use log::{debug, info, warn};

use crate::error::Error;
use crate::protocol::{self, Command, ConnectionStatsReport, ConnectionStatus};
use crate::qmi::{
    self,
    dms::DmsClient,
    wds::{self, WdsClient},
    ProtocolError, QmiDevice, QmiError,
};
use crate::stats::{format_gps_time, RecordType};
use crate::wwan::{PortData, StaticConfig};

use super::Processor;

const MAX_CONNECT_ITERATIONS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);
const STATS_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// Builds the user-visible error text for a failed network start, embedding
/// the call-end reasons when the modem supplied them.
fn start_network_error(failure: wds::StartNetworkError) -> Error {
    warn!("error: couldn't start network: {}", failure.error);

    if !failure.error.is_protocol(ProtocolError::CallFailed) {
        return failure.error.into();
    }

    let mut message = String::new();
    if let Some(reason) = failure.reasons.reason {
        warn!("call end reason ({reason})");
        message.push_str(&format!("call end reason ({reason})"));
    }
    if let (Some(verbose_type), Some(verbose_reason)) =
        (failure.reasons.verbose_type, failure.reasons.verbose_reason)
    {
        warn!("verbose call end reason ({verbose_type},{verbose_reason})");
        if !message.is_empty() {
            message.push_str(": ");
        }
        message.push_str(&format!(
            "[domain {verbose_type}] reason {verbose_reason}"
        ));
    }

    if message.is_empty() {
        message.push_str("unknown error");
    }
    Error::QmiVerbose(failure.error, message)
}

impl<D: QmiDevice + 'static, P: PortData + 'static> Processor<D, P> {
    pub(super) async fn connect(
        &self,
        apn: &str,
        user: &str,
        password: &str,
    ) -> Result<Vec<u8>, Error> {
        {
            let mut connection = self.connection.borrow_mut();
            match connection.status {
                ConnectionStatus::Disconnecting => {
                    warn!("error connecting: currently disconnecting");
                    return Err(Error::InvalidState("Currently disconnecting".to_string()));
                }
                ConnectionStatus::Connecting => {
                    warn!("error connecting: already connecting");
                    return Err(Error::InvalidState("Already connecting".to_string()));
                }
                ConnectionStatus::Connected => {
                    debug!("already connected");
                    return Ok(protocol::empty_response(Command::Connect));
                }
                ConnectionStatus::Disconnected => {
                    connection.status = ConnectionStatus::Connecting;
                }
            }
        }

        let mut last_error = Error::Unknown("connection attempt failed".to_string());
        for iteration in 1..=MAX_CONNECT_ITERATIONS {
            if iteration > 1 {
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
            warn!("connection: new connection attempt ({iteration}/{MAX_CONNECT_ITERATIONS})...");

            match self.connect_attempt(apn, user, password, iteration).await {
                Ok(()) => {
                    info!(
                        "connection {iteration}/{MAX_CONNECT_ITERATIONS}: successfully connected"
                    );
                    self.connection.borrow_mut().status = ConnectionStatus::Connected;
                    return Ok(protocol::empty_response(Command::Connect));
                }
                Err(e) => {
                    warn!("error: restarting connection iteration: {e}");
                    last_error = e;
                }
            }
        }

        warn!("error: no more connection attempts left");
        self.connection.borrow_mut().status = ConnectionStatus::Disconnected;
        Err(last_error)
    }

    async fn connect_attempt(
        &self,
        apn: &str,
        user: &str,
        password: &str,
        iteration: u32,
    ) -> Result<(), Error> {
        // IPv4 family first; failure only means the preference TLV must ride
        // in the start request instead.
        info!("connection {iteration}/{MAX_CONNECT_ITERATIONS}: setting IPv4 family...");
        let default_ip_family_set = qmi::call::<_, QmiError, _>(
            10,
            self.clients().wds.set_ip_family(wds::IpFamily::Ipv4),
        )
        .await
        .is_ok();

        info!("connection {iteration}/{MAX_CONNECT_ITERATIONS}: starting network...");
        let mut input = wds::StartNetworkInput::default();
        if !apn.is_empty() {
            input.apn = Some(apn.to_string());
        }
        if !user.is_empty() || !password.is_empty() {
            input.authentication = Some(wds::Authentication { pap: true, chap: true });
            if !user.is_empty() {
                input.username = Some(user.to_string());
            }
            if !password.is_empty() {
                input.password = Some(password.to_string());
            }
        }
        if !default_ip_family_set {
            input.ip_family_preference = Some(wds::IpFamily::Ipv4);
        }

        let handle = match qmi::call(45, self.clients().wds.start_network(&input)).await {
            Ok(handle) => handle,
            // The modem keeps a session active as long as some WDS client
            // requested it; a no-effect start means such a session survived
            // (e.g. across a daemon crash) and is adopted as global.
            Err(failure) if failure.error.is_protocol(ProtocolError::NoEffect) => {
                wds::GLOBAL_PACKET_DATA_HANDLE
            }
            Err(failure) => return Err(start_network_error(failure)),
        };
        self.connection.borrow_mut().packet_data_handle = handle;

        info!("connection {iteration}/{MAX_CONNECT_ITERATIONS}: retrieving IPv4 settings...");
        let settings = qmi::call(
            10,
            self.clients().wds.get_current_settings(wds::RequestedSettings {
                ip_address: true,
                dns_address: true,
                gateway_info: true,
                mtu: true,
            }),
        )
        .await
        .map_err(|e: QmiError| Error::from(e))?;

        info!("connection {iteration}/{MAX_CONNECT_ITERATIONS}: wwan interface setup...");
        if let Err(e) = self.wwan_setup(&settings).await {
            // Tear the session down before retrying from scratch.
            let handle = self.connection.borrow().packet_data_handle;
            if let Err(stop_error) =
                qmi::call::<_, QmiError, _>(30, self.clients().wds.stop_network(handle)).await
            {
                debug!("couldn't stop network after failed setup: {stop_error}");
            }
            self.connection.borrow_mut().packet_data_handle = 0;
            return Err(e);
        }

        // Stats acquisition failures are never fatal to the connection.
        info!("connection {iteration}/{MAX_CONNECT_ITERATIONS}: starting stats...");
        if let Err(e) = self.write_connection_stats(RecordType::Start).await {
            debug!("couldn't write initial connection stats: {e}");
        }
        let generation = {
            let mut connection = self.connection.borrow_mut();
            connection.stats_enabled = true;
            connection.stats_generation += 1;
            connection.stats_generation
        };
        self.spawn_stats_sampler(generation);

        Ok(())
    }

    /// 802.3 links hand configuration to DHCP; raw-IP links get the static
    /// configuration decoded from the modem, which requires at least an
    /// address and a subnet mask.
    async fn wwan_setup(&self, settings: &wds::IpSettings) -> Result<(), Error> {
        if !self.llp_is_raw_ip() {
            return self.port().setup_start().await;
        }

        if settings.ipv4_address.is_some() && settings.ipv4_subnet_mask.is_some() {
            let config = StaticConfig {
                address: settings.ipv4_address,
                subnet_mask: settings.ipv4_subnet_mask,
                gateway: settings.ipv4_gateway,
                dns1: settings.primary_dns,
                dns2: settings.secondary_dns,
                mtu: settings.mtu,
            };
            return self.port().setup_static(&config).await;
        }

        Err(Error::Unknown(
            "missing IP configuration for raw-IP setup".to_string(),
        ))
    }

    pub(super) async fn disconnect(&self) -> Result<Vec<u8>, Error> {
        {
            let mut connection = self.connection.borrow_mut();
            match connection.status {
                ConnectionStatus::Disconnecting => {
                    warn!("error: cannot disconnect: already disconnecting");
                    return Err(Error::InvalidState("Already disconnecting".to_string()));
                }
                ConnectionStatus::Connecting => {
                    warn!("error: cannot disconnect: currently connecting");
                    return Err(Error::InvalidState("Currently connecting".to_string()));
                }
                ConnectionStatus::Disconnected => {
                    debug!("already disconnected");
                    return Ok(protocol::empty_response(Command::Disconnect));
                }
                ConnectionStatus::Connected => {
                    connection.status = ConnectionStatus::Disconnecting;
                }
            }
        }

        let handle = self.connection.borrow().packet_data_handle;
        match qmi::call::<_, QmiError, _>(30, self.clients().wds.stop_network(handle)).await {
            Ok(()) => {}
            // Already disconnected on the modem side.
            Err(e) if e.is_protocol(ProtocolError::NoEffect) => {}
            Err(e) => {
                warn!("error: couldn't disconnect: {e}");
                self.connection.borrow_mut().status = ConnectionStatus::Connected;
                return Err(e.into());
            }
        }
        self.connection.borrow_mut().packet_data_handle = 0;

        // Final record; sampling stops either way.
        if let Err(e) = self.write_connection_stats(RecordType::Final).await {
            debug!("couldn't write final connection stats: {e}");
        }
        {
            let mut connection = self.connection.borrow_mut();
            connection.stats_enabled = false;
            connection.stats_generation += 1;
        }

        if let Err(e) = self.port().setup_stop().await {
            warn!("error: couldn't stop interface: {e}");
            warn!("error: will assume disconnected");
            self.connection.borrow_mut().status = ConnectionStatus::Disconnected;
            return Err(e);
        }

        self.connection.borrow_mut().status = ConnectionStatus::Disconnected;
        Ok(protocol::empty_response(Command::Disconnect))
    }

    /// One stats record. The wallclock comes from the modem when available;
    /// counters come from WDS, except for the start record which is written
    /// with zero counters.
    pub(crate) async fn write_connection_stats(&self, record_type: RecordType) -> Result<(), Error> {
        let system_time = qmi::call::<_, QmiError, _>(5, self.clients().dms.get_time())
            .await
            .ok()
            .map(format_gps_time);

        match record_type {
            RecordType::Start => {
                self.stats.borrow_mut().start(system_time);
            }
            RecordType::Partial => {
                let stats = qmi::call::<_, QmiError, _>(
                    5,
                    self.clients()
                        .wds
                        .get_packet_statistics(wds::StatisticsMask::bytes_only()),
                )
                .await?;
                let (rx_bytes, tx_bytes) = if stats.result.is_ok() {
                    (stats.rx_bytes_ok.unwrap_or(0), stats.tx_bytes_ok.unwrap_or(0))
                } else {
                    (0, 0)
                };
                self.stats.borrow_mut().partial(system_time, rx_bytes, tx_bytes);
            }
            RecordType::Final => {
                let stats = qmi::call::<_, QmiError, _>(
                    5,
                    self.clients()
                        .wds
                        .get_packet_statistics(wds::StatisticsMask::bytes_only()),
                )
                .await?;
                // The command errors out-of-call after teardown, but the
                // last-call counters are still valid.
                let rx_bytes = stats.last_call_rx_bytes_ok.unwrap_or(0);
                let tx_bytes = stats.last_call_tx_bytes_ok.unwrap_or(0);
                self.stats.borrow_mut().stop(system_time, rx_bytes, tx_bytes);
            }
        }
        Ok(())
    }

    fn spawn_stats_sampler(&self, generation: u64) {
        let Some(this) = self.rc() else { return };
        tokio::task::spawn_local(async move {
            loop {
                tokio::time::sleep(STATS_SAMPLE_INTERVAL).await;
                {
                    let connection = this.connection.borrow();
                    if !connection.stats_enabled || connection.stats_generation != generation {
                        return;
                    }
                }
                if let Err(e) = this.write_connection_stats(RecordType::Partial).await {
                    debug!("couldn't write connection stats: {e}");
                }
            }
        });
    }

    pub(super) async fn get_connection_stats(&self) -> Result<Vec<u8>, Error> {
        debug!("asynchronously getting packet statistics...");
        let stats = qmi::call::<_, QmiError, _>(
            10,
            self.clients().wds.get_packet_statistics(wds::StatisticsMask::all()),
        )
        .await?;
        stats
            .result
            .map_err(|e| Error::Qmi(QmiError::Protocol(e)))?;

        let report = ConnectionStatsReport {
            tx_packets_ok: stats.tx_packets_ok.unwrap_or(u32::MAX),
            rx_packets_ok: stats.rx_packets_ok.unwrap_or(u32::MAX),
            tx_packets_error: stats.tx_packets_error.unwrap_or(u32::MAX),
            rx_packets_error: stats.rx_packets_error.unwrap_or(u32::MAX),
            tx_packets_overflow: stats.tx_overflows.unwrap_or(u32::MAX),
            rx_packets_overflow: stats.rx_overflows.unwrap_or(u32::MAX),
            tx_bytes_ok: stats.tx_bytes_ok.unwrap_or(0),
            rx_bytes_ok: stats.rx_bytes_ok.unwrap_or(0),
        };
        Ok(protocol::get_connection_stats_response(&report))
    }
}
