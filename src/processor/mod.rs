//! The QMI command orchestrator.
//!
//! One [`Processor`] owns the open device, the typed service clients and all
//! long-lived modem state. Requests are dispatched on the command verb; each
//! handler is a small state machine over QMI client calls. Indications, the
//! registration supervisor and the stats sampler run as cooperative tasks on
//! the same single-threaded event loop and never preempt a request in
//! flight.

mod connect;
mod info;
mod messaging;
mod network;
mod sim;

use std::cell::{Cell, OnceCell, RefCell};
use std::rc::{Rc, Weak};

use log::{debug, warn};

use crate::error::Error;
use crate::message::{MessageReader, MessageType};
use crate::protocol::{self, Command, ConnectionStatus};
use crate::qmi::{
    self, nas::NasClient, wda::WdaClient, wms::WmsClient, ClientPool, DataFormat, Indication,
    OpenFlags, QmiDevice, QmiError,
};
use crate::registration::{RegistrationController, RegistrationState};
use crate::sms::SmsList;
use crate::stats::Stats;
use crate::wwan::PortData;

use messaging::MessagingLists;

/// Environment variable routing QMI traffic through the system-wide proxy.
pub const ENV_QMI_PROXY: &str = "RMFD_QMI_PROXY";

/// Environment variable suppressing SMS deletion after assembly (test aid).
pub const ENV_NO_DELETE_SMS: &str = "RMFD_NO_DELETE_SMS";

const DEVICE_OPEN_TIMEOUT_SECS: u64 = 10;

/// Data-connection bookkeeping shared by the connect/disconnect handlers and
/// the stats sampler.
#[derive(Debug, Default)]
pub(crate) struct ConnectionContext {
    pub status: ConnectionStatus,
    pub packet_data_handle: u32,
    pub stats_enabled: bool,
    /// Bumped whenever sampling stops; sleeping sampler tasks compare and
    /// exit.
    pub stats_generation: u64,
}

/// Per-command orchestrator over an open QMI device.
pub struct Processor<D: QmiDevice + 'static, P: PortData + 'static> {
    weak: OnceCell<Weak<Self>>,
    device: D,
    port: P,
    clients: ClientPool<D>,
    pub(crate) registration: RefCell<RegistrationState>,
    pub(crate) controller: RefCell<RegistrationController>,
    pub(crate) connection: RefCell<ConnectionContext>,
    pub(crate) stats: RefCell<Stats>,
    pub(crate) sms_list: RefCell<SmsList>,
    pub(crate) listing: RefCell<MessagingLists>,
    llp_is_raw_ip: Cell<bool>,
    no_delete_sms: bool,
}

fn open_flags(net_802_3: bool) -> OpenFlags {
    OpenFlags {
        sync: true,
        version_info: true,
        proxy: std::env::var_os(ENV_QMI_PROXY).is_some(),
        net_802_3,
        net_no_qos_header: net_802_3,
    }
}

impl<D: QmiDevice + 'static, P: PortData + 'static> Processor<D, P> {
    /// Opens the device, negotiates the link-layer data format, allocates
    /// the service clients, initializes messaging, and starts the background
    /// supervisors. Must run inside a `LocalSet`.
    pub async fn init(device: D, port: P, stats_path: impl Into<std::path::PathBuf>) -> Result<Rc<Self>, Error> {
        debug!("opening QMI device...");
        qmi::call(DEVICE_OPEN_TIMEOUT_SECS, device.open(open_flags(false))).await?;
        debug!("QMI device opened: {}", device.path());

        // Reconcile the kernel's expected data format with the link layer
        // the modem negotiated; failures downgrade to 802.3.
        debug!("running data format initialization...");
        let raw_ip = match data_format_init(&device).await {
            Ok(raw_ip) => {
                debug!("data format initialized");
                raw_ip
            }
            Err(e) => {
                debug!("data format not initialized: {e}");
                false
            }
        };

        // Reopen with the flags matching the selected link layer.
        if let Err(e) = device.close().await {
            warn!("error closing QMI device: {e}");
        }
        debug!(
            "(re)opening QMI device with {} framing...",
            if raw_ip { "raw-ip" } else { "802.3" }
        );
        qmi::call(DEVICE_OPEN_TIMEOUT_SECS, device.open(open_flags(!raw_ip))).await?;

        let clients = ClientPool::allocate(&device).await?;

        let this = Rc::new(Self {
            weak: OnceCell::new(),
            device,
            port,
            clients,
            registration: RefCell::new(RegistrationState::new()),
            controller: RefCell::new(RegistrationController::default()),
            connection: RefCell::new(ConnectionContext::default()),
            stats: RefCell::new(Stats::setup(stats_path)),
            sms_list: RefCell::new(SmsList::new()),
            listing: RefCell::new(MessagingLists::default()),
            llp_is_raw_ip: Cell::new(raw_ip),
            no_delete_sms: std::env::var_os(ENV_NO_DELETE_SMS).is_some(),
        });
        let _ = this.weak.set(Rc::downgrade(&this));

        debug!("initializing messaging support...");
        this.messaging_init().await?;
        debug!("SMS messaging support initialized");

        this.spawn_indication_task();
        this.register_nas_indications().await;

        // Kick automatic registration; the SMS listing will only find parts
        // here if the SIM is already unlocked.
        this.initiate_registration(true);
        this.messaging_list();

        debug!("processor successfully initialized");
        Ok(this)
    }

    pub(crate) fn rc(&self) -> Option<Rc<Self>> {
        self.weak.get().and_then(Weak::upgrade)
    }

    pub fn data_port_interface(&self) -> &str {
        self.port.interface()
    }

    pub(crate) fn port(&self) -> &P {
        &self.port
    }

    pub(crate) fn clients(&self) -> &ClientPool<D> {
        &self.clients
    }

    pub(crate) fn llp_is_raw_ip(&self) -> bool {
        self.llp_is_raw_ip.get()
    }

    pub(crate) fn no_delete_sms(&self) -> bool {
        self.no_delete_sms
    }

    /// Processes one request frame and produces the matching response frame.
    pub async fn run(&self, request: &[u8]) -> Vec<u8> {
        let (command_code, result) = match MessageReader::new(request) {
            Err(e) => (0, Err(e)),
            Ok(mut reader) => {
                let command_code = reader.command();
                if reader.message_type() != MessageType::Request {
                    (
                        command_code,
                        Err(Error::MalformedFrame(
                            "received message is not a request".to_string(),
                        )),
                    )
                } else {
                    (command_code, self.dispatch(command_code, &mut reader).await)
                }
            }
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                debug!("couldn't process the request: {e}");
                protocol::error_response(command_code, e.wire_status(), &e.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        command_code: u32,
        reader: &mut MessageReader<'_>,
    ) -> Result<Vec<u8>, Error> {
        let command = Command::from_code(command_code)
            .ok_or(Error::UnknownCommand(command_code))?;

        match command {
            Command::GetManufacturer => self.get_manufacturer().await,
            Command::GetModel => self.get_model().await,
            Command::GetSoftwareRevision => self.get_software_revision().await,
            Command::GetHardwareRevision => self.get_hardware_revision().await,
            Command::GetImei => self.get_imei().await,
            Command::GetImsi => self.get_imsi().await,
            Command::GetIccid => self.get_iccid().await,
            Command::GetSimInfo => self.get_sim_info().await,
            Command::IsSimLocked => self.is_sim_locked().await,
            Command::Unlock => {
                let pin = protocol::unlock_request_parse(reader)?;
                self.unlock(&pin).await
            }
            Command::EnablePin => {
                let (enable, pin) = protocol::enable_pin_request_parse(reader)?;
                self.enable_pin(enable, &pin).await
            }
            Command::ChangePin => {
                let (pin, new_pin) = protocol::change_pin_request_parse(reader)?;
                self.change_pin(&pin, &new_pin).await
            }
            Command::GetPowerStatus => self.get_power_status().await,
            Command::SetPowerStatus => {
                let power_status = reader.read_u32()?;
                self.set_power_status(power_status).await
            }
            Command::PowerCycle => self.power_cycle().await,
            Command::GetPowerInfo => self.get_power_info().await,
            Command::GetSignalInfo => self.get_signal_info().await,
            Command::GetRegistrationStatus => self.get_registration_status(),
            Command::GetRegistrationTimeout => self.get_registration_timeout(),
            Command::SetRegistrationTimeout => {
                let timeout_secs = reader.read_u32()?;
                self.set_registration_timeout(timeout_secs)
            }
            Command::GetConnectionStatus => self.get_connection_status(),
            Command::GetConnectionStats => self.get_connection_stats().await,
            Command::Connect => {
                let (apn, user, password) = protocol::connect_request_parse(reader)?;
                self.connect(&apn, &user, &password).await
            }
            Command::Disconnect => self.disconnect().await,
            Command::GetDataPort => Ok(protocol::string_response(
                Command::GetDataPort,
                self.port.interface(),
            )),
            Command::GetSimSlot => self.get_sim_slot().await,
            Command::SetSimSlot => {
                let slot = reader.read_u32()?;
                self.set_sim_slot(slot).await
            }
            // The synthetic availability answer belongs to the server; a
            // processor never sees it.
            Command::Unknown | Command::IsModemAvailable => {
                Err(Error::UnknownCommand(command_code))
            }
        }
    }

    fn spawn_indication_task(&self) {
        let mut indications = self.device.subscribe_indications();
        let Some(this) = self.rc() else { return };
        tokio::task::spawn_local(async move {
            while let Some(indication) = indications.recv().await {
                match indication {
                    Indication::ServingSystem(report) => this.process_serving_system(&report),
                    Indication::NewMessage { storage, index, mode } => {
                        this.handle_new_message(storage, index, mode).await;
                    }
                }
            }
        });
    }

    /// Cancels the supervisors, releases the clients with a best-effort
    /// budget and closes the device.
    pub async fn shutdown(&self) {
        {
            let mut registration = self.registration.borrow_mut();
            self.controller.borrow_mut().cancel(&mut registration);
        }
        {
            let mut connection = self.connection.borrow_mut();
            connection.stats_enabled = false;
            connection.stats_generation += 1;
        }

        // Indication unsubscriptions are best-effort.
        if let Err(e) = qmi::call::<_, QmiError, _>(
            5,
            self.clients.nas.register_indications(false),
        )
        .await
        {
            debug!("couldn't unregister NAS indications: {e}");
        }
        if let Err(e) =
            qmi::call::<_, QmiError, _>(5, self.clients.wms.set_event_report(false)).await
        {
            debug!("couldn't unregister WMS indications: {e}");
        }

        self.clients.release().await;

        if self.device.is_open() {
            match self.device.close().await {
                Ok(()) => debug!("QMI device closed: {}", self.device.path()),
                Err(e) => warn!("error closing QMI device: {e}"),
            }
        }
    }
}

/// Queries the kernel's expected data format and the modem's negotiated link
/// layer through an ephemeral WDA client, overwriting the kernel side on
/// mismatch. Returns whether the link layer is raw-IP.
async fn data_format_init<D: QmiDevice>(device: &D) -> Result<bool, Error> {
    let kernel_format = device.expected_data_format();
    if kernel_format == DataFormat::Unknown {
        return Err(Error::NotSupported(
            "kernel doesn't support data format setting".to_string(),
        ));
    }

    let wda = qmi::call(10, device.allocate_wda())
        .await
        .map_err(|e: QmiError| Error::Unknown(format!("device doesn't support WDA service: {e}")))?;

    let llp = match qmi::call(10, wda.get_data_format()).await {
        Ok(llp) => llp,
        Err(e) => {
            qmi::pool::release_client(&wda).await;
            return Err(Error::Unknown(format!(
                "error retrieving data format with WDA client: {e}"
            )));
        }
    };

    debug!("checking data format: kernel {kernel_format}, device {llp}");

    use crate::qmi::wda::LinkLayerProtocol;
    let (raw_ip, matching) = match llp {
        LinkLayerProtocol::Ethernet8023 => (false, kernel_format == DataFormat::Ethernet8023),
        LinkLayerProtocol::RawIp => (true, kernel_format == DataFormat::RawIp),
        LinkLayerProtocol::Unknown => {
            qmi::pool::release_client(&wda).await;
            return Err(Error::Unknown("unknown link layer protocol".to_string()));
        }
    };

    if !matching {
        let wanted = if raw_ip { DataFormat::RawIp } else { DataFormat::Ethernet8023 };
        debug!("updating kernel data format: {wanted}");
        if let Err(e) = device.set_expected_data_format(wanted) {
            qmi::pool::release_client(&wda).await;
            return Err(e.into());
        }
    }

    qmi::pool::release_client(&wda).await;
    Ok(raw_ip)
}
