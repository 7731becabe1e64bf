//! Scripted mock QMI device, service clients and data port.
//!
//! One shared [`MockModem`] backs the device and every client; tests script
//! results through its queues and inspect the recorded calls afterwards.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::Error;
use crate::qmi::{
    dms, nas, uim, wda, wds, wms, DataFormat, Indication, OpenFlags, ProtocolError, QmiDevice,
    QmiError, Service, ServiceClient,
};
use crate::wwan::{PortData, StaticConfig};

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub storage: wms::StorageType,
    pub index: u32,
    pub tag: wms::MessageTag,
    pub data: Vec<u8>,
}

/// Shared scripted modem state.
pub struct MockModem {
    // Device
    pub open_calls: RefCell<Vec<OpenFlags>>,
    pub is_open: Cell<bool>,
    pub expected_data_format: Cell<DataFormat>,
    pub set_expected_data_format_calls: RefCell<Vec<DataFormat>>,
    pub link_layer: Cell<wda::LinkLayerProtocol>,
    pub released: RefCell<Vec<Service>>,
    pub indication_senders: RefCell<Vec<UnboundedSender<Indication>>>,

    // DMS
    pub manufacturer: RefCell<String>,
    pub model: RefCell<String>,
    pub revision: RefCell<String>,
    pub hardware_revision: RefCell<String>,
    pub imei: RefCell<String>,
    pub imsi: RefCell<String>,
    pub iccid: RefCell<String>,
    pub operating_mode: Cell<dms::OperatingMode>,
    pub set_operating_mode_calls: RefCell<Vec<dms::OperatingMode>>,
    pub time_ms: Cell<Option<u64>>,

    // NAS
    pub initiate_register_count: Cell<u32>,
    pub register_indications_calls: RefCell<Vec<bool>>,
    pub serving_system: RefCell<nas::ServingSystem>,
    pub network_scan_count: Cell<u32>,
    pub tx_rx_info: RefCell<[Option<nas::TxRxInfo>; 3]>,
    pub signal_info: RefCell<nas::SignalInfo>,
    pub signal_strength: RefCell<Option<nas::SignalStrength>>,

    // UIM
    pub card_status: RefCell<uim::CardStatus>,
    pub verify_pin_calls: RefCell<Vec<(uim::SessionType, uim::PinId, String)>>,
    pub verify_pin_results: RefCell<VecDeque<Result<(), QmiError>>>,
    pub set_pin_protection_calls: RefCell<Vec<(bool, String)>>,
    pub set_pin_protection_results: RefCell<VecDeque<Result<(), QmiError>>>,
    pub change_pin_calls: RefCell<Vec<(String, String)>>,
    pub change_pin_results: RefCell<VecDeque<Result<(), QmiError>>>,
    pub ef_ad: RefCell<Option<Vec<u8>>>,
    pub ef_oplmnwact: RefCell<Option<Vec<u8>>>,
    pub active_slot: Cell<u8>,
    pub switch_slot_calls: RefCell<Vec<u8>>,
    pub switch_slot_results: RefCell<VecDeque<Result<(), QmiError>>>,

    // WDS
    pub set_ip_family_calls: RefCell<Vec<wds::IpFamily>>,
    pub set_ip_family_results: RefCell<VecDeque<Result<(), QmiError>>>,
    pub start_network_calls: RefCell<Vec<wds::StartNetworkInput>>,
    pub start_network_results: RefCell<VecDeque<Result<u32, wds::StartNetworkError>>>,
    pub start_network_delay: Cell<Option<Duration>>,
    pub stop_network_calls: RefCell<Vec<u32>>,
    pub stop_network_results: RefCell<VecDeque<Result<(), QmiError>>>,
    pub ip_settings: RefCell<wds::IpSettings>,
    pub get_current_settings_failures: Cell<u32>,
    pub packet_statistics: RefCell<wds::PacketStatistics>,

    // WMS
    pub stored_messages: RefCell<Vec<StoredMessage>>,
    pub list_failures: Cell<u32>,
    pub list_calls: RefCell<Vec<(wms::StorageType, wms::MessageTag)>>,
    pub raw_read_calls: RefCell<Vec<(wms::StorageType, u32)>>,
    pub delete_calls: RefCell<Vec<(wms::StorageType, u32)>>,
    pub routes_set: RefCell<Vec<wms::Route>>,
    pub event_report_calls: RefCell<Vec<bool>>,
}

impl MockModem {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            open_calls: RefCell::new(Vec::new()),
            is_open: Cell::new(false),
            expected_data_format: Cell::new(DataFormat::Ethernet8023),
            set_expected_data_format_calls: RefCell::new(Vec::new()),
            link_layer: Cell::new(wda::LinkLayerProtocol::Ethernet8023),
            released: RefCell::new(Vec::new()),
            indication_senders: RefCell::new(Vec::new()),

            manufacturer: RefCell::new("Example Corp".to_string()),
            model: RefCell::new("MC7455".to_string()),
            revision: RefCell::new("SWI9X30C_02.24.03.00".to_string()),
            hardware_revision: RefCell::new("1.0".to_string()),
            imei: RefCell::new("356938035643809".to_string()),
            imsi: RefCell::new("214030123456789".to_string()),
            iccid: RefCell::new("8934041799100075657".to_string()),
            operating_mode: Cell::new(dms::OperatingMode::Online),
            set_operating_mode_calls: RefCell::new(Vec::new()),
            time_ms: Cell::new(None),

            initiate_register_count: Cell::new(0),
            register_indications_calls: RefCell::new(Vec::new()),
            serving_system: RefCell::new(nas::ServingSystem {
                registration_state: nas::RegistrationState::NotRegistered,
                roaming: None,
                plmn: None,
                lac: None,
                cid: None,
            }),
            network_scan_count: Cell::new(0),
            tx_rx_info: RefCell::new([None, None, None]),
            signal_info: RefCell::new(nas::SignalInfo::default()),
            signal_strength: RefCell::new(None),

            card_status: RefCell::new(unlocked_card_status()),
            verify_pin_calls: RefCell::new(Vec::new()),
            verify_pin_results: RefCell::new(VecDeque::new()),
            set_pin_protection_calls: RefCell::new(Vec::new()),
            set_pin_protection_results: RefCell::new(VecDeque::new()),
            change_pin_calls: RefCell::new(Vec::new()),
            change_pin_results: RefCell::new(VecDeque::new()),
            ef_ad: RefCell::new(None),
            ef_oplmnwact: RefCell::new(None),
            active_slot: Cell::new(1),
            switch_slot_calls: RefCell::new(Vec::new()),
            switch_slot_results: RefCell::new(VecDeque::new()),

            set_ip_family_calls: RefCell::new(Vec::new()),
            set_ip_family_results: RefCell::new(VecDeque::new()),
            start_network_calls: RefCell::new(Vec::new()),
            start_network_results: RefCell::new(VecDeque::new()),
            start_network_delay: Cell::new(None),
            stop_network_calls: RefCell::new(Vec::new()),
            stop_network_results: RefCell::new(VecDeque::new()),
            ip_settings: RefCell::new(wds::IpSettings {
                ipv4_address: Some(Ipv4Addr::new(10, 0, 0, 2)),
                ipv4_subnet_mask: Some(Ipv4Addr::new(255, 255, 255, 0)),
                ipv4_gateway: Some(Ipv4Addr::new(10, 0, 0, 1)),
                primary_dns: Some(Ipv4Addr::new(8, 8, 8, 8)),
                secondary_dns: None,
                mtu: Some(1500),
            }),
            get_current_settings_failures: Cell::new(0),
            packet_statistics: RefCell::new(wds::PacketStatistics {
                tx_bytes_ok: Some(0),
                rx_bytes_ok: Some(0),
                last_call_tx_bytes_ok: Some(0),
                last_call_rx_bytes_ok: Some(0),
                ..wds::PacketStatistics::default()
            }),

            stored_messages: RefCell::new(Vec::new()),
            list_failures: Cell::new(0),
            list_calls: RefCell::new(Vec::new()),
            raw_read_calls: RefCell::new(Vec::new()),
            delete_calls: RefCell::new(Vec::new()),
            routes_set: RefCell::new(Vec::new()),
            event_report_calls: RefCell::new(Vec::new()),
        })
    }

    /// Delivers an unsolicited indication to every subscriber.
    pub fn send_indication(&self, indication: Indication) {
        for sender in self.indication_senders.borrow().iter() {
            let _ = sender.send(indication.clone());
        }
    }

    pub fn store_message(&self, storage: wms::StorageType, index: u32, data: Vec<u8>) {
        self.stored_messages.borrow_mut().push(StoredMessage {
            storage,
            index,
            tag: wms::MessageTag::MtNotRead,
            data,
        });
    }
}

/// A present card with an unlocked USIM.
pub fn unlocked_card_status() -> uim::CardStatus {
    card_status_with(uim::ApplicationState::Ready, uim::PinState::Disabled)
}

/// A present card whose USIM waits for PIN1.
pub fn locked_card_status() -> uim::CardStatus {
    card_status_with(
        uim::ApplicationState::Pin1OrUpinPinRequired,
        uim::PinState::EnabledNotVerified,
    )
}

fn card_status_with(state: uim::ApplicationState, pin1_state: uim::PinState) -> uim::CardStatus {
    uim::CardStatus {
        cards: vec![uim::Card {
            state: uim::CardState::Present,
            error_code: None,
            applications: vec![uim::Application {
                application_type: uim::ApplicationType::Usim,
                state,
                pin1_state,
                pin1_retries: 3,
                puk1_retries: 10,
            }],
        }],
    }
}

fn pop_or_ok(queue: &RefCell<VecDeque<Result<(), QmiError>>>) -> Result<(), QmiError> {
    queue.borrow_mut().pop_front().unwrap_or(Ok(()))
}

/// The mock control device.
pub struct MockDevice(pub Rc<MockModem>);

impl QmiDevice for MockDevice {
    type Dms = MockDms;
    type Nas = MockNas;
    type Wds = MockWds;
    type Uim = MockUim;
    type Wms = MockWms;
    type Wda = MockWda;

    fn path(&self) -> &str {
        "/dev/cdc-wdm-mock"
    }

    fn is_open(&self) -> bool {
        self.0.is_open.get()
    }

    async fn open(&self, flags: OpenFlags) -> Result<(), QmiError> {
        self.0.open_calls.borrow_mut().push(flags);
        self.0.is_open.set(true);
        Ok(())
    }

    async fn close(&self) -> Result<(), QmiError> {
        self.0.is_open.set(false);
        Ok(())
    }

    fn expected_data_format(&self) -> DataFormat {
        self.0.expected_data_format.get()
    }

    fn set_expected_data_format(&self, format: DataFormat) -> Result<(), QmiError> {
        self.0.set_expected_data_format_calls.borrow_mut().push(format);
        self.0.expected_data_format.set(format);
        Ok(())
    }

    async fn allocate_dms(&self) -> Result<Self::Dms, QmiError> {
        Ok(MockDms(self.0.clone()))
    }

    async fn allocate_nas(&self) -> Result<Self::Nas, QmiError> {
        Ok(MockNas(self.0.clone()))
    }

    async fn allocate_wds(&self) -> Result<Self::Wds, QmiError> {
        Ok(MockWds(self.0.clone()))
    }

    async fn allocate_uim(&self) -> Result<Self::Uim, QmiError> {
        Ok(MockUim(self.0.clone()))
    }

    async fn allocate_wms(&self) -> Result<Self::Wms, QmiError> {
        Ok(MockWms(self.0.clone()))
    }

    async fn allocate_wda(&self) -> Result<Self::Wda, QmiError> {
        Ok(MockWda(self.0.clone()))
    }

    fn subscribe_indications(&self) -> UnboundedReceiver<Indication> {
        let (tx, rx) = unbounded_channel();
        self.0.indication_senders.borrow_mut().push(tx);
        rx
    }
}

macro_rules! impl_service_client {
    ($name:ident, $service:expr) => {
        impl ServiceClient for $name {
            fn service(&self) -> Service {
                $service
            }

            async fn release(&self) -> Result<(), QmiError> {
                self.0.released.borrow_mut().push($service);
                Ok(())
            }
        }
    };
}

pub struct MockDms(pub Rc<MockModem>);
impl_service_client!(MockDms, Service::Dms);

impl dms::DmsClient for MockDms {
    async fn get_manufacturer(&self) -> Result<String, QmiError> {
        Ok(self.0.manufacturer.borrow().clone())
    }

    async fn get_model(&self) -> Result<String, QmiError> {
        Ok(self.0.model.borrow().clone())
    }

    async fn get_revision(&self) -> Result<String, QmiError> {
        Ok(self.0.revision.borrow().clone())
    }

    async fn get_hardware_revision(&self) -> Result<String, QmiError> {
        Ok(self.0.hardware_revision.borrow().clone())
    }

    async fn get_ids(&self) -> Result<dms::DeviceIds, QmiError> {
        Ok(dms::DeviceIds {
            imei: Some(self.0.imei.borrow().clone()),
            esn: None,
            meid: None,
        })
    }

    async fn uim_get_imsi(&self) -> Result<String, QmiError> {
        let imsi = self.0.imsi.borrow().clone();
        if imsi.is_empty() {
            return Err(QmiError::Protocol(ProtocolError::Internal));
        }
        Ok(imsi)
    }

    async fn uim_get_iccid(&self) -> Result<String, QmiError> {
        Ok(self.0.iccid.borrow().clone())
    }

    async fn get_operating_mode(&self) -> Result<dms::OperatingMode, QmiError> {
        Ok(self.0.operating_mode.get())
    }

    async fn set_operating_mode(&self, mode: dms::OperatingMode) -> Result<(), QmiError> {
        self.0.set_operating_mode_calls.borrow_mut().push(mode);
        self.0.operating_mode.set(mode);
        Ok(())
    }

    async fn get_time(&self) -> Result<u64, QmiError> {
        self.0
            .time_ms
            .get()
            .ok_or(QmiError::Protocol(ProtocolError::NoEffect))
    }
}

pub struct MockNas(pub Rc<MockModem>);
impl_service_client!(MockNas, Service::Nas);

impl nas::NasClient for MockNas {
    async fn initiate_network_register(
        &self,
        _action: nas::RegisterAction,
    ) -> Result<(), QmiError> {
        self.0
            .initiate_register_count
            .set(self.0.initiate_register_count.get() + 1);
        Ok(())
    }

    async fn register_indications(&self, serving_system_events: bool) -> Result<(), QmiError> {
        self.0
            .register_indications_calls
            .borrow_mut()
            .push(serving_system_events);
        Ok(())
    }

    async fn get_serving_system(&self) -> Result<nas::ServingSystem, QmiError> {
        Ok(self.0.serving_system.borrow().clone())
    }

    async fn network_scan(&self) -> Result<(), QmiError> {
        self.0.network_scan_count.set(self.0.network_scan_count.get() + 1);
        Ok(())
    }

    async fn get_tx_rx_info(
        &self,
        radio_interface: nas::RadioInterface,
    ) -> Result<nas::TxRxInfo, QmiError> {
        let index = match radio_interface {
            nas::RadioInterface::Gsm => 0,
            nas::RadioInterface::Umts => 1,
            nas::RadioInterface::Lte => 2,
        };
        self.0.tx_rx_info.borrow()[index]
            .ok_or(QmiError::Protocol(ProtocolError::Other(1)))
    }

    async fn get_signal_info(&self) -> Result<nas::SignalInfo, QmiError> {
        Ok(*self.0.signal_info.borrow())
    }

    async fn get_signal_strength(&self) -> Result<nas::SignalStrength, QmiError> {
        self.0
            .signal_strength
            .borrow()
            .ok_or(QmiError::Protocol(ProtocolError::Other(1)))
    }
}

pub struct MockUim(pub Rc<MockModem>);
impl_service_client!(MockUim, Service::Uim);

impl uim::UimClient for MockUim {
    async fn get_card_status(&self) -> Result<uim::CardStatus, QmiError> {
        Ok(self.0.card_status.borrow().clone())
    }

    async fn verify_pin(
        &self,
        session: uim::SessionType,
        pin_id: uim::PinId,
        pin: &str,
    ) -> Result<(), QmiError> {
        self.0
            .verify_pin_calls
            .borrow_mut()
            .push((session, pin_id, pin.to_string()));
        pop_or_ok(&self.0.verify_pin_results)?;
        // A successful verify unlocks the card, though not instantly on real
        // hardware; the mock flips it right away.
        *self.0.card_status.borrow_mut() = unlocked_card_status();
        Ok(())
    }

    async fn set_pin_protection(
        &self,
        _session: uim::SessionType,
        _pin_id: uim::PinId,
        enabled: bool,
        pin: &str,
    ) -> Result<(), QmiError> {
        self.0
            .set_pin_protection_calls
            .borrow_mut()
            .push((enabled, pin.to_string()));
        pop_or_ok(&self.0.set_pin_protection_results)
    }

    async fn change_pin(
        &self,
        _session: uim::SessionType,
        _pin_id: uim::PinId,
        old_pin: &str,
        new_pin: &str,
    ) -> Result<(), QmiError> {
        self.0
            .change_pin_calls
            .borrow_mut()
            .push((old_pin.to_string(), new_pin.to_string()));
        pop_or_ok(&self.0.change_pin_results)
    }

    async fn read_transparent(
        &self,
        _session: uim::SessionType,
        file_id: u16,
        _file_path: &[u8],
    ) -> Result<Vec<u8>, QmiError> {
        let file = match file_id {
            id if id == uim::files::EF_AD.0 => self.0.ef_ad.borrow().clone(),
            id if id == uim::files::EF_OPLMNWACT.0 => self.0.ef_oplmnwact.borrow().clone(),
            _ => None,
        };
        file.ok_or(QmiError::Protocol(ProtocolError::Other(80)))
    }

    async fn get_slot_status(&self) -> Result<u8, QmiError> {
        Ok(self.0.active_slot.get())
    }

    async fn switch_slot(&self, slot: u8) -> Result<(), QmiError> {
        self.0.switch_slot_calls.borrow_mut().push(slot);
        pop_or_ok(&self.0.switch_slot_results)?;
        self.0.active_slot.set(slot);
        Ok(())
    }
}

pub struct MockWds(pub Rc<MockModem>);
impl_service_client!(MockWds, Service::Wds);

impl wds::WdsClient for MockWds {
    async fn set_ip_family(&self, family: wds::IpFamily) -> Result<(), QmiError> {
        self.0.set_ip_family_calls.borrow_mut().push(family);
        pop_or_ok(&self.0.set_ip_family_results)
    }

    async fn start_network(
        &self,
        input: &wds::StartNetworkInput,
    ) -> Result<u32, wds::StartNetworkError> {
        self.0.start_network_calls.borrow_mut().push(input.clone());
        if let Some(delay) = self.0.start_network_delay.get() {
            tokio::time::sleep(delay).await;
        }
        self.0
            .start_network_results
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(0xBEEF))
    }

    async fn stop_network(&self, packet_data_handle: u32) -> Result<(), QmiError> {
        self.0.stop_network_calls.borrow_mut().push(packet_data_handle);
        pop_or_ok(&self.0.stop_network_results)
    }

    async fn get_current_settings(
        &self,
        _requested: wds::RequestedSettings,
    ) -> Result<wds::IpSettings, QmiError> {
        let failures = self.0.get_current_settings_failures.get();
        if failures > 0 {
            self.0.get_current_settings_failures.set(failures - 1);
            return Err(QmiError::Protocol(ProtocolError::Internal));
        }
        Ok(self.0.ip_settings.borrow().clone())
    }

    async fn get_packet_statistics(
        &self,
        _mask: wds::StatisticsMask,
    ) -> Result<wds::PacketStatistics, QmiError> {
        Ok(self.0.packet_statistics.borrow().clone())
    }
}

pub struct MockWms(pub Rc<MockModem>);
impl_service_client!(MockWms, Service::Wms);

impl wms::WmsClient for MockWms {
    async fn list_messages(
        &self,
        storage: wms::StorageType,
        tag: wms::MessageTag,
        _mode: wms::MessageMode,
    ) -> Result<Vec<wms::MessageListEntry>, QmiError> {
        self.0.list_calls.borrow_mut().push((storage, tag));
        let failures = self.0.list_failures.get();
        if failures > 0 {
            self.0.list_failures.set(failures - 1);
            return Err(QmiError::Protocol(ProtocolError::DeviceNotReady));
        }
        Ok(self
            .0
            .stored_messages
            .borrow()
            .iter()
            .filter(|m| m.storage == storage && m.tag == tag)
            .map(|m| wms::MessageListEntry {
                memory_index: m.index,
                tag: m.tag,
            })
            .collect())
    }

    async fn raw_read(
        &self,
        storage: wms::StorageType,
        memory_index: u32,
        _mode: wms::MessageMode,
    ) -> Result<wms::RawMessage, QmiError> {
        self.0.raw_read_calls.borrow_mut().push((storage, memory_index));
        self.0
            .stored_messages
            .borrow()
            .iter()
            .find(|m| m.storage == storage && m.index == memory_index)
            .map(|m| wms::RawMessage {
                tag: m.tag,
                format: wms::MessageFormat::GsmWcdmaPointToPoint,
                data: m.data.clone(),
            })
            .ok_or(QmiError::Protocol(ProtocolError::Other(50)))
    }

    async fn delete(
        &self,
        storage: wms::StorageType,
        memory_index: u32,
        _mode: wms::MessageMode,
    ) -> Result<(), QmiError> {
        self.0.delete_calls.borrow_mut().push((storage, memory_index));
        self.0
            .stored_messages
            .borrow_mut()
            .retain(|m| !(m.storage == storage && m.index == memory_index));
        Ok(())
    }

    async fn set_routes(&self, routes: &[wms::Route]) -> Result<(), QmiError> {
        self.0.routes_set.borrow_mut().extend_from_slice(routes);
        Ok(())
    }

    async fn set_event_report(&self, new_mt_message_indicator: bool) -> Result<(), QmiError> {
        self.0
            .event_report_calls
            .borrow_mut()
            .push(new_mt_message_indicator);
        Ok(())
    }
}

pub struct MockWda(pub Rc<MockModem>);
impl_service_client!(MockWda, Service::Wda);

impl wda::WdaClient for MockWda {
    async fn get_data_format(&self) -> Result<wda::LinkLayerProtocol, QmiError> {
        Ok(self.0.link_layer.get())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortCall {
    Start,
    Stop,
    Static(String),
}

#[derive(Debug, Default)]
pub struct MockPortState {
    pub calls: RefCell<Vec<PortCall>>,
    pub fail_next: Cell<bool>,
}

impl MockPortState {
    fn record(&self, call: PortCall) -> Result<(), Error> {
        self.calls.borrow_mut().push(call);
        if self.fail_next.take() {
            return Err(Error::Unknown("helper failed with code 1".to_string()));
        }
        Ok(())
    }
}

/// Mock data port recording helper invocations.
#[derive(Debug, Clone, Default)]
pub struct MockPort(pub Rc<MockPortState>);

impl PortData for MockPort {
    fn interface(&self) -> &str {
        "wwan0"
    }

    async fn setup_start(&self) -> Result<(), Error> {
        self.0.record(PortCall::Start)
    }

    async fn setup_stop(&self) -> Result<(), Error> {
        self.0.record(PortCall::Stop)
    }

    async fn setup_static(&self, config: &StaticConfig) -> Result<(), Error> {
        self.0.record(PortCall::Static(format!(
            "{:?} {:?} {:?} {:?} {:?} {:?}",
            config.address, config.subnet_mask, config.gateway, config.dns1, config.dns2, config.mtu
        )))
    }
}
