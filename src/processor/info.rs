//! Identity, power and signal handlers.


use log::debug;

use crate::error::Error;
use crate::protocol::{self, Command, PowerStatus, RadioPowerInfo, RadioSignalInfo};
use crate::qmi::{self, dms::DmsClient, dms::OperatingMode, nas, nas::NasClient, QmiDevice};
use crate::wwan::PortData;

use super::Processor;

/// Linear map from an RSSI clamped to [-113, -51] dBm into percent.
fn strength_to_quality(rssi: i8) -> u32 {
    let clamped = i32::from(rssi).clamp(-113, -51);
    (100 - ((clamped + 51) * 100 / (-113 + 51))) as u32
}

impl<D: QmiDevice + 'static, P: PortData + 'static> Processor<D, P> {
    pub(super) async fn get_manufacturer(&self) -> Result<Vec<u8>, Error> {
        let manufacturer = qmi::call(5, self.clients().dms.get_manufacturer()).await?;
        Ok(protocol::string_response(Command::GetManufacturer, &manufacturer))
    }

    pub(super) async fn get_model(&self) -> Result<Vec<u8>, Error> {
        let model = qmi::call(5, self.clients().dms.get_model()).await?;
        Ok(protocol::string_response(Command::GetModel, &model))
    }

    pub(super) async fn get_software_revision(&self) -> Result<Vec<u8>, Error> {
        let revision = qmi::call(5, self.clients().dms.get_revision()).await?;
        Ok(protocol::string_response(Command::GetSoftwareRevision, &revision))
    }

    pub(super) async fn get_hardware_revision(&self) -> Result<Vec<u8>, Error> {
        let revision = qmi::call(5, self.clients().dms.get_hardware_revision()).await?;
        Ok(protocol::string_response(Command::GetHardwareRevision, &revision))
    }

    pub(super) async fn get_imei(&self) -> Result<Vec<u8>, Error> {
        let ids = qmi::call(5, self.clients().dms.get_ids()).await?;
        let imei = ids
            .imei
            .ok_or_else(|| Error::Unknown("couldn't get IMEI".to_string()))?;
        Ok(protocol::string_response(Command::GetImei, &imei))
    }

    pub(super) async fn get_imsi(&self) -> Result<Vec<u8>, Error> {
        let imsi = qmi::call(5, self.clients().dms.uim_get_imsi()).await?;
        Ok(protocol::string_response(Command::GetImsi, &imsi))
    }

    pub(super) async fn get_iccid(&self) -> Result<Vec<u8>, Error> {
        let iccid = qmi::call(5, self.clients().dms.uim_get_iccid()).await?;
        Ok(protocol::string_response(Command::GetIccid, &iccid))
    }

    pub(super) async fn get_power_status(&self) -> Result<Vec<u8>, Error> {
        let mode = qmi::call(5, self.clients().dms.get_operating_mode()).await?;
        let power_status = match mode {
            OperatingMode::Online => PowerStatus::Full,
            OperatingMode::LowPower
            | OperatingMode::PersistentLowPower
            | OperatingMode::ModeOnlyLowPower
            | OperatingMode::Offline => PowerStatus::Low,
            other => {
                return Err(Error::Unknown(format!("Unhandled power state: '{other:?}'")));
            }
        };
        Ok(protocol::get_power_status_response(power_status))
    }

    pub(super) async fn set_power_status(&self, power_status: u32) -> Result<Vec<u8>, Error> {
        let mode = match power_status {
            0 => OperatingMode::Online,
            1 => OperatingMode::LowPower,
            other => {
                return Err(Error::Unknown(format!("Unhandled power state: '{other}'")));
            }
        };

        qmi::call(20, self.clients().dms.set_operating_mode(mode)).await?;

        // Back online; get the modem attached again.
        if mode == OperatingMode::Online {
            self.initiate_registration(true);
        }

        Ok(protocol::empty_response(Command::SetPowerStatus))
    }

    pub(super) async fn power_cycle(&self) -> Result<Vec<u8>, Error> {
        qmi::call(20, self.clients().dms.set_operating_mode(OperatingMode::Offline)).await?;
        qmi::call(20, self.clients().dms.set_operating_mode(OperatingMode::Reset)).await?;
        Ok(protocol::empty_response(Command::PowerCycle))
    }

    pub(super) async fn get_power_info(&self) -> Result<Vec<u8>, Error> {
        let mut reports = [RadioPowerInfo::default(); 3];

        for (i, radio_interface) in [
            nas::RadioInterface::Gsm,
            nas::RadioInterface::Umts,
            nas::RadioInterface::Lte,
        ]
        .into_iter()
        .enumerate()
        {
            // Interfaces the modem cannot report stay all-zero.
            let info = match qmi::call(10, self.clients().nas.get_tx_rx_info(radio_interface)).await
            {
                Ok(info) => info,
                Err(e) => {
                    debug!("couldn't get tx/rx info for {radio_interface:?}: {e}");
                    continue;
                }
            };

            let report = &mut reports[i];
            if let Some(rx0) = info.rx_chain_0 {
                report.rx0_radio_tuned = rx0.radio_tuned;
                if rx0.radio_tuned {
                    report.rx0_power = rx0.power;
                }
            }
            if let Some(rx1) = info.rx_chain_1 {
                report.rx1_radio_tuned = rx1.radio_tuned;
                if rx1.radio_tuned {
                    report.rx1_power = rx1.power;
                }
            }
            if let Some(tx) = info.tx {
                report.in_traffic = tx.in_traffic;
                if tx.in_traffic {
                    report.tx_power = tx.power;
                }
            }
        }

        Ok(protocol::get_power_info_response(&reports[0], &reports[1], &reports[2]))
    }

    pub(super) async fn get_signal_info(&self) -> Result<Vec<u8>, Error> {
        let info = qmi::call(10, self.clients().nas.get_signal_info()).await?;

        let to_report = |rssi: Option<i8>| match rssi {
            Some(rssi) => RadioSignalInfo {
                available: true,
                rssi: i32::from(rssi),
                quality: strength_to_quality(rssi),
            },
            None => RadioSignalInfo {
                available: false,
                rssi: -125,
                quality: 0,
            },
        };

        Ok(protocol::get_signal_info_response(
            &to_report(info.gsm_rssi),
            &to_report(info.wcdma_rssi),
            &to_report(info.lte_rssi),
        ))
    }
}
