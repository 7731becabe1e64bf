//! SIM lock, unlock and SIM info handlers.

use std::time::Duration;

use log::{debug, info, warn};

use crate::error::Error;
use crate::protocol::{self, Command, PlmnInfo};
use crate::qmi::{
    self,
    dms::DmsClient,
    uim::{self, UimClient},
    ProtocolError, QmiDevice, QmiError,
};
use crate::wwan::PortData;

use super::Processor;

/// How many times the card is re-probed after a PIN verify, 500 ms apart.
const AFTER_UNLOCK_CHECKS: u32 = 20;
const AFTER_UNLOCK_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Picks the SIM/USIM application to operate on and derives the lock state.
/// Returns whether the card is unlocked.
fn evaluate_card_status(status: &uim::CardStatus) -> Result<bool, Error> {
    if status.cards.is_empty() {
        return Err(Error::NoModem("No cards reported".to_string()));
    }
    if status.cards.len() > 1 {
        debug!("multiple cards reported: {}", status.cards.len());
    }

    let mut selected: Option<&uim::Application> = None;
    let mut n_absent = 0u32;
    let mut n_error = 0u32;
    let mut n_invalid = 0u32;

    for (i, card) in status.cards.iter().enumerate() {
        match card.state {
            uim::CardState::Present => {
                let mut sim_usim_found = false;
                if card.applications.is_empty() {
                    debug!("[card {i}] no applications in card");
                    n_invalid += 1;
                    continue;
                }
                for app in &card.applications {
                    if app.application_type == uim::ApplicationType::Unknown {
                        continue;
                    }
                    if matches!(
                        app.application_type,
                        uim::ApplicationType::Sim | uim::ApplicationType::Usim
                    ) {
                        // First found wins; keep looping for the logs.
                        if selected.is_none() {
                            selected = Some(app);
                        }
                        sim_usim_found = true;
                    }
                }
                if !sim_usim_found {
                    debug!("[card {i}] no SIM/USIM application found in card");
                    n_invalid += 1;
                }
            }
            uim::CardState::Absent => {
                debug!("[card {i}] card is absent");
                n_absent += 1;
            }
            uim::CardState::Error => {
                warn!(
                    "[card {i}] card is unusable: error {}",
                    card.error_code.map(u32::from).unwrap_or(0)
                );
                n_error += 1;
            }
        }
    }

    let Some(app) = selected else {
        if n_absent > 0 && n_error == 0 && n_invalid == 0 {
            return Err(Error::InvalidState("No card found".to_string()));
        }
        return Err(Error::InvalidState(format!(
            "Card failure: {n_absent} absent, {n_error} errors, {n_invalid} invalid"
        )));
    };

    // PIN/PUK-pending application states still allow probing PIN1.
    if !matches!(
        app.state,
        uim::ApplicationState::Ready
            | uim::ApplicationState::Pin1OrUpinPinRequired
            | uim::ApplicationState::Puk1OrUpinPukRequired
            | uim::ApplicationState::Pin1Blocked
    ) {
        return Err(Error::Unknown("UIM not ready".to_string()));
    }

    match app.pin1_state {
        uim::PinState::PermanentlyBlocked => {
            Err(Error::InvalidState("UIM permanently blocked".to_string()))
        }
        uim::PinState::Blocked => Err(Error::InvalidState(format!(
            "UIM is PUK locked: {} retries left",
            app.puk1_retries
        ))),
        uim::PinState::EnabledNotVerified => {
            info!("UIM is PIN locked: {} retries left", app.pin1_retries);
            Ok(false)
        }
        uim::PinState::Disabled | uim::PinState::EnabledVerified => {
            info!("UIM is ready");
            Ok(true)
        }
        _ => Err(Error::InvalidState("Unknown UIM PIN/PUK status".to_string())),
    }
}

/// BCD-encoded (MCC, MNC) from the first three bytes of a PLMN record. A
/// non-decimal nibble terminates the value, so 2-digit MNCs padded with 0xF
/// parse as two digits.
fn read_bcd_encoded_mccmnc(data: &[u8]) -> (u32, u32) {
    fn parse_nibbles(nibbles: [u8; 3]) -> u32 {
        let mut value = 0u32;
        for nibble in nibbles {
            if nibble > 9 {
                break;
            }
            value = value * 10 + u32::from(nibble);
        }
        value
    }

    if data.len() < 3 {
        return (0, 0);
    }

    let mcc = parse_nibbles([(data[0] >> 4) & 0xf, data[0] & 0xf, (data[1] >> 4) & 0xf]);
    let mnc = parse_nibbles([data[1] & 0xf, (data[2] >> 4) & 0xf, data[2] & 0xf]);
    (mcc, mnc)
}

/// Access-technology bitflags from the two trailing bytes of a PLMN record.
fn read_act(data: &[u8]) -> (bool, bool, bool) {
    if data.len() < 2 {
        return (false, false, false);
    }
    let umts = data[0] & 0x80 != 0;
    let lte = data[0] & 0x40 != 0;
    let gsm = data[1] & 0x80 != 0;
    (gsm, umts, lte)
}

/// Parses EFoplmnwact as a sequence of 5-byte records; trailing bytes that
/// do not form a full record are ignored.
fn parse_plmns(data: &[u8]) -> Vec<PlmnInfo> {
    let mut plmns = Vec::with_capacity(data.len() / 5);
    let mut i = 0;
    while data.len() - i >= 5 {
        let (mcc, mnc) = read_bcd_encoded_mccmnc(&data[i..i + 3]);
        let (gsm, umts, lte) = read_act(&data[i + 3..i + 5]);
        plmns.push(PlmnInfo { mcc, mnc, gsm, umts, lte });
        i += 5;
    }
    plmns
}

/// MNC length fallback by MCC, for SIMs without a readable EFad.
fn mnc_length_for_mcc(mcc: u32) -> usize {
    match mcc {
        302 /* Canada */
        | 310 | 311 /* United States */
        | 338 /* Jamaica */
        | 342 /* Barbados */
        | 358 /* St Lucia */
        | 360 /* St Vincent */
        | 364 /* Bahamas */
        | 405 /* India */
        | 732 /* Colombia */ => 3,
        _ => 2,
    }
}

impl<D: QmiDevice + 'static, P: PortData + 'static> Processor<D, P> {
    /// Probes the card status and derives the lock state.
    async fn unlock_check(&self) -> Result<bool, Error> {
        let status = qmi::call(5, self.clients().uim.get_card_status()).await?;
        evaluate_card_status(&status)
    }

    /// Actions fired once the SIM is known to be usable: registration with
    /// the configured timeout, and a listing of stored SMS parts.
    fn after_unlocked(&self) {
        self.initiate_registration(true);
        self.messaging_list();
    }

    pub(super) async fn is_sim_locked(&self) -> Result<Vec<u8>, Error> {
        let unlocked = self.unlock_check().await?;
        Ok(protocol::is_sim_locked_response(!unlocked))
    }

    pub(super) async fn unlock(&self, pin: &str) -> Result<Vec<u8>, Error> {
        // Already unlocked: answer success and behave as if just unlocked.
        if self.unlock_check().await? {
            self.after_unlocked();
            return Ok(protocol::empty_response(Command::Unlock));
        }

        qmi::call(
            5,
            self.clients()
                .uim
                .verify_pin(uim::SessionType::CardSlot1, uim::PinId::Pin1, pin),
        )
        .await?;

        // The lock state change is not immediate; poll until a ready state
        // shows up.
        for _ in 0..AFTER_UNLOCK_CHECKS {
            tokio::time::sleep(AFTER_UNLOCK_CHECK_INTERVAL).await;
            if let Ok(true) = self.unlock_check().await {
                self.after_unlocked();
                return Ok(protocol::empty_response(Command::Unlock));
            }
        }

        Err(Error::Unknown(
            "PIN unlocked but too many unlock checks afterwards".to_string(),
        ))
    }

    pub(super) async fn enable_pin(&self, enable: bool, pin: &str) -> Result<Vec<u8>, Error> {
        let result = qmi::call(
            5,
            self.clients().uim.set_pin_protection(
                uim::SessionType::CardSlot1,
                uim::PinId::Pin1,
                enable,
                pin,
            ),
        )
        .await;

        match result {
            Ok(())
            // Already in the requested state.
            | Err(QmiError::Protocol(ProtocolError::NoEffect)) => {
                Ok(protocol::empty_response(Command::EnablePin))
            }
            // An internal error while touching PIN state means no SIM.
            Err(QmiError::Protocol(ProtocolError::Internal)) => Err(Error::QmiVerbose(
                QmiError::Protocol(ProtocolError::NoSim),
                "couldn't enable/disable PIN: missing SIM".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub(super) async fn change_pin(&self, pin: &str, new_pin: &str) -> Result<Vec<u8>, Error> {
        let result = qmi::call(
            5,
            self.clients().uim.change_pin(
                uim::SessionType::CardSlot1,
                uim::PinId::Pin1,
                pin,
                new_pin,
            ),
        )
        .await;

        match result {
            Ok(()) | Err(QmiError::Protocol(ProtocolError::NoEffect)) => {
                Ok(protocol::empty_response(Command::ChangePin))
            }
            Err(QmiError::Protocol(ProtocolError::Internal)) => Err(Error::QmiVerbose(
                QmiError::Protocol(ProtocolError::NoSim),
                "couldn't change PIN: missing SIM".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub(super) async fn get_sim_info(&self) -> Result<Vec<u8>, Error> {
        let mut mcc = 0u32;
        let mut mnc = 0u32;

        // IMSI errors short-circuit the MCC/MNC derivation but do not abort
        // the command.
        match qmi::call::<_, QmiError, _>(5, self.clients().dms.uim_get_imsi()).await {
            Err(e) => debug!("couldn't read IMSI: {e}"),
            Ok(imsi) => {
                // EFad byte 3 carries the MNC length; only 2 or 3 are valid.
                let mut mnc_length = 0usize;
                let (file_id, file_path) = uim::files::EF_AD;
                match qmi::call::<_, QmiError, _>(
                    10,
                    self.clients().uim.read_transparent(
                        uim::SessionType::PrimaryGwProvisioning,
                        file_id,
                        &file_path,
                    ),
                )
                .await
                {
                    Ok(data) if data.len() >= 4 && (data[3] == 2 || data[3] == 3) => {
                        mnc_length = usize::from(data[3]);
                    }
                    Ok(_) => {}
                    Err(e) => debug!("couldn't read EFad: {e}"),
                }

                if let Some(mcc_digits) = imsi.get(..3) {
                    mcc = mcc_digits.parse().unwrap_or(0);
                    if mnc_length == 0 {
                        mnc_length = mnc_length_for_mcc(mcc);
                    }
                    if let Some(mnc_digits) = imsi.get(3..3 + mnc_length) {
                        mnc = mnc_digits.parse().unwrap_or(0);
                    }
                }
            }
        }

        let mut plmns = Vec::new();
        let (file_id, file_path) = uim::files::EF_OPLMNWACT;
        match qmi::call::<_, QmiError, _>(
            10,
            self.clients().uim.read_transparent(
                uim::SessionType::PrimaryGwProvisioning,
                file_id,
                &file_path,
            ),
        )
        .await
        {
            Ok(data) => plmns = parse_plmns(&data),
            Err(e) => debug!("couldn't read EFoplmnwact: {e}"),
        }

        Ok(protocol::get_sim_info_response(mcc, mnc, &plmns))
    }

    pub(super) async fn get_sim_slot(&self) -> Result<Vec<u8>, Error> {
        // Modems without slot reporting count as slot 1.
        let slot = qmi::call::<_, QmiError, _>(10, self.clients().uim.get_slot_status())
            .await
            .unwrap_or(1);
        Ok(protocol::get_sim_slot_response(u32::from(slot)))
    }

    pub(super) async fn set_sim_slot(&self, slot: u32) -> Result<Vec<u8>, Error> {
        if slot != 1 && slot != 2 {
            return Err(Error::InvalidInput(format!("Invalid SIM slot: {slot}")));
        }

        match qmi::call::<_, QmiError, _>(10, self.clients().uim.switch_slot(slot as u8)).await {
            Ok(()) | Err(QmiError::Protocol(ProtocolError::NoEffect)) => {
                Ok(protocol::empty_response(Command::SetSimSlot))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn application(
        state: uim::ApplicationState,
        pin1_state: uim::PinState,
    ) -> uim::Application {
        uim::Application {
            application_type: uim::ApplicationType::Usim,
            state,
            pin1_state,
            pin1_retries: 3,
            puk1_retries: 10,
        }
    }

    fn present_card(app: uim::Application) -> uim::CardStatus {
        uim::CardStatus {
            cards: vec![uim::Card {
                state: uim::CardState::Present,
                error_code: None,
                applications: vec![app],
            }],
        }
    }

    #[test]
    fn no_cards_is_no_modem() {
        let status = uim::CardStatus { cards: vec![] };
        assert!(matches!(evaluate_card_status(&status), Err(Error::NoModem(_))));
    }

    #[test]
    fn absent_cards_are_invalid_state() {
        let status = uim::CardStatus {
            cards: vec![uim::Card {
                state: uim::CardState::Absent,
                error_code: None,
                applications: vec![],
            }],
        };
        let err = evaluate_card_status(&status).unwrap_err();
        assert_eq!(err, Error::InvalidState("No card found".to_string()));
    }

    #[test]
    fn errored_cards_are_invalid_state() {
        let status = uim::CardStatus {
            cards: vec![uim::Card {
                state: uim::CardState::Error,
                error_code: Some(3),
                applications: vec![],
            }],
        };
        let err = evaluate_card_status(&status).unwrap_err();
        assert!(matches!(err, Error::InvalidState(msg) if msg.starts_with("Card failure:")));
    }

    #[test]
    fn blocked_pin_states_are_invalid_state() {
        let status = present_card(application(
            uim::ApplicationState::Pin1Blocked,
            uim::PinState::PermanentlyBlocked,
        ));
        let err = evaluate_card_status(&status).unwrap_err();
        assert_eq!(err, Error::InvalidState("UIM permanently blocked".to_string()));

        let status = present_card(application(
            uim::ApplicationState::Puk1OrUpinPukRequired,
            uim::PinState::Blocked,
        ));
        let err = evaluate_card_status(&status).unwrap_err();
        assert!(matches!(err, Error::InvalidState(msg) if msg.starts_with("UIM is PUK locked")));
    }

    #[test]
    fn ready_states_report_lock_flag() {
        let status = present_card(application(
            uim::ApplicationState::Ready,
            uim::PinState::Disabled,
        ));
        assert_eq!(evaluate_card_status(&status).unwrap(), true);

        let status = present_card(application(
            uim::ApplicationState::Pin1OrUpinPinRequired,
            uim::PinState::EnabledNotVerified,
        ));
        assert_eq!(evaluate_card_status(&status).unwrap(), false);
    }

    #[test]
    fn detected_application_is_not_ready() {
        let status = present_card(application(
            uim::ApplicationState::Detected,
            uim::PinState::Unknown,
        ));
        assert!(matches!(evaluate_card_status(&status), Err(Error::Unknown(_))));
    }

    #[test]
    fn plmn_records_decode_mccmnc_and_act() {
        let data = [
            0x21, 0x40, 0x3f, 0x40, 0x00, // MCC 214, MNC 03, LTE
            0x21, 0x40, 0x3f, 0x80, 0x80, // MCC 214, MNC 03, GSM + UMTS
            0x21, 0x40, 0x3f, 0xc0, 0x80, // MCC 214, MNC 03, GSM + UMTS + LTE
            0xaa, 0xbb, // trailing bytes, ignored
        ];
        let plmns = parse_plmns(&data);
        assert_eq!(plmns.len(), 3);
        assert_eq!(
            plmns[0],
            PlmnInfo { mcc: 214, mnc: 3, gsm: false, umts: false, lte: true }
        );
        assert_eq!(
            plmns[1],
            PlmnInfo { mcc: 214, mnc: 3, gsm: true, umts: true, lte: false }
        );
        assert_eq!(
            plmns[2],
            PlmnInfo { mcc: 214, mnc: 3, gsm: true, umts: true, lte: true }
        );
    }

    #[test]
    fn bcd_mnc_with_filler_parses_two_digits() {
        let (mcc, mnc) = read_bcd_encoded_mccmnc(&[0x21, 0x43, 0x5f]);
        assert_eq!(mcc, 214);
        assert_eq!(mnc, 35);

        let (mcc, mnc) = read_bcd_encoded_mccmnc(&[0x21, 0x4f, 0x99]);
        assert_eq!(mcc, 214);
        assert_eq!(mnc, 0);
    }

    #[test]
    fn mnc_length_fallback_table() {
        assert_eq!(mnc_length_for_mcc(310), 3);
        assert_eq!(mnc_length_for_mcc(732), 3);
        assert_eq!(mnc_length_for_mcc(214), 2);
    }
}
