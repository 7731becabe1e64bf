//! Registration supervisor and registration-status handlers.

use std::time::Duration;

use log::debug;
use tokio::sync::oneshot;

use crate::error::Error;
use crate::protocol::{self, Command};
use crate::qmi::{self, nas, nas::NasClient, QmiDevice, QmiError};
use crate::registration::MIN_REGISTRATION_TIMEOUT_SECS;
use crate::wwan::PortData;

use super::Processor;

impl<D: QmiDevice + 'static, P: PortData + 'static> Processor<D, P> {
    /// Kicks automatic registration. With a timeout, the supervisor is
    /// re-armed: it ticks until the modem registers or the timeout expires,
    /// at which point one explicit scan is issued and registration retried
    /// without a timeout (avoiding scan loops).
    pub(crate) fn initiate_registration(&self, with_timeout: bool) {
        // Don't relaunch if already registered.
        if self.registration.borrow().status.is_registered() {
            return;
        }

        if with_timeout {
            let timeout_secs = self.registration.borrow().timeout_secs;
            debug!(
                "launching automatic network registration... (with {timeout_secs} seconds timeout)"
            );
            let generation = {
                let mut controller = self.controller.borrow_mut();
                controller.cancel(&mut self.registration.borrow_mut());
                controller.start(timeout_secs)
            };
            self.spawn_registration_timer(generation);
        } else {
            debug!("launching automatic network registration...");
        }

        // Fire-and-forget; progress arrives via serving-system indications.
        let Some(this) = self.rc() else { return };
        tokio::task::spawn_local(async move {
            if let Err(e) = qmi::call::<_, QmiError, _>(
                10,
                this.clients()
                    .nas
                    .initiate_network_register(nas::RegisterAction::Automatic),
            )
            .await
            {
                debug!("couldn't initiate network registration: {e}");
            }
        });
    }

    fn spawn_registration_timer(&self, generation: u64) {
        let Some(this) = self.rc() else { return };
        tokio::task::spawn_local(async move {
            loop {
                let tick = {
                    let mut controller = this.controller.borrow_mut();
                    if !controller.is_current(generation) {
                        return;
                    }
                    controller.next_tick()
                };

                match tick {
                    Some(secs) => {
                        tokio::time::sleep(Duration::from_secs(u64::from(secs))).await;
                        debug!(
                            "automatic network registration ongoing... ({} seconds elapsed)",
                            this.controller.borrow().ongoing_secs()
                        );
                    }
                    None => {
                        this.run_network_scan(generation).await;
                        return;
                    }
                }
            }
        });
    }

    /// Timeout expired: shadow the state as Scanning and run one explicit
    /// scan with its own cancellable. A cancelled scan's reply is discarded.
    async fn run_network_scan(&self, generation: u64) {
        debug!("automatic network registration timed out... launching network scan");

        let (cancel_tx, cancel_rx) = oneshot::channel();
        {
            let mut controller = self.controller.borrow_mut();
            if !controller.is_current(generation) {
                return;
            }
            self.registration.borrow_mut().status =
                crate::registration::RegistrationStatus::Scanning;
            controller.scan_started(cancel_tx);
        }

        let cancelled = tokio::select! {
            _ = cancel_rx => true,
            result = qmi::call::<_, QmiError, _>(120, self.clients().nas.network_scan()) => {
                if let Err(e) = result {
                    debug!("network scan failed: {e}");
                }
                false
            }
        };
        if cancelled {
            return;
        }

        {
            let mut controller = self.controller.borrow_mut();
            if !controller.is_current(generation) {
                return;
            }
            controller.finish(&mut self.registration.borrow_mut());
        }

        // Relaunch automatic registration, this time without a timeout.
        self.initiate_registration(false);
    }

    /// Folds a serving-system report (solicited or unsolicited) into the
    /// cached state; entering Home/Roaming disarms the supervisor.
    pub(crate) fn process_serving_system(&self, report: &nas::ServingSystem) {
        let entered_registered = self.registration.borrow_mut().apply_serving_system(report);
        if entered_registered {
            let mut registration = self.registration.borrow_mut();
            self.controller.borrow_mut().cancel(&mut registration);
        }
    }

    /// Subscribes to serving-system indications and seeds the cached state
    /// with one explicit query. Both steps are best-effort.
    pub(super) async fn register_nas_indications(&self) {
        if let Err(e) =
            qmi::call::<_, QmiError, _>(5, self.clients().nas.register_indications(true)).await
        {
            debug!("couldn't register NAS indications: {e}");
        }

        match qmi::call::<_, QmiError, _>(10, self.clients().nas.get_serving_system()).await {
            Ok(report) => self.process_serving_system(&report),
            Err(e) => debug!("couldn't get serving system: {e}"),
        }
    }

    pub(super) fn get_registration_status(&self) -> Result<Vec<u8>, Error> {
        let info = self.registration.borrow().info();
        Ok(protocol::get_registration_status_response(&info))
    }

    pub(super) fn get_registration_timeout(&self) -> Result<Vec<u8>, Error> {
        let timeout_secs = self.registration.borrow().timeout_secs;
        Ok(protocol::get_registration_timeout_response(timeout_secs))
    }

    pub(super) fn set_registration_timeout(&self, timeout_secs: u32) -> Result<Vec<u8>, Error> {
        if timeout_secs < MIN_REGISTRATION_TIMEOUT_SECS {
            return Err(Error::Unknown("Timeout is too short".to_string()));
        }
        self.registration.borrow_mut().timeout_secs = timeout_secs;
        Ok(protocol::empty_response(Command::SetRegistrationTimeout))
    }

    pub(super) fn get_connection_status(&self) -> Result<Vec<u8>, Error> {
        let status = self.connection.borrow().status;
        Ok(protocol::get_connection_status_response(status))
    }
}
