//! SMS listing, reading, assembly driving and delivery.

use std::time::Duration;

use log::{debug, info, warn};

use crate::error::Error;
use crate::qmi::{
    self,
    wms::{self, WmsClient},
    QmiDevice, QmiError,
};
use crate::sms::{part::INVALID_INDEX, pdu, PduType, SmsPart};
use crate::wwan::PortData;

use super::Processor;

const LIST_MAX_RETRIES: u32 = 3;
const LIST_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ListingStatus {
    #[default]
    None,
    Ongoing,
    Done,
    Aborted,
}

#[derive(Debug, Default)]
struct ListingContext {
    status: ListingStatus,
    retries: u32,
}

/// Per-storage listing state.
#[derive(Debug, Default)]
pub(crate) struct MessagingLists {
    uim: ListingContext,
    nv: ListingContext,
}

impl MessagingLists {
    fn context_mut(&mut self, storage: wms::StorageType) -> &mut ListingContext {
        match storage {
            wms::StorageType::Uim => &mut self.uim,
            wms::StorageType::Nv => &mut self.nv,
        }
    }
}

impl<D: QmiDevice + 'static, P: PortData + 'static> Processor<D, P> {
    /// Configures default routes (class 0/1 point-to-point stored on
    /// modem-NV with store-and-notify) and enables new-message indications.
    pub(super) async fn messaging_init(&self) -> Result<(), Error> {
        debug!("[messaging] setting default routes...");
        let routes = [
            wms::Route {
                message_type: wms::MessageType::PointToPoint,
                message_class: wms::MessageClass::Class0,
                storage: wms::StorageType::Nv,
                receipt_action: wms::ReceiptAction::StoreAndNotify,
            },
            wms::Route {
                message_type: wms::MessageType::PointToPoint,
                message_class: wms::MessageClass::Class1,
                storage: wms::StorageType::Nv,
                receipt_action: wms::ReceiptAction::StoreAndNotify,
            },
        ];
        qmi::call::<_, QmiError, _>(5, self.clients().wms.set_routes(&routes)).await?;

        qmi::call::<_, QmiError, _>(5, self.clients().wms.set_event_report(true)).await?;
        Ok(())
    }

    /// Requests a listing of every part in both storages. Ongoing listings
    /// just get their retry budget refreshed; aborted ones are relaunched.
    pub(crate) fn messaging_list(&self) {
        for storage in [wms::StorageType::Uim, wms::StorageType::Nv] {
            debug!("[messaging] request to list parts in storage '{storage}'");
            let launch = {
                let mut listing = self.listing.borrow_mut();
                let context = listing.context_mut(storage);
                match context.status {
                    ListingStatus::None => {
                        context.status = ListingStatus::Ongoing;
                        true
                    }
                    ListingStatus::Ongoing => {
                        context.retries = 0;
                        false
                    }
                    ListingStatus::Done => false,
                    ListingStatus::Aborted => {
                        context.retries = 0;
                        context.status = ListingStatus::Ongoing;
                        true
                    }
                }
            };

            if launch {
                let Some(this) = self.rc() else { return };
                tokio::task::spawn_local(async move {
                    this.messaging_list_parts(storage).await;
                });
            }
        }
    }

    /// Lists Read then NotRead parts of one storage, reading each returned
    /// index. A storage is done as soon as either tag listing succeeded;
    /// when both fail the whole listing is retried a bounded number of
    /// times.
    async fn messaging_list_parts(&self, storage: wms::StorageType) {
        loop {
            debug!("[messaging] listing parts in storage '{storage}'...");

            let mut any_tag_succeeded = false;
            for tag in [wms::MessageTag::MtRead, wms::MessageTag::MtNotRead] {
                match qmi::call::<_, QmiError, _>(
                    5,
                    self.clients()
                        .wms
                        .list_messages(storage, tag, wms::MessageMode::GsmWcdma),
                )
                .await
                {
                    Err(e) => {
                        debug!(
                            "[messaging] couldn't list messages in storage '{storage}' ({tag}): {e}"
                        );
                    }
                    Ok(entries) => {
                        any_tag_succeeded = true;
                        for entry in entries {
                            self.read_sms_part(storage, entry.memory_index).await;
                        }
                    }
                }
            }

            // Some modems fail the read listing but return an empty not-read
            // list; either one succeeding is enough to call the storage done.
            if any_tag_succeeded {
                debug!("[messaging] listing parts in storage '{storage}' finished");
                self.listing.borrow_mut().context_mut(storage).status = ListingStatus::Done;
                return;
            }

            let aborted = {
                let mut listing = self.listing.borrow_mut();
                let context = listing.context_mut(storage);
                context.retries += 1;
                if context.retries == LIST_MAX_RETRIES {
                    context.status = ListingStatus::Aborted;
                    true
                } else {
                    false
                }
            };
            if aborted {
                debug!("[messaging] listing parts in storage '{storage}' aborted (too many retries)");
                return;
            }

            debug!("[messaging] re-scheduling listing parts in storage '{storage}'...");
            tokio::time::sleep(LIST_RETRY_DELAY).await;
        }
    }

    async fn read_sms_part(&self, storage: wms::StorageType, memory_index: u32) {
        match qmi::call::<_, QmiError, _>(
            3,
            self.clients()
                .wms
                .raw_read(storage, memory_index, wms::MessageMode::GsmWcdma),
        )
        .await
        {
            Ok(raw) => self.process_read_sms_part(storage, memory_index, raw),
            Err(e) => warn!("[messaging] error reading raw message: {e}"),
        }
    }

    /// One raw-read result: decode, assemble, and deliver completed
    /// messages.
    pub(crate) fn process_read_sms_part(
        &self,
        storage: wms::StorageType,
        memory_index: u32,
        raw: wms::RawMessage,
    ) {
        if !matches!(
            raw.format,
            wms::MessageFormat::GsmWcdmaPointToPoint | wms::MessageFormat::GsmWcdmaBroadcast
        ) {
            debug!("[messaging] ignoring SMS part ({:?})", raw.format);
            return;
        }

        debug!("[messaging] received 3GPP SMS part ({storage},{memory_index})");
        let part = match pdu::decode(memory_index, &raw.data) {
            Ok(part) => part,
            Err(e) => {
                // Keep an empty-bodied part so the stored PDU still gets
                // deleted once its message completes.
                warn!("[messaging] error creating SMS part from PDU: {e}");
                let mut part = SmsPart::new(memory_index, PduType::Unknown);
                part.text = Some(String::new());
                part
            }
        };

        let completed = match self.sms_list.borrow_mut().take_part(part, storage) {
            Ok(completed) => completed,
            Err(e) => {
                warn!("[messaging] error processing PDU: {e}");
                return;
            }
        };

        if let Some(handle) = completed {
            self.sms_delivered(handle);
        }
    }

    /// A message completed: mirror it to syslog and delete every constituent
    /// part from the modem.
    fn sms_delivered(&self, handle: usize) {
        let (storage, indices, text, number, timestamp) = {
            let list = self.sms_list.borrow();
            let Some(sms) = list.get(handle) else {
                return;
            };
            let assembled = sms.assembled();
            (
                sms.storage(),
                sms.parts().iter().map(|p| p.index).collect::<Vec<_>>(),
                assembled.map(|a| a.text.clone()).unwrap_or_default(),
                assembled.and_then(|a| a.number.clone()).unwrap_or_default(),
                assembled.and_then(|a| a.timestamp.clone()).unwrap_or_default(),
            )
        };

        info!(target: "sms", "SMS [Timestamp: {timestamp}] [From: {number}] {text}");

        let no_delete = self.no_delete_sms();
        for index in indices {
            if index == INVALID_INDEX {
                continue;
            }
            debug!(
                "[messaging] {}removing SMS part ({storage}/{index})",
                if no_delete { "(fake) " } else { "" }
            );
            if no_delete {
                continue;
            }

            let Some(this) = self.rc() else { return };
            tokio::task::spawn_local(async move {
                if let Err(e) = qmi::call::<_, QmiError, _>(
                    5,
                    this.clients()
                        .wms
                        .delete(storage, index, wms::MessageMode::GsmWcdma),
                )
                .await
                {
                    debug!("[messaging] couldn't delete SMS part ({storage}/{index}): {e}");
                }
            });
        }
    }

    /// Incoming new-message indication: read the referenced part.
    pub(crate) async fn handle_new_message(
        &self,
        storage: wms::StorageType,
        memory_index: u32,
        mode: wms::MessageMode,
    ) {
        match qmi::call::<_, QmiError, _>(
            3,
            self.clients().wms.raw_read(storage, memory_index, mode),
        )
        .await
        {
            Ok(raw) => self.process_read_sms_part(storage, memory_index, raw),
            Err(e) => warn!("[messaging] error reading raw message: {e}"),
        }
    }
}
