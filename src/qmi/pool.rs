//! Allocation and release of the long-lived service clients.

use std::time::Duration;

use log::debug;

use super::{call, QmiDevice, QmiError, Service, ServiceClient};

/// Budget for allocating one client id.
const ALLOCATE_TIMEOUT_SECS: u64 = 10;

/// Best-effort budget for releasing a client id on shutdown.
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(3);

/// One typed client per mandatory service, held from device-open to
/// device-close.
pub struct ClientPool<D: QmiDevice> {
    pub dms: D::Dms,
    pub nas: D::Nas,
    pub wds: D::Wds,
    pub uim: D::Uim,
    pub wms: D::Wms,
}

impl<D: QmiDevice> ClientPool<D> {
    /// Allocates every mandatory client, in a fixed order. Failure of any
    /// allocation aborts the pool.
    pub async fn allocate(device: &D) -> Result<Self, QmiError> {
        debug!("allocating QMI client for service '{}'", Service::Dms);
        let dms = call(ALLOCATE_TIMEOUT_SECS, device.allocate_dms()).await?;
        debug!("allocating QMI client for service '{}'", Service::Nas);
        let nas = call(ALLOCATE_TIMEOUT_SECS, device.allocate_nas()).await?;
        debug!("allocating QMI client for service '{}'", Service::Wds);
        let wds = call(ALLOCATE_TIMEOUT_SECS, device.allocate_wds()).await?;
        debug!("allocating QMI client for service '{}'", Service::Uim);
        let uim = call(ALLOCATE_TIMEOUT_SECS, device.allocate_uim()).await?;
        debug!("allocating QMI client for service '{}'", Service::Wms);
        let wms = call(ALLOCATE_TIMEOUT_SECS, device.allocate_wms()).await?;
        debug!("all QMI clients created");
        Ok(Self { dms, nas, wds, uim, wms })
    }

    /// Releases every client with a per-client best-effort timeout.
    pub async fn release(&self) {
        release_client(&self.dms).await;
        release_client(&self.nas).await;
        release_client(&self.wds).await;
        release_client(&self.uim).await;
        release_client(&self.wms).await;
    }
}

/// Releases one client, logging instead of propagating failures.
pub async fn release_client<C: ServiceClient>(client: &C) {
    let service = client.service();
    match tokio::time::timeout(RELEASE_TIMEOUT, client.release()).await {
        Ok(Ok(())) => debug!("released QMI client for service '{service}'"),
        Ok(Err(e)) => debug!("couldn't release QMI client for service '{service}': {e}"),
        Err(_) => debug!("timed out releasing QMI client for service '{service}'"),
    }
}
