//! Attribute Walker
//!
//! Walks services -> characteristics -> descriptors strictly in the order the
//! device returns them, one request at a time.
//!
//! Failure handling per node:
//!
//! - service discovery fails: the walk is aborted, there is nothing to report
//! - characteristic discovery fails: that service gets zero characteristics
//! - descriptor discovery fails: that characteristic gets zero descriptors
//! - a read fails: that value stays absent
//! - the link drops: the walk stops and returns the services completed so far

use crate::domain::models::{Characteristic, Descriptor, ScanReport, WalkTermination};
use crate::domain::registry::SpecRegistry;
use crate::domain::report::ReportBuilder;
use crate::infrastructure::bluetooth::peripheral::{
    with_timeout, LinkMonitor, Peripheral, RemoteCharacteristic, RemoteService, TransportError,
};
use crate::infrastructure::bluetooth::reader::{LinkLost, ValueReader};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Descriptor discovery costs time and makes fragile devices drop the link.
    pub include_descriptors: bool,
    pub request_timeout: Duration,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            include_descriptors: false,
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum WalkError {
    #[error("service discovery failed: {0}")]
    ServiceDiscovery(#[source] TransportError),
}

pub struct AttributeWalker<'r> {
    registry: &'r SpecRegistry,
    reader: ValueReader,
    options: WalkOptions,
}

impl<'r> AttributeWalker<'r> {
    pub fn new(registry: &'r SpecRegistry, options: WalkOptions) -> Self {
        Self {
            registry,
            reader: ValueReader::new(options.request_timeout),
            options,
        }
    }

    /// Enumerate the whole attribute table of `peripheral`.
    pub async fn walk<P>(&self, peripheral: &P) -> Result<ScanReport, WalkError>
    where
        P: Peripheral + ?Sized,
    {
        let link = peripheral.link_monitor();
        let mut report = ReportBuilder::new(self.registry);

        let services = match with_timeout(self.options.request_timeout, peripheral.services()).await
        {
            Ok(services) => services,
            Err(e) => {
                error!("Failed to discover services: {}", e);
                return Err(WalkError::ServiceDiscovery(e));
            }
        };
        info!("Number of services: {}", services.len());

        for service in &services {
            match self.walk_service(peripheral, &link, &report, service).await {
                Ok(characteristics) => report.push_service(service, characteristics),
                Err(LinkLost) => {
                    warn!(
                        "Device disconnected while walking service {:#06x}; returning {} of {} services",
                        service.start_handle,
                        report.service_count(),
                        services.len()
                    );
                    return Ok(report.finish(WalkTermination::Disconnected));
                }
            }
        }

        Ok(report.finish(WalkTermination::Completed))
    }

    async fn walk_service<P>(
        &self,
        peripheral: &P,
        link: &LinkMonitor,
        report: &ReportBuilder<'_>,
        service: &RemoteService,
    ) -> Result<Vec<Characteristic>, LinkLost>
    where
        P: Peripheral + ?Sized,
    {
        debug!(
            "Service {} ({:#06x} - {:#06x})",
            service.uuid, service.start_handle, service.end_handle
        );
        checkpoint(link)?;

        let raw_characteristics = match with_timeout(
            self.options.request_timeout,
            peripheral.characteristics(service),
        )
        .await
        {
            Ok(list) => list,
            Err(e) if e.is_link_loss() => return Err(LinkLost),
            Err(e) => {
                warn!(
                    "Failed to discover characteristics of service {:#06x}: {}",
                    service.start_handle, e
                );
                Vec::new()
            }
        };

        let mut characteristics = Vec::with_capacity(raw_characteristics.len());
        for raw in &raw_characteristics {
            characteristics.push(self.walk_characteristic(peripheral, link, report, raw).await?);
        }
        Ok(characteristics)
    }

    async fn walk_characteristic<P>(
        &self,
        peripheral: &P,
        link: &LinkMonitor,
        report: &ReportBuilder<'_>,
        raw: &RemoteCharacteristic,
    ) -> Result<Characteristic, LinkLost>
    where
        P: Peripheral + ?Sized,
    {
        checkpoint(link)?;

        let raw_descriptors = if self.options.include_descriptors {
            match with_timeout(self.options.request_timeout, peripheral.descriptors(raw)).await {
                Ok(list) => list,
                Err(e) if e.is_link_loss() => return Err(LinkLost),
                Err(e) => {
                    warn!(
                        "Failed to discover descriptors of characteristic {:#06x}: {}",
                        raw.declaration_handle, e
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        checkpoint(link)?;
        let value = self.reader.read_characteristic(peripheral, raw).await?;

        let mut descriptors: Vec<Descriptor> = Vec::with_capacity(raw_descriptors.len());
        for descriptor in &raw_descriptors {
            checkpoint(link)?;
            let value = self.reader.read_descriptor(peripheral, descriptor).await?;
            descriptors.push(report.descriptor(descriptor, value));
        }

        Ok(report.characteristic(raw, value, descriptors))
    }
}

/// Safe point between requests: stop issuing requests once the peer is gone.
fn checkpoint(link: &LinkMonitor) -> Result<(), LinkLost> {
    if link.is_lost() {
        Err(LinkLost)
    } else {
        Ok(())
    }
}
