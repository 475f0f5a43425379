//! Report assembly
//!
//! The walker hands raw enumeration records here; the builder annotates them
//! against the registry and keeps services in discovery order.

use crate::domain::models::{
    Characteristic, Descriptor, Handle, RemoteCharacteristic, RemoteDescriptor, RemoteService,
    ScanReport, Service, WalkTermination,
};
use crate::domain::registry::{Namespace, SpecRegistry};
use tracing::debug;

pub struct ReportBuilder<'r> {
    registry: &'r SpecRegistry,
    services: Vec<Service>,
}

impl<'r> ReportBuilder<'r> {
    pub fn new(registry: &'r SpecRegistry) -> Self {
        Self {
            registry,
            services: Vec::new(),
        }
    }

    pub fn descriptor(&self, raw: &RemoteDescriptor, value: Option<Vec<u8>>) -> Descriptor {
        Descriptor {
            handle: raw.handle,
            uuid: raw.uuid,
            spec: self.registry.lookup(Namespace::Descriptor, &raw.uuid).cloned(),
            value,
        }
    }

    pub fn characteristic(
        &self,
        raw: &RemoteCharacteristic,
        value: Option<Vec<u8>>,
        descriptors: Vec<Descriptor>,
    ) -> Characteristic {
        Characteristic {
            declaration_handle: raw.declaration_handle,
            value_handle: raw.value_handle,
            uuid: raw.uuid,
            spec: self
                .registry
                .lookup(Namespace::Characteristic, &raw.uuid)
                .cloned(),
            properties: raw.properties,
            value,
            descriptors,
        }
    }

    /// Resolve the service UUID and append it after everything already pushed.
    pub fn push_service(&mut self, raw: &RemoteService, characteristics: Vec<Characteristic>) {
        if raw.start_handle > raw.end_handle {
            debug!(
                "Service {} reports inverted range {:#06x}-{:#06x}",
                raw.uuid,
                raw.start_handle,
                raw.end_handle
            );
        }

        let out_of_range = characteristics
            .iter()
            .filter(|c| !in_range(raw, c.declaration_handle))
            .count();
        if out_of_range > 0 {
            debug!(
                "{} characteristic(s) of service {} lie outside its handle range",
                out_of_range,
                raw.uuid
            );
        }

        self.services.push(Service {
            start_handle: raw.start_handle,
            end_handle: raw.end_handle,
            uuid: raw.uuid,
            spec: self.registry.lookup(Namespace::Service, &raw.uuid).cloned(),
            characteristics,
        });
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn finish(self, termination: WalkTermination) -> ScanReport {
        ScanReport {
            services: self.services,
            termination,
        }
    }
}

fn in_range(service: &RemoteService, handle: Handle) -> bool {
    (service.start_handle..=service.end_handle).contains(&handle)
}
