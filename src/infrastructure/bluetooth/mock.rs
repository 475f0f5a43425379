//! Scripted in-memory transport, peripheral and agent used by the unit tests.

use crate::domain::models::Handle;
use crate::infrastructure::bluetooth::peripheral::{
    link_channel, AddressType, AgentError, ConnectError, IoCapability, LinkMonitor, LinkNotifier,
    PairingAgent, Peripheral, RemoteCharacteristic, RemoteDescriptor, RemoteService, Transport,
    TransportError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Shared record of every collaborator call, in order.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| e.as_str() == name).count()
    }
}

pub struct MockPeripheral {
    services: Result<Vec<RemoteService>, TransportError>,
    characteristics: HashMap<Handle, Result<Vec<RemoteCharacteristic>, TransportError>>,
    descriptors: HashMap<Handle, Result<Vec<RemoteDescriptor>, TransportError>>,
    values: HashMap<Handle, Result<Vec<u8>, TransportError>>,
    /// Service start handles whose characteristic request finds the link dropped.
    drop_link_at_service: Vec<Handle>,
    /// Characteristic declarations whose descriptor request finds the link dropped.
    drop_link_at_descriptors: Vec<Handle>,
    /// Handles whose successful read is followed by an asynchronous disconnect notification.
    notify_after_read: Vec<Handle>,
    panic_on_read: Option<Handle>,
    reads: Mutex<Vec<Handle>>,
    notifier: LinkNotifier,
    monitor: LinkMonitor,
    log: CallLog,
}

impl MockPeripheral {
    pub fn new() -> Self {
        let (notifier, monitor) = link_channel();
        Self {
            services: Ok(Vec::new()),
            characteristics: HashMap::new(),
            descriptors: HashMap::new(),
            values: HashMap::new(),
            drop_link_at_service: Vec::new(),
            drop_link_at_descriptors: Vec::new(),
            notify_after_read: Vec::new(),
            panic_on_read: None,
            reads: Mutex::new(Vec::new()),
            notifier,
            monitor,
            log: CallLog::default(),
        }
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn with_service(mut self, service: RemoteService) -> Self {
        if let Ok(services) = self.services.as_mut() {
            services.push(service);
        }
        self
    }

    pub fn with_services_error(mut self, error: TransportError) -> Self {
        self.services = Err(error);
        self
    }

    pub fn with_characteristics(
        mut self,
        service_start: Handle,
        characteristics: Vec<RemoteCharacteristic>,
    ) -> Self {
        self.characteristics.insert(service_start, Ok(characteristics));
        self
    }

    pub fn with_characteristics_error(mut self, service_start: Handle, error: TransportError) -> Self {
        self.characteristics.insert(service_start, Err(error));
        self
    }

    pub fn with_descriptors(mut self, declaration: Handle, descriptors: Vec<RemoteDescriptor>) -> Self {
        self.descriptors.insert(declaration, Ok(descriptors));
        self
    }

    pub fn with_descriptors_error(mut self, declaration: Handle, error: TransportError) -> Self {
        self.descriptors.insert(declaration, Err(error));
        self
    }

    pub fn with_value(mut self, handle: Handle, value: &[u8]) -> Self {
        self.values.insert(handle, Ok(value.to_vec()));
        self
    }

    pub fn with_read_error(mut self, handle: Handle, error: TransportError) -> Self {
        self.values.insert(handle, Err(error));
        self
    }

    pub fn with_link_drop_at_service(mut self, service_start: Handle) -> Self {
        self.drop_link_at_service.push(service_start);
        self
    }

    pub fn with_link_drop_at_descriptors(mut self, declaration: Handle) -> Self {
        self.drop_link_at_descriptors.push(declaration);
        self
    }

    pub fn with_disconnect_after_read(mut self, handle: Handle) -> Self {
        self.notify_after_read.push(handle);
        self
    }

    pub fn with_panic_on_read(mut self, handle: Handle) -> Self {
        self.panic_on_read = Some(handle);
        self
    }

    pub fn reads(&self) -> Vec<Handle> {
        self.reads.lock().unwrap().clone()
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

#[async_trait]
impl Peripheral for MockPeripheral {
    async fn services(&self) -> Result<Vec<RemoteService>, TransportError> {
        self.log.push("services");
        self.services.clone()
    }

    async fn characteristics(
        &self,
        service: &RemoteService,
    ) -> Result<Vec<RemoteCharacteristic>, TransportError> {
        self.log.push(format!("characteristics {:#06x}", service.start_handle));
        if self.drop_link_at_service.contains(&service.start_handle) {
            self.notifier.notify_lost();
            return Err(TransportError::Disconnected("remote user terminated connection".into()));
        }
        self.characteristics
            .get(&service.start_handle)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn descriptors(
        &self,
        characteristic: &RemoteCharacteristic,
    ) -> Result<Vec<RemoteDescriptor>, TransportError> {
        self.log
            .push(format!("descriptors {:#06x}", characteristic.declaration_handle));
        if self.drop_link_at_descriptors.contains(&characteristic.declaration_handle) {
            self.notifier.notify_lost();
            return Err(TransportError::Disconnected("remote user terminated connection".into()));
        }
        self.descriptors
            .get(&characteristic.declaration_handle)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn read(&self, handle: Handle) -> Result<Vec<u8>, TransportError> {
        self.log.push(format!("read {:#06x}", handle));
        if self.panic_on_read == Some(handle) {
            panic!("scripted panic while reading {:#06x}", handle);
        }
        self.reads.lock().unwrap().push(handle);
        let result = self
            .values
            .get(&handle)
            .cloned()
            .unwrap_or_else(|| Err(TransportError::Att("Read Not Permitted".into())));
        if self.notify_after_read.contains(&handle) {
            self.notifier.notify_lost();
        }
        result
    }

    fn link_monitor(&self) -> LinkMonitor {
        self.monitor.clone()
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.log.push("disconnect");
        Ok(())
    }
}

pub struct MockTransport {
    peripheral: Option<Result<MockPeripheral, ConnectError>>,
    revoke_error: Option<AgentError>,
    log: CallLog,
}

impl MockTransport {
    pub fn new(peripheral: MockPeripheral) -> Self {
        let log = peripheral.log();
        Self {
            peripheral: Some(Ok(peripheral)),
            revoke_error: None,
            log,
        }
    }

    pub fn failing(error: ConnectError, log: CallLog) -> Self {
        Self {
            peripheral: Some(Err(error)),
            revoke_error: None,
            log,
        }
    }

    pub fn with_revoke_error(mut self, error: AgentError) -> Self {
        self.revoke_error = Some(error);
        self
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Peripheral = MockPeripheral;

    async fn connect(
        &mut self,
        address: &str,
        _address_type: AddressType,
    ) -> Result<MockPeripheral, ConnectError> {
        self.log.push(format!("connect {address}"));
        self.peripheral
            .take()
            .unwrap_or_else(|| Err(ConnectError::Other("already connected once".into())))
    }

    async fn revoke_trust(&mut self, _address: &str) -> Result<(), AgentError> {
        self.log.push("revoke_trust");
        match self.revoke_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AgentReply {
    Registered,
    Failed(AgentError),
    /// Keep the reply channel open without ever answering.
    Silent,
}

pub struct MockAgent {
    reply: AgentReply,
    pending: Option<oneshot::Sender<Result<(), AgentError>>>,
    log: CallLog,
}

impl MockAgent {
    pub fn new(reply: AgentReply, log: CallLog) -> Self {
        Self {
            reply,
            pending: None,
            log,
        }
    }
}

#[async_trait]
impl PairingAgent for MockAgent {
    fn register(&mut self, io_capability: IoCapability) -> oneshot::Receiver<Result<(), AgentError>> {
        self.log.push(format!("register {io_capability}"));
        let (tx, rx) = oneshot::channel();
        match self.reply.clone() {
            AgentReply::Registered => {
                let _ = tx.send(Ok(()));
            }
            AgentReply::Failed(e) => {
                let _ = tx.send(Err(e));
            }
            AgentReply::Silent => self.pending = Some(tx),
        }
        rx
    }

    async fn unregister(&mut self) -> Result<(), AgentError> {
        self.log.push("unregister");
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.log.push("shutdown");
        self.pending = None;
    }
}
