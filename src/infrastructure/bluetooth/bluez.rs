//! BlueZ binding
//!
//! Implements [`Transport`], [`Peripheral`] and [`PairingAgent`] on top of the
//! BlueZ D-Bus API. BlueZ names its GATT objects after attribute handles
//! (`service0010/char0011/desc0013`), which is where handles come from here.

use crate::domain::models::{CharacteristicProperties, Handle};
use crate::infrastructure::bluetooth::peripheral::{
    link_channel, AddressType, AgentError, ConnectError, IoCapability, LinkMonitor, PairingAgent,
    Peripheral, RemoteCharacteristic, RemoteDescriptor, RemoteService, Transport, TransportError,
};
use async_trait::async_trait;
use bluer::agent::{
    Agent, AgentHandle, DisplayPasskey, ReqError, ReqResult, RequestConfirmation, RequestPasskey,
};
use bluer::gatt::remote::{Characteristic, Descriptor, Service};
use bluer::{Adapter, Address, Device, DeviceEvent, DeviceProperty, ErrorKind, Session};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SERVICES_RESOLVED_POLL: Duration = Duration::from_millis(100);

fn parse_address(address: &str) -> Result<Address, String> {
    address
        .parse::<Address>()
        .map_err(|e| format!("invalid Bluetooth address '{address}': {e}"))
}

/// Host adapter plus the D-Bus session it lives on.
pub struct BluezTransport {
    session: Session,
    adapter: Adapter,
}

impl BluezTransport {
    pub async fn new(adapter_name: &str) -> bluer::Result<Self> {
        let session = Session::new().await?;
        let adapter = session.adapter(adapter_name)?;
        if !adapter.is_powered().await? {
            info!("Powering on adapter {}", adapter_name);
            adapter.set_powered(true).await?;
        }
        Ok(Self { session, adapter })
    }

    pub fn session(&self) -> Session {
        self.session.clone()
    }

    async fn connect_device(&self, address: Address, address_type: AddressType) -> bluer::Result<Device> {
        let device = self.adapter.device(address)?;
        if device.is_connected().await.unwrap_or(false) {
            debug!("{} already connected", address);
            return Ok(device);
        }

        match device.connect().await {
            Ok(()) => Ok(device),
            Err(e) if matches!(e.kind, ErrorKind::NotFound | ErrorKind::DoesNotExist) => {
                // Not yet known to bluetoothd (never discovered): connect by address.
                let kind = match address_type {
                    AddressType::Public => bluer::AddressType::LePublic,
                    AddressType::Random => bluer::AddressType::LeRandom,
                };
                self.adapter.connect_device(address, kind).await
            }
            Err(e) => Err(e),
        }
    }
}

fn connect_error(e: bluer::Error) -> ConnectError {
    match e.kind {
        ErrorKind::ConnectionAttemptFailed | ErrorKind::Failed | ErrorKind::NotAvailable => {
            ConnectError::Disconnected(e.to_string())
        }
        _ => ConnectError::Other(e.to_string()),
    }
}

#[async_trait]
impl Transport for BluezTransport {
    type Peripheral = BluezPeripheral;

    async fn connect(
        &mut self,
        address: &str,
        address_type: AddressType,
    ) -> Result<BluezPeripheral, ConnectError> {
        let address = parse_address(address).map_err(ConnectError::Other)?;
        let device = self.connect_device(address, address_type).await.map_err(connect_error)?;

        // Events must be subscribed before services resolve, or a fast drop goes unnoticed.
        let events = device.events().await.map_err(connect_error)?;
        let (notifier, monitor) = link_channel();
        let event_task = tokio::spawn(async move {
            let mut events = Box::pin(events);
            while let Some(event) = events.next().await {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                    if notifier.notify_lost() {
                        warn!("Device {} disconnected", address);
                    }
                    break;
                }
            }
        });

        while !device.is_services_resolved().await.map_err(connect_error)? {
            if monitor.is_lost() {
                event_task.abort();
                return Err(ConnectError::Disconnected(
                    "device disconnected before services were resolved".to_string(),
                ));
            }
            tokio::time::sleep(SERVICES_RESOLVED_POLL).await;
        }
        info!("Connected to {}", address);

        Ok(BluezPeripheral {
            device,
            monitor,
            event_task: Some(event_task),
            services: Mutex::new(HashMap::new()),
            characteristics: Mutex::new(HashMap::new()),
            attributes: Mutex::new(HashMap::new()),
        })
    }

    async fn revoke_trust(&mut self, address: &str) -> Result<(), AgentError> {
        let address = parse_address(address).map_err(AgentError::Other)?;
        let device = self
            .adapter
            .device(address)
            .map_err(|e| AgentError::Other(e.to_string()))?;
        device
            .set_trusted(false)
            .await
            .map_err(|e| AgentError::Other(e.to_string()))
    }
}

/// Readable attribute, keyed by its handle.
#[derive(Clone)]
enum Attribute {
    Value(Characteristic),
    Descriptor(Descriptor),
}

pub struct BluezPeripheral {
    device: Device,
    monitor: LinkMonitor,
    event_task: Option<JoinHandle<()>>,
    services: Mutex<HashMap<Handle, Service>>,
    characteristics: Mutex<HashMap<Handle, Characteristic>>,
    attributes: Mutex<HashMap<Handle, Attribute>>,
}

impl BluezPeripheral {
    fn transport_error(&self, e: bluer::Error) -> TransportError {
        // bluetoothd removes the GATT objects of a device as soon as it drops.
        if self.monitor.is_lost() || matches!(e.kind, ErrorKind::NotFound | ErrorKind::DoesNotExist)
        {
            return TransportError::Disconnected(e.to_string());
        }
        match e.kind {
            ErrorKind::NotPermitted
            | ErrorKind::NotAuthorized
            | ErrorKind::NotSupported
            | ErrorKind::InvalidOffset
            | ErrorKind::InvalidLength => TransportError::Att(e.to_string()),
            _ => TransportError::Other(e.to_string()),
        }
    }

    fn remember<T: Clone>(map: &Mutex<HashMap<Handle, T>>, handle: Handle, value: &T) {
        if let Ok(mut map) = map.lock() {
            map.insert(handle, value.clone());
        }
    }

    fn recall<T: Clone>(map: &Mutex<HashMap<Handle, T>>, handle: Handle) -> Result<T, TransportError> {
        map.lock()
            .ok()
            .and_then(|map| map.get(&handle).cloned())
            .ok_or_else(|| TransportError::Other(format!("no attribute known at handle {handle:#06x}")))
    }
}

fn properties(flags: &bluer::gatt::CharacteristicFlags) -> CharacteristicProperties {
    let mut props = CharacteristicProperties::empty();
    for (set, flag) in [
        (flags.broadcast, CharacteristicProperties::BROADCAST),
        (flags.read, CharacteristicProperties::READ),
        (flags.write_without_response, CharacteristicProperties::WRITE_WITHOUT_RESPONSE),
        (flags.write, CharacteristicProperties::WRITE),
        (flags.notify, CharacteristicProperties::NOTIFY),
        (flags.indicate, CharacteristicProperties::INDICATE),
        (flags.authenticated_signed_writes, CharacteristicProperties::AUTHENTICATED_SIGNED_WRITES),
        (flags.extended_properties, CharacteristicProperties::EXTENDED_PROPERTIES),
    ] {
        if set {
            props.insert(flag);
        }
    }
    props
}

#[async_trait]
impl Peripheral for BluezPeripheral {
    async fn services(&self) -> Result<Vec<RemoteService>, TransportError> {
        let services = self.device.services().await.map_err(|e| self.transport_error(e))?;

        let mut primary = Vec::with_capacity(services.len());
        for service in services {
            if !service.primary().await.map_err(|e| self.transport_error(e))? {
                continue;
            }
            let uuid = service.uuid().await.map_err(|e| self.transport_error(e))?;
            Self::remember(&self.services, service.id(), &service);
            primary.push((service.id(), uuid));
        }

        // D-Bus object order is arbitrary. Sorting here restores ATT discovery
        // order for the walker, which itself never reorders.
        primary.sort_by_key(|(start, _)| *start);

        // BlueZ exposes only the start handle; a range ends where the next one begins.
        let starts: Vec<Handle> = primary.iter().map(|(start, _)| *start).collect();
        Ok(primary
            .into_iter()
            .enumerate()
            .map(|(idx, (start, uuid))| RemoteService {
                start_handle: start,
                end_handle: starts
                    .get(idx + 1)
                    .map(|next| next.saturating_sub(1))
                    .unwrap_or(Handle::MAX),
                uuid,
            })
            .collect())
    }

    async fn characteristics(
        &self,
        service: &RemoteService,
    ) -> Result<Vec<RemoteCharacteristic>, TransportError> {
        let remote = Self::recall(&self.services, service.start_handle)?;
        let characteristics = remote
            .characteristics()
            .await
            .map_err(|e| self.transport_error(e))?;

        let mut found = Vec::with_capacity(characteristics.len());
        for characteristic in characteristics {
            let uuid = characteristic.uuid().await.map_err(|e| self.transport_error(e))?;
            let flags = characteristic.flags().await.map_err(|e| self.transport_error(e))?;
            let declaration_handle = characteristic.id();
            let value_handle = declaration_handle.wrapping_add(1);

            Self::remember(&self.characteristics, declaration_handle, &characteristic);
            Self::remember(&self.attributes, value_handle, &Attribute::Value(characteristic));
            found.push(RemoteCharacteristic {
                declaration_handle,
                value_handle,
                uuid,
                properties: properties(&flags),
            });
        }
        // Discovery order, recovered from arbitrary D-Bus object order.
        found.sort_by_key(|c| c.declaration_handle);
        Ok(found)
    }

    async fn descriptors(
        &self,
        characteristic: &RemoteCharacteristic,
    ) -> Result<Vec<RemoteDescriptor>, TransportError> {
        let remote = Self::recall(&self.characteristics, characteristic.declaration_handle)?;
        let descriptors = remote.descriptors().await.map_err(|e| self.transport_error(e))?;

        let mut found = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let uuid = descriptor.uuid().await.map_err(|e| self.transport_error(e))?;
            let handle = descriptor.id();
            Self::remember(&self.attributes, handle, &Attribute::Descriptor(descriptor));
            found.push(RemoteDescriptor { handle, uuid });
        }
        // Discovery order, recovered from arbitrary D-Bus object order.
        found.sort_by_key(|d| d.handle);
        Ok(found)
    }

    async fn read(&self, handle: Handle) -> Result<Vec<u8>, TransportError> {
        let result = match Self::recall(&self.attributes, handle)? {
            Attribute::Value(characteristic) => characteristic.read().await,
            Attribute::Descriptor(descriptor) => descriptor.read().await,
        };
        result.map_err(|e| self.transport_error(e))
    }

    fn link_monitor(&self) -> LinkMonitor {
        self.monitor.clone()
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        if self.monitor.is_lost() {
            return Ok(());
        }
        self.device
            .disconnect()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }
}

impl Drop for BluezPeripheral {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
    }
}

/// Pairing agent registered through the BlueZ AgentManager.
pub struct BluezAgent {
    session: Session,
    handle: Arc<Mutex<Option<AgentHandle>>>,
    registration: Option<JoinHandle<()>>,
}

impl BluezAgent {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            handle: Arc::new(Mutex::new(None)),
            registration: None,
        }
    }
}

impl Drop for BluezAgent {
    fn drop(&mut self) {
        if let Some(task) = self.registration.take() {
            task.abort();
        }
    }
}

async fn display_passkey(req: DisplayPasskey) -> ReqResult<()> {
    info!("Passkey for {}: {:06}", req.device, req.passkey);
    Ok(())
}

async fn request_confirmation(req: RequestConfirmation) -> ReqResult<()> {
    info!("Confirming passkey {:06} for {}", req.passkey, req.device);
    Ok(())
}

// Nobody is at the keyboard during a scan.
async fn request_passkey(req: RequestPasskey) -> ReqResult<u32> {
    warn!("Passkey entry requested by {}, rejecting", req.device);
    Err(ReqError::Rejected)
}

/// BlueZ derives the announced IO capability from which callbacks are present.
fn agent_for(io_capability: IoCapability) -> Agent {
    let displays = matches!(
        io_capability,
        IoCapability::DisplayOnly | IoCapability::DisplayYesNo | IoCapability::KeyboardDisplay
    );
    let confirms = matches!(
        io_capability,
        IoCapability::DisplayYesNo | IoCapability::KeyboardDisplay
    );
    let keyboard = matches!(
        io_capability,
        IoCapability::KeyboardOnly | IoCapability::KeyboardDisplay
    );

    let mut agent = Agent::default();
    if displays {
        agent.display_passkey = Some(Box::new(|req| Box::pin(display_passkey(req))));
    }
    if confirms {
        agent.request_confirmation = Some(Box::new(|req| Box::pin(request_confirmation(req))));
    }
    if keyboard {
        agent.request_passkey = Some(Box::new(|req| Box::pin(request_passkey(req))));
    }
    agent
}

#[async_trait]
impl PairingAgent for BluezAgent {
    fn register(&mut self, io_capability: IoCapability) -> oneshot::Receiver<Result<(), AgentError>> {
        let (tx, rx) = oneshot::channel();
        let session = self.session.clone();
        let slot = self.handle.clone();

        if let Some(previous) = self.registration.take() {
            previous.abort();
        }
        self.registration = Some(tokio::spawn(async move {
            let reply = match session.register_agent(agent_for(io_capability)).await {
                Ok(handle) => match slot.lock() {
                    Ok(mut slot) => {
                        *slot = Some(handle);
                        Ok(())
                    }
                    Err(_) => Err(AgentError::Other("agent handle lock poisoned".to_string())),
                },
                Err(e) => Err(AgentError::Rejected(e.to_string())),
            };
            let _ = tx.send(reply);
        }));

        rx
    }

    async fn unregister(&mut self) -> Result<(), AgentError> {
        let handle = self
            .handle
            .lock()
            .map_err(|_| AgentError::Other("agent handle lock poisoned".to_string()))?
            .take();

        match handle {
            // Dropping the handle unregisters the agent object.
            Some(handle) => {
                drop(handle);
                Ok(())
            }
            None => Err(AgentError::Other("no agent registered".to_string())),
        }
    }

    async fn shutdown(&mut self) {
        if let Some(task) = self.registration.take() {
            task.abort();
        }
        let late = match self.handle.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(handle) = late {
            debug!("Releasing agent registered after its reply timed out");
            drop(handle);
        }
    }
}
