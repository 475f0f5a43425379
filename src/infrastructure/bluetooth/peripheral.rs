//! Peripheral Capability
//!
//! The interface the scanner consumes from the host Bluetooth stack: a
//! transport that can connect to a device, the connected peripheral itself,
//! and the pairing agent. Implementations live in `super::bluez` and, for
//! tests, in `super::mock`.

use crate::domain::models::Handle;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

pub use crate::domain::models::{
    AddressType, IoCapability, RemoteCharacteristic, RemoteDescriptor, RemoteService,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection lost: {0}")]
    Disconnected(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("ATT error: {0}")]
    Att(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether the error means the link is gone, as opposed to a single failed request.
    pub fn is_link_loss(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("device disconnected or rejected the connection: {0}")]
    Disconnected(String),
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("agent registration rejected: {0}")]
    Rejected(String),
    #[error("no reply from the Bluetooth daemon within {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Other(String),
}

/// Receiving half of the disconnect notification.
///
/// Flips to "lost" at most once and never flips back.
#[derive(Debug, Clone)]
pub struct LinkMonitor {
    rx: watch::Receiver<bool>,
}

/// Sending half, held by whatever dispatches daemon events.
#[derive(Debug)]
pub struct LinkNotifier {
    tx: watch::Sender<bool>,
}

pub fn link_channel() -> (LinkNotifier, LinkMonitor) {
    let (tx, rx) = watch::channel(false);
    (LinkNotifier { tx }, LinkMonitor { rx })
}

impl LinkNotifier {
    /// Returns `true` only for the call that actually flipped the state.
    pub fn notify_lost(&self) -> bool {
        self.tx.send_if_modified(|lost| {
            if *lost {
                false
            } else {
                *lost = true;
                true
            }
        })
    }
}

impl LinkMonitor {
    pub fn is_lost(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the link is reported lost (or the notifier is gone).
    pub async fn lost(&mut self) {
        let _ = self.rx.wait_for(|lost| *lost).await;
    }
}

/// A connected remote device. Requests are issued one at a time.
#[async_trait]
pub trait Peripheral: Send + Sync {
    async fn services(&self) -> Result<Vec<RemoteService>, TransportError>;

    async fn characteristics(
        &self,
        service: &RemoteService,
    ) -> Result<Vec<RemoteCharacteristic>, TransportError>;

    async fn descriptors(
        &self,
        characteristic: &RemoteCharacteristic,
    ) -> Result<Vec<RemoteDescriptor>, TransportError>;

    async fn read(&self, handle: Handle) -> Result<Vec<u8>, TransportError>;

    /// Disconnect notification for this connection.
    fn link_monitor(&self) -> LinkMonitor;

    /// Close the link and stop any background event dispatch.
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Host side connection factory.
#[async_trait]
pub trait Transport: Send {
    type Peripheral: Peripheral;

    async fn connect(
        &mut self,
        address: &str,
        address_type: AddressType,
    ) -> Result<Self::Peripheral, ConnectError>;

    /// Best effort: drop the host's trust in `address` after a one-shot scan.
    async fn revoke_trust(&mut self, address: &str) -> Result<(), AgentError>;
}

/// Pairing agent registered with the host daemon.
#[async_trait]
pub trait PairingAgent: Send {
    /// Start registration; the daemon's reply arrives on the returned receiver.
    fn register(&mut self, io_capability: IoCapability) -> oneshot::Receiver<Result<(), AgentError>>;

    async fn unregister(&mut self) -> Result<(), AgentError>;

    /// Stop any registration still in flight and release what it left behind.
    ///
    /// Runs at every teardown, whether or not registration ever succeeded.
    async fn shutdown(&mut self) {}
}

/// Bound a single wire round-trip.
pub async fn with_timeout<T, F>(limit: Duration, request: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(limit, request).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(limit)),
    }
}
