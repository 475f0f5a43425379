//! Value Reader
//!
//! Reads a single attribute value. A failed read is isolated: the value stays
//! absent and the walk carries on. Only a lost link is reported to the caller.

use crate::domain::models::Handle;
use crate::infrastructure::bluetooth::peripheral::{
    with_timeout, Peripheral, RemoteCharacteristic, RemoteDescriptor,
};
use std::time::Duration;
use tracing::{info, trace};

/// Marker returned when the peer dropped the connection during a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkLost;

#[derive(Debug, Clone)]
pub struct ValueReader {
    request_timeout: Duration,
}

impl ValueReader {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    /// Read a characteristic value. Skipped unless the declaration advertises Read.
    pub async fn read_characteristic<P>(
        &self,
        peripheral: &P,
        characteristic: &RemoteCharacteristic,
    ) -> Result<Option<Vec<u8>>, LinkLost>
    where
        P: Peripheral + ?Sized,
    {
        if !characteristic.properties.is_readable() {
            trace!(
                "Characteristic {:#06x} not readable, skipping",
                characteristic.value_handle
            );
            return Ok(None);
        }
        self.read(peripheral, characteristic.value_handle).await
    }

    /// Read a descriptor value. Descriptors carry no property gate, so this always tries.
    pub async fn read_descriptor<P>(
        &self,
        peripheral: &P,
        descriptor: &RemoteDescriptor,
    ) -> Result<Option<Vec<u8>>, LinkLost>
    where
        P: Peripheral + ?Sized,
    {
        self.read(peripheral, descriptor.handle).await
    }

    async fn read<P>(&self, peripheral: &P, handle: Handle) -> Result<Option<Vec<u8>>, LinkLost>
    where
        P: Peripheral + ?Sized,
    {
        if peripheral.link_monitor().is_lost() {
            return Err(LinkLost);
        }

        match with_timeout(self.request_timeout, peripheral.read(handle)).await {
            Ok(value) => {
                trace!("Read {} bytes from {:#06x}", value.len(), handle);
                Ok(Some(value))
            }
            Err(e) if e.is_link_loss() => Err(LinkLost),
            Err(e) => {
                info!("Could not read handle {:#06x}: {}", handle, e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{sig_uuid, CharacteristicProperties};
    use crate::infrastructure::bluetooth::mock::MockPeripheral;
    use crate::infrastructure::bluetooth::peripheral::TransportError;

    fn characteristic(props: CharacteristicProperties) -> RemoteCharacteristic {
        RemoteCharacteristic {
            declaration_handle: 0x0002,
            value_handle: 0x0003,
            uuid: sig_uuid(0x2A00),
            properties: props,
        }
    }

    #[tokio::test]
    async fn test_read_gated_by_property() {
        let peripheral = MockPeripheral::new().with_value(0x0003, b"Widget");
        let reader = ValueReader::new(Duration::from_secs(1));

        let value = reader
            .read_characteristic(&peripheral, &characteristic(CharacteristicProperties::WRITE))
            .await
            .unwrap();
        assert_eq!(value, None);
        assert!(peripheral.reads().is_empty());

        let value = reader
            .read_characteristic(&peripheral, &characteristic(CharacteristicProperties::READ))
            .await
            .unwrap();
        assert_eq!(value, Some(b"Widget".to_vec()));
        assert_eq!(peripheral.reads(), vec![0x0003]);
    }

    #[tokio::test]
    async fn test_read_failure_is_isolated() {
        let peripheral = MockPeripheral::new()
            .with_read_error(0x0005, TransportError::Att("Read Not Permitted".into()));
        let reader = ValueReader::new(Duration::from_secs(1));
        let descriptor = RemoteDescriptor {
            handle: 0x0005,
            uuid: sig_uuid(0x2902),
        };

        assert_eq!(reader.read_descriptor(&peripheral, &descriptor).await, Ok(None));
    }

    #[tokio::test]
    async fn test_empty_value_is_present() {
        let peripheral = MockPeripheral::new().with_value(0x0005, b"");
        let reader = ValueReader::new(Duration::from_secs(1));
        let descriptor = RemoteDescriptor {
            handle: 0x0005,
            uuid: sig_uuid(0x2901),
        };

        assert_eq!(
            reader.read_descriptor(&peripheral, &descriptor).await,
            Ok(Some(Vec::new()))
        );
    }

    #[tokio::test]
    async fn test_link_loss_is_reported() {
        let peripheral = MockPeripheral::new()
            .with_read_error(0x0003, TransportError::Disconnected("peer reset".into()));
        let reader = ValueReader::new(Duration::from_secs(1));

        let result = reader
            .read_characteristic(&peripheral, &characteristic(CharacteristicProperties::READ))
            .await;
        assert_eq!(result, Err(LinkLost));
    }
}
