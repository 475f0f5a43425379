//! GATT attribute table enumeration for BLE peripherals.
//!
//! Connects to one device, walks its services, characteristics and
//! descriptors, reads what is readable and annotates every UUID with its
//! Bluetooth SIG assigned name.

pub mod domain;
pub mod infrastructure;
pub mod presentation;
