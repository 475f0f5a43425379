//! Bluetooth Module
//!
//! Connects to one BLE peripheral and walks its GATT database.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      ScanSession                         │
//! │  (agent registration, connect, teardown on every path)   │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌────────────┐ ┌─────────────┐ ┌────────────┐
//! │ Peripheral │ │   Walker    │ │   Reader   │
//! │            │ │             │ │            │
//! │ - Traits   │ │ - Services  │ │ - Values   │
//! │ - Errors   │ │ - Chars     │ │ - Timeouts │
//! │ - Link     │ │ - Descs     │ │            │
//! └─────┬──────┘ └─────────────┘ └────────────┘
//!       │
//!       ▼
//! ┌────────────┐
//! │   BlueZ    │  (feature `bluez`)
//! └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`peripheral`] - Transport, peripheral and agent traits, link monitoring
//! - [`reader`] - Single attribute reads with failure isolation
//! - [`walker`] - Service, characteristic and descriptor walk
//! - [`session`] - Scan lifecycle and cleanup
//! - `bluez` - BlueZ D-Bus binding

pub mod peripheral;
pub mod reader;
pub mod session;
pub mod walker;

#[cfg(feature = "bluez")]
pub mod bluez;

#[cfg(test)]
pub(crate) mod mock;

pub use peripheral::{AddressType, IoCapability};
pub use session::{ScanConfig, ScanError, ScanSession, SessionState};
