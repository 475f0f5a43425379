//! Scan Session
//!
//! Owns the pairing agent registration and the connection for one scan, and
//! guarantees teardown on every exit path.
//!
//! ```text
//! Idle -> AgentRegistering -> AgentRegistered | AgentRegistrationFailed
//!      -> Connected -> Walking -> Completed | Disconnected | Aborted
//!      -> TornDown
//! ```
//!
//! A failed connect goes straight to `Aborted`. Teardown runs exactly once,
//! also when the walk panics.

use crate::domain::models::ScanReport;
use crate::domain::registry::SpecRegistry;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::peripheral::{
    AddressType, ConnectError, IoCapability, PairingAgent, Peripheral, Transport,
};
use crate::infrastructure::bluetooth::walker::{AttributeWalker, WalkError, WalkOptions};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    AgentRegistering,
    AgentRegistered,
    AgentRegistrationFailed,
    Connected,
    Walking,
    Completed,
    Disconnected,
    Aborted,
    TornDown,
}

/// Everything the core needs to know about one scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub address: String,
    pub address_type: AddressType,
    pub include_descriptors: bool,
    pub io_capability: IoCapability,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub agent_registration_timeout: Duration,
    /// Ask the host to stop trusting the device once the scan is over.
    pub revoke_trust: bool,
}

impl ScanConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            address_type: AddressType::default(),
            include_descriptors: false,
            io_capability: IoCapability::default(),
            connect_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(10),
            agent_registration_timeout: Duration::from_secs(5),
            revoke_trust: true,
        }
    }

    /// Scan parameters for `address` taken from the persisted settings.
    pub fn from_settings(settings: &Settings, address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            address_type: settings.address_type,
            include_descriptors: settings.include_descriptors,
            io_capability: settings.io_capability,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
            agent_registration_timeout: Duration::from_millis(settings.agent_registration_timeout_ms),
            revoke_trust: settings.revoke_trust,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: ConnectError,
    },
    #[error(transparent)]
    Enumeration(#[from] WalkError),
    #[error("scan session already used")]
    SessionReused,
}

pub struct ScanSession<'r, T: Transport, A: PairingAgent> {
    registry: &'r SpecRegistry,
    transport: T,
    agent: A,
    config: ScanConfig,
    peripheral: Option<T::Peripheral>,
    agent_registered: bool,
    torn_down: bool,
    states: Vec<SessionState>,
}

impl<'r, T: Transport, A: PairingAgent> ScanSession<'r, T, A> {
    pub fn new(registry: &'r SpecRegistry, transport: T, agent: A, config: ScanConfig) -> Self {
        Self {
            registry,
            transport,
            agent,
            config,
            peripheral: None,
            agent_registered: false,
            torn_down: false,
            states: vec![SessionState::Idle],
        }
    }

    pub fn state(&self) -> SessionState {
        self.states.last().copied().unwrap_or(SessionState::Idle)
    }

    /// Every state the session went through, in order.
    pub fn history(&self) -> &[SessionState] {
        &self.states
    }

    /// Run the scan. A session can only be run once.
    pub async fn run(&mut self) -> Result<ScanReport, ScanError> {
        if self.state() != SessionState::Idle {
            return Err(ScanError::SessionReused);
        }

        let outcome = AssertUnwindSafe(self.drive()).catch_unwind().await;
        self.teardown().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn drive(&mut self) -> Result<ScanReport, ScanError> {
        self.register_agent().await;

        info!(
            "Connecting to {} ({})",
            self.config.address, self.config.address_type
        );
        let connect = self
            .transport
            .connect(&self.config.address, self.config.address_type);
        let peripheral = match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(peripheral)) => peripheral,
            Ok(Err(e)) => return Err(self.abort_connect(e)),
            Err(_) => return Err(self.abort_connect(ConnectError::Timeout(self.config.connect_timeout))),
        };
        self.transition(SessionState::Connected);

        let registry = self.registry;
        let options = WalkOptions {
            include_descriptors: self.config.include_descriptors,
            request_timeout: self.config.request_timeout,
        };
        self.transition(SessionState::Walking);
        let peripheral = self.peripheral.insert(peripheral);

        let walked = AttributeWalker::new(registry, options).walk(&*peripheral).await;

        match walked {
            Ok(report) if report.is_partial() => {
                warn!(
                    "Scan ended early: device disconnected after {} service(s)",
                    report.services.len()
                );
                self.transition(SessionState::Disconnected);
                Ok(report)
            }
            Ok(report) => {
                info!(
                    "Scan completed: {} services, {} characteristics",
                    report.services.len(),
                    report.characteristic_count()
                );
                self.transition(SessionState::Completed);
                Ok(report)
            }
            Err(e) => {
                error!("Scan aborted: {}", e);
                self.transition(SessionState::Aborted);
                Err(e.into())
            }
        }
    }

    async fn register_agent(&mut self) {
        self.transition(SessionState::AgentRegistering);
        let io_capability = self.config.io_capability;
        let reply = self.agent.register(io_capability);

        match tokio::time::timeout(self.config.agent_registration_timeout, reply).await {
            Ok(Ok(Ok(()))) => {
                info!("Agent object registered, IO capability: {}", io_capability);
                self.agent_registered = true;
                self.transition(SessionState::AgentRegistered);
            }
            Ok(Ok(Err(e))) => {
                error!(
                    "Failed to register agent object ({}), IO capability: {}",
                    e, io_capability
                );
                self.transition(SessionState::AgentRegistrationFailed);
            }
            Ok(Err(_)) => {
                error!("Agent registration dropped without a reply");
                self.transition(SessionState::AgentRegistrationFailed);
            }
            Err(_) => {
                error!(
                    "No agent registration reply within {:?}",
                    self.config.agent_registration_timeout
                );
                self.transition(SessionState::AgentRegistrationFailed);
            }
        }
    }

    fn abort_connect(&mut self, source: ConnectError) -> ScanError {
        error!("Failed to connect to {}: {}", self.config.address, source);
        self.transition(SessionState::Aborted);
        ScanError::Connect {
            address: self.config.address.clone(),
            source,
        }
    }

    /// Close the link, release the agent, then revoke trust. Failures are logged only.
    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let limit = self.config.request_timeout;

        if let Some(mut peripheral) = self.peripheral.take() {
            match tokio::time::timeout(limit, peripheral.disconnect()).await {
                Ok(Ok(())) => debug!("Disconnected from {}", self.config.address),
                Ok(Err(e)) => warn!("Failed to disconnect cleanly: {}", e),
                Err(_) => warn!("Disconnect did not complete within {:?}", limit),
            }
        }

        if self.agent_registered {
            self.agent_registered = false;
            match tokio::time::timeout(limit, self.agent.unregister()).await {
                Ok(Ok(())) => info!("Unregistered agent object"),
                Ok(Err(e)) => warn!("Failed to unregister agent object: {}", e),
                Err(_) => warn!("Agent unregistration did not complete within {:?}", limit),
            }
        }

        // Also covers a registration that completed after its reply timed out.
        if tokio::time::timeout(limit, self.agent.shutdown()).await.is_err() {
            warn!("Agent shutdown did not complete within {:?}", limit);
        }

        if self.config.revoke_trust {
            match tokio::time::timeout(limit, self.transport.revoke_trust(&self.config.address))
                .await
            {
                Ok(Ok(())) => info!("Device {} set untrusted", self.config.address),
                Ok(Err(e)) => warn!("Failed to revoke trust for {}: {}", self.config.address, e),
                Err(_) => warn!("Trust revocation did not complete within {:?}", limit),
            }
        }

        self.transition(SessionState::TornDown);
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session state: {:?} -> {:?}", self.state(), next);
        self.states.push(next);
    }
}
