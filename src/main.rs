use anyhow::Context;
use clap::Parser;
use gatt_recon::domain::models::ScanReport;
use gatt_recon::domain::registry::{Namespace, SpecRegistry};
use gatt_recon::domain::settings::{Settings, SettingsService};
use gatt_recon::infrastructure::bluetooth::{AddressType, IoCapability, ScanConfig};
use gatt_recon::infrastructure::logging::init_logger;
use gatt_recon::presentation::render::{render_json, TextReport};
use tracing::{debug, info, warn};

/// Enumerate and annotate the GATT attribute table of a BLE peripheral.
#[derive(Debug, Parser)]
#[command(name = "gatt_recon", version, about)]
struct Cli {
    /// Bluetooth address of the target, e.g. AA:BB:CC:DD:EE:FF
    address: String,

    /// Address type of the target (public or random)
    #[arg(long = "addr-type", value_name = "TYPE")]
    address_type: Option<AddressType>,

    /// Also enumerate and read descriptors
    #[arg(long)]
    include_descriptors: bool,

    /// IO capability announced by the pairing agent
    #[arg(long, value_name = "CAP")]
    io_capability: Option<IoCapability>,

    /// Host adapter to scan from
    #[arg(long, value_name = "NAME")]
    adapter: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Keep the device trusted after the scan
    #[arg(long)]
    no_untrust: bool,

    /// Store the given options as the new defaults
    #[arg(long)]
    save_settings: bool,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(address_type) = self.address_type {
            settings.address_type = address_type;
        }
        if let Some(io_capability) = self.io_capability {
            settings.io_capability = io_capability;
        }
        if let Some(adapter) = &self.adapter {
            settings.adapter = adapter.clone();
        }
        if self.include_descriptors {
            settings.include_descriptors = true;
        }
        if self.no_untrust {
            settings.revoke_trust = false;
        }
    }
}

#[cfg(feature = "bluez")]
async fn scan(registry: &SpecRegistry, adapter: &str, config: ScanConfig) -> anyhow::Result<ScanReport> {
    use gatt_recon::infrastructure::bluetooth::bluez::{BluezAgent, BluezTransport};
    use gatt_recon::infrastructure::bluetooth::ScanSession;

    let transport = BluezTransport::new(adapter)
        .await
        .with_context(|| format!("Failed to open Bluetooth adapter {adapter}"))?;
    let agent = BluezAgent::new(transport.session());

    let mut session = ScanSession::new(registry, transport, agent, config);
    let report = session.run().await?;
    debug!("Session history: {:?}", session.history());
    Ok(report)
}

#[cfg(not(feature = "bluez"))]
async fn scan(_registry: &SpecRegistry, adapter: &str, config: ScanConfig) -> anyhow::Result<ScanReport> {
    anyhow::bail!(
        "cannot scan {} from {}: built without a Bluetooth backend (rebuild with `--features bluez`)",
        config.address,
        adapter
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings_service = SettingsService::new()?;
    cli.apply(settings_service.get_mut());
    if cli.save_settings {
        settings_service
            .save()
            .with_context(|| format!("Failed to save {}", settings_service.path().display()))?;
    }
    let settings = settings_service.get().clone();

    let _log_guard = init_logger(&settings.log_settings)?;
    if let Some(e) = settings_service.load_error() {
        warn!(
            "Ignoring unreadable settings {}: {}",
            settings_service.path().display(),
            e
        );
    }
    info!("Using settings from {}", settings_service.path().display());

    let registry = SpecRegistry::bundled().context("Failed to load bundled UUID tables")?;
    debug!(
        "Registry: {} services, {} characteristics, {} descriptors",
        registry.len(Namespace::Service),
        registry.len(Namespace::Characteristic),
        registry.len(Namespace::Descriptor)
    );

    let config = ScanConfig::from_settings(&settings, &cli.address);
    let report = scan(&registry, &settings.adapter, config).await?;
    info!(
        "Scan finished: {} services, {} characteristics, {:?}",
        report.services.len(),
        report.characteristic_count(),
        report.termination
    );

    if cli.json {
        println!("{}", render_json(&report)?);
    } else {
        print!("{}", TextReport(&report));
    }
    Ok(())
}
