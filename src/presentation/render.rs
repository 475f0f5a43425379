//! Report rendering
//!
//! Human-readable attribute table layout and a JSON form for tooling.

use crate::domain::models::{display_uuid, Characteristic, Descriptor, ScanReport, Service};
use std::fmt;

const INDENT: &str = "    ";
const UNKNOWN: &str = "unknown";

/// Text if every byte is printable ASCII, otherwise space-separated hex.
pub fn format_value(value: &[u8]) -> String {
    if !value.is_empty() && value.iter().all(|b| (0x20..=0x7e).contains(b)) {
        return String::from_utf8_lossy(value).into_owned();
    }
    value
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn value_line(value: &Option<Vec<u8>>) -> String {
    match value {
        Some(v) if v.is_empty() => "(empty)".to_string(),
        Some(v) => format_value(v),
        None => "(read failed)".to_string(),
    }
}

/// Plain text layout, one block per attribute.
pub struct TextReport<'a>(pub &'a ScanReport);

impl TextReport<'_> {
    fn service(f: &mut fmt::Formatter<'_>, service: &Service) -> fmt::Result {
        writeln!(
            f,
            "Service ({:#06x} - {:#06x}, {} characteristics)",
            service.start_handle,
            service.end_handle,
            service.characteristics.len()
        )?;
        writeln!(f, "{INDENT}Handle: {:#06x}", service.start_handle)?;
        writeln!(f, "{INDENT}Type: 0x2800 (Primary Service)")?;
        writeln!(
            f,
            "{INDENT}Value (Service UUID): {} ({})",
            display_uuid(&service.uuid),
            service.resolved_name().unwrap_or(UNKNOWN)
        )?;
        writeln!(f)?;

        for characteristic in &service.characteristics {
            Self::characteristic(f, characteristic)?;
        }
        writeln!(f)
    }

    fn characteristic(f: &mut fmt::Formatter<'_>, characteristic: &Characteristic) -> fmt::Result {
        writeln!(
            f,
            "{INDENT}Characteristic ({} descriptors)",
            characteristic.descriptors.len()
        )?;
        writeln!(f, "{INDENT}{INDENT}Handle: {:#06x}", characteristic.declaration_handle)?;
        writeln!(f, "{INDENT}{INDENT}Type: 0x2803 (Characteristic)")?;
        writeln!(f, "{INDENT}{INDENT}Value:")?;
        writeln!(
            f,
            "{INDENT}{INDENT}{INDENT}Characteristic properties: {}",
            characteristic.properties
        )?;
        writeln!(
            f,
            "{INDENT}{INDENT}{INDENT}Characteristic value handle: {:#06x}",
            characteristic.value_handle
        )?;
        writeln!(
            f,
            "{INDENT}{INDENT}{INDENT}Characteristic UUID: {} ({})",
            display_uuid(&characteristic.uuid),
            characteristic.resolved_name().unwrap_or(UNKNOWN)
        )?;

        if characteristic.properties.is_readable() {
            writeln!(f, "{INDENT}Characteristic value")?;
            writeln!(f, "{INDENT}{INDENT}Handle: {:#06x}", characteristic.value_handle)?;
            writeln!(f, "{INDENT}{INDENT}Type: {}", display_uuid(&characteristic.uuid))?;
            writeln!(f, "{INDENT}{INDENT}Value: {}", value_line(&characteristic.value))?;
        }

        for descriptor in &characteristic.descriptors {
            Self::descriptor(f, descriptor)?;
        }
        writeln!(f)
    }

    fn descriptor(f: &mut fmt::Formatter<'_>, descriptor: &Descriptor) -> fmt::Result {
        writeln!(f, "{INDENT}Descriptor")?;
        writeln!(f, "{INDENT}{INDENT}Handle: {:#06x}", descriptor.handle)?;
        writeln!(
            f,
            "{INDENT}{INDENT}Type: {} ({})",
            display_uuid(&descriptor.uuid),
            descriptor.resolved_name().unwrap_or(UNKNOWN)
        )?;
        writeln!(f, "{INDENT}{INDENT}Value: {}", value_line(&descriptor.value))
    }
}

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        writeln!(f, "Number of services: {}", report.services.len())?;
        writeln!(f)?;

        for service in &report.services {
            Self::service(f, service)?;
        }

        if report.is_partial() {
            writeln!(
                f,
                "Device disconnected during the scan; report holds {} fully walked services.",
                report.services.len()
            )?;
        }
        Ok(())
    }
}

pub fn render_json(report: &ScanReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}
