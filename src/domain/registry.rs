//! UUID Specification Registry
//!
//! Maps SIG-assigned 16-bit UUIDs to their published names. Services,
//! characteristics and descriptors each have their own table because the
//! same short UUID can mean different things in each namespace.

use crate::domain::models::{short_form, short_key};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

const BUNDLED_SERVICES: &str = include_str!("../../res/gatt-service-uuid.txt");
const BUNDLED_CHARACTERISTICS: &str = include_str!("../../res/gatt-characteristic-uuid.txt");
const BUNDLED_DESCRIPTORS: &str = include_str!("../../res/gatt-descriptor-uuid.txt");

/// Columns per line: Name, Category, UUID, SpecRef.
const COLUMNS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Service,
    Characteristic,
    Descriptor,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => f.write_str("service"),
            Self::Characteristic => f.write_str("characteristic"),
            Self::Descriptor => f.write_str("descriptor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecEntry {
    pub name: String,
    /// Uniform Type Identifier, e.g. `org.bluetooth.service.generic_access`
    pub category: String,
    pub spec_ref: String,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{namespace} table line {line}: expected 4 tab-separated columns, found {columns}")]
    MalformedLine {
        namespace: Namespace,
        line: usize,
        columns: usize,
    },
    #[error("{namespace} table line {line}: invalid UUID '{value}'")]
    InvalidUuid {
        namespace: Namespace,
        line: usize,
        value: String,
    },
}

/// Immutable lookup tables, built once and shared by reference for the process lifetime.
#[derive(Debug, Clone, Default)]
pub struct SpecRegistry {
    services: HashMap<String, SpecEntry>,
    characteristics: HashMap<String, SpecEntry>,
    descriptors: HashMap<String, SpecEntry>,
}

impl SpecRegistry {
    /// Build the registry from the three tab-separated tables.
    pub fn from_tables(
        services: &str,
        characteristics: &str,
        descriptors: &str,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            services: parse_table(Namespace::Service, services)?,
            characteristics: parse_table(Namespace::Characteristic, characteristics)?,
            descriptors: parse_table(Namespace::Descriptor, descriptors)?,
        })
    }

    /// Registry over the tables compiled into the binary.
    pub fn bundled() -> Result<Self, RegistryError> {
        Self::from_tables(BUNDLED_SERVICES, BUNDLED_CHARACTERISTICS, BUNDLED_DESCRIPTORS)
    }

    /// Look up `uuid` in `namespace`.
    ///
    /// Vendor UUIDs and unassigned short codes yield `None`; that is the normal
    /// case for proprietary attributes, not an error.
    pub fn lookup(&self, namespace: Namespace, uuid: &Uuid) -> Option<&SpecEntry> {
        let short = short_form(uuid)?;
        self.table(namespace).get(&short_key(short))
    }

    pub fn len(&self, namespace: Namespace) -> usize {
        self.table(namespace).len()
    }

    fn table(&self, namespace: Namespace) -> &HashMap<String, SpecEntry> {
        match namespace {
            Namespace::Service => &self.services,
            Namespace::Characteristic => &self.characteristics,
            Namespace::Descriptor => &self.descriptors,
        }
    }
}

fn parse_table(namespace: Namespace, text: &str) -> Result<HashMap<String, SpecEntry>, RegistryError> {
    let mut table = HashMap::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let items: Vec<&str> = line.split('\t').collect();
        if items.len() != COLUMNS {
            return Err(RegistryError::MalformedLine {
                namespace,
                line: idx + 1,
                columns: items.len(),
            });
        }

        let key = normalize_key(items[2]).ok_or_else(|| RegistryError::InvalidUuid {
            namespace,
            line: idx + 1,
            value: items[2].to_string(),
        })?;

        table.insert(
            key,
            SpecEntry {
                name: items[0].to_string(),
                category: items[1].to_string(),
                spec_ref: items[3].to_string(),
            },
        );
    }

    Ok(table)
}

/// Accepts `0x180a`, `180A` or a full SIG UUID and returns the `0x180A` key form.
fn normalize_key(value: &str) -> Option<String> {
    let value = value.trim();
    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);

    if hex.len() == 4 {
        return u16::from_str_radix(hex, 16).ok().map(short_key);
    }

    let uuid = Uuid::parse_str(value).ok()?;
    short_form(&uuid).map(short_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::sig_uuid;

    #[test]
    fn test_bundled_registry_loads() {
        let registry = SpecRegistry::bundled().unwrap();
        assert!(registry.len(Namespace::Service) > 0);
        assert!(registry.len(Namespace::Characteristic) > 0);
        assert!(registry.len(Namespace::Descriptor) > 0);

        let entry = registry.lookup(Namespace::Service, &sig_uuid(0x1800)).unwrap();
        assert_eq!(entry.name, "Generic Access");
        assert_eq!(entry.category, "org.bluetooth.service.generic_access");
    }

    #[test]
    fn test_namespaces_are_independent() {
        let registry = SpecRegistry::from_tables(
            "Battery\torg.bluetooth.service.battery_service\t0x180F\tGSS\n",
            "Odd\torg.example.odd\t0x180F\tNone\n",
            "",
        )
        .unwrap();

        let uuid = sig_uuid(0x180F);
        assert_eq!(registry.lookup(Namespace::Service, &uuid).unwrap().name, "Battery");
        assert_eq!(registry.lookup(Namespace::Characteristic, &uuid).unwrap().name, "Odd");
        assert!(registry.lookup(Namespace::Descriptor, &uuid).is_none());
    }

    #[test]
    fn test_lookup_is_deterministic() {
        let registry = SpecRegistry::bundled().unwrap();
        let uuid = sig_uuid(0x2A19);
        let first = registry.lookup(Namespace::Characteristic, &uuid).cloned();
        let second = registry.lookup(Namespace::Characteristic, &uuid).cloned();
        assert_eq!(first, second);
        assert_eq!(first.unwrap().name, "Battery Level");
    }

    #[test]
    fn test_vendor_uuid_is_unknown() {
        let registry = SpecRegistry::bundled().unwrap();
        let vendor = Uuid::parse_str("4f63756c-7573-2054-6872-65656d6f7465").unwrap();
        assert!(registry.lookup(Namespace::Service, &vendor).is_none());
    }

    #[test]
    fn test_32bit_alias_resolves_by_short_form() {
        let registry = SpecRegistry::bundled().unwrap();
        let alias32 = Uuid::parse_str("0001180a-0000-1000-8000-00805f9b34fb").unwrap();
        let entry = registry.lookup(Namespace::Service, &alias32).unwrap();
        assert_eq!(entry.name, "Device Information");
    }

    #[test]
    fn test_malformed_line_is_fatal() {
        let err = SpecRegistry::from_tables(
            "Generic Access\torg.bluetooth.service.generic_access\t0x1800\tGSS\nbroken\tline\n",
            "",
            "",
        )
        .unwrap_err();

        match err {
            RegistryError::MalformedLine {
                namespace,
                line,
                columns,
            } => {
                assert_eq!(namespace, Namespace::Service);
                assert_eq!(line, 2);
                assert_eq!(columns, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_uuid_column_forms() {
        assert_eq!(normalize_key("0x2a00").as_deref(), Some("0x2A00"));
        assert_eq!(normalize_key("2A00").as_deref(), Some("0x2A00"));
        assert_eq!(
            normalize_key("00002a00-0000-1000-8000-00805f9b34fb").as_deref(),
            Some("0x2A00")
        );
        assert_eq!(normalize_key("not-a-uuid"), None);
    }
}
