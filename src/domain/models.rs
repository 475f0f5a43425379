use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::registry::SpecEntry;

/// 16-bit position in the remote attribute table. Only meaningful within one connection.
pub type Handle = u16;

/// Low 96 bits shared by every SIG-assigned UUID (`0000xxxx-0000-1000-8000-00805f9b34fb`).
pub const SIG_BASE_SUFFIX: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

const SUFFIX_MASK: u128 = (1u128 << 96) - 1;

/// Textual suffix stripped when displaying SIG-assigned UUIDs.
pub const SIG_UUID_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// Expand a 16-bit assigned number to its full 128-bit UUID.
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | SIG_BASE_SUFFIX)
}

/// 16-bit assigned number of `uuid`, if it carries the SIG base suffix.
///
/// Only the low 96 bits are checked. A 32-bit alias such as
/// `0001180a-0000-1000-8000-00805f9b34fb` maps to its low 16 bits (`0x180A`).
pub fn short_form(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & SUFFIX_MASK != SIG_BASE_SUFFIX {
        return None;
    }
    Some((value >> 96) as u16)
}

/// Registry key for a 16-bit assigned number, e.g. `0x180A`.
pub fn short_key(short: u16) -> String {
    format!("0x{:04X}", short)
}

/// Display form used in reports: the short prefix for SIG UUIDs, the full UUID otherwise.
pub fn display_uuid(uuid: &Uuid) -> String {
    uuid.to_string().replace(SIG_UUID_SUFFIX, "")
}

/// Characteristic properties bit field as carried in the characteristic declaration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CharacteristicProperties(u8);

bitflags::bitflags! {
    impl CharacteristicProperties: u8 {
        const BROADCAST = 1 << 0;
        const READ = 1 << 1;
        const WRITE_WITHOUT_RESPONSE = 1 << 2;
        const WRITE = 1 << 3;
        const NOTIFY = 1 << 4;
        const INDICATE = 1 << 5;
        const AUTHENTICATED_SIGNED_WRITES = 1 << 6;
        const EXTENDED_PROPERTIES = 1 << 7;
    }
}

impl CharacteristicProperties {
    const NAMES: [(Self, &'static str); 8] = [
        (Self::BROADCAST, "BROADCAST"),
        (Self::READ, "READ"),
        (Self::WRITE_WITHOUT_RESPONSE, "WRITE NO RESPONSE"),
        (Self::WRITE, "WRITE"),
        (Self::NOTIFY, "NOTIFY"),
        (Self::INDICATE, "INDICATE"),
        (Self::AUTHENTICATED_SIGNED_WRITES, "SIGNED WRITE"),
        (Self::EXTENDED_PROPERTIES, "EXTENDED PROPERTIES"),
    ];

    pub fn is_readable(&self) -> bool {
        self.contains(Self::READ)
    }

    /// Names of the set properties, lowest bit first.
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for CharacteristicProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(" "))
    }
}

impl Serialize for CharacteristicProperties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

/// One primary service range as returned by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteService {
    pub start_handle: Handle,
    pub end_handle: Handle,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCharacteristic {
    pub declaration_handle: Handle,
    /// Conventionally `declaration_handle + 1`
    pub value_handle: Handle,
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDescriptor {
    pub handle: Handle,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    #[default]
    Public,
    Random,
}

impl FromStr for AddressType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown address type '{other}' (expected public or random)")),
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => f.write_str("public"),
            Self::Random => f.write_str("random"),
        }
    }
}

/// I/O capability announced by the pairing agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IoCapability {
    DisplayOnly,
    DisplayYesNo,
    KeyboardOnly,
    #[default]
    NoInputNoOutput,
    KeyboardDisplay,
}

impl IoCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DisplayOnly => "DisplayOnly",
            Self::DisplayYesNo => "DisplayYesNo",
            Self::KeyboardOnly => "KeyboardOnly",
            Self::NoInputNoOutput => "NoInputNoOutput",
            Self::KeyboardDisplay => "KeyboardDisplay",
        }
    }
}

impl FromStr for IoCapability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::DisplayOnly,
            Self::DisplayYesNo,
            Self::KeyboardOnly,
            Self::NoInputNoOutput,
            Self::KeyboardDisplay,
        ]
        .into_iter()
        .find(|cap| cap.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("unknown IO capability '{s}'"))
    }
}

impl fmt::Display for IoCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Descriptor {
    pub handle: Handle,
    pub uuid: Uuid,
    pub spec: Option<SpecEntry>,
    /// `None` when the read failed; `Some(vec![])` is a genuinely empty value.
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Characteristic {
    pub declaration_handle: Handle,
    pub value_handle: Handle,
    pub uuid: Uuid,
    pub spec: Option<SpecEntry>,
    pub properties: CharacteristicProperties,
    pub value: Option<Vec<u8>>,
    pub descriptors: Vec<Descriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Service {
    pub start_handle: Handle,
    pub end_handle: Handle,
    pub uuid: Uuid,
    pub spec: Option<SpecEntry>,
    pub characteristics: Vec<Characteristic>,
}

impl Descriptor {
    pub fn resolved_name(&self) -> Option<&str> {
        self.spec.as_ref().map(|s| s.name.as_str())
    }
}

impl Characteristic {
    pub fn resolved_name(&self) -> Option<&str> {
        self.spec.as_ref().map(|s| s.name.as_str())
    }
}

impl Service {
    pub fn resolved_name(&self) -> Option<&str> {
        self.spec.as_ref().map(|s| s.name.as_str())
    }
}

/// How the attribute walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WalkTermination {
    Completed,
    /// The peer dropped the link; the report holds only the services walked before that.
    Disconnected,
}

/// Result of one scan: services in the order the device returned them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub services: Vec<Service>,
    pub termination: WalkTermination,
}

impl ScanReport {
    pub fn is_partial(&self) -> bool {
        self.termination == WalkTermination::Disconnected
    }

    pub fn characteristic_count(&self) -> usize {
        self.services.iter().map(|s| s.characteristics.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_form_of_sig_uuid() {
        let uuid = Uuid::parse_str("00002a00-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(short_form(&uuid), Some(0x2A00));
        assert_eq!(short_key(0x2A00), "0x2A00");
        assert_eq!(sig_uuid(0x2A00), uuid);
    }

    #[test]
    fn test_short_form_rejects_vendor_uuid() {
        let vendor = Uuid::parse_str("4f63756c-7573-2054-6872-65656d6f7465").unwrap();
        assert_eq!(short_form(&vendor), None);
    }

    #[test]
    fn test_short_form_of_32bit_alias() {
        let alias32 = Uuid::parse_str("0001180a-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(short_form(&alias32), Some(0x180A));
    }

    #[test]
    fn test_short_key_is_uppercase_hex() {
        assert_eq!(short_key(0x180a), "0x180A");
        assert_eq!(short_key(0x0001), "0x0001");
    }

    #[test]
    fn test_display_uuid() {
        assert_eq!(display_uuid(&sig_uuid(0x1800)), "00001800");
        let vendor = Uuid::parse_str("c8c51726-81bc-483b-a052-f7a14ea3d281").unwrap();
        assert_eq!(display_uuid(&vendor), "c8c51726-81bc-483b-a052-f7a14ea3d281");
    }

    #[test]
    fn test_properties_names() {
        let props = CharacteristicProperties::READ | CharacteristicProperties::NOTIFY;
        assert!(props.is_readable());
        assert!(!props.contains(CharacteristicProperties::WRITE));
        assert_eq!(props.to_string(), "READ NOTIFY");
        assert_eq!(CharacteristicProperties::from_bits_truncate(0x0A).names(), vec!["READ", "WRITE"]);
    }

    #[test]
    fn test_parse_options() {
        assert_eq!("random".parse::<AddressType>(), Ok(AddressType::Random));
        assert!("le".parse::<AddressType>().is_err());
        assert_eq!(
            "displayyesno".parse::<IoCapability>(),
            Ok(IoCapability::DisplayYesNo)
        );
        assert_eq!(IoCapability::default().to_string(), "NoInputNoOutput");
    }
}
