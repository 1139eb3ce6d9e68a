//! Advertisement payloads as delivered by the platform driver
//!
//! Platform glue hands advertisements over as an [`AdvertisementMap`] keyed by the CoreBluetooth
//! advertisement data key names in [`keys`]. Values the crate does not recognise are kept so that they can
//! still be shown in diagnostics.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use uuid::Uuid;

use crate::codec::{hex_string, text_or_hex};
use crate::{btuuid, BluetoothUuidExt};

/// Well-known advertisement data keys
pub mod keys {
    /// Local name of the peripheral (text)
    pub const LOCAL_NAME: &str = "kCBAdvDataLocalName";
    /// Whether the advertising event type is connectable (bool)
    pub const IS_CONNECTABLE: &str = "kCBAdvDataIsConnectable";
    /// Service specific data (service UUID to bytes)
    pub const SERVICE_DATA: &str = "kCBAdvDataServiceData";
    /// Advertised service UUIDs
    pub const SERVICE_UUIDS: &str = "kCBAdvDataServiceUUIDs";
    /// Transmit power level (number)
    pub const TX_POWER_LEVEL: &str = "kCBAdvDataTxPowerLevel";
    /// Manufacturer specific data (bytes, company id first)
    pub const MANUFACTURER_DATA: &str = "kCBAdvDataManufacturerData";
    /// Service UUIDs found in the overflow area
    pub const OVERFLOW_SERVICE_UUIDS: &str = "kCBAdvDataOverflowServiceUUIDs";
    /// Service UUIDs the peripheral solicits from a central
    pub const SOLICITED_SERVICE_UUIDS: &str = "kCBAdvDataSolicitedServiceUUIDs";
}

/// A single raw advertisement value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum AdvertisementValue {
    Text(String),
    Bool(bool),
    Number(i64),
    Bytes(Vec<u8>),
    Uuids(Vec<Uuid>),
    ServiceData(BTreeMap<Uuid, Vec<u8>>),
}

/// Raw advertisement data, keyed by advertisement data key.
pub type AdvertisementMap = BTreeMap<String, AdvertisementValue>;

fn uuid_label(uuid: &Uuid) -> String {
    btuuid::assigned_name(uuid)
        .map(String::from)
        .unwrap_or_else(|| uuid.to_bluetooth_string())
}

fn uuid_list(uuids: &[Uuid]) -> String {
    let labels: Vec<String> = uuids.iter().map(uuid_label).collect();
    format!("[{}]", labels.join(", "))
}

fn service_data(data: &BTreeMap<Uuid, Vec<u8>>) -> String {
    let entries: Vec<String> = data
        .iter()
        .map(|(uuid, bytes)| format!("{}: {}", uuid_label(uuid), hex_string(bytes)))
        .collect();
    format!("[{}]", entries.join(", "))
}

impl fmt::Display for AdvertisementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvertisementValue::Text(text) => f.write_str(text),
            AdvertisementValue::Bool(value) => write!(f, "{value}"),
            AdvertisementValue::Number(value) => write!(f, "{value}"),
            AdvertisementValue::Bytes(bytes) => write!(f, "<{}>", hex_string(bytes)),
            AdvertisementValue::Uuids(uuids) => f.write_str(&uuid_list(uuids)),
            AdvertisementValue::ServiceData(data) => f.write_str(&service_data(data)),
        }
    }
}

/// Produces a human-readable label and value for a well-known advertisement key.
///
/// Returns `None` for unknown keys, and for known keys whose value is missing or of an unexpected type.
pub fn parse_advertisement_data(key: &str, data: &AdvertisementMap) -> Option<(&'static str, String)> {
    let value = data.get(key)?;
    match (key, value) {
        (keys::LOCAL_NAME, AdvertisementValue::Text(name)) => Some(("Local Name", name.clone())),
        (keys::IS_CONNECTABLE, AdvertisementValue::Bool(flag)) => Some(("Is Connectable", flag.to_string())),
        (keys::IS_CONNECTABLE, AdvertisementValue::Number(flag)) => {
            Some(("Is Connectable", (*flag != 0).to_string()))
        }
        (keys::SERVICE_DATA, AdvertisementValue::ServiceData(entries)) => {
            Some(("Service Data", service_data(entries)))
        }
        (keys::SERVICE_UUIDS, AdvertisementValue::Uuids(uuids)) => Some(("Service UUIDs", uuid_list(uuids))),
        (keys::TX_POWER_LEVEL, AdvertisementValue::Number(level)) => Some(("Tx Power Level", level.to_string())),
        (keys::MANUFACTURER_DATA, AdvertisementValue::Bytes(bytes)) => {
            Some(("Manufacturer Data", text_or_hex(bytes)))
        }
        (keys::OVERFLOW_SERVICE_UUIDS, AdvertisementValue::Uuids(uuids)) => {
            Some(("Overflow Service UUIDs", uuid_list(uuids)))
        }
        (keys::SOLICITED_SERVICE_UUIDS, AdvertisementValue::Uuids(uuids)) => {
            Some(("Solicited Service UUIDs", uuid_list(uuids)))
        }
        _ => None,
    }
}

/// Renders every entry of `data` for display, using the parsed label and value where available and the raw
/// key and value otherwise.
pub fn describe(data: &AdvertisementMap) -> BTreeMap<String, String> {
    data.iter()
        .map(|(key, value)| match parse_advertisement_data(key, data) {
            Some((label, text)) => (label.to_owned(), text),
            None => (key.clone(), value.to_string()),
        })
        .collect()
}

/// Data included in a Bluetooth advertisement or scan reponse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisementData {
    /// The (possibly shortened) local name of the device (CSS §A.1.2)
    pub local_name: Option<String>,
    /// Manufacturer specific data (CSS §A.1.4)
    pub manufacturer_data: Option<ManufacturerData>,
    /// Advertised GATT service UUIDs, including overflow UUIDs (CSS §A.1.1)
    pub services: Vec<Uuid>,
    /// Solicited service UUIDs (CSS §A.1.10)
    pub solicited_services: Vec<Uuid>,
    /// Service associated data (CSS §A.1.11)
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Transmitted power level (CSS §A.1.5)
    pub tx_power_level: Option<i16>,
    /// Set to true for connectable advertising packets
    pub is_connectable: bool,
}

/// Manufacturer specific data included in Bluetooth advertisements. See the Bluetooth Core Specification Supplement
/// §A.1.4 for details.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManufacturerData {
    /// Company identifier (defined [here](https://www.bluetooth.com/specifications/assigned-numbers/company-identifiers/))
    pub company_id: u16,
    /// Manufacturer specific data
    pub data: Vec<u8>,
}

impl AdvertisementData {
    /// Extracts the typed view of a raw advertisement map.
    pub fn from_map(adv_data: &AdvertisementMap) -> Self {
        let is_connectable = match adv_data.get(keys::IS_CONNECTABLE) {
            Some(AdvertisementValue::Bool(flag)) => *flag,
            Some(AdvertisementValue::Number(flag)) => *flag != 0,
            _ => false,
        };

        let local_name = match adv_data.get(keys::LOCAL_NAME) {
            Some(AdvertisementValue::Text(name)) => Some(name.clone()),
            _ => None,
        };

        let manufacturer_data = match adv_data.get(keys::MANUFACTURER_DATA) {
            Some(AdvertisementValue::Bytes(bytes)) => match bytes.as_slice() {
                [lo, hi, data @ ..] => Some(ManufacturerData {
                    company_id: u16::from_le_bytes([*lo, *hi]),
                    data: data.to_vec(),
                }),
                _ => None,
            },
            _ => None,
        };

        let tx_power_level = match adv_data.get(keys::TX_POWER_LEVEL) {
            Some(AdvertisementValue::Number(level)) => i16::try_from(*level).ok(),
            _ => None,
        };

        let service_data = match adv_data.get(keys::SERVICE_DATA) {
            Some(AdvertisementValue::ServiceData(entries)) => {
                entries.iter().map(|(uuid, data)| (*uuid, data.clone())).collect()
            }
            _ => HashMap::new(),
        };

        let uuids = |key: &str| match adv_data.get(key) {
            Some(AdvertisementValue::Uuids(uuids)) => uuids.clone(),
            _ => Vec::new(),
        };
        let mut services = uuids(keys::SERVICE_UUIDS);
        services.extend(uuids(keys::OVERFLOW_SERVICE_UUIDS));

        AdvertisementData {
            local_name,
            manufacturer_data,
            services,
            solicited_services: uuids(keys::SOLICITED_SERVICE_UUIDS),
            service_data,
            tx_power_level,
            is_connectable,
        }
    }

    /// Converts the typed view back into a raw advertisement map, for platforms that report decoded
    /// advertisements.
    pub fn to_map(&self) -> AdvertisementMap {
        let mut map = AdvertisementMap::new();
        if let Some(name) = &self.local_name {
            map.insert(keys::LOCAL_NAME.to_owned(), AdvertisementValue::Text(name.clone()));
        }
        if let Some(manufacturer) = &self.manufacturer_data {
            let mut bytes = manufacturer.company_id.to_le_bytes().to_vec();
            bytes.extend_from_slice(&manufacturer.data);
            map.insert(keys::MANUFACTURER_DATA.to_owned(), AdvertisementValue::Bytes(bytes));
        }
        if !self.services.is_empty() {
            map.insert(
                keys::SERVICE_UUIDS.to_owned(),
                AdvertisementValue::Uuids(self.services.clone()),
            );
        }
        if !self.solicited_services.is_empty() {
            map.insert(
                keys::SOLICITED_SERVICE_UUIDS.to_owned(),
                AdvertisementValue::Uuids(self.solicited_services.clone()),
            );
        }
        if !self.service_data.is_empty() {
            let entries = self.service_data.iter().map(|(k, v)| (*k, v.clone())).collect();
            map.insert(keys::SERVICE_DATA.to_owned(), AdvertisementValue::ServiceData(entries));
        }
        if let Some(level) = self.tx_power_level {
            map.insert(
                keys::TX_POWER_LEVEL.to_owned(),
                AdvertisementValue::Number(i64::from(level)),
            );
        }
        map.insert(
            keys::IS_CONNECTABLE.to_owned(),
            AdvertisementValue::Bool(self.is_connectable),
        );
        map
    }
}
