//! JSON snapshots of devices for remote diagnostics

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::advertisement;
use crate::codec::Encoding;
use crate::gatt::{Characteristic, Service};
use crate::{BluetoothUuidExt, Device};

/// Summary of a device and its GATT database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceData {
    /// Device name, or `"Unnamed"`
    pub local_name: String,
    /// Platform identifier of the device
    pub mac_address: String,
    /// Smoothed RSSI in dBm
    pub rssi: i16,
    /// Signal strength bucket, 0 through 3
    pub signal_strength: u8,
    /// Advertisement entries rendered as text
    pub advertisement_data: BTreeMap<String, String>,
    /// Discovered services
    pub services: Vec<ServiceInfo>,
}

/// A service in a [`DeviceData`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service UUID
    pub uuid: String,
    /// Discovered characteristics
    pub characteristics: Vec<CharacteristicInfo>,
}

/// A characteristic in a [`ServiceInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicInfo {
    /// Characteristic UUID
    pub uuid: String,
    /// Whether reads are supported
    pub read: bool,
    /// Whether writes are supported
    pub write: bool,
    /// Whether notifications are supported
    pub notify: bool,
    /// Assigned name or user description
    pub name: Option<String>,
    /// Cached value rendered with `encoding`
    pub value: Option<String>,
    /// Encoding of `value`
    pub encoding: Option<Encoding>,
}

impl From<&Characteristic> for CharacteristicInfo {
    fn from(characteristic: &Characteristic) -> Self {
        let (value, encoding) = match characteristic.encoded_value() {
            Some((value, encoding)) => (Some(value), Some(encoding)),
            None => (None, None),
        };
        CharacteristicInfo {
            uuid: characteristic.uuid().to_bluetooth_string(),
            read: characteristic.can_read(),
            write: characteristic.can_write(),
            notify: characteristic.can_notify(),
            name: characteristic.name(),
            value,
            encoding,
        }
    }
}

impl From<&Service> for ServiceInfo {
    fn from(service: &Service) -> Self {
        ServiceInfo {
            uuid: service.uuid().to_bluetooth_string(),
            characteristics: service.characteristics().iter().map(CharacteristicInfo::from).collect(),
        }
    }
}

/// Devices offered to a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceList {
    /// Device summaries, in listing order
    pub devices: Vec<DeviceData>,
}

impl DeviceList {
    /// Summarizes `devices`, keeping their order
    pub fn from_devices<'a>(devices: impl IntoIterator<Item = &'a Device>) -> Self {
        DeviceList {
            devices: devices.into_iter().map(Device::device_data).collect(),
        }
    }
}

/// Service entry of [`Diagnostics`]; `name` is omitted for services without an assigned name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDiagnostics {
    /// Service UUID
    pub uuid: String,
    /// Assigned service name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'static str>,
    /// Discovered characteristics
    pub characteristics: Vec<CharacteristicInfo>,
}

/// Diagnostic report for a connected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    /// Device name, or `"Unnamed"`
    pub local_name: String,
    /// Advertisement entries rendered as text
    pub advertisement_data: BTreeMap<String, String>,
    /// Discovered services
    pub services: Vec<ServiceDiagnostics>,
}

impl Diagnostics {
    /// The report as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

const UNNAMED: &str = "Unnamed";

impl Device {
    /// Snapshot of the device for a remote peer
    pub fn device_data(&self) -> DeviceData {
        DeviceData {
            local_name: self.name().unwrap_or_else(|| UNNAMED.to_owned()),
            mac_address: self.id().to_string(),
            rssi: self.rssi(),
            signal_strength: self.signal_strength().bucket(),
            advertisement_data: advertisement::describe(&self.advertisement_data()),
            services: self.services().iter().map(ServiceInfo::from).collect(),
        }
    }

    /// Diagnostic report of the device
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            local_name: self.name().unwrap_or_else(|| UNNAMED.to_owned()),
            advertisement_data: advertisement::describe(&self.advertisement_data()),
            services: self
                .services()
                .iter()
                .map(|service| ServiceDiagnostics {
                    uuid: service.uuid().to_bluetooth_string(),
                    name: service.name(),
                    characteristics: service.characteristics().iter().map(CharacteristicInfo::from).collect(),
                })
                .collect(),
        }
    }
}
