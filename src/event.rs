//! Inbound callbacks from the platform Bluetooth driver

use uuid::Uuid;

use crate::adapter::{GattPath, RadioState};
use crate::advertisement::AdvertisementMap;
use crate::error::AttError;
use crate::gatt::CharacteristicProperties;
use crate::DeviceId;

/// Events reported by the platform's central manager. Fed into
/// [`Session::handle_central_event`](crate::Session::handle_central_event).
#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    /// The radio changed state
    StateChanged(RadioState),
    /// An advertisement was received
    Discovered {
        /// The advertising peripheral
        device: DeviceId,
        /// The platform's cached name for the peripheral
        name: Option<String>,
        /// Raw advertisement data
        adv_data: AdvertisementMap,
        /// Signal strength of the advertisement in dBm
        rssi: i16,
    },
    /// A connection was established
    Connected {
        /// The connected peripheral
        device: DeviceId,
    },
    /// A connection attempt failed
    ConnectFailed {
        /// The peripheral
        device: DeviceId,
        /// Error reported by the driver
        error: Option<AttError>,
    },
    /// A connection was closed or cancelled
    Disconnected {
        /// The peripheral
        device: DeviceId,
        /// Error reported by the driver
        error: Option<AttError>,
    },
}

/// A characteristic reported by service discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveredCharacteristic {
    /// Characteristic UUID
    pub uuid: Uuid,
    /// Capability flags
    pub properties: CharacteristicProperties,
}

/// Events reported for a single connected peripheral. Fed into
/// [`Session::handle_peripheral_event`](crate::Session::handle_peripheral_event).
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum PeripheralEvent {
    DiscoveredServices {
        services: Vec<Uuid>,
        error: Option<AttError>,
    },
    DiscoveredCharacteristics {
        service: Uuid,
        characteristics: Vec<DiscoveredCharacteristic>,
        error: Option<AttError>,
    },
    DiscoveredDescriptors {
        characteristic: GattPath,
        descriptors: Vec<Uuid>,
        error: Option<AttError>,
    },
    DescriptorValueUpdate {
        characteristic: GattPath,
        descriptor: Uuid,
        value: Option<Vec<u8>>,
        error: Option<AttError>,
    },
    /// A read completed or a notification arrived
    CharacteristicValueUpdate {
        characteristic: GattPath,
        value: Option<Vec<u8>>,
        error: Option<AttError>,
    },
    CharacteristicValueWrite {
        characteristic: GattPath,
        error: Option<AttError>,
    },
    NotificationStateUpdate {
        characteristic: GattPath,
        enabled: bool,
        error: Option<AttError>,
    },
    ReadRssi {
        rssi: i16,
        error: Option<AttError>,
    },
    NameUpdate {
        name: Option<String>,
    },
}
