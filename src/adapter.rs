use std::fmt;

use crate::error::ErrorKind;
use crate::{DeviceId, Result, Uuid};

/// Power and authorization state of the platform's Bluetooth radio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RadioState {
    /// The state has not been reported yet
    #[default]
    Unknown,
    /// The connection with the system Bluetooth service was momentarily lost
    Resetting,
    /// The platform does not support Bluetooth Low Energy
    Unsupported,
    /// The application is not authorized to use Bluetooth
    Unauthorized,
    /// Bluetooth is turned off
    PoweredOff,
    /// Bluetooth is on and available
    PoweredOn,
}

impl RadioState {
    /// Returns `true` if scanning and connecting are permitted.
    pub fn is_powered_on(self) -> bool {
        self == RadioState::PoweredOn
    }

    /// The error reported to callers while the radio is in this state, or `None` when powered on.
    pub fn error_kind(self) -> Option<ErrorKind> {
        match self {
            RadioState::PoweredOn => None,
            RadioState::Unknown => Some(ErrorKind::NotReady),
            RadioState::Resetting => Some(ErrorKind::Resetting),
            RadioState::Unsupported => Some(ErrorKind::Unsupported),
            RadioState::Unauthorized => Some(ErrorKind::NotAuthorized),
            RadioState::PoweredOff => Some(ErrorKind::PoweredOff),
        }
    }

    pub(crate) fn check(self) -> Result<()> {
        match self.error_kind() {
            None => Ok(()),
            Some(kind) => Err(kind.into()),
        }
    }
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RadioState::Unknown => "unknown",
            RadioState::Resetting => "resetting",
            RadioState::Unsupported => "unsupported",
            RadioState::Unauthorized => "unauthorized",
            RadioState::PoweredOff => "poweredOff",
            RadioState::PoweredOn => "poweredOn",
        })
    }
}

/// Location of a characteristic within a device's GATT database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GattPath {
    /// UUID of the service containing the characteristic
    pub service: Uuid,
    /// UUID of the characteristic
    pub characteristic: Uuid,
}

impl GattPath {
    /// Creates a path from a service and characteristic UUID
    pub fn new(service: Uuid, characteristic: Uuid) -> Self {
        GattPath { service, characteristic }
    }
}

impl fmt::Display for GattPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

/// How a characteristic write is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    /// The peripheral acknowledges the write
    WithResponse,
    /// Fire-and-forget write
    WithoutResponse,
}

/// Outbound commands to the platform Bluetooth driver.
///
/// Every method only issues the request. Results come back later as
/// [`CentralEvent`](crate::CentralEvent)s and [`PeripheralEvent`](crate::PeripheralEvent)s fed into the
/// [`Session`](crate::Session). Implementations may deliver those events synchronously from inside a command.
pub trait RadioAdapter: Send + Sync {
    /// Starts scanning for advertisements from any peripheral
    fn start_scan(&self, allow_duplicates: bool);

    /// Stops an ongoing scan
    fn stop_scan(&self);

    /// Starts connecting to a peripheral
    fn connect(&self, device: DeviceId);

    /// Cancels a pending connection or disconnects an established one
    fn cancel_connect(&self, device: DeviceId);

    /// Discovers all services of a connected peripheral
    fn discover_services(&self, device: DeviceId);

    /// Discovers all characteristics of a service
    fn discover_characteristics(&self, device: DeviceId, service: Uuid);

    /// Discovers the descriptors of a characteristic
    fn discover_descriptors(&self, device: DeviceId, characteristic: GattPath);

    /// Reads the value of a characteristic
    fn read_characteristic(&self, device: DeviceId, characteristic: GattPath);

    /// Reads the value of a descriptor
    fn read_descriptor(&self, device: DeviceId, characteristic: GattPath, descriptor: Uuid);

    /// Writes the value of a characteristic
    fn write_characteristic(&self, device: DeviceId, characteristic: GattPath, value: &[u8], kind: WriteKind);

    /// Enables or disables notifications for a characteristic
    fn set_notify(&self, device: DeviceId, characteristic: GattPath, enabled: bool);
}
