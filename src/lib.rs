#![warn(missing_docs)]

//! Gattlink is a session and transaction engine for [Bluetooth Low Energy] (BLE) central applications written
//! in [Rust].
//!
//! Gattlink does not talk to the radio itself. The platform's Bluetooth driver is plugged in behind the
//! [`RadioAdapter`] trait, which issues commands, and reports back through [`CentralEvent`]s and
//! [`PeripheralEvent`]s. On top of that Gattlink tracks discovered devices, manages connections, and
//! correlates every read, write and notification request with the callback that completes it.
//!
//! [Rust]: https://www.rust-lang.org/
//! [Bluetooth Low Energy]: https://www.bluetooth.com/specifications/specs/
//!
//! # Usage
//!
//! ```rust,no_run
//!# use std::sync::Arc;
//!# use gattlink::{DeviceId, GattPath, RadioAdapter, Uuid, WriteKind};
//!# struct Driver;
//!# impl RadioAdapter for Driver {
//!#     fn start_scan(&self, _: bool) {}
//!#     fn stop_scan(&self) {}
//!#     fn connect(&self, _: DeviceId) {}
//!#     fn cancel_connect(&self, _: DeviceId) {}
//!#     fn discover_services(&self, _: DeviceId) {}
//!#     fn discover_characteristics(&self, _: DeviceId, _: Uuid) {}
//!#     fn discover_descriptors(&self, _: DeviceId, _: GattPath) {}
//!#     fn read_characteristic(&self, _: DeviceId, _: GattPath) {}
//!#     fn read_descriptor(&self, _: DeviceId, _: GattPath, _: Uuid) {}
//!#     fn write_characteristic(&self, _: DeviceId, _: GattPath, _: &[u8], _: WriteKind) {}
//!#     fn set_notify(&self, _: DeviceId, _: GattPath, _: bool) {}
//!# }
//!# async fn example() -> gattlink::Result<()> {
//!use gattlink::Session;
//!
//!let session = Session::new(Arc::new(Driver));
//!session.start_scanning().await?;
//!
//!// Platform glue feeds advertisements in through `Session::handle_central_event`.
//!if let Some(device) = session.valid_devices().into_iter().next() {
//!    device.connect(true).await?;
//!    if let Some(level) = device.get_characteristic("2A19") {
//!        let value = device.read_value(&level).await?;
//!        println!("{}: {:?}", device, value);
//!    }
//!}
//!#
//!#    Ok(())
//!# }
//! ```
//!
//! # Overview
//!
//! - Radio state and scanning: [`Session::start_scanning`] waits until the radio is powered on and authorized.
//! - Device tracking: advertisements are merged into one [`Device`] per identifier with smoothed RSSI, and
//!   [`Session::valid_devices`] lists the devices seen recently.
//! - Connections: [`Session::connect`] is single-flight and bounded by a timeout; [`Device::connect`] retries.
//! - GATT: services, characteristics and descriptors are discovered automatically after connecting.
//!   [`Device::read_value`], [`Device::write_value`] and [`Device::set_notify`] complete in order per
//!   characteristic, time out independently, and fail with [`ErrorKind::NoConnectedDevice`] on disconnect.
//! - Values: [`codec`] decodes fixed-width payloads and [`presentation`] renders values using the
//!   characteristic's presentation format descriptor.
//! - Remote support: [`RemoteSupport`] answers JSON requests from a remote agent with device snapshots and
//!   transactions. [`RemoteSupport::run`] keeps the agent informed and reconnects the selected device.
//!
//! # Asynchronous runtimes
//!
//! Gattlink does not spawn tasks and uses runtime-agnostic timers, so its futures can be driven by any
//! executor. Long-running work such as [`RemoteSupport::run`] is a future for the application to spawn. Adapter implementations may deliver events synchronously from inside a command.

mod adapter;
pub mod advertisement;
pub mod btuuid;
pub mod codec;
mod config;
mod device;
mod diagnostics;
pub mod error;
mod event;
mod gatt;
mod observer;
pub mod presentation;
mod session;
mod support;
mod transaction;
mod util;

pub use adapter::{GattPath, RadioAdapter, RadioState, WriteKind};
pub use advertisement::{AdvertisementData, AdvertisementMap, AdvertisementValue, ManufacturerData};
pub use btuuid::BluetoothUuidExt;
pub use codec::{Encoding, FixedWidth};
pub use config::SessionConfig;
pub use device::{ConnectionState, Device, DeviceId, SignalStrength};
pub use diagnostics::{CharacteristicInfo, DeviceData, DeviceList, Diagnostics, ServiceDiagnostics, ServiceInfo};
pub use error::{Error, ErrorKind};
pub use event::{CentralEvent, DiscoveredCharacteristic, PeripheralEvent};
pub use gatt::{Characteristic, CharacteristicProperties, Descriptor, Service};
pub use observer::{Observer, PeripheralObserver, SessionObserver};
pub use presentation::PresentationFormat;
pub use session::Session;
pub use support::{
    BluetoothConnectRequest, BluetoothNotifyRequest, BluetoothReadRequest, BluetoothReadResponse,
    BluetoothWriteRequest, ConnectionStatus, MessageCategory, RemoteSupport, SupportError, SupportTransport,
    INTERNAL_ERROR,
};
pub use uuid::Uuid;

/// Convenience alias for a result with [`Error`]
pub type Result<T, E = Error> = core::result::Result<T, E>;
