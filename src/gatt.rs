//! GATT database of a connected device
//!
//! The database is stored as an arena: a device owns a list of services and a flat list of characteristics.
//! Services refer to their characteristics by index and each characteristic records the index of its
//! service. The public [`Service`], [`Characteristic`] and [`Descriptor`] types are snapshots copied out of
//! the arena.

use uuid::Uuid;

use crate::adapter::GattPath;
use crate::btuuid::{self, descriptors};
use crate::codec::Encoding;
use crate::event::DiscoveredCharacteristic;
use crate::presentation::{self, PresentationFormat};

/// GATT characteristic properties as defined in the Bluetooth Core Specification, Vol 3, Part G, §3.3.1.1.
/// Extended properties are also included as defined in §3.3.3.1.
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
    pub reliable_write: bool,
    pub writable_auxiliaries: bool,
}

impl CharacteristicProperties {
    /// Raw transmutation from [`u32`].
    ///
    /// Extended properties are in the upper bits.
    pub fn from_bits(bits: u32) -> Self {
        let bit = |n: u32| bits & (1 << n) != 0;
        CharacteristicProperties {
            broadcast: bit(0),
            read: bit(1),
            write_without_response: bit(2),
            write: bit(3),
            notify: bit(4),
            indicate: bit(5),
            authenticated_signed_writes: bit(6),
            extended_properties: bit(7),
            reliable_write: bit(8),
            writable_auxiliaries: bit(9),
        }
    }

    /// Raw transmutation to [`u32`].
    pub fn to_bits(self) -> u32 {
        [
            self.broadcast,
            self.read,
            self.write_without_response,
            self.write,
            self.notify,
            self.indicate,
            self.authenticated_signed_writes,
            self.extended_properties,
            self.reliable_write,
            self.writable_auxiliaries,
        ]
        .iter()
        .enumerate()
        .fold(0, |bits, (n, set)| bits | (u32::from(*set) << n))
    }
}

/// A GATT descriptor and its last read value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    uuid: Uuid,
    value: Option<Vec<u8>>,
}

impl Descriptor {
    /// The [`Uuid`] identifying the type of this descriptor
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The last value read from the device
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }
}

/// Snapshot of a GATT characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    path: GattPath,
    properties: CharacteristicProperties,
    value: Option<Vec<u8>>,
    notifying: bool,
    descriptors: Vec<Descriptor>,
}

impl Characteristic {
    /// The [`Uuid`] identifying the type of this characteristic
    pub fn uuid(&self) -> Uuid {
        self.path.characteristic
    }

    /// The [`Uuid`] of the service containing this characteristic
    pub fn service_uuid(&self) -> Uuid {
        self.path.service
    }

    /// Location of this characteristic in the device's database
    pub fn path(&self) -> GattPath {
        self.path
    }

    /// Capability flags
    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    /// Returns `true` if the characteristic supports reads
    pub fn can_read(&self) -> bool {
        self.properties.read
    }

    /// Returns `true` if the characteristic supports writes with response
    pub fn can_write(&self) -> bool {
        self.properties.write
    }

    /// Returns `true` if the characteristic supports notifications
    pub fn can_notify(&self) -> bool {
        self.properties.notify
    }

    /// Whether notifications are currently enabled
    pub fn is_notifying(&self) -> bool {
        self.notifying
    }

    /// The cached value of this characteristic
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Discovered descriptors
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// Finds a discovered descriptor by UUID
    pub fn descriptor(&self, uuid: Uuid) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.uuid == uuid)
    }

    /// The assigned name of the characteristic, else its user description.
    pub fn name(&self) -> Option<String> {
        btuuid::assigned_name(&self.uuid()).map(String::from).or_else(|| {
            self.descriptor(descriptors::CHARACTERISTIC_USER_DESCRIPTION)
                .and_then(Descriptor::value)
                .and_then(|bytes| std::str::from_utf8(bytes).ok())
                .map(String::from)
        })
    }

    /// The decoded presentation format descriptor, if one has been read.
    pub fn presentation_format(&self) -> Option<PresentationFormat> {
        self.format_descriptor()
            .and_then(|descriptor| PresentationFormat::parse(descriptor).ok())
    }

    fn format_descriptor(&self) -> Option<&[u8]> {
        self.descriptor(descriptors::CHARACTERISTIC_PRESENTATION_FORMAT)
            .and_then(Descriptor::value)
    }

    /// The cached value rendered for display, honouring the presentation format.
    pub fn display_value(&self) -> Option<String> {
        let value = self.value.as_deref()?;
        Some(presentation::display_value(value, self.format_descriptor()))
    }

    /// The cached value as text with the encoding used to produce it.
    pub fn encoded_value(&self) -> Option<(String, Encoding)> {
        self.value.as_deref().map(Encoding::render)
    }
}

/// Snapshot of a GATT service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    uuid: Uuid,
    characteristics: Vec<Characteristic>,
}

impl Service {
    /// The [`Uuid`] identifying the type of this service
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The assigned name of the service
    pub fn name(&self) -> Option<&'static str> {
        btuuid::services::name(&self.uuid)
    }

    /// Discovered characteristics
    pub fn characteristics(&self) -> &[Characteristic] {
        &self.characteristics
    }
}

#[derive(Debug)]
struct ServiceNode {
    uuid: Uuid,
    characteristics: Vec<usize>,
}

#[derive(Debug)]
struct CharacteristicNode {
    uuid: Uuid,
    service: usize,
    properties: CharacteristicProperties,
    value: Option<Vec<u8>>,
    notifying: bool,
    descriptors: Vec<Descriptor>,
}

#[derive(Debug, Default)]
pub(crate) struct GattTree {
    services: Vec<ServiceNode>,
    characteristics: Vec<CharacteristicNode>,
}

impl GattTree {
    pub fn clear(&mut self) {
        self.services.clear();
        self.characteristics.clear();
    }

    /// Replaces the service list. Characteristics are rediscovered per service afterwards.
    pub fn set_services(&mut self, uuids: &[Uuid]) {
        self.clear();
        self.services = uuids
            .iter()
            .map(|&uuid| ServiceNode {
                uuid,
                characteristics: Vec::new(),
            })
            .collect();
    }

    pub fn set_characteristics(&mut self, service: Uuid, discovered: &[DiscoveredCharacteristic]) -> Option<Service> {
        let service_index = self.services.iter().position(|s| s.uuid == service)?;

        let mut indices = Vec::with_capacity(discovered.len());
        for found in discovered {
            let existing = self.services[service_index]
                .characteristics
                .iter()
                .copied()
                .find(|&i| self.characteristics[i].uuid == found.uuid);
            let index = match existing {
                Some(index) => {
                    self.characteristics[index].properties = found.properties;
                    index
                }
                None => {
                    self.characteristics.push(CharacteristicNode {
                        uuid: found.uuid,
                        service: service_index,
                        properties: found.properties,
                        value: None,
                        notifying: false,
                        descriptors: Vec::new(),
                    });
                    self.characteristics.len() - 1
                }
            };
            indices.push(index);
        }
        self.services[service_index].characteristics = indices;
        Some(self.service_snapshot(service_index))
    }

    pub fn set_descriptors(&mut self, path: GattPath, uuids: &[Uuid]) -> Option<Characteristic> {
        let index = self.index(path)?;
        let node = &mut self.characteristics[index];
        let previous = std::mem::take(&mut node.descriptors);
        node.descriptors = uuids
            .iter()
            .map(|&uuid| Descriptor {
                uuid,
                value: previous.iter().find(|d| d.uuid == uuid).and_then(|d| d.value.clone()),
            })
            .collect();
        Some(self.snapshot(index))
    }

    pub fn set_descriptor_value(
        &mut self,
        path: GattPath,
        descriptor: Uuid,
        value: Option<Vec<u8>>,
    ) -> Option<(Characteristic, Descriptor)> {
        let index = self.index(path)?;
        let node = &mut self.characteristics[index];
        let slot = match node.descriptors.iter().position(|d| d.uuid == descriptor) {
            Some(slot) => slot,
            None => {
                node.descriptors.push(Descriptor {
                    uuid: descriptor,
                    value: None,
                });
                node.descriptors.len() - 1
            }
        };
        node.descriptors[slot].value = value;
        let updated = node.descriptors[slot].clone();
        Some((self.snapshot(index), updated))
    }

    pub fn set_value(&mut self, path: GattPath, value: Option<Vec<u8>>) -> Option<Characteristic> {
        let index = self.index(path)?;
        self.characteristics[index].value = value;
        Some(self.snapshot(index))
    }

    pub fn set_notifying(&mut self, path: GattPath, enabled: bool) -> Option<Characteristic> {
        let index = self.index(path)?;
        self.characteristics[index].notifying = enabled;
        Some(self.snapshot(index))
    }

    pub fn characteristic(&self, path: GattPath) -> Option<Characteristic> {
        self.index(path).map(|index| self.snapshot(index))
    }

    /// Finds the first characteristic with `uuid` in any service.
    pub fn find(&self, uuid: Uuid) -> Option<Characteristic> {
        self.services
            .iter()
            .flat_map(|service| service.characteristics.iter().copied())
            .find(|&i| self.characteristics[i].uuid == uuid)
            .map(|i| self.snapshot(i))
    }

    pub fn services(&self) -> Vec<Service> {
        (0..self.services.len()).map(|i| self.service_snapshot(i)).collect()
    }

    fn index(&self, path: GattPath) -> Option<usize> {
        self.services
            .iter()
            .find(|service| service.uuid == path.service)?
            .characteristics
            .iter()
            .copied()
            .find(|&i| self.characteristics[i].uuid == path.characteristic)
    }

    fn snapshot(&self, index: usize) -> Characteristic {
        let node = &self.characteristics[index];
        Characteristic {
            path: GattPath::new(self.services[node.service].uuid, node.uuid),
            properties: node.properties,
            value: node.value.clone(),
            notifying: node.notifying,
            descriptors: node.descriptors.clone(),
        }
    }

    fn service_snapshot(&self, index: usize) -> Service {
        let node = &self.services[index];
        Service {
            uuid: node.uuid,
            characteristics: node.characteristics.iter().map(|&i| self.snapshot(i)).collect(),
        }
    }
}
