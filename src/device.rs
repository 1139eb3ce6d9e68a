use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{self, AtomicU64, AtomicUsize};
use std::sync::{Arc, Weak};
use std::time::{Instant, SystemTime};

use async_lock::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapter::{GattPath, RadioAdapter, WriteKind};
use crate::advertisement::{keys, AdvertisementData, AdvertisementMap, AdvertisementValue};
use crate::config::SessionConfig;
use crate::error::ErrorKind;
use crate::event::PeripheralEvent;
use crate::gatt::{Characteristic, GattTree, Service};
use crate::observer::{PeripheralObserver, Registry};
use crate::session::{Session, SessionInner};
use crate::transaction::{self, Completion, OperationId, PendingQueue};
use crate::util::{self, defer};
use crate::{BluetoothUuidExt, Error, Result, Uuid};

/// Platform identifier of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Wraps a platform peripheral identifier
    pub const fn new(uuid: Uuid) -> Self {
        DeviceId(uuid)
    }

    /// The underlying identifier
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for DeviceId {
    fn from(uuid: Uuid) -> Self {
        DeviceId(uuid)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim()).map(DeviceId).map_err(|err| {
            Error::new(
                ErrorKind::InvalidParameter,
                Some(Arc::new(err)),
                format!("invalid device identifier {s:?}"),
            )
        })
    }
}

/// Connection lifecycle of a [`Device`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Coarse signal strength bucket derived from RSSI.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignalStrength {
    /// RSSI outside every bucket, including unusable readings above 0 dBm
    #[default]
    Unknown = 0,
    /// -84 ..= -60 dBm
    Low = 1,
    /// -59 ..= -40 dBm
    Medium = 2,
    /// -39 ..= 0 dBm
    High = 3,
}

impl SignalStrength {
    /// Buckets an RSSI reading in dBm
    pub fn from_rssi(rssi: i16) -> Self {
        match rssi {
            -84..=-60 => SignalStrength::Low,
            -59..=-40 => SignalStrength::Medium,
            -39..=0 => SignalStrength::High,
            _ => SignalStrength::Unknown,
        }
    }

    /// Numeric bucket, 0 through 3
    pub fn bucket(self) -> u8 {
        self as u8
    }
}

struct DeviceState {
    name: Option<String>,
    adv_data: AdvertisementMap,
    rssi: i16,
    last_seen: SystemTime,
    connection: ConnectionState,
    gatt: GattTree,
}

struct Transactions {
    reads: PendingQueue<GattPath, Vec<u8>>,
    writes: PendingQueue<GattPath, ()>,
    notify: PendingQueue<GattPath, ()>,
}

impl Transactions {
    fn len(&self) -> usize {
        self.reads.len() + self.writes.len() + self.notify.len()
    }
}

pub(crate) struct DeviceInner {
    id: DeviceId,
    adapter: Arc<dyn RadioAdapter>,
    session: Weak<SessionInner>,
    config: Arc<SessionConfig>,
    state: Mutex<DeviceState>,
    transactions: Mutex<Transactions>,
    reconnecting: AtomicUsize,
    disconnects: AtomicU64,
    observers: Registry<dyn PeripheralObserver>,
}

/// A Bluetooth LE peripheral seen by a [`Session`]
///
/// `Device` is a cheap handle; clones refer to the same peripheral state.
#[derive(Clone)]
pub struct Device(pub(crate) Arc<DeviceInner>);

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Device {}

impl std::hash::Hash for Device {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.0.id)
            .field("name", &self.name())
            .finish()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(&name),
            None => write!(f, "{}", self.0.id),
        }
    }
}

impl Device {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: DeviceId,
        session: Weak<SessionInner>,
        adapter: Arc<dyn RadioAdapter>,
        config: Arc<SessionConfig>,
        name: Option<String>,
        adv_data: AdvertisementMap,
        rssi: i16,
        seen: SystemTime,
    ) -> Self {
        Device(Arc::new(DeviceInner {
            id,
            adapter,
            session,
            config,
            state: Mutex::new(DeviceState {
                name,
                adv_data,
                rssi,
                last_seen: seen,
                connection: ConnectionState::Disconnected,
                gatt: GattTree::default(),
            }),
            transactions: Mutex::new(Transactions {
                reads: PendingQueue::new(),
                writes: PendingQueue::new(),
                notify: PendingQueue::new(),
            }),
            reconnecting: AtomicUsize::new(0),
            disconnects: AtomicU64::new(0),
            observers: Registry::new(),
        }))
    }

    /// This device's unique identifier
    pub fn id(&self) -> DeviceId {
        self.0.id
    }

    /// The platform name of the device, else its advertised local name
    pub fn name(&self) -> Option<String> {
        let state = self.0.state.lock_blocking();
        state.name.clone().or_else(|| match state.adv_data.get(keys::LOCAL_NAME) {
            Some(AdvertisementValue::Text(name)) => Some(name.clone()),
            _ => None,
        })
    }

    /// The smoothed signal strength in dBm
    pub fn rssi(&self) -> i16 {
        self.0.state.lock_blocking().rssi
    }

    /// The signal strength bucket of [`rssi`](Self::rssi)
    pub fn signal_strength(&self) -> SignalStrength {
        SignalStrength::from_rssi(self.rssi())
    }

    /// When the last advertisement from this device was received
    pub fn last_seen(&self) -> SystemTime {
        self.0.state.lock_blocking().last_seen
    }

    /// Whether the device has advertised recently enough to be listed.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(SystemTime::now())
    }

    /// Whether the device would be considered present at `now`.
    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        if self.0.id.uuid().is_nil() {
            return false;
        }
        match now.duration_since(self.last_seen()) {
            Ok(age) => age <= self.0.config.validity_window,
            Err(_) => true,
        }
    }

    /// The merged raw advertisement data
    pub fn advertisement_data(&self) -> AdvertisementMap {
        self.0.state.lock_blocking().adv_data.clone()
    }

    /// The typed view of [`advertisement_data`](Self::advertisement_data)
    pub fn advertisement(&self) -> AdvertisementData {
        AdvertisementData::from_map(&self.0.state.lock_blocking().adv_data)
    }

    /// The connection status for this device
    pub fn connection_state(&self) -> ConnectionState {
        self.0.state.lock_blocking().connection
    }

    /// Returns `true` while a connection is established
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Returns `true` while [`connect`](Self::connect) is in progress
    pub fn is_reconnecting(&self) -> bool {
        self.0.reconnecting.load(atomic::Ordering::SeqCst) > 0
    }

    /// Number of reads, writes and notification changes awaiting a response
    pub fn pending_operations(&self) -> usize {
        self.0.transactions.lock_blocking().len()
    }

    /// Discovered services
    pub fn services(&self) -> Vec<Service> {
        self.0.state.lock_blocking().gatt.services()
    }

    /// Looks up a discovered characteristic by its location
    pub fn characteristic(&self, path: GattPath) -> Option<Characteristic> {
        self.0.state.lock_blocking().gatt.characteristic(path)
    }

    /// Finds a discovered characteristic in any service.
    ///
    /// `uuid` may be a 16-bit, 32-bit or 128-bit UUID string in either case.
    pub fn get_characteristic(&self, uuid: &str) -> Option<Characteristic> {
        let uuid = Uuid::parse_bluetooth_str(uuid)?;
        self.0.state.lock_blocking().gatt.find(uuid)
    }

    /// Registers a peripheral observer. Returns `false` if one with the same id is already registered.
    pub fn subscribe<O: PeripheralObserver + 'static>(&self, observer: &Arc<O>) -> bool {
        let weak = Arc::downgrade(observer);
        let weak: Weak<dyn PeripheralObserver> = weak;
        self.0.observers.subscribe(observer.observer_id(), weak)
    }

    /// Removes the peripheral observer registered under `id`
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.0.observers.unsubscribe(id)
    }

    fn session(&self) -> Result<Session> {
        self.0
            .session
            .upgrade()
            .map(Session)
            .ok_or_else(|| Error::new(ErrorKind::Internal, None, "the session owning this device was dropped"))
    }

    /// Connects to the device, retrying failed attempts when `with_retries` is set.
    ///
    /// Retries stop early, with success, once [`disconnect`](Self::disconnect) is called after this call
    /// started. Other failures, including the radio going away, are returned once the attempts run out.
    pub async fn connect(&self, with_retries: bool) -> Result<()> {
        let session = self.session()?;
        let attempts = if with_retries { self.0.config.connect_attempts } else { 1 };

        let generation = self.0.disconnects.load(atomic::Ordering::SeqCst);
        self.0.reconnecting.fetch_add(1, atomic::Ordering::SeqCst);
        let _settled = defer(|| {
            self.0.reconnecting.fetch_sub(1, atomic::Ordering::SeqCst);
        });

        let device = self;
        let session = &session;
        util::retry(attempts, self.0.config.retry_delay, move || async move {
            if device.0.disconnects.load(atomic::Ordering::SeqCst) == generation {
                session.connect(device).await
            } else {
                debug!("Reconnect to {} was cancelled", device);
                Ok(())
            }
        })
        .await
    }

    /// Stops reconnecting and disconnects from the device.
    pub fn disconnect(&self) {
        self.0.disconnects.fetch_add(1, atomic::Ordering::SeqCst);
        match self.session() {
            Ok(session) => session.disconnect(self),
            Err(_) => self.0.adapter.cancel_connect(self.0.id),
        }
    }

    fn enqueue<T: Clone>(
        &self,
        queue: impl FnOnce(&mut Transactions) -> &mut PendingQueue<GattPath, T>,
        path: GattPath,
        deadline: Option<Instant>,
    ) -> Result<(OperationId, Completion<T>)> {
        let mut transactions = self.0.transactions.lock_blocking();
        // A disconnect between the caller's check and here must not strand the operation.
        if !self.is_connected() {
            return Err(ErrorKind::NotConnected.into());
        }
        Ok(queue(&mut transactions).push(path, deadline))
    }

    /// Reads the value of `characteristic` from the device.
    pub async fn read_value(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        if !self.is_connected() {
            return Err(ErrorKind::NotConnected.into());
        }
        if !characteristic.can_read() {
            return Err(ErrorKind::CharacteristicNotReadable.into());
        }

        let path = characteristic.path();
        let deadline = Instant::now() + self.0.config.read_timeout;
        let (id, completion) = self.enqueue(|t| &mut t.reads, path, Some(deadline))?;
        self.0.adapter.read_characteristic(self.0.id, path);

        transaction::wait(completion, Some(deadline), || {
            let expired = self.0.transactions.lock_blocking().reads.expire(
                &path,
                id,
                ErrorKind::ReadTimeout.into(),
            );
            if expired {
                warn!("Reading {} from {} timed out", path, self);
            }
        })
        .await
    }

    /// Writes `value` to `characteristic` and waits for the device to acknowledge it.
    pub async fn write_value(&self, characteristic: &Characteristic, value: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(ErrorKind::NotConnected.into());
        }
        if !characteristic.can_write() {
            return Err(ErrorKind::CharacteristicNotWritable.into());
        }

        let path = characteristic.path();
        let deadline = Instant::now() + self.0.config.write_timeout;
        let (id, completion) = self.enqueue(|t| &mut t.writes, path, Some(deadline))?;
        self.0
            .adapter
            .write_characteristic(self.0.id, path, value, WriteKind::WithResponse);

        transaction::wait(completion, Some(deadline), || {
            let expired = self.0.transactions.lock_blocking().writes.expire(
                &path,
                id,
                ErrorKind::WriteTimeout.into(),
            );
            if expired {
                warn!("Writing {} on {} timed out", path, self);
            }
        })
        .await
    }

    /// Enables or disables notifications for `characteristic`.
    pub async fn set_notify(&self, characteristic: &Characteristic, enabled: bool) -> Result<()> {
        if !self.is_connected() {
            return Err(ErrorKind::NotConnected.into());
        }
        if !characteristic.can_notify() {
            return Err(ErrorKind::CharacteristicNotNotifiable.into());
        }

        let path = characteristic.path();
        let deadline = self.0.config.notify_timeout.map(|timeout| Instant::now() + timeout);
        let (id, completion) = self.enqueue(|t| &mut t.notify, path, deadline)?;
        self.0.adapter.set_notify(self.0.id, path, enabled);

        transaction::wait(completion, deadline, || {
            let expired = self.0.transactions.lock_blocking().notify.expire(
                &path,
                id,
                ErrorKind::NotifyTimeout.into(),
            );
            if expired {
                warn!("Changing notifications for {} on {} timed out", path, self);
            }
        })
        .await
    }

    /// Asks the device for the current value of `characteristic` without waiting for it. The value arrives
    /// as an update to the characteristic and is reported to peripheral observers.
    pub(crate) fn refresh_value(&self, characteristic: &Characteristic) -> Result<()> {
        if !self.is_connected() {
            return Err(ErrorKind::NotConnected.into());
        }
        if !characteristic.can_read() {
            return Err(ErrorKind::CharacteristicNotReadable.into());
        }
        self.0.adapter.read_characteristic(self.0.id, characteristic.path());
        Ok(())
    }

    pub(crate) fn merge_advertisement(
        &self,
        name: Option<String>,
        adv_data: AdvertisementMap,
        rssi: i16,
        seen: SystemTime,
    ) {
        let mut state = self.0.state.lock_blocking();
        state.last_seen = seen;
        if rssi.abs_diff(state.rssi) >= self.0.config.rssi_smoothing_threshold {
            state.rssi = rssi;
        }
        state.adv_data.extend(adv_data);
        if name.is_some() {
            state.name = name;
        }
    }

    pub(crate) fn set_connection_state(&self, connection: ConnectionState) {
        let previous = std::mem::replace(&mut self.0.state.lock_blocking().connection, connection);
        if previous != connection {
            debug!("{} is {:?}", self, connection);
        }
        if connection == ConnectionState::Disconnected {
            self.flush(ErrorKind::NoConnectedDevice);
        }
    }

    /// Forgets the connection and rejects everything pending with `kind`.
    pub(crate) fn teardown(&self, kind: ErrorKind) {
        self.0.state.lock_blocking().connection = ConnectionState::Disconnected;
        self.flush(kind);
    }

    fn flush(&self, kind: ErrorKind) {
        let error = Error::from(kind);
        let flushed = {
            let mut transactions = self.0.transactions.lock_blocking();
            transactions.reads.drain(error.clone())
                + transactions.writes.drain(error.clone())
                + transactions.notify.drain(error)
        };
        if flushed > 0 {
            info!("Rejected {} pending operations on {}: {}", flushed, self, kind);
        }
    }

    fn observers(&self) -> Vec<Arc<dyn PeripheralObserver>> {
        self.0.observers.snapshot()
    }

    pub(crate) fn handle_event(&self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::DiscoveredServices { services, error } => {
                if let Some(err) = error {
                    warn!("Error discovering services for {}: {}", self, err);
                    return;
                }
                debug!("Discovered {} services on {}", services.len(), self);
                let snapshot = {
                    let mut state = self.0.state.lock_blocking();
                    state.gatt.set_services(&services);
                    state.gatt.services()
                };
                for service in services {
                    if !self.is_connected() {
                        debug!("{} disconnected during service discovery", self);
                        break;
                    }
                    self.0.adapter.discover_characteristics(self.0.id, service);
                }
                for observer in self.observers() {
                    observer.did_discover_services(self, &snapshot);
                }
            }
            PeripheralEvent::DiscoveredCharacteristics {
                service,
                characteristics,
                error,
            } => {
                if let Some(err) = error {
                    warn!("Error discovering characteristics of {} on {}: {}", service, self, err);
                    return;
                }
                let Some(snapshot) = self
                    .0
                    .state
                    .lock_blocking()
                    .gatt
                    .set_characteristics(service, &characteristics)
                else {
                    debug!("Ignoring characteristics of unknown service {} on {}", service, self);
                    return;
                };
                for characteristic in snapshot.characteristics() {
                    if !self.is_connected() {
                        debug!("{} disconnected during characteristic discovery", self);
                        break;
                    }
                    self.0.adapter.discover_descriptors(self.0.id, characteristic.path());
                }
                for observer in self.observers() {
                    observer.did_discover_characteristics(self, &snapshot);
                }
            }
            PeripheralEvent::DiscoveredDescriptors {
                characteristic,
                descriptors,
                error,
            } => {
                if let Some(err) = error {
                    warn!("Error discovering descriptors of {} on {}: {}", characteristic, self, err);
                    return;
                }
                let known = self
                    .0
                    .state
                    .lock_blocking()
                    .gatt
                    .set_descriptors(characteristic, &descriptors)
                    .is_some();
                if !known {
                    debug!("Ignoring descriptors of unknown characteristic {} on {}", characteristic, self);
                    return;
                }
                for descriptor in descriptors {
                    if !self.is_connected() {
                        debug!("{} disconnected during descriptor discovery", self);
                        break;
                    }
                    self.0.adapter.read_descriptor(self.0.id, characteristic, descriptor);
                }
            }
            PeripheralEvent::DescriptorValueUpdate {
                characteristic,
                descriptor,
                value,
                error,
            } => {
                if let Some(err) = error {
                    warn!("Error reading descriptor {} of {} on {}: {}", descriptor, characteristic, self, err);
                    return;
                }
                let updated = self
                    .0
                    .state
                    .lock_blocking()
                    .gatt
                    .set_descriptor_value(characteristic, descriptor, value);
                if let Some((characteristic, descriptor)) = updated {
                    for observer in self.observers() {
                        observer.did_update_descriptor(self, &characteristic, &descriptor);
                    }
                }
            }
            PeripheralEvent::CharacteristicValueUpdate {
                characteristic,
                value,
                error,
            } => {
                let (result, updated) = match error {
                    Some(err) => {
                        warn!("Error reading {} on {}: {}", characteristic, self, err);
                        (Err(Error::from(err)), None)
                    }
                    None => {
                        let updated = self
                            .0
                            .state
                            .lock_blocking()
                            .gatt
                            .set_value(characteristic, value.clone());
                        (Ok(value.unwrap_or_default()), updated)
                    }
                };
                let resolved = self
                    .0
                    .transactions
                    .lock_blocking()
                    .reads
                    .resolve_front(&characteristic, result);
                if !resolved {
                    debug!("Unsolicited value for {} on {}", characteristic, self);
                }
                if let Some(characteristic) = updated {
                    for observer in self.observers() {
                        observer.did_update_characteristic(self, &characteristic);
                    }
                }
            }
            PeripheralEvent::CharacteristicValueWrite { characteristic, error } => {
                let result = match error {
                    Some(err) => {
                        warn!("Error writing {} on {}: {}", characteristic, self, err);
                        Err(Error::from(err))
                    }
                    None => Ok(()),
                };
                let resolved = self
                    .0
                    .transactions
                    .lock_blocking()
                    .writes
                    .resolve_front(&characteristic, result);
                if !resolved {
                    debug!("Unexpected write acknowledgement for {} on {}", characteristic, self);
                }
                if error.is_none() {
                    if let Some(characteristic) = self.characteristic(characteristic) {
                        for observer in self.observers() {
                            observer.did_write_characteristic(self, &characteristic);
                        }
                    }
                }
            }
            PeripheralEvent::NotificationStateUpdate {
                characteristic,
                enabled,
                error,
            } => {
                let result = match error {
                    Some(err) => {
                        warn!("Error changing notifications for {} on {}: {}", characteristic, self, err);
                        Err(Error::from(err))
                    }
                    None => {
                        self.0
                            .state
                            .lock_blocking()
                            .gatt
                            .set_notifying(characteristic, enabled);
                        Ok(())
                    }
                };
                self.0
                    .transactions
                    .lock_blocking()
                    .notify
                    .resolve_front(&characteristic, result);
            }
            PeripheralEvent::ReadRssi { rssi, error } => match error {
                Some(err) => warn!("Error reading RSSI of {}: {}", self, err),
                None => self.0.state.lock_blocking().rssi = rssi,
            },
            PeripheralEvent::NameUpdate { name } => {
                self.0.state.lock_blocking().name = name;
            }
        }
    }
}

/// Order used when listing devices: strongest bucket first, then by name with unnamed devices last, then
/// by RSSI.
pub(crate) fn listing_order(a: &Device, b: &Device) -> Ordering {
    let names = match (a.name(), b.name()) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    b.signal_strength()
        .cmp(&a.signal_strength())
        .then(names)
        .then_with(|| b.rssi().cmp(&a.rssi()))
}
