//! The central role: radio state, scanning, the device table and connections

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Instant, SystemTime};

use async_lock::Mutex;
use tracing::{debug, info, warn};

use crate::adapter::{RadioAdapter, RadioState};
use crate::advertisement::{self, AdvertisementMap};
use crate::config::SessionConfig;
use crate::device::{self, ConnectionState, Device, DeviceId};
use crate::error::ErrorKind;
use crate::event::{CentralEvent, PeripheralEvent};
use crate::observer::{Registry, SessionObserver};
use crate::transaction::{self, OperationId, PendingOperation};
use crate::util::defer;
use crate::{Error, Result};

enum Gate {
    Pending(PendingOperation<()>),
    Open,
    Closed(ErrorKind),
}

struct ConnectAttempt {
    op: PendingOperation<()>,
    waiters: usize,
}

struct SessionState {
    radio: RadioState,
    gate: Gate,
    scanning: bool,
    devices: HashMap<DeviceId, Device>,
    connects: HashMap<DeviceId, ConnectAttempt>,
}

pub(crate) struct SessionInner {
    adapter: Arc<dyn RadioAdapter>,
    config: Arc<SessionConfig>,
    state: Mutex<SessionState>,
    observers: Registry<dyn SessionObserver>,
}

/// The entry point for scanning, connecting and tracking Bluetooth LE devices
///
/// A `Session` drives a [`RadioAdapter`] and is driven by the events the platform reports back through
/// [`handle_central_event`](Self::handle_central_event) and
/// [`handle_peripheral_event`](Self::handle_peripheral_event). Clones share the same state.
#[derive(Clone)]
pub struct Session(pub(crate) Arc<SessionInner>);

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock_blocking();
        f.debug_struct("Session")
            .field("radio", &state.radio)
            .field("scanning", &state.scanning)
            .field("devices", &state.devices.len())
            .finish()
    }
}

impl Session {
    /// Creates a session with the default [`SessionConfig`]
    pub fn new(adapter: Arc<dyn RadioAdapter>) -> Self {
        Session::with_config(adapter, SessionConfig::default())
    }

    /// Creates a session with the given configuration
    pub fn with_config(adapter: Arc<dyn RadioAdapter>, config: SessionConfig) -> Self {
        Session(Arc::new(SessionInner {
            adapter,
            config: Arc::new(config),
            state: Mutex::new(SessionState {
                radio: RadioState::Unknown,
                gate: Gate::Pending(PendingOperation::new(None)),
                scanning: false,
                devices: HashMap::new(),
                connects: HashMap::new(),
            }),
            observers: Registry::new(),
        }))
    }

    /// The configuration this session was created with
    pub fn config(&self) -> &SessionConfig {
        &self.0.config
    }

    /// Registers a session observer. Returns `false` if one with the same id is already registered.
    pub fn subscribe<O: SessionObserver + 'static>(&self, observer: &Arc<O>) -> bool {
        let weak = Arc::downgrade(observer);
        let weak: Weak<dyn SessionObserver> = weak;
        self.0.observers.subscribe(observer.observer_id(), weak)
    }

    /// Removes the session observer registered under `id`
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.0.observers.unsubscribe(id)
    }

    /// The last radio state reported by the platform
    pub fn radio_state(&self) -> RadioState {
        self.0.state.lock_blocking().radio
    }

    /// Returns `true` while a scan is running
    pub fn is_scanning(&self) -> bool {
        self.0.state.lock_blocking().scanning
    }

    /// Every device seen since the last radio reset, in no particular order
    pub fn devices(&self) -> Vec<Device> {
        self.0.state.lock_blocking().devices.values().cloned().collect()
    }

    /// Looks up a device by identifier
    pub fn device(&self, id: DeviceId) -> Option<Device> {
        self.0.state.lock_blocking().devices.get(&id).cloned()
    }

    /// Devices that advertised within the validity window, strongest and named first
    pub fn valid_devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices().into_iter().filter(Device::is_valid).collect();
        devices.sort_by(device::listing_order);
        devices
    }

    /// Renders one raw advertisement entry as a `(label, value)` pair.
    ///
    /// Returns `None` for keys and value types that have no label.
    pub fn parse_advertisement_data(key: &str, data: &AdvertisementMap) -> Option<(&'static str, String)> {
        advertisement::parse_advertisement_data(key, data)
    }

    /// Starts scanning once the radio is authorized and powered on.
    ///
    /// Waits while the radio state is still unknown. Fails with the radio's error if it is unsupported,
    /// unauthorized, powered off or resetting. Scanning again while a scan is running does nothing.
    pub async fn start_scanning(&self) -> Result<()> {
        self.authorized().await?;
        self.begin_scan()
    }

    async fn authorized(&self) -> Result<()> {
        let completion = {
            let mut state = self.0.state.lock_blocking();
            match &mut state.gate {
                Gate::Open => return Ok(()),
                Gate::Closed(kind) => return Err((*kind).into()),
                Gate::Pending(gate) => gate.subscribe(),
            }
        };
        completion.await?
    }

    fn begin_scan(&self) -> Result<()> {
        {
            let mut state = self.0.state.lock_blocking();
            state.radio.check()?;
            if state.scanning {
                return Ok(());
            }
            state.scanning = true;
        }
        info!("Starting scan");
        self.0.adapter.start_scan(true);
        Ok(())
    }

    /// Stops scanning. Does nothing when no scan is running.
    pub fn stop_scanning(&self) {
        let was_scanning = std::mem::replace(&mut self.0.state.lock_blocking().scanning, false);
        if was_scanning {
            info!("Stopping scan");
            self.0.adapter.stop_scan();
        }
    }

    /// Connects to `device`.
    ///
    /// Concurrent calls for the same device share a single connection attempt. Returns immediately if the
    /// device is already connected. The attempt fails with [`ErrorKind::CouldNotConnect`] and is cancelled
    /// if it does not complete within [`SessionConfig::connect_timeout`], or as soon as every caller waiting
    /// on it has dropped its future.
    pub async fn connect(&self, device: &Device) -> Result<()> {
        let id = device.id();
        let (device, completion, op_id, deadline, issue) = {
            let mut state = self.0.state.lock_blocking();
            state.radio.check()?;
            let Some(device) = state.devices.get(&id).cloned() else {
                return Err(Error::new(ErrorKind::NotFound, None, format!("unknown device {id}")));
            };
            if device.is_connected() {
                return Ok(());
            }
            match state.connects.entry(id) {
                Entry::Occupied(mut pending) => {
                    let attempt = pending.get_mut();
                    attempt.waiters += 1;
                    (device, attempt.op.subscribe(), attempt.op.id(), attempt.op.deadline(), false)
                }
                Entry::Vacant(slot) => {
                    let attempt = slot.insert(ConnectAttempt {
                        op: PendingOperation::new(Some(Instant::now() + self.0.config.connect_timeout)),
                        waiters: 1,
                    });
                    (device, attempt.op.subscribe(), attempt.op.id(), attempt.op.deadline(), true)
                }
            }
        };

        let _waiting = defer(|| self.release_connect(id, op_id));
        if issue {
            info!("Connecting to {}", device);
            device.set_connection_state(ConnectionState::Connecting);
            self.0.adapter.connect(id);
        } else {
            debug!("Joining pending connect to {}", device);
        }

        transaction::wait(completion, deadline, || {
            self.expire_connect(id, op_id, "connection timed out")
        })
        .await
    }

    fn release_connect(&self, id: DeviceId, op_id: OperationId) {
        let abandoned = {
            let mut state = self.0.state.lock_blocking();
            match state.connects.get_mut(&id) {
                Some(attempt) if attempt.op.id() == op_id => {
                    attempt.waiters = attempt.waiters.saturating_sub(1);
                    attempt.waiters == 0
                }
                _ => false,
            }
        };
        if abandoned {
            self.expire_connect(id, op_id, "connection attempt abandoned");
        }
    }

    fn expire_connect(&self, id: DeviceId, op_id: OperationId, reason: &'static str) {
        let expired = {
            let mut state = self.0.state.lock_blocking();
            match state.connects.get(&id) {
                Some(attempt) if attempt.op.id() == op_id => state.connects.remove(&id),
                _ => None,
            }
        };
        let Some(attempt) = expired else {
            return;
        };

        warn!("Cancelling connect to {}: {}", id, reason);
        self.0.adapter.cancel_connect(id);
        if let Some(device) = self.device(id) {
            device.set_connection_state(ConnectionState::Disconnected);
        }
        attempt
            .op
            .resolve(Err(Error::new(ErrorKind::CouldNotConnect, None, reason)));
    }

    /// Cancels a pending connection to `device` or disconnects it.
    ///
    /// The outcome is reported by the platform as a [`CentralEvent::Disconnected`].
    pub fn disconnect(&self, device: &Device) {
        if device.is_connected() {
            device.set_connection_state(ConnectionState::Disconnecting);
        }
        info!("Disconnecting from {}", device);
        self.0.adapter.cancel_connect(device.id());
    }

    fn observers(&self) -> Vec<Arc<dyn SessionObserver>> {
        self.0.observers.snapshot()
    }

    /// Applies an event reported by the platform's central manager.
    pub fn handle_central_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::StateChanged(radio) => self.radio_changed(radio),
            CentralEvent::Discovered {
                device,
                name,
                adv_data,
                rssi,
            } => self.discovered(device, name, adv_data, rssi),
            CentralEvent::Connected { device } => self.connected(device),
            CentralEvent::ConnectFailed { device, error } => {
                let op = self.0.state.lock_blocking().connects.remove(&device);
                let source = error.map(|err| {
                    let source: Arc<dyn std::error::Error + Send + Sync> = Arc::new(Error::from(err));
                    source
                });
                let error = Error::new(ErrorKind::CouldNotConnect, source, String::new());
                warn!("Failed to connect to {}: {}", device, error);

                if let Some(device) = self.device(device) {
                    device.set_connection_state(ConnectionState::Disconnected);
                    for observer in self.observers() {
                        observer.did_fail_to_connect(&device, &error);
                    }
                }
                if let Some(attempt) = op {
                    attempt.op.resolve(Err(error));
                }
            }
            CentralEvent::Disconnected { device, error } => {
                let op = self.0.state.lock_blocking().connects.remove(&device);
                match error {
                    Some(err) => info!("Disconnected from {}: {}", device, err),
                    None => info!("Disconnected from {}", device),
                }

                if let Some(device) = self.device(device) {
                    device.set_connection_state(ConnectionState::Disconnected);
                    for observer in self.observers() {
                        observer.did_disconnect(&device);
                    }
                }
                if let Some(attempt) = op {
                    attempt.op.resolve(Err(ErrorKind::ConnectionCancelled.into()));
                }
            }
        }
    }

    /// Routes an event reported for a single peripheral to its [`Device`]. Events for unknown devices
    /// are dropped.
    pub fn handle_peripheral_event(&self, id: DeviceId, event: PeripheralEvent) {
        match self.device(id) {
            Some(device) => device.handle_event(event),
            None => debug!("Dropping {:?} for unknown device {}", event, id),
        }
    }

    fn radio_changed(&self, radio: RadioState) {
        info!("Radio state changed to {}", radio);
        match radio {
            RadioState::PoweredOn => {
                let waiting = {
                    let mut state = self.0.state.lock_blocking();
                    state.radio = radio;
                    std::mem::replace(&mut state.gate, Gate::Open)
                };
                if let Gate::Pending(gate) = waiting {
                    gate.resolve(Ok(()));
                }
            }
            RadioState::Unsupported | RadioState::Unauthorized | RadioState::PoweredOff => {
                let kind = radio.error_kind().unwrap_or(ErrorKind::NotReady);
                let waiting = {
                    let mut state = self.0.state.lock_blocking();
                    state.radio = radio;
                    state.scanning = false;
                    std::mem::replace(&mut state.gate, Gate::Closed(kind))
                };
                if let Gate::Pending(gate) = waiting {
                    gate.resolve(Err(kind.into()));
                }
            }
            RadioState::Resetting => self.reset(),
            RadioState::Unknown => self.0.state.lock_blocking().radio = radio,
        }
    }

    fn reset(&self) {
        let (devices, connects, waiting) = {
            let mut state = self.0.state.lock_blocking();
            state.radio = RadioState::Resetting;
            state.scanning = false;
            (
                std::mem::take(&mut state.devices),
                std::mem::take(&mut state.connects),
                std::mem::replace(&mut state.gate, Gate::Pending(PendingOperation::new(None))),
            )
        };
        warn!("Radio is resetting, forgetting {} devices", devices.len());

        if let Gate::Pending(gate) = waiting {
            gate.resolve(Err(ErrorKind::Resetting.into()));
        }
        for attempt in connects.into_values() {
            attempt.op.resolve(Err(ErrorKind::Resetting.into()));
        }
        for device in devices.values() {
            device.teardown(ErrorKind::Resetting);
        }
        for observer in self.observers() {
            observer.radio_reset();
        }
    }

    fn discovered(&self, id: DeviceId, name: Option<String>, adv_data: AdvertisementMap, rssi: i16) {
        let seen = SystemTime::now();
        let existing = self.device(id);
        let device = match existing {
            Some(device) => {
                device.merge_advertisement(name, adv_data, rssi, seen);
                device
            }
            None => {
                let device = Device::new(
                    id,
                    Arc::downgrade(&self.0),
                    self.0.adapter.clone(),
                    self.0.config.clone(),
                    name,
                    adv_data,
                    rssi,
                    seen,
                );
                // Another event may have inserted the device since the lookup.
                let device = self
                    .0
                    .state
                    .lock_blocking()
                    .devices
                    .entry(id)
                    .or_insert(device)
                    .clone();
                debug!("Discovered {} ({} dBm)", device, rssi);
                device
            }
        };

        for observer in self.observers() {
            observer.did_discover(&device);
        }
    }

    fn connected(&self, id: DeviceId) {
        let (device, op, was_scanning) = {
            let mut state = self.0.state.lock_blocking();
            let was_scanning = std::mem::replace(&mut state.scanning, false);
            (state.devices.get(&id).cloned(), state.connects.remove(&id), was_scanning)
        };
        if was_scanning {
            self.0.adapter.stop_scan();
        }

        let Some(device) = device else {
            warn!("Connected to unknown device {}", id);
            if let Some(attempt) = op {
                attempt
                    .op
                    .resolve(Err(Error::new(ErrorKind::NotFound, None, format!("unknown device {id}"))));
            }
            return;
        };

        info!("Connected to {}", device);
        device.set_connection_state(ConnectionState::Connected);
        self.0.adapter.discover_services(id);
        for observer in self.observers() {
            observer.did_connect(&device);
        }
        if let Some(attempt) = op {
            attempt.op.resolve(Ok(()));
        }
    }
}
