#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use gattlink::btuuid::{characteristics, services};
use gattlink::{
    AdvertisementMap, AdvertisementValue, CentralEvent, CharacteristicProperties, Device, DeviceId,
    DiscoveredCharacteristic, Error, GattPath, Observer, PeripheralEvent, PeripheralObserver, RadioAdapter,
    RadioState, Session, SessionConfig, SessionObserver, Uuid, WriteKind,
};
use gattlink::advertisement::keys;
use gattlink::{Characteristic, Descriptor, Service};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartScan(bool),
    StopScan,
    Connect(DeviceId),
    CancelConnect(DeviceId),
    DiscoverServices(DeviceId),
    DiscoverCharacteristics(DeviceId, Uuid),
    DiscoverDescriptors(DeviceId, GattPath),
    ReadCharacteristic(DeviceId, GattPath),
    ReadDescriptor(DeviceId, GattPath, Uuid),
    WriteCharacteristic(DeviceId, GattPath, Vec<u8>, WriteKind),
    SetNotify(DeviceId, GattPath, bool),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Record the command and never answer
    #[default]
    Ignore,
    /// Answer with `Connected` from inside the command
    Succeed,
    /// Answer with `ConnectFailed` from inside the command
    Fail,
}

/// A radio that records every command and optionally answers connects synchronously.
#[derive(Default)]
pub struct FakeAdapter {
    commands: Mutex<Vec<Command>>,
    session: Mutex<Option<Session>>,
    connect: Mutex<ConnectBehavior>,
    disconnect_on_cancel: AtomicBool,
}

impl FakeAdapter {
    pub fn attach(&self, session: &Session) {
        *self.session.lock().unwrap() = Some(session.clone());
    }

    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        *self.connect.lock().unwrap() = behavior;
    }

    pub fn disconnect_on_cancel(&self, enabled: bool) {
        self.disconnect_on_cancel.store(enabled, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Command) -> bool) -> usize {
        self.commands.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
    }

    fn record(&self, command: Command) {
        self.commands.lock().unwrap().push(command);
    }

    fn emit(&self, event: CentralEvent) {
        let session = self.session.lock().unwrap().clone();
        if let Some(session) = session {
            session.handle_central_event(event);
        }
    }
}

impl RadioAdapter for FakeAdapter {
    fn start_scan(&self, allow_duplicates: bool) {
        self.record(Command::StartScan(allow_duplicates));
    }

    fn stop_scan(&self) {
        self.record(Command::StopScan);
    }

    fn connect(&self, device: DeviceId) {
        self.record(Command::Connect(device));
        let behavior = *self.connect.lock().unwrap();
        match behavior {
            ConnectBehavior::Ignore => {}
            ConnectBehavior::Succeed => self.emit(CentralEvent::Connected { device }),
            ConnectBehavior::Fail => self.emit(CentralEvent::ConnectFailed { device, error: None }),
        }
    }

    fn cancel_connect(&self, device: DeviceId) {
        self.record(Command::CancelConnect(device));
        if self.disconnect_on_cancel.load(Ordering::SeqCst) {
            self.emit(CentralEvent::Disconnected { device, error: None });
        }
    }

    fn discover_services(&self, device: DeviceId) {
        self.record(Command::DiscoverServices(device));
    }

    fn discover_characteristics(&self, device: DeviceId, service: Uuid) {
        self.record(Command::DiscoverCharacteristics(device, service));
    }

    fn discover_descriptors(&self, device: DeviceId, characteristic: GattPath) {
        self.record(Command::DiscoverDescriptors(device, characteristic));
    }

    fn read_characteristic(&self, device: DeviceId, characteristic: GattPath) {
        self.record(Command::ReadCharacteristic(device, characteristic));
    }

    fn read_descriptor(&self, device: DeviceId, characteristic: GattPath, descriptor: Uuid) {
        self.record(Command::ReadDescriptor(device, characteristic, descriptor));
    }

    fn write_characteristic(&self, device: DeviceId, characteristic: GattPath, value: &[u8], kind: WriteKind) {
        self.record(Command::WriteCharacteristic(device, characteristic, value.to_vec(), kind));
    }

    fn set_notify(&self, device: DeviceId, characteristic: GattPath, enabled: bool) {
        self.record(Command::SetNotify(device, characteristic, enabled));
    }
}

pub fn setup() -> (Arc<FakeAdapter>, Session) {
    setup_with(SessionConfig::default())
}

pub fn setup_with(config: SessionConfig) -> (Arc<FakeAdapter>, Session) {
    init_tracing();
    let adapter = Arc::new(FakeAdapter::default());
    let session = Session::with_config(adapter.clone(), config);
    adapter.attach(&session);
    (adapter, session)
}

pub fn device_id(n: u128) -> DeviceId {
    DeviceId::new(Uuid::from_u128(0x5a1e_0000_0000_4000_8000_0000_0000_0000 | n))
}

pub fn power_on(session: &Session) {
    session.handle_central_event(CentralEvent::StateChanged(RadioState::PoweredOn));
}

pub fn advertise(session: &Session, id: DeviceId, name: Option<&str>, rssi: i16) -> Device {
    let mut adv_data = AdvertisementMap::new();
    if let Some(name) = name {
        adv_data.insert(keys::LOCAL_NAME.to_owned(), AdvertisementValue::Text(name.to_owned()));
    }
    adv_data.insert(keys::IS_CONNECTABLE.to_owned(), AdvertisementValue::Bool(true));
    session.handle_central_event(CentralEvent::Discovered {
        device: id,
        name: None,
        adv_data,
        rssi,
    });
    session.device(id).expect("advertised device is tracked")
}

pub fn battery_level() -> GattPath {
    GattPath::new(services::BATTERY, characteristics::BATTERY_LEVEL)
}

pub fn temperature() -> GattPath {
    GattPath::new(services::ENVIRONMENTAL_SENSING, characteristics::TEMPERATURE)
}

/// Battery level is read + notify, temperature is read + write + notify.
pub fn populate_gatt(session: &Session, id: DeviceId) {
    session.handle_peripheral_event(
        id,
        PeripheralEvent::DiscoveredServices {
            services: vec![services::BATTERY, services::ENVIRONMENTAL_SENSING],
            error: None,
        },
    );
    session.handle_peripheral_event(
        id,
        PeripheralEvent::DiscoveredCharacteristics {
            service: services::BATTERY,
            characteristics: vec![DiscoveredCharacteristic {
                uuid: characteristics::BATTERY_LEVEL,
                properties: CharacteristicProperties::from_bits(0x12),
            }],
            error: None,
        },
    );
    session.handle_peripheral_event(
        id,
        PeripheralEvent::DiscoveredCharacteristics {
            service: services::ENVIRONMENTAL_SENSING,
            characteristics: vec![DiscoveredCharacteristic {
                uuid: characteristics::TEMPERATURE,
                properties: CharacteristicProperties::from_bits(0x1a),
            }],
            error: None,
        },
    );
}

/// A powered-on session with one connected device whose GATT database is populated.
pub async fn connected_device() -> (Arc<FakeAdapter>, Session, Device) {
    connected_device_with(SessionConfig::default()).await
}

pub async fn connected_device_with(config: SessionConfig) -> (Arc<FakeAdapter>, Session, Device) {
    let (adapter, session) = setup_with(config);
    power_on(&session);
    let device = advertise(&session, device_id(1), Some("Thermo"), -50);
    adapter.set_connect_behavior(ConnectBehavior::Succeed);
    session.connect(&device).await.expect("connect succeeds");
    populate_gatt(&session, device.id());
    adapter.clear();
    (adapter, session, device)
}

/// Observer that logs every callback as a line of text.
pub struct RecordingObserver {
    id: String,
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(RecordingObserver {
            id: id.to_owned(),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl Observer for RecordingObserver {
    fn observer_id(&self) -> &str {
        &self.id
    }
}

impl SessionObserver for RecordingObserver {
    fn did_discover(&self, device: &Device) {
        self.push(format!("discover {}", device.rssi()));
    }

    fn did_connect(&self, device: &Device) {
        self.push(format!("connect {}", device.is_connected()));
    }

    fn did_fail_to_connect(&self, _device: &Device, error: &Error) {
        self.push(format!("fail {}", error.kind()));
    }

    fn did_disconnect(&self, device: &Device) {
        self.push(format!("disconnect {}", device.is_connected()));
    }

    fn radio_reset(&self) {
        self.push("reset".to_owned());
    }
}

impl PeripheralObserver for RecordingObserver {
    fn did_discover_services(&self, _device: &Device, services: &[Service]) {
        self.push(format!("services {}", services.len()));
    }

    fn did_discover_characteristics(&self, _device: &Device, service: &Service) {
        self.push(format!("characteristics {}", service.characteristics().len()));
    }

    fn did_update_characteristic(&self, _device: &Device, characteristic: &Characteristic) {
        self.push(format!("value {:?}", characteristic.value()));
    }

    fn did_update_descriptor(&self, _device: &Device, _characteristic: &Characteristic, descriptor: &Descriptor) {
        self.push(format!("descriptor {:?}", descriptor.value()));
    }

    fn did_write_characteristic(&self, _device: &Device, characteristic: &Characteristic) {
        self.push(format!("write {}", characteristic.uuid()));
    }
}
