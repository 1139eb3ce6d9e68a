mod common;

use std::time::Duration;

use common::{advertise, device_id, power_on, setup, setup_with, Command, ConnectBehavior, RecordingObserver};
use futures_lite::future::poll_once;
use gattlink::advertisement::keys;
use gattlink::{
    AdvertisementMap, AdvertisementValue, CentralEvent, ConnectionState, DeviceId, ErrorKind, PeripheralEvent,
    RadioState, Session, SessionConfig, SignalStrength, Uuid,
};

#[tokio::test]
async fn scanning_waits_for_power_on() {
    let (adapter, session) = setup();

    let mut scan = Box::pin(session.start_scanning());
    assert!(poll_once(&mut scan).await.is_none());
    assert!(adapter.commands().is_empty());

    power_on(&session);
    scan.await.unwrap();
    assert!(session.is_scanning());
    assert_eq!(adapter.commands(), vec![Command::StartScan(true)]);

    session.start_scanning().await.unwrap();
    assert_eq!(adapter.count(|c| matches!(c, Command::StartScan(_))), 1);

    session.stop_scanning();
    session.stop_scanning();
    assert!(!session.is_scanning());
    assert_eq!(adapter.count(|c| *c == Command::StopScan), 1);
}

#[tokio::test]
async fn scanning_fails_while_powered_off() {
    let (adapter, session) = setup();

    let mut scan = Box::pin(session.start_scanning());
    assert!(poll_once(&mut scan).await.is_none());
    session.handle_central_event(CentralEvent::StateChanged(RadioState::PoweredOff));
    assert_eq!(scan.await.unwrap_err().kind(), ErrorKind::PoweredOff);
    assert_eq!(
        session.start_scanning().await.unwrap_err().kind(),
        ErrorKind::PoweredOff
    );

    power_on(&session);
    session.start_scanning().await.unwrap();
    assert_eq!(adapter.commands(), vec![Command::StartScan(true)]);

    session.handle_central_event(CentralEvent::StateChanged(RadioState::Unauthorized));
    assert!(!session.is_scanning());
    let err = session.start_scanning().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAuthorized);
    assert_eq!(err.to_string(), "Bluetooth must be authorized");
}

#[tokio::test]
async fn reset_forgets_devices_and_rejects_waiters() {
    let (adapter, session) = setup();
    let observer = RecordingObserver::new("reset");
    session.subscribe(&observer);
    power_on(&session);
    let device = advertise(&session, device_id(1), Some("Thermo"), -50);

    let mut connect = Box::pin(session.connect(&device));
    assert!(poll_once(&mut connect).await.is_none());
    assert_eq!(device.connection_state(), ConnectionState::Connecting);

    session.handle_central_event(CentralEvent::StateChanged(RadioState::Resetting));
    assert_eq!(connect.await.unwrap_err().kind(), ErrorKind::Resetting);
    assert!(session.devices().is_empty());
    assert_eq!(device.connection_state(), ConnectionState::Disconnected);
    assert_eq!(session.radio_state(), RadioState::Resetting);
    assert_eq!(observer.events().last().map(String::as_str), Some("reset"));

    // The gate is pending again until the radio comes back.
    let mut scan = Box::pin(session.start_scanning());
    assert!(poll_once(&mut scan).await.is_none());
    session.handle_central_event(CentralEvent::StateChanged(RadioState::Resetting));
    assert_eq!(scan.await.unwrap_err().kind(), ErrorKind::Resetting);

    let mut scan = Box::pin(session.start_scanning());
    assert!(poll_once(&mut scan).await.is_none());
    power_on(&session);
    scan.await.unwrap();
    assert_eq!(adapter.count(|c| matches!(c, Command::StartScan(true))), 1);
}

#[tokio::test]
async fn connect_times_out_and_cancels() {
    let (adapter, session) = setup_with(SessionConfig {
        connect_timeout: Duration::from_millis(50),
        ..SessionConfig::default()
    });
    power_on(&session);
    let device = advertise(&session, device_id(1), Some("Thermo"), -50);

    let err = session.connect(&device).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CouldNotConnect);
    assert_eq!(
        adapter.commands(),
        vec![Command::Connect(device.id()), Command::CancelConnect(device.id())]
    );
    assert_eq!(device.connection_state(), ConnectionState::Disconnected);

    // A late callback for the expired attempt resolves nothing.
    session.handle_central_event(CentralEvent::ConnectFailed {
        device: device.id(),
        error: None,
    });
}

#[tokio::test]
async fn abandoned_connect_is_cancelled() {
    let (adapter, session) = setup_with(SessionConfig {
        connect_timeout: Duration::from_millis(50),
        ..SessionConfig::default()
    });
    power_on(&session);
    let device = advertise(&session, device_id(1), Some("Thermo"), -50);

    let mut connect = Box::pin(session.connect(&device));
    assert!(poll_once(&mut connect).await.is_none());
    assert_eq!(device.connection_state(), ConnectionState::Connecting);
    drop(connect);

    assert_eq!(device.connection_state(), ConnectionState::Disconnected);
    assert_eq!(
        adapter.commands(),
        vec![Command::Connect(device.id()), Command::CancelConnect(device.id())]
    );

    // A later connect starts a fresh attempt.
    tokio::time::sleep(Duration::from_millis(80)).await;
    adapter.set_connect_behavior(ConnectBehavior::Succeed);
    session.connect(&device).await.unwrap();
    assert!(device.is_connected());
    assert_eq!(adapter.count(|c| matches!(c, Command::Connect(_))), 2);
}

#[tokio::test]
async fn connect_survives_while_any_caller_waits() {
    let (adapter, session) = setup();
    power_on(&session);
    let device = advertise(&session, device_id(1), Some("Thermo"), -50);

    let mut first = Box::pin(session.connect(&device));
    let mut second = Box::pin(session.connect(&device));
    assert!(poll_once(&mut first).await.is_none());
    assert!(poll_once(&mut second).await.is_none());
    drop(first);

    assert_eq!(adapter.count(|c| matches!(c, Command::CancelConnect(_))), 0);
    assert_eq!(device.connection_state(), ConnectionState::Connecting);

    session.handle_central_event(CentralEvent::Connected { device: device.id() });
    second.await.unwrap();
    assert!(device.is_connected());
}

#[tokio::test]
async fn concurrent_connects_share_one_attempt() {
    let (adapter, session) = setup();
    let observer = RecordingObserver::new("connects");
    session.subscribe(&observer);
    power_on(&session);
    let device = advertise(&session, device_id(1), Some("Thermo"), -50);
    session.start_scanning().await.unwrap();

    let mut first = Box::pin(session.connect(&device));
    let mut second = Box::pin(session.connect(&device));
    assert!(poll_once(&mut first).await.is_none());
    assert!(poll_once(&mut second).await.is_none());
    assert_eq!(adapter.count(|c| matches!(c, Command::Connect(_))), 1);

    session.handle_central_event(CentralEvent::Connected { device: device.id() });
    first.await.unwrap();
    second.await.unwrap();

    assert!(device.is_connected());
    assert!(!session.is_scanning());
    assert_eq!(adapter.count(|c| *c == Command::StopScan), 1);
    assert_eq!(adapter.count(|c| *c == Command::DiscoverServices(device.id())), 1);
    assert_eq!(observer.events().last().map(String::as_str), Some("connect true"));

    // Already connected
    session.connect(&device).await.unwrap();
    assert_eq!(adapter.count(|c| matches!(c, Command::Connect(_))), 1);
}

#[tokio::test]
async fn failed_connect_is_reported() {
    let (adapter, session) = setup();
    let observer = RecordingObserver::new("failures");
    session.subscribe(&observer);
    power_on(&session);
    let device = advertise(&session, device_id(1), None, -50);
    adapter.set_connect_behavior(ConnectBehavior::Fail);

    let err = session.connect(&device).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CouldNotConnect);
    assert!(!device.is_connected());
    assert_eq!(
        observer.events().last().map(String::as_str),
        Some("fail Could not connect to device")
    );
}

#[tokio::test]
async fn disconnect_cancels_pending_connect() {
    let (_adapter, session) = setup();
    let observer = RecordingObserver::new("disconnects");
    session.subscribe(&observer);
    power_on(&session);
    let device = advertise(&session, device_id(1), None, -50);

    let mut connect = Box::pin(session.connect(&device));
    assert!(poll_once(&mut connect).await.is_none());
    session.handle_central_event(CentralEvent::Disconnected {
        device: device.id(),
        error: None,
    });

    assert_eq!(connect.await.unwrap_err().kind(), ErrorKind::ConnectionCancelled);
    assert_eq!(observer.events().last().map(String::as_str), Some("disconnect false"));
}

#[tokio::test]
async fn connect_requires_power_and_a_known_device() {
    let (_adapter, session) = setup();
    let (_other_adapter, other) = setup();
    power_on(&other);
    let stranger = advertise(&other, device_id(7), None, -50);

    assert_eq!(session.connect(&stranger).await.unwrap_err().kind(), ErrorKind::NotReady);
    power_on(&session);
    assert_eq!(session.connect(&stranger).await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn advertisements_merge_into_one_device() {
    let (_adapter, session) = setup();
    let observer = RecordingObserver::new("discoveries");
    session.subscribe(&observer);
    assert!(!session.subscribe(&observer));

    let device = advertise(&session, device_id(1), Some("Thermo"), -50);
    advertise(&session, device_id(1), None, -53);
    assert_eq!(device.rssi(), -50);
    advertise(&session, device_id(1), None, -55);
    assert_eq!(device.rssi(), -55);
    advertise(&session, device_id(1), None, -49);
    assert_eq!(device.rssi(), -49);

    assert_eq!(session.devices().len(), 1);
    assert_eq!(session.device(device_id(1)), Some(device.clone()));
    assert_eq!(device.name().as_deref(), Some("Thermo"));
    assert_eq!(device.signal_strength(), SignalStrength::Medium);
    assert_eq!(
        observer.events(),
        vec!["discover -50", "discover -50", "discover -55", "discover -49"]
    );

    assert!(session.unsubscribe("discoveries"));
    advertise(&session, device_id(1), None, -49);
    assert_eq!(observer.events().len(), 4);
}

#[tokio::test]
async fn small_rssi_changes_still_refresh_last_seen() {
    let (_adapter, session) = setup();
    let device = advertise(&session, device_id(1), None, -50);
    let first_seen = device.last_seen();

    tokio::time::sleep(Duration::from_millis(10)).await;
    advertise(&session, device_id(1), None, -52);
    assert_eq!(device.rssi(), -50);
    assert!(device.last_seen() > first_seen);
}

#[tokio::test]
async fn platform_name_wins_over_advertised_name() {
    let (_adapter, session) = setup();
    let device = advertise(&session, device_id(1), Some("Advertised"), -50);
    session.handle_central_event(CentralEvent::Discovered {
        device: device.id(),
        name: Some("Cached".to_owned()),
        adv_data: AdvertisementMap::new(),
        rssi: -50,
    });
    assert_eq!(device.name().as_deref(), Some("Cached"));
    assert_eq!(device.to_string(), "Cached");
}

#[tokio::test]
async fn validity_window_is_inclusive() {
    let (_adapter, session) = setup();
    let device = advertise(&session, device_id(1), None, -50);
    let seen = device.last_seen();

    assert!(device.is_valid_at(seen));
    assert!(device.is_valid_at(seen + Duration::from_secs(30)));
    assert!(!device.is_valid_at(seen + Duration::from_millis(30_100)));

    let nil = advertise(&session, DeviceId::new(Uuid::nil()), None, -50);
    assert!(!nil.is_valid_at(nil.last_seen()));
    assert_eq!(session.valid_devices(), vec![device]);
}

#[tokio::test]
async fn valid_devices_are_listed_strongest_first() {
    let (_adapter, session) = setup();
    advertise(&session, device_id(1), Some("Beta"), -45);
    advertise(&session, device_id(2), Some("Alpha"), -50);
    advertise(&session, device_id(3), None, -41);
    advertise(&session, device_id(4), Some("Zeta"), -30);
    advertise(&session, device_id(5), Some("Low"), -70);
    advertise(&session, device_id(6), Some("Alpha"), -42);

    let order: Vec<DeviceId> = session.valid_devices().iter().map(|d| d.id()).collect();
    assert_eq!(
        order,
        vec![
            device_id(4),
            device_id(6),
            device_id(2),
            device_id(1),
            device_id(3),
            device_id(5),
        ]
    );
}

#[tokio::test]
async fn events_for_unknown_devices_are_ignored() {
    let (adapter, session) = setup();
    session.handle_peripheral_event(
        device_id(9),
        PeripheralEvent::DiscoveredServices {
            services: vec![],
            error: None,
        },
    );
    session.handle_central_event(CentralEvent::Connected { device: device_id(9) });
    session.handle_central_event(CentralEvent::Disconnected {
        device: device_id(9),
        error: None,
    });
    assert!(adapter.commands().is_empty());
    assert!(session.devices().is_empty());
}

#[test]
fn advertisement_entries_have_labels() {
    let mut data = AdvertisementMap::new();
    data.insert(keys::LOCAL_NAME.to_owned(), AdvertisementValue::Text("Thermo".to_owned()));
    data.insert(keys::TX_POWER_LEVEL.to_owned(), AdvertisementValue::Number(-8));
    data.insert("kCBAdvDataTimestamp".to_owned(), AdvertisementValue::Number(1));

    assert_eq!(
        Session::parse_advertisement_data(keys::LOCAL_NAME, &data),
        Some(("Local Name", "Thermo".to_owned()))
    );
    assert_eq!(
        Session::parse_advertisement_data(keys::TX_POWER_LEVEL, &data),
        Some(("Tx Power Level", "-8".to_owned()))
    );
    assert_eq!(Session::parse_advertisement_data("kCBAdvDataTimestamp", &data), None);
}
