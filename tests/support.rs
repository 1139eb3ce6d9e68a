mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{
    advertise, battery_level, connected_device, device_id, power_on, setup_with, temperature, Command,
    ConnectBehavior,
};
use futures_lite::future::poll_once;
use gattlink::btuuid::{characteristics, services};
use gattlink::{
    BluetoothConnectRequest, BluetoothNotifyRequest, BluetoothReadRequest, BluetoothReadResponse,
    BluetoothWriteRequest, CentralEvent, CharacteristicProperties, ConnectionStatus, DiscoveredCharacteristic,
    Encoding, MessageCategory, PeripheralEvent, RemoteSupport, SessionConfig, SupportError, SupportTransport,
    WriteKind,
};
use serde_json::json;

#[derive(Clone, Default)]
struct RecordingTransport {
    sent: Arc<Mutex<Vec<(MessageCategory, serde_json::Value)>>>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<(MessageCategory, serde_json::Value)> {
        self.sent.lock().unwrap().clone()
    }

    fn of(&self, category: MessageCategory) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter(|(sent, _)| *sent == category)
            .map(|(_, payload)| payload)
            .collect()
    }
}

#[async_trait]
impl SupportTransport for RecordingTransport {
    async fn notify(&self, category: MessageCategory, payload: serde_json::Value) -> Result<(), SupportError> {
        self.sent.lock().unwrap().push((category, payload));
        Ok(())
    }
}

fn connect_request(id: gattlink::DeviceId) -> BluetoothConnectRequest {
    BluetoothConnectRequest {
        mac_address: id.to_string(),
    }
}

#[tokio::test]
async fn reads_require_a_selected_device() {
    let (_adapter, session, device) = connected_device().await;
    let support = RemoteSupport::new(session.clone(), RecordingTransport::default());

    let err = support
        .handle_read(BluetoothReadRequest { uuid: "2a19".to_owned() })
        .await
        .unwrap_err();
    assert_eq!(err, SupportError::new("Not connected to device"));
    assert_eq!(err.status_code, 500);

    support.handle_connect(connect_request(device.id())).await.unwrap();
    assert_eq!(support.selected_device(), Some(device.clone()));
    let err = support
        .handle_read(BluetoothReadRequest { uuid: "ffff".to_owned() })
        .await
        .unwrap_err();
    assert_eq!(err.message, "Unknown characteristic");

    let mut read = Box::pin(support.handle_read(BluetoothReadRequest { uuid: "2A19".to_owned() }));
    assert!(poll_once(&mut read).await.is_none());
    session.handle_peripheral_event(
        device.id(),
        PeripheralEvent::CharacteristicValueUpdate {
            characteristic: battery_level(),
            value: Some(vec![0xff, 0x01]),
            error: None,
        },
    );
    assert_eq!(
        read.await.unwrap(),
        BluetoothReadResponse {
            value: "ff01".to_owned(),
            encoding: Encoding::Hex,
        }
    );
}

#[tokio::test]
async fn writes_decode_the_requested_encoding() {
    let (adapter, session, device) = connected_device().await;
    let support = RemoteSupport::new(session.clone(), RecordingTransport::default());
    support.handle_connect(connect_request(device.id())).await.unwrap();
    adapter.clear();

    let mut write = Box::pin(support.handle_write(BluetoothWriteRequest {
        uuid: "2a6e".to_owned(),
        encoding: Encoding::Hex,
        value: "0x1".to_owned(),
    }));
    assert!(poll_once(&mut write).await.is_none());
    assert_eq!(
        adapter.commands(),
        vec![Command::WriteCharacteristic(
            device.id(),
            temperature(),
            vec![0x01],
            WriteKind::WithResponse
        )]
    );
    session.handle_peripheral_event(
        device.id(),
        PeripheralEvent::CharacteristicValueWrite {
            characteristic: temperature(),
            error: None,
        },
    );
    write.await.unwrap();

    let err = support
        .handle_write(BluetoothWriteRequest {
            uuid: "2a6e".to_owned(),
            encoding: Encoding::Hex,
            value: "zz".to_owned(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.message, "Invalid hex value: invalid hex string");

    let err = support
        .handle_write(BluetoothWriteRequest {
            uuid: "2a19".to_owned(),
            encoding: Encoding::Utf8,
            value: "on".to_owned(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.message, "Characteristic does not allow write operations");
    assert_eq!(adapter.count(|c| matches!(c, Command::WriteCharacteristic(..))), 1);
}

#[tokio::test]
async fn requests_are_dispatched_from_json() {
    let (_adapter, session, device) = connected_device().await;
    let support = RemoteSupport::new(session.clone(), RecordingTransport::default());
    support
        .handle(
            MessageCategory::ConnectToDevice,
            json!({ "macAddress": device.id().to_string() }),
        )
        .await
        .unwrap();

    let mut notify = Box::pin(support.handle(
        MessageCategory::BluetoothNotifyRequest,
        json!({ "uuid": "2a19", "setNotify": true }),
    ));
    assert!(poll_once(&mut notify).await.is_none());
    session.handle_peripheral_event(
        device.id(),
        PeripheralEvent::NotificationStateUpdate {
            characteristic: battery_level(),
            enabled: true,
            error: None,
        },
    );
    assert_eq!(notify.await.unwrap(), serde_json::Value::Null);

    let err = support
        .handle(MessageCategory::BluetoothReadRequest, json!({ "id": 1 }))
        .await
        .unwrap_err();
    assert!(err.message.starts_with("Invalid request"), "{}", err.message);

    let err = support
        .handle(MessageCategory::DiagnosticHeartbeat, serde_json::Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.message, "Received unknown command");
    assert_eq!(MessageCategory::try_from(117u16).unwrap(), MessageCategory::RequestDeviceList);
    assert_eq!(u16::from(MessageCategory::DeviceData), 110);
}

#[tokio::test]
async fn connect_and_disconnect_select_devices() {
    let (adapter, session, device) = connected_device().await;
    let support = RemoteSupport::new(session.clone(), RecordingTransport::default());
    assert_eq!(support.connection_status(), ConnectionStatus::Disconnected);

    let err = support.handle_connect(connect_request(device_id(42))).await.unwrap_err();
    assert_eq!(err.message, "Unable to select device");
    let err = support
        .handle_connect(BluetoothConnectRequest {
            mac_address: "not-an-id".to_owned(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.message, "Unable to select device");
    assert_eq!(
        support.handle_disconnect().unwrap_err().message,
        "No connected device to disconnect"
    );

    support.handle_connect(connect_request(device.id())).await.unwrap();
    assert_eq!(support.connection_status(), ConnectionStatus::Connected);

    session.handle_central_event(CentralEvent::Disconnected {
        device: device.id(),
        error: None,
    });
    assert_eq!(support.connection_status(), ConnectionStatus::Reconnecting);

    support.handle_disconnect().unwrap();
    assert_eq!(support.connection_status(), ConnectionStatus::Disconnected);
    assert_eq!(adapter.commands(), vec![Command::CancelConnect(device.id())]);
}

#[tokio::test]
async fn device_list_scans_for_a_window() {
    let (adapter, session) = setup_with(SessionConfig {
        device_list_scan_window: Duration::from_millis(20),
        ..SessionConfig::default()
    });
    let support = RemoteSupport::new(session.clone(), RecordingTransport::default());
    power_on(&session);
    advertise(&session, device_id(1), Some("Weak"), -80);
    advertise(&session, device_id(2), Some("Strong"), -35);

    let list = support.handle_device_list().await.unwrap();
    let names: Vec<&str> = list.devices.iter().map(|d| d.local_name.as_str()).collect();
    assert_eq!(names, vec!["Strong", "Weak"]);
    assert_eq!(list.devices[0].signal_strength, 3);
    assert_eq!(list.devices[0].mac_address, device_id(2).to_string());
    assert!(!session.is_scanning());
    assert_eq!(adapter.commands(), vec![Command::StartScan(true), Command::StopScan]);

    let json = serde_json::to_value(&list).unwrap();
    assert_eq!(json["devices"][1]["localName"], "Weak");
    assert_eq!(json["devices"][1]["advertisementData"]["Local Name"], "Weak");
    assert_eq!(json["devices"][1]["advertisementData"]["Is Connectable"], "true");
}

#[tokio::test]
async fn device_data_is_published_while_connected() {
    let (_adapter, session, device) = connected_device().await;
    let transport = RecordingTransport::default();
    let support = RemoteSupport::new(session.clone(), transport.clone());

    assert!(!support.publish_device_data().await.unwrap());
    support.handle_connect(connect_request(device.id())).await.unwrap();
    session.handle_peripheral_event(
        device.id(),
        PeripheralEvent::CharacteristicValueUpdate {
            characteristic: battery_level(),
            value: Some(b"80".to_vec()),
            error: None,
        },
    );
    assert!(support.publish_device_data().await.unwrap());
    assert!(support.publish_heartbeat().await.unwrap());

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    let (category, data) = &sent[0];
    assert_eq!(*category, MessageCategory::DeviceData);
    assert_eq!(data["localName"], "Thermo");
    assert_eq!(data["rssi"], -50);
    assert_eq!(data["signalStrength"], 2);
    assert_eq!(data["services"][0]["uuid"], "180F");
    assert_eq!(
        data["services"][0]["characteristics"][0],
        json!({
            "uuid": "2A19",
            "read": true,
            "write": false,
            "notify": true,
            "name": "Battery Level",
            "value": "80",
            "encoding": "utf-8",
        })
    );

    assert_eq!(sent[1], (MessageCategory::DiagnosticHeartbeat, json!({ "rssi": -50, "status": "connected" })));
}

#[tokio::test]
async fn diagnostics_name_known_services() {
    let (_adapter, _session, device) = connected_device().await;
    let report = device.diagnostics().to_json();
    assert_eq!(report["localName"], "Thermo");
    assert_eq!(report["services"][0]["name"], "Battery");
    assert_eq!(report["services"][1]["name"], "Environmental Sensing");
    assert_eq!(report["services"][1]["characteristics"][0]["uuid"], "2A6E");
    assert!(report["services"][1]["characteristics"][0]["value"].is_null());

    let data = device.device_data();
    assert_eq!(data.services.len(), 2);
    assert_eq!(data.services[1].characteristics[0].encoding, None);
}

#[tokio::test]
async fn device_list_scan_stops_when_abandoned() {
    let (adapter, session) = setup_with(SessionConfig {
        device_list_scan_window: Duration::from_secs(10),
        ..SessionConfig::default()
    });
    let support = RemoteSupport::new(session.clone(), RecordingTransport::default());
    power_on(&session);

    let mut list = Box::pin(support.handle_device_list());
    assert!(poll_once(&mut list).await.is_none());
    assert!(session.is_scanning());
    drop(list);

    assert!(!session.is_scanning());
    assert_eq!(adapter.commands(), vec![Command::StartScan(true), Command::StopScan]);
}

#[tokio::test]
async fn selected_device_events_are_published() {
    let (adapter, session, device) = connected_device().await;
    let transport = RecordingTransport::default();
    let support = RemoteSupport::new(session.clone(), transport.clone());
    support.handle_connect(connect_request(device.id())).await.unwrap();
    adapter.clear();

    let driver = tokio::spawn({
        let support = support.clone();
        async move { support.run().await }
    });

    // Newly discovered characteristics are read straight away.
    session.handle_peripheral_event(
        device.id(),
        PeripheralEvent::DiscoveredCharacteristics {
            service: services::BATTERY,
            characteristics: vec![DiscoveredCharacteristic {
                uuid: characteristics::BATTERY_LEVEL,
                properties: CharacteristicProperties::from_bits(0x12),
            }],
            error: None,
        },
    );
    assert_eq!(
        adapter.count(|c| *c == Command::ReadCharacteristic(device.id(), battery_level())),
        1
    );
    assert_eq!(adapter.count(|c| matches!(c, Command::ReadCharacteristic(..))), 1);

    session.handle_peripheral_event(
        device.id(),
        PeripheralEvent::CharacteristicValueUpdate {
            characteristic: battery_level(),
            value: Some(b"64".to_vec()),
            error: None,
        },
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    driver.abort();

    let heartbeats = transport.of(MessageCategory::DiagnosticHeartbeat);
    assert_eq!(heartbeats.first(), Some(&json!({ "rssi": -50, "status": "connected" })));

    let snapshots = transport.of(MessageCategory::DeviceData);
    let last = snapshots.last().expect("a snapshot was published");
    assert_eq!(last["services"][0]["characteristics"][0]["value"], "64");
}

#[tokio::test]
async fn dropped_device_is_reconnected() {
    let (adapter, session, device) = connected_device().await;
    let transport = RecordingTransport::default();
    let support = RemoteSupport::new(session.clone(), transport.clone());
    support.handle_connect(connect_request(device.id())).await.unwrap();
    adapter.clear();

    let driver = tokio::spawn({
        let support = support.clone();
        async move { support.run().await }
    });

    session.handle_central_event(CentralEvent::Disconnected {
        device: device.id(),
        error: None,
    });
    assert_eq!(support.connection_status(), ConnectionStatus::Reconnecting);

    tokio::time::sleep(Duration::from_millis(50)).await;
    driver.abort();

    assert!(device.is_connected());
    assert_eq!(support.connection_status(), ConnectionStatus::Connected);
    assert_eq!(adapter.count(|c| matches!(c, Command::Connect(_))), 1);

    let statuses: Vec<serde_json::Value> = transport
        .of(MessageCategory::DiagnosticHeartbeat)
        .into_iter()
        .map(|heartbeat| heartbeat["status"].clone())
        .collect();
    assert!(statuses.contains(&json!("reconnecting")), "{statuses:?}");
    assert_eq!(statuses.last(), Some(&json!("connected")));
}

#[tokio::test]
async fn failed_reconnect_reports_disconnected() {
    let (adapter, session, device) = connected_device().await;
    let transport = RecordingTransport::default();
    let support = RemoteSupport::new(session.clone(), transport.clone());
    support.handle_connect(connect_request(device.id())).await.unwrap();
    adapter.clear();
    adapter.set_connect_behavior(ConnectBehavior::Fail);

    let driver = tokio::spawn({
        let support = support.clone();
        async move { support.run().await }
    });

    session.handle_central_event(CentralEvent::Disconnected {
        device: device.id(),
        error: None,
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    driver.abort();

    assert!(!device.is_connected());
    assert_eq!(support.connection_status(), ConnectionStatus::Disconnected);
    assert_eq!(support.selected_device(), Some(device.clone()));
    assert_eq!(adapter.count(|c| matches!(c, Command::Connect(_))), 3);

    let heartbeats = transport.of(MessageCategory::DiagnosticHeartbeat);
    assert_eq!(heartbeats.last(), Some(&json!({ "rssi": -50, "status": "disconnected" })));
}

#[tokio::test]
async fn heartbeats_repeat_on_the_configured_interval() {
    let (_adapter, session, device) = common::connected_device_with(SessionConfig {
        heartbeat_interval: Duration::from_millis(20),
        ..SessionConfig::default()
    })
    .await;
    let transport = RecordingTransport::default();
    let support = RemoteSupport::new(session.clone(), transport.clone());
    support.handle_connect(connect_request(device.id())).await.unwrap();

    let driver = tokio::spawn({
        let support = support.clone();
        async move { support.run().await }
    });
    tokio::time::sleep(Duration::from_millis(110)).await;
    driver.abort();

    assert!(transport.of(MessageCategory::DiagnosticHeartbeat).len() >= 3);
}
