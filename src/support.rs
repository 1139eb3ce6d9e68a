//! Fulfilment of remote-support requests against the selected device
//!
//! A remote agent sends read, write, notify, connect, disconnect and device list requests as JSON. The
//! [`RemoteSupport`] handler turns them into [`Device`] transactions and pushes device snapshots, heartbeats
//! and connection status back through a [`SupportTransport`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_lock::Mutex;
use async_trait::async_trait;
use futures_channel::mpsc;
use futures_lite::future::{self, Boxed};
use futures_lite::{FutureExt, StreamExt};
use futures_timer::Delay;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::codec::Encoding;
use crate::diagnostics::DeviceList;
use crate::gatt::{Characteristic, Descriptor, Service};
use crate::observer::{Observer, PeripheralObserver, SessionObserver};
use crate::util::defer;
use crate::{Device, DeviceId, Session};

/// Status code attached to every failed request.
pub const INTERNAL_ERROR: u16 = 500;

/// Kinds of messages exchanged with the remote peer.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[allow(missing_docs)]
pub enum MessageCategory {
    DeviceData = 110,
    BluetoothReadRequest = 111,
    BluetoothWriteRequest = 112,
    DiagnosticHeartbeat = 113,
    BluetoothNotifyRequest = 116,
    RequestDeviceList = 117,
    ConnectToDevice = 118,
    DisconnectFromDevice = 119,
}

/// Request to read a characteristic of the selected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BluetoothReadRequest {
    /// Characteristic UUID
    pub uuid: String,
}

/// Value returned for a [`BluetoothReadRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BluetoothReadResponse {
    /// The value rendered with `encoding`
    pub value: String,
    /// How `value` was rendered
    pub encoding: Encoding,
}

/// Request to write a characteristic of the selected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BluetoothWriteRequest {
    /// Characteristic UUID
    pub uuid: String,
    /// How `value` is to be turned into bytes
    pub encoding: Encoding,
    /// The value to write
    pub value: String,
}

/// Request to toggle notifications of a characteristic of the selected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BluetoothNotifyRequest {
    /// Characteristic UUID
    pub uuid: String,
    /// Whether notifications should be enabled
    pub set_notify: bool,
}

/// Request to connect to, and select, a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BluetoothConnectRequest {
    /// Identifier of the device, as reported in [`DeviceData::mac_address`](crate::DeviceData::mac_address)
    pub mac_address: String,
}

/// Failure reported back to the remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportError {
    /// Human readable description
    pub message: String,
    /// Numeric status
    pub status_code: u16,
}

impl SupportError {
    /// Creates an error with [`INTERNAL_ERROR`] status
    pub fn new(message: impl Into<String>) -> Self {
        SupportError {
            message: message.into(),
            status_code: INTERNAL_ERROR,
        }
    }
}

impl std::fmt::Display for SupportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SupportError {}

impl From<crate::Error> for SupportError {
    fn from(err: crate::Error) -> Self {
        SupportError::new(err.to_string())
    }
}

impl From<serde_json::Error> for SupportError {
    fn from(err: serde_json::Error) -> Self {
        SupportError::new(format!("Invalid request: {err}"))
    }
}

/// State of the selected device as reported to the remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum ConnectionStatus {
    Connected,
    Reconnecting,
    Disconnected,
}

/// Channel used to push notifications to the remote peer.
#[async_trait]
pub trait SupportTransport: Send + Sync {
    /// Sends `payload` under `category`
    async fn notify(&self, category: MessageCategory, payload: serde_json::Value) -> Result<(), SupportError>;
}

enum SupportEvent {
    DeviceData,
    Heartbeat,
    Reconnect(Device),
}

enum Wake {
    Event(SupportEvent),
    Heartbeat,
    Reconnected(Device, crate::Result<()>),
    Closed,
}

/// Handles remote-support requests for the device selected by the remote peer.
///
/// A `RemoteSupport` observes its session and the selected device. Snapshots, heartbeats and reconnects
/// triggered by those events are carried out by [`run`](Self::run).
pub struct RemoteSupport<T> {
    id: String,
    this: Weak<Self>,
    session: Session,
    transport: T,
    selected: Mutex<Option<Device>>,
    status: Mutex<ConnectionStatus>,
    events: mpsc::UnboundedSender<SupportEvent>,
    inbox: Mutex<mpsc::UnboundedReceiver<SupportEvent>>,
}

impl<T: SupportTransport + 'static> RemoteSupport<T> {
    /// Creates a handler with no selected device and subscribes it to `session`
    pub fn new(session: Session, transport: T) -> Arc<Self> {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let (events, inbox) = mpsc::unbounded();
        let support = Arc::new_cyclic(|this| RemoteSupport {
            id: format!("remote-support-{}", NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            this: this.clone(),
            session: session.clone(),
            transport,
            selected: Mutex::new(None),
            status: Mutex::new(ConnectionStatus::Disconnected),
            events,
            inbox: Mutex::new(inbox),
        });
        session.subscribe(&support);
        support
    }

    /// The device requests are applied to
    pub fn selected_device(&self) -> Option<Device> {
        self.selected.lock_blocking().clone()
    }

    /// Connection state of the selected device as last reported to the remote peer
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.lock_blocking()
    }

    fn is_selected(&self, device: &Device) -> bool {
        self.selected.lock_blocking().as_ref() == Some(device)
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock_blocking() = status;
    }

    fn select(&self, device: Option<Device>) {
        let previous = std::mem::replace(&mut *self.selected.lock_blocking(), device.clone());
        if let Some(previous) = previous {
            previous.unsubscribe(&self.id);
        }
        self.set_status(match &device {
            Some(device) if device.is_connected() => ConnectionStatus::Connected,
            Some(_) => ConnectionStatus::Reconnecting,
            None => ConnectionStatus::Disconnected,
        });
        if let (Some(device), Some(this)) = (device, self.this.upgrade()) {
            device.subscribe(&this);
        }
    }

    fn post(&self, event: SupportEvent) {
        if self.events.unbounded_send(event).is_err() {
            debug!("Remote support event dropped");
        }
    }

    fn target(&self, uuid: &str) -> Result<(Device, Characteristic), SupportError> {
        let device = match self.selected_device() {
            Some(device) if device.is_connected() => device,
            _ => return Err(SupportError::new("Not connected to device")),
        };
        match device.get_characteristic(uuid) {
            Some(characteristic) => Ok((device, characteristic)),
            None => Err(SupportError::new("Unknown characteristic")),
        }
    }

    /// Reads a characteristic of the selected device.
    pub async fn handle_read(&self, request: BluetoothReadRequest) -> Result<BluetoothReadResponse, SupportError> {
        let (device, characteristic) = self.target(&request.uuid)?;
        match device.read_value(&characteristic).await {
            Ok(value) => {
                let (value, encoding) = Encoding::render(&value);
                Ok(BluetoothReadResponse { value, encoding })
            }
            Err(err) => {
                error!("Remote read of {} failed: {}", request.uuid, err);
                Err(SupportError::new("Failed to read value from characteristic"))
            }
        }
    }

    /// Writes a characteristic of the selected device.
    pub async fn handle_write(&self, request: BluetoothWriteRequest) -> Result<(), SupportError> {
        let (device, characteristic) = self.target(&request.uuid)?;
        let value = request
            .encoding
            .encode_text(&request.value)
            .map_err(|err| SupportError::new(format!("Invalid {} value: {}", request.encoding, err)))?;
        device.write_value(&characteristic, &value).await.map_err(|err| {
            error!("Remote write of {} failed: {}", request.uuid, err);
            SupportError::from(err)
        })
    }

    /// Enables or disables notifications on a characteristic of the selected device.
    pub async fn handle_notify(&self, request: BluetoothNotifyRequest) -> Result<(), SupportError> {
        let (device, characteristic) = self.target(&request.uuid)?;
        device
            .set_notify(&characteristic, request.set_notify)
            .await
            .map_err(SupportError::from)
    }

    /// Connects to a previously discovered device and selects it.
    pub async fn handle_connect(&self, request: BluetoothConnectRequest) -> Result<(), SupportError> {
        let device = request
            .mac_address
            .parse::<DeviceId>()
            .ok()
            .and_then(|id| self.session.device(id))
            .ok_or_else(|| SupportError::new("Unable to select device"))?;

        device.connect(true).await?;
        info!("Remote peer selected {}", device);
        self.select(Some(device));
        Ok(())
    }

    /// Deselects and disconnects the selected device.
    pub fn handle_disconnect(&self) -> Result<(), SupportError> {
        let device = self
            .selected_device()
            .ok_or_else(|| SupportError::new("No connected device to disconnect"))?;
        self.select(None);
        device.disconnect();
        Ok(())
    }

    /// Scans for [`SessionConfig::device_list_scan_window`](crate::SessionConfig::device_list_scan_window) and
    /// lists the valid devices.
    pub async fn handle_device_list(&self) -> Result<DeviceList, SupportError> {
        self.session.start_scanning().await?;
        let _scan = defer(|| self.session.stop_scanning());
        Delay::new(self.session.config().device_list_scan_window).await;
        Ok(DeviceList::from_devices(&self.session.valid_devices()))
    }

    /// Decodes a request of `category` and dispatches it to its handler.
    ///
    /// Read requests answer with a [`BluetoothReadResponse`], device list requests with a [`DeviceList`] and
    /// every other request with `null`.
    pub async fn handle(
        &self,
        category: MessageCategory,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, SupportError> {
        debug!("Handling {:?} request", category);
        match category {
            MessageCategory::BluetoothReadRequest => respond(self.handle_read(decode(payload)?).await?),
            MessageCategory::BluetoothWriteRequest => respond(self.handle_write(decode(payload)?).await?),
            MessageCategory::BluetoothNotifyRequest => respond(self.handle_notify(decode(payload)?).await?),
            MessageCategory::ConnectToDevice => respond(self.handle_connect(decode(payload)?).await?),
            MessageCategory::DisconnectFromDevice => respond(self.handle_disconnect()?),
            MessageCategory::RequestDeviceList => respond(self.handle_device_list().await?),
            MessageCategory::DeviceData | MessageCategory::DiagnosticHeartbeat => {
                Err(SupportError::new("Received unknown command"))
            }
        }
    }

    /// Sends a [`DeviceData`](crate::DeviceData) snapshot of the selected device if it is connected.
    ///
    /// Returns whether a snapshot was sent.
    pub async fn publish_device_data(&self) -> Result<bool, SupportError> {
        let Some(device) = self.selected_device().filter(Device::is_connected) else {
            return Ok(false);
        };
        let payload = serde_json::to_value(device.device_data())?;
        self.transport.notify(MessageCategory::DeviceData, payload).await?;
        Ok(true)
    }

    /// Sends the RSSI of the selected device and its [`ConnectionStatus`]. Returns `false` when no device
    /// is selected.
    pub async fn publish_heartbeat(&self) -> Result<bool, SupportError> {
        let Some(device) = self.selected_device() else {
            return Ok(false);
        };
        let payload = serde_json::json!({
            "rssi": device.rssi(),
            "status": self.connection_status(),
        });
        self.transport.notify(MessageCategory::DiagnosticHeartbeat, payload).await?;
        Ok(true)
    }

    /// Pushes device snapshots and heartbeats to the remote peer and reconnects the selected device when it
    /// drops.
    ///
    /// A snapshot is sent whenever services are discovered or a value of the selected device changes, and a
    /// heartbeat every [`SessionConfig::heartbeat_interval`](crate::SessionConfig::heartbeat_interval) and on
    /// every status change. A failed reconnect leaves the device selected with a
    /// [`Disconnected`](ConnectionStatus::Disconnected) status.
    ///
    /// Runs until the future is dropped. Only one call runs at a time; others return immediately.
    pub async fn run(&self) {
        let Some(mut inbox) = self.inbox.try_lock() else {
            warn!("Remote support is already running");
            return;
        };
        let interval = self.session.config().heartbeat_interval;
        let mut heartbeat = Delay::new(interval);
        let mut reconnect: Option<Boxed<(Device, crate::Result<()>)>> = None;
        self.send_heartbeat().await;

        loop {
            let wake = {
                let event = async {
                    match inbox.next().await {
                        Some(event) => Wake::Event(event),
                        None => Wake::Closed,
                    }
                };
                let tick = async {
                    (&mut heartbeat).await;
                    Wake::Heartbeat
                };
                let reconnected = async {
                    match reconnect.as_mut() {
                        Some(attempt) => {
                            let (device, result) = attempt.await;
                            Wake::Reconnected(device, result)
                        }
                        None => future::pending().await,
                    }
                };
                event.or(tick).or(reconnected).await
            };

            match wake {
                Wake::Event(SupportEvent::DeviceData) => self.send_device_data().await,
                Wake::Event(SupportEvent::Heartbeat) => self.send_heartbeat().await,
                Wake::Event(SupportEvent::Reconnect(device)) => {
                    if reconnect.is_none() && self.is_selected(&device) {
                        info!("Reconnecting to {}", device);
                        reconnect = Some(
                            async move {
                                let result = device.connect(true).await;
                                (device, result)
                            }
                            .boxed(),
                        );
                    }
                }
                Wake::Reconnected(device, result) => {
                    reconnect = None;
                    if let Err(err) = result {
                        if self.is_selected(&device) {
                            warn!("Reconnecting to {} failed: {}", device, err);
                            self.set_status(ConnectionStatus::Disconnected);
                            self.send_heartbeat().await;
                        }
                    }
                }
                Wake::Heartbeat => {
                    heartbeat.reset(interval);
                    self.send_heartbeat().await;
                }
                Wake::Closed => return,
            }
        }
    }

    async fn send_device_data(&self) {
        if let Err(err) = self.publish_device_data().await {
            warn!("Failed to publish device data: {}", err);
        }
    }

    async fn send_heartbeat(&self) {
        if let Err(err) = self.publish_heartbeat().await {
            warn!("Failed to publish heartbeat: {}", err);
        }
    }
}

impl<T: SupportTransport + 'static> Observer for RemoteSupport<T> {
    fn observer_id(&self) -> &str {
        &self.id
    }
}

impl<T: SupportTransport + 'static> SessionObserver for RemoteSupport<T> {
    fn did_connect(&self, device: &Device) {
        if self.is_selected(device) {
            self.set_status(ConnectionStatus::Connected);
            self.post(SupportEvent::Heartbeat);
        }
    }

    fn did_disconnect(&self, device: &Device) {
        if !self.is_selected(device) {
            return;
        }
        self.set_status(ConnectionStatus::Reconnecting);
        self.post(SupportEvent::Heartbeat);
        if !device.is_reconnecting() {
            self.post(SupportEvent::Reconnect(device.clone()));
        }
    }
}

impl<T: SupportTransport + 'static> PeripheralObserver for RemoteSupport<T> {
    fn did_discover_services(&self, device: &Device, _services: &[Service]) {
        if self.is_selected(device) {
            self.post(SupportEvent::DeviceData);
        }
    }

    fn did_discover_characteristics(&self, device: &Device, service: &Service) {
        if !self.is_selected(device) {
            return;
        }
        for characteristic in service.characteristics().iter().filter(|c| c.can_read()) {
            if let Err(err) = device.refresh_value(characteristic) {
                debug!("Not reading {} on {}: {}", characteristic.uuid(), device, err);
            }
        }
    }

    fn did_update_characteristic(&self, device: &Device, _characteristic: &Characteristic) {
        if self.is_selected(device) {
            self.post(SupportEvent::DeviceData);
        }
    }

    fn did_update_descriptor(&self, device: &Device, _characteristic: &Characteristic, _descriptor: &Descriptor) {
        if self.is_selected(device) {
            self.post(SupportEvent::DeviceData);
        }
    }
}

fn decode<R: DeserializeOwned>(payload: serde_json::Value) -> Result<R, SupportError> {
    Ok(serde_json::from_value(payload)?)
}

fn respond<R: Serialize>(response: R) -> Result<serde_json::Value, SupportError> {
    Ok(serde_json::to_value(response)?)
}
