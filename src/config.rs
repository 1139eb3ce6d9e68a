//! Session tuning

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts, windows and thresholds used by a [`Session`](crate::Session) and its devices.
///
/// Missing fields take their default values when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a connect may stay pending before it fails and is cancelled
    pub connect_timeout: Duration,
    /// Deadline for a characteristic read
    pub read_timeout: Duration,
    /// Deadline for a characteristic write
    pub write_timeout: Duration,
    /// Deadline for enabling or disabling notifications, if any
    pub notify_timeout: Option<Duration>,
    /// How long after its last advertisement a device is still considered present
    pub validity_window: Duration,
    /// Minimum RSSI change, in dBm, before a new reading replaces the stored one
    pub rssi_smoothing_threshold: u16,
    /// Number of attempts made by [`Device::connect`](crate::Device::connect) when retrying
    pub connect_attempts: u32,
    /// Pause between reconnect attempts
    pub retry_delay: Duration,
    /// How long to scan before answering a remote device list request
    pub device_list_scan_window: Duration,
    /// Interval between heartbeats sent by [`RemoteSupport::run`](crate::RemoteSupport::run)
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            notify_timeout: None,
            validity_window: Duration::from_secs(30),
            rssi_smoothing_threshold: 5,
            connect_attempts: 3,
            retry_delay: Duration::ZERO,
            device_list_scan_window: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}
