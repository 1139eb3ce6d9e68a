//! `Uuid` extensions for Bluetooth UUIDs

use uuid::Uuid;

/// This is the Bluetooth Base UUID. It is used with 16-bit and 32-bit UUIDs
/// [defined](https://www.bluetooth.com/specifications/assigned-numbers/) by the Bluetooth SIG.
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Const function to create a 16-bit Bluetooth UUID
pub const fn bluetooth_uuid_from_u16(uuid: u16) -> Uuid {
    Uuid::from_u128(((uuid as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Const function to create a 32-bit Bluetooth UUID
pub const fn bluetooth_uuid_from_u32(uuid: u32) -> Uuid {
    Uuid::from_u128(((uuid as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Extension trait for [uuid::Uuid] with helper methods for dealing with Bluetooth 16-bit and 32-bit UUIDs
pub trait BluetoothUuidExt: private::Sealed + Sized {
    /// Creates a 16-bit Bluetooth UUID
    fn from_u16(uuid: u16) -> Self;

    /// Creates a 32-bit Bluetooth UUID
    fn from_u32(uuid: u32) -> Self;

    /// Parses a UUID string as reported by CoreBluetooth or typed by a user.
    ///
    /// Accepts 4 hex digits (16-bit), 8 hex digits (32-bit) or a full 128-bit UUID, with or without a `0x`
    /// prefix, in either case.
    fn parse_bluetooth_str(text: &str) -> Option<Self>;

    /// Returns `true` if self is a valid 16-bit Bluetooth UUID
    fn is_u16_uuid(&self) -> bool;

    /// Returns `true` if self is a valid 32-bit Bluetooth UUID
    fn is_u32_uuid(&self) -> bool;

    /// Tries to convert self into a 16-bit Bluetooth UUID
    fn try_to_u16(&self) -> Option<u16>;

    /// Tries to convert self into a 32-bit Bluetooth UUID
    fn try_to_u32(&self) -> Option<u32>;

    /// Formats the UUID in its shortest uppercase form: `"180F"` for 16-bit UUIDs, `"0001FFFF"` for 32-bit
    /// UUIDs, and the hyphenated 128-bit form otherwise.
    fn to_bluetooth_string(&self) -> String;
}

impl BluetoothUuidExt for Uuid {
    fn from_u16(uuid: u16) -> Self {
        bluetooth_uuid_from_u16(uuid)
    }

    fn from_u32(uuid: u32) -> Self {
        bluetooth_uuid_from_u32(uuid)
    }

    fn parse_bluetooth_str(text: &str) -> Option<Self> {
        let text = text.trim();
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        match digits.len() {
            4 => u16::from_str_radix(digits, 16).ok().map(Self::from_u16),
            8 => u32::from_str_radix(digits, 16).ok().map(Self::from_u32),
            _ => Uuid::parse_str(text).ok(),
        }
    }

    fn is_u16_uuid(&self) -> bool {
        let u = self.as_u128();
        (u & ((1 << 96) - 1)) == BLUETOOTH_BASE_UUID && (((u >> 96) as u32) & 0xffff0000) == 0
    }

    fn is_u32_uuid(&self) -> bool {
        let u = self.as_u128();
        (u & ((1 << 96) - 1)) == BLUETOOTH_BASE_UUID
    }

    fn try_to_u16(&self) -> Option<u16> {
        let u = self.as_u128();
        self.is_u16_uuid().then(|| (u >> 96) as u16)
    }

    fn try_to_u32(&self) -> Option<u32> {
        let u = self.as_u128();
        self.is_u32_uuid().then(|| (u >> 96) as u32)
    }

    fn to_bluetooth_string(&self) -> String {
        if let Some(short) = self.try_to_u16() {
            format!("{short:04X}")
        } else if let Some(short) = self.try_to_u32() {
            format!("{short:08X}")
        } else {
            format!("{self:X}")
        }
    }
}

mod private {
    use uuid::Uuid;

    pub trait Sealed {}

    impl Sealed for Uuid {}
}

/// Returns the Bluetooth SIG assigned name for `uuid`, if it is a known service, characteristic or descriptor.
pub fn assigned_name(uuid: &Uuid) -> Option<&'static str> {
    services::name(uuid)
        .or_else(|| characteristics::name(uuid))
        .or_else(|| descriptors::name(uuid))
}

macro_rules! assigned_numbers {
    ($(#[$meta:meta])* $module:ident { $($name:ident = $value:literal => $label:literal,)* }) => {
        $(#[$meta])*
        pub mod $module {
            #![allow(missing_docs)]

            use uuid::Uuid;

            use super::{bluetooth_uuid_from_u16, BluetoothUuidExt};

            $(pub const $name: Uuid = bluetooth_uuid_from_u16($value);)*

            /// Returns the assigned name of `uuid` if it is listed in this module
            pub fn name(uuid: &Uuid) -> Option<&'static str> {
                match uuid.try_to_u16()? {
                    $($value => Some($label),)*
                    _ => None,
                }
            }
        }
    };
}

assigned_numbers! {
    /// Bluetooth GATT Service 16-bit UUIDs
    services {
        GENERIC_ACCESS = 0x1800 => "Generic Access",
        GENERIC_ATTRIBUTE = 0x1801 => "Generic Attribute",
        IMMEDIATE_ALERT = 0x1802 => "Immediate Alert",
        LINK_LOSS = 0x1803 => "Link Loss",
        TX_POWER = 0x1804 => "Tx Power",
        CURRENT_TIME = 0x1805 => "Current Time",
        REFERENCE_TIME_UPDATE = 0x1806 => "Reference Time Update",
        NEXT_DST_CHANGE = 0x1807 => "Next DST Change",
        GLUCOSE = 0x1808 => "Glucose",
        HEALTH_THERMOMETER = 0x1809 => "Health Thermometer",
        DEVICE_INFORMATION = 0x180A => "Device Information",
        HEART_RATE = 0x180D => "Heart Rate",
        PHONE_ALERT_STATUS = 0x180E => "Phone Alert Status",
        BATTERY = 0x180F => "Battery",
        BLOOD_PRESSURE = 0x1810 => "Blood Pressure",
        ALERT_NOTIFICATION = 0x1811 => "Alert Notification",
        HUMAN_INTERFACE_DEVICE = 0x1812 => "Human Interface Device",
        SCAN_PARAMETERS = 0x1813 => "Scan Parameters",
        RUNNING_SPEED_AND_CADENCE = 0x1814 => "Running Speed and Cadence",
        AUTOMATION_IO = 0x1815 => "Automation IO",
        CYCLING_SPEED_AND_CADENCE = 0x1816 => "Cycling Speed and Cadence",
        CYCLING_POWER = 0x1818 => "Cycling Power",
        LOCATION_AND_NAVIGATION = 0x1819 => "Location and Navigation",
        ENVIRONMENTAL_SENSING = 0x181A => "Environmental Sensing",
        BODY_COMPOSITION = 0x181B => "Body Composition",
        USER_DATA = 0x181C => "User Data",
        WEIGHT_SCALE = 0x181D => "Weight Scale",
        BOND_MANAGEMENT = 0x181E => "Bond Management",
        CONTINUOUS_GLUCOSE_MONITORING = 0x181F => "Continuous Glucose Monitoring",
        INTERNET_PROTOCOL_SUPPORT = 0x1820 => "Internet Protocol Support",
        INDOOR_POSITIONING = 0x1821 => "Indoor Positioning",
        PULSE_OXIMETER = 0x1822 => "Pulse Oximeter",
        HTTP_PROXY = 0x1823 => "HTTP Proxy",
        TRANSPORT_DISCOVERY = 0x1824 => "Transport Discovery",
        OBJECT_TRANSFER = 0x1825 => "Object Transfer",
        FITNESS_MACHINE = 0x1826 => "Fitness Machine",
        MESH_PROVISIONING = 0x1827 => "Mesh Provisioning",
        MESH_PROXY = 0x1828 => "Mesh Proxy",
        RECONNECTION_CONFIGURATION = 0x1829 => "Reconnection Configuration",
    }
}

assigned_numbers! {
    /// Bluetooth GATT Characteristic 16-bit UUIDs
    characteristics {
        DEVICE_NAME = 0x2A00 => "Device Name",
        APPEARANCE = 0x2A01 => "Appearance",
        PERIPHERAL_PRIVACY_FLAG = 0x2A02 => "Peripheral Privacy Flag",
        RECONNECTION_ADDRESS = 0x2A03 => "Reconnection Address",
        PERIPHERAL_PREFERRED_CONNECTION_PARAMETERS = 0x2A04 => "Peripheral Preferred Connection Parameters",
        SERVICE_CHANGED = 0x2A05 => "Service Changed",
        ALERT_LEVEL = 0x2A06 => "Alert Level",
        TX_POWER_LEVEL = 0x2A07 => "Tx Power Level",
        DATE_TIME = 0x2A08 => "Date Time",
        DAY_OF_WEEK = 0x2A09 => "Day of Week",
        DAY_DATE_TIME = 0x2A0A => "Day Date Time",
        EXACT_TIME_256 = 0x2A0C => "Exact Time 256",
        DST_OFFSET = 0x2A0D => "DST Offset",
        TIME_ZONE = 0x2A0E => "Time Zone",
        LOCAL_TIME_INFORMATION = 0x2A0F => "Local Time Information",
        TIME_WITH_DST = 0x2A11 => "Time with DST",
        TIME_ACCURACY = 0x2A12 => "Time Accuracy",
        TIME_SOURCE = 0x2A13 => "Time Source",
        REFERENCE_TIME_INFORMATION = 0x2A14 => "Reference Time Information",
        TIME_UPDATE_CONTROL_POINT = 0x2A16 => "Time Update Control Point",
        TIME_UPDATE_STATE = 0x2A17 => "Time Update State",
        GLUCOSE_MEASUREMENT = 0x2A18 => "Glucose Measurement",
        BATTERY_LEVEL = 0x2A19 => "Battery Level",
        TEMPERATURE_MEASUREMENT = 0x2A1C => "Temperature Measurement",
        TEMPERATURE_TYPE = 0x2A1D => "Temperature Type",
        INTERMEDIATE_TEMPERATURE = 0x2A1E => "Intermediate Temperature",
        MEASUREMENT_INTERVAL = 0x2A21 => "Measurement Interval",
        BOOT_KEYBOARD_INPUT_REPORT = 0x2A22 => "Boot Keyboard Input Report",
        SYSTEM_ID = 0x2A23 => "System ID",
        MODEL_NUMBER_STRING = 0x2A24 => "Model Number String",
        SERIAL_NUMBER_STRING = 0x2A25 => "Serial Number String",
        FIRMWARE_REVISION_STRING = 0x2A26 => "Firmware Revision String",
        HARDWARE_REVISION_STRING = 0x2A27 => "Hardware Revision String",
        SOFTWARE_REVISION_STRING = 0x2A28 => "Software Revision String",
        MANUFACTURER_NAME_STRING = 0x2A29 => "Manufacturer Name String",
        IEEE_11073_20601_REGULATORY_CERTIFICATION_DATA_LIST = 0x2A2A => "IEEE 11073-20601 Regulatory Certification Data List",
        CURRENT_TIME = 0x2A2B => "Current Time",
        SCAN_REFRESH = 0x2A31 => "Scan Refresh",
        BOOT_KEYBOARD_OUTPUT_REPORT = 0x2A32 => "Boot Keyboard Output Report",
        BOOT_MOUSE_INPUT_REPORT = 0x2A33 => "Boot Mouse Input Report",
        GLUCOSE_MEASUREMENT_CONTEXT = 0x2A34 => "Glucose Measurement Context",
        BLOOD_PRESSURE_MEASUREMENT = 0x2A35 => "Blood Pressure Measurement",
        INTERMEDIATE_CUFF_PRESSURE = 0x2A36 => "Intermediate Cuff Pressure",
        HEART_RATE_MEASUREMENT = 0x2A37 => "Heart Rate Measurement",
        BODY_SENSOR_LOCATION = 0x2A38 => "Body Sensor Location",
        HEART_RATE_CONTROL_POINT = 0x2A39 => "Heart Rate Control Point",
        ALERT_STATUS = 0x2A3F => "Alert Status",
        RINGER_CONTROL_POINT = 0x2A40 => "Ringer Control Point",
        RINGER_SETTING = 0x2A41 => "Ringer Setting",
        ALERT_CATEGORY_ID_BIT_MASK = 0x2A42 => "Alert Category ID Bit Mask",
        ALERT_CATEGORY_ID = 0x2A43 => "Alert Category ID",
        ALERT_NOTIFICATION_CONTROL_POINT = 0x2A44 => "Alert Notification Control Point",
        UNREAD_ALERT_STATUS = 0x2A45 => "Unread Alert Status",
        NEW_ALERT = 0x2A46 => "New Alert",
        SUPPORTED_NEW_ALERT_CATEGORY = 0x2A47 => "Supported New Alert Category",
        SUPPORTED_UNREAD_ALERT_CATEGORY = 0x2A48 => "Supported Unread Alert Category",
        BLOOD_PRESSURE_FEATURE = 0x2A49 => "Blood Pressure Feature",
        HID_INFORMATION = 0x2A4A => "HID Information",
        REPORT_MAP = 0x2A4B => "Report Map",
        HID_CONTROL_POINT = 0x2A4C => "HID Control Point",
        REPORT = 0x2A4D => "Report",
        PROTOCOL_MODE = 0x2A4E => "Protocol Mode",
        SCAN_INTERVAL_WINDOW = 0x2A4F => "Scan Interval Window",
        PNP_ID = 0x2A50 => "PnP ID",
        GLUCOSE_FEATURE = 0x2A51 => "Glucose Feature",
        RECORD_ACCESS_CONTROL_POINT = 0x2A52 => "Record Access Control Point",
        RSC_MEASUREMENT = 0x2A53 => "RSC Measurement",
        RSC_FEATURE = 0x2A54 => "RSC Feature",
        SC_CONTROL_POINT = 0x2A55 => "SC Control Point",
        CSC_MEASUREMENT = 0x2A5B => "CSC Measurement",
        CSC_FEATURE = 0x2A5C => "CSC Feature",
        SENSOR_LOCATION = 0x2A5D => "Sensor Location",
        CYCLING_POWER_MEASUREMENT = 0x2A63 => "Cycling Power Measurement",
        CYCLING_POWER_FEATURE = 0x2A65 => "Cycling Power Feature",
        LOCATION_AND_SPEED = 0x2A67 => "Location and Speed",
        NAVIGATION = 0x2A68 => "Navigation",
        ELEVATION = 0x2A6C => "Elevation",
        PRESSURE = 0x2A6D => "Pressure",
        TEMPERATURE = 0x2A6E => "Temperature",
        HUMIDITY = 0x2A6F => "Humidity",
        TRUE_WIND_SPEED = 0x2A70 => "True Wind Speed",
        TRUE_WIND_DIRECTION = 0x2A71 => "True Wind Direction",
        UV_INDEX = 0x2A76 => "UV Index",
        WEIGHT = 0x2A98 => "Weight",
        CENTRAL_ADDRESS_RESOLUTION = 0x2AA6 => "Central Address Resolution",
        CGM_MEASUREMENT = 0x2AA7 => "CGM Measurement",
        RESOLVABLE_PRIVATE_ADDRESS_ONLY = 0x2AC9 => "Resolvable Private Address Only",
        FITNESS_MACHINE_FEATURE = 0x2ACC => "Fitness Machine Feature",
        TREADMILL_DATA = 0x2ACD => "Treadmill Data",
        INDOOR_BIKE_DATA = 0x2AD2 => "Indoor Bike Data",
        FITNESS_MACHINE_CONTROL_POINT = 0x2AD9 => "Fitness Machine Control Point",
        FITNESS_MACHINE_STATUS = 0x2ADA => "Fitness Machine Status",
    }
}

assigned_numbers! {
    /// Bluetooth GATT Descriptor 16-bit UUIDs
    descriptors {
        CHARACTERISTIC_EXTENDED_PROPERTIES = 0x2900 => "Characteristic Extended Properties",
        CHARACTERISTIC_USER_DESCRIPTION = 0x2901 => "Characteristic User Description",
        CLIENT_CHARACTERISTIC_CONFIGURATION = 0x2902 => "Client Characteristic Configuration",
        SERVER_CHARACTERISTIC_CONFIGURATION = 0x2903 => "Server Characteristic Configuration",
        CHARACTERISTIC_PRESENTATION_FORMAT = 0x2904 => "Characteristic Presentation Format",
        CHARACTERISTIC_AGGREGATE_FORMAT = 0x2905 => "Characteristic Aggregate Format",
        VALID_RANGE = 0x2906 => "Valid Range",
        EXTERNAL_REPORT_REFERENCE = 0x2907 => "External Report Reference",
        REPORT_REFERENCE = 0x2908 => "Report Reference",
        NUMBER_OF_DIGITALS = 0x2909 => "Number of Digitals",
        VALUE_TRIGGER_SETTING = 0x290A => "Value Trigger Setting",
        ENVIRONMENTAL_SENSING_CONFIGURATION = 0x290B => "Environmental Sensing Configuration",
        ENVIRONMENTAL_SENSING_MEASUREMENT = 0x290C => "Environmental Sensing Measurement",
        ENVIRONMENTAL_SENSING_TRIGGER_SETTING = 0x290D => "Environmental Sensing Trigger Setting",
        TIME_TRIGGER_SETTING = 0x290E => "Time Trigger Setting",
    }
}
