//! Gattlink errors

use std::sync::Arc;

use num_enum::TryFromPrimitive;

/// The error type for session and transaction operations
///
/// Errors are cheap to clone so a single result can be delivered to every caller sharing a pending
/// operation.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    message: String,
}

impl Error {
    pub(crate) fn new(
        kind: ErrorKind,
        source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
        message: impl Into<String>,
    ) -> Self {
        Error {
            kind,
            source,
            message: message.into(),
        }
    }

    /// Returns the corresponding [ErrorKind] for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message for this error.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.message.is_empty(), &self.source) {
            (true, None) => write!(f, "{}", &self.kind),
            (false, None) => write!(f, "{}: {}", &self.kind, &self.message),
            (true, Some(err)) => write!(f, "{}: {}", &self.kind, err),
            (false, Some(err)) => write!(f, "{}: {} ({})", &self.kind, &self.message, err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|x| {
            let x: &(dyn std::error::Error + 'static) = &**x;
            x
        })
    }
}

/// A list of general categories of session and transaction error.
///
/// The [`Display`](std::fmt::Display) text of each kind is suitable for showing to a user.
#[non_exhaustive]
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// Bluetooth must be authorized
    NotAuthorized,
    /// Bluetooth is not supported on this device
    Unsupported,
    /// Device's bluetooth must be turned on
    PoweredOff,
    /// Resetting bluetooth
    Resetting,
    /// Bluetooth is not ready
    NotReady,
    /// Could not connect to device
    CouldNotConnect,
    /// Connection attempt was cancelled
    ConnectionCancelled,
    /// Reading characteristic timed out
    ReadTimeout,
    /// Writing to characteristic timed out
    WriteTimeout,
    /// Changing notification state timed out
    NotifyTimeout,
    /// Cannot perform operation because there is no connected device
    NoConnectedDevice,
    /// Device is not connected
    NotConnected,
    /// Characteristic does not allow read operations
    CharacteristicNotReadable,
    /// Characteristic does not allow write operations
    CharacteristicNotWritable,
    /// Characteristic does not have ability to notify
    CharacteristicNotNotifiable,
    /// protocol error: {0}
    Protocol(AttError),
    /// not found
    NotFound,
    /// invalid parameter
    InvalidParameter,
    /// an internal error has occured
    Internal,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            kind,
            source: None,
            message: String::new(),
        }
    }
}

impl From<AttError> for Error {
    fn from(err: AttError) -> Self {
        ErrorKind::Protocol(err).into()
    }
}

impl From<futures_channel::oneshot::Canceled> for Error {
    fn from(err: futures_channel::oneshot::Canceled) -> Self {
        Error::new(
            ErrorKind::Internal,
            Some(Arc::new(err)),
            "pending operation was dropped before it was resolved",
        )
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::new(ErrorKind::InvalidParameter, Some(Arc::new(err)), String::new())
    }
}

/// Bluetooth Attribute Protocol error codes. See the Bluetooth Core Specification, Vol 3, Part F, §3.4.1.1
#[repr(u8)]
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive)]
pub enum AttErrorCode {
    /// The operation completed successfully.
    Success = 0x00,
    /// The attribute handle given was not valid on this server.
    InvalidHandle = 0x01,
    /// The attribute cannot be read.
    ReadNotPermitted = 0x02,
    /// The attribute cannot be written.
    WriteNotPermitted = 0x03,
    /// The attribute PDU was invalid.
    InvalidPdu = 0x04,
    /// Authentication is required to access the attribute.
    InsufficientAuthentication = 0x05,
    /// The server does not support the request.
    RequestNotSupported = 0x06,
    /// Offset was past the end of the attribute.
    InvalidOffset = 0x07,
    /// Authorization is required to access the attribute.
    InsufficientAuthorization = 0x08,
    /// Too many prepare writes have been queued.
    PrepareQueueFull = 0x09,
    /// No attribute found within the given handle range.
    AttributeNotFound = 0x0a,
    /// The attribute cannot be read using the Read Blob Request.
    AttributeNotLong = 0x0b,
    /// The encryption key size is insufficient.
    InsufficientEncryptionKeySize = 0x0c,
    /// The attribute value length is invalid for the operation.
    InvalidAttributeValueLength = 0x0d,
    /// The request encountered an unlikely error.
    UnlikelyError = 0x0e,
    /// Encryption is required to access the attribute.
    InsufficientEncryption = 0x0f,
    /// The attribute type is not a supported grouping attribute.
    UnsupportedGroupType = 0x10,
    /// Insufficient resources to complete the request.
    InsufficientResources = 0x11,
    /// The server requests the client to rediscover the database.
    DatabaseOutOfSync = 0x12,
    /// The attribute parameter value was not allowed.
    ValueNotAllowed = 0x13,
    /// Write Request Rejected
    WriteRequestRejected = 0xfc,
    /// Client Characteristic Configuration Descriptor Improperly Configured
    CccdImproperlyConfigured = 0xfd,
    /// Procedure Already in Progress
    ProcedureAlreadyInProgress = 0xfe,
    /// Out of Range
    OutOfRange = 0xff,
}

/// Bluetooth Attribute Protocol error reported by the platform driver.
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttError {
    /// {0}
    Known(AttErrorCode),
    /// application specific error: {0}
    Application(u8),
    /// unknown error: {0}
    Reserved(u8),
}

impl From<u8> for AttError {
    fn from(number: u8) -> Self {
        match AttErrorCode::try_from(number) {
            Ok(code) => AttError::Known(code),
            Err(_) if (0x80..0xa0).contains(&number) => AttError::Application(number),
            Err(_) => AttError::Reserved(number),
        }
    }
}

/// Failure to interpret raw characteristic or descriptor bytes.
///
/// Decode failures never surface to users directly; callers fall back to a textual rendering of the
/// raw bytes.
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeError {
    /// expected {expected} bytes, found {actual}
    LengthMismatch {
        /// Width of the target type
        expected: usize,
        /// Length of the input
        actual: usize,
    },
    /// presentation format descriptor is {0} bytes long, expected at least 4
    ShortDescriptor(usize),
    /// unknown presentation format code {0}
    UnknownFormat(u8),
    /// invalid hex string
    InvalidHex,
}

impl std::error::Error for DecodeError {}
