use std::error::Error;
use std::io;

/// A failed OS call: the name of the primitive plus the status it reported.
#[derive(Debug)]
pub struct OsError {
    pub fnname: &'static str,
    pub source: io::Error,
}

impl OsError {
    pub fn new(fnname: &'static str, source: io::Error) -> OsError {
        OsError { fnname, source }
    }

    /// Capture the calling thread's last OS error for `fnname`.
    pub fn last(fnname: &'static str) -> OsError {
        OsError {
            fnname,
            source: io::Error::last_os_error(),
        }
    }

    /// Wrap a raw status code that is not a thread-local error (CONFIGRET,
    /// NTSTATUS, ...).
    pub fn status(fnname: &'static str, code: u32) -> OsError {
        OsError {
            fnname,
            source: io::Error::new(io::ErrorKind::Other, format!("status {:#x}", code)),
        }
    }
}

impl std::fmt::Display for OsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.fnname, self.source)
    }
}

impl Error for OsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

pub type OsResult<T> = Result<T, OsError>;

#[derive(Debug)]
pub enum HidError {
    MalformedIdentity { identity: String, reason: &'static str },
    EnumerationFailure(OsError),
    DeviceOpenError { path: String, cause: OsError },
    SubscriptionFailure(OsError),
    DeviceNotFound,
    DeviceClosed,
    Io(OsError),
}

impl std::fmt::Display for HidError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HidError::MalformedIdentity { identity, reason } => {
                write!(f, "Malformed device identity {:?}: {}", identity, reason)
            }
            HidError::EnumerationFailure(cause) => {
                write!(f, "Failed to enumerate hid devices: {}", cause)
            }
            HidError::DeviceOpenError { path, cause } => {
                write!(f, "Failed opening hid device {}: {}", path, cause)
            }
            HidError::SubscriptionFailure(cause) => {
                write!(f, "Failed to subscribe to device removal events: {}", cause)
            }
            HidError::DeviceNotFound => write!(f, "Device not found"),
            HidError::DeviceClosed => write!(f, "Device is closed"),
            HidError::Io(cause) => write!(f, "hid transport error: {}", cause),
        }
    }
}

impl Error for HidError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HidError::EnumerationFailure(cause) => Some(cause),
            HidError::DeviceOpenError { cause, .. } => Some(cause),
            HidError::SubscriptionFailure(cause) => Some(cause),
            HidError::Io(cause) => Some(cause),
            _ => None,
        }
    }
}

pub type HidResult<T> = Result<T, HidError>;
