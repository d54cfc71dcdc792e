//! The OS facilities the core is built on, and the platform implementations
//! of them.

use std::sync::mpsc::Receiver;
use std::time::Duration;

use crate::OsResult;
#[cfg(target_os = "linux")]
use crate::OsError;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use self::windows::*;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;

#[cfg(windows)]
pub type PlatformBackend = WindowsBackend;
#[cfg(target_os = "linux")]
pub type PlatformBackend = LinuxBackend;

/// Instance ids of USB devices start with this bus prefix.
pub const USB_INSTANCE_PREFIX: &str = "USB\\";

/// Per-node properties read during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeProperty {
    /// Setup class of the node's driver ("HIDClass" for class-compliant HID).
    Class,
    /// Driver bound to the node, if any.
    Driver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// No read/write access: enough to query attributes without disturbing
    /// anyone else holding the device.
    AttributesOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attributes {
    pub vendor_id: u16,
    pub product_id: u16,
    pub release_number: u16,
    pub usage_page: u16,
    pub usage: u16,
}

/// A device instance disappeared from the device tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalEvent {
    pub instance_id: String,
}

/// Tears down an OS notification registration when dropped.
pub struct Unsubscribe(Option<Box<dyn FnOnce() + Send>>);

impl Unsubscribe {
    pub fn new<F: FnOnce() + Send + 'static>(f: F) -> Unsubscribe {
        Unsubscribe(Some(Box::new(f)))
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// A live removal notification registration. Events arrive on `events`
/// until `unsubscribe` is dropped, after which the channel disconnects.
pub struct RemovalSubscription {
    pub events: Receiver<RemovalEvent>,
    pub unsubscribe: Unsubscribe,
}

/// Parent/child queries on the OS device tree.
pub trait DeviceTree {
    /// Instance id of the parent of `instance_id`, or `None` at the root.
    fn parent(&self, instance_id: &str) -> OsResult<Option<String>>;

    /// Whether `instance_id` names a USB device node.
    fn is_usb_device(&self, instance_id: &str) -> bool {
        instance_id.starts_with(USB_INSTANCE_PREFIX)
    }
}

/// Wakes up I/O blocked on a handle, for good: once fired, every blocking
/// call on that handle returns right away with an error.
pub struct Interrupter(Box<dyn Fn() + Send + Sync>);

impl Interrupter {
    pub fn new<F: Fn() + Send + Sync + 'static>(f: F) -> Interrupter {
        Interrupter(Box::new(f))
    }

    pub fn interrupt(&self) {
        (self.0)()
    }
}

/// An opened OS handle to a HID interface. Dropping it releases the handle.
pub trait DeviceHandle: Send {
    /// Lets the device be closed while another thread is blocked reading
    /// from it. Handles without blocking I/O don't need one.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }

    fn attributes(&self) -> OsResult<Attributes>;

    fn serial_number(&self) -> OsResult<Option<String>>;
    fn manufacturer_string(&self) -> OsResult<Option<String>>;
    fn product_string(&self) -> OsResult<Option<String>>;

    /// USB interface number, when the OS reports it out of band.
    fn interface_number(&self) -> Option<i32> {
        None
    }

    fn write(&mut self, data: &[u8]) -> OsResult<usize>;

    /// Read one input report. `None` blocks until a report arrives; on
    /// timeout 0 is returned.
    fn read_timeout(&mut self, data: &mut [u8], timeout: Option<Duration>) -> OsResult<usize>;

    /// Send a Feature report. The first byte of `data` is the report id
    /// (0x0 for devices without numbered reports).
    fn send_feature_report(&mut self, data: &[u8]) -> OsResult<usize>;

    /// Get a Feature report. Set the first byte of `data` to the wanted
    /// report id beforehand.
    fn get_feature_report(&mut self, data: &mut [u8]) -> OsResult<usize>;
}

/// Everything the core needs from the host OS.
pub trait Backend: DeviceTree + Send + Sync + 'static {
    type Node;
    type Nodes: Iterator<Item = OsResult<Self::Node>>;
    type Handle: DeviceHandle + 'static;

    /// Walk the HID interfaces present right now, in OS order. Every call
    /// starts over.
    fn interface_nodes(&self) -> OsResult<Self::Nodes>;

    fn interface_path(&self, node: &Self::Node) -> OsResult<String>;

    /// `Ok(None)` when the node does not carry the property.
    fn node_property(&self, node: &Self::Node, property: NodeProperty) -> OsResult<Option<String>>;

    fn instance_id(&self, node: &Self::Node) -> OsResult<String>;

    fn open_handle(&self, path: &str, mode: OpenMode) -> OsResult<Self::Handle>;

    fn subscribe_removals(&self) -> OsResult<RemovalSubscription>;
}

/// Decode a wide buffer filled by the OS, stopping at the first nul.
#[cfg(windows)]
pub(crate) fn string_from_wide(buf: &[u16]) -> String {
    let end_pos = buf.iter().position(|v| *v == 0).unwrap_or(buf.len());
    widestring::U16Str::from_slice(&buf[..end_pos]).to_string_lossy()
}

#[cfg(target_os = "linux")]
pub(crate) fn not_found(fnname: &'static str, what: String) -> OsError {
    OsError::new(fnname, std::io::Error::new(std::io::ErrorKind::NotFound, what))
}
