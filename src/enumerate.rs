use crate::os::{Backend, DeviceHandle, NodeProperty, OpenMode};
use crate::tree::TreeWalker;
use crate::{DeviceIdentity, HidError, HidResult};

/// Setup class reported for nodes with a class-compliant HID driver.
pub const HID_CLASS_NAME: &str = "HIDClass";

/// Snapshot of a HID interface, taken at enumeration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub identity: DeviceIdentity,
    /// Device Vendor ID
    pub vendor_id: u16,
    /// Device Product ID
    pub product_id: u16,
    /// Device Release Number in binary-coded decimal, also known as Device
    /// Version Number
    pub release_number: u16,
    /// Usage Page for this Device/Interface.
    pub usage_page: u16,
    /// Usage for this Device/Interface.
    pub usage: u16,
    pub serial_number: Option<String>,
    pub product_string: Option<String>,
    pub manufacturer_string: Option<String>,
    /// The USB interface which this logical device represents, or -1 when
    /// the OS doesn't tell.
    pub interface_number: i32,
}

/// Walks the HID interfaces of a backend into descriptors.
pub struct Enumerator<'a, B: Backend> {
    backend: &'a B,
    vendor_id: u16,
    product_id: u16,
}

impl<'a, B: Backend> Enumerator<'a, B> {
    pub fn new(backend: &'a B) -> Enumerator<'a, B> {
        Enumerator {
            backend,
            vendor_id: 0,
            product_id: 0,
        }
    }

    /// Only keep devices matching `vendor_id`/`product_id`. 0 matches any.
    pub fn filter(mut self, vendor_id: u16, product_id: u16) -> Enumerator<'a, B> {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    /// Take a fresh snapshot of the attached HID interfaces.
    ///
    /// Nodes without a class-compliant driver, nodes whose ancestry can't be
    /// resolved, and nodes that vanish before they can be queried are left
    /// out. Any other OS failure aborts the whole enumeration.
    pub fn enumerate(&self) -> HidResult<Vec<DeviceDescriptor>> {
        let mut devices = Vec::new();
        let nodes = self.backend.interface_nodes().map_err(HidError::EnumerationFailure)?;

        for node in nodes {
            let node = node.map_err(HidError::EnumerationFailure)?;
            if let Some(device) = self.describe(&node)? {
                if self.matches(&device) {
                    devices.push(device);
                }
            }
        }

        log::debug!("Enumerated {} hid devices", devices.len());
        Ok(devices)
    }

    fn matches(&self, device: &DeviceDescriptor) -> bool {
        (self.vendor_id == 0 || device.vendor_id == self.vendor_id)
            && (self.product_id == 0 || device.product_id == self.product_id)
    }

    fn describe(&self, node: &B::Node) -> HidResult<Option<DeviceDescriptor>> {
        let path = self.backend.interface_path(node).map_err(HidError::EnumerationFailure)?;

        /* Make sure this device is of Setup Class "HIDClass" and has a
           driver bound to it. */
        let class = self.backend.node_property(node, NodeProperty::Class)
            .map_err(HidError::EnumerationFailure)?;
        if class.as_deref() != Some(HID_CLASS_NAME) {
            log::debug!("Skipping {}: setup class is {:?}", path, class);
            return Ok(None);
        }
        let driver = self.backend.node_property(node, NodeProperty::Driver)
            .map_err(HidError::EnumerationFailure)?;
        if driver.is_none() {
            log::debug!("Skipping {}: no driver bound", path);
            return Ok(None);
        }

        let node_instance = self.backend.instance_id(node).map_err(HidError::EnumerationFailure)?;
        let instance_id = match TreeWalker::new(self.backend).resolve_usb_instance(&node_instance) {
            Ok(v) => v,
            Err(err) => {
                log::warn!("Skipping {}: failed to resolve owning device: {}", path, err);
                return Ok(None);
            }
        };

        let identity = match DeviceIdentity::compose(path, instance_id) {
            Ok(v) => v,
            Err(err) => {
                log::warn!("Skipping node {}: {}", node_instance, err);
                return Ok(None);
            }
        };

        let handle = match self.backend.open_handle(identity.interface_path_only(), OpenMode::AttributesOnly) {
            Ok(v) => v,
            Err(err) => {
                // The device may well have vanished since the class walk.
                log::warn!("Skipping {}: {}", identity.interface_path_only(), err);
                return Ok(None);
            }
        };

        let attrib = handle.attributes().map_err(HidError::EnumerationFailure)?;
        let serial_number = handle.serial_number().unwrap_or(None);
        let manufacturer_string = handle.manufacturer_string().unwrap_or(None);
        let product_string = handle.product_string().unwrap_or(None);
        let interface_number = handle.interface_number()
            .unwrap_or_else(|| interface_number(identity.interface_path_only()));
        drop(handle);

        Ok(Some(DeviceDescriptor {
            identity,
            vendor_id: attrib.vendor_id,
            product_id: attrib.product_id,
            release_number: attrib.release_number,
            usage_page: attrib.usage_page,
            usage: attrib.usage,
            serial_number,
            product_string,
            manufacturer_string,
            interface_number,
        }))
    }
}

/// Interface Number. It can sometimes be parsed out of the path if a device
/// has multiple interfaces (see "Hardware IDs for HID Devices" on MSDN). If
/// it's not in the path, it's -1.
pub fn interface_number(path: &str) -> i32 {
    let lower = path.to_ascii_lowercase();
    let hex_str_idx = match lower.find("&mi_") {
        Some(v) => v + 4,
        None => return -1,
    };
    let hex_str_len = lower[hex_str_idx..]
        .bytes()
        .position(|v| !v.is_ascii_hexdigit())
        .unwrap_or(lower.len() - hex_str_idx);
    i32::from_str_radix(&lower[hex_str_idx..hex_str_idx + hex_str_len], 16).unwrap_or(-1)
}
