//! Discover, open and watch HID devices.
//!
//! [`HidApi::enumerate`] lists the HID interfaces attached right now, each
//! carrying a [`DeviceIdentity`] that stays valid across enumerations and
//! driver re-binding. [`HidApi::open`] turns an identity into a
//! [`HidDevice`]. When the device is unplugged, its removal listener is
//! called once and the device is closed for you.

mod device;
mod enumerate;
mod error;
mod identity;
pub mod os;
mod registry;
mod removal;
mod tree;

use std::sync::Arc;

pub use device::{DeviceState, HidDevice, RemovalListener};
pub use enumerate::{interface_number, DeviceDescriptor, Enumerator, HID_CLASS_NAME};
pub use error::{HidError, HidResult, OsError, OsResult};
pub use identity::{DeviceIdentity, SEPARATOR};
pub use registry::DeviceRegistry;
pub use removal::{NotifierState, RemovalNotifier};
pub use tree::TreeWalker;

use os::{Backend, OpenMode};

#[derive(Debug, Clone)]
pub struct Config {
    /// Subscribe to removal notifications when the api is created.
    pub listen_for_removals: bool,
    /// Name of the thread delivering removal events to listeners.
    pub dispatcher_thread_name: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            listen_for_removals: true,
            dispatcher_thread_name: "hidwatch-removal".to_string(),
        }
    }
}

pub struct HidApi<B: Backend> {
    backend: B,
    registry: Arc<DeviceRegistry>,
    notifier: RemovalNotifier,
}

#[cfg(any(windows, target_os = "linux"))]
impl HidApi<os::PlatformBackend> {
    /// Set up the api on the host's own device stack.
    pub fn new() -> HidResult<HidApi<os::PlatformBackend>> {
        HidApi::with_backend(os::PlatformBackend::default())
    }
}

impl<B: Backend> HidApi<B> {
    pub fn with_backend(backend: B) -> HidResult<HidApi<B>> {
        HidApi::with_config(backend, Config::default())
    }

    /// Fails with [`HidError::SubscriptionFailure`] when removal
    /// notifications are asked for but can't be set up.
    pub fn with_config(backend: B, config: Config) -> HidResult<HidApi<B>> {
        let registry = Arc::new(DeviceRegistry::new());
        let notifier = RemovalNotifier::new();
        if config.listen_for_removals {
            notifier.start(&backend, registry.clone(), &config.dispatcher_thread_name)?;
        }
        Ok(HidApi { backend, registry, notifier })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// List the HID interfaces attached right now.
    pub fn enumerate(&self) -> HidResult<Vec<DeviceDescriptor>> {
        Enumerator::new(&self.backend).enumerate()
    }

    /// Like [`HidApi::enumerate`], keeping only devices matching the given
    /// Vendor ID and Product ID. 0 matches any id.
    pub fn enumerate_filtered(&self, vendor_id: u16, product_id: u16) -> HidResult<Vec<DeviceDescriptor>> {
        Enumerator::new(&self.backend).filter(vendor_id, product_id).enumerate()
    }

    /// Open the device behind `identity` for reading and writing.
    ///
    /// [`HidError::DeviceOpenError`] usually means the device went away
    /// since it was enumerated.
    pub fn open(&self, identity: &DeviceIdentity) -> HidResult<HidDevice> {
        let path = identity.interface_path_only();
        let handle = self.backend.open_handle(path, OpenMode::ReadWrite)
            .map_err(|cause| HidError::DeviceOpenError { path: path.to_string(), cause })?;

        let device = HidDevice::new(identity.clone(), Box::new(handle), self.registry.clone());
        self.registry.register(&device);
        log::debug!("Opened {}", identity);
        Ok(device)
    }

    /// Open a device from its serialized identity.
    pub fn open_serialized(&self, identity: &str) -> HidResult<HidDevice> {
        self.open(&DeviceIdentity::parse(identity)?)
    }

    /// Open a HID device using a Vendor ID (VID), Product ID (PID) and
    /// optionally a serial number.
    ///
    /// If `serial_number` is None, the first device with the specified VID
    /// and PID is opened.
    pub fn open_vid_pid(&self, vendor_id: u16, product_id: u16, serial_number: Option<&str>) -> HidResult<HidDevice> {
        for cur_dev in self.enumerate_filtered(vendor_id, product_id)? {
            match (serial_number, cur_dev.serial_number.as_deref()) {
                (Some(expected_sn), Some(sn)) if sn == expected_sn => return self.open(&cur_dev.identity),
                (None, _) => return self.open(&cur_dev.identity),
                _ => (),
            }
        }
        Err(HidError::DeviceNotFound)
    }

    /// Close `device`. Does nothing if it's already closed, and never calls
    /// its removal listener.
    pub fn close(&self, device: &HidDevice) {
        device.close();
    }

    pub fn register_removal_listener<F>(&self, device: &HidDevice, listener: F)
    where
        F: FnOnce(&HidDevice) + Send + 'static,
    {
        device.set_removal_listener(listener);
    }

    pub fn open_device_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_listening(&self) -> bool {
        self.notifier.state() == NotifierState::Listening
    }

    /// Stop watching for removals. Devices stay open.
    pub fn shutdown(&self) {
        self.notifier.stop();
    }
}

impl<B: Backend> Drop for HidApi<B> {
    fn drop(&mut self) {
        self.notifier.stop();
    }
}
