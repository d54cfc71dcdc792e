use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::os::{DeviceHandle, Interrupter};
use crate::registry::DeviceRegistry;
use crate::{DeviceIdentity, HidError, HidResult};

const OPEN: u8 = 0;
const CLOSED: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Open,
    Closed,
}

/// Called once when an open device is physically removed. The device passed
/// in is already closed.
pub type RemovalListener = Box<dyn FnOnce(&HidDevice) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseCause {
    Application,
    Removal,
}

pub(crate) struct DeviceInner {
    identity: DeviceIdentity,
    token: u64,
    state: AtomicU8,
    handle: Mutex<Option<Box<dyn DeviceHandle>>>,
    /* Reachable without the handle lock, which a blocked read holds. */
    interrupter: Option<Interrupter>,
    listener: Mutex<Option<RemovalListener>>,
    registry: Arc<DeviceRegistry>,
}

impl DeviceInner {
    pub(crate) fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    /// Move the device to `Closed`. Returns false if someone else got there
    /// first, in which case nothing is done.
    pub(crate) fn close(self: &Arc<Self>, cause: CloseCause) -> bool {
        if self.state.compare_exchange(OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return false;
        }

        log::debug!("Closing {} ({:?})", self.identity.interface_path_only(), cause);
        if let Some(interrupter) = &self.interrupter {
            interrupter.interrupt();
        }
        drop(self.handle.lock().take());
        self.registry.unregister(self);

        if cause == CloseCause::Removal {
            // The listener may set a new listener on this very device.
            let listener = self.listener.lock().take();
            if let Some(listener) = listener {
                let device = HidDevice { inner: Arc::clone(self) };
                let res = panic::catch_unwind(AssertUnwindSafe(|| listener(&device)));
                if res.is_err() {
                    log::error!("Removal listener for {} panicked", self.identity);
                }
            }
        }
        true
    }
}

/// An opened HID interface.
///
/// Closing happens once, either through [`HidDevice::close`] (or dropping the
/// device) or because the device was unplugged, whichever comes first. After
/// that every I/O call fails with [`HidError::DeviceClosed`].
pub struct HidDevice {
    inner: Arc<DeviceInner>,
}

impl HidDevice {
    pub(crate) fn new(
        identity: DeviceIdentity,
        handle: Box<dyn DeviceHandle>,
        registry: Arc<DeviceRegistry>,
    ) -> HidDevice {
        let token = registry.next_token();
        let interrupter = handle.interrupter();
        HidDevice {
            inner: Arc::new(DeviceInner {
                identity,
                token,
                state: AtomicU8::new(OPEN),
                handle: Mutex::new(Some(handle)),
                interrupter,
                listener: Mutex::new(None),
                registry,
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<DeviceInner> {
        &self.inner
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    pub fn state(&self) -> DeviceState {
        match self.inner.state.load(Ordering::Acquire) {
            OPEN => DeviceState::Open,
            _ => DeviceState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == DeviceState::Open
    }

    /// Register `listener` to be told when this device is unplugged,
    /// replacing any previous one. Never called for an explicit close.
    pub fn set_removal_listener<F>(&self, listener: F)
    where
        F: FnOnce(&HidDevice) + Send + 'static,
    {
        *self.inner.listener.lock() = Some(Box::new(listener));
    }

    /// Release the OS handle. Closing an already closed device does nothing.
    pub fn close(&self) {
        self.inner.close(CloseCause::Application);
    }

    fn with_handle<T, F>(&self, f: F) -> HidResult<T>
    where
        F: FnOnce(&mut dyn DeviceHandle) -> crate::OsResult<T>,
    {
        let mut handle = self.inner.handle.lock();
        // Closed but not yet released: the interrupter already fired.
        if !self.is_open() {
            return Err(HidError::DeviceClosed);
        }
        match handle.as_mut() {
            Some(handle) => f(&mut **handle).map_err(|err| {
                if self.is_open() { HidError::Io(err) } else { HidError::DeviceClosed }
            }),
            None => Err(HidError::DeviceClosed),
        }
    }

    pub fn write(&self, data: &[u8]) -> HidResult<usize> {
        self.with_handle(|h| h.write(data))
    }

    /// Blocking read of one input report.
    pub fn read(&self, data: &mut [u8]) -> HidResult<usize> {
        self.with_handle(|h| h.read_timeout(data, None))
    }

    pub fn read_timeout(&self, data: &mut [u8], timeout: Duration) -> HidResult<usize> {
        self.with_handle(|h| h.read_timeout(data, Some(timeout)))
    }

    /// Send a Feature report to the device.
    ///
    /// Feature reports are sent over the Control endpoint as a
    /// Set_Report transfer. The first byte of `data` must contain the
    /// 'Report ID'. For devices which only support a single report, this must
    /// be set to 0x0. The remaining bytes contain the report data.
    pub fn send_feature_report(&self, data: &[u8]) -> HidResult<usize> {
        self.with_handle(|h| h.send_feature_report(data))
    }

    pub fn get_feature_report(&self, data: &mut [u8]) -> HidResult<usize> {
        self.with_handle(|h| h.get_feature_report(data))
    }

    pub fn serial_number(&self) -> HidResult<Option<String>> {
        self.with_handle(|h| h.serial_number())
    }

    pub fn manufacturer_string(&self) -> HidResult<Option<String>> {
        self.with_handle(|h| h.manufacturer_string())
    }

    pub fn product_string(&self) -> HidResult<Option<String>> {
        self.with_handle(|h| h.product_string())
    }
}

impl std::fmt::Debug for HidDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HidDevice")
            .field("identity", &self.inner.identity)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for HidDevice {
    fn drop(&mut self) {
        self.inner.close(CloseCause::Application);
    }
}
