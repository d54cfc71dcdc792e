use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::device::{CloseCause, DeviceInner, HidDevice};

/// Devices currently open, indexed by the instance id removal events carry.
///
/// Entries don't keep devices alive: the application owns them, the registry
/// only finds them again when their instance goes away. Several devices can
/// share an instance id (interfaces of one composite device, or the same
/// interface opened twice).
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, Vec<(u64, Weak<DeviceInner>)>>>,
    next_token: AtomicU64,
}

impl DeviceRegistry {
    pub fn new() -> DeviceRegistry {
        DeviceRegistry {
            devices: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register(&self, device: &HidDevice) {
        let inner = device.inner();
        self.devices
            .lock()
            .entry(inner.identity().instance_id().to_string())
            .or_insert_with(Vec::new)
            .push((inner.token(), Arc::downgrade(inner)));
    }

    pub(crate) fn unregister(&self, device: &DeviceInner) {
        let mut devices = self.devices.lock();
        let instance_id = device.identity().instance_id();
        let now_empty = match devices.get_mut(instance_id) {
            Some(entries) => {
                entries.retain(|(token, weak)| *token != device.token() && weak.strong_count() > 0);
                entries.is_empty()
            }
            None => false,
        };
        if now_empty {
            devices.remove(instance_id);
        }
    }

    /// Close every open device registered under `instance_id` and notify
    /// their removal listeners. Returns how many devices this call closed.
    ///
    /// No lock is held while devices close, so listeners are free to call
    /// back into open/close.
    pub(crate) fn device_removed(&self, instance_id: &str) -> usize {
        let matched: Vec<Arc<DeviceInner>> = match self.devices.lock().get(instance_id) {
            Some(entries) => entries.iter().filter_map(|(_, weak)| weak.upgrade()).collect(),
            None => return 0,
        };

        matched.iter()
            .filter(|inner| inner.close(CloseCause::Removal))
            .count()
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.devices.lock().contains_key(instance_id)
    }

    /// Number of open devices.
    pub fn len(&self) -> usize {
        self.devices.lock().values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> DeviceRegistry {
        DeviceRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::{Attributes, DeviceHandle};
    use crate::{DeviceIdentity, OsResult};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct NullHandle;

    impl DeviceHandle for NullHandle {
        fn attributes(&self) -> OsResult<Attributes> { Ok(Attributes::default()) }
        fn serial_number(&self) -> OsResult<Option<String>> { Ok(None) }
        fn manufacturer_string(&self) -> OsResult<Option<String>> { Ok(None) }
        fn product_string(&self) -> OsResult<Option<String>> { Ok(None) }
        fn write(&mut self, data: &[u8]) -> OsResult<usize> { Ok(data.len()) }
        fn read_timeout(&mut self, _: &mut [u8], _: Option<Duration>) -> OsResult<usize> { Ok(0) }
        fn send_feature_report(&mut self, data: &[u8]) -> OsResult<usize> { Ok(data.len()) }
        fn get_feature_report(&mut self, data: &mut [u8]) -> OsResult<usize> { Ok(data.len()) }
    }

    fn open(registry: &Arc<DeviceRegistry>, path: &str, instance: &str) -> HidDevice {
        let identity = DeviceIdentity::compose(path, instance).unwrap();
        let device = HidDevice::new(identity, Box::new(NullHandle), registry.clone());
        registry.register(&device);
        device
    }

    #[test]
    fn removal_closes_every_interface_of_the_instance() {
        let registry = Arc::new(DeviceRegistry::new());
        let notified = Arc::new(AtomicUsize::new(0));
        let a = open(&registry, "mi_00", r"USB\VID_1\A");
        let b = open(&registry, "mi_01", r"USB\VID_1\A");
        let other = open(&registry, "mi_00", r"USB\VID_2\B");
        for dev in [&a, &b, &other].iter() {
            let n = notified.clone();
            dev.set_removal_listener(move |_| { n.fetch_add(1, Ordering::SeqCst); });
        }
        assert_eq!(registry.len(), 3);

        assert_eq!(registry.device_removed(r"USB\VID_1\A"), 2);
        assert_eq!(notified.load(Ordering::SeqCst), 2);
        assert!(!a.is_open());
        assert!(!b.is_open());
        assert!(other.is_open());
        assert!(!registry.contains(r"USB\VID_1\A"));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.device_removed(r"USB\VID_1\A"), 0);
        assert_eq!(notified.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_instance_is_ignored() {
        let registry = Arc::new(DeviceRegistry::new());
        let _dev = open(&registry, "mi_00", r"USB\VID_1\A");
        assert_eq!(registry.device_removed(r"USB\VID_9\Z"), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropping_a_device_unregisters_it() {
        let registry = Arc::new(DeviceRegistry::new());
        let dev = open(&registry, "mi_00", r"USB\VID_1\A");
        let twin = open(&registry, "mi_00", r"USB\VID_1\A");
        drop(dev);
        assert!(registry.contains(r"USB\VID_1\A"));
        drop(twin);
        assert!(registry.is_empty());
    }

    #[test]
    fn listener_may_reenter_registry() {
        let registry = Arc::new(DeviceRegistry::new());
        let dev = open(&registry, "mi_00", r"USB\VID_1\A");
        let r = registry.clone();
        dev.set_removal_listener(move |removed| {
            removed.close();
            let _replacement = open(&r, "mi_00", r"USB\VID_1\B");
            assert!(r.contains(r"USB\VID_1\B"));
        });
        assert_eq!(registry.device_removed(r"USB\VID_1\A"), 1);
        assert!(registry.is_empty());
    }
}
