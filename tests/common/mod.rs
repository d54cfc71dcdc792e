//! In-memory device tree standing in for the OS in integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use hidwatch::os::{
    Attributes, Backend, DeviceHandle, DeviceTree, Interrupter, NodeProperty, OpenMode, RemovalEvent,
    RemovalSubscription, Unsubscribe,
};
use hidwatch::{OsError, OsResult, HID_CLASS_NAME};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone)]
pub struct FakeNode {
    pub path: String,
    pub class: Option<String>,
    pub driver: Option<String>,
    pub instance_id: String,
    pub attributes: Attributes,
    pub serial_number: Option<String>,
    pub product_string: Option<String>,
    /// Reads wait for data that never comes.
    pub blocks_reads: bool,
}

impl FakeNode {
    /// A class-compliant HID interface with a driver bound.
    pub fn hid(path: &str, instance_id: &str, vendor_id: u16, product_id: u16) -> FakeNode {
        FakeNode {
            path: path.to_string(),
            class: Some(HID_CLASS_NAME.to_string()),
            driver: Some("{745a17a0-74d3-11d0-b6fe-00a0c90f57da}\\0001".to_string()),
            instance_id: instance_id.to_string(),
            attributes: Attributes {
                vendor_id,
                product_id,
                release_number: 0x0100,
                usage_page: 0x01,
                usage: 0x02,
            },
            serial_number: None,
            product_string: None,
            blocks_reads: false,
        }
    }

    pub fn class(mut self, class: Option<&str>) -> FakeNode {
        self.class = class.map(str::to_string);
        self
    }

    pub fn driver(mut self, driver: Option<&str>) -> FakeNode {
        self.driver = driver.map(str::to_string);
        self
    }

    pub fn serial(mut self, serial: &str) -> FakeNode {
        self.serial_number = Some(serial.to_string());
        self
    }

    pub fn product(mut self, product: &str) -> FakeNode {
        self.product_string = Some(product.to_string());
        self
    }

    pub fn blocking_reads(mut self) -> FakeNode {
        self.blocks_reads = true;
        self
    }
}

#[derive(Default)]
pub struct FakeBackend {
    nodes: Vec<FakeNode>,
    parents: HashMap<String, String>,
    fail_subscribe: bool,
    unplugged: Mutex<HashSet<String>>,
    removals: Arc<Mutex<Option<Sender<RemovalEvent>>>>,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn new() -> FakeBackend {
        FakeBackend::default()
    }

    pub fn with_node(mut self, node: FakeNode) -> FakeBackend {
        self.nodes.push(node);
        self
    }

    pub fn with_parent(mut self, child: &str, parent: &str) -> FakeBackend {
        self.parents.insert(child.to_string(), parent.to_string());
        self
    }

    pub fn failing_subscription(mut self) -> FakeBackend {
        self.fail_subscribe = true;
        self
    }

    /// Make opening `path` fail from now on, as if it was unplugged.
    pub fn unplug(&self, path: &str) {
        self.unplugged.lock().insert(path.to_string());
    }

    /// Deliver a removal event. False when nobody is subscribed.
    pub fn remove(&self, instance_id: &str) -> bool {
        match self.removals.lock().as_ref() {
            Some(tx) => tx.send(RemovalEvent { instance_id: instance_id.to_string() }).is_ok(),
            None => false,
        }
    }

    /// Drop the removal channel as a crashed OS listener would.
    pub fn disconnect(&self) {
        self.removals.lock().take();
    }

    pub fn is_subscribed(&self) -> bool {
        self.removals.lock().is_some()
    }

    /// Handles opened so far, attribute-only ones included.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl DeviceTree for FakeBackend {
    fn parent(&self, instance_id: &str) -> OsResult<Option<String>> {
        Ok(self.parents.get(instance_id).cloned())
    }
}

impl Backend for FakeBackend {
    type Node = FakeNode;
    type Nodes = std::vec::IntoIter<OsResult<FakeNode>>;
    type Handle = FakeHandle;

    fn interface_nodes(&self) -> OsResult<Self::Nodes> {
        Ok(self.nodes.iter().cloned().map(Ok).collect::<Vec<_>>().into_iter())
    }

    fn interface_path(&self, node: &FakeNode) -> OsResult<String> {
        Ok(node.path.clone())
    }

    fn node_property(&self, node: &FakeNode, property: NodeProperty) -> OsResult<Option<String>> {
        Ok(match property {
            NodeProperty::Class => node.class.clone(),
            NodeProperty::Driver => node.driver.clone(),
        })
    }

    fn instance_id(&self, node: &FakeNode) -> OsResult<String> {
        Ok(node.instance_id.clone())
    }

    fn open_handle(&self, path: &str, mode: OpenMode) -> OsResult<FakeHandle> {
        let node = self.nodes.iter().find(|node| node.path == path);
        let node = match node {
            Some(node) if !self.unplugged.lock().contains(path) => node,
            _ => {
                return Err(OsError::new("CreateFileW",
                    io::Error::new(io::ErrorKind::NotFound, "no such device")));
            }
        };
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeHandle {
            node: node.clone(),
            mode,
            written: Vec::new(),
            interrupted: Arc::new((Mutex::new(false), Condvar::new())),
            released: self.released.clone(),
        })
    }

    fn subscribe_removals(&self) -> OsResult<RemovalSubscription> {
        if self.fail_subscribe {
            return Err(OsError::status("CM_Register_Notification", 0x1f));
        }
        let (tx, events) = mpsc::channel();
        *self.removals.lock() = Some(tx);
        let removals = self.removals.clone();
        Ok(RemovalSubscription {
            events,
            unsubscribe: Unsubscribe::new(move || {
                removals.lock().take();
            }),
        })
    }
}

pub struct FakeHandle {
    node: FakeNode,
    mode: OpenMode,
    written: Vec<u8>,
    interrupted: Arc<(Mutex<bool>, Condvar)>,
    released: Arc<AtomicUsize>,
}

impl DeviceHandle for FakeHandle {
    fn interrupter(&self) -> Option<Interrupter> {
        let interrupted = self.interrupted.clone();
        Some(Interrupter::new(move || {
            *interrupted.0.lock() = true;
            interrupted.1.notify_all();
        }))
    }

    fn attributes(&self) -> OsResult<Attributes> {
        Ok(self.node.attributes)
    }

    fn serial_number(&self) -> OsResult<Option<String>> {
        Ok(self.node.serial_number.clone())
    }

    fn manufacturer_string(&self) -> OsResult<Option<String>> {
        Err(OsError::status("HidD_GetManufacturerString", 0x1f))
    }

    fn product_string(&self) -> OsResult<Option<String>> {
        Ok(self.node.product_string.clone())
    }

    fn write(&mut self, data: &[u8]) -> OsResult<usize> {
        if self.mode != OpenMode::ReadWrite {
            return Err(OsError::new("WriteFile", io::Error::from(io::ErrorKind::PermissionDenied)));
        }
        self.written.extend_from_slice(data);
        Ok(data.len())
    }

    /// Echoes back what was written.
    fn read_timeout(&mut self, data: &mut [u8], _timeout: Option<Duration>) -> OsResult<usize> {
        if self.node.blocks_reads {
            let mut interrupted = self.interrupted.0.lock();
            while !*interrupted {
                self.interrupted.1.wait(&mut interrupted);
            }
            return Err(OsError::new("ReadFile", io::Error::from(io::ErrorKind::Interrupted)));
        }
        let len = data.len().min(self.written.len());
        data[..len].copy_from_slice(&self.written[..len]);
        self.written.drain(..len);
        Ok(len)
    }

    fn send_feature_report(&mut self, data: &[u8]) -> OsResult<usize> {
        Ok(data.len())
    }

    fn get_feature_report(&mut self, data: &mut [u8]) -> OsResult<usize> {
        Ok(data.len())
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
