//! sysfs/hidraw backend.
//!
//! Instance ids are sysfs device paths relative to the sysfs mount
//! (`/devices/pci0000:00/.../1-2`), which is also what the kernel's uevents
//! carry as `DEVPATH`.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt::Display;
use std::fs::{File, OpenOptions, ReadDir};
use std::io::{self, Read, Write};
use std::os::raw::c_int;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::enumerate::HID_CLASS_NAME;
use crate::{OsError, OsResult};
use super::{not_found, Attributes, Backend, DeviceHandle, DeviceTree, Interrupter, NodeProperty, OpenMode,
            RemovalEvent, RemovalSubscription, Unsubscribe};

mod hid;

const HIDRAW_CLASS_DIRS: [&str; 3] = ["class/hidraw", "subsystem/hidraw", "bus/hidraw"];
const UEVENT_BUFFER_SIZE: usize = 8192;

fn parse_uevent(origin: &dyn Display, event: &[u8], separator: u8) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in event.split(|v| *v == separator) {
        // Ignore last empty line (and other empty lines...)
        if line.is_empty() {
            continue;
        }

        let eq_pos = match line.iter().position(|v| *v == b'=') {
            Some(v) => v,
            None => {
                log::trace!("Line without '=' in {}", origin);
                continue
            },
        };
        let (key, value) = line.split_at(eq_pos);
        let value = &value[1..];

        match (std::str::from_utf8(key), std::str::from_utf8(value)) {
            (Ok(k), Ok(v)) => {
                map.insert(k.to_string(), v.to_string());
            },
            _ => log::warn!("Non-utf8 line in {}", origin),
        }
    }
    map
}

fn read_uevent(dir: &Path) -> OsResult<HashMap<String, String>> {
    let path = dir.join("uevent");
    let data = std::fs::read(&path).map_err(|err| OsError::new("read uevent", err))?;
    Ok(parse_uevent(&path.display(), &data, b'\n'))
}

/// Name of the sysfs entry `link` points to, e.g. the subsystem or driver.
fn link_name(link: &Path) -> Option<String> {
    std::fs::read_link(link).ok()?
        .file_name()
        .and_then(OsStr::to_str)
        .map(str::to_string)
}

fn read_attr(dir: &Path, attr: &str) -> Option<String> {
    std::fs::read_to_string(dir.join(attr)).ok()
        .map(|v| v.trim_end().to_string())
        .filter(|v| !v.is_empty())
}

fn is_subsystem_devtype(dir: &Path, subsystem: &str, devtype: &str) -> bool {
    if link_name(&dir.join("subsystem")).as_deref() != Some(subsystem) {
        return false;
    }
    read_uevent(dir)
        .map(|uevent| uevent.get("DEVTYPE").map(String::as_str) == Some(devtype))
        .unwrap_or(false)
}

fn find_ancestor<'a>(child: &'a Path, sysfs_root: &Path, subsystem: &str, devtype: &str) -> Option<&'a Path> {
    let mut cur = child.parent()?;
    loop {
        if !cur.starts_with(sysfs_root) {
            return None
        }
        if is_subsystem_devtype(cur, subsystem, devtype) {
            return Some(cur)
        }
        cur = cur.parent()?;
    }
}

/// HID devices exposed through `/dev/hidraw*`.
pub struct LinuxBackend {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
}

impl LinuxBackend {
    /// A backend looking at sysfs and device nodes mounted somewhere other
    /// than `/sys` and `/dev`.
    pub fn with_roots<S: Into<PathBuf>, D: Into<PathBuf>>(sysfs_root: S, dev_root: D) -> LinuxBackend {
        LinuxBackend {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
        }
    }

    fn sysfs_path(&self, instance_id: &str) -> PathBuf {
        self.sysfs_root.join(instance_id.trim_start_matches('/'))
    }

    fn hidraw_dir(&self, name: &OsStr) -> Option<PathBuf> {
        HIDRAW_CLASS_DIRS.iter()
            .map(|dir| self.sysfs_root.join(dir).join(name))
            .find(|path| path.exists())
    }
}

impl Default for LinuxBackend {
    fn default() -> LinuxBackend {
        LinuxBackend::with_roots("/sys", "/dev")
    }
}

pub struct HidrawNode {
    sysfs_path: PathBuf,
}

pub struct HidrawNodes {
    entries: Option<ReadDir>,
}

impl Iterator for HidrawNodes {
    type Item = OsResult<HidrawNode>;

    fn next(&mut self) -> Option<OsResult<HidrawNode>> {
        match self.entries.as_mut()?.next()? {
            Ok(entry) => Some(Ok(HidrawNode { sysfs_path: entry.path() })),
            Err(err) => {
                self.entries = None;
                Some(Err(OsError::new("read_dir", err)))
            }
        }
    }
}

impl DeviceTree for LinuxBackend {
    fn parent(&self, instance_id: &str) -> OsResult<Option<String>> {
        let parent = match Path::new(instance_id).parent() {
            Some(v) => v,
            None => return Ok(None),
        };
        if parent.parent().is_none() || parent == Path::new("/devices") {
            return Ok(None);
        }
        match parent.to_str() {
            Some(v) => Ok(Some(v.to_string())),
            None => Err(not_found("parent", format!("non-utf8 parent of {}", instance_id))),
        }
    }

    fn is_usb_device(&self, instance_id: &str) -> bool {
        is_subsystem_devtype(&self.sysfs_path(instance_id), "usb", "usb_device")
    }
}

impl Backend for LinuxBackend {
    type Node = HidrawNode;
    type Nodes = HidrawNodes;
    type Handle = HidrawHandle;

    fn interface_nodes(&self) -> OsResult<HidrawNodes> {
        let dir = HIDRAW_CLASS_DIRS.iter()
            .map(|dir| self.sysfs_root.join(dir))
            .find(|dir| dir.is_dir());
        let entries = match dir {
            Some(dir) => Some(std::fs::read_dir(&dir).map_err(|err| OsError::new("read_dir", err))?),
            // hidraw not loaded: nothing to enumerate.
            None => None,
        };
        Ok(HidrawNodes { entries })
    }

    fn interface_path(&self, node: &HidrawNode) -> OsResult<String> {
        let uevent = read_uevent(&node.sysfs_path)?;
        let devname = uevent.get("DEVNAME")
            .ok_or_else(|| not_found("interface_path", format!("no DEVNAME for {}", node.sysfs_path.display())))?;
        Ok(self.dev_root.join(devname).to_string_lossy().into_owned())
    }

    fn node_property(&self, node: &HidrawNode, property: NodeProperty) -> OsResult<Option<String>> {
        let device = node.sysfs_path.join("device");
        Ok(match property {
            NodeProperty::Class => link_name(&device.join("subsystem")).map(|subsystem| {
                if subsystem == "hid" { HID_CLASS_NAME.to_string() } else { subsystem }
            }),
            NodeProperty::Driver => link_name(&device.join("driver")),
        })
    }

    fn instance_id(&self, node: &HidrawNode) -> OsResult<String> {
        let device = node.sysfs_path.join("device")
            .canonicalize()
            .map_err(|err| OsError::new("canonicalize", err))?;
        let root = self.sysfs_root.canonicalize().map_err(|err| OsError::new("canonicalize", err))?;
        let relative = device.strip_prefix(&root)
            .map_err(|_| not_found("instance_id", format!("{} is outside sysfs", device.display())))?;
        Ok(format!("/{}", relative.to_string_lossy()))
    }

    fn open_handle(&self, path: &str, mode: OpenMode) -> OsResult<HidrawHandle> {
        let name = Path::new(path).file_name()
            .ok_or_else(|| not_found("open", format!("{} is not a device node", path)))?;
        let sysfs_path = self.hidraw_dir(name)
            .ok_or_else(|| not_found("open", format!("no hidraw entry for {}", path)))?;

        let (file, cancel) = match mode {
            OpenMode::AttributesOnly => (None, None),
            OpenMode::ReadWrite => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(path)
                    .map_err(|err| OsError::new("open", err))?;
                let (cancel_rx, cancel_tx) = pipe()?;
                (Some(file), Some((cancel_rx, Arc::new(cancel_tx))))
            }
        };

        let sysfs_root = self.sysfs_root.canonicalize().map_err(|err| OsError::new("canonicalize", err))?;
        Ok(HidrawHandle { sysfs_root, sysfs_path, file, cancel })
    }

    fn subscribe_removals(&self) -> OsResult<RemovalSubscription> {
        let socket = UeventSocket::open()?;
        let (wake_rx, wake_tx) = pipe()?;
        let (tx, events) = mpsc::channel();

        let listener = thread::Builder::new()
            .name("hidwatch-uevent".to_string())
            .spawn(move || listen_uevents(socket, wake_rx, tx))
            .map_err(|err| OsError::new("spawn", err))?;

        let unsubscribe = Unsubscribe::new(move || {
            let mut wake_tx = wake_tx;
            if let Err(err) = wake_tx.write_all(&[1]) {
                log::error!("Failed to wake uevent listener: {}", err);
                return;
            }
            if listener.join().is_err() {
                log::error!("uevent listener panicked");
            }
        });

        Ok(RemovalSubscription { events, unsubscribe })
    }
}

struct UeventSocket(File);

impl UeventSocket {
    fn open() -> OsResult<UeventSocket> {
        let fd = unsafe {
            libc::socket(libc::AF_NETLINK, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, libc::NETLINK_KOBJECT_UEVENT)
        };
        if fd < 0 {
            return Err(OsError::last("socket"));
        }
        // Owns the fd from here on, closing it on every exit path.
        let socket = UeventSocket(unsafe { File::from_raw_fd(fd) });

        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        // Kernel uevents multicast group.
        addr.nl_groups = 1;
        let res = unsafe {
            libc::bind(fd,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t)
        };
        if res < 0 {
            return Err(OsError::last("bind"));
        }
        Ok(socket)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let res = unsafe { libc::recv(self.0.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
        if res < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(res as usize)
        }
    }
}

fn pipe() -> OsResult<(File, File)> {
    let mut fds: [c_int; 2] = [0; 2];
    let res = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if res < 0 {
        return Err(OsError::last("pipe2"));
    }
    Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

/// Wait for `fd` to become readable. Returns false on timeout.
fn wait_readable(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> io::Result<bool> {
    let timeout = timeout.map(|v| v.as_millis().min(c_int::max_value() as u128) as c_int).unwrap_or(-1);
    loop {
        let res = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(res > 0);
    }
}

fn pollfd(fd: RawFd) -> libc::pollfd {
    libc::pollfd { fd, events: libc::POLLIN, revents: 0 }
}

/// Removed device path of a kernel uevent message, if it's a removal.
fn removed_devpath(msg: &[u8]) -> Option<String> {
    let uevent = parse_uevent(&"netlink uevent", msg, 0);
    if uevent.get("ACTION").map(String::as_str) != Some("remove") {
        return None;
    }
    uevent.get("DEVPATH").cloned()
}

fn listen_uevents(socket: UeventSocket, wake: File, tx: Sender<RemovalEvent>) {
    let mut buf = vec![0u8; UEVENT_BUFFER_SIZE];
    loop {
        let mut fds = [pollfd(socket.0.as_raw_fd()), pollfd(wake.as_raw_fd())];
        if let Err(err) = wait_readable(&mut fds, None) {
            log::error!("poll on uevent socket failed: {}", err);
            return;
        }
        if fds[1].revents != 0 {
            log::debug!("uevent listener unsubscribed");
            return;
        }
        if fds[0].revents & libc::POLLIN == 0 {
            continue;
        }

        let len = match socket.recv(&mut buf) {
            Ok(v) => v,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                // ENOBUFS when events were dropped; keep going.
                log::warn!("recv on uevent socket failed: {}", err);
                continue;
            }
        };

        if let Some(instance_id) = removed_devpath(&buf[..len]) {
            if tx.send(RemovalEvent { instance_id }).is_err() {
                return;
            }
        }
    }
}

pub struct HidrawHandle {
    sysfs_root: PathBuf,
    sysfs_path: PathBuf,
    file: Option<File>,
    /* Pipe polled next to the device. The byte written on close is never
       drained. */
    cancel: Option<(File, Arc<File>)>,
}

impl HidrawHandle {
    fn file(&self, fnname: &'static str) -> OsResult<&File> {
        self.file.as_ref().ok_or_else(|| OsError::new(fnname,
            io::Error::new(io::ErrorKind::PermissionDenied, "device opened for attributes only")))
    }

    fn hid_device(&self) -> PathBuf {
        let device = self.sysfs_path.join("device");
        device.canonicalize().unwrap_or(device)
    }

    fn usb_ancestor(&self, device: &Path, devtype: &str) -> Option<PathBuf> {
        find_ancestor(device, &self.sysfs_root, "usb", devtype).map(Path::to_path_buf)
    }
}

impl DeviceHandle for HidrawHandle {
    fn interrupter(&self) -> Option<Interrupter> {
        let cancel_tx = self.cancel.as_ref()?.1.clone();
        Some(Interrupter::new(move || {
            let mut cancel_tx: &File = &cancel_tx;
            if let Err(err) = cancel_tx.write_all(&[1]) {
                log::error!("Failed to interrupt hidraw read: {}", err);
            }
        }))
    }

    fn attributes(&self) -> OsResult<Attributes> {
        // Read /sys/class/hidraw/<device>/device/uevent to find vid/pid and
        // bus_type.
        let device = self.hid_device();
        let uevent = read_uevent(&device)?;
        let (bus_type, vendor_id, product_id) = uevent.get("HID_ID")
            .and_then(|v| {
                let mut hid_id_split = v.split(':');
                let bus_type = u32::from_str_radix(hid_id_split.next()?, 16).ok()?;
                let vid = u32::from_str_radix(hid_id_split.next()?, 16).ok()?;
                let pid = u32::from_str_radix(hid_id_split.next()?, 16).ok()?;
                Some((bus_type, vid as u16, pid as u16))
            })
            .ok_or_else(|| not_found("attributes", format!("no valid HID_ID in {}", device.display())))?;

        let mut attrib = Attributes { vendor_id, product_id, ..Attributes::default() };

        // BUS_USB
        if bus_type == 3 {
            attrib.release_number = self.usb_ancestor(&device, "usb_device")
                .and_then(|v| read_attr(&v, "bcdDevice"))
                .and_then(|v| u16::from_str_radix(&v, 16).ok())
                .unwrap_or(0);
        }

        match std::fs::read(device.join("report_descriptor")) {
            Ok(desc) => {
                if let Some((usage_page, usage)) = hid::usages(&desc).next() {
                    attrib.usage_page = usage_page;
                    attrib.usage = usage;
                }
            }
            Err(err) => log::debug!("No report descriptor for {}: {}", device.display(), err),
        }

        Ok(attrib)
    }

    fn serial_number(&self) -> OsResult<Option<String>> {
        let uevent = read_uevent(&self.hid_device())?;
        Ok(uevent.get("HID_UNIQ").filter(|v| !v.is_empty()).cloned())
    }

    fn manufacturer_string(&self) -> OsResult<Option<String>> {
        Ok(self.usb_ancestor(&self.hid_device(), "usb_device")
            .and_then(|v| read_attr(&v, "manufacturer")))
    }

    fn product_string(&self) -> OsResult<Option<String>> {
        let device = self.hid_device();
        if let Some(product) = self.usb_ancestor(&device, "usb_device").and_then(|v| read_attr(&v, "product")) {
            return Ok(Some(product));
        }
        let uevent = read_uevent(&device)?;
        Ok(uevent.get("HID_NAME").filter(|v| !v.is_empty()).cloned())
    }

    fn interface_number(&self) -> Option<i32> {
        self.usb_ancestor(&self.hid_device(), "usb_interface")
            .and_then(|v| read_attr(&v, "bInterfaceNumber"))
            .and_then(|v| i32::from_str_radix(&v, 16).ok())
    }

    fn write(&mut self, data: &[u8]) -> OsResult<usize> {
        self.file("write")?
            .write(data)
            .map_err(|err| OsError::new("write", err))
    }

    fn read_timeout(&mut self, data: &mut [u8], timeout: Option<Duration>) -> OsResult<usize> {
        let mut file = self.file("read")?;
        let mut fds = vec![pollfd(file.as_raw_fd())];
        if let Some((cancel_rx, _)) = &self.cancel {
            fds.push(pollfd(cancel_rx.as_raw_fd()));
        }
        if !wait_readable(&mut fds, timeout).map_err(|err| OsError::new("poll", err))? {
            return Ok(0);
        }
        if fds.get(1).map_or(false, |fd| fd.revents != 0) {
            return Err(OsError::new("read", io::Error::new(io::ErrorKind::Interrupted, "device closed")));
        }
        file.read(data).map_err(|err| OsError::new("read", err))
    }

    fn send_feature_report(&mut self, data: &[u8]) -> OsResult<usize> {
        hidiocsfeature(self.file("hidiocsfeature")?, data)
            .map_err(|err| OsError::new("hidiocsfeature", err))
    }

    fn get_feature_report(&mut self, data: &mut [u8]) -> OsResult<usize> {
        hidiocgfeature(self.file("hidiocgfeature")?, data)
            .map_err(|err| OsError::new("hidiocgfeature", err))
    }
}

ioctl_sys::ioctl!(readwrite buf hidiocsfeature_raw with b'H', 0x06; u8);
ioctl_sys::ioctl!(readwrite buf hidiocgfeature_raw with b'H', 0x07; u8);

fn hidiocgfeature<F: AsRawFd>(f: &F, data: &mut [u8]) -> Result<usize, io::Error> {
    let ret = unsafe {
        hidiocgfeature_raw(f.as_raw_fd(), data.as_mut_ptr(), data.len())
    };

    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

fn hidiocsfeature<F: AsRawFd>(f: &F, data: &[u8]) -> Result<usize, io::Error> {
    // The kernel only reads from the buffer for a Set_Report.
    let ret = unsafe {
        hidiocsfeature_raw(f.as_raw_fd(), data.as_ptr() as *mut u8, data.len())
    };

    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeWalker;
    use std::os::unix::fs::symlink;

    struct FakeSysfs {
        root: PathBuf,
    }

    impl FakeSysfs {
        fn new(name: &str) -> FakeSysfs {
            let root = std::env::temp_dir().join(format!("hidwatch-sysfs-{}-{}", name, std::process::id()));
            let _ = std::fs::remove_dir_all(&root);
            std::fs::create_dir_all(root.join("bus/usb")).unwrap();
            std::fs::create_dir_all(root.join("bus/hid")).unwrap();
            FakeSysfs { root }
        }

        fn device(&self, devpath: &str, subsystem: &str, uevent: &str) -> PathBuf {
            let dir = self.root.join(devpath.trim_start_matches('/'));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("uevent"), uevent).unwrap();
            symlink(self.root.join("bus").join(subsystem), dir.join("subsystem")).unwrap();
            dir
        }
    }

    impl Drop for FakeSysfs {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    const USB_DEV: &str = "/devices/pci0000:00/0000:00:14.0/usb1/1-2";
    const USB_IFACE: &str = "/devices/pci0000:00/0000:00:14.0/usb1/1-2/1-2:1.0";
    const HID_DEV: &str = "/devices/pci0000:00/0000:00:14.0/usb1/1-2/1-2:1.0/0003:1234:0001.0005";

    #[test]
    fn parses_uevent_file() {
        let map = parse_uevent(&"test", b"DEVTYPE=usb_device\nPRODUCT=1234/1/100\n\nbogus\n", b'\n');
        assert_eq!(map.get("DEVTYPE").map(String::as_str), Some("usb_device"));
        assert_eq!(map.get("PRODUCT").map(String::as_str), Some("1234/1/100"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn extracts_devpath_of_removals_only() {
        let remove = b"remove@/devices/pci0000:00/usb1/1-2\0ACTION=remove\0DEVPATH=/devices/pci0000:00/usb1/1-2\0SUBSYSTEM=usb\0SEQNUM=4242\0";
        assert_eq!(removed_devpath(remove).as_deref(), Some("/devices/pci0000:00/usb1/1-2"));
        let add = b"add@/devices/pci0000:00/usb1/1-2\0ACTION=add\0DEVPATH=/devices/pci0000:00/usb1/1-2\0";
        assert_eq!(removed_devpath(add), None);
    }

    #[test]
    fn interrupted_read_returns_right_away() {
        let (data_rx, _data_tx) = pipe().unwrap();
        let (cancel_rx, cancel_tx) = pipe().unwrap();
        let mut handle = HidrawHandle {
            sysfs_root: PathBuf::from("/sys"),
            sysfs_path: PathBuf::new(),
            file: Some(data_rx),
            cancel: Some((cancel_rx, Arc::new(cancel_tx))),
        };

        let mut buf = [0u8; 8];
        assert_eq!(handle.read_timeout(&mut buf, Some(Duration::from_millis(10))).unwrap(), 0);
        handle.interrupter().unwrap().interrupt();
        // Stays interrupted, even for reads without a timeout.
        for _ in 0..2 {
            let err = handle.read_timeout(&mut buf, None).unwrap_err();
            assert_eq!(err.source.kind(), io::ErrorKind::Interrupted);
        }
    }

    #[test]
    fn parent_stops_below_devices() {
        let backend = LinuxBackend::default();
        assert_eq!(backend.parent(USB_IFACE).unwrap().as_deref(), Some(USB_DEV));
        assert_eq!(backend.parent("/devices/pci0000:00").unwrap(), None);
        assert_eq!(backend.parent("/").unwrap(), None);
    }

    #[test]
    fn walker_resolves_usb_device_in_sysfs() {
        let sysfs = FakeSysfs::new("walker");
        sysfs.device(USB_DEV, "usb", "DEVTYPE=usb_device\nPRODUCT=1234/1/100\n");
        sysfs.device(USB_IFACE, "usb", "DEVTYPE=usb_interface\n");
        sysfs.device(HID_DEV, "hid", "HID_ID=0003:00001234:00000001\n");

        let backend = LinuxBackend::with_roots(&sysfs.root, "/dev");
        assert!(backend.is_usb_device(USB_DEV));
        assert!(!backend.is_usb_device(USB_IFACE));
        assert_eq!(TreeWalker::new(&backend).resolve_usb_instance(HID_DEV).unwrap(), USB_DEV);
    }

    #[test]
    fn enumerates_hidraw_nodes() {
        let sysfs = FakeSysfs::new("enumerate");
        let usb = sysfs.device(USB_DEV, "usb", "DEVTYPE=usb_device\n");
        std::fs::write(usb.join("bcdDevice"), "0110\n").unwrap();
        std::fs::write(usb.join("manufacturer"), "Acme\n").unwrap();
        let iface = sysfs.device(USB_IFACE, "usb", "DEVTYPE=usb_interface\n");
        std::fs::write(iface.join("bInterfaceNumber"), "0a\n").unwrap();
        let hid = sysfs.device(HID_DEV, "hid", "HID_ID=0003:00001234:00000001\nHID_NAME=Acme Pad\nHID_UNIQ=\n");
        std::fs::write(hid.join("report_descriptor"), [0x05, 0x01, 0x09, 0x05, 0xa1, 0x01, 0xc0]).unwrap();
        std::fs::create_dir_all(sysfs.root.join("bus/hid/drivers/hid-generic")).unwrap();
        symlink(sysfs.root.join("bus/hid/drivers/hid-generic"), hid.join("driver")).unwrap();

        let hidraw = hid.join("hidraw/hidraw5");
        std::fs::create_dir_all(&hidraw).unwrap();
        std::fs::write(hidraw.join("uevent"), "MAJOR=241\nMINOR=5\nDEVNAME=hidraw5\n").unwrap();
        symlink(&hid, hidraw.join("device")).unwrap();
        std::fs::create_dir_all(sysfs.root.join("class/hidraw")).unwrap();
        symlink(&hidraw, sysfs.root.join("class/hidraw/hidraw5")).unwrap();

        let backend = LinuxBackend::with_roots(&sysfs.root, "/dev");
        let devices = crate::Enumerator::new(&backend).enumerate().unwrap();
        assert_eq!(devices.len(), 1);
        let dev = &devices[0];
        assert_eq!(dev.identity.interface_path_only(), "/dev/hidraw5");
        assert_eq!(dev.identity.instance_id(), USB_DEV);
        assert_eq!((dev.vendor_id, dev.product_id, dev.release_number), (0x1234, 0x0001, 0x0110));
        assert_eq!((dev.usage_page, dev.usage), (0x01, 0x05));
        assert_eq!(dev.serial_number, None);
        assert_eq!(dev.manufacturer_string.as_deref(), Some("Acme"));
        assert_eq!(dev.product_string.as_deref(), Some("Acme Pad"));
        assert_eq!(dev.interface_number, 10);
    }
}
