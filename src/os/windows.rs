use winapi::um::minwinbase::OVERLAPPED;
use winapi::um::winnt::*;
use winapi::um::winbase::*;
use winapi::um::fileapi::*;
use winapi::um::ioapiset::*;
use winapi::um::handleapi::*;
use winapi::um::synchapi::*;
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::setupapi::*;
use winapi::um::cfgmgr32::*;
use winapi::shared::minwindef::*;
use winapi::shared::guiddef::GUID;
use winapi::shared::hidsdi::*;
use winapi::shared::hidclass::*;
use winapi::shared::hidpi::*;
use winapi::shared::winerror::*;

use core::cmp::min;
use core::ptr;
use core::mem::size_of;

use std::cell::Cell;
use std::rc::Rc;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use scopeguard::ScopeGuard;
use widestring::U16CString;

use crate::{OsError, OsResult};
use super::{string_from_wide, Attributes, Backend, DeviceHandle, DeviceTree, Interrupter, NodeProperty, OpenMode,
            RemovalEvent, RemovalSubscription, Unsubscribe};

/* The maximum number of characters that can be passed into the
   HidD_Get*String() functions without it failing.*/
const MAX_STRING_WCHARS: usize = 0xFFF;
/* Windows objects for interacting with the driver. */
const INTERFACE_CLASS_GUID: GUID = GUID {Data1: 0x4d1e55b2, Data2: 0xf16f, Data3: 0x11cf, Data4: [0x88, 0xcb, 0x00, 0x11, 0x11, 0x00, 0x00, 0x30] };

fn wide(s: &str, fnname: &'static str) -> OsResult<U16CString> {
    U16CString::from_str(s).map_err(|_| OsError::new(fnname,
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "interior nul in string")))
}

/// Opens the given path to a HID device.
fn open_device(path: &U16CString, mode: OpenMode) -> HANDLE {
    let desired_access = match mode {
        OpenMode::AttributesOnly => 0,
        OpenMode::ReadWrite => GENERIC_WRITE | GENERIC_READ,
    };
    let share_mode = FILE_SHARE_READ|FILE_SHARE_WRITE;

    unsafe {
        CreateFileW(path.as_ptr(),
            desired_access,
            share_mode,
            ptr::null_mut(),
            OPEN_EXISTING,
            FILE_FLAG_OVERLAPPED,
            ptr::null_mut())
    }
}

/// SetupAPI + cfgmgr32 backend.
pub struct WindowsBackend {
    input_buffers: ULONG,
}

impl WindowsBackend {
    /// `input_buffers` is the number of input reports the driver queues for
    /// each opened device.
    pub fn with_input_buffers(input_buffers: u32) -> WindowsBackend {
        WindowsBackend { input_buffers }
    }
}

impl Default for WindowsBackend {
    fn default() -> WindowsBackend {
        WindowsBackend::with_input_buffers(64)
    }
}

struct DeviceInfoSet(HDEVINFO);

impl Drop for DeviceInfoSet {
    fn drop(&mut self) {
        unsafe { SetupDiDestroyDeviceInfoList(self.0) };
    }
}

pub struct InterfaceNode {
    set: Rc<DeviceInfoSet>,
    interface_data: SP_DEVICE_INTERFACE_DATA,
    /* Filled in along with the interface path. */
    devinfo_data: Cell<Option<SP_DEVINFO_DATA>>,
}

pub struct InterfaceNodes {
    set: Rc<DeviceInfoSet>,
    device_index: DWORD,
    done: bool,
}

impl Iterator for InterfaceNodes {
    type Item = OsResult<InterfaceNode>;

    fn next(&mut self) -> Option<OsResult<InterfaceNode>> {
        if self.done {
            return None;
        }

        let mut interface_data: SP_DEVICE_INTERFACE_DATA = unsafe { std::mem::zeroed() };
        interface_data.cbSize = size_of::<SP_DEVICE_INTERFACE_DATA>() as u32;

        let res = unsafe {
            SetupDiEnumDeviceInterfaces(self.set.0,
                ptr::null_mut(),
                &INTERFACE_CLASS_GUID,
                self.device_index,
                &mut interface_data)
        };

        if res == FALSE {
            self.done = true;
            if unsafe { GetLastError() } == ERROR_NO_MORE_ITEMS {
                return None;
            }
            return Some(Err(OsError::last("SetupDiEnumDeviceInterfaces")));
        }

        self.device_index += 1;
        Some(Ok(InterfaceNode {
            set: self.set.clone(),
            interface_data,
            devinfo_data: Cell::new(None),
        }))
    }
}

impl WindowsBackend {
    fn devinfo(&self, node: &InterfaceNode) -> OsResult<SP_DEVINFO_DATA> {
        if let Some(devinfo) = node.devinfo_data.get() {
            return Ok(devinfo);
        }
        self.interface_path(node)?;
        node.devinfo_data.get().ok_or_else(|| OsError::status("SetupDiGetDeviceInterfaceDetailW", ERROR_NOT_FOUND))
    }

    fn registry_property(&self, node: &InterfaceNode, property: DWORD) -> OsResult<Option<String>> {
        let mut devinfo = self.devinfo(node)?;

        /* First pass: ask for the size. Any failure other than a too small
           buffer means the node doesn't carry the property. */
        let mut required_size = 0;
        let res = unsafe {
            SetupDiGetDeviceRegistryPropertyW(node.set.0, &mut devinfo, property,
                ptr::null_mut(), ptr::null_mut(), 0, &mut required_size)
        };
        if res == FALSE {
            let err = unsafe { GetLastError() };
            if err != ERROR_INSUFFICIENT_BUFFER {
                log::trace!("Property {} absent (error {})", property, err);
                return Ok(None);
            }
        }

        let mut buf = vec![0u16; (required_size as usize + 1) / 2 + 1];
        let res = unsafe {
            SetupDiGetDeviceRegistryPropertyW(node.set.0, &mut devinfo, property,
                ptr::null_mut(), buf.as_mut_ptr() as PBYTE, (buf.len() * 2) as DWORD, ptr::null_mut())
        };
        if res == FALSE {
            return Err(OsError::last("SetupDiGetDeviceRegistryPropertyW"));
        }

        Ok(Some(string_from_wide(&buf)))
    }

    fn device_id(devinst: DEVINST) -> OsResult<String> {
        let mut len = 0;
        let cr = unsafe { CM_Get_Device_ID_Size(&mut len, devinst, 0) };
        if cr != CR_SUCCESS {
            return Err(OsError::status("CM_Get_Device_ID_Size", cr));
        }
        let mut buf = vec![0u16; len as usize + 1];
        let cr = unsafe { CM_Get_Device_IDW(devinst, buf.as_mut_ptr(), buf.len() as ULONG, 0) };
        if cr != CR_SUCCESS {
            return Err(OsError::status("CM_Get_Device_IDW", cr));
        }
        Ok(string_from_wide(&buf))
    }
}

impl DeviceTree for WindowsBackend {
    fn parent(&self, instance_id: &str) -> OsResult<Option<String>> {
        let id = wide(instance_id, "CM_Locate_DevNodeW")?;
        let mut devinst: DEVINST = 0;
        let cr = unsafe { CM_Locate_DevNodeW(&mut devinst, id.as_ptr() as DEVINSTID_W, CM_LOCATE_DEVNODE_NORMAL) };
        if cr != CR_SUCCESS {
            return Err(OsError::status("CM_Locate_DevNodeW", cr));
        }

        let mut parent: DEVINST = 0;
        let cr = unsafe { CM_Get_Parent(&mut parent, devinst, 0) };
        match cr {
            CR_SUCCESS => WindowsBackend::device_id(parent).map(Some),
            CR_NO_SUCH_DEVNODE => Ok(None),
            cr => Err(OsError::status("CM_Get_Parent", cr)),
        }
    }
}

impl Backend for WindowsBackend {
    type Node = InterfaceNode;
    type Nodes = InterfaceNodes;
    type Handle = WindowsHandle;

    fn interface_nodes(&self) -> OsResult<InterfaceNodes> {
        /* Get information for all the devices belonging to the HID class. */
        let device_info_set = unsafe {
            SetupDiGetClassDevsW(&INTERFACE_CLASS_GUID, ptr::null(), ptr::null_mut(), DIGCF_PRESENT | DIGCF_DEVICEINTERFACE)
        };
        if device_info_set == INVALID_HANDLE_VALUE {
            return Err(OsError::last("SetupDiGetClassDevsW"));
        }

        Ok(InterfaceNodes {
            set: Rc::new(DeviceInfoSet(device_info_set)),
            device_index: 0,
            done: false,
        })
    }

    fn interface_path(&self, node: &InterfaceNode) -> OsResult<String> {
        let mut interface_data = node.interface_data;

        /* Call with 0-sized detail size, and let the function
           tell us how long the detail struct needs to be. */
        let mut required_size = 0;
        let res = unsafe {
            SetupDiGetDeviceInterfaceDetailW(node.set.0,
                &mut interface_data,
                ptr::null_mut(),
                0,
                &mut required_size,
                ptr::null_mut())
        };
        if res == FALSE && unsafe { GetLastError() } != ERROR_INSUFFICIENT_BUFFER {
            return Err(OsError::last("SetupDiGetDeviceInterfaceDetailW"));
        }

        /* Allocate a long enough, suitably aligned structure. */
        let words = (required_size as usize + size_of::<DWORD>() - 1) / size_of::<DWORD>();
        let mut buf = vec![0 as DWORD; words.max(size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() / size_of::<DWORD>() + 1)];
        let detail = buf.as_mut_ptr() as PSP_DEVICE_INTERFACE_DETAIL_DATA_W;
        unsafe { (*detail).cbSize = size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() as DWORD };

        let mut devinfo_data: SP_DEVINFO_DATA = unsafe { std::mem::zeroed() };
        devinfo_data.cbSize = size_of::<SP_DEVINFO_DATA>() as u32;

        /* Get the detailed data for this device. The detail data gives us
           the device path for this device, which is then passed into
           CreateFile() to get a handle to the device. */
        let res = unsafe {
            SetupDiGetDeviceInterfaceDetailW(node.set.0,
                &mut interface_data,
                detail,
                (buf.len() * size_of::<DWORD>()) as DWORD,
                ptr::null_mut(),
                &mut devinfo_data)
        };
        if res == FALSE {
            return Err(OsError::last("SetupDiGetDeviceInterfaceDetailW"));
        }
        node.devinfo_data.set(Some(devinfo_data));

        let path_offset = unsafe { (*detail).DevicePath.as_ptr() as usize - detail as usize };
        let path_len = (buf.len() * size_of::<DWORD>() - path_offset) / size_of::<u16>();
        let path = unsafe { core::slice::from_raw_parts((*detail).DevicePath.as_ptr(), path_len) };
        Ok(string_from_wide(path))
    }

    fn node_property(&self, node: &InterfaceNode, property: NodeProperty) -> OsResult<Option<String>> {
        match property {
            NodeProperty::Class => self.registry_property(node, SPDRP_CLASS),
            NodeProperty::Driver => self.registry_property(node, SPDRP_DRIVER),
        }
    }

    fn instance_id(&self, node: &InterfaceNode) -> OsResult<String> {
        let mut devinfo = self.devinfo(node)?;
        let mut required_size = 0;
        let res = unsafe {
            SetupDiGetDeviceInstanceIdW(node.set.0, &mut devinfo, ptr::null_mut(), 0, &mut required_size)
        };
        if res == FALSE && unsafe { GetLastError() } != ERROR_INSUFFICIENT_BUFFER {
            return Err(OsError::last("SetupDiGetDeviceInstanceIdW"));
        }

        let mut buf = vec![0u16; required_size as usize + 1];
        let res = unsafe {
            SetupDiGetDeviceInstanceIdW(node.set.0, &mut devinfo, buf.as_mut_ptr(), buf.len() as DWORD, ptr::null_mut())
        };
        if res == FALSE {
            return Err(OsError::last("SetupDiGetDeviceInstanceIdW"));
        }
        Ok(string_from_wide(&buf))
    }

    fn open_handle(&self, path: &str, mode: OpenMode) -> OsResult<WindowsHandle> {
        let wide_path = wide(path, "CreateFileW")?;

        /* Open a handle to the device */
        let device_handle = {
            let device_handle = open_device(&wide_path, mode);

            /* Check validity of write_handle. */
            if device_handle == INVALID_HANDLE_VALUE {
                /* Unable to open the device. */
                return Err(OsError::last("CreateFileW"));
            }

            scopeguard::guard(device_handle, |device_handle| {
                unsafe { CloseHandle(device_handle); }
            })
        };

        if mode == OpenMode::AttributesOnly {
            return Ok(WindowsHandle {
                device_handle: ScopeGuard::into_inner(device_handle),
                io: None,
            });
        }

        let ol_guard = {
            let mut ol: OVERLAPPED = unsafe {
                std::mem::zeroed()
            };
            ol.hEvent = unsafe { CreateEventW(ptr::null_mut(), FALSE, FALSE/* initial state f=nonsignaled*/, ptr::null_mut()) };
            if ol.hEvent.is_null() {
                /* Unable to create event. */
                return Err(OsError::last("CreateEventW"));
            }

            scopeguard::guard(ol, |ol| {
                unsafe { CloseHandle(ol.hEvent); }
            })
        };

        /* Manual reset: once closed, every read sees it. */
        let cancel = unsafe { CreateEventW(ptr::null_mut(), TRUE, FALSE, ptr::null_mut()) };
        if cancel.is_null() {
            return Err(OsError::last("CreateEventW"));
        }
        let cancel = Arc::new(CancelEvent(cancel));

        /* Set the Input Report buffer size. */
        let res = unsafe { HidD_SetNumInputBuffers(*device_handle, self.input_buffers) };
        if res == 0 {
            return Err(OsError::last("HidD_SetNumInputBuffers"));
        }

        let caps = preparsed_caps(*device_handle)?;

        Ok(WindowsHandle {
            device_handle: ScopeGuard::into_inner(device_handle),
            io: Some(OverlappedIo {
                output_report_length: caps.OutputReportByteLength,
                input_report_length: caps.InputReportByteLength as usize,
                read_pending: false,
                read_buf: vec![0; caps.InputReportByteLength as usize].into_boxed_slice(),
                ol: ScopeGuard::into_inner(ol_guard),
                cancel,
            }),
        })
    }

    fn subscribe_removals(&self) -> OsResult<RemovalSubscription> {
        let (tx, events) = mpsc::channel();
        let context = Box::into_raw(Box::new(NotifyContext { events: Mutex::new(tx) }));

        let mut filter: CM_NOTIFY_FILTER = unsafe { std::mem::zeroed() };
        filter.cbSize = size_of::<CM_NOTIFY_FILTER>() as DWORD;
        filter.Flags = CM_NOTIFY_FILTER_FLAG_ALL_DEVICE_INSTANCES;
        filter.FilterType = CM_NOTIFY_FILTER_TYPE_DEVICEINSTANCE;

        let mut notification: HCMNOTIFICATION = ptr::null_mut();
        let cr = unsafe {
            CM_Register_Notification(&mut filter, context as PVOID, Some(on_device_notification), &mut notification)
        };
        if cr != CR_SUCCESS {
            drop(unsafe { Box::from_raw(context) });
            return Err(OsError::status("CM_Register_Notification", cr));
        }

        let registration = Registration { notification, context };
        let unsubscribe = Unsubscribe::new(move || {
            let registration = registration;
            /* No callback runs once this returns. */
            let cr = unsafe { CM_Unregister_Notification(registration.notification) };
            if cr != CR_SUCCESS {
                log::error!("CM_Unregister_Notification failed: {:#x}", cr);
                return;
            }
            drop(unsafe { Box::from_raw(registration.context) });
        });

        Ok(RemovalSubscription { events, unsubscribe })
    }
}

/// Gets the preparsed data of an opened device and the capabilities it
/// describes.
fn preparsed_caps(device_handle: HANDLE) -> OsResult<HIDP_CAPS> {
    let mut pp_data = ptr::null_mut();
    let res = unsafe { HidD_GetPreparsedData(device_handle, &mut pp_data) };
    if res == 0 {
        return Err(OsError::last("HidD_GetPreparsedData"));
    }

    let pp_data = scopeguard::guard(pp_data, |pp_data| {
        unsafe { HidD_FreePreparsedData(pp_data); }
    });

    let mut caps: HIDP_CAPS = unsafe { std::mem::zeroed() };
    let nt_res = unsafe { HidP_GetCaps(*pp_data, &mut caps) };
    if nt_res != HIDP_STATUS_SUCCESS {
        return Err(OsError::status("HidP_GetCaps", nt_res as u32));
    }
    Ok(caps)
}

struct NotifyContext {
    events: Mutex<Sender<RemovalEvent>>,
}

struct Registration {
    notification: HCMNOTIFICATION,
    context: *mut NotifyContext,
}

// The registration is only touched again to tear it down.
unsafe impl Send for Registration {}

/// Runs on a system thread pool thread.
unsafe extern "system" fn on_device_notification(
    _notify: HCMNOTIFICATION,
    context: PVOID,
    action: CM_NOTIFY_ACTION,
    event_data: PCM_NOTIFY_EVENT_DATA,
    event_data_size: DWORD,
) -> DWORD {
    if action != CM_NOTIFY_ACTION_DEVICEINSTANCEREMOVED || context.is_null() || event_data.is_null() {
        return ERROR_SUCCESS;
    }
    let context = &*(context as *const NotifyContext);

    let header = size_of::<CM_NOTIFY_EVENT_DATA>() - size_of::<WCHAR>();
    let max_chars = (event_data_size as usize).saturating_sub(header) / size_of::<WCHAR>();
    let id_ptr = (*event_data).u.DeviceInstance().InstanceId.as_ptr();
    let instance_id = string_from_wide(core::slice::from_raw_parts(id_ptr, max_chars.max(1)));

    log::trace!("Device instance removed: {}", instance_id);
    let _ = context.events.lock().send(RemovalEvent { instance_id });
    ERROR_SUCCESS
}

/// Signaled when the device is closed from another thread.
struct CancelEvent(HANDLE);

// An event handle can be signaled from any thread.
unsafe impl Send for CancelEvent {}
unsafe impl Sync for CancelEvent {}

impl Drop for CancelEvent {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

struct OverlappedIo {
    output_report_length: u16,
    input_report_length: usize,
    read_pending: bool,
    read_buf: Box<[u8]>,
    ol: OVERLAPPED,
    cancel: Arc<CancelEvent>,
}

pub struct WindowsHandle {
    device_handle: HANDLE,
    /* None for handles opened for attributes only. */
    io: Option<OverlappedIo>,
}

// The handle is exclusively owned; the OS allows using it from any thread.
unsafe impl Send for WindowsHandle {}

impl WindowsHandle {
    fn io(&mut self, fnname: &'static str) -> OsResult<&mut OverlappedIo> {
        self.io.as_mut().ok_or_else(|| OsError::new(fnname,
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "device opened for attributes only")))
    }

    fn hid_string(&self, fnname: &'static str,
        f: unsafe extern "system" fn(HANDLE, PVOID, ULONG) -> BOOLEAN) -> OsResult<Option<String>>
    {
        const WSTR_LEN: usize = 512;
        let mut wstr = [0u16; WSTR_LEN];
        let res = unsafe {
            f(self.device_handle, wstr.as_mut_ptr() as PVOID, (size_of::<u16>() * min(wstr.len(), MAX_STRING_WCHARS)) as ULONG)
        };
        if res == 0 {
            log::trace!("{} failed: {}", fnname, std::io::Error::last_os_error());
            return Ok(None);
        }
        Ok(Some(string_from_wide(&wstr)).filter(|v| !v.is_empty()))
    }
}

impl DeviceHandle for WindowsHandle {
    fn interrupter(&self) -> Option<Interrupter> {
        let cancel = self.io.as_ref()?.cancel.clone();
        Some(Interrupter::new(move || {
            unsafe { SetEvent(cancel.0) };
        }))
    }

    fn attributes(&self) -> OsResult<Attributes> {
        /* Get the Vendor ID and Product ID for this device. */
        let mut attrib: HIDD_ATTRIBUTES = unsafe { std::mem::zeroed() };
        attrib.Size = size_of::<HIDD_ATTRIBUTES>() as u32;
        let res = unsafe { HidD_GetAttributes(self.device_handle, &mut attrib) };
        if res == 0 {
            return Err(OsError::last("HidD_GetAttributes"));
        }

        let mut attributes = Attributes {
            vendor_id: attrib.VendorID,
            product_id: attrib.ProductID,
            release_number: attrib.VersionNumber,
            ..Attributes::default()
        };

        /* Get the Usage Page and Usage for this device. */
        match preparsed_caps(self.device_handle) {
            Ok(caps) => {
                attributes.usage_page = caps.UsagePage;
                attributes.usage = caps.Usage;
            }
            Err(err) => log::debug!("No capabilities: {}", err),
        }

        Ok(attributes)
    }

    fn serial_number(&self) -> OsResult<Option<String>> {
        self.hid_string("HidD_GetSerialNumberString", HidD_GetSerialNumberString)
    }

    fn manufacturer_string(&self) -> OsResult<Option<String>> {
        self.hid_string("HidD_GetManufacturerString", HidD_GetManufacturerString)
    }

    fn product_string(&self) -> OsResult<Option<String>> {
        self.hid_string("HidD_GetProductString", HidD_GetProductString)
    }

    fn write(&mut self, data: &[u8]) -> OsResult<usize> {
        let device_handle = self.device_handle;
        let io = self.io("WriteFile")?;
        let mut ol: OVERLAPPED = unsafe {
            std::mem::zeroed()
        };

        let mut buf_backing;

        /* Make sure the right number of bytes are passed to WriteFile. Windows
           expects the number of bytes which are in the _longest_ report (plus
           one for the report number) bytes even if the data is a report
           which is shorter than that. */
        let buf = if data.len() >= io.output_report_length as usize {
            data
        } else {
            buf_backing = vec![0; io.output_report_length as usize];
            buf_backing[..data.len()].copy_from_slice(data);
            &buf_backing[..]
        };

        let res = unsafe { WriteFile(device_handle, buf.as_ptr() as _, buf.len() as u32, ptr::null_mut(), &mut ol) };

        if res == 0 && unsafe { GetLastError() } != ERROR_IO_PENDING {
            return Err(OsError::last("WriteFile"));
        }

        /* Wait here until the write is done. This makes write() synchronous. */
        let mut bytes_written = 0;
        let res = unsafe { GetOverlappedResult(device_handle, &mut ol, &mut bytes_written, TRUE/*wait*/) };
        if res == 0 {
            return Err(OsError::last("GetOverlappedResult"));
        }

        Ok(bytes_written as usize)
    }

    fn read_timeout(&mut self, data: &mut [u8], timeout: Option<Duration>) -> OsResult<usize> {
        let device_handle = self.device_handle;
        let io = self.io("ReadFile")?;
        let ev = io.ol.hEvent;

        if !io.read_pending {
            /* Start an Overlapped I/O read. */
            io.read_pending = true;
            for i in &mut io.read_buf[..] { *i = 0 }
            unsafe { ResetEvent(ev) };
            let mut bytes_read = 0;
            let res = unsafe { ReadFile(device_handle, io.read_buf.as_mut_ptr() as _, io.input_report_length as u32, &mut bytes_read, &mut io.ol) };

            if res == 0 && unsafe { GetLastError() } != ERROR_IO_PENDING {
                /* ReadFile() has failed. Clean up and return error. */
                let err = OsError::last("ReadFile");
                unsafe { CancelIo(device_handle) };
                io.read_pending = false;
                return Err(err);
            }
        }

        let milliseconds = match timeout {
            Some(timeout) => min(timeout.as_millis(), (INFINITE - 1) as u128) as DWORD,
            None => INFINITE,
        };
        /* Wait for data, or for the device to be closed under us. */
        let events = [ev, io.cancel.0];
        let res = unsafe { WaitForMultipleObjects(events.len() as DWORD, events.as_ptr(), FALSE, milliseconds) };
        if res == WAIT_FAILED {
            return Err(OsError::last("WaitForMultipleObjects"));
        }
        if res == WAIT_OBJECT_0 + 1 {
            /* Let the read wind down before anyone touches read_buf again. */
            let mut bytes_read = 0;
            unsafe {
                CancelIo(device_handle);
                GetOverlappedResult(device_handle, &mut io.ol, &mut bytes_read, TRUE/*wait*/);
            }
            io.read_pending = false;
            return Err(OsError::status("ReadFile", ERROR_OPERATION_ABORTED));
        }
        if res != WAIT_OBJECT_0 {
            /* There was no data this time. Return zero bytes available,
               but leave the Overlapped I/O running. */
            return Ok(0)
        }

        let mut bytes_read = 0;
        let res = unsafe { GetOverlappedResult(device_handle, &mut io.ol, &mut bytes_read, TRUE/*wait*/) };

        /* Set pending back to false, even if GetOverlappedResult() returned error. */
        io.read_pending = false;

        if res == 0 {
            return Err(OsError::last("GetOverlappedResult"));
        }

        let bytes_read = bytes_read as usize;
        if bytes_read == 0 {
            return Ok(0);
        }

        /* Windows sticks a report number (0x0) on the beginning of the report
           even when report numbers aren't used. Skip over it. */
        let report = if io.read_buf[0] == 0x0 {
            &io.read_buf[1..bytes_read]
        } else {
            &io.read_buf[..bytes_read]
        };
        let copy_len = min(data.len(), report.len());
        data[..copy_len].copy_from_slice(&report[..copy_len]);
        Ok(copy_len)
    }

    fn send_feature_report(&mut self, data: &[u8]) -> OsResult<usize> {
        let res = unsafe {
            HidD_SetFeature(self.device_handle, data.as_ptr() as _, data.len() as u32)
        };
        if res == 0 {
            return Err(OsError::last("HidD_SetFeature"));
        }

        Ok(data.len())
    }

    fn get_feature_report(&mut self, data: &mut [u8]) -> OsResult<usize> {
        let mut ol: OVERLAPPED = unsafe {
            std::mem::zeroed()
        };

        let mut bytes_returned = 0;
        let data_ptr = data.as_mut_ptr() as *mut _;
        let res = unsafe {
            DeviceIoControl(self.device_handle,
                IOCTL_HID_GET_FEATURE,
                data_ptr, data.len() as u32,
                data_ptr, data.len() as u32,
                &mut bytes_returned, &mut ol)
        };

        if res == 0 && unsafe { GetLastError() } != ERROR_IO_PENDING {
            return Err(OsError::last("DeviceIoControl"));
        }

        let res = unsafe {
            GetOverlappedResult(self.device_handle, &mut ol, &mut bytes_returned, TRUE/*wait*/)
        };
        if res == 0 {
            return Err(OsError::last("GetOverlappedResult"));
        }

        /* bytes_returned does not include the first byte which contains the
           report ID. */
        Ok(bytes_returned as usize + 1)
    }
}

impl Drop for WindowsHandle {
    fn drop(&mut self) {
        unsafe {
            if let Some(mut io) = self.io.take() {
                CancelIo(self.device_handle);
                if io.read_pending {
                    let mut bytes_read = 0;
                    GetOverlappedResult(self.device_handle, &mut io.ol, &mut bytes_read, TRUE/*wait*/);
                }
                CloseHandle(io.ol.hEvent);
            }
            CloseHandle(self.device_handle);
        }
    }
}
