use std::fmt;
use std::str::FromStr;

use crate::{HidError, HidResult};

/// Joins the interface path and the instance id in a serialized identity.
/// U+2022 BULLET never shows up in a device interface path.
pub const SEPARATOR: char = '\u{2022}';

/// Stable identifier of a HID interface: the path the OS opens, plus the
/// instance id of the USB device that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    interface_path: String,
    instance_id: String,
}

impl DeviceIdentity {
    pub fn compose<P, I>(interface_path: P, instance_id: I) -> HidResult<DeviceIdentity>
    where
        P: Into<String>,
        I: Into<String>,
    {
        let interface_path = interface_path.into();
        let instance_id = instance_id.into();
        if instance_id.contains(SEPARATOR) {
            return Err(HidError::MalformedIdentity {
                identity: instance_id,
                reason: "instance id contains the identity separator",
            });
        }
        Ok(DeviceIdentity { interface_path, instance_id })
    }

    /// Split a serialized identity back into its components.
    ///
    /// The split happens on the last separator: the instance id can never
    /// contain one, so whatever precedes it is the interface path.
    pub fn parse(serialized: &str) -> HidResult<DeviceIdentity> {
        match serialized.rfind(SEPARATOR) {
            Some(pos) => Ok(DeviceIdentity {
                interface_path: serialized[..pos].to_string(),
                instance_id: serialized[pos + SEPARATOR.len_utf8()..].to_string(),
            }),
            None => Err(HidError::MalformedIdentity {
                identity: serialized.to_string(),
                reason: "missing identity separator",
            }),
        }
    }

    pub fn serialize(&self) -> String {
        let mut s = String::with_capacity(
            self.interface_path.len() + SEPARATOR.len_utf8() + self.instance_id.len(),
        );
        s.push_str(&self.interface_path);
        s.push(SEPARATOR);
        s.push_str(&self.instance_id);
        s
    }

    /// The component handed to the OS when opening the device.
    pub fn interface_path_only(&self) -> &str {
        &self.interface_path
    }

    /// Instance id of the owning USB device, as carried by removal events.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.interface_path, SEPARATOR, self.instance_id)
    }
}

impl FromStr for DeviceIdentity {
    type Err = HidError;

    fn from_str(s: &str) -> HidResult<DeviceIdentity> {
        DeviceIdentity::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = r"\\?\hid#vid_1234&pid_0001&mi_00#7&2f6b3a1&0&0000#{4d1e55b2-f16f-11cf-88cb-001111000030}";
    const INSTANCE: &str = r"USB\VID_1234&PID_0001\5&abc&0&2";

    #[test]
    fn round_trips_through_serialized_form() {
        let cases = [
            (PATH, INSTANCE),
            ("", ""),
            ("/dev/hidraw3", "/devices/pci0000:00/0000:00:14.0/usb1/1-2"),
            ("path\u{2022}with\u{2022}bullets", "plain"),
        ];
        for (path, instance) in cases.iter() {
            let identity = DeviceIdentity::compose(*path, *instance).unwrap();
            let parsed = DeviceIdentity::parse(&identity.serialize()).unwrap();
            assert_eq!(parsed, identity);
            assert_eq!(parsed.interface_path_only(), *path);
            assert_eq!(parsed.instance_id(), *instance);
        }
    }

    #[test]
    fn rejects_separator_in_instance_id() {
        match DeviceIdentity::compose(PATH, "USB\\a\u{2022}b") {
            Err(HidError::MalformedIdentity { .. }) => (),
            other => panic!("expected MalformedIdentity, got {:?}", other),
        }
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(matches!(
            DeviceIdentity::parse(PATH),
            Err(HidError::MalformedIdentity { .. })
        ));
    }

    #[test]
    fn display_matches_serialize() {
        let identity = DeviceIdentity::compose(PATH, INSTANCE).unwrap();
        assert_eq!(identity.to_string(), identity.serialize());
        assert_eq!(identity.serialize().parse::<DeviceIdentity>().unwrap(), identity);
    }

    #[test]
    fn equality_needs_both_components() {
        let a = DeviceIdentity::compose(PATH, INSTANCE).unwrap();
        let b = DeviceIdentity::compose(PATH, "USB\\other").unwrap();
        let c = DeviceIdentity::compose("/dev/hidraw0", INSTANCE).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, a.clone());
    }
}
