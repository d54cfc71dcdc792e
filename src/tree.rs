//! Resolution of a HID interface node to the USB device that owns it.
//!
//! A HID interface is usually a sub-function of a composite USB device, and
//! it's the USB device that the user perceives as "the device": that's also
//! the node the OS reports as gone when the cable is pulled.

use crate::os::DeviceTree;
use crate::OsResult;

/// Bound on the parent chain, in case the OS ever hands back a cycle.
const MAX_DEPTH: usize = 64;

pub struct TreeWalker<'a, T: ?Sized> {
    tree: &'a T,
}

impl<'a, T: DeviceTree + ?Sized> TreeWalker<'a, T> {
    pub fn new(tree: &'a T) -> TreeWalker<'a, T> {
        TreeWalker { tree }
    }

    /// Instance id of the USB device owning `instance_id`.
    ///
    /// Walks parent links until one is a USB device. Falls back to
    /// `instance_id` itself when it has no USB ancestor.
    pub fn resolve_usb_instance(&self, instance_id: &str) -> OsResult<String> {
        if self.tree.is_usb_device(instance_id) {
            return Ok(instance_id.to_string());
        }

        let mut current = instance_id.to_string();
        for _ in 0..MAX_DEPTH {
            let parent = match self.tree.parent(&current)? {
                Some(parent) => parent,
                None => break,
            };
            if self.tree.is_usb_device(&parent) {
                log::trace!("{} is owned by {}", instance_id, parent);
                return Ok(parent);
            }
            current = parent;
        }

        log::trace!("{} has no USB ancestor", instance_id);
        Ok(instance_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OsError;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeTree {
        parents: HashMap<&'static str, &'static str>,
        broken: Option<&'static str>,
        visited: RefCell<Vec<String>>,
    }

    impl FakeTree {
        fn chain(chain: &[&'static str]) -> FakeTree {
            FakeTree {
                parents: chain.windows(2).map(|w| (w[0], w[1])).collect(),
                broken: None,
                visited: RefCell::new(Vec::new()),
            }
        }
    }

    impl DeviceTree for FakeTree {
        fn parent(&self, instance_id: &str) -> OsResult<Option<String>> {
            self.visited.borrow_mut().push(instance_id.to_string());
            if self.broken == Some(instance_id) {
                return Err(OsError::status("CM_Get_Parent", 0x1e));
            }
            Ok(self.parents.get(instance_id).map(|v| v.to_string()))
        }
    }

    #[test]
    fn stops_at_first_usb_ancestor() {
        let tree = FakeTree::chain(&[
            r"HID\VID_1234&PID_5678&MI_00\7&1a2b&0&0000",
            r"BUSX\MID\1",
            r"USB\VID_1234&PID_5678\5&abc",
            r"ROOT\HUB\0",
        ]);
        let resolved = TreeWalker::new(&tree)
            .resolve_usb_instance(r"HID\VID_1234&PID_5678&MI_00\7&1a2b&0&0000")
            .unwrap();
        assert_eq!(resolved, r"USB\VID_1234&PID_5678\5&abc");
        assert!(!tree.visited.borrow().iter().any(|v| v == r"USB\VID_1234&PID_5678\5&abc"));
    }

    #[test]
    fn falls_back_to_node_without_parent() {
        let tree = FakeTree::chain(&[]);
        let resolved = TreeWalker::new(&tree).resolve_usb_instance(r"HID\LONELY\1").unwrap();
        assert_eq!(resolved, r"HID\LONELY\1");
    }

    #[test]
    fn falls_back_to_node_without_usb_ancestor() {
        let tree = FakeTree::chain(&[r"HID\BTH\1", r"BTHENUM\X\2", r"ROOT\BTH\0"]);
        let resolved = TreeWalker::new(&tree).resolve_usb_instance(r"HID\BTH\1").unwrap();
        assert_eq!(resolved, r"HID\BTH\1");
    }

    #[test]
    fn usb_node_resolves_to_itself() {
        let tree = FakeTree::chain(&[r"USB\VID_1\1", r"USB\ROOT_HUB30\0"]);
        let resolved = TreeWalker::new(&tree).resolve_usb_instance(r"USB\VID_1\1").unwrap();
        assert_eq!(resolved, r"USB\VID_1\1");
        assert!(tree.visited.borrow().is_empty());
    }

    #[test]
    fn propagates_tree_query_failure() {
        let mut tree = FakeTree::chain(&[r"HID\A\1", r"BUS\B\2", r"USB\C\3"]);
        tree.broken = Some(r"BUS\B\2");
        let err = TreeWalker::new(&tree).resolve_usb_instance(r"HID\A\1").unwrap_err();
        assert_eq!(err.fnname, "CM_Get_Parent");
    }
}
