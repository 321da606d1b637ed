// UNID checks shared by connection admission, the supervisor and the
// explicit services.

use crate::types::{Snn, Unid, INVALID_NODE_ID};

/// True when `needle` equals any UNID in the per-port list.
pub fn list_contains(needle: &Unid, list: &[Unid]) -> bool {
    list.iter().any(|u| u == needle)
}

/// True when at least one port has a TUNID different from the out-of-box
/// all-FF value.
pub fn device_has_valid_tunid(list: &[Unid]) -> bool {
    list.iter().any(|u| {
        u.snn.time != 0xFFFF_FFFF && u.snn.date != 0xFFFF && u.node_id != 0xFFFF_FFFF
    })
}

/// Check every port's TUNID against the device's NodeID for that port.
///
/// A port without a NodeID must not carry an SNN. A port with a NodeID may
/// carry an all-FF TUNID (port unused for safety); otherwise the NodeID
/// portion must match and the SNN must be a set (non-FF) value.
pub fn tunid_vs_nodeid_check(list: &[Unid], node_ids: &[u32]) -> bool {
    debug_assert_eq!(list.len(), node_ids.len());
    for (tunid, &node_id) in list.iter().zip(node_ids) {
        if node_id == INVALID_NODE_ID {
            if tunid.snn != Snn::UNSET {
                return false;
            }
        }
        if tunid.is_unset() {
            continue;
        }
        if tunid.node_id != node_id || tunid.snn.is_unset() {
            return false;
        }
    }
    true
}
