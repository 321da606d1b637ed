// Electronic key matching. Wildcards are forbidden on safety devices;
// compatibility-bit acceptance of a non-exact key is delegated to the
// application.

use crate::cip::{extstat, gstat};
use crate::establish::respond::RespStatus;
use crate::sapl::ErrorCode;
use crate::types::{DeviceIdentity, ElectronicKey};

/// Check a received key against the device identity. `accept_compat` is
/// consulted only for a non-matching key with the compatibility bit set.
pub(crate) fn match_check(
    key: &ElectronicKey,
    identity: &DeviceIdentity,
    accept_compat: impl FnOnce(&ElectronicKey) -> bool,
) -> Result<(), (RespStatus, ErrorCode)> {
    // Wildcards (zero fields) first; these reject regardless of the
    // compatibility bit.
    if key.vendor_id == 0 || key.product_code == 0 {
        return Err((reject(extstat::VID_OR_PRODC), ErrorCode::SoKeyWildcardVidPc));
    }
    if key.device_type == 0 {
        return Err((reject(extstat::DEV_TYPE), ErrorCode::SoKeyWildcardDevType));
    }
    if key.major_rev() == 0 || key.minor_rev == 0 {
        return Err((reject(extstat::REVISION), ErrorCode::SoKeyWildcardRev));
    }

    // Exact match; on mismatch remember the first differing field.
    let mismatch = if key.vendor_id != identity.vendor_id
        || key.product_code != identity.product_code
    {
        Some((extstat::VID_OR_PRODC, ErrorCode::SoKeyVidPcMismatch))
    } else if key.device_type != identity.device_type {
        Some((extstat::DEV_TYPE, ErrorCode::SoKeyDevTypeMismatch))
    } else if key.major_rev() != identity.major_rev || key.minor_rev != identity.minor_rev {
        Some((extstat::REVISION, ErrorCode::SoKeyRevMismatch))
    } else {
        None
    };

    match mismatch {
        None => Ok(()),
        Some((ext, code)) => {
            if key.compatibility() && accept_compat(key) {
                Ok(())
            } else {
                Err((reject(ext), code))
            }
        }
    }
}

fn reject(ext: u16) -> RespStatus {
    RespStatus::error(gstat::CNXN_FAILURE, ext)
}
