use hyperlight_common::flatbuffer_wrappers::guest_error::ErrorCode;

use crate::error::HyperlightError::GuestError;
use crate::metrics::SandboxMetric::GuestErrorCount;
use crate::sandbox::mem_mgr::MemMgrWrapper;
use crate::{int_counter_vec_inc, log_then_return, Result};

/// Check the guest error buffer for an error the guest reported on its
/// last call and, if one is there, return it as an `Err`. A guest error
/// of [`ErrorCode::NoError`] is not an error at all and is reported as
/// `Ok(())`.
pub(super) fn check_for_guest_error(mgr: &MemMgrWrapper) -> Result<()> {
    let (code, message) = mgr.as_ref().get_guest_error()?;
    match code {
        ErrorCode::NoError => Ok(()),
        _ => {
            let message = message.unwrap_or_default();
            increment_guest_error_count(code, &message);
            log_then_return!(GuestError(code, message));
        }
    }
}

fn increment_guest_error_count(code: ErrorCode, message: &str) {
    let code_string = format!("{code:?}");
    int_counter_vec_inc!(&GuestErrorCount, &[&code_string, message]);
}
