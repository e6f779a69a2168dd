use super::guest_err::check_for_guest_error;
#[cfg(feature = "function_call_metrics")]
use crate::histogram_vec_time_micros;
use crate::hypervisor::hypervisor_handler::{
    execute_vcpu_action, terminate_hypervisor_handler_execution_and_reinitialise, DispatchArgs,
    VCPUAction,
};
use crate::mem::ptr::RawPtr;
#[cfg(feature = "function_call_metrics")]
use crate::metrics::SandboxMetric::GuestFunctionCallDurationMicroseconds;
use crate::sandbox::WrapperGetter;
use crate::{HyperlightError, Result};
use cfg_if::cfg_if;
use hyperlight_common::flatbuffer_wrappers::function_types::{
    ParameterValue, ReturnType, ReturnValue,
};
use tracing::{instrument, Span};

/// Call a guest function by name, using the given `wrapper_getter`.
#[instrument(
    err(Debug),
    skip(wrapper_getter, args),
    parent = Span::current(),
    level = "Trace"
)]
pub(crate) fn dispatch_call_from_host<HvMemMgrT: WrapperGetter>(
    wrapper_getter: &mut HvMemMgrT,
    function_name: &str,
    return_type: ReturnType,
    args: Option<Vec<ParameterValue>>,
) -> Result<ReturnValue> {
    let (is_in_process, p_dispatch) = {
        // only borrow immutably from hv_mem_mgr_getter inside this
        // scope so we can later borrow mutably from it to get the
        // hypervisor
        let mem_mgr = wrapper_getter.get_mgr().as_ref();
        (
            mem_mgr.is_in_process(),
            mem_mgr.get_pointer_to_dispatch_function()?,
        )
    };

    {
        // once again, only borrow mutably from hv_mem_mgr_getter
        // from inside this scope so we can borrow mutably later
        let mem_mgr = wrapper_getter.get_mgr_mut();
        mem_mgr
            .as_mut()
            .write_guest_function_call(function_name, args, return_type)?;
    }

    if is_in_process {
        let dispatch: fn() = unsafe { std::mem::transmute(p_dispatch) };
        // Q: Why does this function not take `args` and doesn't return `return_type`?
        //
        // A: That's because we've already written the function call details to memory
        // with `mem_mgr.write_guest_function_call(&buffer)?;`
        // and the `dispatch` function can directly access that via shared memory.
        cfg_if! {
            if #[cfg(feature = "function_call_metrics")] {
                histogram_vec_time_micros!(
                    &GuestFunctionCallDurationMicroseconds,
                    &[function_name],
                    dispatch()
                );
            }
            else {
                dispatch();
            }
        }
    } else {
        let (outb_hdl, mem_access_hdl, max_execution_time) = {
            let hv_wrapper = wrapper_getter.get_hv();
            (
                hv_wrapper.outb_hdl.clone(),
                hv_wrapper.mem_access_hdl.clone(),
                hv_wrapper.max_execution_time,
            )
        };

        let dispatch_args = DispatchArgs::new(
            function_name.to_string(),
            RawPtr::from(p_dispatch),
            outb_hdl.clone(),
            mem_access_hdl.clone(),
        );

        let res = execute_vcpu_action(
            wrapper_getter.get_hv(),
            VCPUAction::DispatchCallFromHost(dispatch_args),
            None,
        );

        if matches!(res, Err(HyperlightError::HypervisorHandlerMessageReceiveTimedout)) {
            let (thread_id, run_cancelled, termination_status, max_wait_for_cancellation) = {
                let hv_lock = wrapper_getter.get_hv().try_get_hypervisor_lock()?;
                (
                    hv_lock.get_thread_id(),
                    hv_lock.get_run_cancelled(),
                    hv_lock.get_termination_status(),
                    wrapper_getter.get_hv().max_wait_for_cancellation,
                )
            };
            return Err(terminate_hypervisor_handler_execution_and_reinitialise(
                wrapper_getter,
                max_execution_time,
                termination_status,
                outb_hdl,
                mem_access_hdl,
                #[cfg(target_os = "linux")]
                thread_id,
                #[cfg(target_os = "linux")]
                run_cancelled,
                #[cfg(target_os = "linux")]
                max_wait_for_cancellation,
            )?);
        }

        res?;
    }

    let mem_mgr = wrapper_getter.get_mgr_mut();
    mem_mgr.check_stack_guard()?; // <- wrapper around mem_mgr `check_for_stack_guard`
    check_for_guest_error(mem_mgr)?;

    mem_mgr.as_mut().get_return_value()
}
