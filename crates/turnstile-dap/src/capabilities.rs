//! Capabilities advertised to the debugger.

use crate::events::EventFilters;
use crate::protocol::Capabilities;

/// Build the `initialize` response body.
///
/// Termination support is only advertised when the host registered a
/// termination callback.
pub fn advertised(events: &dyn EventFilters, can_terminate: bool) -> Capabilities {
    Capabilities {
        supports_configuration_done_request: true,
        supports_set_variable: true,
        supports_evaluate_for_hovers: true,
        supports_function_breakpoints: true,
        exception_breakpoint_filters: events.filters(),
        support_terminate_debuggee: can_terminate,
        supports_terminate_request: can_terminate,
    }
}
