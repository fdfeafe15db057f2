//! Calling-convention aware argument extraction.

use crate::{
    instrumentation::{CallingConvention, Instrumentation},
    state::ExecutionContext,
    Result,
};

/// Reads the arguments of the function being entered.
///
/// Must be called with the context positioned at the function entry, i.e. right
/// after the call instruction pushed the return address. Both supported conventions
/// pass arguments in pointer-sized stack slots directly above the return address,
/// left to right:
///
/// ```text
///   sp + 3*ptr │ arg 2 │
///   sp + 2*ptr │ arg 1 │
///   sp + 1*ptr │ arg 0 │
///   sp         │ ret   │
/// ```
///
/// The context is only read, never modified.
///
/// # Errors
///
/// Returns [`crate::Error::MemoryRead`] if a slot cannot be read.
pub fn extract_arguments(
    context: &dyn ExecutionContext,
    instrumentation: &Instrumentation,
) -> Result<Vec<u64>> {
    let count = u64::from(instrumentation.param_count());
    let slot = context.pointer_size() as u64;
    let base = match instrumentation.convention() {
        // Cleanup responsibility differs, the layout at entry does not.
        CallingConvention::Stdcall | CallingConvention::Cdecl => {
            context.stack_pointer().wrapping_add(slot)
        }
    };

    (0..count)
        .map(|index| context.read_pointer(base.wrapping_add(index.wrapping_mul(slot))))
        .collect()
}

/// Reads the return address of the function being entered.
///
/// # Errors
///
/// Returns [`crate::Error::MemoryRead`] if the top of the stack cannot be read.
pub fn return_address(context: &dyn ExecutionContext) -> Result<u64> {
    context.read_pointer(context.stack_pointer())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state::{ContextId, GuestState},
        test::entry_state,
        Error,
    };

    fn record(count: u32, convention: CallingConvention) -> Instrumentation {
        Instrumentation::new("libfoo", 0x1000, count, "f", convention, false)
    }

    #[test]
    fn test_extract_cdecl_32bit() {
        let state = entry_state(ContextId(1), 4, 0xdead, &[5, 7, 9]);

        let args = extract_arguments(&state, &record(3, CallingConvention::Cdecl)).unwrap();

        assert_eq!(args, vec![5, 7, 9]);
        assert_eq!(return_address(&state).unwrap(), 0xdead);
    }

    #[test]
    fn test_extract_stdcall_64bit() {
        let state = entry_state(ContextId(1), 8, 0x4010_0000, &[u64::MAX, 0, 42]);

        let args = extract_arguments(&state, &record(3, CallingConvention::Stdcall)).unwrap();

        assert_eq!(args, vec![u64::MAX, 0, 42]);
    }

    #[test]
    fn test_extract_fewer_than_pushed() {
        let state = entry_state(ContextId(1), 4, 0xdead, &[1, 2, 3, 4]);

        let args = extract_arguments(&state, &record(2, CallingConvention::Cdecl)).unwrap();

        assert_eq!(args, vec![1, 2]);
    }

    #[test]
    fn test_extract_zero_params() {
        let state = entry_state(ContextId(1), 4, 0xdead, &[]);
        assert!(extract_arguments(&state, &record(0, CallingConvention::Cdecl))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_extract_unmapped_stack() {
        let state = GuestState::new(ContextId(1), 4);
        let result = extract_arguments(&state, &record(1, CallingConvention::Cdecl));
        assert!(matches!(result, Err(Error::MemoryRead { .. })));
    }

    #[test]
    fn test_extract_huge_count_stops_at_unmapped_slot() {
        let state = entry_state(ContextId(1), 4, 0xdead, &[5]);

        let result = extract_arguments(&state, &record(u32::MAX, CallingConvention::Cdecl));

        assert!(matches!(result, Err(Error::MemoryRead { .. })));
    }

    #[test]
    fn test_extract_does_not_mutate() {
        let state = entry_state(ContextId(1), 4, 0xdead, &[5, 7]);
        let sp = state.stack_pointer();
        let pages = state.mapped_pages();

        extract_arguments(&state, &record(2, CallingConvention::Stdcall)).unwrap();

        assert_eq!(state.stack_pointer(), sp);
        assert_eq!(state.mapped_pages(), pages);
    }
}
