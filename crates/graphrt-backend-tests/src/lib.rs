pub mod recording_backend;
pub mod smoke;

pub use recording_backend::{
    Event, EventLog, RecordingAccessor, RecordingBackend, RecordingFunction, RecordingHandle,
    RecordingMemoryGroup,
};

/// Instantiates the backend-agnostic smoke suite for a backend constructor.
///
/// ```ignore
/// graphrt_backend_tests::define_backend_tests!(cpu_ref, graphrt_backend_ref_cpu::CpuBackend::new);
/// ```
#[macro_export]
macro_rules! define_backend_tests {
    ($module:ident, $backend_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            use super::*;

            use $crate::smoke;

            macro_rules! smoke_test {
                ($name:ident) => {
                    #[test]
                    fn $name() {
                        let backend = ($backend_ctor)();
                        smoke::$name(backend);
                    }
                };
            }

            smoke_test!(identity_pipeline_round_trips);
            smoke_test!(elementwise_chain_matches_expected);
            smoke_test!(matmul_with_constant_weights_matches_expected);
            smoke_test!(repeated_execution_reads_fresh_inputs);
            smoke_test!(finalize_runs_eagerly_unless_queued);
            smoke_test!(executes_without_transition_memory);
            smoke_test!(shared_intermediate_feeds_two_consumers);
        }
    };
}
