//! Single-reader statistics, updated under the pipeline mutex.

/// A point-in-time snapshot of the pipeline's counters.
///
/// Obtained via [crate::coordinator::Pipeline::stats_snapshot]. That accessor takes the pipeline mutex to read these
/// fields consistently with each other, but the snapshot itself is a plain copy with no ongoing relationship to the
/// pipeline -- it is not safe to assume it is still current once other operations have run. Intended for tests and
/// benchmarks, not for a production metrics hot path.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PipelineStats {
    /// Every task the coordinator has completed, by any path.
    pub tasks_processed_total: u64,

    /// Tasks completed on a submitter's thread via `schedule`'s in-place fast path.
    pub tasks_processed_in_place: u64,

    /// Tasks completed from inside `process_frame_and_tasks`, between sub-frames.
    pub tasks_processed_in_frame: u64,

    /// Times an in-flight `process_tasks` call released the mutex early because a frame became pending.
    pub preemptions: u64,

    /// Times the external scheduler was asked to arrange a future `process_tasks` call.
    pub scheduler_invocations: u64,

    /// Times a pending scheduler invocation was cancelled.
    pub scheduler_cancellations: u64,
}

impl PipelineStats {
    pub(crate) fn record_in_place(&mut self) {
        self.tasks_processed_total += 1;
        self.tasks_processed_in_place += 1;
    }

    pub(crate) fn record_in_frame(&mut self) {
        self.tasks_processed_total += 1;
        self.tasks_processed_in_frame += 1;
    }

    pub(crate) fn record_async(&mut self) {
        self.tasks_processed_total += 1;
    }

    pub(crate) fn record_preemption(&mut self) {
        self.preemptions += 1;
    }

    pub(crate) fn record_scheduler_invocation(&mut self) {
        self.scheduler_invocations += 1;
    }

    pub(crate) fn record_scheduler_cancellation(&mut self) {
        self.scheduler_cancellations += 1;
    }
}
