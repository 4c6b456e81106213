//! The clock and deadline model: when is it safe to run a task without risking the next frame?
use audio_pipeline_sync::SeqlockU64;

use crate::config::DerivedConfig;

/// Tracks the predicted start of the next frame and answers window-admission questions against it.
///
/// `next_frame_deadline` is written exactly once per call to [DeadlineClock::begin_frame], always by whichever thread
/// currently holds the pipeline mutex, and read by any number of concurrent submitters deciding whether to take the
/// in-place fast path. The sequence lock lets those readers never block on the writer.
pub(crate) struct DeadlineClock {
    next_frame_deadline: SeqlockU64,
    config: DerivedConfig,
}

impl DeadlineClock {
    pub(crate) fn new(config: DerivedConfig, initial_deadline_ns: u64) -> Self {
        DeadlineClock {
            next_frame_deadline: SeqlockU64::new(initial_deadline_ns),
            config,
        }
    }

    pub(crate) fn config(&self) -> &DerivedConfig {
        &self.config
    }

    /// Read the predicted start of the next frame. Lock-free; safe from any thread.
    pub(crate) fn next_frame_deadline(&self) -> u64 {
        self.next_frame_deadline.load()
    }

    /// Recompute the next frame deadline from an observed frame start and the number of samples in that frame. Must
    /// only be called by the pipeline mutex holder.
    pub(crate) fn begin_frame(&self, frame_start_ns: u64, frame_samples: u64) {
        let deadline = frame_start_ns + self.config.sample_duration_ns(frame_samples);
        self.next_frame_deadline.store(deadline);
    }

    fn exclusion_start(&self) -> u64 {
        self.next_frame_deadline()
            .saturating_sub(self.config.no_task_proc_half_interval_ns)
    }

    /// Is `t` inside the no-task-proc window around the predicted next frame start?
    pub(crate) fn in_no_task_proc_window(&self, t: u64) -> bool {
        let deadline = self.next_frame_deadline();
        let half = self.config.no_task_proc_half_interval_ns;
        t.abs_diff(deadline) <= half
    }

    /// May a task costing `expected_task_cost` run right now, between frames?
    pub(crate) fn interframe_window_admits(&self, now_ns: u64) -> bool {
        now_ns + self.config.expected_task_cost_ns < self.exclusion_start()
    }

    /// May a task costing `expected_task_cost` run right now, between sub-frames within a frame currently being
    /// processed? Slightly stricter than the interframe check: it also applies the configured safety margin.
    pub(crate) fn subframe_window_admits(&self, now_ns: u64) -> bool {
        now_ns + self.config.expected_task_cost_ns + self.config.task_processing_safety_margin_ns
            < self.exclusion_start()
    }

    /// The deadline at which the external scheduler should be asked to call back: the midpoint of the remaining
    /// interframe window, or `now_ns` itself if there is no positive slack left.
    pub(crate) fn next_interframe_midpoint(&self, now_ns: u64) -> u64 {
        let window_end = self.exclusion_start();
        if window_end <= now_ns {
            now_ns
        } else {
            now_ns + (window_end - now_ns) / 2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn derived() -> DerivedConfig {
        DerivedConfig::new(&PipelineConfig::default(), 44100, 2)
    }

    #[test]
    fn no_task_proc_window_is_symmetric_around_the_deadline() {
        let clock = DeadlineClock::new(derived(), 10_000_000);
        let half = clock.config().no_task_proc_half_interval_ns;
        assert!(clock.in_no_task_proc_window(10_000_000));
        assert!(clock.in_no_task_proc_window(10_000_000 + half));
        assert!(clock.in_no_task_proc_window(10_000_000 - half));
        assert!(!clock.in_no_task_proc_window(10_000_000 + half + 1));
    }

    #[test]
    fn interframe_window_admits_when_there_is_slack() {
        let clock = DeadlineClock::new(derived(), 10_000_000);
        // Comfortably early: plenty of slack before the exclusion window starts.
        assert!(clock.interframe_window_admits(0));
    }

    #[test]
    fn interframe_window_rejects_close_to_the_deadline() {
        let clock = DeadlineClock::new(derived(), 10_000_000);
        assert!(!clock.interframe_window_admits(10_000_000));
    }

    #[test]
    fn midpoint_is_between_now_and_the_exclusion_start() {
        let clock = DeadlineClock::new(derived(), 10_000_000);
        let now = 0;
        let mid = clock.next_interframe_midpoint(now);
        assert!(mid > now);
        assert!(mid < clock.exclusion_start());
    }

    #[test]
    fn begin_frame_recomputes_the_deadline() {
        let clock = DeadlineClock::new(derived(), 0);
        // One stereo-frame's worth of samples, i.e. 1 sample-frame.
        clock.begin_frame(5_000_000, 2);
        let expected = 5_000_000 + clock.config().sample_duration_ns(2);
        assert_eq!(clock.next_frame_deadline(), expected);
    }
}
