//! Pipeline configuration, and the sample-based constants derived from it.
use std::time::Duration;

/// Time-based configuration, as an embedder would write it.
///
/// `Default::default()` gives reasonable settings for a typical interactive audio pipeline; tune the windows if tasks
/// are unusually expensive or frames unusually short.
#[derive(Copy, Clone, Debug)]
pub struct PipelineConfig {
    /// If false, frames are never split and tasks are never interleaved with sub-frames: frame and task processing
    /// simply compete for the pipeline mutex.
    pub enable_precise_task_scheduling: bool,

    /// Minimum amount of frame time that must have been processed before in-frame task windows open.
    pub min_frame_length_between_tasks: Duration,

    /// Maximum sub-frame length; frames longer than this are split so tasks get a chance to run between the pieces.
    pub max_frame_length_between_tasks: Duration,

    /// Full width of the exclusion window centered on each predicted frame start, during which tasks must not run.
    pub task_processing_prohibited_interval: Duration,

    /// Pessimistic bound on how long a single task takes to process. Used for window admission; the coordinator
    /// processes tasks one at a time and re-checks this bound before each.
    pub expected_task_cost: Duration,

    /// Extra slack added to `expected_task_cost` specifically for the (tighter) subframe-window check.
    pub task_processing_safety_margin: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            enable_precise_task_scheduling: true,
            min_frame_length_between_tasks: Duration::from_micros(500),
            max_frame_length_between_tasks: Duration::from_millis(2),
            task_processing_prohibited_interval: Duration::from_micros(500),
            expected_task_cost: Duration::from_micros(200),
            task_processing_safety_margin: Duration::from_micros(100),
        }
    }
}

/// Sample-based constants derived from [PipelineConfig] at construction time, given a sample rate and channel count.
///
/// "Samples" here counts interleaved samples (i.e. audio frames times channel count), matching the unit
/// `process_frame_and_tasks` receives its slices in.
#[derive(Copy, Clone, Debug)]
pub(crate) struct DerivedConfig {
    pub(crate) enable_precise_task_scheduling: bool,
    pub(crate) min_samples_between_tasks: u64,
    pub(crate) max_samples_between_tasks: u64,
    pub(crate) no_task_proc_half_interval_ns: u64,
    pub(crate) expected_task_cost_ns: u64,
    pub(crate) task_processing_safety_margin_ns: u64,
    pub(crate) sample_rate: u32,
    pub(crate) channel_count: u32,
}

impl DerivedConfig {
    pub(crate) fn new(config: &PipelineConfig, sample_rate: u32, channel_count: u32) -> Self {
        assert!(sample_rate > 0, "sample rate must be nonzero");
        assert!(channel_count > 0, "channel count must be nonzero");

        let samples_per_second = sample_rate as u64 * channel_count as u64;
        let samples_for = |d: Duration| -> u64 {
            ((d.as_secs_f64() * samples_per_second as f64).round() as u64).max(channel_count as u64)
        };

        DerivedConfig {
            enable_precise_task_scheduling: config.enable_precise_task_scheduling,
            min_samples_between_tasks: samples_for(config.min_frame_length_between_tasks),
            max_samples_between_tasks: samples_for(config.max_frame_length_between_tasks),
            no_task_proc_half_interval_ns: config
                .task_processing_prohibited_interval
                .as_nanos()
                .try_into()
                .unwrap_or(u64::MAX)
                / 2,
            expected_task_cost_ns: config.expected_task_cost.as_nanos().try_into().unwrap_or(u64::MAX),
            task_processing_safety_margin_ns: config
                .task_processing_safety_margin
                .as_nanos()
                .try_into()
                .unwrap_or(u64::MAX),
            sample_rate,
            channel_count,
        }
    }

    /// Duration, in nanoseconds, of `n` interleaved samples at this pipeline's sample rate.
    pub(crate) fn sample_duration_ns(&self, n_samples: u64) -> u64 {
        let frames = n_samples / self.channel_count as u64;
        (frames * 1_000_000_000) / self.sample_rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_sane_constants_for_typical_settings() {
        let cfg = PipelineConfig::default();
        let derived = DerivedConfig::new(&cfg, 44100, 2);
        assert!(derived.min_samples_between_tasks > 0);
        assert!(derived.max_samples_between_tasks > derived.min_samples_between_tasks);
        assert!(derived.no_task_proc_half_interval_ns > 0);
    }

    #[test]
    fn sample_duration_matches_sample_rate() {
        let cfg = PipelineConfig::default();
        let derived = DerivedConfig::new(&cfg, 44100, 2);
        // One second of stereo audio at 44100 Hz is 44100 * 2 interleaved samples.
        let one_second_samples = 44100u64 * 2;
        let ns = derived.sample_duration_ns(one_second_samples);
        assert!((ns as i64 - 1_000_000_000i64).abs() < 1_000_000);
    }
}
