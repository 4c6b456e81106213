//! The capability set a concrete pipeline supplies to the coordinator.
//!
//! This is deliberately a single trait rather than a small hierarchy of them: the coordinator needs exactly these three
//! operations and nothing else, and a capability set is easier to reason about and to mock in tests than an inheriting
//! chain of traits would be.
use crate::task::Task;

/// A contiguous slice of interleaved audio samples, plus enough shape information for a hook to interpret it.
pub struct FrameSlice<'a> {
    samples: &'a mut [f32],
    channel_count: u32,
}

impl<'a> FrameSlice<'a> {
    pub(crate) fn new(samples: &'a mut [f32], channel_count: u32) -> Self {
        debug_assert_eq!(samples.len() % channel_count as usize, 0);
        FrameSlice {
            samples,
            channel_count,
        }
    }

    /// The interleaved sample data for this slice.
    pub fn samples(&mut self) -> &mut [f32] {
        self.samples
    }

    /// Number of channels each audio frame within this slice has.
    pub fn channel_count(&self) -> u32 {
        self.channel_count
    }

    /// Number of audio frames (i.e. `samples().len() / channel_count()`) in this slice.
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channel_count as usize
    }
}

/// Operations the coordinator calls while holding the pipeline mutex.
///
/// All three of these are called only from whichever thread currently holds `pipeline_mutex`, so implementations don't
/// need to be `Sync` with respect to each other -- only `Send`, so that the pipeline as a whole can move between the
/// threads that happen to win the race for the mutex.
pub trait PipelineHooks: Send {
    /// The current monotonic time, in nanoseconds. Must agree with whatever clock source frame timestamps come from.
    fn now_ns(&mut self) -> u64;

    /// Process one frame or sub-frame of audio. Returns whether processing succeeded.
    fn process_frame(&mut self, frame: &mut FrameSlice<'_>) -> bool;

    /// Process one task. Returns whether it succeeded; the result becomes `task.success()`.
    fn process_task(&mut self, task: &Task) -> bool;
}
