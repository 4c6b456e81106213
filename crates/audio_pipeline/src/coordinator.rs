//! The coordinator: owns the pipeline mutex and implements the priority and scheduling policy.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::DeadlineClock;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::hooks::{FrameSlice, PipelineHooks};
use crate::is_audio_thread::with_audio_thread_marked;
use crate::logging::{rt_debug, rt_warn};
use crate::queue::TaskQueue;
use crate::scheduler::{SchedulerBridge, TaskScheduler};
use crate::stats::PipelineStats;
use crate::task::{CompletionHandler, Task};

struct Inner<H> {
    hooks: H,
    stats: PipelineStats,
}

/// The task-pipeline scheduling core.
///
/// Generic over the pluggable frame/task hooks (`H`) and the external scheduling facility (`S`). Neither generic
/// parameter is boxed: a concrete embedder monomorphizes this once for its own hook and scheduler types, so there is no
/// dynamic dispatch on the hot path.
pub struct Pipeline<H: PipelineHooks, S: TaskScheduler> {
    queue: TaskQueue,
    pending_tasks: AtomicU64,
    pending_frames: AtomicU64,
    clock: DeadlineClock,
    scheduler_bridge: SchedulerBridge<S>,
    channel_count: u32,

    /// Best-effort cache of the last time observed under the pipeline mutex, used only to pick a scheduling deadline
    /// when a caller needs one but isn't currently holding the mutex (and so cannot call `hooks.now_ns()` itself).
    /// Never used for a correctness-relevant decision -- the scheduler bridge and the window checks inside the mutex
    /// re-validate everything that matters.
    last_known_now_ns: AtomicU64,

    mutex: Mutex<Inner<H>>,
}

impl<H: PipelineHooks, S: TaskScheduler> Pipeline<H, S> {
    /// Construct a new pipeline. `initial_deadline_ns` seeds the predicted first frame deadline before any frame has
    /// actually run; a reasonable choice is `now_ns() + one frame's duration`.
    pub fn new(
        config: PipelineConfig,
        sample_rate: u32,
        channel_count: u32,
        hooks: H,
        scheduler: S,
        initial_deadline_ns: u64,
    ) -> Self {
        let derived = crate::config::DerivedConfig::new(&config, sample_rate, channel_count);
        Pipeline {
            queue: TaskQueue::new(),
            pending_tasks: AtomicU64::new(0),
            pending_frames: AtomicU64::new(0),
            clock: DeadlineClock::new(derived, initial_deadline_ns),
            scheduler_bridge: SchedulerBridge::new(scheduler),
            channel_count,
            last_known_now_ns: AtomicU64::new(initial_deadline_ns),
            mutex: Mutex::new(Inner {
                hooks,
                stats: PipelineStats::default(),
            }),
        }
    }

    pub fn num_pending_tasks(&self) -> u64 {
        self.pending_tasks.load(Ordering::Acquire)
    }

    pub fn num_pending_frames(&self) -> u64 {
        self.pending_frames.load(Ordering::Acquire)
    }

    /// Not safe to call concurrently with other pipeline operations and expect a consistent snapshot against them;
    /// intended for tests and benchmarks.
    pub fn stats_snapshot(&self) -> PipelineStats {
        self.mutex.lock().unwrap().stats
    }

    /// Reference to the scheduler this pipeline was constructed with, for embedders that need to reach through (e.g.
    /// to shut down a background thread).
    pub fn scheduler(&self) -> &S {
        self.scheduler_bridge.scheduler()
    }

    /// Submit a task for asynchronous processing. Non-blocking; completion is signalled via `handler`.
    pub fn schedule(&self, task: Arc<Task>, handler: Option<CompletionHandler>) -> Result<()> {
        task.mark_scheduled(handler)?;
        self.queue.push(task);
        self.pending_tasks.fetch_add(1, Ordering::AcqRel);
        self.try_fast_path_or_defer();
        Ok(())
    }

    /// Like [Pipeline::schedule], but blocks the calling thread until the task finishes and returns its result.
    pub fn schedule_and_wait(&self, task: Arc<Task>) -> Result<bool> {
        let waiter = Arc::new(audio_pipeline_sync::Waiter::new());
        task.mark_scheduled_with_waiter(waiter.clone())?;
        self.queue.push(task.clone());
        self.pending_tasks.fetch_add(1, Ordering::AcqRel);
        self.try_fast_path_or_defer();
        waiter.wait();
        Ok(task
            .success()
            .expect("task is FINISHED once its waiter has been posted"))
    }

    fn try_fast_path_or_defer(&self) {
        if let Ok(mut inner) = self.mutex.try_lock() {
            if self.pending_frames.load(Ordering::Acquire) == 0 {
                let now = inner.hooks.now_ns();
                self.last_known_now_ns.store(now, Ordering::Relaxed);
                if self.clock.interframe_window_admits(now) {
                    self.drain_in_place(&mut inner, now);
                    drop(inner);
                    self.maybe_arm_scheduler();
                    return;
                }
            }
            drop(inner);
        }

        if self.pending_frames.load(Ordering::Acquire) == 0 {
            self.maybe_arm_scheduler();
        }
    }

    fn drain_in_place(&self, inner: &mut Inner<H>, mut now: u64) {
        loop {
            if self.pending_frames.load(Ordering::Acquire) > 0 {
                break;
            }
            if !self.clock.interframe_window_admits(now) {
                break;
            }
            let task = match self.queue.try_pop() {
                Some(t) => t,
                None => break,
            };
            self.execute_task(inner, &task);
            self.pending_tasks.fetch_sub(1, Ordering::AcqRel);
            inner.stats.record_in_place();
            now = inner.hooks.now_ns();
            self.last_known_now_ns.store(now, Ordering::Relaxed);
        }
    }

    fn execute_task(&self, inner: &mut Inner<H>, task: &Arc<Task>) {
        let success = inner.hooks.process_task(task);
        task.complete(success);
    }

    fn maybe_arm_scheduler(&self) {
        if self.pending_tasks.load(Ordering::Acquire) == 0 {
            return;
        }
        if self.pending_frames.load(Ordering::Acquire) > 0 {
            return;
        }
        let now = self.last_known_now_ns.load(Ordering::Relaxed);
        let deadline = self.clock.next_interframe_midpoint(now);
        if self.scheduler_bridge.try_schedule(deadline) {
            self.bump_stat(|s| s.record_scheduler_invocation());
        }
    }

    fn bump_stat(&self, f: impl FnOnce(&mut PipelineStats)) {
        if let Ok(mut inner) = self.mutex.try_lock() {
            f(&mut inner.stats);
        }
    }

    /// Called by the external scheduler at (approximately) the deadline it was given. Non-blocking: if the pipeline
    /// mutex is contended, re-arms itself and returns immediately rather than waiting.
    pub fn process_tasks(&self) {
        self.scheduler_bridge.enter_running();

        let mut guard = match self.mutex.try_lock() {
            Ok(g) => g,
            Err(_) => {
                self.scheduler_bridge.leave_running();
                self.maybe_arm_scheduler();
                return;
            }
        };

        while self.pending_tasks.load(Ordering::Acquire) > 0 {
            if self.pending_frames.load(Ordering::Acquire) > 0 {
                guard.stats.record_preemption();
                rt_debug!("process_tasks: preempted by a pending frame");
                break;
            }

            let now = guard.hooks.now_ns();
            self.last_known_now_ns.store(now, Ordering::Relaxed);
            if !self.clock.interframe_window_admits(now) {
                break;
            }

            let task = match self.queue.try_pop() {
                Some(t) => t,
                None => break,
            };
            self.execute_task(&mut guard, &task);
            self.pending_tasks.fetch_sub(1, Ordering::AcqRel);
            guard.stats.record_async();
        }

        drop(guard);
        self.scheduler_bridge.leave_running();
        self.maybe_arm_scheduler();
    }

    /// Called by the audio clock driver with one frame's worth of interleaved samples. Returns whether the frame hook
    /// reported success. The only entry point that blocks on the pipeline mutex.
    pub fn process_frame_and_tasks(&self, samples: &mut [f32]) -> bool {
        self.pending_frames.fetch_add(1, Ordering::AcqRel);
        // Unconditional: this call is the frame itself, not a competitor checking whether a frame is pending.
        let cancelled = self.scheduler_bridge.cancel_for_entering_frame();

        let success = with_audio_thread_marked(|| {
            let mut guard = self.mutex.lock().unwrap();
            if cancelled {
                guard.stats.record_scheduler_cancellation();
            }

            let frame_start = guard.hooks.now_ns();
            self.last_known_now_ns.store(frame_start, Ordering::Relaxed);
            self.clock.begin_frame(frame_start, samples.len() as u64);

            let channel_count = self.channel_count;
            if self.clock.config().enable_precise_task_scheduling {
                self.process_frame_split(&mut guard, samples, channel_count)
            } else {
                let mut frame = FrameSlice::new(samples, channel_count);
                guard.hooks.process_frame(&mut frame)
            }
        });

        self.pending_frames.fetch_sub(1, Ordering::AcqRel);
        self.maybe_arm_scheduler();
        success
    }

    fn process_frame_split(&self, guard: &mut Inner<H>, samples: &mut [f32], channel_count: u32) -> bool {
        let config = *self.clock.config();
        let chunk_samples = config
            .max_samples_between_tasks
            .max(channel_count as u64) as usize;
        let mut samples_processed: u64 = 0;
        let mut enough_samples_to_process_tasks = false;
        let mut overall_success = true;

        for slice in samples.chunks_mut(chunk_samples) {
            let mut frame = FrameSlice::new(slice, channel_count);
            overall_success &= guard.hooks.process_frame(&mut frame);

            samples_processed += slice.len() as u64;
            if !enough_samples_to_process_tasks && samples_processed >= config.min_samples_between_tasks {
                enough_samples_to_process_tasks = true;
            }

            if !enough_samples_to_process_tasks {
                continue;
            }

            loop {
                if self.pending_frames.load(Ordering::Acquire) > 1 {
                    // A second concurrent frame call has arrived; stop draining and let it take over.
                    break;
                }
                if self.pending_tasks.load(Ordering::Acquire) == 0 {
                    break;
                }

                let now = guard.hooks.now_ns();
                self.last_known_now_ns.store(now, Ordering::Relaxed);
                if !self.clock.subframe_window_admits(now) {
                    break;
                }

                let task = match self.queue.try_pop() {
                    Some(t) => t,
                    None => break,
                };
                self.execute_task(guard, &task);
                self.pending_tasks.fetch_sub(1, Ordering::AcqRel);
                guard.stats.record_in_frame();
            }
        }

        if !overall_success {
            rt_warn!("process_frame_and_tasks: a sub-frame reported failure");
        }

        overall_success
    }
}
