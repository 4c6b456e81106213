//! The bridge between the coordinator and an externally supplied scheduling facility.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use crate::logging::rt_debug;

/// Something that can arrange for the coordinator to be given a chance to process tasks at some point in the future.
///
/// Implementations are expected to be cheap to call and to debounce internally: [TaskScheduler::cancel_task_processing]
/// may be called when nothing is actually scheduled, and [TaskScheduler::schedule_task_processing] may be called again
/// before a previous request has fired, in which case the newer deadline wins.
///
/// [crate::default_scheduler::ThreadedScheduler] is a ready-made implementation backed by a background thread; most
/// embedders integrating with an existing event loop or audio callback will want to implement this trait directly
/// instead.
pub trait TaskScheduler: Send + Sync {
    /// Arrange to call back into the pipeline's task processing at or before `deadline_ns`.
    fn schedule_task_processing(&self, deadline_ns: u64);

    /// Cancel any pending callback arranged by `schedule_task_processing`. Best-effort: a callback already in flight
    /// may still run.
    fn cancel_task_processing(&self);
}

#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq)]
enum ProcessingState {
    NotScheduled = 0,
    Scheduled = 1,
    Running = 2,
}

impl From<u8> for ProcessingState {
    fn from(v: u8) -> Self {
        match v {
            0 => ProcessingState::NotScheduled,
            1 => ProcessingState::Scheduled,
            2 => ProcessingState::Running,
            _ => unreachable!("invalid processing state"),
        }
    }
}

/// Tracks whether an external callback is currently scheduled or running, and serializes calls into the scheduler so
/// that `schedule`/`cancel` pairs can't race each other.
///
/// The mutex here guards only ordering of calls into the user-supplied [TaskScheduler]; it is never held while the
/// coordinator's own pipeline mutex is held, so it cannot participate in a deadlock with it.
pub(crate) struct SchedulerBridge<S> {
    scheduler: S,
    scheduler_call_lock: Mutex<()>,
    state: AtomicU8,
}

impl<S: TaskScheduler> SchedulerBridge<S> {
    pub(crate) fn new(scheduler: S) -> Self {
        SchedulerBridge {
            scheduler,
            scheduler_call_lock: Mutex::new(()),
            state: AtomicU8::new(ProcessingState::NotScheduled as u8),
        }
    }

    fn state(&self) -> ProcessingState {
        self.state.load(Ordering::Acquire).into()
    }

    /// Ask the scheduler to call back at `deadline_ns`, unless a callback is already scheduled or one is currently
    /// running (in which case it will itself decide whether to reschedule once it finishes). Returns whether a new
    /// invocation was actually requested.
    ///
    /// Never blocks: on contention for `scheduler_call_lock`, treats it as someone else already handling this and
    /// bails, preserving the lock-free guarantee of the callers that reach this on the hot path.
    pub(crate) fn try_schedule(&self, deadline_ns: u64) -> bool {
        let Ok(_guard) = self.scheduler_call_lock.try_lock() else {
            return false;
        };
        if self.state() != ProcessingState::NotScheduled {
            return false;
        }
        self.state.store(ProcessingState::Scheduled as u8, Ordering::Release);
        self.scheduler.schedule_task_processing(deadline_ns);
        rt_debug!("scheduler: requested callback at {}", deadline_ns);
        true
    }

    /// Cancel a pending callback, gated on a pending frame actually existing: ordinary callers must check
    /// `pending_frames > 0` themselves before calling this, since cancelling is only meaningful when a frame is
    /// waiting for the mutex. Returns whether anything was actually cancelled.
    ///
    /// Never blocks, for the same reason as `try_schedule`.
    pub(crate) fn try_cancel(&self) -> bool {
        let Ok(_guard) = self.scheduler_call_lock.try_lock() else {
            return false;
        };
        if self.state() != ProcessingState::Scheduled {
            return false;
        }
        self.state.store(ProcessingState::NotScheduled as u8, Ordering::Release);
        self.scheduler.cancel_task_processing();
        rt_debug!("scheduler: cancelled pending callback");
        true
    }

    /// Unconditional cancellation used only by `process_frame_and_tasks`'s own entry point: that call just
    /// incremented `pending_frames` itself, so it cannot meaningfully gate on that counter the way other callers do.
    /// Safe to call even when nothing is scheduled.
    pub(crate) fn cancel_for_entering_frame(&self) -> bool {
        self.try_cancel()
    }

    /// Mark that a scheduler-driven callback has begun running `process_tasks`.
    pub(crate) fn enter_running(&self) {
        self.state.store(ProcessingState::Running as u8, Ordering::Release);
    }

    /// Mark that the callback has returned without anything re-scheduling it.
    pub(crate) fn leave_running(&self) {
        self.state.store(ProcessingState::NotScheduled as u8, Ordering::Release);
    }

    pub(crate) fn scheduler(&self) -> &S {
        &self.scheduler
    }
}
