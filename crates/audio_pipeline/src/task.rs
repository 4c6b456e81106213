//! Task records: the opaque submission unit for asynchronous control-plane work.
use atomic_refcell::AtomicRefCell;

use audio_pipeline_sync::Waiter;

use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum RawState {
    New = 0,
    Scheduled = 1,
    Finished = 2,
}

/// A completion callback, invoked from the coordinator thread after the task's result is final.
pub type CompletionHandler = Box<dyn FnOnce(bool) + Send>;

/// Slot for the data a task needs only between submission and completion.
///
/// Written once by the submitter before the task is pushed to the queue, read once by the coordinator after it pops
/// the task back off. [AtomicRefCell] is used rather than a raw `UnsafeCell` so that a logic error which violated that
/// single-writer-then-single-reader protocol would panic on borrow rather than silently corrupt memory, the same
/// belt-and-suspenders choice Synthizer's worker pool makes for its task slots.
struct TaskSlot {
    handler: Option<CompletionHandler>,
    waiter: Option<Arc<Waiter>>,
}

/// A unit of asynchronous control work, owned by the submitter and processed at most once by the pipeline.
///
/// Tasks are always held behind `Arc` so that the pending-task queue's intrusive link can reference them safely across
/// threads without the submitter having to guarantee a stable address by hand.
pub struct Task {
    state: AtomicU8,
    success: AtomicBool,
    slot: AtomicRefCell<TaskSlot>,

    /// Intrusive queue link. Private to [crate::queue::TaskQueue].
    pub(crate) link: AtomicPtr<Task>,
}

impl Task {
    /// Construct a new task in the NEW state.
    pub fn new() -> Arc<Task> {
        Arc::new(Task {
            state: AtomicU8::new(RawState::New as u8),
            success: AtomicBool::new(false),
            slot: AtomicRefCell::new(TaskSlot {
                handler: None,
                waiter: None,
            }),
            link: AtomicPtr::new(std::ptr::null_mut()),
        })
    }

    fn stub() -> Task {
        Task {
            state: AtomicU8::new(RawState::Finished as u8),
            success: AtomicBool::new(false),
            slot: AtomicRefCell::new(TaskSlot {
                handler: None,
                waiter: None,
            }),
            link: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Stub node used internally by [crate::queue::TaskQueue]. Never observed by users.
    pub(crate) fn new_stub() -> Arc<Task> {
        Arc::new(Task::stub())
    }

    /// The result of this task, if it has finished. `None` if it is still NEW or SCHEDULED.
    pub fn success(&self) -> Option<bool> {
        if self.state.load(Ordering::Acquire) == RawState::Finished as u8 {
            Some(self.success.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// Attempt to transition NEW or FINISHED -> SCHEDULED, setting the handler to be invoked on completion.
    ///
    /// A FINISHED task can be resubmitted: the record is a reusable submission unit, not a single-use one. Fails with
    /// `AlreadyScheduled` only if the task is currently SCHEDULED.
    ///
    /// Called by the coordinator before the task is pushed to the queue.
    pub(crate) fn mark_scheduled(&self, handler: Option<CompletionHandler>) -> Result<()> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current == RawState::Scheduled as u8 {
                return Err(Error::AlreadyScheduled);
            }
            match self.state.compare_exchange_weak(
                current,
                RawState::Scheduled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }

        let mut slot = self.slot.borrow_mut();
        slot.handler = handler;
        Ok(())
    }

    /// Like [Task::mark_scheduled], but also attaches a waiter to be posted on completion.
    pub(crate) fn mark_scheduled_with_waiter(&self, waiter: Arc<Waiter>) -> Result<()> {
        self.mark_scheduled(None)?;
        self.slot.borrow_mut().waiter = Some(waiter);
        Ok(())
    }

    /// Complete this task: write the result, transition to FINISHED, then notify.
    ///
    /// Must only be called once, by the coordinator, with exclusive logical access to the task (i.e. after it has been
    /// popped from the queue and before any other reference to it is dereferenced again).
    pub(crate) fn complete(&self, success: bool) {
        debug_assert_eq!(
            self.state.load(Ordering::Relaxed),
            RawState::Scheduled as u8,
            "a task must be SCHEDULED when completed"
        );

        self.success.store(success, Ordering::Release);
        self.state
            .store(RawState::Finished as u8, Ordering::Release);

        // Waiter first: an `schedule_and_wait` caller should be able to observe completion without any dependency on
        // handler semantics. The handler, if any, runs last and from the coordinator thread.
        let mut slot = self.slot.borrow_mut();
        if let Some(waiter) = slot.waiter.take() {
            waiter.post();
        }
        if let Some(handler) = slot.handler.take() {
            drop(slot);
            handler(success);
        }
    }
}

unsafe impl Send for Task {}
unsafe impl Sync for Task {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_has_no_result_yet() {
        let task = Task::new();
        assert_eq!(task.success(), None);
    }

    #[test]
    fn complete_is_observable_afterward() {
        let task = Task::new();
        task.mark_scheduled(None).unwrap();
        task.complete(true);
        assert_eq!(task.success(), Some(true));
    }

    #[test]
    fn double_schedule_fails() {
        let task = Task::new();
        task.mark_scheduled(None).unwrap();
        assert!(matches!(
            task.mark_scheduled(None),
            Err(Error::AlreadyScheduled)
        ));
    }

    #[test]
    fn handler_runs_after_completion_with_the_right_result() {
        let task = Task::new();
        let observed = Arc::new(AtomicBool::new(false));
        let observed2 = observed.clone();

        task.mark_scheduled(Some(Box::new(move |success| {
            observed2.store(success, Ordering::SeqCst);
        })))
        .unwrap();

        task.complete(true);
        assert!(observed.load(Ordering::SeqCst));
    }

    #[test]
    fn resubmission_after_completion_succeeds() {
        let task = Task::new();
        task.mark_scheduled(None).unwrap();
        task.complete(true);
        assert_eq!(task.success(), Some(true));

        task.mark_scheduled(None).unwrap();
        assert_eq!(task.success(), None);
        task.complete(false);
        assert_eq!(task.success(), Some(false));
    }

    #[test]
    fn waiter_is_posted_on_completion() {
        let task = Task::new();
        let waiter = Arc::new(Waiter::new());
        task.mark_scheduled_with_waiter(waiter.clone()).unwrap();
        task.complete(false);
        // Should not block: the waiter was already posted.
        waiter.wait();
        assert_eq!(task.success(), Some(false));
    }
}
