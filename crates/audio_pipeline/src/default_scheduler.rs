//! A ready-made, thread-backed [TaskScheduler], for tests and simple embedders.
//!
//! Production embedders with their own event loop or timer wheel (or an audio callback that already runs
//! periodically) are expected to implement [TaskScheduler] directly instead; this implementation exists so the
//! coordinator is runnable and testable without requiring a scheduler to be written from scratch first.
//!
//! The scheduler itself knows nothing about `Pipeline<H, S>` -- threading that generic pair through here would make
//! the scheduler's own type parametric over the pipeline it serves, which is itself parametric over the scheduler.
//! Instead it holds a type-erased callback, set once via [ThreadedScheduler::set_callback] after the pipeline has
//! been constructed around it.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant, SystemTime};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::scheduler::TaskScheduler;

enum Command {
    ScheduleAt(Instant),
    Cancel,
    Shutdown,
}

type Callback = Box<dyn Fn() + Send + Sync>;

/// A background-thread scheduler that invokes a registered callback at approximately the requested time.
///
/// Typical use: construct the scheduler, construct the `Pipeline` around it (the pipeline takes ownership of whatever
/// `TaskScheduler` it's given), then call [ThreadedScheduler::set_callback] with a closure that calls back into
/// `pipeline.process_tasks()` through a `Weak<Pipeline<..>>` -- see the crate's scenario tests for a worked example.
pub struct ThreadedScheduler {
    commands: Sender<Command>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    callback: Mutex<Option<Callback>>,
    invocations: AtomicU64,
}

impl ThreadedScheduler {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = bounded::<Command>(16);

        let scheduler = Arc::new(ThreadedScheduler {
            commands: tx,
            thread: Mutex::new(None),
            callback: Mutex::new(None),
            invocations: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&scheduler);
        let handle = std::thread::spawn(move || scheduling_thread_mainloop(rx, weak));
        *scheduler.thread.lock().unwrap() = Some(handle);

        scheduler
    }

    /// Register the callback the background thread invokes once a scheduled deadline elapses. Call exactly once;
    /// replaces any previously registered callback.
    pub fn set_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.callback.lock().unwrap() = Some(Box::new(callback));
    }

    /// Number of times the background thread has actually fired the callback. Exposed for tests.
    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }
}

impl Drop for ThreadedScheduler {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl TaskScheduler for ThreadedScheduler {
    fn schedule_task_processing(&self, deadline_ns: u64) {
        let delay_ns = deadline_ns.saturating_sub(current_time_ns());
        let at = Instant::now() + Duration::from_nanos(delay_ns);
        let _ = self.commands.send(Command::ScheduleAt(at));
    }

    fn cancel_task_processing(&self) {
        let _ = self.commands.send(Command::Cancel);
    }
}

/// So that an `Arc<ThreadedScheduler>` -- the only way to get one out of [ThreadedScheduler::new] -- can be handed to
/// [crate::coordinator::Pipeline::new] directly as its `S: TaskScheduler`, while the embedder keeps its own clone to
/// call [ThreadedScheduler::set_callback] on.
impl TaskScheduler for Arc<ThreadedScheduler> {
    fn schedule_task_processing(&self, deadline_ns: u64) {
        (**self).schedule_task_processing(deadline_ns)
    }

    fn cancel_task_processing(&self) {
        (**self).cancel_task_processing()
    }
}

fn current_time_ns() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn scheduling_thread_mainloop(commands: Receiver<Command>, scheduler: Weak<ThreadedScheduler>) {
    let mut deadline: Option<Instant> = None;

    loop {
        let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));

        let received = match timeout {
            Some(t) => commands.recv_timeout(t),
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Command::ScheduleAt(at)) => deadline = Some(at),
            Ok(Command::Cancel) => deadline = None,
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {
                deadline = None;
                let Some(scheduler) = scheduler.upgrade() else {
                    return;
                };
                scheduler.invocations.fetch_add(1, Ordering::Relaxed);
                let cb = scheduler.callback.lock().unwrap();
                if let Some(cb) = cb.as_ref() {
                    cb();
                }
            }
        }
    }
}
