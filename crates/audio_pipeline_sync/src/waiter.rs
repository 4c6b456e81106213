//! A single-waiter binary semaphore.
//!
//! This is deliberately not a condition variable: the posting side must be able to signal completion while it is still
//! holding an unrelated mutex (the pipeline mutex, in the caller's case), and condition variables in Rust's stdlib
//! require the poster to also hold the condvar's own mutex.  Parking threads directly avoids that coupling, at the cost
//! of only supporting a single waiter per instance.
//!
//! Only one thread may ever call [Waiter::wait]. Calling it from two threads concurrently is a logic error and may
//! panic; posting may be done from any number of threads, though in practice only the coordinator thread posts.
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

use crate::sync::atomic::{AtomicBool, Ordering};
use crate::sync::{current, park, Thread};

pub struct Waiter {
    posted: AtomicBool,

    /// Set once, by whichever thread calls [Waiter::wait] first. Valid only once `waiter_registered` is true.
    waiter_thread: UnsafeCell<MaybeUninit<Thread>>,
    waiter_registered: AtomicBool,
}

impl Waiter {
    pub fn new() -> Self {
        Waiter {
            posted: AtomicBool::new(false),
            waiter_thread: UnsafeCell::new(MaybeUninit::uninit()),
            waiter_registered: AtomicBool::new(false),
        }
    }

    /// Signal completion. Never blocks and never allocates; safe to call while holding an unrelated mutex.
    pub fn post(&self) {
        self.posted.store(true, Ordering::Release);

        // The waiter registers itself before it can observe `posted`, so if we see it registered here we know the
        // handle is valid to read.
        if self.waiter_registered.load(Ordering::Acquire) {
            unsafe {
                (*self.waiter_thread.get())
                    .assume_init_ref()
                    .unpark();
            }
        }
    }

    /// Block the calling thread until [Waiter::post] has been called.
    ///
    /// Must only ever be called from one thread over the lifetime of this waiter.
    pub fn wait(&self) {
        unsafe {
            (*self.waiter_thread.get()).write(current());
        }
        self.waiter_registered.store(true, Ordering::Release);

        // `post` may have already run between construction and here; re-check before parking.
        while !self.posted.load(Ordering::Acquire) {
            park();
        }
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for Waiter {}
unsafe impl Sync for Waiter {}
