//! The pending-task queue: an unbounded, intrusive, multi-producer single-consumer queue.
//!
//! This is Dmitry Vyukov's classic intrusive MPSC queue algorithm, adapted to push and pop `Arc<Task>` rather than raw
//! pointers the caller must otherwise manage by hand. Tasks carry their own link field (see [crate::task::Task::link]),
//! so pushing never allocates a queue node -- it just moves strong-reference ownership from the caller into the queue,
//! which `try_pop` moves back out.
//!
//! Push is a single `swap` plus a `store` to the previous tail's link: wait-free on any platform with an atomic
//! exchange. Pop is lock-free but, as with any MPSC queue built this way, can transiently report the queue empty even
//! while a push is in flight elsewhere (the pusher has claimed its slot in `head` but hasn't yet linked it to the
//! previous node). Callers must not treat a single `Empty` result as proof there is no work anywhere in the pipeline;
//! [crate::coordinator]'s `pending_tasks` counter is the source of truth for that.
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::task::Task;

pub(crate) struct TaskQueue {
    head: AtomicPtr<Task>,

    /// Touched only by whichever thread currently holds the pipeline mutex -- the single consumer.
    tail: std::cell::UnsafeCell<*mut Task>,

    /// A permanently-allocated sentinel node used to keep the list non-empty between real elements. Never handed out
    /// by `try_pop`; reclaimed once, in `Drop`.
    stub: *mut Task,
}

impl TaskQueue {
    pub(crate) fn new() -> TaskQueue {
        let stub_ptr = Arc::into_raw(Task::new_stub()) as *mut Task;

        TaskQueue {
            head: AtomicPtr::new(stub_ptr),
            tail: std::cell::UnsafeCell::new(stub_ptr),
            stub: stub_ptr,
        }
    }

    /// Link `ptr` onto the tail of the list. Does not touch any `Arc` refcount; the caller decides what that pointer's
    /// ownership means.
    fn link_onto_tail(&self, ptr: *mut Task) {
        unsafe {
            (*ptr).link.store(ptr::null_mut(), Ordering::Relaxed);
        }
        let prev = self.head.swap(ptr, Ordering::AcqRel);
        unsafe {
            (*prev).link.store(ptr, Ordering::Release);
        }
    }

    /// Push a task onto the queue. Wait-free.
    pub(crate) fn push(&self, task: Arc<Task>) {
        let ptr = Arc::into_raw(task) as *mut Task;
        self.link_onto_tail(ptr);
    }

    /// Pop the head task, if any. May spuriously return `None` while a push is in flight on another thread; see the
    /// module docs.
    ///
    /// # Safety requirement on the caller
    ///
    /// Must only ever be called from one thread at a time (the pipeline mutex holder).
    pub(crate) fn try_pop(&self) -> Option<Arc<Task>> {
        unsafe {
            let mut tail = *self.tail.get();
            let mut next = (*tail).link.load(Ordering::Acquire);

            if tail == self.stub {
                if next.is_null() {
                    return None;
                }
                *self.tail.get() = next;
                tail = next;
                next = (*tail).link.load(Ordering::Acquire);
            }

            if !next.is_null() {
                *self.tail.get() = next;
                return Some(Arc::from_raw(tail));
            }

            let head = self.head.load(Ordering::Acquire);
            if tail != head {
                // A push has claimed `head` but not yet linked it to `tail`. The queue isn't really empty, but we
                // can't walk to the new node yet; report empty and let the caller retry later.
                return None;
            }

            // Only one real node in the list and it's both head and tail. Push the stub to give ourselves somewhere
            // to advance `tail` to once we return this node.
            self.link_onto_tail(self.stub);

            next = (*tail).link.load(Ordering::Acquire);
            if !next.is_null() {
                *self.tail.get() = next;
                return Some(Arc::from_raw(tail));
            }

            None
        }
    }
}

unsafe impl Send for TaskQueue {}
unsafe impl Sync for TaskQueue {}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        // Drain any remaining tasks so their Arcs are dropped rather than leaked.
        while self.try_pop().is_some() {}

        // `try_pop` never hands out the stub itself, so it still holds exactly the one strong reference created in
        // `new`. Reconstruct it here to balance that `Arc::into_raw`.
        unsafe {
            drop(Arc::from_raw(self.stub));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_queue_pops_none() {
        let q = TaskQueue::new();
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn push_then_pop_roundtrips() {
        let q = TaskQueue::new();
        let t1 = Task::new();
        let ptr1 = Arc::as_ptr(&t1);
        q.push(t1);

        let popped = q.try_pop().unwrap();
        assert_eq!(Arc::as_ptr(&popped), ptr1);
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn fifo_within_a_single_producer() {
        let q = TaskQueue::new();
        let tasks: Vec<_> = (0..10).map(|_| Task::new()).collect();
        let ptrs: Vec<_> = tasks.iter().map(Arc::as_ptr).collect();

        for t in tasks {
            q.push(t);
        }

        for expected in ptrs {
            let popped = q.try_pop().unwrap();
            assert_eq!(Arc::as_ptr(&popped), expected);
        }
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn concurrent_producers_all_arrive_exactly_once() {
        use std::collections::HashSet;
        use std::sync::Barrier;

        const PRODUCERS: usize = 8;
        const PER_PRODUCER: usize = 2000;

        let q = Arc::new(TaskQueue::new());
        let barrier = Arc::new(Barrier::new(PRODUCERS));

        let mut expected_ptrs: HashSet<*const Task> = HashSet::new();
        let mut handles = vec![];

        for _ in 0..PRODUCERS {
            let q = q.clone();
            let barrier = barrier.clone();
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                let mut ptrs = Vec::with_capacity(PER_PRODUCER);
                for _ in 0..PER_PRODUCER {
                    let t = Task::new();
                    ptrs.push(Arc::as_ptr(&t));
                    q.push(t);
                }
                ptrs
            }));
        }

        for h in handles {
            for p in h.join().unwrap() {
                expected_ptrs.insert(p);
            }
        }

        let mut seen = HashSet::new();
        loop {
            match q.try_pop() {
                Some(t) => {
                    assert!(seen.insert(Arc::as_ptr(&t)), "same task popped twice");
                }
                None => {
                    if seen.len() == expected_ptrs.len() {
                        break;
                    }
                    std::thread::yield_now();
                }
            }
        }

        assert_eq!(seen, expected_ptrs);
    }
}
