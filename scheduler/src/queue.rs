use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Counts running jobs and parks the rest in FIFO order.
struct Queue {
    max_concurrent: usize,
    running: usize,
    waiting: VecDeque<Arc<Notify>>,
}

impl Queue {
    fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            running: 0,
            waiting: VecDeque::new(),
        }
    }

    /// Takes a slot, or returns the handle to wait on until one is handed over.
    fn try_acquire_slot(&mut self) -> Option<Arc<Notify>> {
        if self.running < self.max_concurrent {
            self.running += 1;
            None
        } else {
            let notify = Arc::new(Notify::new());
            self.waiting.push_back(notify.clone());
            Some(notify)
        }
    }

    /// Frees a slot, handing it straight to the oldest waiter if any.
    fn release_slot(&mut self) {
        self.running = self.running.saturating_sub(1);

        if let Some(waiting_task) = self.waiting.pop_front() {
            self.running += 1;
            waiting_task.notify_one();
        }
    }
}

/// Shared handle over [`Queue`] used by the dispatcher's job tasks.
#[derive(Clone)]
pub(crate) struct Slots {
    queue: Arc<Mutex<Queue>>,
}

/// A held slot. Dropping it frees the slot, also when the job unwinds.
pub(crate) struct SlotGuard {
    queue: Arc<Mutex<Queue>>,
}

impl Slots {
    pub(crate) fn new(max_concurrent: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(Queue::new(max_concurrent))),
        }
    }

    pub(crate) async fn acquire(&self) -> SlotGuard {
        let maybe_notify = lock(&self.queue).try_acquire_slot();

        // Wait outside the mutex. `notify_one` stores a permit, so a release
        // that lands before we start waiting is not lost.
        if let Some(notify) = maybe_notify {
            notify.notified().await;
        }

        SlotGuard {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        lock(&self.queue).release_slot();
    }
}

/// Recovers from poisoning; the queue's counters stay consistent.
fn lock(queue: &Mutex<Queue>) -> MutexGuard<'_, Queue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}
