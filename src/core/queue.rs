use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Blocking FIFO used to hand payloads between pipeline threads.
/// Decouples a producer from a consumer without spinning: `pop` parks on a
/// condition variable until `push` wakes it.
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append to the tail and wake one waiter
    pub fn push(&self, item: T) {
        let mut items = self.lock();
        items.push_back(item);
        drop(items);
        self.ready.notify_one();
    }

    /// Remove the head, blocking until one is available.
    /// Only safe when another thread is guaranteed to push eventually.
    pub fn pop(&self) -> T {
        let mut items = self.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            items = match self.ready.wait(items) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Remove the head, waiting at most `timeout`. Returns None on timeout.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            items = match self.ready.wait_timeout(items, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Non-blocking pop
    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Instantaneous depth. Stale as soon as it returns; heuristics only.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove everything currently queued, in FIFO order
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    /// Inspect queued items without removing them
    pub fn inspect<R>(&self, f: impl FnOnce(&VecDeque<T>) -> R) -> R {
        f(&self.lock())
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
