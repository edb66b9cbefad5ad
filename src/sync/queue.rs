//! Shell-thread task queue.
//!
//! A FIFO of boxed closures owned by one thread. Other threads `post`;
//! the owner either runs the queue as its main loop ([`TaskQueue::run`])
//! or pumps it from inside a blocking call until a condition holds
//! ([`TaskQueue::run_until`]). The queue lock is never held while a task
//! runs, so tasks may post further tasks or pump the queue re-entrantly.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A unit of work executed on the owner thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Interval at which a pumping owner re-checks its predicate while idle.
///
/// Completion is normally reported through a posted task, so this only
/// bounds the latency of conditions flipped directly by another thread.
const IDLE_RECHECK: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("task queue is closed")]
    Closed,
    #[error("task queue pumped off its owner thread")]
    NotOwner,
}

struct QueueState {
    tasks: VecDeque<Task>,
    closed: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    ready: Condvar,
    owner: Mutex<ThreadId>,
}

/// Cloneable handle to a shell-thread task queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TaskQueue")
            .field("pending", &state.tasks.len())
            .field("closed", &state.closed)
            .field("owner", &*self.inner.owner.lock())
            .finish()
    }
}

impl TaskQueue {
    /// Create a queue owned by the calling thread.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    tasks: VecDeque::new(),
                    closed: false,
                }),
                ready: Condvar::new(),
                owner: Mutex::new(thread::current().id()),
            }),
        }
    }

    /// Transfer ownership to the calling thread.
    pub fn bind_current_thread(&self) {
        *self.inner.owner.lock() = thread::current().id();
    }

    /// Whether the calling thread owns this queue (is the foreground thread).
    pub fn is_owner_thread(&self) -> bool {
        *self.inner.owner.lock() == thread::current().id()
    }

    /// Enqueue a task for the owner thread.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] once [`TaskQueue::close`] was called.
    pub fn post<F>(&self, task: F) -> Result<(), QueueError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.tasks.push_back(Box::new(task));
        self.inner.ready.notify_all();
        Ok(())
    }

    /// Run queued tasks on the owner thread until `done` returns true.
    ///
    /// `done` is checked before each task. Tasks run one at a time with
    /// the queue unlocked.
    ///
    /// # Errors
    ///
    /// - [`QueueError::NotOwner`] when called off the owner thread.
    /// - [`QueueError::Closed`] when the queue is closed and drained while
    ///   `done` still returns false.
    pub fn run_until<F>(&self, mut done: F) -> Result<(), QueueError>
    where
        F: FnMut() -> bool,
    {
        if !self.is_owner_thread() {
            return Err(QueueError::NotOwner);
        }
        loop {
            if done() {
                return Ok(());
            }
            let task = {
                let mut state = self.inner.state.lock();
                match state.tasks.pop_front() {
                    Some(task) => task,
                    None if state.closed => return Err(QueueError::Closed),
                    None => {
                        self.inner.ready.wait_for(&mut state, IDLE_RECHECK);
                        continue;
                    }
                }
            };
            task();
        }
    }

    /// Run every task currently queued (and any they post) without
    /// blocking. Returns how many tasks ran.
    #[cfg(test)]
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.inner.state.lock().tasks.pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Main loop for the owner thread: run tasks until the queue is
    /// closed and drained.
    pub fn run(&self) {
        self.bind_current_thread();
        loop {
            let task = {
                let mut state = self.inner.state.lock();
                loop {
                    if let Some(task) = state.tasks.pop_front() {
                        break task;
                    }
                    if state.closed {
                        return;
                    }
                    self.inner.ready.wait(&mut state);
                }
            };
            task();
        }
    }

    /// Refuse new tasks. Already queued tasks still run.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        self.inner.ready.notify_all();
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn run_until_pumps_tasks_posted_from_other_threads() {
        let queue = TaskQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let producer = {
            let queue = queue.clone();
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..3 {
                    let counter = Arc::clone(&counter);
                    queue
                        .post(move || {
                            counter.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        };

        queue
            .run_until(|| counter.load(Ordering::SeqCst) == 3)
            .unwrap();
        producer.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn tasks_run_in_post_order() {
        let queue = TaskQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let seen = Arc::clone(&seen);
            queue.post(move || seen.lock().push(i)).unwrap();
        }
        assert_eq!(queue.run_pending(), 4);
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn run_until_off_owner_thread_is_rejected() {
        let queue = TaskQueue::new();
        let other = queue.clone();
        let result = thread::spawn(move || other.run_until(|| false))
            .join()
            .unwrap();
        assert_eq!(result, Err(QueueError::NotOwner));
    }

    #[test]
    fn run_until_on_closed_empty_queue_errors() {
        let queue = TaskQueue::new();
        queue.close();
        assert_eq!(queue.run_until(|| false), Err(QueueError::Closed));
        assert_eq!(queue.post(|| {}), Err(QueueError::Closed));
    }

    #[test]
    fn nested_pump_from_inside_a_task() {
        let queue = TaskQueue::new();
        let flag = Arc::new(AtomicUsize::new(0));

        let inner_queue = queue.clone();
        let inner_flag = Arc::clone(&flag);
        queue
            .post(move || {
                let setter = Arc::clone(&inner_flag);
                inner_queue
                    .post(move || {
                        setter.store(1, Ordering::SeqCst);
                    })
                    .unwrap();
                inner_queue
                    .run_until(|| inner_flag.load(Ordering::SeqCst) == 1)
                    .unwrap();
                inner_flag.store(2, Ordering::SeqCst);
            })
            .unwrap();

        queue.run_until(|| flag.load(Ordering::SeqCst) == 2).unwrap();
    }

    #[test]
    fn run_exits_after_close_and_drain() {
        let queue = TaskQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let worker = {
            let queue = queue.clone();
            thread::spawn(move || queue.run())
        };
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            queue
                .post(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        queue.close();
        worker.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
