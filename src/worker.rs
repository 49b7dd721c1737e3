//! Dedicated worker threads with per-task promises.
//!
//! Each worker owns a FIFO deque of jobs; prefetch work may jump the queue
//! through front insertion. Submitting a task returns a [`TaskFuture`] backed
//! by a single-slot channel that resolves when the job has run. Inline
//! execution (no worker at all) produces already-resolved futures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to one task's eventual result.
#[derive(Debug)]
pub struct TaskFuture<T> {
    result: crossbeam_channel::Receiver<T>,
}

impl<T> TaskFuture<T> {
    /// An already-resolved future, for inline execution.
    #[must_use]
    pub fn ready(value: T) -> Self {
        let (sender, result) = crossbeam_channel::bounded(1);
        sender.send(value).expect("fresh single-slot channel");
        Self { result }
    }

    /// Block until the task has run and take its result.
    ///
    /// Panics if the owning worker was torn down before running the task;
    /// futures must be drained before their cache is dropped.
    pub fn wait(self) -> T {
        self.result.recv().expect("task dropped before completion")
    }
}

struct Queue {
    tasks: Mutex<VecDeque<Job>>,
    available: Condvar,
    quit: AtomicBool,
}

/// A thread draining one task queue until told to quit.
pub struct Worker {
    queue: Arc<Queue>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Worker {
    #[must_use]
    pub fn spawn() -> Self {
        let queue = Arc::new(Queue {
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            quit: AtomicBool::new(false),
        });
        let handle = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || run(&queue))
        };
        Self {
            queue,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue `task` for execution, at the front when `to_front` is set, and
    /// return a future for its result.
    pub fn add_task<F, T>(&self, to_front: bool, task: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, result) = crossbeam_channel::bounded(1);
        let job: Job = Box::new(move || {
            // the submitter may have dropped its future; that is fine
            let _ = sender.send(task());
        });
        {
            let mut tasks = self.queue.tasks.lock().unwrap();
            if to_front {
                tasks.push_front(job);
            } else {
                tasks.push_back(job);
            }
        }
        self.queue.available.notify_one();
        TaskFuture { result }
    }

    /// Run every queued task, then stop and join the thread. Safe to call
    /// from several threads; later calls are no-ops.
    pub fn stop(&self) {
        let mut handle = self.handle.lock().unwrap();
        if let Some(thread) = handle.take() {
            let queue = Arc::clone(&self.queue);
            drop(self.add_task(false, move || {
                queue.quit.store(true, Ordering::SeqCst);
            }));
            let _ = thread.join();
        }
    }

    /// Drop tasks queued after the quit sentinel. Only meaningful once every
    /// worker that could submit here has been stopped.
    pub fn clear_pending(&self) {
        self.queue.tasks.lock().unwrap().clear();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(queue: &Queue) {
    while !queue.quit.load(Ordering::SeqCst) {
        let job = {
            let mut tasks = queue.tasks.lock().unwrap();
            loop {
                if let Some(job) = tasks.pop_front() {
                    break Some(job);
                }
                if queue.quit.load(Ordering::SeqCst) {
                    break None;
                }
                tasks = queue.available.wait(tasks).unwrap();
            }
        };
        if let Some(job) = job {
            job();
        }
    }
    log::trace!("worker exiting");
}
