//! Background event loop for a worker
//!
//! Each worker owns at most one [`EventLoop`]: a single named thread draining a
//! [`DelayQueue`] of tasks one at a time. One-shot tasks release their slot in
//! the [`AsyncCounter`] when they finish; periodic tasks hold one slot for as
//! long as they stay registered.

pub mod counter;
pub mod queue;
pub mod task;

#[cfg(test)]
mod tests;

pub use counter::AsyncCounter;
pub use queue::DelayQueue;
pub use task::{TaskHandle, TaskId, TaskKind, TaskState};

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::engine::Value;
use crate::runtime::error::{Result, WorkerError};
use task::{Job, TaskShared};

/// What a periodic task does after a firing fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodicFailurePolicy {
    /// Log the error and keep firing.
    #[default]
    Continue,
    /// Stop the schedule and keep the error in the task handle.
    Halt,
}

/// State shared by the loop thread, the owning worker and task handles.
pub(crate) struct LoopShared {
    name: String,
    queue: Mutex<DelayQueue<Arc<TaskShared>>>,
    available: Condvar,
    running: AtomicBool,
    counter: Arc<AsyncCounter>,
    policy: PeriodicFailurePolicy,
    next_id: AtomicUsize,
}

impl LoopShared {
    /// Remove a cancelled task from the queue.
    pub(crate) fn unqueue(
        &self,
        id: TaskId,
    ) {
        let removed = self.queue.lock().retain(|task| task.id != id);
        if removed > 0 {
            self.available.notify_all();
        }
    }

    fn next_task(&self) -> Option<Arc<TaskShared>> {
        let mut queue = self.queue.lock();
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(task) = queue.pop_ready(Instant::now()) {
                return Some(task);
            }
            match queue.next_deadline() {
                Some(deadline) => {
                    self.available.wait_until(&mut queue, deadline);
                }
                None => self.available.wait(&mut queue),
            }
        }
    }

    fn execute(
        &self,
        task: Arc<TaskShared>,
    ) {
        // 已取消的任务可能仍被弹出
        if !task.try_start() {
            return;
        }
        trace!(loop_name = %self.name, task = %task.id, "firing task");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (task.job)())).unwrap_or_else(
            |payload| {
                Err(WorkerError::Panicked {
                    task: task.id,
                    message: panic_message(&*payload),
                })
            },
        );

        match task.kind {
            TaskKind::OneShot => {
                self.counter.decrement();
                task.complete(outcome);
            }
            TaskKind::Periodic { interval } => {
                if let Err(err) = outcome {
                    match self.policy {
                        PeriodicFailurePolicy::Continue => {
                            error!(task = %task.id, error = %err, "periodic task failed");
                        }
                        PeriodicFailurePolicy::Halt => {
                            error!(task = %task.id, error = %err, "periodic task failed, halting");
                            task.halt(err, || {
                                self.counter.decrement();
                            });
                            return;
                        }
                    }
                }
                let mut queue = self.queue.lock();
                if !self.running.load(Ordering::SeqCst) {
                    task.discard();
                } else if task.rearm() {
                    queue.push(Instant::now() + interval, task);
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a running event loop.
///
/// The loop thread is never joined; it exits on its own after
/// [`EventLoop::shutdown_now`] and does not keep the process alive.
#[derive(Clone)]
pub struct EventLoop {
    shared: Arc<LoopShared>,
}

impl EventLoop {
    /// Spawn the loop thread.
    pub fn start(
        name: impl Into<String>,
        counter: Arc<AsyncCounter>,
        policy: PeriodicFailurePolicy,
    ) -> io::Result<Self> {
        let name = name.into();
        let shared = Arc::new(LoopShared {
            name: name.clone(),
            queue: Mutex::new(DelayQueue::new()),
            available: Condvar::new(),
            running: AtomicBool::new(true),
            counter,
            policy,
            next_id: AtomicUsize::new(1),
        });

        let loop_shared = shared.clone();
        thread::Builder::new().name(name.clone()).spawn(move || {
            debug!(loop_name = %loop_shared.name, "event loop started");
            while let Some(task) = loop_shared.next_task() {
                loop_shared.execute(task);
            }
            debug!(loop_name = %loop_shared.name, "event loop stopped");
        })?;

        Ok(Self { shared })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Run `job` as soon as the loop is free.
    pub fn submit<F>(
        &self,
        job: F,
    ) -> TaskHandle
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        self.enqueue(TaskKind::OneShot, Duration::ZERO, Box::new(job))
    }

    /// Run `job` once after `delay`.
    pub fn schedule<F>(
        &self,
        delay: Duration,
        job: F,
    ) -> TaskHandle
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        self.enqueue(TaskKind::OneShot, delay, Box::new(job))
    }

    /// Run `job` after `initial`, then again `interval` after each firing ends.
    ///
    /// `interval` must be positive.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        initial: Duration,
        interval: Duration,
        job: F,
    ) -> Result<TaskHandle>
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        if interval.is_zero() {
            return Err(WorkerError::InvalidArgument(
                "periodic interval must be greater than zero".to_string(),
            ));
        }
        Ok(self.enqueue(TaskKind::Periodic { interval }, initial, Box::new(job)))
    }

    fn enqueue(
        &self,
        kind: TaskKind,
        delay: Duration,
        job: Job,
    ) -> TaskHandle {
        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let task = Arc::new(TaskShared::new(
            id,
            kind,
            job,
            Arc::downgrade(&self.shared),
        ));
        let handle = TaskHandle::new(task.clone());

        let mut queue = self.shared.queue.lock();
        if !self.shared.running.load(Ordering::SeqCst) {
            drop(queue);
            warn!(loop_name = %self.shared.name, task = %id, "event loop stopped, task rejected");
            task.discard();
            return handle;
        }
        self.shared.counter.increment();
        queue.push(Instant::now() + delay, task);
        drop(queue);
        self.shared.available.notify_one();
        trace!(loop_name = %self.shared.name, task = %id, ?kind, ?delay, "task queued");
        handle
    }

    /// Cancel a task that has not started (or a periodic task between or
    /// during firings) and release its counter slot.
    pub fn cancel(
        &self,
        handle: &TaskHandle,
    ) -> bool {
        let cancelled = handle.cancel();
        if cancelled {
            self.shared.counter.decrement();
        }
        cancelled
    }

    /// Number of queued tasks that have not started.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stop the loop and drop every queued task without running it.
    ///
    /// Counter slots held by the dropped tasks are not released. Returns the
    /// number of tasks dropped.
    pub fn shutdown_now(&self) -> usize {
        let drained = {
            let mut queue = self.shared.queue.lock();
            self.shared.running.store(false, Ordering::SeqCst);
            queue.drain()
        };
        self.shared.available.notify_all();

        let discarded = drained.iter().filter(|task| task.discard()).count();
        if discarded > 0 {
            warn!(
                loop_name = %self.shared.name,
                discarded,
                "event loop terminated with pending tasks"
            );
        } else {
            debug!(loop_name = %self.shared.name, "event loop terminated");
        }
        discarded
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .finish()
    }
}
