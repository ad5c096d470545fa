//! Task definitions for the event loop.
//!
//! A task is one scheduled invocation, either one-shot or periodic. Its state
//! lives in an atomic so that starting, cancelling and rescheduling are single
//! compare-and-swap transitions: whichever side wins the transition owns the
//! async-counter bookkeeping for it.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::LoopShared;
use crate::engine::Value;
use crate::runtime::error::{Result, WorkerError};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued and not started (periodic tasks return here between firings).
    Pending,
    /// Currently executing on the loop thread.
    Running,
    /// One-shot task completed, successfully or with an error.
    Finished,
    /// Periodic task stopped by a failing firing.
    Failed,
    /// Cancelled, or discarded by `terminate`.
    Cancelled,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Finished,
            3 => TaskState::Failed,
            _ => TaskState::Cancelled,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Running => 1,
            TaskState::Finished => 2,
            TaskState::Failed => 3,
            TaskState::Cancelled => 4,
        }
    }

    /// Whether the task will never run again.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// One-shot or periodic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    OneShot,
    /// Fixed delay between the end of one firing and the start of the next.
    Periodic { interval: Duration },
}

pub(crate) type Job = Box<dyn Fn() -> Result<Value> + Send + Sync>;

/// State shared between the loop, the queue and every handle of a task.
pub(crate) struct TaskShared {
    pub(crate) id: TaskId,
    pub(crate) kind: TaskKind,
    state: AtomicU8,
    firings: AtomicUsize,
    outcome: Mutex<Option<Result<Value>>>,
    done: Condvar,
    pub(crate) job: Job,
    owner: Weak<LoopShared>,
}

impl TaskShared {
    pub(crate) fn new(
        id: TaskId,
        kind: TaskKind,
        job: Job,
        owner: Weak<LoopShared>,
    ) -> Self {
        Self {
            id,
            kind,
            state: AtomicU8::new(TaskState::Pending.as_u8()),
            firings: AtomicUsize::new(0),
            outcome: Mutex::new(None),
            done: Condvar::new(),
            job,
            owner,
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    fn transition(
        &self,
        from: TaskState,
        to: TaskState,
    ) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn settle(
        &self,
        outcome: Result<Value>,
    ) {
        let mut slot = self.outcome.lock();
        *slot = Some(outcome);
        self.done.notify_all();
    }

    /// Pending -> Running. Fails if the task was cancelled first.
    pub(crate) fn try_start(&self) -> bool {
        let started = self.transition(TaskState::Pending, TaskState::Running);
        if started {
            self.firings.fetch_add(1, Ordering::SeqCst);
        }
        started
    }

    /// Running -> Finished for a one-shot task.
    pub(crate) fn complete(
        &self,
        outcome: Result<Value>,
    ) {
        if self.transition(TaskState::Running, TaskState::Finished) {
            self.settle(outcome);
        }
    }

    /// Running -> Pending for a periodic task that should fire again.
    pub(crate) fn rearm(&self) -> bool {
        self.transition(TaskState::Running, TaskState::Pending)
    }

    /// Running -> Failed for a periodic task halted by an error.
    ///
    /// `release` runs after the transition and before waiters are woken.
    pub(crate) fn halt(
        &self,
        error: WorkerError,
        release: impl FnOnce(),
    ) -> bool {
        let halted = self.transition(TaskState::Running, TaskState::Failed);
        if halted {
            release();
            self.settle(Err(error));
        }
        halted
    }

    /// Non-interrupting cancellation.
    ///
    /// One-shot tasks can only be cancelled before they start. Periodic tasks
    /// can also be cancelled while a firing runs; that firing completes and no
    /// further firing is scheduled.
    pub(crate) fn try_cancel(&self) -> bool {
        let cancelled = self.transition(TaskState::Pending, TaskState::Cancelled)
            || (matches!(self.kind, TaskKind::Periodic { .. })
                && self.transition(TaskState::Running, TaskState::Cancelled));
        if cancelled {
            self.settle(Err(WorkerError::Cancelled(self.id)));
        }
        cancelled
    }

    /// Drop a task that will never run, from `terminate`. Unlike
    /// [`TaskShared::try_cancel`] this never touches the async counter.
    pub(crate) fn discard(&self) -> bool {
        let discarded = self.transition(TaskState::Pending, TaskState::Cancelled)
            || self.transition(TaskState::Running, TaskState::Cancelled);
        if discarded {
            self.settle(Err(WorkerError::Cancelled(self.id)));
        }
        discarded
    }

    pub(crate) fn firings(&self) -> usize {
        self.firings.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for TaskShared {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("firings", &self.firings())
            .finish()
    }
}

/// Handle to a scheduled task.
///
/// Cloning gives another handle to the same task. Cancel through
/// `Worker::cancel` so the async counter stays balanced.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub(crate) shared: Arc<TaskShared>,
}

impl TaskHandle {
    pub(crate) fn new(shared: Arc<TaskShared>) -> Self {
        Self { shared }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    #[inline]
    pub fn kind(&self) -> TaskKind {
        self.shared.kind
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    pub fn is_periodic(&self) -> bool {
        matches!(self.shared.kind, TaskKind::Periodic { .. })
    }

    /// Whether the task has reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// How many times the task has started running.
    pub fn firings(&self) -> usize {
        self.shared.firings()
    }

    /// Block until the task is done and return its outcome.
    ///
    /// For a periodic task this only returns once it is cancelled, discarded
    /// or halted by an error.
    pub fn join(&self) -> Result<Value> {
        let mut outcome = self.shared.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.shared.done.wait(&mut outcome);
        }
    }

    /// Like [`TaskHandle::join`] but gives up after `timeout`.
    pub fn join_timeout(
        &self,
        timeout: Duration,
    ) -> Option<Result<Value>> {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.shared.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return Some(result.clone());
            }
            if self
                .shared
                .done
                .wait_until(&mut outcome, deadline)
                .timed_out()
            {
                return outcome.as_ref().cloned();
            }
        }
    }

    /// Cancel and unqueue. Returns whether this call performed the cancellation.
    pub(crate) fn cancel(&self) -> bool {
        if !self.shared.try_cancel() {
            return false;
        }
        if let Some(owner) = self.shared.owner.upgrade() {
            owner.unqueue(self.shared.id);
        }
        true
    }
}
