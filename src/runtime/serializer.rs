//! Execution serializer
//!
//! One reentrant lock per worker wraps every top-level call, module load and
//! script evaluation. The thread holding it may enter again (a module loading
//! another module from inside its body); other threads block until the
//! outermost holder leaves.
//!
//! The lock also guards the call-chain pointer: the executable unit whose body
//! is currently running. Pushing a unit returns a [`ScriptFrame`] that puts the
//! previous unit back when finished or dropped, so the pointer is restored even
//! when a load fails or panics.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::engine::ExecutableUnit;

#[derive(Default)]
struct ChainState {
    current: Option<Arc<dyn ExecutableUnit>>,
    depth: usize,
}

/// Reentrant execution lock plus the call-chain pointer.
#[derive(Default)]
pub struct ExecutionSerializer {
    lock: ReentrantMutex<RefCell<ChainState>>,
}

impl ExecutionSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock, blocking while another thread holds it.
    pub fn enter(&self) -> SerialGuard<'_> {
        let guard = self.lock.lock();
        let depth = {
            let mut state = guard.borrow_mut();
            state.depth += 1;
            state.depth
        };
        SerialGuard { guard, depth }
    }

    /// The unit currently on top of the call chain.
    ///
    /// Blocks while another thread is executing on this worker.
    pub fn current_script(&self) -> Option<Arc<dyn ExecutableUnit>> {
        self.lock.lock().borrow().current.clone()
    }
}

impl fmt::Debug for ExecutionSerializer {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ExecutionSerializer")
            .field("locked", &self.lock.is_locked())
            .finish()
    }
}

/// Held while executing on a worker. Dropping it leaves one nesting level.
pub struct SerialGuard<'a> {
    guard: ReentrantMutexGuard<'a, RefCell<ChainState>>,
    depth: usize,
}

impl<'a> SerialGuard<'a> {
    /// Whether this guard is the outermost entry on the current thread.
    #[inline]
    pub fn is_outermost(&self) -> bool {
        self.depth == 1
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn current_script(&self) -> Option<Arc<dyn ExecutableUnit>> {
        self.guard.borrow().current.clone()
    }

    /// Make `unit` the current script until the returned frame ends.
    pub fn push_script(
        &self,
        unit: Arc<dyn ExecutableUnit>,
    ) -> ScriptFrame<'_> {
        let parent = self.guard.borrow_mut().current.replace(unit);
        ScriptFrame {
            state: &*self.guard,
            parent: Some(parent),
        }
    }
}

impl Drop for SerialGuard<'_> {
    fn drop(&mut self) {
        self.guard.borrow_mut().depth -= 1;
    }
}

/// A pushed call-chain entry.
pub struct ScriptFrame<'g> {
    state: &'g RefCell<ChainState>,
    /// `Some` until the previous pointer has been restored.
    parent: Option<Option<Arc<dyn ExecutableUnit>>>,
}

impl ScriptFrame<'_> {
    /// Restore the previous current script and return it.
    pub fn finish(mut self) -> Option<Arc<dyn ExecutableUnit>> {
        self.restore()
    }

    fn restore(&mut self) -> Option<Arc<dyn ExecutableUnit>> {
        let parent = self.parent.take()?;
        self.state.borrow_mut().current = parent.clone();
        parent
    }
}

impl Drop for ScriptFrame<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}
