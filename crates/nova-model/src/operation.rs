//! Operation runner.
//!
//! Operations run on a per-thread stack. Nested operations (run from inside another operation or
//! from a post action) add their deltas to their thread's stack; only the outermost operation runs
//! the queued post actions and fires, so operations on different threads each fire their own
//! delta. A mutating top-level operation runs inside a workspace transaction, so no resource
//! events interleave with its body.
//!
//! Post actions queued by listeners during the top-level firing still run before the operation
//! returns, but the deltas they produce are left in the manager's queue until the next firing.

use std::thread::{self, ThreadId};

use nova_vfs::Workspace;
use tokio_util::sync::CancellationToken;

use crate::delta::ElementDelta;
use crate::error::{ModelError, Result};
use crate::manager::ModelManager;
use crate::notify::FireKind;
use crate::post_action::{InsertionMode, PostAction, PostActionQueue};

pub trait ModelOperation {
    fn name(&self) -> &str;

    fn execute(&mut self, cx: &mut OperationContext<'_>) -> Result<()>;

    /// Read-only operations do not open a workspace transaction.
    fn is_read_only(&self) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationState {
    Pushed,
    Executing,
    Popped,
}

#[derive(Debug)]
struct Frame {
    name: String,
    state: OperationState,
}

#[derive(Debug, Default)]
pub(crate) struct OperationStack {
    frames: Vec<Frame>,
    pub(crate) actions: PostActionQueue,
    deltas: Vec<ElementDelta>,
    modified_resources: bool,
}

/// What an executing operation can see and do.
pub struct OperationContext<'a> {
    manager: &'a ModelManager,
    delta: ElementDelta,
    modified_resources: bool,
    cancel: CancellationToken,
}

impl<'a> OperationContext<'a> {
    pub fn manager(&self) -> &'a ModelManager {
        self.manager
    }

    pub fn workspace(&self) -> &'a Workspace {
        &self.manager.workspace
    }

    /// Delta rooted at the model, registered with the manager when the operation ends (also on
    /// failure).
    pub fn delta_mut(&mut self) -> &mut ElementDelta {
        &mut self.delta
    }

    /// Marks the top-level operation as having changed workspace resources: its deltas are then
    /// fired by resource delta processing instead of by the operation.
    pub fn set_modified_resources(&mut self) {
        self.modified_resources = true;
    }

    pub fn post_action(&self, action: PostAction, mode: InsertionMode) -> Result<()> {
        self.manager.post_action(action, mode)
    }

    pub fn run_nested(&self, op: &mut dyn ModelOperation) -> Result<()> {
        run_operation(self.manager, op, self.cancel.clone())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ModelError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Removes the thread's stack once the top-level operation is done, even when unwinding.
struct StackGuard<'a> {
    manager: &'a ModelManager,
    thread: ThreadId,
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut stack) = self.manager.operations.lock().remove(&self.thread) {
            if let Some(frame) = stack.frames.last_mut() {
                frame.state = OperationState::Popped;
            }
        }
    }
}

pub(crate) fn run_operation(
    manager: &ModelManager,
    op: &mut dyn ModelOperation,
    cancel: CancellationToken,
) -> Result<()> {
    let thread = thread::current().id();
    let top_level = {
        let mut stacks = manager.operations.lock();
        let stack = stacks.entry(thread).or_default();
        stack.frames.push(Frame {
            name: op.name().to_string(),
            state: OperationState::Pushed,
        });
        stack.frames.len() == 1
    };

    if !top_level {
        let result = execute(manager, thread, op, cancel);
        pop_frame(manager, thread);
        return result;
    }

    let _guard = StackGuard { manager, thread };
    let result = if op.is_read_only() {
        run_top_level(manager, thread, op, cancel)
    } else {
        manager
            .workspace
            .run(|_| run_top_level(manager, thread, op, cancel))
    };

    // Actions queued by listeners while the operation's delta was fired.
    let late = run_post_actions(manager, thread);
    for delta in take_deltas(manager, thread).0 {
        manager.register_delta(delta);
    }
    result.and(late)
}

fn run_top_level(
    manager: &ModelManager,
    thread: ThreadId,
    op: &mut dyn ModelOperation,
    cancel: CancellationToken,
) -> Result<()> {
    let result = execute(manager, thread, op, cancel);
    if let Err(err) = &result {
        tracing::debug!(target = "nova.model", operation = op.name(), error = %err, "operation failed");
    }

    let actions = run_post_actions(manager, thread);

    let (deltas, modified_resources) = take_deltas(manager, thread);
    if modified_resources {
        // The resource pass closing the workspace transaction fires these.
        for delta in deltas {
            manager.register_delta(delta);
        }
    } else {
        manager.fire_with(deltas, FireKind::Default);
    }

    result.and(actions)
}

fn take_deltas(manager: &ModelManager, thread: ThreadId) -> (Vec<ElementDelta>, bool) {
    manager
        .operations
        .lock()
        .get_mut(&thread)
        .map(|stack| (std::mem::take(&mut stack.deltas), stack.modified_resources))
        .unwrap_or_default()
}

fn execute(
    manager: &ModelManager,
    thread: ThreadId,
    op: &mut dyn ModelOperation,
    cancel: CancellationToken,
) -> Result<()> {
    set_state(manager, thread, OperationState::Executing);
    let mut cx = OperationContext {
        manager,
        delta: ElementDelta::new(manager.model().clone()),
        modified_resources: false,
        cancel,
    };
    let result = op.execute(&mut cx);

    let OperationContext {
        delta,
        modified_resources,
        ..
    } = cx;
    if let Some(stack) = manager.operations.lock().get_mut(&thread) {
        if !delta.is_empty() {
            stack.deltas.push(delta);
        }
        stack.modified_resources |= modified_resources;
    }
    result
}

fn set_state(manager: &ModelManager, thread: ThreadId, state: OperationState) {
    if let Some(frame) = manager
        .operations
        .lock()
        .get_mut(&thread)
        .and_then(|stack| stack.frames.last_mut())
    {
        tracing::trace!(target = "nova.model", operation = %frame.name, ?state, "operation state");
        frame.state = state;
    }
}

fn pop_frame(manager: &ModelManager, thread: ThreadId) {
    if let Some(stack) = manager.operations.lock().get_mut(&thread) {
        if let Some(mut frame) = stack.frames.pop() {
            frame.state = OperationState::Popped;
            tracing::trace!(target = "nova.model", operation = %frame.name, state = ?frame.state, "operation state");
        }
    }
}

/// Runs queued post actions FIFO, including ones queued by post actions. Returns the first
/// failure; every failure is logged.
fn run_post_actions(manager: &ModelManager, thread: ThreadId) -> Result<()> {
    let mut first_error = None;
    loop {
        let next = manager
            .operations
            .lock()
            .get_mut(&thread)
            .and_then(|stack| stack.actions.pop());
        let Some(action) = next else {
            break;
        };
        let id = action.id().to_string();
        if let Err(err) = action.run(manager) {
            tracing::warn!(target = "nova.model", action = %id, error = %err, "post action failed");
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Whether `thread` is currently inside an operation.
pub(crate) fn is_running(manager: &ModelManager, thread: ThreadId) -> bool {
    manager
        .operations
        .lock()
        .get(&thread)
        .is_some_and(|stack| !stack.frames.is_empty())
}

/// Current state of the innermost operation on this thread, if any.
pub(crate) fn current_state(manager: &ModelManager, thread: ThreadId) -> Option<OperationState> {
    manager
        .operations
        .lock()
        .get(&thread)
        .and_then(|stack| stack.frames.last())
        .map(|frame| frame.state)
}
