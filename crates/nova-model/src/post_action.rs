use std::collections::VecDeque;
use std::fmt;

use crate::error::Result;
use crate::manager::ModelManager;

/// How a post action is queued relative to actions with the same id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertionMode {
    Append,
    /// Drop queued actions with the same id, then append.
    RemoveAllAppend,
    /// Skip if an action with the same id is already queued.
    KeepExisting,
}

type Action = Box<dyn FnOnce(&ModelManager) -> Result<()> + Send>;

/// Work deferred until the top-level operation finishes.
pub struct PostAction {
    id: String,
    run: Action,
}

impl PostAction {
    pub fn new(
        id: impl Into<String>,
        run: impl FnOnce(&ModelManager) -> Result<()> + Send + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            run: Box::new(run),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn run(self, manager: &ModelManager) -> Result<()> {
        (self.run)(manager)
    }
}

impl fmt::Debug for PostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostAction").field("id", &self.id).finish()
    }
}

/// FIFO queue of post actions owned by one thread's operation stack.
#[derive(Debug, Default)]
pub(crate) struct PostActionQueue {
    actions: VecDeque<PostAction>,
}

impl PostActionQueue {
    pub(crate) fn push(&mut self, action: PostAction, mode: InsertionMode) {
        match mode {
            InsertionMode::Append => {}
            InsertionMode::RemoveAllAppend => {
                self.actions.retain(|queued| queued.id != action.id);
            }
            InsertionMode::KeepExisting => {
                if self.actions.iter().any(|queued| queued.id == action.id) {
                    return;
                }
            }
        }
        self.actions.push_back(action);
    }

    pub(crate) fn pop(&mut self) -> Option<PostAction> {
        self.actions.pop_front()
    }

    pub(crate) fn ids(&self) -> Vec<&str> {
        self.actions.iter().map(PostAction::id).collect()
    }
}
