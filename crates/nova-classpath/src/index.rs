//! Versioned root index.
//!
//! The index owns two [`RootMap`] snapshots: `current` and `old`, the latter being the map that
//! was current before the last publish. Removal processing resolves removed paths against `old`
//! because by then `current` may no longer list them.
//!
//! Recomputation replaces the whole map. [`RootIndex::mark_stale`] bumps a generation counter;
//! [`RootIndex::begin_recompute`] hands out a ticket stamped with that generation (double-checked
//! under the lock, never twice on the same thread) and [`RootIndex::commit`] publishes the result
//! unless a newer generation has already been committed.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::roots::RootMap;

#[derive(Debug)]
struct IndexState {
    current: Arc<RootMap>,
    old: Arc<RootMap>,
    stale: bool,
    generation: u64,
    committed: u64,
    in_progress: HashSet<ThreadId>,
}

#[derive(Debug)]
pub struct RootIndex {
    state: Mutex<IndexState>,
}

/// Permission to recompute the index, obtained from [`RootIndex::begin_recompute`].
#[derive(Debug)]
#[must_use = "a recompute ticket must be committed or abandoned"]
pub struct RecomputeTicket {
    generation: u64,
    thread: ThreadId,
}

impl RecomputeTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Default for RootIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RootIndex {
    /// A stale, empty index.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(IndexState {
                current: Arc::new(RootMap::default()),
                old: Arc::new(RootMap::default()),
                stale: true,
                generation: 1,
                committed: 0,
                in_progress: HashSet::new(),
            }),
        }
    }

    pub fn current(&self) -> Arc<RootMap> {
        Arc::clone(&self.state.lock().current)
    }

    pub fn old(&self) -> Arc<RootMap> {
        Arc::clone(&self.state.lock().old)
    }

    pub fn is_stale(&self) -> bool {
        self.state.lock().stale
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn mark_stale(&self) {
        let mut state = self.state.lock();
        state.stale = true;
        state.generation += 1;
    }

    pub fn begin_recompute(&self) -> Option<RecomputeTicket> {
        let mut state = self.state.lock();
        if !state.stale {
            return None;
        }
        let thread = thread::current().id();
        if !state.in_progress.insert(thread) {
            return None;
        }
        Some(RecomputeTicket {
            generation: state.generation,
            thread,
        })
    }

    /// Publishes `map` computed under `ticket`. Returns `false` if the result lost the race.
    pub fn commit(&self, ticket: RecomputeTicket, map: RootMap) -> bool {
        let mut state = self.state.lock();
        state.in_progress.remove(&ticket.thread);
        if ticket.generation < state.committed {
            tracing::debug!(
                target = "nova.classpath",
                ticket = ticket.generation,
                committed = state.committed,
                "discarding outdated root index recompute"
            );
            return false;
        }
        state.old = std::mem::replace(&mut state.current, Arc::new(map));
        state.committed = ticket.generation;
        if ticket.generation == state.generation {
            state.stale = false;
        }
        true
    }

    pub fn abandon(&self, ticket: RecomputeTicket) {
        self.state.lock().in_progress.remove(&ticket.thread);
    }

    /// Swaps in a whole map outside the recompute protocol; the previous map becomes `old`.
    pub fn publish(&self, map: RootMap) {
        let mut state = self.state.lock();
        state.old = std::mem::replace(&mut state.current, Arc::new(map));
    }

    /// Forgets the previous snapshot (`old = current`).
    pub fn settle(&self) {
        let mut state = self.state.lock();
        state.old = Arc::clone(&state.current);
    }
}
