//! Distributed-worker runtime
//!
//! A [`Team`] runs the same closure on W worker threads. Workers share
//! nothing implicitly: each keeps its own tiles and partial results, and
//! communicates only through distributed structures ([`GlobalArray`],
//! [`StagingMatrix`]) written one-sidedly and made visible by the team
//! barrier.
//!
//! ## Failure model
//!
//! A worker that returns an error or panics poisons the barrier. Every other
//! worker's next (or current) [`WorkerContext::barrier`] call returns that
//! error instead of blocking, so one failure cannot strand the rest of the
//! team. Collective allocation publishes its result, success or error, to
//! every worker across one barrier.
//!
//! ```
//! use tiled_mxv::team::{Team, TeamLayout};
//!
//! let team = Team::new(4, TeamLayout::balanced(4)).unwrap();
//! let ids = team.run(|ctx| {
//!     ctx.barrier()?;
//!     Ok(ctx.id())
//! }).unwrap();
//! assert_eq!(ids, vec![0, 1, 2, 3]);
//! ```

mod array;
mod layout;
mod pattern;

pub use array::{GlobalArray, StagingMatrix};
pub use layout::TeamLayout;
pub use pattern::{TileDistribution, TilePattern};

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;

use crate::error::{MxvError, Result};

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    failure: Option<MxvError>,
}

/// Reusable full-team barrier that can be poisoned by a failing worker
#[derive(Debug)]
struct TeamBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl TeamBarrier {
    fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait(&self) -> Result<()> {
        let mut state = self.lock();
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }

        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.released.notify_all();
            return Ok(());
        }

        while state.generation == generation && state.failure.is_none() {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match &state.failure {
            Some(failure) if state.generation == generation => Err(failure.clone()),
            _ => Ok(()),
        }
    }

    /// Record the first failure and release every waiter
    fn poison(&self, failure: MxvError) {
        let mut state = self.lock();
        if state.failure.is_none() {
            state.failure = Some(failure);
        }
        self.released.notify_all();
    }

    fn failure(&self) -> Option<MxvError> {
        self.lock().failure.clone()
    }
}

/// Single-use rendezvous for a collective allocation
///
/// Create one per collective call site before [`Team::run`] and share it
/// with every worker.
#[derive(Debug)]
pub struct CollectiveSlot<T> {
    cell: OnceLock<Result<Arc<T>>>,
}

impl<T> CollectiveSlot<T> {
    /// Empty slot
    #[must_use]
    pub fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }
}

impl<T> Default for CollectiveSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A worker's view of its team
#[derive(Debug)]
pub struct WorkerContext<'team> {
    id: usize,
    team_size: usize,
    layout: TeamLayout,
    barrier: &'team TeamBarrier,
}

impl WorkerContext<'_> {
    /// This worker's id in `0..team_size`
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of workers
    #[must_use]
    pub fn team_size(&self) -> usize {
        self.team_size
    }

    /// Team layout
    #[must_use]
    pub fn layout(&self) -> TeamLayout {
        self.layout
    }

    /// Block until every worker arrives
    ///
    /// # Errors
    ///
    /// Returns the failure of another worker instead of blocking forever.
    pub fn barrier(&self) -> Result<()> {
        self.barrier.wait()
    }

    /// Allocate once on behalf of the team
    ///
    /// Worker 0 runs `init`; every worker then synchronizes and receives the
    /// same shared structure or the same error.
    ///
    /// # Errors
    ///
    /// Returns `init`'s error on every worker, or a peer failure.
    pub fn collective<T, F>(&self, slot: &CollectiveSlot<T>, init: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        if self.id == 0 {
            // Ignore a second publication: the slot is single-use
            let _ = slot.cell.set(init().map(Arc::new));
        }
        self.barrier()?;
        match slot.cell.get() {
            Some(Ok(shared)) => Ok(Arc::clone(shared)),
            Some(Err(e)) => Err(e.clone()),
            None => Err(MxvError::AllocationFailed {
                reason: "collective slot was never published".to_string(),
            }),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Fixed team of W workers arranged in a [`TeamLayout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Team {
    workers: usize,
    layout: TeamLayout,
}

impl Team {
    /// Team of `workers` arranged as `layout`
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidConfiguration`] for an empty team and
    /// [`MxvError::InvalidLayout`] when the layout does not cover it exactly.
    pub fn new(workers: usize, layout: TeamLayout) -> Result<Self> {
        if workers == 0 {
            return Err(MxvError::config("team needs at least one worker"));
        }
        layout.validate_for(workers)?;
        Ok(Self { workers, layout })
    }

    /// Number of workers
    #[must_use]
    pub fn size(&self) -> usize {
        self.workers
    }

    /// Team layout
    #[must_use]
    pub fn layout(&self) -> TeamLayout {
        self.layout
    }

    /// Run `work` on every worker and collect results in worker-id order
    ///
    /// # Errors
    ///
    /// Returns the first failure any worker produced: its own error, or
    /// [`MxvError::WorkerFailed`] for a panic or a thread that could not be
    /// started.
    pub fn run<R, F>(&self, work: F) -> Result<Vec<R>>
    where
        R: Send,
        F: Fn(&WorkerContext<'_>) -> Result<R> + Sync,
    {
        let barrier = TeamBarrier::new(self.workers);
        let work = &work;
        let barrier_ref = &barrier;

        let results: Vec<Option<R>> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.workers);
            for id in 0..self.workers {
                let ctx = WorkerContext {
                    id,
                    team_size: self.workers,
                    layout: self.layout,
                    barrier: barrier_ref,
                };
                let spawned = thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn_scoped(scope, move || {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&ctx)));
                        match outcome {
                            Ok(Ok(value)) => Some(value),
                            Ok(Err(e)) => {
                                tracing::debug!(worker = id, error = %e, "worker failed");
                                ctx.barrier.poison(e);
                                None
                            },
                            Err(payload) => {
                                let reason = panic_message(payload.as_ref());
                                tracing::debug!(worker = id, %reason, "worker panicked");
                                ctx.barrier.poison(MxvError::WorkerFailed { worker: id, reason });
                                None
                            },
                        }
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        barrier_ref.poison(MxvError::WorkerFailed {
                            worker: id,
                            reason: format!("could not start worker thread: {e}"),
                        });
                        break;
                    },
                }
            }
            handles
                .into_iter()
                .map(|handle| handle.join().ok().flatten())
                .collect()
        });

        if let Some(failure) = barrier.failure() {
            return Err(failure);
        }
        results
            .into_iter()
            .enumerate()
            .map(|(worker, value)| {
                value.ok_or_else(|| MxvError::WorkerFailed {
                    worker,
                    reason: "worker produced no result".to_string(),
                })
            })
            .collect()
    }
}
