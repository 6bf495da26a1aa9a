//! Parallel execution of a target's upstream closure.
//!
//! The algorithm works as follows:
//! 1. The upstream closure of the target is computed and each member's
//!    in-degree is copied into a mutable per-run counter.
//! 2. Stages whose counter is zero seed a FIFO ready queue.
//! 3. A fixed number of worker threads pull from the queue, execute the
//!    stage, then decrement the counters of its in-closure consumers,
//!    enqueueing any that reach zero.
//! 4. The run finishes when every stage in the closure has completed, or
//!    as soon as any stage fails. The first error wins; workers drain and
//!    exit without starting new work.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;

use tracing::Level;

use crate::engine::{Key, Port};
use crate::error::Error;
use crate::graph::Graph;
use crate::store::ResultStore;

/// Scheduler state shared by the workers of one run.
struct RunState {
    queue: Mutex<QueueState>,
    wakeup: Condvar,
    /// Stages in the closure not yet completed successfully.
    remaining: AtomicUsize,
    /// Stages completed successfully.
    completed: AtomicUsize,
    failed: AtomicBool,
}

struct QueueState {
    /// Distinct keys whose remaining in-degree has reached zero and which
    /// have not yet been dispatched.
    ready: VecDeque<Key>,
    /// Mutable per-run copy of the static in-degrees, restricted to the
    /// closure.
    rem_in: HashMap<Key, usize>,
    /// Workers currently executing a stage.
    in_flight: usize,
    first_error: Option<Error>,
}

impl RunState {
    /// Records `error` if it is the first, raises the failure flag, and
    /// wakes every worker.
    fn fail(&self, error: Error) {
        let mut queue = self.queue.lock().unwrap();
        if queue.first_error.is_none() {
            queue.first_error = Some(error);
        }
        self.failed.store(true, Ordering::Release);
        drop(queue);
        self.wakeup.notify_all();
    }
}

/// Executes the upstream closure of `target` on `workers` threads and
/// returns the target's typed value.
///
/// Worker threads are spawned per run and joined before this function
/// returns; no pool persists in between.
pub(crate) fn run_parallel<T>(
    graph: &Graph,
    store: &ResultStore,
    target: &Port<T>,
    workers: usize,
) -> Result<T, Error>
where
    T: Clone + Send + Sync + 'static,
{
    let available = thread::available_parallelism().ok().map(|n| n.get());
    if workers == 0 || available.is_some_and(|max| workers > max) {
        return Err(Error::InvalidThreadCount {
            requested: workers,
            available,
        });
    }

    let closure = graph.closure(&target.key)?;

    // Each run starts with fresh intermediate state.
    store.clear();

    let span = tracing::span!(
        Level::INFO,
        "run",
        target_stage = %target.key(),
        stages = closure.len(),
        workers,
    );
    let _enter = span.enter();

    let mut rem_in = HashMap::with_capacity(closure.len());
    let mut ready = VecDeque::new();

    for key in &closure {
        let degree = graph.in_degree_of(key);
        rem_in.insert(key.clone(), degree);
        if degree == 0 {
            ready.push_back(key.clone());
        }
    }

    let state = RunState {
        queue: Mutex::new(QueueState {
            ready,
            rem_in,
            in_flight: 0,
            first_error: None,
        }),
        wakeup: Condvar::new(),
        remaining: AtomicUsize::new(closure.len()),
        completed: AtomicUsize::new(0),
        failed: AtomicBool::new(false),
    };

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| worker_loop(graph, store, &closure, &state));
        }
    });

    let mut queue = state.queue.into_inner().unwrap();
    if let Some(error) = queue.first_error.take() {
        tracing::debug!(error = %error, kind = error.name(), "run failed");
        return Err(error);
    }

    let completed = state.completed.load(Ordering::Acquire);
    if completed != closure.len() {
        return Err(Error::StageCountMismatch {
            expected: closure.len(),
            ran: completed,
        });
    }

    store.peek::<T>(&target.key)
}

fn worker_loop(graph: &Graph, store: &ResultStore, closure: &HashSet<Key>, state: &RunState) {
    loop {
        let key = {
            let mut queue = state.queue.lock().unwrap();

            loop {
                if state.failed.load(Ordering::Acquire)
                    || state.remaining.load(Ordering::Acquire) == 0
                {
                    return;
                }

                if let Some(key) = queue.ready.pop_front() {
                    queue.in_flight += 1;
                    break key;
                }

                if queue.in_flight == 0 {
                    // Nothing ready, nothing running, yet stages remain:
                    // the graph invariants have been violated.
                    drop(queue);
                    state.fail(Error::StageCountMismatch {
                        expected: closure.len(),
                        ran: state.completed.load(Ordering::Acquire),
                    });
                    return;
                }

                queue = state.wakeup.wait(queue).unwrap();
            }
        };

        tracing::debug!(stage = %key, "executing stage");

        let outcome = match graph.stage(&key) {
            // We use AssertUnwindSafe because a panicking stage cannot
            // corrupt shared scheduler state: the store entry for this key
            // is only written after the computation returns.
            Some(stage) => match catch_unwind(AssertUnwindSafe(|| stage.execute(store))) {
                Ok(result) => result,
                Err(panic) => {
                    let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                        format!("stage panicked: {s}")
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        format!("stage panicked: {s}")
                    } else {
                        String::from("stage panicked with unknown payload")
                    };

                    Err(Error::Runtime {
                        stage: key.clone(),
                        cause: anyhow::anyhow!(msg),
                    })
                }
            },
            None => Err(Error::UnknownStage(key.clone())),
        };

        if let Err(error) = outcome {
            // Decrement in_flight under the same lock that records the
            // error, so a waiting worker never observes a phantom runner.
            let mut queue = state.queue.lock().unwrap();
            queue.in_flight -= 1;
            if queue.first_error.is_none() {
                queue.first_error = Some(error);
            }
            state.failed.store(true, Ordering::Release);
            drop(queue);
            state.wakeup.notify_all();
            return;
        }

        let mut queue = state.queue.lock().unwrap();

        for consumer in graph.downstream_of(&key) {
            if !closure.contains(consumer) {
                continue;
            }

            // Every in-closure consumer has an entry in rem_in.
            let count = queue.rem_in.get_mut(consumer).unwrap();
            *count -= 1;
            if *count == 0 {
                queue.ready.push_back(consumer.clone());
            }
        }

        queue.in_flight -= 1;
        state.remaining.fetch_sub(1, Ordering::AcqRel);
        state.completed.fetch_add(1, Ordering::AcqRel);
        drop(queue);
        state.wakeup.notify_all();
    }
}
