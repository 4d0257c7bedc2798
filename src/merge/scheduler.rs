//! Resource-bounded execution of merge tasks.
//!
//! All workers pull from one pending queue guarded by a single mutex that
//! also holds the resource budget, the in-flight count and the first error.
//! A task is admitted only when its declared resource fits in what is left,
//! or when nothing else is running (so an oversized task cannot starve).
//!
//! On failure the scheduler drains: running tasks finish, nothing new
//! starts, and [`ResourceControlledScheduler::run`] returns the first error.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::{Result, SegmergeError};

/// A unit of work the scheduler can run.
pub trait WorkItem: Send + Sync {
    fn name(&self) -> String;

    /// Resource units held while the item runs.
    fn required_resource(&self) -> u64;

    fn process(&self) -> Result<()>;
}

/// Status of one work item after a run.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    /// Never admitted because an earlier task failed.
    Skipped,

    /// Task completed successfully.
    Completed,

    /// Task failed with error.
    Failed(String),
}

/// Statistics about a scheduler run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStats {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Highest number of tasks running at once.
    pub peak_in_flight: usize,
    pub elapsed_ms: u64,
}

struct SchedulerState {
    pending: VecDeque<usize>,
    left_resource: u64,
    in_flight: usize,
    peak_in_flight: usize,
    first_error: Option<SegmergeError>,
    statuses: Vec<TaskStatus>,
}

/// Runs work items on a fixed pool of threads under a resource budget.
pub struct ResourceControlledScheduler<'a> {
    total_resource: u64,
    thread_count: usize,
    items: Vec<Box<dyn WorkItem + 'a>>,
    statuses: Vec<TaskStatus>,
}

impl<'a> ResourceControlledScheduler<'a> {
    pub fn new(total_resource: u64) -> Self {
        ResourceControlledScheduler {
            total_resource,
            thread_count: 1,
            items: Vec::new(),
            statuses: Vec::new(),
        }
    }

    /// Queue work items, in admission order, and size the pool.
    pub fn init(&mut self, items: Vec<Box<dyn WorkItem + 'a>>, thread_count: usize) -> Result<()> {
        if thread_count == 0 {
            return Err(SegmergeError::config("scheduler needs at least one thread"));
        }
        self.items = items;
        self.thread_count = thread_count;
        self.statuses.clear();
        Ok(())
    }

    pub fn total_resource(&self) -> u64 {
        self.total_resource
    }

    /// Status of each item of the last run, in queue order.
    pub fn statuses(&self) -> &[TaskStatus] {
        &self.statuses
    }

    /// Run every item. Returns the first error once all running items have
    /// finished.
    pub fn run(&mut self) -> Result<SchedulerStats> {
        let start = Instant::now();
        let state = Mutex::new(SchedulerState {
            pending: (0..self.items.len()).collect(),
            left_resource: self.total_resource,
            in_flight: 0,
            peak_in_flight: 0,
            first_error: None,
            statuses: vec![TaskStatus::Skipped; self.items.len()],
        });
        let wakeup = Condvar::new();
        let workers = self.thread_count.min(self.items.len()).max(1);

        info!(
            "scheduler starting: {} tasks, {} workers, resource budget {}",
            self.items.len(),
            workers,
            self.total_resource
        );

        thread::scope(|scope| {
            for worker_id in 0..workers {
                let (state, wakeup, items) = (&state, &wakeup, &self.items);
                let total = self.total_resource;
                scope.spawn(move || worker_loop(worker_id, items, state, wakeup, total));
            }
        });

        let state = state.into_inner();
        self.statuses = state.statuses;
        let mut stats = SchedulerStats {
            peak_in_flight: state.peak_in_flight,
            elapsed_ms: start.elapsed().as_millis() as u64,
            ..Default::default()
        };
        for status in &self.statuses {
            match status {
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed(_) => stats.failed += 1,
                TaskStatus::Skipped => stats.skipped += 1,
            }
        }

        match state.first_error {
            Some(err) => {
                warn!(
                    "scheduler drained after failure: {} completed, {} failed, {} skipped",
                    stats.completed, stats.failed, stats.skipped
                );
                Err(err)
            }
            None => {
                info!(
                    "scheduler finished {} tasks in {} ms",
                    stats.completed, stats.elapsed_ms
                );
                Ok(stats)
            }
        }
    }
}

fn worker_loop(
    worker_id: usize,
    items: &[Box<dyn WorkItem + '_>],
    state: &Mutex<SchedulerState>,
    wakeup: &Condvar,
    total_resource: u64,
) {
    loop {
        let (index, reserved) = {
            let mut s = state.lock();
            loop {
                if s.first_error.is_some() || s.pending.is_empty() {
                    wakeup.notify_all();
                    return;
                }
                let (left, in_flight) = (s.left_resource, s.in_flight);
                let admissible = s.pending.iter().position(|&i| {
                    let required = items[i].required_resource().min(total_resource);
                    required <= left || in_flight == 0
                });
                if let Some(pos) = admissible
                    && let Some(index) = s.pending.remove(pos)
                {
                    let reserved = items[index].required_resource().min(s.left_resource);
                    s.left_resource -= reserved;
                    s.in_flight += 1;
                    s.peak_in_flight = s.peak_in_flight.max(s.in_flight);
                    break (index, reserved);
                }
                wakeup.wait(&mut s);
            }
        };

        let item = &items[index];
        debug!("worker {worker_id} running {}", item.name());
        let result = catch_unwind(AssertUnwindSafe(|| item.process())).unwrap_or_else(|panic| {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(SegmergeError::ThreadJoin(format!("task {} panicked: {msg}", item.name())))
        });

        let mut s = state.lock();
        s.left_resource += reserved;
        s.in_flight -= 1;
        match result {
            Ok(()) => {
                debug!("worker {worker_id} finished {}", item.name());
                s.statuses[index] = TaskStatus::Completed;
            }
            Err(err) => {
                warn!("task {} failed: {err}", item.name());
                s.statuses[index] = TaskStatus::Failed(err.to_string());
                if s.first_error.is_none() {
                    s.first_error = Some(err);
                }
            }
        }
        wakeup.notify_all();
    }
}
