//! Cooperative scheduler
//!
//! The program's only concurrency primitive: a fixed rotation of task kinds
//! run under a wall-clock budget per outer iteration. The cursor into the
//! rotation persists across iterations, so a task that burns the whole budget
//! cannot starve the tasks after it, because the next iteration resumes
//! where this one stopped.

use std::time::{Duration, Instant};

/// The task kinds in rotation. Dispatched through a match in the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Command server: accept and service connections.
    Server,
    /// Drain pending protocol events through the dispatcher.
    Events,
    /// Pointer-follow focus check.
    PointerFocus,
}

/// Default time-slice budget per outer iteration.
pub const DEFAULT_BUDGET: Duration = Duration::from_millis(20);

/// Minimum sleep between iterations, so the processor is always yielded.
const MIN_IDLE: Duration = Duration::from_millis(1);

pub struct Scheduler {
    tasks: Vec<Task>,
    cursor: usize,
    budget: Duration,
}

impl Scheduler {
    pub fn new(tasks: Vec<Task>, budget: Duration) -> Self {
        Self {
            tasks,
            cursor: 0,
            budget,
        }
    }

    /// One outer iteration: invoke tasks in rotation starting at the cursor
    /// until either every task ran once or the budget is exhausted,
    /// whichever comes first. Returns the elapsed time.
    pub fn run_iteration(&mut self, mut run_task: impl FnMut(Task)) -> Duration {
        let start = Instant::now();
        for _ in 0..self.tasks.len() {
            run_task(self.tasks[self.cursor]);
            self.cursor = (self.cursor + 1) % self.tasks.len();
            if start.elapsed() > self.budget {
                break;
            }
        }
        start.elapsed()
    }

    /// How long to sleep before the next iteration.
    pub fn idle_time(&self, elapsed: Duration) -> Duration {
        self.budget.saturating_sub(elapsed).max(MIN_IDLE)
    }

    #[cfg(test)]
    fn cursor(&self) -> usize {
        self.cursor
    }
}
