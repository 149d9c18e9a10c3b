//! Scoped acquisition and release of resources with aggregated error
//! reporting.
//!
//! Code that creates temp files (or any other resource needing teardown)
//! registers a labelled cleanup task; [`Janitor::clean_up`] runs them in LIFO
//! order and reports every failure instead of stopping at the first.

type Task = Box<dyn FnOnce() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send>;

/// One cleanup task that failed, with the label it was registered under.
#[derive(Debug)]
pub struct CleanupFailure {
    pub task: String,
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl std::fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cleanup task {:?} failed: {}", self.task, self.error)
    }
}

impl std::error::Error for CleanupFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

#[derive(Debug)]
pub enum JanitorError {
    /// Exactly one task failed; its error passes through unwrapped.
    Single(CleanupFailure),
    /// Several tasks failed.
    Multiple { errors: Vec<CleanupFailure> },
}

impl std::fmt::Display for JanitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JanitorError::Single(failure) => write!(f, "{failure}"),
            JanitorError::Multiple { errors } => {
                write!(f, "{} cleanup tasks failed:", errors.len())?;
                for failure in errors {
                    write!(f, "\n  {failure}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for JanitorError {}

/// A stack of cleanup tasks.
#[derive(Default)]
pub struct Janitor {
    tasks: Vec<(String, Task)>,
}

impl Janitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task; tasks run in reverse registration order.
    pub fn add_task<F>(&mut self, label: impl Into<String>, task: F)
    where
        F: FnOnce() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        self.tasks.push((label.into(), Box::new(task)));
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run all registered tasks (LIFO), collecting failures.
    pub fn clean_up(&mut self) -> Result<(), JanitorError> {
        let mut errors = Vec::new();
        while let Some((label, task)) = self.tasks.pop() {
            if let Err(error) = task() {
                errors.push(CleanupFailure { task: label, error });
            }
        }
        aggregate(errors)
    }

    /// Run all registered tasks concurrently, with the same aggregation.
    ///
    /// Ordering guarantees are given up, so only use this when the tasks are
    /// independent.
    pub fn clean_up_parallel(&mut self) -> Result<(), JanitorError> {
        let tasks = std::mem::take(&mut self.tasks);
        let mut errors = Vec::new();
        std::thread::scope(|scope| {
            let handles: Vec<_> = tasks
                .into_iter()
                .map(|(label, task)| scope.spawn(move || (label, task())))
                .collect();
            for handle in handles {
                if let Ok((label, Err(error))) = handle.join() {
                    errors.push(CleanupFailure { task: label, error });
                }
            }
        });
        aggregate(errors)
    }
}

fn aggregate(mut errors: Vec<CleanupFailure>) -> Result<(), JanitorError> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(JanitorError::Single(errors.remove(0))),
        _ => Err(JanitorError::Multiple { errors }),
    }
}

impl std::fmt::Debug for Janitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Janitor")
            .field("pending_tasks", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn boxed_err(msg: &str) -> Box<dyn std::error::Error + Send + Sync> {
        msg.to_string().into()
    }

    #[test]
    fn runs_tasks_in_lifo_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut janitor = Janitor::new();
        for n in 1..=3 {
            let order = order.clone();
            janitor.add_task(format!("task-{n}"), move || {
                order.lock().unwrap().push(n);
                Ok(())
            });
        }
        janitor.clean_up().unwrap();
        assert_eq!(*order.lock().unwrap(), [3, 2, 1]);
        assert!(janitor.is_empty());
    }

    #[test]
    fn single_failure_passes_through() {
        let mut janitor = Janitor::new();
        janitor.add_task("remove temp", || Err(boxed_err("gone already")));
        let err = janitor.clean_up().unwrap_err();
        match err {
            JanitorError::Single(failure) => {
                assert_eq!(failure.task, "remove temp");
                assert_eq!(failure.error.to_string(), "gone already");
            }
            other => panic!("expected Single, got {other:?}"),
        }
    }

    #[test]
    fn multiple_failures_aggregate() {
        let mut janitor = Janitor::new();
        janitor.add_task("a", || Err(boxed_err("first")));
        janitor.add_task("b", || Ok(()));
        janitor.add_task("c", || Err(boxed_err("second")));
        let err = janitor.clean_up().unwrap_err();
        match err {
            JanitorError::Multiple { errors } => {
                assert_eq!(errors.len(), 2);
                // LIFO: "c" fails before "a".
                assert_eq!(errors[0].task, "c");
                assert_eq!(errors[1].task, "a");
            }
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn failing_task_does_not_stop_the_rest() {
        let ran = Arc::new(Mutex::new(false));
        let mut janitor = Janitor::new();
        {
            let ran = ran.clone();
            janitor.add_task("survivor", move || {
                *ran.lock().unwrap() = true;
                Ok(())
            });
        }
        janitor.add_task("doomed", || Err(boxed_err("boom")));
        let _ = janitor.clean_up();
        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn parallel_cleanup_aggregates() {
        let mut janitor = Janitor::new();
        janitor.add_task("x", || Err(boxed_err("ex")));
        janitor.add_task("y", || Err(boxed_err("why")));
        let err = janitor.clean_up_parallel().unwrap_err();
        assert!(matches!(err, JanitorError::Multiple { errors } if errors.len() == 2));
    }
}
