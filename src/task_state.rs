use std::collections::HashSet;
use std::sync::Mutex;

/// In-memory single-flight guard for named long-running jobs.
///
/// Advisory and process-local: it only rejects overlapping runs observed by
/// this process and is reset by a restart. Acquisition never blocks; a second
/// caller is rejected outright. Callers must release on every exit path or
/// the task stays unavailable until the process restarts.
#[derive(Debug, Default)]
pub struct TaskState {
    running: Mutex<HashSet<String>>,
}

impl TaskState {
    /// Marks the task running and returns true, or returns false when it
    /// already is.
    pub fn try_acquire(&self, task: &str) -> bool {
        self.running
            .lock()
            .expect("task state mutex poisoned")
            .insert(task.to_string())
    }

    /// Clears the running mark unconditionally.
    pub fn release(&self, task: &str) {
        self.running
            .lock()
            .expect("task state mutex poisoned")
            .remove(task);
    }

    pub fn is_running(&self, task: &str) -> bool {
        self.running
            .lock()
            .expect("task state mutex poisoned")
            .contains(task)
    }
}

#[cfg(test)]
mod tests {
    use super::TaskState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn second_acquire_is_rejected() {
        let state = TaskState::default();
        assert!(state.try_acquire("email_fetch"));
        assert!(!state.try_acquire("email_fetch"));
        assert!(state.is_running("email_fetch"));
    }

    #[test]
    fn release_allows_reacquisition() {
        let state = TaskState::default();
        assert!(state.try_acquire("email_fetch"));
        state.release("email_fetch");
        assert!(!state.is_running("email_fetch"));
        assert!(state.try_acquire("email_fetch"));
    }

    #[test]
    fn distinct_tasks_do_not_interfere() {
        let state = TaskState::default();
        assert!(state.try_acquire("email_fetch"));
        assert!(state.try_acquire("notion_sync"));
    }

    #[test]
    fn releasing_an_unknown_task_is_a_no_op() {
        let state = TaskState::default();
        state.release("never_started");
        assert!(state.try_acquire("never_started"));
    }

    #[test]
    fn exactly_one_concurrent_acquire_wins() {
        let state = Arc::new(TaskState::default());
        let wins = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                let wins = Arc::clone(&wins);
                thread::spawn(move || {
                    if state.try_acquire("contended") {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread panicked");
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }
}
