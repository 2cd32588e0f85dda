//! Cooperative task suspension used as the cross-thread lock.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::trace;

/// Scheduler operations needed to park the owning task
pub trait Scheduler: Send + Sync + 'static {
    type Task: Clone + Send + Sync + std::fmt::Debug + 'static;

    fn current_task(&self) -> Self::Task;

    fn suspend(&self, task: &Self::Task);

    fn resume(&self, task: &Self::Task);
}

/// Keeps a task suspended for as long as the guard lives
pub struct SuspendGuard<'a, S: Scheduler> {
    scheduler: &'a S,
    task: &'a S::Task,
}

impl<'a, S: Scheduler> SuspendGuard<'a, S> {
    pub fn new(scheduler: &'a S, task: &'a S::Task) -> Self {
        scheduler.suspend(task);
        trace!(?task, "owning task suspended");
        Self { scheduler, task }
    }
}

impl<S: Scheduler> Drop for SuspendGuard<'_, S> {
    fn drop(&mut self) {
        self.scheduler.resume(self.task);
        trace!(task = ?self.task, "owning task resumed");
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

struct TaskState {
    id: u64,
    name: String,
    suspended: Mutex<u32>,
    wake: Condvar,
}

/// Handle to a cooperatively scheduled host task.
///
/// Suspension is counted; the task only parks when it reaches a
/// [`checkpoint`](CooperativeTask::checkpoint).
#[derive(Clone)]
pub struct CooperativeTask {
    inner: Arc<TaskState>,
}

impl std::fmt::Debug for CooperativeTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooperativeTask")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

impl PartialEq for CooperativeTask {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for CooperativeTask {}

impl CooperativeTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TaskState {
                id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                suspended: Mutex::new(0),
                wake: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_suspended(&self) -> bool {
        *self.count() > 0
    }

    /// Park the calling thread while this task is suspended
    pub fn checkpoint(&self) {
        let mut count = self.count();
        while *count > 0 {
            count = self
                .inner
                .wake
                .wait(count)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn suspend(&self) {
        *self.count() += 1;
    }

    fn resume(&self) {
        let mut count = self.count();
        if *count > 0 {
            *count -= 1;
            if *count == 0 {
                self.inner.wake.notify_all();
            }
        }
    }

    fn count(&self) -> MutexGuard<'_, u32> {
        self.inner
            .suspended
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

thread_local! {
    static CURRENT: RefCell<Option<CooperativeTask>> = const { RefCell::new(None) };
}

/// Host scheduler: every thread is one cooperative task
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskScheduler;

impl TaskScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TaskScheduler {
    type Task = CooperativeTask;

    fn current_task(&self) -> CooperativeTask {
        CURRENT.with(|current| {
            current
                .borrow_mut()
                .get_or_insert_with(|| {
                    let thread = std::thread::current();
                    CooperativeTask::new(thread.name().unwrap_or("unnamed"))
                })
                .clone()
        })
    }

    fn suspend(&self, task: &CooperativeTask) {
        task.suspend();
    }

    fn resume(&self, task: &CooperativeTask) {
        task.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn current_task_is_stable_per_thread() {
        let scheduler = TaskScheduler::new();
        let here = scheduler.current_task();
        assert_eq!(here, scheduler.current_task());

        let there = std::thread::spawn(move || scheduler.current_task())
            .join()
            .unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn guard_suspends_and_resumes() {
        let scheduler = TaskScheduler::new();
        let task = CooperativeTask::new("owner");
        {
            let _outer = SuspendGuard::new(&scheduler, &task);
            assert!(task.is_suspended());
            {
                let _inner = SuspendGuard::new(&scheduler, &task);
            }
            assert!(task.is_suspended());
        }
        assert!(!task.is_suspended());
    }

    #[test]
    fn guard_resumes_on_unwind() {
        let scheduler = TaskScheduler::new();
        let task = CooperativeTask::new("owner");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = SuspendGuard::new(&scheduler, &task);
            panic!("callback failed");
        }));
        assert!(result.is_err());
        assert!(!task.is_suspended());
    }

    #[test]
    fn checkpoint_parks_until_resumed() {
        let scheduler = TaskScheduler::new();
        let task = CooperativeTask::new("owner");
        scheduler.suspend(&task);

        let passed = Arc::new(AtomicBool::new(false));
        let worker = {
            let task = task.clone();
            let passed = Arc::clone(&passed);
            std::thread::spawn(move || {
                task.checkpoint();
                passed.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(30));
        assert!(!passed.load(Ordering::SeqCst));
        scheduler.resume(&task);
        worker.join().unwrap();
        assert!(passed.load(Ordering::SeqCst));
    }
}
