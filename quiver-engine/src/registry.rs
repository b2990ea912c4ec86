//! In-flight task registry: at most one running task per key.
//!
//! A caller [`submit`](TaskRegistry::submit)s a key together with a waiter
//! callback. Under a single lock the registry either
//!
//! - finds the result already available (`lookup`) and hands the waiter back,
//! - joins a running task for the key, or
//! - records a new task, telling the caller to start the producer.
//!
//! The producer commits its result to the result store *before* calling
//! [`complete`](TaskRegistry::complete), which removes the task and invokes
//! every waiter in registration order. A submitter that takes the lock after
//! the removal therefore sees the committed result instead of starting a
//! duplicate task.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Callback invoked with the task's result.
pub type Waiter<T> = Box<dyn FnOnce(T) + Send>;

/// Handle used to withdraw a waiter before its task completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

/// Outcome of [`TaskRegistry::submit`] and [`TaskRegistry::join`].
pub enum Submission<T> {
    /// The result was available; the waiter is returned uninvoked.
    Ready(T, Waiter<T>),
    /// Attached to a task that is already running.
    Joined(WaiterId),
    /// A new task was recorded; the caller must run the producer and
    /// eventually call [`TaskRegistry::complete`].
    Started(WaiterId),
    /// Nothing running and starting was not allowed; the waiter is returned.
    Refused(Waiter<T>),
}

impl<T> Submission<T> {
    /// The registered waiter, if the submission attached one.
    pub fn waiter_id(&self) -> Option<WaiterId> {
        match self {
            Self::Joined(id) | Self::Started(id) => Some(*id),
            Self::Ready(..) | Self::Refused(_) => None,
        }
    }
}

impl<T> std::fmt::Debug for Submission<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(..) => write!(f, "Ready"),
            Self::Joined(id) => write!(f, "Joined({})", id.0),
            Self::Started(id) => write!(f, "Started({})", id.0),
            Self::Refused(_) => write!(f, "Refused"),
        }
    }
}

struct InFlight<T> {
    waiters: Vec<(WaiterId, Waiter<T>)>,
}

/// Map from key to the running task for that key.
pub struct TaskRegistry<K, T> {
    tasks: Mutex<HashMap<K, InFlight<T>>>,
    next_waiter: AtomicU64,
    started: AtomicU64,
    joined: AtomicU64,
}

impl<K, T> Default for TaskRegistry<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> TaskRegistry<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_waiter: AtomicU64::new(1),
            started: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    /// Look up, join or start the task for `key`.
    ///
    /// `lookup` runs under the registry lock, after the running-task check.
    pub fn submit(
        &self,
        key: K,
        waiter: Waiter<T>,
        lookup: impl FnOnce(&K) -> Option<T>,
    ) -> Submission<T> {
        self.submit_inner(key, waiter, lookup, true)
    }

    /// Like [`submit`](Self::submit) but never starts a new task.
    pub fn join(
        &self,
        key: K,
        waiter: Waiter<T>,
        lookup: impl FnOnce(&K) -> Option<T>,
    ) -> Submission<T> {
        self.submit_inner(key, waiter, lookup, false)
    }

    fn submit_inner(
        &self,
        key: K,
        waiter: Waiter<T>,
        lookup: impl FnOnce(&K) -> Option<T>,
        may_start: bool,
    ) -> Submission<T> {
        let mut tasks = self.tasks.lock();

        if let Some(task) = tasks.get_mut(&key) {
            let id = self.next_id();
            task.waiters.push((id, waiter));
            self.joined.fetch_add(1, Ordering::Relaxed);
            return Submission::Joined(id);
        }

        if let Some(result) = lookup(&key) {
            return Submission::Ready(result, waiter);
        }

        if !may_start {
            return Submission::Refused(waiter);
        }

        let id = self.next_id();
        tasks.insert(
            key,
            InFlight {
                waiters: vec![(id, waiter)],
            },
        );
        self.started.fetch_add(1, Ordering::Relaxed);
        Submission::Started(id)
    }

    /// Withdraw a waiter. The task itself keeps running.
    ///
    /// Returns false if the task already completed or the waiter is unknown.
    pub fn unregister(&self, key: &K, id: WaiterId) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(key) {
            Some(task) => {
                let before = task.waiters.len();
                task.waiters.retain(|(waiter_id, _)| *waiter_id != id);
                task.waiters.len() != before
            }
            None => false,
        }
    }

    /// Finish the task for `key` and notify its waiters in registration order.
    ///
    /// Waiters run on the calling thread, outside the registry lock. Returns
    /// the number of waiters notified.
    pub fn complete(&self, key: &K, result: T) -> usize {
        let task = self.tasks.lock().remove(key);
        let Some(task) = task else {
            return 0;
        };
        let count = task.waiters.len();
        for (_, waiter) in task.waiters {
            waiter(result.clone());
        }
        count
    }

    /// Whether a task for `key` is running.
    pub fn is_running(&self, key: &K) -> bool {
        self.tasks.lock().contains_key(key)
    }

    /// Number of waiters attached to the running task for `key`.
    pub fn waiter_count(&self, key: &K) -> usize {
        self.tasks.lock().get(key).map_or(0, |t| t.waiters.len())
    }

    /// Number of running tasks.
    pub fn in_flight(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Tasks started since creation.
    pub fn started_count(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Submissions that joined a running task since creation.
    pub fn joined_count(&self) -> u64 {
        self.joined.load(Ordering::Relaxed)
    }

    fn next_id(&self) -> WaiterId {
        WaiterId(self.next_waiter.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::Arc;

    fn recorder(log: &Arc<PlMutex<Vec<(u32, i32)>>>, tag: u32) -> Waiter<i32> {
        let log = Arc::clone(log);
        Box::new(move |v| log.lock().push((tag, v)))
    }

    #[test]
    fn test_second_submit_joins() {
        let registry: TaskRegistry<&str, i32> = TaskRegistry::new();
        let log = Arc::new(PlMutex::new(Vec::new()));

        assert!(matches!(
            registry.submit("k", recorder(&log, 1), |_| None),
            Submission::Started(_)
        ));
        assert!(matches!(
            registry.submit("k", recorder(&log, 2), |_| None),
            Submission::Joined(_)
        ));
        assert_eq!(registry.waiter_count(&"k"), 2);
        assert_eq!(registry.in_flight(), 1);

        assert_eq!(registry.complete(&"k", 7), 2);
        assert_eq!(*log.lock(), vec![(1, 7), (2, 7)]);
        assert!(!registry.is_running(&"k"));
        assert_eq!(registry.started_count(), 1);
        assert_eq!(registry.joined_count(), 1);
    }

    #[test]
    fn test_lookup_hit_returns_waiter() {
        let registry: TaskRegistry<&str, i32> = TaskRegistry::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        match registry.submit("k", recorder(&log, 1), |_| Some(3)) {
            Submission::Ready(value, waiter) => waiter(value),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(*log.lock(), vec![(1, 3)]);
        assert_eq!(registry.in_flight(), 0);
    }

    #[test]
    fn test_running_task_wins_over_lookup() {
        let registry: TaskRegistry<&str, i32> = TaskRegistry::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        registry.submit("k", recorder(&log, 1), |_| None);
        let sub = registry.submit("k", recorder(&log, 2), |_| Some(99));
        assert!(matches!(sub, Submission::Joined(_)));
    }

    #[test]
    fn test_join_never_starts() {
        let registry: TaskRegistry<&str, i32> = TaskRegistry::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        assert!(matches!(
            registry.join("k", recorder(&log, 1), |_| None),
            Submission::Refused(_)
        ));
        registry.submit("k", recorder(&log, 2), |_| None);
        assert!(matches!(
            registry.join("k", recorder(&log, 3), |_| None),
            Submission::Joined(_)
        ));
    }

    #[test]
    fn test_unregister_skips_waiter() {
        let registry: TaskRegistry<&str, i32> = TaskRegistry::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        let first = registry.submit("k", recorder(&log, 1), |_| None).waiter_id().unwrap();
        registry.submit("k", recorder(&log, 2), |_| None);

        assert!(registry.unregister(&"k", first));
        assert!(!registry.unregister(&"k", first));
        assert_eq!(registry.complete(&"k", 5), 1);
        assert_eq!(*log.lock(), vec![(2, 5)]);
        assert!(!registry.unregister(&"k", first));
    }

    #[test]
    fn test_complete_unknown_key() {
        let registry: TaskRegistry<&str, i32> = TaskRegistry::new();
        assert_eq!(registry.complete(&"missing", 1), 0);
    }

    #[test]
    fn test_concurrent_submitters_start_once() {
        let registry: Arc<TaskRegistry<u32, i32>> = Arc::new(TaskRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    matches!(
                        registry.submit(1, Box::new(|_| {}), |_| None),
                        Submission::Started(_)
                    )
                })
            })
            .collect();
        let started = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|s| *s)
            .count();
        assert_eq!(started, 1);
        assert_eq!(registry.waiter_count(&1), 16);
    }
}
