//! Keyed bookkeeping of in-flight cancellable tasks.
use crate::error::CoreError;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use tokio::task::JoinHandle;

/// Composite key: a task group plus an identity unique within that group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey<G, I> {
    pub group: G,
    pub identity: I,
}

impl<G, I> TaskKey<G, I> {
    pub fn new(group: G, identity: I) -> Self {
        Self { group, identity }
    }
}

/// Tracks at most one task handle per [`TaskKey`].
///
/// Not synchronised: the owner checks [`has`](Self::has) and calls
/// [`register`](Self::register) on the same turn, so the pair is atomic with
/// respect to completions, which are applied by the same owner.
pub struct TaskRegistry<G, I> {
    tasks: HashMap<TaskKey<G, I>, JoinHandle<()>>,
}

impl<G, I> Default for TaskRegistry<G, I> {
    fn default() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }
}

impl<G, I> TaskRegistry<G, I>
where
    G: Copy + Eq + Hash + Debug,
    I: Copy + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, key: &TaskKey<G, I>) -> bool {
        self.tasks.contains_key(key)
    }

    /// Stores `handle` under `key`.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateKey`] if `key` is already registered. The rejected
    /// handle is aborted so it cannot run untracked.
    pub fn register(&mut self, key: TaskKey<G, I>, handle: JoinHandle<()>) -> Result<(), CoreError> {
        if self.tasks.contains_key(&key) {
            handle.abort();
            return Err(CoreError::DuplicateKey(format!("{:?}", key)));
        }
        self.tasks.insert(key, handle);
        Ok(())
    }

    /// Drops the registration for `key`. Returns whether one existed.
    pub fn remove(&mut self, key: &TaskKey<G, I>) -> bool {
        self.tasks.remove(key).is_some()
    }

    /// Aborts every registered task and clears the registry.
    ///
    /// Returns the number of tasks that were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.tasks.len();
        for (key, handle) in self.tasks.drain() {
            handle.abort();
            tracing::trace!(key = ?key, "Cancelled task");
        }
        count
    }

    pub fn keys(&self) -> impl Iterator<Item = &TaskKey<G, I>> {
        self.tasks.keys()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Orphaned tasks are aborted when the registry goes away.
impl<G, I> Drop for TaskRegistry<G, I> {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::sync::oneshot;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Group {
        A,
        B,
    }

    /// Spawns a task that parks forever; the returned receiver resolves with
    /// `Err` once the task (and with it the sender) is dropped.
    fn parked_task() -> (JoinHandle<()>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        (handle, rx)
    }

    #[tokio::test]
    async fn test_register_and_has() {
        let mut registry = TaskRegistry::new();
        let key = TaskKey::new(Group::A, 1usize);
        assert!(!registry.has(&key));

        let (handle, _rx) = parked_task();
        registry.register(key, handle).unwrap();
        assert!(registry.has(&key));
        assert!(!registry.has(&TaskKey::new(Group::B, 1)));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected_and_aborted() {
        let mut registry = TaskRegistry::new();
        let key = TaskKey::new(Group::A, 3usize);

        let (first, _first_rx) = parked_task();
        registry.register(key, first).unwrap();

        let (second, second_rx) = parked_task();
        let err = registry.register(key, second).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey(_)));
        assert_eq!(registry.len(), 1);
        // The rejected task was aborted, dropping its sender
        assert!(second_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_remove_is_noop_when_absent() {
        let mut registry: TaskRegistry<Group, usize> = TaskRegistry::new();
        assert!(!registry.remove(&TaskKey::new(Group::A, 9)));
    }

    #[tokio::test]
    async fn test_cancel_all_aborts_and_clears() {
        let mut registry = TaskRegistry::new();
        let (a, a_rx) = parked_task();
        let (b, b_rx) = parked_task();
        registry.register(TaskKey::new(Group::A, 1usize), a).unwrap();
        registry.register(TaskKey::new(Group::B, 1usize), b).unwrap();

        assert_eq!(registry.cancel_all(), 2);
        assert!(registry.is_empty());
        assert!(a_rx.await.is_err());
        assert!(b_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_drop_aborts_tasks() {
        let (handle, rx) = parked_task();
        {
            let mut registry = TaskRegistry::new();
            registry.register(TaskKey::new(Group::A, 0usize), handle).unwrap();
        }
        assert!(rx.await.is_err());
    }

    proptest! {
        #[test]
        fn prop_len_matches_distinct_keys(ids in proptest::collection::vec(0usize..16, 0..32)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let mut registry = TaskRegistry::new();
                let mut distinct = std::collections::HashSet::new();
                for id in &ids {
                    let key = TaskKey::new(Group::A, *id);
                    if !registry.has(&key) {
                        let (handle, _rx) = parked_task();
                        registry.register(key, handle).unwrap();
                    }
                    distinct.insert(*id);
                }
                prop_assert_eq!(registry.len(), distinct.len());
                prop_assert_eq!(registry.cancel_all(), distinct.len());
                prop_assert!(registry.is_empty());
                Ok(())
            })?;
        }
    }
}
