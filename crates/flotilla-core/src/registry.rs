//! Instance registry.

use crate::error::{CoreError, Result};
use crate::instance::Instance;
use crate::lifecycle::LifecycleState;
use std::collections::{HashMap, HashSet};
use tokio::sync::{Notify, RwLock};

#[derive(Debug, Default)]
struct Entries {
    instances: HashMap<String, Instance>,
    /// Ids reserved by a create in flight.
    pending: HashSet<String>,
    /// Creates in flight per id, reserved or not.
    creating: HashMap<String, usize>,
    sealed: bool,
}

/// What [`Registry::seal`] found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sealed {
    /// Registered ids, sorted
    pub registered: Vec<String>,
    /// Ids with a create still in flight, sorted
    pub creating: Vec<String>,
}

/// Map of id to registered [`Instance`], guarded by a single lock.
///
/// Every operation is a short in-memory critical section. No runtime call
/// is ever awaited while the lock is held.
#[derive(Debug, Default)]
pub struct Registry {
    entries: RwLock<Entries>,
    /// Signalled whenever the last in-flight create finishes.
    settled: Notify,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a started instance.
    ///
    /// # Errors
    /// [`CoreError::AlreadyExists`] if the id is taken,
    /// [`CoreError::Closed`] once the registry is sealed.
    pub async fn insert(&self, instance: Instance) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.sealed {
            return Err(CoreError::Closed);
        }
        if entries.instances.contains_key(instance.id()) {
            return Err(CoreError::AlreadyExists(instance.id().to_string()));
        }
        entries
            .instances
            .insert(instance.id().to_string(), instance);
        Ok(())
    }

    /// Copy of the instance registered under `id`.
    pub async fn lookup(&self, id: &str) -> Result<Instance> {
        self.entries
            .read()
            .await
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    /// Remove and return the instance registered under `id`.
    pub async fn remove(&self, id: &str) -> Result<Instance> {
        self.entries
            .write()
            .await
            .instances
            .remove(id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    /// Snapshot of all registered instances, sorted by id.
    pub async fn list(&self) -> Vec<Instance> {
        let mut instances: Vec<Instance> =
            self.entries.read().await.instances.values().cloned().collect();
        instances.sort_by(|a, b| a.id().cmp(b.id()));
        instances
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.instances.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.instances.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Start tracking a create for `id`.
    ///
    /// With `reserve`, the id is also held so a second create for it fails
    /// fast. Every successful call must be paired with
    /// [`finish_create`](Self::finish_create).
    ///
    /// # Errors
    /// [`CoreError::AlreadyExists`] if `id` is registered or reserved,
    /// [`CoreError::Closed`] once sealed.
    pub async fn begin_create(&self, id: &str, reserve: bool) -> Result<()> {
        let mut entries = self.entries.write().await;
        Self::check_vacant(&entries, id)?;
        if reserve {
            entries.pending.insert(id.to_string());
        }
        *entries.creating.entry(id.to_string()).or_default() += 1;
        Ok(())
    }

    /// Stop tracking a create started by [`begin_create`](Self::begin_create).
    pub async fn finish_create(&self, id: &str, reserved: bool) {
        let idle = {
            let mut entries = self.entries.write().await;
            if reserved {
                entries.pending.remove(id);
            }
            if let Some(count) = entries.creating.get_mut(id) {
                *count -= 1;
                if *count == 0 {
                    entries.creating.remove(id);
                }
            }
            entries.creating.is_empty()
        };
        if idle {
            self.settled.notify_waiters();
        }
    }

    /// Ids with a create in flight, sorted.
    pub async fn creating(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().await.creating.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Wait until no create is in flight.
    pub async fn wait_creates(&self) {
        loop {
            // Registered before the check so a finish in between is not missed.
            let settled = self.settled.notified();
            if self.entries.read().await.creating.is_empty() {
                return;
            }
            settled.await;
        }
    }

    /// Move a `Running` instance to `Stopping` and return a copy.
    ///
    /// # Errors
    /// [`CoreError::NotFound`] if absent, [`CoreError::InvalidState`] if a
    /// teardown already claimed it.
    pub async fn begin_teardown(&self, id: &str) -> Result<Instance> {
        let mut entries = self.entries.write().await;
        let instance = entries
            .instances
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;

        let actual = instance.state();
        if actual != LifecycleState::Running {
            return Err(CoreError::InvalidState {
                id: id.to_string(),
                expected: LifecycleState::Running,
                actual,
            });
        }
        instance.lifecycle_mut().advance(LifecycleState::Stopping)?;
        Ok(instance.clone())
    }

    /// Refuse further creates and inserts. Returns the ids registered
    /// right now and those with a create still in flight.
    pub async fn seal(&self) -> Sealed {
        let mut entries = self.entries.write().await;
        entries.sealed = true;
        let mut registered: Vec<String> = entries.instances.keys().cloned().collect();
        let mut creating: Vec<String> = entries.creating.keys().cloned().collect();
        registered.sort();
        creating.sort();
        Sealed {
            registered,
            creating,
        }
    }

    pub async fn is_sealed(&self) -> bool {
        self.entries.read().await.sealed
    }

    fn check_vacant(entries: &Entries, id: &str) -> Result<()> {
        if entries.sealed {
            return Err(CoreError::Closed);
        }
        if entries.instances.contains_key(id) || entries.pending.contains(id) {
            return Err(CoreError::AlreadyExists(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::RuntimeHandles;
    use crate::lifecycle::Lifecycle;
    use flotilla_runtime::{ResourceLimits, SandboxHandle, UnitHandle};

    fn running(id: &str) -> Instance {
        let mut lifecycle = Lifecycle::new(id);
        for next in [
            LifecycleState::Pulling,
            LifecycleState::SandboxCreated,
            LifecycleState::Starting,
            LifecycleState::Running,
        ] {
            lifecycle.advance(next).unwrap();
        }
        let handles = RuntimeHandles {
            sandbox: SandboxHandle {
                instance_id: id.into(),
                key: format!("{id}-1"),
                namespace: "test".into(),
            },
            unit: UnitHandle {
                key: format!("{id}-1/unit"),
                sandbox_key: format!("{id}-1"),
            },
        };
        Instance::new("alpine".into(), handles, ResourceLimits::default(), lifecycle)
    }

    #[tokio::test]
    async fn test_insert_lookup_remove() {
        let registry = Registry::new();
        registry.insert(running("vm-1")).await.unwrap();

        assert!(registry.contains("vm-1").await);
        assert_eq!(registry.lookup("vm-1").await.unwrap().image(), "alpine");
        assert_eq!(registry.len().await, 1);

        registry.remove("vm-1").await.unwrap();
        assert!(registry.is_empty().await);
        assert!(matches!(
            registry.remove("vm-1").await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_insert() {
        let registry = Registry::new();
        registry.insert(running("vm-1")).await.unwrap();
        let err = registry.insert(running("vm-1")).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(id) if id == "vm-1"));
    }

    #[tokio::test]
    async fn test_list_is_a_sorted_snapshot() {
        let registry = Registry::new();
        for id in ["vm-b", "vm-a", "vm-c"] {
            registry.insert(running(id)).await.unwrap();
        }
        let snapshot = registry.list().await;
        registry.remove("vm-a").await.unwrap();

        let ids: Vec<&str> = snapshot.iter().map(|i| i.id()).collect();
        assert_eq!(ids, ["vm-a", "vm-b", "vm-c"]);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_reservation() {
        let registry = Registry::new();
        registry.begin_create("vm-1", true).await.unwrap();
        assert!(matches!(
            registry.begin_create("vm-1", true).await,
            Err(CoreError::AlreadyExists(_))
        ));
        assert!(registry.begin_create("vm-1", false).await.is_err());

        registry.finish_create("vm-1", true).await;
        registry.begin_create("vm-1", true).await.unwrap();
        registry.finish_create("vm-1", true).await;

        registry.insert(running("vm-1")).await.unwrap();
        assert!(registry.begin_create("vm-1", true).await.is_err());
    }

    #[tokio::test]
    async fn test_unreserved_creates_are_counted() {
        let registry = Registry::new();
        registry.begin_create("vm-1", false).await.unwrap();
        registry.begin_create("vm-1", false).await.unwrap();
        assert_eq!(registry.creating().await, ["vm-1"]);

        registry.finish_create("vm-1", false).await;
        assert_eq!(registry.creating().await, ["vm-1"]);
        registry.finish_create("vm-1", false).await;
        assert!(registry.creating().await.is_empty());
    }

    #[tokio::test]
    async fn test_wait_creates_returns_when_last_create_finishes() {
        let registry = std::sync::Arc::new(Registry::new());
        registry.wait_creates().await;

        registry.begin_create("vm-1", true).await.unwrap();
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_creates().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        registry.finish_create("vm-1", true).await;
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
    }

    #[tokio::test]
    async fn test_begin_teardown_claims_once() {
        let registry = Registry::new();
        registry.insert(running("vm-1")).await.unwrap();

        let claimed = registry.begin_teardown("vm-1").await.unwrap();
        assert_eq!(claimed.state(), LifecycleState::Stopping);

        let err = registry.begin_teardown("vm-1").await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidState { actual: LifecycleState::Stopping, .. }
        ));
        assert!(matches!(
            registry.begin_teardown("missing").await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_seal_refuses_new_work() {
        let registry = Registry::new();
        registry.insert(running("vm-2")).await.unwrap();
        registry.insert(running("vm-1")).await.unwrap();

        registry.begin_create("vm-4", false).await.unwrap();

        let sealed = registry.seal().await;
        assert_eq!(sealed.registered, ["vm-1", "vm-2"]);
        assert_eq!(sealed.creating, ["vm-4"]);
        assert!(registry.is_sealed().await);
        assert!(matches!(
            registry.insert(running("vm-3")).await,
            Err(CoreError::Closed)
        ));
        assert!(matches!(
            registry.begin_create("vm-3", true).await,
            Err(CoreError::Closed)
        ));
        // Existing entries stay reachable for teardown.
        assert!(registry.begin_teardown("vm-1").await.is_ok());
    }
}
