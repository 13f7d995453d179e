//! Registry of running instances keyed by connection identity.

use super::handle::{InstanceHandle, InstanceInfo};
use super::provisioner::{Provisioner, RedisProvisioner};
use crate::config::{HarnessConfig, HarnessDefaults};
use crate::error::{HarnessError, Result};
use crate::identity::{ConnectionIdentity, Visibility};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Holds the instance for one identity once provisioning succeeded.
///
/// The slot mutex is held for the whole provisioning sequence, which is what
/// serializes concurrent first acquires of the same identity.
type Slot = Arc<Mutex<Option<InstanceHandle>>>;

/// Concurrent map from [`ConnectionIdentity`] to a running instance.
///
/// `acquire` provisions an instance the first time an identity is requested
/// and hands back the identity unchanged on every later call. The map lock is
/// only held to look up or insert a slot, so provisioning one identity never
/// blocks another.
///
/// Every instance still registered is torn down when the registry is dropped.
pub struct InstanceRegistry {
    provisioner: Arc<dyn Provisioner>,
    slots: Mutex<HashMap<ConnectionIdentity, Slot>>,
}

impl InstanceRegistry {
    /// Create a registry that launches real `redis-server` processes.
    pub fn new(config: HarnessConfig) -> Self {
        Self::with_provisioner(Arc::new(RedisProvisioner::new(config)))
    }

    /// Create a registry around a custom provisioner.
    pub fn with_provisioner(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            provisioner,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry, configured from the environment.
    ///
    /// Its instances are released when the process exits normally.
    pub fn global() -> &'static Arc<InstanceRegistry> {
        super::shutdown::global()
    }

    fn lock_slots(&self) -> Result<MutexGuard<'_, HashMap<ConnectionIdentity, Slot>>> {
        self.slots.lock().map_err(|_| HarnessError::Registry {
            message: "Failed to acquire registry lock".to_string(),
        })
    }

    /// Slot map for teardown paths, which must not fail.
    fn slots_for_teardown(&self) -> MutexGuard<'_, HashMap<ConnectionIdentity, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn existing_slot(&self, identity: &ConnectionIdentity) -> Option<Slot> {
        self.slots_for_teardown().get(identity).cloned()
    }

    /// Remove the map entry for `identity` if it still points at `slot`.
    ///
    /// Called with the slot lock held and the slot empty.
    fn forget_slot(&self, identity: &ConnectionIdentity, slot: &Slot) {
        let mut slots = self.slots_for_teardown();
        if slots
            .get(identity)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(identity);
        }
    }

    /// Ensure an instance is running for `identity` and return the identity.
    ///
    /// If one is already registered this has no side effects. Otherwise the
    /// full provisioning sequence runs; on failure nothing is registered and
    /// the next call tries again.
    pub fn acquire(
        &self,
        identity: ConnectionIdentity,
        visibility: Visibility,
    ) -> Result<ConnectionIdentity> {
        loop {
            let slot = {
                let mut slots = self.lock_slots()?;
                Arc::clone(slots.entry(identity.clone()).or_default())
            };

            // A panic during an earlier provisioning leaves the slot empty, which
            // is a consistent state to retry from.
            let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);

            // A release or failed provisioning may have unmapped this slot while
            // we waited for it; start over with whatever the map holds now.
            let still_mapped = self
                .lock_slots()?
                .get(&identity)
                .is_some_and(|mapped| Arc::ptr_eq(mapped, &slot));
            if !still_mapped {
                continue;
            }

            if current.is_some() {
                debug!("Reusing instance for {}", identity);
                return Ok(identity);
            }

            info!("Provisioning instance for {}", identity);
            match self.provisioner.provision(&identity, visibility) {
                Ok(handle) => {
                    *current = Some(handle);
                    return Ok(identity);
                }
                Err(e) => {
                    self.forget_slot(&identity, &slot);
                    return Err(e);
                }
            }
        }
    }

    /// [`acquire`](Self::acquire) on 127.0.0.1:6379 with a hidden window.
    pub fn acquire_default(&self) -> Result<ConnectionIdentity> {
        self.acquire_port(HarnessDefaults::PORT)
    }

    /// [`acquire`](Self::acquire) on 127.0.0.1 with a hidden window.
    pub fn acquire_port(&self, port: u16) -> Result<ConnectionIdentity> {
        self.acquire(ConnectionIdentity::localhost(port), Visibility::Hidden)
    }

    /// [`acquire`](Self::acquire) on 127.0.0.1 with the server output visible.
    pub fn acquire_port_visible(&self, port: u16) -> Result<ConnectionIdentity> {
        self.acquire(ConnectionIdentity::localhost(port), Visibility::Visible)
    }

    /// [`acquire`](Self::acquire) on tokio's blocking pool.
    pub async fn acquire_async(
        self: &Arc<Self>,
        identity: ConnectionIdentity,
        visibility: Visibility,
    ) -> Result<ConnectionIdentity> {
        let registry = Arc::clone(self);
        tokio::task::spawn_blocking(move || registry.acquire(identity, visibility))
            .await
            .map_err(|e| HarnessError::Other(format!("acquire task failed: {}", e)))?
    }

    /// Stop the instance for `identity` and delete its files.
    ///
    /// Does nothing if no instance is registered. Teardown failures are
    /// logged, never returned.
    pub fn release(&self, identity: &ConnectionIdentity) {
        let Some(slot) = self.existing_slot(identity) else {
            return;
        };
        let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);
        // Dropped under the slot lock so a concurrent acquire cannot start a
        // new server on the same port before this one is gone.
        if let Some(handle) = current.take() {
            info!("Releasing instance for {} (pid {})", identity, handle.pid());
            drop(handle);
        }
        self.forget_slot(identity, &slot);
    }

    /// [`release`](Self::release) on tokio's blocking pool.
    pub async fn release_async(self: &Arc<Self>, identity: ConnectionIdentity) {
        let registry = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || registry.release(&identity)).await {
            tracing::warn!("Release task failed: {}", e);
        }
    }

    /// Release every registered instance.
    pub fn release_all(&self) {
        let identities: Vec<ConnectionIdentity> =
            self.slots_for_teardown().keys().cloned().collect();
        for identity in &identities {
            self.release(identity);
        }
    }

    /// Whether an instance is registered for `identity`.
    pub fn contains(&self, identity: &ConnectionIdentity) -> bool {
        let Some(slot) = self.existing_slot(identity) else {
            return false;
        };
        let occupied = slot.lock().unwrap_or_else(PoisonError::into_inner).is_some();
        occupied
    }

    /// Snapshots of every registered instance, ordered by host and port.
    pub fn instances(&self) -> Vec<InstanceInfo> {
        let slots: Vec<Slot> = self.slots_for_teardown().values().cloned().collect();
        let mut infos: Vec<InstanceInfo> = slots
            .iter()
            .filter_map(|slot| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                    .map(InstanceHandle::info)
            })
            .collect();
        infos.sort_by(|a, b| {
            a.host
                .to_ascii_lowercase()
                .cmp(&b.host.to_ascii_lowercase())
                .then(a.port.cmp(&b.port))
        });
        infos
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.instances().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for InstanceRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::InstanceFiles;
    use std::fs;
    use std::path::PathBuf;
    use std::process::Command;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Condvar};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Blocks each arriving thread until `parties` threads are inside at once.
    struct Rendezvous {
        arrived: Mutex<usize>,
        all_here: Condvar,
        parties: usize,
    }

    impl Rendezvous {
        fn new(parties: usize) -> Self {
            Self {
                arrived: Mutex::new(0),
                all_here: Condvar::new(),
                parties,
            }
        }

        /// Returns false if the other parties did not show up in time.
        fn wait(&self, timeout: Duration) -> bool {
            let mut arrived = self.arrived.lock().unwrap();
            *arrived += 1;
            self.all_here.notify_all();
            let (_arrived, result) = self
                .all_here
                .wait_timeout_while(arrived, timeout, |n| *n < self.parties)
                .unwrap();
            !result.timed_out()
        }
    }

    /// Spawns `sleep` in place of a server and counts provisioning calls.
    struct FakeProvisioner {
        scratch: PathBuf,
        calls: AtomicUsize,
        fail_next: AtomicUsize,
        delay: Duration,
        rendezvous: Option<Rendezvous>,
    }

    impl FakeProvisioner {
        fn new(scratch: &std::path::Path) -> Self {
            Self {
                scratch: scratch.to_path_buf(),
                calls: AtomicUsize::new(0),
                fail_next: AtomicUsize::new(0),
                delay: Duration::ZERO,
                rendezvous: None,
            }
        }

        fn with_rendezvous(mut self, parties: usize) -> Self {
            self.rendezvous = Some(Rendezvous::new(parties));
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Provisioner for FakeProvisioner {
        fn provision(
            &self,
            identity: &ConnectionIdentity,
            _visibility: Visibility,
        ) -> Result<InstanceHandle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            if let Some(rendezvous) = &self.rendezvous {
                if !rendezvous.wait(Duration::from_secs(5)) {
                    return Err(HarnessError::Other(
                        "other provisioning never started".to_string(),
                    ));
                }
            }
            if self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(HarnessError::StartupFailed { exit_code: Some(1) });
            }

            let files = InstanceFiles::allocate(&self.scratch, identity.port());
            fs::write(&files.config_path, "port\n")?;
            fs::write(&files.data_path, "data")?;
            let child = Command::new("sleep").arg("30").spawn()?;
            Ok(InstanceHandle::new(
                identity.clone(),
                child,
                files,
                Duration::from_millis(500),
            ))
        }
    }

    fn registry(provisioner: &Arc<FakeProvisioner>) -> InstanceRegistry {
        InstanceRegistry::with_provisioner(Arc::clone(provisioner) as Arc<dyn Provisioner>)
    }

    #[cfg(unix)]
    #[test]
    fn test_acquire_twice_provisions_once() {
        let temp_dir = TempDir::new().unwrap();
        let provisioner = Arc::new(FakeProvisioner::new(temp_dir.path()));
        let registry = registry(&provisioner);

        let first = registry.acquire_port(6379).unwrap();
        let second = registry.acquire_port(6379).unwrap();

        assert_eq!(first, second);
        assert_eq!(provisioner.calls(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_host_case_shares_instance() {
        let temp_dir = TempDir::new().unwrap();
        let provisioner = Arc::new(FakeProvisioner::new(temp_dir.path()));
        let registry = registry(&provisioner);

        registry
            .acquire(ConnectionIdentity::new("LOCALHOST", 6379), Visibility::Hidden)
            .unwrap();
        registry
            .acquire(ConnectionIdentity::new("localhost", 6379), Visibility::Visible)
            .unwrap();
        registry
            .acquire(ConnectionIdentity::new("localhost", 6380), Visibility::Hidden)
            .unwrap();

        assert_eq!(provisioner.calls(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_concurrent_first_acquire_provisions_once() {
        const CALLERS: usize = 8;
        let temp_dir = TempDir::new().unwrap();
        let provisioner =
            Arc::new(FakeProvisioner::new(temp_dir.path()).with_delay(Duration::from_millis(200)));
        let registry = Arc::new(registry(&provisioner));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let results: Vec<ConnectionIdentity> = (0..CALLERS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.acquire_port(6400).unwrap()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        assert_eq!(provisioner.calls(), 1);
        assert!(results.iter().all(|id| *id == ConnectionIdentity::localhost(6400)));
    }

    #[cfg(unix)]
    #[test]
    fn test_different_identities_do_not_block_each_other() {
        let temp_dir = TempDir::new().unwrap();
        // Each provisioning waits until the other one is running too, so this
        // only succeeds if both are in flight at the same time.
        let provisioner = Arc::new(FakeProvisioner::new(temp_dir.path()).with_rendezvous(2));
        let registry = Arc::new(registry(&provisioner));

        let handles: Vec<_> = [6379u16, 6380]
            .into_iter()
            .map(|port| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.acquire_port(port))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }

        assert_eq!(provisioner.calls(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_release_removes_map_entry() {
        let temp_dir = TempDir::new().unwrap();
        let provisioner = Arc::new(FakeProvisioner::new(temp_dir.path()));
        let registry = registry(&provisioner);

        for port in 6379..6383 {
            let identity = registry.acquire_port(port).unwrap();
            registry.release(&identity);
        }

        assert!(registry.slots_for_teardown().is_empty());
        assert_eq!(provisioner.calls(), 4);
    }

    #[test]
    fn test_failed_provisioning_removes_map_entry() {
        let temp_dir = TempDir::new().unwrap();
        let provisioner = Arc::new(FakeProvisioner::new(temp_dir.path()));
        provisioner.fail_next.store(1, Ordering::SeqCst);
        let registry = registry(&provisioner);

        assert!(registry.acquire_port(6379).is_err());
        assert!(registry.slots_for_teardown().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_waiter_retries_after_failed_provisioning() {
        let temp_dir = TempDir::new().unwrap();
        let provisioner =
            Arc::new(FakeProvisioner::new(temp_dir.path()).with_delay(Duration::from_millis(200)));
        provisioner.fail_next.store(1, Ordering::SeqCst);
        let registry = Arc::new(registry(&provisioner));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.acquire_port(6390)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // One caller sees the failure, the other provisions afresh.
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(provisioner.calls(), 2);
        assert!(registry.contains(&ConnectionIdentity::localhost(6390)));
        assert_eq!(registry.slots_for_teardown().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_provisioning_is_retried() {
        let temp_dir = TempDir::new().unwrap();
        let provisioner = Arc::new(FakeProvisioner::new(temp_dir.path()));
        provisioner.fail_next.store(1, Ordering::SeqCst);
        let registry = registry(&provisioner);
        let identity = ConnectionIdentity::localhost(6379);

        let err = registry.acquire_port(6379).unwrap_err();
        assert!(err.is_provisioning_failure());
        assert!(!registry.contains(&identity));
        assert!(registry.is_empty());

        registry.acquire_port(6379).unwrap();
        assert_eq!(provisioner.calls(), 2);
        assert!(registry.contains(&identity));
    }

    #[cfg(unix)]
    #[test]
    fn test_release_cleans_up_and_allows_fresh_instance() {
        let temp_dir = TempDir::new().unwrap();
        let provisioner = Arc::new(FakeProvisioner::new(temp_dir.path()));
        let registry = registry(&provisioner);
        let identity = registry.acquire_port(6379).unwrap();

        let info = registry.instances().pop().unwrap();
        assert!(info.config_path.exists());
        assert!(info.data_path.exists());

        registry.release(&identity);

        assert!(!info.config_path.exists());
        assert!(!info.data_path.exists());
        assert!(!crate::platform::is_process_alive(info.pid));
        assert!(!registry.contains(&identity));

        registry.acquire_port(6379).unwrap();
        assert_eq!(provisioner.calls(), 2);
        let fresh = registry.instances().pop().unwrap();
        assert_ne!(fresh.config_path, info.config_path);
    }

    #[test]
    fn test_release_unknown_identity_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let provisioner = Arc::new(FakeProvisioner::new(temp_dir.path()));
        let registry = registry(&provisioner);

        registry.release(&ConnectionIdentity::localhost(6379));
        registry.release(&ConnectionIdentity::localhost(6379));
        assert!(registry.is_empty());
        assert_eq!(provisioner.calls(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_release_all_and_drop() {
        let temp_dir = TempDir::new().unwrap();
        let provisioner = Arc::new(FakeProvisioner::new(temp_dir.path()));
        let registry = registry(&provisioner);
        registry.acquire_port(6379).unwrap();
        registry.acquire_port(6380).unwrap();
        let infos = registry.instances();
        assert_eq!(infos.iter().map(|i| i.port).collect::<Vec<_>>(), vec![6379, 6380]);

        registry.release_all();
        assert!(registry.is_empty());
        assert!(infos.iter().all(|i| !i.config_path.exists()));

        registry.acquire_port(6381).unwrap();
        let remaining = registry.instances().pop().unwrap();
        drop(registry);
        assert!(!remaining.config_path.exists());
        assert!(!crate::platform::is_process_alive(remaining.pid));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_acquire_async() {
        let temp_dir = TempDir::new().unwrap();
        let provisioner = Arc::new(FakeProvisioner::new(temp_dir.path()));
        let registry = Arc::new(registry(&provisioner));

        let identity = registry
            .acquire_async(ConnectionIdentity::localhost(6379), Visibility::Hidden)
            .await
            .unwrap();
        assert!(registry.contains(&identity));

        registry.release_async(identity.clone()).await;
        assert!(!registry.contains(&identity));
    }
}
