// Registry - wires the allocator, stats and store over one storage handle
//
// Every binary builds exactly one Registry and hands out controllers from it.
// The counters are owned here; nothing else holds them.

use crate::allocator::{self, IdAllocator};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::notify::{self, PendingQueueNotifier, PendingRegistration, SharedNotifier};
use crate::stats::{self, StatsAggregator};
use crate::storage::{AuditEvent, MemoryStore, SharedStore, SqliteStore};
use crate::store::{RegistrationStore, StatsSnapshot};
use crate::workflow::WorkflowController;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct Registry {
    storage: SharedStore,
    clock: SharedClock,
    notifier: SharedNotifier,
    require_photo: bool,
    allocator: Arc<IdAllocator>,
    stats: Arc<StatsAggregator>,
    store: Arc<RegistrationStore>,
}

impl Registry {
    pub fn new(
        storage: SharedStore,
        config: &Config,
        clock: SharedClock,
        notifier: SharedNotifier,
    ) -> Self {
        Registry {
            allocator: Arc::new(IdAllocator::new(storage.clone(), &config.id_prefix)),
            stats: Arc::new(StatsAggregator::new(storage.clone(), clock.clone())),
            store: Arc::new(RegistrationStore::new(storage.clone())),
            require_photo: config.require_photo,
            storage,
            clock,
            notifier,
        }
    }

    /// SQLite-backed registry with the wall clock and the pending-review queue
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let storage: SharedStore = Arc::new(
            SqliteStore::open(&config.db_path)
                .with_context(|| format!("Failed to open {}", config.db_path.display()))?,
        );
        Ok(Self::with_defaults(storage, config))
    }

    /// Throwaway registry; nothing survives the process
    pub fn in_memory(config: &Config) -> Self {
        Self::with_defaults(Arc::new(MemoryStore::new()), config)
    }

    fn with_defaults(storage: SharedStore, config: &Config) -> Self {
        let notifier = Arc::new(PendingQueueNotifier::new(storage.clone(), config.notify_delay));
        Self::new(storage, config, Arc::new(SystemClock), notifier)
    }

    /// Fresh controller for one applicant
    pub fn start_registration(&self) -> WorkflowController {
        WorkflowController::new(
            self.allocator.clone(),
            self.store.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            self.require_photo,
        )
    }

    /// Clear the statistics and the ID counter together; member records stay
    pub fn reset_statistics(&self) -> Result<()> {
        let now = self.clock.now();
        self.storage.update(&mut |batch| {
            stats::clear(batch);
            allocator::clear(batch);
            batch.audit(AuditEvent::new(
                "statistics_reset",
                "registry",
                "statistics",
                now,
                serde_json::json!({}),
                "admin",
            ));
            Ok(())
        })?;

        info!("Registration statistics and member counter reset");
        Ok(())
    }

    pub fn export_snapshot(&self) -> Result<StatsSnapshot> {
        self.store.export_snapshot(self.clock.now())
    }

    /// Write the dated snapshot file into `dir`
    pub fn write_snapshot(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let snapshot = self.export_snapshot()?;
        let path = dir.join(snapshot.file_name());

        std::fs::write(&path, snapshot.to_json_pretty()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!(path = %path.display(), total_members = snapshot.total_members, "Statistics exported");
        Ok(path)
    }

    pub fn pending(&self) -> Result<Vec<PendingRegistration>> {
        notify::pending(self.storage.as_ref())
    }

    pub fn reset_history(&self) -> Result<Vec<AuditEvent>> {
        self.storage.events_for("registry", "statistics")
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn store(&self) -> &RegistrationStore {
        &self.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::member::fixtures::applicant;
    use crate::member::PaymentMethod;
    use crate::stats::PeriodKind;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn registry() -> Registry {
        let storage: SharedStore = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap()));
        let notifier = Arc::new(PendingQueueNotifier::new(storage.clone(), Duration::ZERO));
        Registry::new(storage, &Config::default(), clock, notifier)
    }

    fn register(registry: &Registry, name: &str) -> String {
        let mut wf = registry.start_registration();
        wf.submit(applicant(name)).unwrap();
        wf.confirm_payment(PaymentMethod::Card).unwrap().id.to_string()
    }

    #[tokio::test]
    async fn test_reset_keeps_members() {
        let registry = registry();
        register(&registry, "Ama Mensah");
        register(&registry, "Kofi Boateng");

        registry.reset_statistics().unwrap();

        assert_eq!(registry.allocator().current().unwrap(), 0);
        assert_eq!(registry.stats().query(PeriodKind::Day, "2024-03-15").unwrap(), 0);
        assert!(registry.stats().state().unwrap().yearly.is_empty());
        assert_eq!(registry.store().count().unwrap(), 2);
        assert_eq!(registry.reset_history().unwrap().len(), 1);

        let snapshot = registry.export_snapshot().unwrap();
        assert_eq!(snapshot.total_members, 2);
        assert_eq!(snapshot.this_year_registrations, 0);
    }

    #[tokio::test]
    async fn test_allocation_after_reset_collides_then_recovers() {
        let registry = registry();
        register(&registry, "Ama Mensah");
        registry.reset_statistics().unwrap();

        let mut wf = registry.start_registration();
        wf.submit(applicant("Kofi Boateng")).unwrap();

        // Counter restarts at 1, which is taken
        assert!(wf.confirm_payment(PaymentMethod::Card).is_err());
        assert_eq!(wf.confirm_payment(PaymentMethod::Card).unwrap().id.as_str(), "SGC-0002");
    }

    #[tokio::test]
    async fn test_controllers_are_independent() {
        let registry = registry();
        let mut first = registry.start_registration();
        let mut second = registry.start_registration();

        first.submit(applicant("Ama Mensah")).unwrap();
        second.submit(applicant("Kofi Boateng")).unwrap();
        first.cancel().unwrap();

        assert_eq!(second.confirm_payment(PaymentMethod::Mobile).unwrap().id.as_str(), "SGC-0001");
        assert_eq!(registry.store().count().unwrap(), 1);
    }
}
