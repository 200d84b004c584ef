// Admin notification - fire-and-forget after a member is issued
//
// The workflow never awaits a notification. It spawns the send on the tokio
// runtime and only keeps an advisory status around for the caller to show.

use crate::error::{RegistryError, Result};
use crate::member::MemberRecord;
use crate::storage::{read_json, transact, KeyValueStore, SharedStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const PENDING_KEY: &str = "pendingRegistrations";

#[async_trait]
pub trait AdminNotifier: Send + Sync {
    /// Tell the administrators about a new member. `registered_at` is ISO-8601.
    async fn notify(&self, record: &MemberRecord, registered_at: &str) -> Result<()>;
}

pub type SharedNotifier = Arc<dyn AdminNotifier>;

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum NotificationStatus {
    NotSent,
    Pending,
    Sent,
    Failed(String),
}

impl NotificationStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, NotificationStatus::Failed(_))
    }
}

/// Advisory view of one detached notification
#[derive(Debug)]
pub struct NotificationHandle {
    status: Arc<Mutex<NotificationStatus>>,
    task: Option<JoinHandle<()>>,
}

impl NotificationHandle {
    pub fn status(&self) -> NotificationStatus {
        read_status(&self.status)
    }

    /// Wait for the send to finish. Only for callers that want the outcome
    /// (e.g. a CLI about to exit); the workflow itself never calls this.
    pub async fn settle(&mut self) -> NotificationStatus {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                write_status(&self.status, NotificationStatus::Failed(e.to_string()));
            }
        }
        self.status()
    }
}

fn read_status(status: &Mutex<NotificationStatus>) -> NotificationStatus {
    match status.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn write_status(status: &Mutex<NotificationStatus>, next: NotificationStatus) {
    match status.lock() {
        Ok(mut guard) => *guard = next,
        Err(poisoned) => *poisoned.into_inner() = next,
    }
}

/// Spawn the notification as a detached task on the current tokio runtime
pub fn dispatch(notifier: SharedNotifier, record: MemberRecord) -> NotificationHandle {
    let status = Arc::new(Mutex::new(NotificationStatus::Pending));

    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(member_id = %record.id, error = %e, "No async runtime; admin notification not sent");
            write_status(&status, NotificationStatus::Failed(e.to_string()));
            return NotificationHandle { status, task: None };
        }
    };

    let task_status = status.clone();
    let task = runtime.spawn(async move {
        let registered_at = record.registered_at_iso();
        let next = match notifier.notify(&record, &registered_at).await {
            Ok(()) => {
                info!(member_id = %record.id, "Admin notified");
                NotificationStatus::Sent
            }
            Err(e) => {
                warn!(member_id = %record.id, error = %e, "Admin notification failed");
                NotificationStatus::Failed(e.to_string())
            }
        };
        write_status(&task_status, next);
    });

    NotificationHandle {
        status,
        task: Some(task),
    }
}

// ============================================================================
// PENDING QUEUE
// ============================================================================

/// Registration waiting for admin review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRegistration {
    #[serde(flatten)]
    pub record: MemberRecord,
    pub registration_date: String,
}

/// Queues each registration for admin review, then waits out a simulated
/// delivery delay.
pub struct PendingQueueNotifier {
    store: SharedStore,
    delay: Duration,
}

impl PendingQueueNotifier {
    pub fn new(store: SharedStore, delay: Duration) -> Self {
        PendingQueueNotifier { store, delay }
    }
}

#[async_trait]
impl AdminNotifier for PendingQueueNotifier {
    async fn notify(&self, record: &MemberRecord, registered_at: &str) -> Result<()> {
        let entry = PendingRegistration {
            record: record.clone(),
            registration_date: registered_at.to_string(),
        };

        transact(self.store.as_ref(), |batch| {
            let mut queue: Vec<PendingRegistration> =
                batch.get_json(PENDING_KEY)?.unwrap_or_default();
            queue.push(entry);
            batch.put_json(PENDING_KEY, &queue)
        })
        .map_err(|e| RegistryError::NotificationFailure(e.to_string()))?;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        Ok(())
    }
}

/// Registrations queued for admin review, oldest first
pub fn pending(store: &dyn KeyValueStore) -> Result<Vec<PendingRegistration>> {
    Ok(read_json(store, PENDING_KEY)?.unwrap_or_default())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Notifier that always fails
    pub struct FailingNotifier;

    #[async_trait]
    impl AdminNotifier for FailingNotifier {
        async fn notify(&self, _record: &MemberRecord, _registered_at: &str) -> Result<()> {
            Err(RegistryError::NotificationFailure("SMTP relay refused connection".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FailingNotifier;
    use super::*;
    use crate::member::fixtures::applicant;
    use crate::member::{MemberId, PaymentMethod};
    use crate::storage::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn record() -> MemberRecord {
        MemberRecord::from_applicant(
            MemberId::format("SGC", 1),
            &applicant("Ama Mensah"),
            PaymentMethod::Mobile,
            Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_pending_queue_records_registration() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let notifier = Arc::new(PendingQueueNotifier::new(store.clone(), Duration::ZERO));

        let mut handle = dispatch(notifier, record());
        assert_eq!(handle.settle().await, NotificationStatus::Sent);

        let queue = pending(store.as_ref()).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].record.id.as_str(), "SGC-0001");
        assert_eq!(queue[0].registration_date, "2024-03-15T09:30:00.000Z");

        let raw: serde_json::Value =
            serde_json::from_str(&store.get(PENDING_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(raw[0]["id"], "SGC-0001");
        assert_eq!(raw[0]["registrationDate"], "2024-03-15T09:30:00.000Z");
    }

    #[tokio::test]
    async fn test_failure_is_advisory() {
        let mut handle = dispatch(Arc::new(FailingNotifier), record());
        let status = handle.settle().await;

        assert!(status.is_failed());
        assert_eq!(handle.status(), status);
    }

    #[tokio::test]
    async fn test_status_pending_until_delay_elapses() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let notifier = Arc::new(PendingQueueNotifier::new(store, Duration::from_millis(50)));

        let mut handle = dispatch(notifier, record());
        assert_eq!(handle.status(), NotificationStatus::Pending);

        assert_eq!(handle.settle().await, NotificationStatus::Sent);
    }

    #[test]
    fn test_dispatch_without_runtime_fails_softly() {
        let handle = dispatch(Arc::new(FailingNotifier), record());
        assert!(handle.status().is_failed());
    }
}
