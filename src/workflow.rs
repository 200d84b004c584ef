// Registration workflow - one applicant's journey from form to member ID
//
//   Collecting --submit--> AwaitingPayment --confirm_payment--> Issued
//        \                        |
//         `------cancel-----------`-------------------------> Cancelled
//
// Issued and Cancelled are terminal. A failed confirmation leaves the
// controller in AwaitingPayment so the applicant can retry.

use crate::allocator::IdAllocator;
use crate::clock::SharedClock;
use crate::error::{RegistryError, Result};
use crate::member::{ApplicantInput, MemberRecord, PaymentMethod};
use crate::notify::{self, NotificationHandle, NotificationStatus, SharedNotifier};
use crate::store::RegistrationStore;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Collecting,
    AwaitingPayment,
    Issued,
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Issued | WorkflowState::Cancelled)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Collecting => "collecting",
            WorkflowState::AwaitingPayment => "awaiting payment",
            WorkflowState::Issued => "issued",
            WorkflowState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Issued member plus the form it came from (the photo is rendered on the card)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssuedRegistration {
    pub record: MemberRecord,
    pub applicant: ApplicantInput,
}

enum Phase {
    Collecting,
    AwaitingPayment(ApplicantInput),
    Issued(IssuedRegistration),
    Cancelled,
}

pub struct WorkflowController {
    allocator: Arc<IdAllocator>,
    store: Arc<RegistrationStore>,
    notifier: SharedNotifier,
    clock: SharedClock,
    require_photo: bool,
    phase: Phase,
    notification: Option<NotificationHandle>,
}

impl WorkflowController {
    pub fn new(
        allocator: Arc<IdAllocator>,
        store: Arc<RegistrationStore>,
        notifier: SharedNotifier,
        clock: SharedClock,
        require_photo: bool,
    ) -> Self {
        WorkflowController {
            allocator,
            store,
            notifier,
            clock,
            require_photo,
            phase: Phase::Collecting,
            notification: None,
        }
    }

    pub fn state(&self) -> WorkflowState {
        match self.phase {
            Phase::Collecting => WorkflowState::Collecting,
            Phase::AwaitingPayment(_) => WorkflowState::AwaitingPayment,
            Phase::Issued(_) => WorkflowState::Issued,
            Phase::Cancelled => WorkflowState::Cancelled,
        }
    }

    /// Accept the completed form and move on to payment
    pub fn submit(&mut self, applicant: ApplicantInput) -> Result<()> {
        if !matches!(self.phase, Phase::Collecting) {
            return Err(self.invalid("submit"));
        }

        applicant
            .validate(self.require_photo)
            .map_err(RegistryError::Validation)?;

        self.phase = Phase::AwaitingPayment(applicant);
        Ok(())
    }

    /// Issue the member ID, persist the record, and notify the admins
    pub fn confirm_payment(&mut self, method: PaymentMethod) -> Result<MemberRecord> {
        let applicant = match &self.phase {
            Phase::AwaitingPayment(applicant) => applicant.clone(),
            _ => return Err(self.invalid("confirm payment")),
        };

        let record = match self.persist(&applicant, method) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Payment confirmation failed; registration still awaiting payment");
                return Err(e);
            }
        };

        // Past this point the record is committed; nothing below can fail
        self.notification = Some(notify::dispatch(self.notifier.clone(), record.clone()));
        info!(
            member_id = %record.id,
            payment_method = record.payment_method.as_str(),
            "Membership issued"
        );

        self.phase = Phase::Issued(IssuedRegistration {
            record: record.clone(),
            applicant,
        });
        Ok(record)
    }

    fn persist(&self, applicant: &ApplicantInput, method: PaymentMethod) -> Result<MemberRecord> {
        let now = self.clock.now();
        self.store.register(&self.allocator, |id| {
            MemberRecord::from_applicant(id, applicant, method, now)
        })
    }

    /// Abandon the registration; nothing is persisted
    pub fn cancel(&mut self) -> Result<()> {
        match self.phase {
            Phase::Collecting | Phase::AwaitingPayment(_) => {
                self.phase = Phase::Cancelled;
                Ok(())
            }
            _ => Err(self.invalid("cancel")),
        }
    }

    pub fn issued(&self) -> Option<&IssuedRegistration> {
        match &self.phase {
            Phase::Issued(issued) => Some(issued),
            _ => None,
        }
    }

    /// Advisory only; a failed notification never undoes the issuance
    pub fn notification_status(&self) -> NotificationStatus {
        self.notification
            .as_ref()
            .map_or(NotificationStatus::NotSent, NotificationHandle::status)
    }

    /// Wait for the detached notification to finish, if one was sent
    pub async fn settle_notification(&mut self) -> NotificationStatus {
        match self.notification.as_mut() {
            Some(handle) => handle.settle().await,
            None => NotificationStatus::NotSent,
        }
    }

    fn invalid(&self, action: &str) -> RegistryError {
        RegistryError::InvalidTransition {
            state: self.state().to_string(),
            action: action.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::COUNTER_KEY;
    use crate::clock::{Clock, FixedClock};
    use crate::member::fixtures::applicant;
    use crate::member::{MemberId, Ministry};
    use crate::notify::testing::FailingNotifier;
    use crate::notify::PendingQueueNotifier;
    use crate::stats::{PeriodKind, StatsAggregator};
    use crate::storage::{MemoryStore, SharedStore};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    struct Harness {
        shared: SharedStore,
        allocator: Arc<IdAllocator>,
        store: Arc<RegistrationStore>,
        stats: StatsAggregator,
        clock: FixedClock,
    }

    impl Harness {
        fn new() -> Self {
            let shared: SharedStore = Arc::new(MemoryStore::new());
            let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap());
            Harness {
                allocator: Arc::new(IdAllocator::new(shared.clone(), "SGC")),
                store: Arc::new(RegistrationStore::new(shared.clone())),
                stats: StatsAggregator::new(shared.clone(), Arc::new(clock.clone())),
                shared,
                clock,
            }
        }

        fn controller(&self) -> WorkflowController {
            let notifier = Arc::new(PendingQueueNotifier::new(self.shared.clone(), Duration::ZERO));
            self.controller_with(notifier)
        }

        fn controller_with(&self, notifier: SharedNotifier) -> WorkflowController {
            WorkflowController::new(
                self.allocator.clone(),
                self.store.clone(),
                notifier,
                Arc::new(self.clock.clone()),
                false,
            )
        }
    }

    #[tokio::test]
    async fn test_full_registration_on_march_15() {
        let h = Harness::new();
        let mut wf = h.controller();
        assert_eq!(wf.state(), WorkflowState::Collecting);
        assert_eq!(wf.notification_status(), NotificationStatus::NotSent);

        wf.submit(applicant("Ama Mensah")).unwrap();
        assert_eq!(wf.state(), WorkflowState::AwaitingPayment);

        let record = wf.confirm_payment(PaymentMethod::Mobile).unwrap();
        assert_eq!(record.id.as_str(), "SGC-0001");
        assert_eq!(wf.state(), WorkflowState::Issued);

        assert_eq!(h.stats.query(PeriodKind::Day, "2024-03-15").unwrap(), 1);
        assert_eq!(h.stats.query(PeriodKind::Month, "2024-03").unwrap(), 1);
        assert_eq!(h.stats.query(PeriodKind::Year, "2024").unwrap(), 1);
        assert_eq!(h.store.list().unwrap(), vec![record.clone()]);

        let issued = wf.issued().unwrap();
        assert_eq!(issued.record, record);
        assert_eq!(issued.applicant.photo.as_deref(), Some("uploads/passport.jpg"));

        assert_eq!(wf.settle_notification().await, NotificationStatus::Sent);
        assert_eq!(notify::pending(h.shared.as_ref()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_each_confirmation_gets_next_id() {
        let h = Harness::new();
        let mut ids = Vec::new();

        for name in ["Ama Mensah", "Kofi Boateng", "Esi Owusu"] {
            let mut wf = h.controller();
            wf.submit(applicant(name)).unwrap();
            ids.push(wf.confirm_payment(PaymentMethod::Card).unwrap().id.to_string());
        }

        assert_eq!(ids, vec!["SGC-0001", "SGC-0002", "SGC-0003"]);
        assert_eq!(h.stats.query(PeriodKind::Day, "2024-03-15").unwrap(), 3);
    }

    #[test]
    fn test_other_ministry_without_value_stays_collecting() {
        let h = Harness::new();
        let mut wf = h.controller();

        let mut input = applicant("Kofi Boateng");
        input.ministry = Some(Ministry::Other);

        let err = wf.submit(input.clone()).unwrap_err();
        match err {
            RegistryError::Validation(fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].field, "custom_ministry");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(wf.state(), WorkflowState::Collecting);

        input.custom_ministry = "Media Team".to_string();
        wf.submit(input).unwrap();
        assert_eq!(wf.state(), WorkflowState::AwaitingPayment);
    }

    #[test]
    fn test_operations_in_wrong_state() {
        let h = Harness::new();
        let mut wf = h.controller();

        assert!(matches!(
            wf.confirm_payment(PaymentMethod::Card),
            Err(RegistryError::InvalidTransition { .. })
        ));

        wf.submit(applicant("Ama Mensah")).unwrap();
        let err = wf.submit(applicant("Ama Mensah")).unwrap_err();
        assert_eq!(err.to_string(), "Cannot submit while registration is awaiting payment");

        wf.cancel().unwrap();
        assert!(wf.cancel().is_err());
        assert!(wf.submit(applicant("Ama Mensah")).is_err());
        assert_eq!(wf.state(), WorkflowState::Cancelled);
    }

    #[test]
    fn test_cancel_persists_nothing() {
        let h = Harness::new();
        let mut wf = h.controller();
        wf.submit(applicant("Ama Mensah")).unwrap();

        wf.cancel().unwrap();

        assert!(wf.issued().is_none());
        assert_eq!(h.store.count().unwrap(), 0);
        assert_eq!(h.allocator.current().unwrap(), 0);
        assert!(h.stats.state().unwrap().daily.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_keeps_awaiting_payment() {
        let h = Harness::new();

        // A record already holds SGC-0001 but the counter was never advanced
        let squatter = applicant("Yaw Asante");
        h.store
            .append(&MemberRecord::from_applicant(
                MemberId::format("SGC", 1),
                &squatter,
                PaymentMethod::Bank,
                h.clock.now(),
            ))
            .unwrap();
        assert!(h.shared.get(COUNTER_KEY).unwrap().is_none());

        let mut wf = h.controller();
        wf.submit(applicant("Ama Mensah")).unwrap();

        let err = wf.confirm_payment(PaymentMethod::Card).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(_)));
        assert!(err.is_retryable());
        assert_eq!(wf.state(), WorkflowState::AwaitingPayment);
        assert_eq!(h.stats.query(PeriodKind::Day, "2024-03-15").unwrap(), 0);

        let record = wf.confirm_payment(PaymentMethod::Card).unwrap();
        assert_eq!(record.id.as_str(), "SGC-0002");
        assert_eq!(h.store.count().unwrap(), 2);
        assert_eq!(h.stats.query(PeriodKind::Day, "2024-03-15").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_notification_failure_still_issued() {
        let h = Harness::new();
        let mut wf = h.controller_with(Arc::new(FailingNotifier));

        wf.submit(applicant("Ama Mensah")).unwrap();
        wf.confirm_payment(PaymentMethod::Bank).unwrap();

        assert!(wf.settle_notification().await.is_failed());
        assert_eq!(wf.state(), WorkflowState::Issued);
        assert_eq!(h.store.count().unwrap(), 1);
    }

    #[test]
    fn test_confirm_outside_runtime_still_issues() {
        let h = Harness::new();
        let mut wf = h.controller();

        wf.submit(applicant("Ama Mensah")).unwrap();
        wf.confirm_payment(PaymentMethod::Card).unwrap();

        assert_eq!(wf.state(), WorkflowState::Issued);
        assert!(wf.notification_status().is_failed());
    }

    #[test]
    fn test_registration_uses_clock_time() {
        let h = Harness::new();
        h.clock.set(Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap());

        let mut wf = h.controller();
        wf.submit(applicant("Ama Mensah")).unwrap();
        let record = wf.confirm_payment(PaymentMethod::Card).unwrap();

        assert_eq!(record.registered_at_iso(), "2024-12-31T23:59:59.000Z");
        assert_eq!(h.stats.query(PeriodKind::Year, "2024").unwrap(), 1);
        assert_eq!(h.stats.query(PeriodKind::Year, "2025").unwrap(), 0);
    }
}
