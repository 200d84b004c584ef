use chrono::{TimeZone, Utc};
use member_registry::{
    ApplicantInput, Config, FixedClock, MemberId, MemoryStore, Ministry, NotificationStatus,
    PaymentMethod, PendingQueueNotifier, PeriodKind, Registry, RegistryError, SacramentStatus, SharedStore,
    SqliteStore, WorkflowState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn applicant(name: &str, ministry: Ministry) -> ApplicantInput {
    ApplicantInput {
        full_name: name.to_string(),
        date_of_birth: "1988-11-02".to_string(),
        phone_number: "+233 24 111 2222".to_string(),
        email_address: format!("{}@example.org", name.to_lowercase().replace(' ', ".")),
        ministry: Some(ministry),
        custom_ministry: String::new(),
        sacrament_status: Some(SacramentStatus::BaptizedOnly),
        years_in_faith: Some(5),
        photo: Some("photos/applicant.png".to_string()),
        payment_proof: None,
    }
}

fn registry_over(storage: SharedStore, clock: &FixedClock) -> Registry {
    let notifier = Arc::new(PendingQueueNotifier::new(storage.clone(), Duration::ZERO));
    Registry::new(storage, &Config::default(), Arc::new(clock.clone()), notifier)
}

/// Database file in the system temp dir, removed on drop
struct TempDb(PathBuf);

impl TempDb {
    fn new() -> Self {
        TempDb(std::env::temp_dir().join(format!("member-registry-{}.db", uuid::Uuid::new_v4())))
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.0.display(), suffix));
        }
    }
}

#[tokio::test]
async fn test_registrations_survive_reopen() {
    let db = TempDb::new();
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 15, 14, 0, 0).unwrap());

    {
        let registry = registry_over(Arc::new(SqliteStore::open(&db.0).unwrap()), &clock);
        for name in ["Ama Mensah", "Kofi Boateng"] {
            let mut wf = registry.start_registration();
            wf.submit(applicant(name, Ministry::LegionOfMary)).unwrap();
            wf.confirm_payment(PaymentMethod::Mobile).unwrap();
            assert_eq!(wf.settle_notification().await, NotificationStatus::Sent);
        }
    }

    let registry = registry_over(Arc::new(SqliteStore::open(&db.0).unwrap()), &clock);
    assert_eq!(registry.store().count().unwrap(), 2);
    assert_eq!(registry.allocator().current().unwrap(), 2);
    assert_eq!(registry.stats().query(PeriodKind::Day, "2024-03-15").unwrap(), 2);
    assert_eq!(registry.pending().unwrap().len(), 2);

    let mut wf = registry.start_registration();
    wf.submit(applicant("Esi Owusu", Ministry::Choir)).unwrap();
    let record = wf.confirm_payment(PaymentMethod::Bank).unwrap();
    assert_eq!(record.id.as_str(), "SGC-0003");

    let history = registry.store().history(&MemberId::from("SGC-0001")).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_type, "member_registered");
}

#[tokio::test]
async fn test_counts_follow_registration_dates() {
    let storage: SharedStore = Arc::new(SqliteStore::open_in_memory().unwrap());
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 31, 23, 0, 0).unwrap());
    let registry = registry_over(storage, &clock);

    let dates = [
        Utc.with_ymd_and_hms(2024, 1, 31, 23, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
    ];
    for (i, at) in dates.iter().enumerate() {
        clock.set(*at);
        let mut wf = registry.start_registration();
        wf.submit(applicant(&format!("Member {}", i), Ministry::Usher)).unwrap();
        wf.confirm_payment(PaymentMethod::Card).unwrap();
    }

    let stats = registry.stats();
    assert_eq!(stats.query(PeriodKind::Month, "2024-01").unwrap(), 1);
    assert_eq!(stats.query(PeriodKind::Month, "2024-02").unwrap(), 2);
    assert_eq!(stats.query(PeriodKind::Month, "2024-03").unwrap(), 1);
    assert_eq!(stats.query(PeriodKind::Year, "2024").unwrap(), 4);
    assert!(stats.state().unwrap().check_consistency().is_ok());

    let months = stats.recent_window(PeriodKind::Month, 3).unwrap();
    let counts: Vec<u64> = months.iter().map(|p| p.count).collect();
    assert_eq!(counts, vec![1, 2, 1]);
    assert_eq!(months[2].label, "Mar 2024");

    let snapshot = registry.export_snapshot().unwrap();
    assert_eq!(snapshot.total_members, 4);
    assert_eq!(snapshot.today_registrations, 1);
    assert_eq!(snapshot.this_month_registrations, 1);
    assert_eq!(snapshot.file_name(), "registration-stats-2024-03-01.json");
}

#[tokio::test]
async fn test_concurrent_registrations_get_distinct_ids() {
    let storage: SharedStore = Arc::new(SqliteStore::open_in_memory().unwrap());
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
    let registry = Arc::new(registry_over(storage, &clock));

    let mut tasks = Vec::new();
    for i in 0..20 {
        let registry = registry.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            let mut wf = registry.start_registration();
            wf.submit(applicant(&format!("Member {}", i), Ministry::YouthMinistry))
                .unwrap();
            wf.confirm_payment(PaymentMethod::Card).unwrap().id.sequence().unwrap()
        }));
    }

    let mut sequences = Vec::new();
    for task in tasks {
        sequences.push(task.await.unwrap());
    }
    sequences.sort_unstable();

    assert_eq!(sequences, (1..=20).collect::<Vec<u64>>());
    assert_eq!(registry.stats().query(PeriodKind::Day, "2024-06-01").unwrap(), 20);
    assert_eq!(registry.store().count().unwrap(), 20);
}

#[test]
fn test_members_listed_in_allocation_order() {
    for _ in 0..20 {
        let storage: SharedStore = Arc::new(MemoryStore::new());
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
        let registry = Arc::new(registry_over(storage, &clock));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        let mut wf = registry.start_registration();
                        wf.submit(applicant(&format!("Member {} {}", t, i), Ministry::Choir))
                            .unwrap();
                        wf.confirm_payment(PaymentMethod::Mobile).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let listed: Vec<u64> = registry
            .store()
            .list()
            .unwrap()
            .iter()
            .map(|r| r.id.sequence().unwrap())
            .collect();
        assert!(
            listed.windows(2).all(|w| w[0] < w[1]),
            "members out of allocation order: {:?}",
            listed
        );
        assert_eq!(listed.len(), 80);

        let newest: Vec<u64> = registry
            .store()
            .recent_first(3)
            .unwrap()
            .iter()
            .map(|r| r.id.sequence().unwrap())
            .collect();
        assert_eq!(newest, vec![80, 79, 78]);
    }
}

#[tokio::test]
async fn test_validation_failure_changes_nothing() {
    let storage: SharedStore = Arc::new(SqliteStore::open_in_memory().unwrap());
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap());
    let registry = registry_over(storage, &clock);

    let mut input = applicant("Yaw Asante", Ministry::Other);
    input.email_address = String::new();

    let mut wf = registry.start_registration();
    let err = wf.submit(input).unwrap_err();

    let RegistryError::Validation(fields) = &err else {
        panic!("expected validation error, got {:?}", err);
    };
    let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
    assert_eq!(names, vec!["email_address", "custom_ministry"]);
    assert_eq!(
        err.user_message(),
        "Please fill in all required fields: email_address, custom_ministry"
    );

    assert_eq!(wf.state(), WorkflowState::Collecting);
    assert_eq!(registry.allocator().current().unwrap(), 0);
    assert_eq!(registry.store().count().unwrap(), 0);
}
