// Member Registry - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod storage;        // Key-value storage: memory + SQLite, audit events
pub mod clock;
pub mod member;         // Applicant input, member records, member IDs
pub mod allocator;      // Sequential member IDs
pub mod stats;          // Daily / monthly / yearly registration counts
pub mod store;          // Member records, snapshot + CSV export
pub mod notify;         // Detached admin notification
pub mod workflow;       // Collecting -> AwaitingPayment -> Issued
pub mod registry;
pub mod config;
pub mod logging;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use error::{FieldError, RegistryError, Result};
pub use storage::{
    AuditEvent, Batch, KeyValueStore, MemoryStore, SharedStore, SqliteStore,
    read_json, setup_database, transact,
};
pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use member::{
    ApplicantInput, MemberId, MemberRecord, Ministry, PaymentMethod, SacramentStatus,
};
pub use allocator::IdAllocator;
pub use stats::{CurrentCounts, PeriodCount, PeriodKind, StatsAggregator, StatsState};
pub use store::{RegistrationStore, StatsSnapshot};
pub use notify::{
    AdminNotifier, NotificationHandle, NotificationStatus, PendingQueueNotifier,
    PendingRegistration, SharedNotifier,
};
pub use workflow::{IssuedRegistration, WorkflowController, WorkflowState};
pub use registry::Registry;
pub use config::Config;
pub use logging::init_tracing;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
