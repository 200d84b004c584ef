// Registration store - member records in arrival order
//
// Records live as one JSON array under `registeredMembers`. Appends run in a
// storage transaction, so the duplicate check and the write see the same state.
// `register` also allocates the ID in that transaction, so the array is always
// in allocation order.

use crate::allocator::IdAllocator;
use crate::error::{RegistryError, Result};
use crate::member::{MemberId, MemberRecord};
use crate::stats::{self, CurrentCounts, StatsState};
use crate::storage::{read_json, transact, AuditEvent, Batch, SharedStore};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{info, warn};

pub const MEMBERS_KEY: &str = "registeredMembers";

pub struct RegistrationStore {
    store: SharedStore,
}

impl RegistrationStore {
    pub fn new(store: SharedStore) -> Self {
        RegistrationStore { store }
    }

    /// Append a record; fails with `DuplicateId` and changes nothing if the ID exists
    pub fn append(&self, record: &MemberRecord) -> Result<()> {
        transact(self.store.as_ref(), |batch| stage_append(batch, record))
    }

    /// Allocate an ID, build the record for it and append it, counting the
    /// registration event, all in one transaction
    pub(crate) fn register<F>(&self, allocator: &IdAllocator, build: F) -> Result<MemberRecord>
    where
        F: FnOnce(MemberId) -> MemberRecord,
    {
        let record = allocator.allocate_with(|batch, id| {
            let record = build(id);
            stage_registration(batch, &record)?;
            Ok(record)
        })?;

        info!(member_id = %record.id, ministry = %record.ministry, "Member registered");
        Ok(record)
    }

    /// All records in registration order
    pub fn list(&self) -> Result<Vec<MemberRecord>> {
        Ok(read_json(self.store.as_ref(), MEMBERS_KEY)?.unwrap_or_default())
    }

    /// Most recent registrations first
    pub fn recent_first(&self, limit: usize) -> Result<Vec<MemberRecord>> {
        Ok(self.list()?.into_iter().rev().take(limit).collect())
    }

    pub fn find(&self, id: &MemberId) -> Result<Option<MemberRecord>> {
        Ok(self.list()?.into_iter().find(|r| &r.id == id))
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    pub fn history(&self, id: &MemberId) -> Result<Vec<AuditEvent>> {
        self.store.events_for("member", id.as_str())
    }

    /// Aggregate counts and raw period maps as of `now`
    pub fn export_snapshot(&self, now: DateTime<Utc>) -> Result<StatsSnapshot> {
        // One transaction so member count and counters come from the same state
        let (members, detailed_stats) = transact(self.store.as_ref(), |batch| {
            let members: Vec<MemberRecord> = batch.get_json(MEMBERS_KEY)?.unwrap_or_default();
            let state: StatsState = batch.get_json(stats::STATS_KEY)?.unwrap_or_default();
            Ok((members.len(), state))
        })?;

        Ok(StatsSnapshot::new(members, detailed_stats, now))
    }

    /// Write every record as CSV, registration order
    pub fn write_csv<W: Write>(&self, writer: W) -> anyhow::Result<usize> {
        let records = self.list()?;
        let mut wtr = csv::Writer::from_writer(writer);

        for record in &records {
            wtr.serialize(CsvRow::from(record))?;
        }
        wtr.flush()?;

        Ok(records.len())
    }
}

fn stage_append(batch: &mut Batch<'_>, record: &MemberRecord) -> Result<()> {
    let mut members: Vec<MemberRecord> = batch.get_json(MEMBERS_KEY)?.unwrap_or_default();

    if members.iter().any(|m| m.id == record.id) {
        warn!(member_id = %record.id, "Rejected duplicate member ID");
        return Err(RegistryError::DuplicateId(record.id.to_string()));
    }

    members.push(record.clone());
    batch.put_json(MEMBERS_KEY, &members)
}

/// Append plus stats increment plus audit event
fn stage_registration(batch: &mut Batch<'_>, record: &MemberRecord) -> Result<()> {
    stage_append(batch, record)?;
    stats::apply_event(batch, record.registered_at)?;
    batch.audit(AuditEvent::new(
        "member_registered",
        "member",
        record.id.as_str(),
        record.registered_at,
        serde_json::json!({
            "ministry": record.ministry,
            "payment_method": record.payment_method.as_str(),
        }),
        "workflow",
    ));
    Ok(())
}

// ============================================================================
// CSV EXPORT
// ============================================================================

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    #[serde(rename = "Member_ID")]
    id: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Email")]
    email: &'a str,
    #[serde(rename = "Phone")]
    phone: &'a str,
    #[serde(rename = "Date_Of_Birth")]
    dob: &'a str,
    #[serde(rename = "Ministry")]
    ministry: &'a str,
    #[serde(rename = "Sacrament_Status")]
    status: &'a str,
    #[serde(rename = "Years_In_Faith")]
    years_in_faith: u32,
    #[serde(rename = "Payment_Method")]
    payment_method: &'a str,
    #[serde(rename = "Registered_At")]
    registered_at: String,
}

impl<'a> From<&'a MemberRecord> for CsvRow<'a> {
    fn from(r: &'a MemberRecord) -> Self {
        CsvRow {
            id: r.id.as_str(),
            name: &r.name,
            email: &r.email,
            phone: &r.phone,
            dob: &r.dob,
            ministry: &r.ministry,
            status: r.status.as_str(),
            years_in_faith: r.years_in_faith,
            payment_method: r.payment_method.as_str(),
            registered_at: r.registered_at_iso(),
        }
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Point-in-time export of the statistics, for offline auditing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_members: usize,
    pub today_registrations: u64,
    pub this_month_registrations: u64,
    pub this_year_registrations: u64,
    pub detailed_stats: StatsState,
    pub export_date: String,
}

impl StatsSnapshot {
    pub fn new(total_members: usize, detailed_stats: StatsState, now: DateTime<Utc>) -> Self {
        let CurrentCounts {
            today,
            this_month,
            this_year,
        } = stats::current_counts(&detailed_stats, now);

        StatsSnapshot {
            total_members,
            today_registrations: today,
            this_month_registrations: this_month,
            this_year_registrations: this_year,
            detailed_stats,
            export_date: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// `registration-stats-YYYY-MM-DD.json`
    pub fn file_name(&self) -> String {
        let day = self.export_date.get(..10).unwrap_or(&self.export_date);
        format!("registration-stats-{}.json", day)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
