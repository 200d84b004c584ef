// 📊 Registration statistics - day / month / year counters
//
// All three maps are views over the same registration event stream. Keys are
// taken from the UTC calendar of the event timestamp, so a registration lands
// in exactly one day, one month and one year, and the sums always line up.

use crate::clock::SharedClock;
use crate::error::Result;
use crate::storage::{read_json, transact, Batch, SharedStore};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const STATS_KEY: &str = "registrationStats";

/// Longest trend window served; larger requests are clamped
pub const MAX_WINDOW: usize = 366;

// ============================================================================
// PERIODS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Day,
    Month,
    Year,
}

impl PeriodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Day => "day",
            PeriodKind::Month => "month",
            PeriodKind::Year => "year",
        }
    }

    /// Bucket key for a timestamp: `YYYY-MM-DD`, `YYYY-MM` or `YYYY`
    pub fn key_for(&self, at: DateTime<Utc>) -> String {
        match self {
            PeriodKind::Day => at.format("%Y-%m-%d").to_string(),
            PeriodKind::Month => at.format("%Y-%m").to_string(),
            PeriodKind::Year => at.format("%Y").to_string(),
        }
    }
}

impl std::str::FromStr for PeriodKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day" | "daily" => Ok(PeriodKind::Day),
            "month" | "monthly" => Ok(PeriodKind::Month),
            "year" | "yearly" => Ok(PeriodKind::Year),
            other => Err(format!("Unknown period kind: {}", other)),
        }
    }
}

/// One row of a trend display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodCount {
    pub key: String,
    pub label: String,
    pub count: u64,
}

// ============================================================================
// STATS STATE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsState {
    #[serde(default)]
    pub daily: BTreeMap<String, u64>,
    #[serde(default)]
    pub monthly: BTreeMap<String, u64>,
    #[serde(default)]
    pub yearly: BTreeMap<String, u64>,
}

impl StatsState {
    pub fn get(&self, kind: PeriodKind, key: &str) -> u64 {
        self.map(kind).get(key).copied().unwrap_or(0)
    }

    pub fn map(&self, kind: PeriodKind) -> &BTreeMap<String, u64> {
        match kind {
            PeriodKind::Day => &self.daily,
            PeriodKind::Month => &self.monthly,
            PeriodKind::Year => &self.yearly,
        }
    }

    fn increment(&mut self, at: DateTime<Utc>) {
        *self.daily.entry(PeriodKind::Day.key_for(at)).or_insert(0) += 1;
        *self.monthly.entry(PeriodKind::Month.key_for(at)).or_insert(0) += 1;
        *self.yearly.entry(PeriodKind::Year.key_for(at)).or_insert(0) += 1;
    }

    /// Verify that days sum to months and months sum to years
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        let mut day_sums: BTreeMap<&str, u64> = BTreeMap::new();
        for (day, count) in &self.daily {
            *day_sums.entry(&day[..7.min(day.len())]).or_insert(0) += count;
        }

        let mut month_sums: BTreeMap<&str, u64> = BTreeMap::new();
        for (month, count) in &self.monthly {
            *month_sums.entry(&month[..4.min(month.len())]).or_insert(0) += count;
            let from_days = day_sums.get(month.as_str()).copied().unwrap_or(0);
            if from_days != *count {
                return Err(format!(
                    "month {} has {} registrations but its days sum to {}",
                    month, count, from_days
                ));
            }
        }
        if let Some(orphan) = day_sums.keys().find(|m| !self.monthly.contains_key(**m)) {
            return Err(format!("days recorded for month {} without a month counter", orphan));
        }

        for (year, count) in &self.yearly {
            let from_months = month_sums.get(year.as_str()).copied().unwrap_or(0);
            if from_months != *count {
                return Err(format!(
                    "year {} has {} registrations but its months sum to {}",
                    year, count, from_months
                ));
            }
        }
        if let Some(orphan) = month_sums.keys().find(|y| !self.yearly.contains_key(**y)) {
            return Err(format!("months recorded for year {} without a year counter", orphan));
        }

        Ok(())
    }
}

/// Today / this month / this year figures for the dashboard header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CurrentCounts {
    pub today: u64,
    pub this_month: u64,
    pub this_year: u64,
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct StatsAggregator {
    store: SharedStore,
    clock: SharedClock,
}

impl StatsAggregator {
    pub fn new(store: SharedStore, clock: SharedClock) -> Self {
        StatsAggregator { store, clock }
    }

    /// Count one registration in its day, month and year
    pub fn record_event(&self, at: DateTime<Utc>) -> Result<()> {
        transact(self.store.as_ref(), |batch| apply_event(batch, at))
    }

    pub fn query(&self, kind: PeriodKind, key: &str) -> Result<u64> {
        Ok(self.state()?.get(kind, key))
    }

    /// The `n` most recent periods ending at the current one, oldest first.
    /// `n` is clamped to `MAX_WINDOW`.
    pub fn recent_window(&self, kind: PeriodKind, n: usize) -> Result<Vec<PeriodCount>> {
        let state = self.state()?;
        Ok(window(&state, kind, n, self.clock.now()))
    }

    pub fn current_counts(&self) -> Result<CurrentCounts> {
        let state = self.state()?;
        Ok(current_counts(&state, self.clock.now()))
    }

    pub fn state(&self) -> Result<StatsState> {
        Ok(read_json(self.store.as_ref(), STATS_KEY)?.unwrap_or_default())
    }

    /// Clear all three maps at once
    pub fn reset(&self) -> Result<()> {
        self.store.update(&mut |batch| {
            clear(batch);
            Ok(())
        })
    }
}

/// Stage a registration event inside a larger transaction
pub(crate) fn apply_event(batch: &mut Batch<'_>, at: DateTime<Utc>) -> Result<()> {
    let mut state: StatsState = batch.get_json(STATS_KEY)?.unwrap_or_default();
    state.increment(at);
    batch.put_json(STATS_KEY, &state)?;
    debug!(day = %PeriodKind::Day.key_for(at), "Recorded registration event");
    Ok(())
}

pub(crate) fn clear(batch: &mut Batch<'_>) {
    batch.delete(STATS_KEY);
}

pub fn current_counts(state: &StatsState, now: DateTime<Utc>) -> CurrentCounts {
    CurrentCounts {
        today: state.get(PeriodKind::Day, &PeriodKind::Day.key_for(now)),
        this_month: state.get(PeriodKind::Month, &PeriodKind::Month.key_for(now)),
        this_year: state.get(PeriodKind::Year, &PeriodKind::Year.key_for(now)),
    }
}

/// Zero-filled trend window over `state`, ending at the period containing `now`.
/// Periods that fall outside the calendar are skipped.
pub fn window(state: &StatsState, kind: PeriodKind, n: usize, now: DateTime<Utc>) -> Vec<PeriodCount> {
    let today = now.date_naive();

    (0..n.min(MAX_WINDOW))
        .rev()
        .filter_map(|back| {
            let back = i32::try_from(back).ok()?;
            let (key, label) = match kind {
                PeriodKind::Day => {
                    let day = today.checked_sub_signed(Duration::days(back.into()))?;
                    (day.format("%Y-%m-%d").to_string(), day.format("%a, %b %-d").to_string())
                }
                PeriodKind::Month => {
                    let first = months_back(today, back)?;
                    (first.format("%Y-%m").to_string(), first.format("%b %Y").to_string())
                }
                PeriodKind::Year => {
                    let year = today.year().checked_sub(back)?;
                    (format!("{:04}", year), year.to_string())
                }
            };
            let count = state.get(kind, &key);
            Some(PeriodCount { key, label, count })
        })
        .collect()
}

/// First day of the month `back` months before `date`
fn months_back(date: NaiveDate, back: i32) -> Option<NaiveDate> {
    let index = i64::from(date.year()) * 12 + i64::from(date.month0()) - i64::from(back);
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    let month = index.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1)
}
