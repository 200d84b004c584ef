// Member ID allocator
//
// The counter lives under `memberCounter`. An ID is only returned after the
// incremented counter has committed, so a crash can never hand the same
// sequence number out twice. `allocate_with` stages the record in the same
// transaction, so records land in the order their IDs were issued.

use crate::error::{RegistryError, Result};
use crate::member::MemberId;
use crate::storage::{transact, Batch, SharedStore};
use tracing::debug;

pub const COUNTER_KEY: &str = "memberCounter";
pub const DEFAULT_PREFIX: &str = "SGC";

pub struct IdAllocator {
    store: SharedStore,
    prefix: String,
}

impl IdAllocator {
    pub fn new(store: SharedStore, prefix: &str) -> Self {
        IdAllocator {
            store,
            prefix: prefix.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Issue the next member ID
    pub fn allocate(&self) -> Result<MemberId> {
        self.allocate_with(|_, id| Ok(id))
    }

    /// Issue the next member ID and stage whatever it identifies in the same
    /// transaction. When `stage` rejects the ID as a duplicate, its writes are
    /// dropped but the counter bump still commits, so a retry moves on.
    pub fn allocate_with<T, F>(&self, stage: F) -> Result<T>
    where
        F: FnOnce(&mut Batch<'_>, MemberId) -> Result<T>,
    {
        let outcome = transact(self.store.as_ref(), |batch| {
            let sequence = stage_next(batch)?;
            let id = MemberId::format(&self.prefix, sequence);
            debug!(member_id = %id, sequence, "Allocated member ID");

            let mark = batch.checkpoint();
            match stage(batch, id) {
                Err(RegistryError::DuplicateId(taken)) => {
                    batch.rollback(mark);
                    Ok(Err(RegistryError::DuplicateId(taken)))
                }
                other => other.map(Ok),
            }
        })?;

        outcome
    }

    /// Last issued sequence number (0 when nothing was issued since the last reset)
    pub fn current(&self) -> Result<u64> {
        parse_counter(self.store.get(COUNTER_KEY)?)
    }

    pub fn reset(&self) -> Result<()> {
        self.store.update(&mut |batch| {
            clear(batch);
            Ok(())
        })
    }
}

fn stage_next(batch: &mut Batch<'_>) -> Result<u64> {
    let next = read_counter(batch)?
        .checked_add(1)
        .ok_or_else(|| RegistryError::StorageUnavailable("member counter overflow".to_string()))?;
    batch.put(COUNTER_KEY, next.to_string());
    Ok(next)
}

/// Stage a counter reset inside a larger transaction
pub(crate) fn clear(batch: &mut Batch<'_>) {
    batch.delete(COUNTER_KEY);
}

fn read_counter(batch: &Batch<'_>) -> Result<u64> {
    parse_counter(batch.get(COUNTER_KEY)?)
}

fn parse_counter(raw: Option<String>) -> Result<u64> {
    match raw {
        None => Ok(0),
        Some(raw) => raw.trim().parse().map_err(|_| {
            RegistryError::StorageUnavailable(format!("member counter is corrupt: {:?}", raw))
        }),
    }
}
