// Storage abstraction - string keys, JSON values, transactional updates
//
// Every read-modify-write in the registry goes through `update`, which holds
// the backend's single lock for the whole closure. That is what serializes
// concurrent allocations, appends and counter increments.

use crate::error::{RegistryError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Audit trail entry, committed in the same transaction as the change it describes
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl AuditEvent {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        timestamp: DateTime<Utc>,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// BATCH
// ============================================================================

/// Staged view over a store: reads fall through to committed state unless the
/// key was written earlier in the same batch.
pub struct Batch<'a> {
    reader: &'a dyn Fn(&str) -> Result<Option<String>>,
    writes: BTreeMap<String, Option<String>>,
    events: Vec<AuditEvent>,
}

impl<'a> Batch<'a> {
    fn new(reader: &'a dyn Fn(&str) -> Result<Option<String>>) -> Self {
        Batch {
            reader,
            writes: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        match self.writes.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => (self.reader)(key),
        }
    }

    pub fn put(&mut self, key: &str, value: String) {
        self.writes.insert(key.to_string(), Some(value));
    }

    pub fn delete(&mut self, key: &str) {
        self.writes.insert(key.to_string(), None);
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.put(key, raw);
        Ok(())
    }

    /// Stage an audit event alongside the writes
    pub fn audit(&mut self, event: AuditEvent) {
        self.events.push(event);
    }

    /// Mark the staged state so later writes can be dropped with `rollback`
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            writes: self.writes.clone(),
            events: self.events.len(),
        }
    }

    /// Drop everything staged after `checkpoint`; earlier writes stay
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.writes = checkpoint.writes;
        self.events.truncate(checkpoint.events);
    }

    fn into_parts(self) -> (BTreeMap<String, Option<String>>, Vec<AuditEvent>) {
        (self.writes, self.events)
    }
}

pub struct Checkpoint {
    writes: BTreeMap<String, Option<String>>,
    events: usize,
}

// ============================================================================
// STORE TRAIT
// ============================================================================

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Run `f` against a staged batch; its writes and audit events commit
    /// together, or not at all when `f` (or the commit) fails.
    fn update(&self, f: &mut dyn FnMut(&mut Batch<'_>) -> Result<()>) -> Result<()>;

    /// Audit events for one entity, newest first
    fn events_for(&self, entity_type: &str, entity_id: &str) -> Result<Vec<AuditEvent>>;

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(&mut |batch| {
            batch.put(key, value.to_string());
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(&mut |batch| {
            batch.delete(key);
            Ok(())
        })
    }
}

pub type SharedStore = Arc<dyn KeyValueStore>;

/// Run a value-returning closure as one transaction
pub fn transact<T, F>(store: &dyn KeyValueStore, f: F) -> Result<T>
where
    F: FnOnce(&mut Batch<'_>) -> Result<T>,
{
    let mut f = Some(f);
    let mut out = None;

    store.update(&mut |batch| {
        let f = f.take().ok_or_else(|| {
            RegistryError::StorageUnavailable("transaction body ran twice".to_string())
        })?;
        out = Some(f(batch)?);
        Ok(())
    })?;

    out.ok_or_else(|| RegistryError::StorageUnavailable("transaction produced no value".to_string()))
}

/// Read and decode a JSON value outside of a transaction
pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> RegistryError {
    RegistryError::StorageUnavailable("store lock poisoned".to_string())
}

// ============================================================================
// IN-MEMORY BACKEND
// ============================================================================

#[derive(Default)]
struct MemoryState {
    values: BTreeMap<String, String>,
    events: Vec<AuditEvent>,
}

/// Process-local store for tests and throwaway sessions
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(poisoned)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.values.get(key).cloned())
    }

    fn update(&self, f: &mut dyn FnMut(&mut Batch<'_>) -> Result<()>) -> Result<()> {
        let mut state = self.lock()?;

        let (writes, events) = {
            let snapshot = &state.values;
            let reader = |key: &str| -> Result<Option<String>> { Ok(snapshot.get(key).cloned()) };
            let mut batch = Batch::new(&reader);
            f(&mut batch)?;
            batch.into_parts()
        };

        for (key, value) in writes {
            match value {
                Some(value) => {
                    state.values.insert(key, value);
                }
                None => {
                    state.values.remove(&key);
                }
            }
        }
        state.events.extend(events);

        Ok(())
    }

    fn events_for(&self, entity_type: &str, entity_id: &str) -> Result<Vec<AuditEvent>> {
        let state = self.lock()?;
        let mut events: Vec<AuditEvent> = state
            .events
            .iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect();
        events.reverse();
        Ok(events)
    }
}

// ============================================================================
// SQLITE BACKEND
// ============================================================================

/// Durable store backed by SQLite in WAL mode
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(poisoned)
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // Audit trail
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

fn insert_event(conn: &Connection, event: &AuditEvent) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn update(&self, f: &mut dyn FnMut(&mut Batch<'_>) -> Result<()>) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let (writes, events) = {
            let reader = |key: &str| -> Result<Option<String>> {
                let value = tx
                    .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
                    .optional()?;
                Ok(value)
            };
            let mut batch = Batch::new(&reader);
            f(&mut batch)?;
            batch.into_parts()
        };

        let now = Utc::now().to_rfc3339();
        for (key, value) in writes {
            match value {
                Some(value) => {
                    tx.execute(
                        "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                        params![key, value, now],
                    )?;
                }
                None => {
                    tx.execute("DELETE FROM kv WHERE key = ?1", [key])?;
                }
            }
        }

        for event in &events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn events_for(&self, entity_type: &str, entity_id: &str) -> Result<Vec<AuditEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
             FROM events
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY id DESC",
        )?;

        let events = stmt
            .query_map(params![entity_type, entity_id], |row| {
                let timestamp_str: String = row.get(1)?;
                let data_json: String = row.get(5)?;

                Ok(AuditEvent {
                    event_id: row.get(0)?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                        .map_err(|_| rusqlite::Error::InvalidQuery)?
                        .with_timezone(&Utc),
                    event_type: row.get(2)?,
                    entity_type: row.get(3)?,
                    entity_id: row.get(4)?,
                    data: serde_json::from_str(&data_json)
                        .map_err(|_| rusqlite::Error::InvalidQuery)?,
                    actor: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }
}
