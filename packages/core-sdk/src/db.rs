use anyhow::{anyhow, bail, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
    thread,
    time::Duration,
};

use crate::models::{NewProvider, ProviderEntry};

/**
 * \brief Result of an exclusive activation attempt.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    /** \brief The target became the only active entry. */
    Activated,
    /** \brief The target was already the only active entry; nothing changed. */
    AlreadyActive,
    /** \brief No entry with that id; the previous state is untouched. */
    NotFound,
}

/**
 * \brief Durable provider registry consumed by the gateway.
 * \details Implementations must apply `set_active_exclusive` atomically with
 * respect to every other call, so no reader sees zero or two active entries
 * because of a half-applied activation.
 */
pub trait ProviderStore: Send + Sync {
    fn add(&self, entry: &NewProvider) -> Result<i64>;
    fn update(&self, id: i64, entry: &NewProvider) -> Result<bool>;
    fn delete(&self, id: i64) -> Result<bool>;
    fn list(&self) -> Result<Vec<ProviderEntry>>;
    fn get(&self, id: i64) -> Result<Option<ProviderEntry>>;
    /** \brief Every row flagged active; more than one is a data-integrity anomaly. */
    fn active_entries(&self) -> Result<Vec<ProviderEntry>>;
    fn set_active_exclusive(&self, id: i64) -> Result<ActivationOutcome>;
}

/**
 * \brief SQLite-backed store; one connection serialized behind a mutex.
 */
pub struct SqliteProviderStore {
    conn: Mutex<Connection>,
}

impl SqliteProviderStore {
    /**
     * \brief Opens (creating if needed) the database file and applies migrations.
     */
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = open_db(path)?;
        migrate(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /**
     * \brief Wraps an already migrated connection.
     */
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("provider store connection poisoned"))
    }
}

impl ProviderStore for SqliteProviderStore {
    fn add(&self, entry: &NewProvider) -> Result<i64> {
        insert_provider(&*self.lock()?, entry)
    }

    fn update(&self, id: i64, entry: &NewProvider) -> Result<bool> {
        update_provider(&*self.lock()?, id, entry)
    }

    fn delete(&self, id: i64) -> Result<bool> {
        delete_provider(&*self.lock()?, id)
    }

    fn list(&self) -> Result<Vec<ProviderEntry>> {
        list_providers(&*self.lock()?)
    }

    fn get(&self, id: i64) -> Result<Option<ProviderEntry>> {
        get_provider_by_id(&*self.lock()?, id)
    }

    fn active_entries(&self) -> Result<Vec<ProviderEntry>> {
        list_active_providers(&*self.lock()?)
    }

    fn set_active_exclusive(&self, id: i64) -> Result<ActivationOutcome> {
        set_active_exclusive(&mut *self.lock()?, id)
    }
}

/**
 * \brief Opens the database file at `path`.
 */
pub fn open_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief Creates the schema and upgrades legacy tables in place.
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        CREATE TABLE IF NOT EXISTS llm_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            base_url TEXT NOT NULL,
            api_key  TEXT NOT NULL,
            model    TEXT NOT NULL,
            label    TEXT,
            is_active INTEGER NOT NULL DEFAULT 0
        );
        "#,
        )
    })?;

    ensure_is_active_column(conn)?;
    ensure_single_active_index(conn)?;
    Ok(())
}

fn column_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA table_info(llm_entries)")?;
    let mut rows = stmt.query([])?;
    let mut names = Vec::new();
    while let Some(row) = rows.next()? {
        names.push(row.get::<_, String>(1)?);
    }
    Ok(names)
}

/**
 * \brief Older databases either lack the flag or spell it `isActive`.
 */
fn ensure_is_active_column(conn: &Connection) -> Result<()> {
    let names = column_names(conn)?;
    if names.iter().any(|n| n == "is_active") {
        return Ok(());
    }
    if names.iter().any(|n| n == "isActive") {
        retry_on_locked(|| {
            conn.execute(
                "ALTER TABLE llm_entries RENAME COLUMN isActive TO is_active",
                [],
            )
        })?;
        retry_on_locked(|| {
            conn.execute(
                "UPDATE llm_entries SET is_active=0 WHERE is_active IS NULL",
                [],
            )
        })?;
        tracing::info!("renamed legacy isActive column");
    } else {
        retry_on_locked(|| {
            conn.execute(
                "ALTER TABLE llm_entries ADD COLUMN is_active INTEGER NOT NULL DEFAULT 0",
                [],
            )
        })?;
        tracing::info!("added is_active column to llm_entries");
    }
    Ok(())
}

/**
 * \brief Lets SQLite itself reject a second active row.
 * \details Legacy data may already hold several active rows; only the lowest
 * id keeps the flag, matching which row the old lookup returned.
 */
fn ensure_single_active_index(conn: &Connection) -> Result<()> {
    let demoted = retry_on_locked(|| {
        conn.execute(
            "UPDATE llm_entries SET is_active=0
             WHERE is_active<>0 AND id<>(SELECT MIN(id) FROM llm_entries WHERE is_active<>0)",
            [],
        )
    })?;
    if demoted > 0 {
        tracing::warn!(demoted, "cleared duplicate active providers during migration");
    }
    retry_on_locked(|| {
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS llm_entries_single_active
             ON llm_entries(is_active) WHERE is_active=1",
            [],
        )
    })?;
    Ok(())
}

fn map_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProviderEntry> {
    Ok(ProviderEntry {
        id: row.get(0)?,
        base_url: row.get(1)?,
        api_key: row.get(2)?,
        model: row.get(3)?,
        label: row.get(4)?,
        is_active: row.get(5)?,
    })
}

fn check_entry(entry: &NewProvider) -> Result<()> {
    if let Err(errors) = entry.validate() {
        let joined = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        bail!("invalid provider entry: {}", joined);
    }
    Ok(())
}

/**
 * \brief Adds a provider; new entries start inactive.
 */
pub fn insert_provider(conn: &Connection, entry: &NewProvider) -> Result<i64> {
    check_entry(entry)?;
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO llm_entries (base_url, api_key, model, label, is_active) VALUES (?1, ?2, ?3, ?4, 0)",
            params![entry.base_url, entry.api_key, entry.model, entry.label],
        )
    })?;
    let id = conn.last_insert_rowid();
    tracing::info!(id, "LLM entry added");
    Ok(id)
}

/**
 * \brief Replaces every field except `id` and the active flag.
 */
pub fn update_provider(conn: &Connection, id: i64, entry: &NewProvider) -> Result<bool> {
    check_entry(entry)?;
    let rows = retry_on_locked(|| {
        conn.execute(
            "UPDATE llm_entries SET base_url=?1, api_key=?2, model=?3, label=?4 WHERE id=?5",
            params![entry.base_url, entry.api_key, entry.model, entry.label, id],
        )
    })?;
    tracing::info!(id, changes = rows, "LLM entry edited");
    Ok(rows > 0)
}

/**
 * \brief Removes a provider; removing the active one leaves none active.
 */
pub fn delete_provider(conn: &Connection, id: i64) -> Result<bool> {
    let rows = retry_on_locked(|| conn.execute("DELETE FROM llm_entries WHERE id=?1", params![id]))?;
    tracing::info!(id, changes = rows, "LLM entry deleted");
    Ok(rows > 0)
}

/**
 * \brief Lists all providers ordered by id.
 */
pub fn list_providers(conn: &Connection) -> Result<Vec<ProviderEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, base_url, api_key, model, label, is_active FROM llm_entries ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map([], map_entry)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_provider_by_id(conn: &Connection, id: i64) -> Result<Option<ProviderEntry>> {
    conn.query_row(
        "SELECT id, base_url, api_key, model, label, is_active FROM llm_entries WHERE id=?1",
        params![id],
        map_entry,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_active_providers(conn: &Connection) -> Result<Vec<ProviderEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, base_url, api_key, model, label, is_active FROM llm_entries WHERE is_active<>0 ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map([], map_entry)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/**
 * \brief Clears every active flag and sets `id` active in one IMMEDIATE transaction.
 * \details An unknown `id` rolls back without touching the current active row.
 */
pub fn set_active_exclusive(conn: &mut Connection, id: i64) -> Result<ActivationOutcome> {
    let outcome = retry_on_locked(|| activate_in_tx(conn, id))?;
    match outcome {
        ActivationOutcome::Activated => tracing::info!(id, "LLM entry set as active"),
        ActivationOutcome::AlreadyActive => tracing::debug!(id, "LLM entry already active"),
        ActivationOutcome::NotFound => tracing::warn!(id, "activation target not found"),
    }
    Ok(outcome)
}

fn activate_in_tx(conn: &mut Connection, id: i64) -> rusqlite::Result<ActivationOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current: Option<bool> = tx
        .query_row(
            "SELECT is_active FROM llm_entries WHERE id=?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(was_active) = current else {
        return Ok(ActivationOutcome::NotFound);
    };
    let cleared = tx.execute(
        "UPDATE llm_entries SET is_active=0 WHERE is_active<>0 AND id<>?1",
        params![id],
    )?;
    if !was_active {
        tx.execute(
            "UPDATE llm_entries SET is_active=1 WHERE id=?1",
            params![id],
        )?;
    }
    tx.commit()?;
    if was_active && cleared == 0 {
        Ok(ActivationOutcome::AlreadyActive)
    } else {
        Ok(ActivationOutcome::Activated)
    }
}

/**
 * \brief Retries on SQLite lock contention with linear backoff, at most 6 attempts.
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    for attempt in 0..=MAX_RETRIES {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                let backoff = Duration::from_millis(200 * (attempt as u64 + 1));
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("retry_on_locked should have returned within the loop");
}
