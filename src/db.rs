//! Local SQLite storage for the QR checkout client.
//!
//! Uses rusqlite with WAL mode. Holds the `local_settings` key/value store
//! (payment config, persisted carts) and the journal of finished QR payment
//! sessions. Payment sessions themselves are never stored here: a restart
//! abandons any session that was in flight.

use rusqlite::{params, Connection};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Database file name inside the data directory.
pub const DB_FILE_NAME: &str = "pos.db";

/// Shared database handle.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Schema steps, applied in order. Each runs in its own transaction together
/// with its `schema_version` row.
const MIGRATIONS: &[(i32, &str, &str)] = &[
    (
        1,
        "local_settings",
        "CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );",
    ),
    (
        2,
        "qr_payment_journal",
        "CREATE TABLE IF NOT EXISTS qr_payment_journal (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            checkout_context TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            outcome TEXT NOT NULL,
            order_ref TEXT,
            created_at TEXT NOT NULL,
            recorded_at TEXT DEFAULT (datetime('now')),
            UNIQUE(session_id, outcome)
        );
        CREATE INDEX IF NOT EXISTS idx_qr_payment_journal_context
            ON qr_payment_journal(checkout_context);",
    ),
];

fn latest_version() -> i32 {
    MIGRATIONS.last().map(|(v, _, _)| *v).unwrap_or(0)
}

/// Open (or create) `{data_dir}/pos.db` and bring its schema up to date.
///
/// A file that cannot be opened or migrated is treated as corrupt: it is
/// removed together with its WAL side files and created again, once.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir)
        .map_err(|e| format!("create data dir {}: {e}", data_dir.display()))?;
    let db_path = data_dir.join(DB_FILE_NAME);

    let conn = match open_file(&db_path) {
        Ok(conn) => conn,
        Err(first) => {
            warn!(path = %db_path.display(), error = %first, "local database unusable, recreating");
            for suffix in ["", "-wal", "-shm"] {
                let mut side = db_path.clone().into_os_string();
                side.push(suffix);
                let _ = fs::remove_file(PathBuf::from(side));
            }
            open_file(&db_path).map_err(|e| format!("database open failed after retry: {e}"))?
        }
    };

    info!(path = %db_path.display(), schema = latest_version(), "local database ready");
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Migrated in-memory database for tests and for terminals that should not
/// keep carts across restarts.
pub fn open_in_memory() -> Result<DbState, String> {
    let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|e| format!("pragma setup: {e}"))?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

fn open_file(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA foreign_keys = ON;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn schema_version(conn: &Connection) -> Result<i32, String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("read schema_version: {e}"))
}

fn run_migrations(conn: &Connection) -> Result<(), String> {
    let current = schema_version(conn)?;
    for (version, name, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
        let batch = format!(
            "BEGIN;\n{sql}\nINSERT INTO schema_version (version) VALUES ({version});\nCOMMIT;"
        );
        if let Err(e) = conn.execute_batch(&batch) {
            let _ = conn.execute_batch("ROLLBACK;");
            error!(version, name, error = %e, "migration failed");
            return Err(format!("migration v{version} ({name}): {e}"));
        }
        info!(version, name, "applied migration");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

/// Remove a setting. Succeeds when the key does not exist.
pub fn delete_setting(conn: &Connection, category: &str, key: &str) -> Result<(), String> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
    )
    .map_err(|e| format!("delete_setting: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// QR payment journal
// ---------------------------------------------------------------------------

/// One finished session as recorded in `qr_payment_journal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub session_id: String,
    pub checkout_context: String,
    pub amount_cents: i64,
    pub currency: String,
    pub outcome: String,
    pub order_ref: Option<String>,
    pub created_at: String,
}

/// Record how a session ended. A second record of the same outcome for the
/// same session is ignored, so callers may record without checking first.
pub fn record_session_outcome(conn: &Connection, entry: &JournalEntry) -> Result<bool, String> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO qr_payment_journal (
                session_id, checkout_context, amount_cents, currency,
                outcome, order_ref, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.session_id,
                entry.checkout_context,
                entry.amount_cents,
                entry.currency,
                entry.outcome,
                entry.order_ref,
                entry.created_at,
            ],
        )
        .map_err(|e| format!("record_session_outcome: {e}"))?;
    Ok(inserted > 0)
}

/// Journal entries for one checkout context, oldest first.
pub fn journal_for_context(conn: &Connection, context: &str) -> Result<Vec<JournalEntry>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT session_id, checkout_context, amount_cents, currency, outcome,
                    order_ref, created_at
             FROM qr_payment_journal
             WHERE checkout_context = ?1
             ORDER BY id ASC",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![context], |row| {
            Ok(JournalEntry {
                session_id: row.get(0)?,
                checkout_context: row.get(1)?,
                amount_cents: row.get(2)?,
                currency: row.get(3)?,
                outcome: row.get(4)?,
                order_ref: row.get(5)?,
                created_at: row.get(6)?,
            })
        })
        .map_err(|e| e.to_string())?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}
