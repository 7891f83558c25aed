//! Embedded SQLite store for the bridge ledger.
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::{
    path::Path,
    sync::{Arc, Mutex},
};
use tokio::task;

use crate::ledger::Ledger;
use crate::store::Store;

const LEDGER_KEY: &str = "ledger";

/// Simple key/value table:
///   state(key TEXT PRIMARY KEY, value TEXT NOT NULL)
///
/// Keys used:
///  - ledger : JSON-encoded [`Ledger`]
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Creates/initializes the SQLite file at `path`.
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite at {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            "#,
        )?;
        Self::init(conn)
    }

    /// In-memory store, kept alive for as long as any clone of it exists.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn kv_get(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
        let mut stmt = conn.prepare("SELECT value FROM state WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            let v: String = row.get(0)?;
            Ok(Some(v))
        } else {
            Ok(None)
        }
    }

    fn kv_set(conn: &Connection, key: &str, val: &str) -> anyhow::Result<()> {
        conn.execute(
            "INSERT INTO state(key,value) VALUES(?1,?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, val],
        )?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| anyhow!("sqlite connection lock poisoned"))?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_ledger(&self) -> anyhow::Result<Ledger> {
        self.with_conn(|conn| match Self::kv_get(conn, LEDGER_KEY)? {
            Some(json) => serde_json::from_str(&json).context("decode stored ledger"),
            None => Ok(Ledger::default()),
        })
        .await
    }

    async fn save_ledger(&self, ledger: &Ledger) -> anyhow::Result<()> {
        let json = serde_json::to_string(ledger).context("encode ledger")?;
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            Self::kv_set(&tx, LEDGER_KEY, &json)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
