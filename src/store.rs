//! Sink and state store seams, plus a directory-backed implementation.
//!
//! The pipeline only talks to the [`Sink`] and [`StateStore`] traits. A hosted
//! connector platform would supply its own; [`LocalStore`] keeps everything in
//! a directory for local runs:
//!
//! ```text
//! output_dir/
//! ├── article.json   # {"<primary key>": {row}, ...}
//! └── state.json     # {"cursor": {"last_published_at": ..., "last_page_token": ...}}
//! ```

use crate::error::StoreError;
use crate::models::{OutputRow, SyncState};
use crate::utils::ensure_writable_dir;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

/// State key under which the sync cursor is stored.
pub const CURSOR_KEY: &str = "cursor";

const STATE_FILE: &str = "state.json";

/// Destination for emitted rows, upserted by primary key.
pub trait Sink {
    /// Insert `row` into `table`, replacing any row with the same primary key.
    async fn upsert(
        &mut self,
        table: &str,
        primary_key: &str,
        row: &OutputRow,
    ) -> Result<(), StoreError>;

    /// Make every upsert so far durable.
    async fn flush(&mut self) -> Result<(), StoreError>;
}

/// Key-value persistence for connector state.
pub trait StateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Read the cursor, defaulting to an empty one on first run.
pub async fn load_cursor<S: StateStore>(store: &S) -> Result<SyncState, StoreError> {
    match store.get(CURSOR_KEY).await? {
        Some(value) => serde_json::from_value(value).map_err(|source| StoreError::Serde {
            what: CURSOR_KEY.to_string(),
            source,
        }),
        None => Ok(SyncState::default()),
    }
}

/// Persist the cursor.
pub async fn save_cursor<S: StateStore>(
    store: &mut S,
    state: &SyncState,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(state).map_err(|source| StoreError::Serde {
        what: CURSOR_KEY.to_string(),
        source,
    })?;
    store.set(CURSOR_KEY, value).await
}

/// Rows of one table keyed by primary key value.
pub type TableRows = BTreeMap<String, Value>;

/// Serialize `row` and extract its primary key as a string.
pub fn keyed_row(primary_key: &str, row: &OutputRow) -> Result<(String, Value), StoreError> {
    let value = serde_json::to_value(row).map_err(|source| StoreError::Serde {
        what: format!("row {}", row.id),
        source,
    })?;
    let key = match value.get(primary_key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => {
            return Err(StoreError::MissingPrimaryKey(primary_key.to_string()));
        }
        Some(other) => other.to_string(),
    };
    Ok((key, value))
}

/// Directory-backed [`Sink`] and [`StateStore`].
///
/// Tables are loaded lazily on first upsert and rewritten on [`Sink::flush`];
/// state is written through on every [`StateStore::set`]. Files are replaced
/// atomically via a temporary sibling and a rename.
#[derive(Debug)]
pub struct LocalStore {
    dir: PathBuf,
    tables: BTreeMap<String, TableRows>,
    dirty: BTreeSet<String>,
    state: Map<String, Value>,
}

impl LocalStore {
    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory holding `<table>.json` files and `state.json`
    ///
    /// # Returns
    ///
    /// A store with the persisted state loaded. Table files are read on first
    /// use.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] when the directory cannot be created or written to,
    /// [`StoreError::Serde`] when `state.json` is not a JSON object.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut store = LocalStore::open(Path::new("./sync_output")).await?;
    /// let cursor = load_cursor(&store).await?;
    /// ```
    #[instrument(level = "info", skip_all, fields(dir = %dir.display()))]
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        ensure_writable_dir(dir).await?;
        let state = read_json(&dir.join(STATE_FILE)).await?.unwrap_or_default();
        debug!(?state, "Loaded state");
        Ok(Self {
            dir: dir.to_path_buf(),
            tables: BTreeMap::new(),
            dirty: BTreeSet::new(),
            state,
        })
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.json"))
    }

    /// Current rows of `table`, including unflushed upserts.
    pub async fn rows(&mut self, table: &str) -> Result<&TableRows, StoreError> {
        Ok(&*self.table_mut(table).await?)
    }

    async fn table_mut(&mut self, table: &str) -> Result<&mut TableRows, StoreError> {
        if !self.tables.contains_key(table) {
            let rows = read_json(&self.table_path(table)).await?.unwrap_or_default();
            self.tables.insert(table.to_string(), rows);
        }
        Ok(self.tables.entry(table.to_string()).or_default())
    }
}

impl Sink for LocalStore {
    async fn upsert(
        &mut self,
        table: &str,
        primary_key: &str,
        row: &OutputRow,
    ) -> Result<(), StoreError> {
        let (key, value) = keyed_row(primary_key, row)?;
        self.table_mut(table).await?.insert(key, value);
        self.dirty.insert(table.to_string());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), StoreError> {
        for table in std::mem::take(&mut self.dirty) {
            let path = self.table_path(&table);
            if let Some(rows) = self.tables.get(&table) {
                write_json(&path, rows).await?;
                info!(path = %path.display(), rows = rows.len(), "Flushed table");
            }
        }
        Ok(())
    }
}

impl StateStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.state.get(key).cloned())
    }

    async fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        self.state.insert(key.to_string(), value);
        write_json(&self.dir.join(STATE_FILE), &self.state).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|source| StoreError::Serde {
            what: path.display().to_string(),
            source,
        })
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serde {
        what: path.display().to_string(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::write(&tmp, json).await.map_err(io_err)?;
    fs::rename(&tmp, path).await.map_err(io_err)
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use crate::fetch::tests::article;
    use crate::models::{ARTICLE_TABLE, LinguisticMetrics, PRIMARY_KEY, merge};
    use chrono::{TimeZone, Utc};

    fn metrics(clarity: f64) -> LinguisticMetrics {
        LinguisticMetrics {
            clarity,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_same_id_keeps_latest_row() {
        let mut store = MemoryStore::default();
        let first = merge(article("a", "climate", 2), Some(&metrics(0.1)));
        let second = merge(article("a", "climate", 2), Some(&metrics(0.9)));
        store.upsert(ARTICLE_TABLE, PRIMARY_KEY, &first).await.unwrap();
        store.upsert(ARTICLE_TABLE, PRIMARY_KEY, &second).await.unwrap();

        let rows = store.rows(ARTICLE_TABLE);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].clarity, Some(0.9));
    }

    #[test]
    fn test_keyed_row_requires_primary_key() {
        let row = merge(article("a", "climate", 2), None);
        let (key, _) = keyed_row(PRIMARY_KEY, &row).unwrap();
        assert_eq!(key, "a");
        assert!(matches!(
            keyed_row("author", &row),
            Err(StoreError::MissingPrimaryKey(_))
        ));
    }

    #[tokio::test]
    async fn test_cursor_defaults_when_absent() {
        let store = MemoryStore::default();
        assert_eq!(load_cursor(&store).await.unwrap(), SyncState::default());
    }

    #[tokio::test]
    async fn test_local_store_round_trip_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let cursor = SyncState {
            last_published_at: Some(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap()),
            last_page_token: None,
        };

        {
            let mut store = LocalStore::open(tmp.path()).await.unwrap();
            let row = merge(article("a", "climate", 2), None);
            store.upsert(ARTICLE_TABLE, PRIMARY_KEY, &row).await.unwrap();
            store.flush().await.unwrap();
            save_cursor(&mut store, &cursor).await.unwrap();
        }

        let mut store = LocalStore::open(tmp.path()).await.unwrap();
        assert_eq!(load_cursor(&store).await.unwrap(), cursor);

        let row = merge(article("b", "climate", 3), Some(&metrics(0.5)));
        store.upsert(ARTICLE_TABLE, PRIMARY_KEY, &row).await.unwrap();
        let rows = store.rows(ARTICLE_TABLE).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.contains_key("a"));
        assert!(tmp.path().join("article.json").exists());
        assert!(!tmp.path().join("article.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_local_store_rejects_corrupt_state() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(STATE_FILE), "not json").unwrap();
        let err = LocalStore::open(tmp.path()).await.unwrap_err();
        assert!(matches!(err, StoreError::Serde { .. }));
    }
}
