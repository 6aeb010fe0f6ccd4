/// SQLite-backed hub storage.
///
/// One connection behind a `tokio::sync::Mutex`, as the rest of the hub only
/// ever issues short request/response calls. App schemas register collections
/// in the `collections` table; objects of every collection share one `objects`
/// table with their fields stored as JSON and filtered in Rust.
use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Value, json};
use storehub_core::{App, AppSchema, NewApp, PluginRecord, PluginStatus, Storage};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::operations::{Object, Operation, matches_filter};

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS apps (
        identifier      TEXT PRIMARY KEY,
        access_key_hash TEXT NOT NULL,
        is_remote       INTEGER NOT NULL,
        schema_json     TEXT NOT NULL,
        created_at      TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS plugins (
        identifier TEXT PRIMARY KEY,
        location   TEXT NOT NULL,
        status     TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS collections (
        name       TEXT PRIMARY KEY,
        namespace  TEXT NOT NULL,
        definition TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS objects (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        collection TEXT NOT NULL,
        data       TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_objects_collection ON objects(collection);";

pub struct SqliteStorage {
    conn: Mutex<Connection>,
    // Collections registered by applied schemas. Refreshed after every apply.
    collections: RwLock<BTreeSet<String>>,
}

impl SqliteStorage {
    /// Create or open a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {parent:?}"))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite hub database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL")?;
        let store = Self::from_connection(conn)?;
        info!(path = ?path, "Hub storage opened");
        Ok(store)
    }

    /// Open an in-memory database (for tests and ephemeral hubs).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize hub schema")?;
        let collections = load_collection_names(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            collections: RwLock::new(collections),
        })
    }

    /// Names of every registered collection.
    pub async fn collection_names(&self) -> Vec<String> {
        self.collections.read().await.iter().cloned().collect()
    }

    async fn refresh_collections(&self) -> Result<()> {
        let names = {
            let conn = self.conn.lock().await;
            load_collection_names(&conn)?
        };
        *self.collections.write().await = names;
        Ok(())
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        if !self.collections.read().await.contains(collection) {
            bail!("Unknown collection '{collection}'");
        }
        Ok(())
    }

    async fn execute(&self, operation: Operation) -> Result<Value> {
        self.ensure_collection(operation.collection()).await?;
        let conn = self.conn.lock().await;

        match operation {
            Operation::CreateObject {
                collection,
                mut object,
            } => {
                object.remove("id");
                conn.execute(
                    "INSERT INTO objects (collection, data, created_at) VALUES (?1, ?2, ?3)",
                    params![
                        collection,
                        serde_json::to_string(&object)?,
                        chrono::Utc::now().to_rfc3339(),
                    ],
                )?;
                object.insert("id".into(), json!(conn.last_insert_rowid()));
                Ok(Value::Object(object))
            }
            Operation::FindObject { collection, filter } => {
                let found = select_matching(&conn, &collection, &filter)?
                    .into_iter()
                    .next()
                    .map(|(_, object)| Value::Object(object));
                Ok(found.unwrap_or(Value::Null))
            }
            Operation::FindObjects { collection, filter } => {
                let found = select_matching(&conn, &collection, &filter)?
                    .into_iter()
                    .map(|(_, object)| Value::Object(object))
                    .collect();
                Ok(Value::Array(found))
            }
            Operation::CountObjects { collection, filter } => {
                Ok(json!(select_matching(&conn, &collection, &filter)?.len()))
            }
            Operation::UpdateObjects {
                collection,
                filter,
                mut updates,
            } => {
                updates.remove("id");
                let matching = select_matching(&conn, &collection, &filter)?;
                for (id, mut object) in matching.iter().cloned() {
                    object.remove("id");
                    object.extend(updates.clone());
                    conn.execute(
                        "UPDATE objects SET data = ?1 WHERE id = ?2",
                        params![serde_json::to_string(&object)?, id],
                    )?;
                }
                Ok(json!(matching.len()))
            }
            Operation::DeleteObjects { collection, filter } => {
                let matching = select_matching(&conn, &collection, &filter)?;
                for (id, _) in &matching {
                    conn.execute("DELETE FROM objects WHERE id = ?1", params![id])?;
                }
                Ok(json!(matching.len()))
            }
        }
    }
}

fn load_collection_names(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM collections")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(names)
}

/// Objects of `collection` matching `filter`, in insertion order, with their `id` field set.
fn select_matching(
    conn: &Connection,
    collection: &str,
    filter: &Object,
) -> Result<Vec<(i64, Object)>> {
    let mut stmt =
        conn.prepare("SELECT id, data FROM objects WHERE collection = ?1 ORDER BY id ASC")?;
    let rows = stmt
        .query_map(params![collection], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut matching = Vec::new();
    for (id, data) in rows {
        let mut object: Object = serde_json::from_str(&data)
            .with_context(|| format!("Corrupt object {id} in '{collection}'"))?;
        object.insert("id".into(), json!(id));
        if matches_filter(&object, filter) {
            matching.push((id, object));
        }
    }
    Ok(matching)
}

fn row_to_app(row: &rusqlite::Row) -> rusqlite::Result<(String, String, bool, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn app_from_parts(parts: (String, String, bool, String)) -> Result<App> {
    let (identifier, access_key_hash, is_remote, schema_json) = parts;
    let schema: AppSchema = serde_json::from_str(&schema_json)
        .with_context(|| format!("Corrupt schema for app '{identifier}'"))?;
    Ok(App {
        identifier,
        access_key_hash,
        is_remote,
        schema,
    })
}

fn record_from_parts(identifier: String, location: String, status: String) -> Result<PluginRecord> {
    let status: PluginStatus = status
        .parse()
        .map_err(|e: String| anyhow!("plugin '{identifier}': {e}"))?;
    Ok(PluginRecord {
        identifier,
        location: location.into(),
        status,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get_app(&self, identifier: &str) -> Result<Option<App>> {
        let conn = self.conn.lock().await;
        let parts = conn
            .query_row(
                "SELECT identifier, access_key_hash, is_remote, schema_json
                 FROM apps WHERE identifier = ?1",
                params![identifier],
                row_to_app,
            )
            .optional()?;
        parts.map(app_from_parts).transpose()
    }

    async fn create_app(&self, app: NewApp) -> Result<App> {
        let conn = self.conn.lock().await;
        let schema = AppSchema::default();
        conn.execute(
            "INSERT INTO apps (identifier, access_key_hash, is_remote, schema_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                app.identifier,
                app.access_key_hash,
                app.is_remote,
                serde_json::to_string(&schema)?,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to create app '{}'", app.identifier))?;
        debug!(app = %app.identifier, "App record created");
        Ok(App {
            identifier: app.identifier,
            access_key_hash: app.access_key_hash,
            is_remote: app.is_remote,
            schema,
        })
    }

    async fn update_app_schema(&self, identifier: &str, schema: &AppSchema) -> Result<AppSchema> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let current: Option<String> = tx
            .query_row(
                "SELECT schema_json FROM apps WHERE identifier = ?1",
                params![identifier],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            bail!("App '{identifier}' does not exist");
        };

        let mut merged: AppSchema = serde_json::from_str(&current)
            .with_context(|| format!("Corrupt schema for app '{identifier}'"))?;
        merged.merge(schema);
        tx.execute(
            "UPDATE apps SET schema_json = ?1 WHERE identifier = ?2",
            params![serde_json::to_string(&merged)?, identifier],
        )?;
        tx.commit()?;
        Ok(merged)
    }

    async fn list_apps(&self) -> Result<Vec<App>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT identifier, access_key_hash, is_remote, schema_json
             FROM apps ORDER BY identifier ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_app)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(app_from_parts).collect()
    }

    async fn delete_app(&self, identifier: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute("DELETE FROM apps WHERE identifier = ?1", params![identifier])
            .with_context(|| format!("Failed to delete app '{identifier}'"))?;
        debug!(app = %identifier, removed, "App record deleted");
        Ok(removed > 0)
    }

    async fn get_plugin(&self, identifier: &str) -> Result<Option<PluginRecord>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT identifier, location, status FROM plugins WHERE identifier = ?1",
                params![identifier],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        row.map(|(identifier, location, status)| record_from_parts(identifier, location, status))
            .transpose()
    }

    async fn list_plugins(&self) -> Result<Vec<PluginRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT identifier, location, status FROM plugins ORDER BY identifier ASC")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<Vec<(String, String, String)>>>()?;
        rows.into_iter()
            .map(|(identifier, location, status)| record_from_parts(identifier, location, status))
            .collect()
    }

    async fn put_plugin(&self, record: &PluginRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO plugins (identifier, location, status) VALUES (?1, ?2, ?3)",
            params![
                record.identifier,
                record.location.to_string_lossy().into_owned(),
                record.status.as_str(),
            ],
        )?;
        debug!(plugin = %record.identifier, status = %record.status, "Plugin record stored");
        Ok(())
    }

    async fn run_operation(&self, name: &str, args: &[Value]) -> Result<Value> {
        let operation = Operation::parse(name, args)?;
        self.execute(operation).await
    }

    async fn apply_schema(&self, namespace: &str, schema: &AppSchema) -> Result<()> {
        {
            let mut conn = self.conn.lock().await;
            let tx = conn.transaction()?;
            for (name, definition) in &schema.collection_definitions {
                tx.execute(
                    "INSERT OR REPLACE INTO collections (name, namespace, definition)
                     VALUES (?1, ?2, ?3)",
                    params![name, namespace, serde_json::to_string(definition)?],
                )?;
            }
            tx.commit()?;
        }
        self.refresh_collections().await?;
        info!(
            namespace = %namespace,
            collections = schema.collection_definitions.len(),
            "Schema applied"
        );
        Ok(())
    }
}
