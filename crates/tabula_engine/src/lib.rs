//! Tabula Engine (library)
//! Embedded document database: transactions, queries and cursors over a pluggable storage engine.
//!
//! ```ignore
//! use tabula_engine::{params, Database};
//!
//! let db = Database::open_in_memory()?;
//! db.exec("CREATE TABLE users", &[])?;
//! db.exec("INSERT INTO users (name, age) VALUES (?, ?)", &params!["alice", 30])?;
//! let alice = db.query_document("SELECT * FROM users WHERE age > ?", &params![18])?;
//! ```

pub mod types;
pub mod exec;
pub mod result;
pub mod tx;

use std::sync::Arc;

pub use exec::{named, params_from_json, Param, Plan, ValueExt};
pub use result::Cursor;
pub use tx::{Table, Tx, TxState};
pub use types::{
    DocId,
    Document,
    DocumentStream,
    EngineError,
    EngineTransaction,
    FieldBuffer,
    StorageEngine,
    Value,
};

#[cfg(feature = "mem")]
pub use tabula_storage_mem::{MemoryEngine, MemoryEngineConfig, WriterPolicy};

/// Internal table holding database metadata.
const META_TABLE: &str = "__tabula_meta";
const SCHEMA_VERSION: i64 = 1;

/// Database is the embedded entrypoint. It owns the storage engine.
pub struct Database {
    engine: Arc<dyn StorageEngine>,
}

impl Database {
    /// Opens a database on `engine`, creating the metadata table on first use.
    pub fn open(engine: impl StorageEngine) -> Result<Self, EngineError> {
        Self::open_shared(Arc::new(engine))
    }

    /// Like [`Database::open`] for an engine that is already shared.
    pub fn open_shared(engine: Arc<dyn StorageEngine>) -> Result<Self, EngineError> {
        let mut tx = engine
            .begin(true)
            .map_err(|e| EngineError::Init(format!("begin bootstrap transaction: {e}")))?;
        if let Err(e) = bootstrap_in(tx.as_mut()).and_then(|()| tx.commit()) {
            if let Err(rb) = tx.rollback() {
                tracing::warn!(error = %rb, "rollback of bootstrap transaction failed");
            }
            return Err(match e {
                EngineError::Init(_) => e,
                other => EngineError::Init(other.to_string()),
            });
        }
        tracing::info!(schema_version = SCHEMA_VERSION, "database opened");
        Ok(Self { engine })
    }

    /// Opens a database backed by a fresh in-memory engine.
    #[cfg(feature = "mem")]
    pub fn open_in_memory() -> Result<Self, EngineError> {
        Self::open(MemoryEngine::new())
    }

    /// Closes the underlying engine.
    pub fn close(self) -> Result<(), EngineError> {
        tracing::info!("closing database");
        self.engine.close()
    }

    /// Starts a transaction. The caller must commit or roll it back; dropping
    /// it rolls back.
    pub fn begin(&self, writable: bool) -> Result<Tx, EngineError> {
        Ok(Tx::new(self.engine.begin(writable)?, writable))
    }

    /// Runs `f` in a read-only transaction that is always rolled back.
    ///
    /// The error of `f` wins over a rollback error.
    pub fn view<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Tx) -> Result<T, EngineError>,
    {
        let mut tx = self.begin(false)?;
        let res = f(&mut tx);
        let rb = tx.rollback();
        match res {
            Ok(v) => rb.map(|()| v),
            Err(e) => Err(e),
        }
    }

    /// Runs `f` in a read-write transaction, committed when `f` succeeds and
    /// rolled back otherwise.
    pub fn update<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Tx) -> Result<T, EngineError>,
    {
        let mut tx = self.begin(true)?;
        let res = f(&mut tx).and_then(|v| tx.commit().map(|()| v));
        // no-op once committed
        let rb = tx.rollback();
        match res {
            Ok(v) => rb.map(|()| v),
            Err(e) => Err(e),
        }
    }

    /// [`Database::view`] with the named table resolved up front.
    pub fn view_table<T, F>(&self, name: &str, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Tx, &Table) -> Result<T, EngineError>,
    {
        self.view(|tx| {
            let table = tx.get_table(name)?;
            f(tx, &table)
        })
    }

    /// [`Database::update`] with the named table resolved up front.
    pub fn update_table<T, F>(&self, name: &str, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Tx, &Table) -> Result<T, EngineError>,
    {
        self.update(|tx| {
            let table = tx.get_table(name)?;
            f(tx, &table)
        })
    }

    /// Runs a query in its own transaction.
    ///
    /// Reads return a cursor that owns a read-only transaction; close it to
    /// end the transaction. Writes are committed before returning and yield an
    /// empty cursor.
    pub fn query(&self, text: &str, args: &[Param]) -> Result<Cursor, EngineError> {
        let plan = exec::parse(text)?;
        self.run_implicit(&plan, args, false)
    }

    /// Runs a statement in its own transaction and discards its rows.
    pub fn exec(&self, text: &str, args: &[Param]) -> Result<(), EngineError> {
        self.query(text, args)?.close()
    }

    /// Detached copy of the first row of a query, or `DocumentNotFound`.
    pub fn query_document(&self, text: &str, args: &[Param]) -> Result<FieldBuffer, EngineError> {
        let plan = exec::parse(text)?.limited(1);
        let mut cursor = self.run_implicit(&plan, args, true)?;
        let first = cursor.first();
        let closed = cursor.close();
        match first {
            Ok(Some(doc)) => closed.map(|()| doc),
            Ok(None) => closed.and(Err(EngineError::DocumentNotFound)),
            Err(e) => Err(e),
        }
    }

    fn run_implicit(&self, plan: &Plan, args: &[Param], materialize_eagerly: bool) -> Result<Cursor, EngineError> {
        let read_only = plan.is_read_only();
        let mut tx = self.begin(!read_only)?;
        let cursor = match tx.run(plan, args, materialize_eagerly) {
            Ok(cursor) => cursor,
            Err(e) => {
                tx.abort();
                return Err(e);
            }
        };

        if !read_only {
            if let Err(e) = tx.commit() {
                tx.abort();
                return Err(e);
            }
            return Ok(cursor);
        }
        if cursor.is_materialized() {
            tx.rollback()?;
            Ok(cursor)
        } else {
            Ok(cursor.with_owner(tx))
        }
    }
}

/// Creates or checks the metadata table inside the bootstrap transaction.
fn bootstrap_in(tx: &mut dyn EngineTransaction) -> Result<(), EngineError> {
    if !tx.table_exists(META_TABLE)? {
        tx.create_table(META_TABLE)?;
        let mut meta = FieldBuffer::new();
        meta.add("schema_version", SCHEMA_VERSION);
        tx.insert(META_TABLE, meta)?;
        tracing::debug!(schema_version = SCHEMA_VERSION, "metadata table created");
        return Ok(());
    }

    let mut found = None;
    for row in tx.scan(META_TABLE)? {
        let (_, doc) = row?;
        found = doc.get("schema_version").and_then(Value::as_i64);
        if found.is_some() {
            break;
        }
    }
    match found {
        Some(SCHEMA_VERSION) => Ok(()),
        Some(v) => Err(EngineError::Init(format!(
            "unsupported schema version {v} (expected {SCHEMA_VERSION})"
        ))),
        None => Err(EngineError::Init("metadata table has no schema_version".into())),
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
