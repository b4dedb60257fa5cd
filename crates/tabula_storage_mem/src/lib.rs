//! In-memory storage engine.
//!
//! Read transactions pin the committed catalog at begin. Write transactions
//! work on a copy-on-write clone of it and publish the clone on commit, so a
//! rollback is just dropping the working copy. At most one writer is active.

pub mod config;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};

use tabula_core::{
    validate_table_name, DocId, DocumentStream, EngineError, EngineTransaction, FieldBuffer,
    StorageEngine,
};

pub use config::{MemoryEngineConfig, WriterPolicy};

#[derive(Clone, Debug, Default)]
struct TableData {
    next_id: DocId,
    docs: Arc<BTreeMap<DocId, FieldBuffer>>,
}

type Catalog = BTreeMap<String, TableData>;

struct Shared {
    committed: RwLock<Arc<Catalog>>,
    writer_active: Mutex<bool>,
    writer_released: Condvar,
    closed: AtomicBool,
    config: MemoryEngineConfig,
}

fn poisoned<T>(_: PoisonError<T>) -> EngineError {
    EngineError::Transaction("engine lock poisoned".into())
}

impl Shared {
    fn acquire_writer(&self) -> Result<(), EngineError> {
        let mut active = self.writer_active.lock().map_err(poisoned)?;
        match self.config.writer_policy {
            WriterPolicy::FailFast if *active => {
                return Err(EngineError::Transaction("a write transaction is already active".into()));
            }
            WriterPolicy::FailFast => {}
            WriterPolicy::Block => {
                while *active {
                    active = self.writer_released.wait(active).map_err(poisoned)?;
                }
            }
        }
        *active = true;
        Ok(())
    }

    fn release_writer(&self) {
        let mut active = self.writer_active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = false;
        self.writer_released.notify_one();
    }
}

/// Storage engine keeping every table in process memory.
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_config(MemoryEngineConfig::default())
    }

    pub fn with_config(config: MemoryEngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                committed: RwLock::new(Arc::new(Catalog::new())),
                writer_active: Mutex::new(false),
                writer_released: Condvar::new(),
                closed: AtomicBool::new(false),
                config,
            }),
        }
    }

    pub fn config(&self) -> &MemoryEngineConfig {
        &self.shared.config
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for MemoryEngine {
    fn begin(&self, writable: bool) -> Result<Box<dyn EngineTransaction>, EngineError> {
        if self.is_closed() {
            return Err(EngineError::Transaction("engine is closed".into()));
        }
        if writable {
            self.shared.acquire_writer()?;
        }
        let snapshot = match self.shared.committed.read() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                if writable {
                    self.shared.release_writer();
                }
                return Err(poisoned(e));
            }
        };
        tracing::debug!(writable, tables = snapshot.len(), "memory engine: begin");
        Ok(Box::new(MemoryTransaction {
            shared: self.shared.clone(),
            catalog: snapshot,
            writable,
            holds_writer: writable,
        }))
    }

    fn close(&self) -> Result<(), EngineError> {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("memory engine: closed");
        }
        Ok(())
    }
}

pub struct MemoryTransaction {
    shared: Arc<Shared>,
    catalog: Arc<Catalog>,
    writable: bool,
    holds_writer: bool,
}

impl MemoryTransaction {
    fn finish(&mut self) {
        if self.holds_writer {
            self.holds_writer = false;
            self.shared.release_writer();
        }
    }

    fn ensure_writable(&self) -> Result<(), EngineError> {
        if self.writable { Ok(()) } else { Err(EngineError::ReadOnly) }
    }

    fn table(&self, name: &str) -> Result<&TableData, EngineError> {
        self.catalog
            .get(name)
            .ok_or_else(|| EngineError::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableData, EngineError> {
        self.ensure_writable()?;
        Arc::make_mut(&mut self.catalog)
            .get_mut(name)
            .ok_or_else(|| EngineError::TableNotFound(name.to_string()))
    }
}

impl EngineTransaction for MemoryTransaction {
    fn writable(&self) -> bool {
        self.writable
    }

    fn commit(&mut self) -> Result<(), EngineError> {
        self.ensure_writable()?;
        {
            let mut committed = self.shared.committed.write().map_err(poisoned)?;
            *committed = self.catalog.clone();
        }
        tracing::debug!(tables = self.catalog.len(), "memory engine: commit");
        self.finish();
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), EngineError> {
        tracing::debug!(writable = self.writable, "memory engine: rollback");
        self.finish();
        Ok(())
    }

    fn list_tables(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.catalog.keys().cloned().collect())
    }

    fn table_exists(&self, name: &str) -> Result<bool, EngineError> {
        Ok(self.catalog.contains_key(name))
    }

    fn create_table(&mut self, name: &str) -> Result<(), EngineError> {
        self.ensure_writable()?;
        validate_table_name(name)?;
        if self.catalog.contains_key(name) {
            return Err(EngineError::TableAlreadyExists(name.to_string()));
        }
        Arc::make_mut(&mut self.catalog).insert(
            name.to_string(),
            TableData { next_id: 1, docs: Arc::new(BTreeMap::new()) },
        );
        Ok(())
    }

    fn drop_table(&mut self, name: &str) -> Result<(), EngineError> {
        self.ensure_writable()?;
        if !self.catalog.contains_key(name) {
            return Err(EngineError::TableNotFound(name.to_string()));
        }
        Arc::make_mut(&mut self.catalog).remove(name);
        Ok(())
    }

    fn scan(&self, table: &str) -> Result<DocumentStream, EngineError> {
        let docs = self.table(table)?.docs.clone();
        Ok(Box::new(TableScan { docs, from: Some(0) }))
    }

    fn get(&self, table: &str, id: DocId) -> Result<Option<FieldBuffer>, EngineError> {
        Ok(self.table(table)?.docs.get(&id).cloned())
    }

    fn insert(&mut self, table: &str, doc: FieldBuffer) -> Result<DocId, EngineError> {
        let t = self.table_mut(table)?;
        let id = t.next_id;
        t.next_id += 1;
        Arc::make_mut(&mut t.docs).insert(id, doc);
        Ok(id)
    }

    fn replace(&mut self, table: &str, id: DocId, doc: FieldBuffer) -> Result<(), EngineError> {
        let t = self.table_mut(table)?;
        if !t.docs.contains_key(&id) {
            return Err(EngineError::DocumentNotFound);
        }
        Arc::make_mut(&mut t.docs).insert(id, doc);
        Ok(())
    }

    fn delete(&mut self, table: &str, id: DocId) -> Result<(), EngineError> {
        let t = self.table_mut(table)?;
        if Arc::make_mut(&mut t.docs).remove(&id).is_none() {
            return Err(EngineError::DocumentNotFound);
        }
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Lazily walks one table version in key order.
struct TableScan {
    docs: Arc<BTreeMap<DocId, FieldBuffer>>,
    from: Option<DocId>,
}

impl Iterator for TableScan {
    type Item = Result<(DocId, FieldBuffer), EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        let from = self.from?;
        let (id, doc) = self.docs.range(from..).next()?;
        self.from = id.checked_add(1);
        Some(Ok((*id, doc.clone())))
    }
}
