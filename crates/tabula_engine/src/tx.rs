//! Transaction handle over an engine transaction.

use crate::exec::{self, Param, Plan};
use crate::result::Cursor;
use crate::types::{DocId, Document, EngineError, EngineTransaction, FieldBuffer};

/// Prefix of tables the database keeps for itself.
pub(crate) const INTERNAL_TABLE_PREFIX: &str = "__tabula";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// Opaque handle to a table inside a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub(crate) name: String,
}

impl Table {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A read-only or read-write transaction.
///
/// Ends in exactly one terminal state. Dropping an active transaction rolls
/// it back.
pub struct Tx {
    inner: Box<dyn EngineTransaction>,
    writable: bool,
    state: TxState,
}

impl Tx {
    pub(crate) fn new(inner: Box<dyn EngineTransaction>, writable: bool) -> Self {
        tracing::debug!(writable, "transaction started");
        Self { inner, writable, state: TxState::Active }
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Commits a writable transaction.
    ///
    /// A failed engine commit leaves the transaction active so it can still be
    /// rolled back. Committing twice is a no-op.
    pub fn commit(&mut self) -> Result<(), EngineError> {
        match self.state {
            TxState::Committed => return Ok(()),
            TxState::RolledBack => return Err(EngineError::TransactionClosed),
            TxState::Active => {}
        }
        if !self.writable {
            return Err(EngineError::ReadOnly);
        }
        self.inner.commit()?;
        self.state = TxState::Committed;
        tracing::debug!("transaction committed");
        Ok(())
    }

    /// Discards the transaction. No-op once it has ended.
    ///
    /// The transaction counts as rolled back even when the engine reports an
    /// error, which is returned.
    pub fn rollback(&mut self) -> Result<(), EngineError> {
        if self.state != TxState::Active {
            return Ok(());
        }
        self.state = TxState::RolledBack;
        let res = self.inner.rollback();
        tracing::debug!(writable = self.writable, ok = res.is_ok(), "transaction rolled back");
        res
    }

    /// Rolls back while another error is already on its way out.
    pub(crate) fn abort(&mut self) {
        if let Err(e) = self.rollback() {
            tracing::warn!(error = %e, "rollback after failure also failed");
        }
    }

    fn ensure_active(&self) -> Result<(), EngineError> {
        match self.state {
            TxState::Active => Ok(()),
            _ => Err(EngineError::TransactionClosed),
        }
    }

    // -----------------------
    // Tables
    // -----------------------

    pub fn get_table(&self, name: &str) -> Result<Table, EngineError> {
        self.ensure_active()?;
        if !self.inner.table_exists(name)? {
            return Err(EngineError::TableNotFound(name.to_string()));
        }
        Ok(Table { name: name.to_string() })
    }

    /// User tables, sorted by name.
    pub fn list_tables(&self) -> Result<Vec<String>, EngineError> {
        self.ensure_active()?;
        let mut names: Vec<String> = self
            .inner
            .list_tables()?
            .into_iter()
            .filter(|n| !n.starts_with(INTERNAL_TABLE_PREFIX))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn create_table(&mut self, name: &str) -> Result<Table, EngineError> {
        self.ensure_active()?;
        if name.starts_with(INTERNAL_TABLE_PREFIX) {
            return Err(EngineError::InvalidArgument(format!("reserved table name: {name}")));
        }
        self.inner.create_table(name)?;
        Ok(Table { name: name.to_string() })
    }

    pub fn drop_table(&mut self, name: &str) -> Result<(), EngineError> {
        self.ensure_active()?;
        if name.starts_with(INTERNAL_TABLE_PREFIX) {
            return Err(EngineError::InvalidArgument(format!("reserved table name: {name}")));
        }
        self.inner.drop_table(name)
    }

    // -----------------------
    // Documents
    // -----------------------

    pub fn insert(&mut self, table: &Table, doc: FieldBuffer) -> Result<DocId, EngineError> {
        self.ensure_active()?;
        self.inner.insert(&table.name, doc)
    }

    pub fn get_document(&self, table: &Table, id: DocId) -> Result<FieldBuffer, EngineError> {
        self.ensure_active()?;
        self.inner.get(&table.name, id)?.ok_or(EngineError::DocumentNotFound)
    }

    pub fn replace(&mut self, table: &Table, id: DocId, doc: FieldBuffer) -> Result<(), EngineError> {
        self.ensure_active()?;
        self.inner.replace(&table.name, id, doc)
    }

    pub fn delete(&mut self, table: &Table, id: DocId) -> Result<(), EngineError> {
        self.ensure_active()?;
        self.inner.delete(&table.name, id)
    }

    /// Visits every document of `table` in id order until `f` fails.
    pub fn iterate<F>(&self, table: &Table, mut f: F) -> Result<(), EngineError>
    where
        F: FnMut(DocId, &dyn Document) -> Result<(), EngineError>,
    {
        self.ensure_active()?;
        for row in self.inner.scan(&table.name)? {
            let (id, doc) = row?;
            f(id, &doc)?;
        }
        Ok(())
    }

    pub fn count(&self, table: &Table) -> Result<usize, EngineError> {
        self.ensure_active()?;
        let mut n = 0;
        for row in self.inner.scan(&table.name)? {
            row?;
            n += 1;
        }
        Ok(n)
    }

    // -----------------------
    // Queries
    // -----------------------

    /// Runs a query inside this transaction. The cursor does not need to be
    /// closed before the transaction ends.
    pub fn query(&mut self, text: &str, args: &[Param]) -> Result<Cursor, EngineError> {
        let plan = exec::parse(text)?;
        self.run(&plan, args, false)
    }

    /// Runs a statement and discards its rows.
    pub fn exec(&mut self, text: &str, args: &[Param]) -> Result<(), EngineError> {
        self.query(text, args)?.close()
    }

    /// Detached copy of the first row, or `DocumentNotFound`.
    pub fn query_document(&mut self, text: &str, args: &[Param]) -> Result<FieldBuffer, EngineError> {
        let plan = exec::parse(text)?.limited(1);
        let mut cursor = self.run(&plan, args, true)?;
        let first = cursor.first();
        let closed = cursor.close();
        match first {
            Ok(Some(doc)) => closed.map(|()| doc),
            Ok(None) => closed.and(Err(EngineError::DocumentNotFound)),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn run(&mut self, plan: &Plan, args: &[Param], materialize_eagerly: bool) -> Result<Cursor, EngineError> {
        self.ensure_active()?;
        if !plan.is_read_only() && !self.writable {
            return Err(EngineError::ReadOnly);
        }
        exec::execute(plan, self.inner.as_mut(), args, materialize_eagerly)
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            tracing::warn!(writable = self.writable, "transaction dropped while active; rolling back");
            if let Err(e) = self.rollback() {
                tracing::warn!(error = %e, "rollback on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Tx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("writable", &self.writable)
            .field("state", &self.state)
            .finish()
    }
}
