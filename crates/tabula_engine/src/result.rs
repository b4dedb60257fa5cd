//! Query result cursor

use std::collections::VecDeque;

use crate::tx::Tx;
use crate::types::{Document, EngineError, FieldBuffer};

/// Pull-based row source behind a lazy cursor.
pub type RowStream = Box<dyn Iterator<Item = Result<FieldBuffer, EngineError>> + Send>;

enum Rows {
    Empty,
    Lazy(RowStream),
    Materialized(VecDeque<FieldBuffer>),
}

/// Forward-only sequence of documents produced by a query.
///
/// [`Cursor::next`] lends the current row until the next advance. Use
/// [`FieldBuffer::from_document`] or [`Cursor::collect_documents`] to keep rows
/// around. A cursor returned by [`crate::Database::query`] may own the
/// transaction it reads from; [`Cursor::close`] ends that transaction.
pub struct Cursor {
    rows: Rows,
    current: Option<FieldBuffer>,
    owner: Option<Tx>,
}

impl Cursor {
    pub(crate) fn empty() -> Self {
        Self::with_rows(Rows::Empty)
    }

    pub(crate) fn lazy(rows: RowStream) -> Self {
        Self::with_rows(Rows::Lazy(rows))
    }

    pub(crate) fn materialized(rows: VecDeque<FieldBuffer>) -> Self {
        Self::with_rows(Rows::Materialized(rows))
    }

    fn with_rows(rows: Rows) -> Self {
        Self { rows, current: None, owner: None }
    }

    /// Hands the implicit transaction to the cursor; it ends on close.
    pub(crate) fn with_owner(mut self, tx: Tx) -> Self {
        self.owner = Some(tx);
        self
    }

    /// True when no row is left to pull from the engine.
    pub fn is_materialized(&self) -> bool {
        !matches!(self.rows, Rows::Lazy(_))
    }

    /// Advances to the next row. `Ok(None)` marks the end of the sequence.
    ///
    /// An evaluation or storage error ends the cursor.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<&dyn Document>, EngineError> {
        let pulled = match &mut self.rows {
            Rows::Empty => Ok(None),
            Rows::Lazy(rows) => rows.next().transpose(),
            Rows::Materialized(rows) => Ok(rows.pop_front()),
        };
        match pulled {
            Ok(Some(doc)) => {
                self.current = Some(doc);
                Ok(self.current.as_ref().map(|d| d as &dyn Document))
            }
            Ok(None) => {
                self.rows = Rows::Empty;
                self.current = None;
                Ok(None)
            }
            Err(e) => {
                self.rows = Rows::Empty;
                self.current = None;
                Err(e)
            }
        }
    }

    /// Detached copy of the next row, if any.
    pub fn first(&mut self) -> Result<Option<FieldBuffer>, EngineError> {
        match self.next()? {
            Some(doc) => Ok(Some(FieldBuffer::from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// Calls `f` for every remaining row; the first error stops iteration.
    pub fn iterate<F>(&mut self, mut f: F) -> Result<(), EngineError>
    where
        F: FnMut(&dyn Document) -> Result<(), EngineError>,
    {
        while let Some(doc) = self.next()? {
            f(doc)?;
        }
        Ok(())
    }

    /// Detached copies of every remaining row.
    pub fn collect_documents(&mut self) -> Result<Vec<FieldBuffer>, EngineError> {
        let mut out = Vec::new();
        self.iterate(|doc| {
            out.push(FieldBuffer::from_document(doc)?);
            Ok(())
        })?;
        Ok(out)
    }

    /// Releases the rows and ends the owned transaction, if any.
    pub fn close(mut self) -> Result<(), EngineError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), EngineError> {
        self.rows = Rows::Empty;
        self.current = None;
        match self.owner.take() {
            Some(mut tx) => tx.rollback(),
            None => Ok(()),
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.owner.is_some() {
            tracing::warn!("cursor dropped without close; ending its transaction");
            if let Err(e) = self.finish() {
                tracing::warn!(error = %e, "rollback of cursor transaction failed");
            }
        }
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rows = match &self.rows {
            Rows::Empty => "empty",
            Rows::Lazy(_) => "lazy",
            Rows::Materialized(_) => "materialized",
        };
        f.debug_struct("Cursor")
            .field("rows", &rows)
            .field("owns_tx", &self.owner.is_some())
            .finish()
    }
}
