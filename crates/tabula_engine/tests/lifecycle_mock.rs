//! Transaction lifecycle accounting using MockEngine
//!
//! MockEngine wraps the in-memory engine and counts every begin, commit and
//! rollback that reaches the storage layer. Commit and rollback failures can be
//! injected to check which error the façade reports and that every
//! transaction still ends exactly once.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tabula_engine::{
    params, Database, DocId, DocumentStream, EngineError, EngineTransaction, FieldBuffer,
    MemoryEngine, StorageEngine, TxState,
};

#[derive(Default)]
struct Stats {
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
}

impl Stats {
    fn snapshot(&self) -> (usize, usize, usize) {
        (
            self.begins.load(Ordering::SeqCst),
            self.commits.load(Ordering::SeqCst),
            self.rollbacks.load(Ordering::SeqCst),
        )
    }

    fn reset(&self) {
        self.begins.store(0, Ordering::SeqCst);
        self.commits.store(0, Ordering::SeqCst);
        self.rollbacks.store(0, Ordering::SeqCst);
    }
}

/// Mock engine that tracks transaction lifecycle calls
struct MockEngine {
    inner: MemoryEngine,
    stats: Arc<Stats>,
}

impl StorageEngine for MockEngine {
    fn begin(&self, writable: bool) -> Result<Box<dyn EngineTransaction>, EngineError> {
        let inner = self.inner.begin(writable)?;
        self.stats.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTx { inner, stats: self.stats.clone() }))
    }

    fn close(&self) -> Result<(), EngineError> {
        self.inner.close()
    }
}

struct MockTx {
    inner: Box<dyn EngineTransaction>,
    stats: Arc<Stats>,
}

impl EngineTransaction for MockTx {
    fn writable(&self) -> bool {
        self.inner.writable()
    }

    /// Counts attempts, including injected failures
    fn commit(&mut self) -> Result<(), EngineError> {
        self.stats.commits.fetch_add(1, Ordering::SeqCst);
        if self.stats.fail_commit.load(Ordering::SeqCst) {
            return Err(EngineError::StorageIo("injected commit failure".into()));
        }
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), EngineError> {
        self.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback()?;
        if self.stats.fail_rollback.load(Ordering::SeqCst) {
            return Err(EngineError::StorageIo("injected rollback failure".into()));
        }
        Ok(())
    }

    fn list_tables(&self) -> Result<Vec<String>, EngineError> {
        self.inner.list_tables()
    }

    fn table_exists(&self, name: &str) -> Result<bool, EngineError> {
        self.inner.table_exists(name)
    }

    fn create_table(&mut self, name: &str) -> Result<(), EngineError> {
        self.inner.create_table(name)
    }

    fn drop_table(&mut self, name: &str) -> Result<(), EngineError> {
        self.inner.drop_table(name)
    }

    fn scan(&self, table: &str) -> Result<DocumentStream, EngineError> {
        self.inner.scan(table)
    }

    fn get(&self, table: &str, id: DocId) -> Result<Option<FieldBuffer>, EngineError> {
        self.inner.get(table, id)
    }

    fn insert(&mut self, table: &str, doc: FieldBuffer) -> Result<DocId, EngineError> {
        self.inner.insert(table, doc)
    }

    fn replace(&mut self, table: &str, id: DocId, doc: FieldBuffer) -> Result<(), EngineError> {
        self.inner.replace(table, id, doc)
    }

    fn delete(&mut self, table: &str, id: DocId) -> Result<(), EngineError> {
        self.inner.delete(table, id)
    }
}

/// Opens a database with one `items` table and zeroed counters
fn open() -> (Database, Arc<Stats>) {
    let stats = Arc::new(Stats::default());
    let db = Database::open(MockEngine { inner: MemoryEngine::new(), stats: stats.clone() }).unwrap();
    db.exec("CREATE TABLE items", &[]).unwrap();
    db.exec("INSERT INTO items (n) VALUES (1), (2), (3)", &[]).unwrap();
    stats.reset();
    (db, stats)
}

#[test]
fn update_success_commits_once() {
    let (db, stats) = open();
    db.update(|tx| tx.exec("DELETE FROM items WHERE n = 1", &[])).unwrap();
    assert_eq!(stats.snapshot(), (1, 1, 0));
}

#[test]
fn update_failure_rolls_back_once() {
    let (db, stats) = open();
    let err = db.update(|tx| tx.exec("DELETE FROM items WHERE n = ?", &[])).unwrap_err();
    assert_eq!(err, EngineError::ParamCount { expected: 1, got: 0 });
    assert_eq!(stats.snapshot(), (1, 0, 1));
}

#[test]
fn failed_commit_is_reported_and_rolled_back() {
    let (db, stats) = open();
    stats.fail_commit.store(true, Ordering::SeqCst);
    stats.fail_rollback.store(true, Ordering::SeqCst);

    let err = db.update(|tx| tx.exec("DELETE FROM items", &[])).unwrap_err();
    assert_eq!(err, EngineError::StorageIo("injected commit failure".into()));
    assert_eq!(stats.snapshot(), (1, 1, 1));

    stats.fail_commit.store(false, Ordering::SeqCst);
    stats.fail_rollback.store(false, Ordering::SeqCst);
    assert_eq!(db.query_document("SELECT * FROM items WHERE n = 3", &[]).unwrap().len(), 1);
}

#[test]
fn failed_commit_leaves_transaction_active() {
    let (db, stats) = open();
    stats.fail_commit.store(true, Ordering::SeqCst);

    let mut tx = db.begin(true).unwrap();
    assert!(tx.commit().is_err());
    assert_eq!(tx.state(), TxState::Active);
    tx.rollback().unwrap();
    assert_eq!(tx.state(), TxState::RolledBack);
    assert_eq!(stats.snapshot(), (1, 1, 1));
}

#[test]
fn failed_rollback_still_ends_transaction() {
    let (db, stats) = open();
    stats.fail_rollback.store(true, Ordering::SeqCst);

    let mut tx = db.begin(false).unwrap();
    assert!(tx.rollback().is_err());
    assert_eq!(tx.state(), TxState::RolledBack);
    tx.rollback().unwrap();
    drop(tx);
    assert_eq!(stats.snapshot(), (1, 0, 1));
}

#[test]
fn view_reports_rollback_error_only_without_callback_error() {
    let (db, stats) = open();
    stats.fail_rollback.store(true, Ordering::SeqCst);

    let err = db.view(|tx| tx.list_tables()).unwrap_err();
    assert_eq!(err, EngineError::StorageIo("injected rollback failure".into()));

    let err = db
        .view(|tx| tx.get_table("missing").map(|_| ()))
        .unwrap_err();
    assert_eq!(err, EngineError::TableNotFound("missing".into()));
    assert_eq!(stats.snapshot(), (2, 0, 2));
}

#[test]
fn panicking_callback_rolls_back() {
    let (db, stats) = open();
    let res = catch_unwind(AssertUnwindSafe(|| {
        db.update(|tx| -> Result<(), EngineError> {
            tx.exec("DELETE FROM items", &[])?;
            panic!("callback panicked");
        })
    }));
    assert!(res.is_err());
    assert_eq!(stats.snapshot(), (1, 0, 1));
    assert_eq!(db.query("SELECT * FROM items", &[]).unwrap().collect_documents().unwrap().len(), 3);
}

#[test]
fn lazy_read_cursor_owns_its_transaction() {
    let (db, stats) = open();
    let mut cursor = db.query("SELECT * FROM items WHERE n > ?", &params![1]).unwrap();
    assert_eq!(stats.snapshot(), (1, 0, 0));
    assert_eq!(cursor.collect_documents().unwrap().len(), 2);
    assert_eq!(stats.snapshot(), (1, 0, 0));
    cursor.close().unwrap();
    assert_eq!(stats.snapshot(), (1, 0, 1));
}

#[test]
fn dropped_cursor_ends_its_transaction() {
    let (db, stats) = open();
    let cursor = db.query("SELECT * FROM items", &[]).unwrap();
    drop(cursor);
    assert_eq!(stats.snapshot(), (1, 0, 1));
}

#[test]
fn implicit_write_commits_before_returning() {
    let (db, stats) = open();
    let cursor = db.query("UPDATE items SET n = n * 10", &[]).unwrap();
    assert_eq!(stats.snapshot(), (1, 1, 0));
    cursor.close().unwrap();
    assert_eq!(stats.snapshot(), (1, 1, 0));

    stats.fail_commit.store(true, Ordering::SeqCst);
    assert!(db.exec("DELETE FROM items", &[]).is_err());
    assert_eq!(stats.snapshot(), (2, 2, 1));
}

#[test]
fn implicit_failures_roll_back() {
    let (db, stats) = open();
    assert!(db.exec("INSERT INTO missing (n) VALUES (1)", &[]).is_err());
    assert!(db.query("SELECT * FROM missing", &[]).is_err());
    assert_eq!(stats.snapshot(), (2, 0, 2));

    // parse errors never open a transaction
    assert!(db.exec("DELETE", &[]).is_err());
    assert_eq!(stats.snapshot(), (2, 0, 2));
}

#[test]
fn query_document_ends_its_transaction() {
    let (db, stats) = open();
    let doc = db.query_document("SELECT n FROM items ORDER BY n DESC", &[]).unwrap();
    assert_eq!(doc.get("n"), Some(&tabula_engine::Value::Int(3)));
    assert_eq!(stats.snapshot(), (1, 0, 1));

    assert_eq!(
        db.query_document("SELECT n FROM items WHERE n > 5", &[]),
        Err(EngineError::DocumentNotFound)
    );
    assert_eq!(stats.snapshot(), (2, 0, 2));
}

#[test]
fn bootstrap_failure_is_init_error() {
    let stats = Arc::new(Stats::default());
    stats.fail_commit.store(true, Ordering::SeqCst);
    let err = Database::open(MockEngine { inner: MemoryEngine::new(), stats: stats.clone() }).unwrap_err();
    assert!(matches!(err, EngineError::Init(_)), "{err:?}");
    assert_eq!(stats.snapshot(), (1, 1, 1));
}
