//! Integration tests: Database façade over the in-memory engine

use tabula_engine::{named, params, Database, Document, EngineError, FieldBuffer, TxState, Value};

fn db_with_users() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.exec("CREATE TABLE users", &[]).unwrap();
    db.exec(
        "INSERT INTO users (name, age) VALUES (?, ?), (?, ?), (?, ?)",
        &params!["alice", 30, "bob", 17, "carol", 45],
    )
    .unwrap();
    db
}

fn names(db: &Database, query: &str) -> Vec<Value> {
    let mut cursor = db.query(query, &[]).unwrap();
    let docs = cursor.collect_documents().unwrap();
    cursor.close().unwrap();
    docs.iter().map(|d| d.get("name").cloned().unwrap_or(Value::Null)).collect()
}

// =============================================================================
// Terminal states
// =============================================================================

#[test]
fn update_commits_on_success() {
    let db = db_with_users();
    let id = db
        .update_table("users", |tx, users| {
            let mut doc = FieldBuffer::new();
            doc.add("name", "dave").add("age", 22);
            tx.insert(users, doc)
        })
        .unwrap();

    let dave = db.view_table("users", |tx, users| tx.get_document(users, id)).unwrap();
    assert_eq!(dave.get("name"), Some(&Value::from("dave")));
}

#[test]
fn update_error_discards_writes() {
    let db = db_with_users();
    let err = db
        .update(|tx| {
            tx.exec("INSERT INTO users (name) VALUES ('mallory')", &[])?;
            Err::<(), _>(EngineError::Exec("callback failed".into()))
        })
        .unwrap_err();
    assert_eq!(err, EngineError::Exec("callback failed".into()));

    let found = db.query_document("SELECT * FROM users WHERE name = 'mallory'", &[]);
    assert_eq!(found, Err(EngineError::DocumentNotFound));
}

#[test]
fn update_on_missing_table_rolls_back() {
    let db = Database::open_in_memory().unwrap();
    let err = db
        .update(|tx| {
            tx.create_table("audit")?;
            tx.get_table("users")
        })
        .unwrap_err();
    assert_eq!(err, EngineError::TableNotFound("users".into()));

    let tables = db.view(|tx| tx.list_tables()).unwrap();
    assert!(tables.is_empty(), "no table must survive: {tables:?}");
    assert_eq!(
        db.view(|tx| tx.get_table("users")).unwrap_err(),
        EngineError::TableNotFound("users".into())
    );
}

#[test]
fn view_rejects_writes() {
    let db = db_with_users();
    let err = db
        .view(|tx| tx.exec("DELETE FROM users", &[]))
        .unwrap_err();
    assert_eq!(err, EngineError::ReadOnly);

    let err = db
        .view(|tx| tx.exec("CREATE TABLE IF NOT EXISTS users", &[]))
        .unwrap_err();
    assert_eq!(err, EngineError::ReadOnly);

    let err = db
        .view(|tx| {
            let users = tx.get_table("users")?;
            tx.insert(&users, FieldBuffer::new())
        })
        .unwrap_err();
    assert_eq!(err, EngineError::ReadOnly);

    assert_eq!(names(&db, "SELECT name FROM users").len(), 3);
}

#[test]
fn rollback_twice_and_after_commit_are_noops() {
    let db = db_with_users();

    let mut tx = db.begin(true).unwrap();
    tx.exec("DELETE FROM users WHERE age < 18", &[]).unwrap();
    tx.rollback().unwrap();
    tx.rollback().unwrap();
    assert_eq!(tx.state(), TxState::RolledBack);
    assert_eq!(tx.commit(), Err(EngineError::TransactionClosed));
    assert_eq!(tx.exec("DELETE FROM users", &[]), Err(EngineError::TransactionClosed));

    let mut tx = db.begin(true).unwrap();
    tx.exec("DELETE FROM users WHERE age < 18", &[]).unwrap();
    tx.commit().unwrap();
    tx.commit().unwrap();
    tx.rollback().unwrap();
    assert_eq!(tx.state(), TxState::Committed);

    assert_eq!(names(&db, "SELECT name FROM users ORDER BY name"), vec![
        Value::from("alice"),
        Value::from("carol"),
    ]);
}

#[test]
fn read_only_commit_is_rejected_and_stays_active() {
    let db = db_with_users();
    let mut tx = db.begin(false).unwrap();
    assert_eq!(tx.commit(), Err(EngineError::ReadOnly));
    assert_eq!(tx.state(), TxState::Active);
    tx.rollback().unwrap();
}

#[test]
fn dropped_transaction_rolls_back() {
    let db = db_with_users();
    {
        let mut tx = db.begin(true).unwrap();
        tx.exec("DROP TABLE users", &[]).unwrap();
    }
    assert_eq!(names(&db, "SELECT * FROM users").len(), 3);
}

// =============================================================================
// Queries
// =============================================================================

#[test]
fn query_document_not_found() {
    let db = db_with_users();
    assert_eq!(
        db.query_document("SELECT * FROM users WHERE age > 100", &[]),
        Err(EngineError::DocumentNotFound)
    );
    let err = db
        .view(|tx| tx.query_document("SELECT * FROM users WHERE name = ?", &params!["zed"]))
        .unwrap_err();
    assert_eq!(err, EngineError::DocumentNotFound);
}

#[test]
fn query_document_is_detached() {
    let db = db_with_users();
    let doc = db
        .view(|tx| tx.query_document("SELECT name, age FROM users WHERE age > $min ORDER BY age DESC", &[named("min", 18)]))
        .unwrap();
    drop(db);

    assert_eq!(doc.get("name"), Some(&Value::from("carol")));
    assert_eq!(doc.get("age"), Some(&Value::Int(45)));
}

#[test]
fn exec_matches_query_then_close() {
    let a = db_with_users();
    let b = db_with_users();

    for (q, args) in [
        ("UPDATE users SET age = age + 1 WHERE name = ?", params!["bob"]),
        ("DELETE FROM users WHERE age > ?", params![40]),
        ("INSERT INTO nowhere (x) VALUES (1)", params![]),
        ("SELECT * FROM users WHERE age = ?", params![]),
        ("SELECT * FROM", params![]),
    ] {
        let via_exec = a.exec(q, &args);
        let via_query = b.query(q, &args).and_then(|c| c.close());
        assert_eq!(via_exec, via_query, "{q}");
    }
    assert_eq!(
        names(&a, "SELECT name, age FROM users ORDER BY name"),
        names(&b, "SELECT name, age FROM users ORDER BY name")
    );
    assert_eq!(
        a.query_document("SELECT age FROM users WHERE name = 'bob'", &[]).unwrap().get("age"),
        Some(&Value::Int(18))
    );
}

#[test]
fn parameter_count_mismatch() {
    let db = db_with_users();
    assert_eq!(
        db.exec("SELECT * FROM users WHERE age > ? AND name = ?", &params![1]),
        Err(EngineError::ParamCount { expected: 2, got: 1 })
    );
    assert!(matches!(
        db.exec("SELECT * FROM users WHERE name = $name", &[]),
        Err(EngineError::Exec(_))
    ));
}

#[test]
fn parse_errors_surface() {
    let db = db_with_users();
    assert!(matches!(db.query("SELEC * FROM users", &[]), Err(EngineError::Parse(_))));
    assert!(matches!(
        db.view(|tx| tx.exec("DELETE users", &[])),
        Err(EngineError::Parse(_))
    ));
}

#[test]
fn select_with_filter_order_limit_offset() {
    let db = db_with_users();
    assert_eq!(
        names(&db, "SELECT name FROM users WHERE age >= 18 ORDER BY age DESC LIMIT 1 OFFSET 1"),
        vec![Value::from("alice")]
    );
    assert_eq!(
        names(&db, "SELECT * FROM users WHERE nickname IS NULL AND NOT name = 'bob' ORDER BY name"),
        vec![Value::from("alice"), Value::from("carol")]
    );
}

#[test]
fn cursor_iterate_and_live_view() {
    let db = db_with_users();
    let mut cursor = db.query("SELECT name, age * 2 AS double FROM users ORDER BY name", &[]).unwrap();
    assert!(!cursor.is_materialized());

    let first = cursor.next().unwrap().unwrap();
    assert_eq!(first.get_by_field("name"), Some(&Value::from("alice")));
    assert_eq!(first.get_by_field("double"), Some(&Value::Int(60)));

    let mut rest = Vec::new();
    cursor
        .iterate(|doc| {
            rest.push(doc.get_by_field("name").cloned());
            Ok(())
        })
        .unwrap();
    assert_eq!(rest, vec![Some(Value::from("bob")), Some(Value::from("carol"))]);
    assert!(cursor.next().unwrap().is_none());
    cursor.close().unwrap();
}

#[test]
fn lazy_cursor_surfaces_evaluation_errors() {
    let db = db_with_users();
    db.exec("INSERT INTO users VALUES {name: 'zero', age: 0}", &[]).unwrap();

    let mut cursor = db.query("SELECT 60 / age AS ratio FROM users ORDER BY age", &[]).unwrap();
    assert!(matches!(cursor.next(), Err(EngineError::Exec(_))));
    assert!(cursor.next().unwrap().is_none());
    cursor.close().unwrap();

    assert!(matches!(
        db.query_document("SELECT 60 / age FROM users WHERE name = 'zero'", &[]),
        Err(EngineError::Exec(_))
    ));
}

#[test]
fn open_cursor_keeps_its_snapshot() {
    let db = db_with_users();
    let mut cursor = db.query("SELECT name FROM users", &[]).unwrap();
    db.exec("DELETE FROM users", &[]).unwrap();
    assert_eq!(cursor.collect_documents().unwrap().len(), 3);
    cursor.close().unwrap();
    assert!(names(&db, "SELECT name FROM users").is_empty());
}

#[test]
fn update_nested_paths() {
    let db = Database::open_in_memory().unwrap();
    db.update(|tx| {
        tx.exec("CREATE TABLE docs", &[])?;
        tx.exec("INSERT INTO docs VALUES {id: 1, address: {city: 'Paris'}}, ?", &params![{
            let mut fb = FieldBuffer::new();
            fb.add("id", 2);
            fb
        }])?;
        tx.exec("UPDATE docs SET address.city = 'Lyon', address.zip = $zip WHERE id = 1", &[named("zip", "69001")])
    })
    .unwrap();

    let doc = db.query_document("SELECT address.city AS city, address.zip AS zip FROM docs WHERE id = 1", &[]).unwrap();
    assert_eq!(doc.get("city"), Some(&Value::from("Lyon")));
    assert_eq!(doc.get("zip"), Some(&Value::from("69001")));

    let doc = db.query_document("SELECT * FROM docs WHERE id = 2", &[]).unwrap();
    assert_eq!(doc.len(), 1);
}

#[test]
fn failed_update_writes_no_rows() {
    let db = Database::open_in_memory().unwrap();
    db.exec("CREATE TABLE t", &[]).unwrap();
    db.exec("INSERT INTO t (a, b) VALUES (10, 2), (10, 0)", &[]).unwrap();

    // the statement error is swallowed so the transaction commits
    db.update(|tx| {
        let err = tx.exec("UPDATE t SET a = a / b", &[]).unwrap_err();
        assert!(matches!(err, EngineError::Exec(_)), "{err:?}");
        Ok(())
    })
    .unwrap();

    let mut cursor = db.query("SELECT a FROM t", &[]).unwrap();
    let rows = cursor.collect_documents().unwrap();
    cursor.close().unwrap();
    let values: Vec<_> = rows.iter().map(|d| d.get("a").cloned()).collect();
    assert_eq!(values, vec![Some(Value::Int(10)), Some(Value::Int(10))]);
}

#[test]
fn numeric_path_segments_index_nested_arrays() {
    let db = Database::open_in_memory().unwrap();
    db.exec("CREATE TABLE t", &[]).unwrap();
    db.exec("INSERT INTO t VALUES {m: [[1, 2], [3]]}", &[]).unwrap();

    let doc = db.query_document("SELECT m.0.1 AS x, m.1.0 AS y FROM t", &[]).unwrap();
    assert_eq!(doc.get("x"), Some(&Value::Int(2)));
    assert_eq!(doc.get("y"), Some(&Value::Int(3)));
    assert!(db.query_document("SELECT * FROM t WHERE m.0.1 = 2", &[]).is_ok());
}

#[test]
fn insert_rejects_non_documents() {
    let db = db_with_users();
    assert!(matches!(
        db.exec("INSERT INTO users VALUES ?", &params![42]),
        Err(EngineError::Exec(_))
    ));
}

#[test]
fn table_ddl_through_queries() {
    let db = Database::open_in_memory().unwrap();
    db.exec("CREATE TABLE t", &[]).unwrap();
    assert_eq!(db.exec("CREATE TABLE t", &[]), Err(EngineError::TableAlreadyExists("t".into())));
    db.exec("CREATE TABLE IF NOT EXISTS t", &[]).unwrap();
    db.exec("DROP TABLE t", &[]).unwrap();
    assert_eq!(db.exec("DROP TABLE t", &[]), Err(EngineError::TableNotFound("t".into())));
    db.exec("DROP TABLE IF EXISTS t", &[]).unwrap();
    assert_eq!(db.exec("SELECT * FROM t", &[]), Err(EngineError::TableNotFound("t".into())));
}

// =============================================================================
// Transaction-bound document API
// =============================================================================

#[test]
fn document_operations_through_table_handle() {
    let db = db_with_users();
    db.update_table("users", |tx, users| {
        assert_eq!(users.name(), "users");
        assert_eq!(tx.count(users)?, 3);

        let mut ids = Vec::new();
        tx.iterate(users, |id, doc| {
            if doc.get_by_field("age").and_then(Value::as_i64).unwrap_or(0) < 18 {
                ids.push(id);
            }
            Ok(())
        })?;
        assert_eq!(ids.len(), 1);

        let mut minor = tx.get_document(users, ids[0])?;
        minor.set("age", 18);
        tx.replace(users, ids[0], minor)?;
        tx.delete(users, 1)?;
        assert_eq!(tx.get_document(users, 1), Err(EngineError::DocumentNotFound));
        Ok(())
    })
    .unwrap();

    assert_eq!(names(&db, "SELECT name FROM users WHERE age = 18"), vec![Value::from("bob")]);
    assert_eq!(names(&db, "SELECT name FROM users").len(), 2);
}

#[test]
fn internal_tables_are_hidden_and_reserved() {
    let db = Database::open_in_memory().unwrap();
    assert!(db.view(|tx| tx.list_tables()).unwrap().is_empty());
    assert!(matches!(
        db.update(|tx| tx.drop_table("__tabula_meta")),
        Err(EngineError::InvalidArgument(_))
    ));
}

#[test]
fn iterate_stops_at_first_error() {
    let db = db_with_users();
    let mut seen = 0;
    let err = db
        .view_table("users", |tx, users| {
            tx.iterate(users, |_, _| {
                seen += 1;
                Err(EngineError::Exec("stop".into()))
            })
        })
        .unwrap_err();
    assert_eq!(err, EngineError::Exec("stop".into()));
    assert_eq!(seen, 1);
}

#[test]
fn close_shuts_down_engine() {
    let engine = tabula_engine::MemoryEngine::new();
    let db = Database::open(engine.clone()).unwrap();
    db.close().unwrap();
    assert!(engine.is_closed());
}

#[test]
fn reopen_checks_schema_version() {
    let engine = tabula_engine::MemoryEngine::new();
    let db = Database::open(engine.clone()).unwrap();
    db.exec("CREATE TABLE keep", &[]).unwrap();
    drop(db);

    let db = Database::open(engine.clone()).unwrap();
    assert_eq!(db.view(|tx| tx.list_tables()).unwrap(), vec!["keep".to_string()]);
    drop(db);

    {
        use tabula_engine::StorageEngine;
        let mut tx = engine.begin(true).unwrap();
        tx.replace("__tabula_meta", 1, [("schema_version", Value::Int(99))].into_iter().collect())
            .unwrap();
        tx.commit().unwrap();
    }
    assert!(matches!(Database::open(engine), Err(EngineError::Init(_))));
}
