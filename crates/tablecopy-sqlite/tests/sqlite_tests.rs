/// Integration tests for the SQLite store
use futures::StreamExt;
use pretty_assertions::assert_eq;
use tablecopy_core::{ColumnDescriptor, Connection, SqlType, TableRef, Value};
use tablecopy_sqlite::SqliteConnection;
use tempfile::TempDir;

/// Helper to create a file-backed database with a populated `person` table
async fn setup_test_database(rows: i64) -> (TempDir, SqliteConnection) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("tablecopy_test.db");
    let conn = SqliteConnection::open(db_path.to_str().unwrap())
        .expect("Failed to create test database");

    conn.execute(
        "CREATE TABLE person (id INTEGER PRIMARY KEY, first_name TEXT, last_name VARCHAR(40))",
        &[],
    )
    .await
    .expect("Failed to setup schema");

    let params: Vec<Vec<Value>> = (1..=rows)
        .map(|i| {
            vec![
                Value::Int64(i),
                Value::String(format!("first{}", i)),
                Value::String(format!("last{}", i)),
            ]
        })
        .collect();
    conn.execute_batch("INSERT INTO person VALUES (?, ?, ?)", &params)
        .await
        .expect("Failed to insert rows");

    (dir, conn)
}

#[tokio::test]
async fn test_stream_reads_all_rows_from_file_database() {
    let (_dir, conn) = setup_test_database(1000).await;

    let mut stream = conn
        .query_stream("SELECT id, last_name FROM person ORDER BY id", &[])
        .await
        .expect("stream should open");

    let mut count = 0;
    while let Some(row) = stream.next().await {
        let row = row.expect("row should decode");
        count += 1;
        assert_eq!(row.get(0), Some(&Value::Int64(count)));
    }
    assert_eq!(count, 1000);
}

#[tokio::test]
async fn test_stream_can_be_abandoned_early() {
    let (_dir, conn) = setup_test_database(2000).await;

    {
        let mut stream = conn
            .query_stream("SELECT * FROM person", &[])
            .await
            .unwrap();
        for _ in 0..10 {
            stream.next().await.unwrap().unwrap();
        }
    }

    // The writer is not blocked by the abandoned cursor
    let result = conn
        .execute("DELETE FROM person WHERE id > ?", &[Value::Int64(5)])
        .await
        .unwrap();
    assert_eq!(result.affected_rows, 1995);
}

#[tokio::test]
async fn test_stream_reports_prepare_errors_up_front() {
    let (_dir, conn) = setup_test_database(1).await;
    let result = conn.query_stream("SELECT * FROM missing_table", &[]).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_in_memory_stream_falls_back_to_materialized_rows() {
    let conn = SqliteConnection::open_in_memory().unwrap();
    conn.execute("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();
    conn.execute("INSERT INTO t VALUES (1), (2), (3)", &[]).await.unwrap();

    let rows: Vec<_> = conn
        .query_stream("SELECT x FROM t", &[])
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn test_describe_does_not_execute() {
    let (_dir, conn) = setup_test_database(3).await;
    let columns = conn
        .describe("SELECT id, last_name AS surname FROM person WHERE id > 1")
        .await
        .unwrap();

    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "surname"]);
    assert_eq!(columns[1].sql_type, SqlType::Varchar);
}

#[tokio::test]
async fn test_transaction_savepoint_isolates_failure() {
    let conn = SqliteConnection::open_in_memory().unwrap();
    conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[]).await.unwrap();

    let tx = conn.begin_transaction().await.unwrap();
    tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
    {
        let sp = tx.savepoints().expect("sqlite transactions support savepoints");
        sp.savepoint("row_2").await.unwrap();
        tx.execute("INSERT INTO t VALUES (2)", &[]).await.unwrap();
        sp.rollback_to_savepoint("row_2").await.unwrap();
        sp.release_savepoint("row_2").await.unwrap();
    }
    tx.commit().await.unwrap();

    let result = conn.query("SELECT id FROM t", &[]).await.unwrap();
    assert_eq!(result.rows.len(), 1);
}

#[tokio::test]
async fn test_rollback_discards_uncommitted_rows() {
    let conn = SqliteConnection::open_in_memory().unwrap();
    conn.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();

    let tx = conn.begin_transaction().await.unwrap();
    tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
    tx.rollback().await.unwrap();

    let result = conn.query("SELECT COUNT(*) FROM t", &[]).await.unwrap();
    assert_eq!(result.rows[0].get(0), Some(&Value::Int64(0)));
}

#[tokio::test]
async fn test_create_and_drop_table() {
    let conn = SqliteConnection::open_in_memory().unwrap();
    let mutation = conn.as_schema_mutation().unwrap();
    let catalog = conn.as_catalog().unwrap();
    let table = TableRef::new("staged");

    mutation
        .create_table(
            &table,
            &[
                ColumnDescriptor::new("id", "INTEGER").with_primary_key(true),
                ColumnDescriptor::new("label", "TEXT"),
            ],
        )
        .await
        .unwrap();
    assert!(catalog.table_exists(&table).await.unwrap());

    let columns = catalog.describe_columns(&table).await.unwrap();
    assert!(columns[0].is_primary_key);

    mutation.drop_table(&table, false).await.unwrap();
    assert!(!catalog.table_exists(&table).await.unwrap());

    // Dropping a missing table only fails when errors are not ignored
    assert!(mutation.drop_table(&table, false).await.is_err());
    mutation.drop_table(&table, true).await.unwrap();
}
