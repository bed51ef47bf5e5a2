use std::time::Duration;

use sql_dbx::DatabaseType;
use sql_dbx::prelude::*;
use tempfile::TempDir;

const SCHEMA: &str = "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);";

async fn open(dir: &TempDir, max_connections: u32) -> SqliteDatabase {
    let path = dir.path().join("dbx.sqlite");
    let db = SqliteDatabase::builder(path.to_string_lossy().into_owned())
        .max_connections(max_connections)
        .build()
        .await
        .expect("open sqlite");
    db.execute_batch(SCHEMA).await.expect("schema");
    db
}

async fn user_count(db: &SqliteDatabase) -> i64 {
    let row = db
        .query_row("SELECT COUNT(*) AS n FROM users", &[])
        .await
        .into_row()
        .expect("count row");
    *row.get("n").and_then(RowValues::as_int).expect("integer count")
}

fn name(value: &str) -> [RowValues; 1] {
    [RowValues::Text(value.to_string())]
}

#[tokio::test]
async fn commit_persists_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open(&dir, 4).await;

    let id = transaction_with_result(
        background(),
        &db,
        |ctx| async move {
            let tx = ctx.executor();
            tx.execute_context(&ctx, "INSERT INTO users (name) VALUES (?1)", &name("ann"))
                .await?;
            let res = tx
                .execute_context(&ctx, "INSERT INTO users (name) VALUES (?1)", &name("bob"))
                .await?;
            Ok::<_, DbxError>(res.last_insert_id)
        },
        &[],
    )
    .await
    .expect("transaction");

    assert_eq!(id, Some(2));
    assert_eq!(user_count(&db).await, 2);

    let row = db
        .query_row("SELECT name FROM users WHERE id = ?1", &[RowValues::Int(2)])
        .await
        .into_row()
        .expect("row");
    assert_eq!(row.get("name").and_then(RowValues::as_text), Some("bob"));
}

#[tokio::test]
async fn failed_operation_discards_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open(&dir, 4).await;

    let err = transaction(
        background(),
        &db,
        |ctx| async move {
            ctx.executor()
                .execute_context(&ctx, "INSERT INTO users (name) VALUES (?1)", &name("ann"))
                .await?;
            ctx.executor()
                .execute_context(&ctx, "INSERT INTO missing_table VALUES (1)", &[])
                .await?;
            Ok::<(), DbxError>(())
        },
        &[],
    )
    .await
    .expect_err("second insert fails");

    assert!(matches!(err, DbxError::SqliteError(_)));
    assert_eq!(user_count(&db).await, 0);
}

#[tokio::test]
async fn nested_scopes_share_one_transaction() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = &open(&dir, 4).await;

    let err = transaction(
        background(),
        db,
        |outer| async move {
            outer
                .executor()
                .execute_context(&outer, "INSERT INTO users (name) VALUES (?1)", &name("outer"))
                .await?;
            transaction(
                outer.clone(),
                db,
                |inner| async move {
                    assert!(inner.shares_executor_with(&outer));
                    inner
                        .executor()
                        .execute_context(
                            &inner,
                            "INSERT INTO users (name) VALUES (?1)",
                            &name("inner"),
                        )
                        .await?;
                    Ok::<(), DbxError>(())
                },
                &[],
            )
            .await?;
            Err(DbxError::Other("abort after nested work".into()))
        },
        &[],
    )
    .await
    .expect_err("outer aborts");

    assert!(matches!(err, DbxError::Other(_)));
    // the inner insert went through the outer transaction and was rolled back with it
    assert_eq!(user_count(&db).await, 0);
}

#[tokio::test]
async fn new_transaction_commits_independently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = &open(&dir, 4).await;

    let err = transaction(
        background(),
        db,
        |outer| async move {
            transaction(
                outer.clone(),
                db,
                |audit| async move {
                    assert!(!audit.shares_executor_with(&outer));
                    audit
                        .executor()
                        .execute_context(
                            &audit,
                            "INSERT INTO users (name) VALUES (?1)",
                            &name("audit"),
                        )
                        .await?;
                    Ok::<(), DbxError>(())
                },
                &[new_transaction()],
            )
            .await?;
            Err(DbxError::Other("outer fails".into()))
        },
        &[],
    )
    .await
    .expect_err("outer fails");

    assert!(matches!(err, DbxError::Other(_)));
    assert_eq!(user_count(&db).await, 1);
}

#[tokio::test]
async fn read_only_transaction_rejects_writes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open(&dir, 1).await;

    let err = transaction(
        background(),
        &db,
        |ctx| async move {
            ctx.executor()
                .execute_context(&ctx, "INSERT INTO users (name) VALUES (?1)", &name("ro"))
                .await?;
            Ok::<(), DbxError>(())
        },
        &[read_only(true)],
    )
    .await
    .expect_err("write in read-only transaction");
    assert!(matches!(err, DbxError::SqliteError(_)));

    // the single pooled connection is writable again afterwards
    db.execute("INSERT INTO users (name) VALUES (?1)", &name("rw"))
        .await
        .expect("write after read-only transaction");
    assert_eq!(user_count(&db).await, 1);
}

#[tokio::test]
async fn cancelled_context_stops_statements_and_begin() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open(&dir, 2).await;
    let (ctx, cancel) = with_cancel(&background());
    cancel.cancel();

    let err = db
        .execute_context(ctx.as_ref(), "INSERT INTO users (name) VALUES (?1)", &name("x"))
        .await
        .expect_err("cancelled");
    assert!(matches!(err, DbxError::Cancelled));

    let err = transaction(ctx, &db, |_ctx| async { Ok::<(), DbxError>(()) }, &[])
        .await
        .expect_err("begin cancelled");
    match err {
        DbxError::Begin(inner) => assert!(matches!(*inner, DbxError::Cancelled)),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(user_count(&db).await, 0);
}

#[tokio::test]
async fn deadline_interrupts_running_statement() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open(&dir, 2).await;
    let (ctx, _cancel) = with_timeout(&background(), Duration::from_millis(20));

    let err = db
        .query_context(
            ctx.as_ref(),
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 20000000) \
             SELECT COUNT(*) FROM c",
            &[],
        )
        .await
        .expect_err("deadline");
    assert!(matches!(err, DbxError::DeadlineExceeded));
}

#[tokio::test]
async fn finished_transaction_rejects_further_use() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open(&dir, 2).await;

    let tx = db.begin().await.expect("begin");
    tx.execute("INSERT INTO users (name) VALUES (?1)", &name("ann"))
        .await
        .expect("insert");
    tx.commit().await.expect("commit");

    assert!(matches!(
        tx.execute("INSERT INTO users (name) VALUES (?1)", &name("bob"))
            .await,
        Err(DbxError::TransactionClosed)
    ));
    assert!(matches!(tx.rollback().await, Err(DbxError::TransactionClosed)));
    assert_eq!(user_count(&db).await, 1);
}

#[tokio::test]
async fn missing_row_is_reported_on_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open(&dir, 2).await;

    let single = db
        .query_row("SELECT name FROM users WHERE id = ?1", &[RowValues::Int(99)])
        .await;
    assert!(single.err().is_none());
    assert!(matches!(single.into_row(), Err(DbxError::NoRows)));

    let broken = db.query_row("SELECT nope FROM users", &[]).await;
    assert!(broken.err().is_some());
}

#[tokio::test]
async fn closed_database_refuses_work() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = open(&dir, 2).await;
    assert_eq!(db.database_type(), DatabaseType::Sqlite);
    let open_tx = db.begin().await.expect("begin before close");

    db.close().await.expect("close");
    open_tx
        .execute("INSERT INTO users (name) VALUES (?1)", &name("early"))
        .await
        .expect("transaction begun before close keeps working");
    open_tx.commit().await.expect("commit after close");
    assert!(matches!(
        db.execute("INSERT INTO users (name) VALUES (?1)", &name("late"))
            .await,
        Err(DbxError::ConnectionError(_))
    ));
    assert!(matches!(db.begin().await, Err(DbxError::ConnectionError(_))));
}

#[tokio::test]
async fn in_memory_database_round_trip() {
    let db = SqliteDatabase::new(SqliteOptions::in_memory())
        .await
        .expect("in-memory");
    db.execute_batch(SCHEMA).await.expect("schema");

    transaction(
        background(),
        &db,
        |ctx| async move {
            ctx.executor()
                .execute_context(&ctx, "INSERT INTO users (name) VALUES (?1)", &name("mem"))
                .await?;
            Ok::<(), DbxError>(())
        },
        &[],
    )
    .await
    .expect("transaction");

    assert_eq!(user_count(&db).await, 1);
}
