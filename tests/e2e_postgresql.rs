//! End-to-end tests against a live PostgreSQL server.
//!
//! Skipped unless `EI_SYNC_TEST_PG` holds a connection string, e.g.
//! `EI_SYNC_TEST_PG="host=localhost user=postgres password=postgres" cargo test --test e2e_postgresql`.

use ei_sync::{ImportCounts, Schema, Session};
use ei_sync_postgresql::PostgresProvider;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;
use tokio_postgres::{Client, NoTls};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn connection_string() -> Option<String> {
    std::env::var("EI_SYNC_TEST_PG").ok()
}

/// A fresh schema name, unique across parallel tests.
fn test_schema() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("ei_test_{}", nanos.wrapping_add(counter))
}

async fn connect(conn_str: &str) -> Result<Client, Box<dyn std::error::Error>> {
    let (client, connection) = tokio_postgres::connect(conn_str, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("PostgreSQL connection error: {e}");
        }
    });
    Ok(client)
}

async fn create_shop(client: &Client, schema: &str) -> Result<(), Box<dyn std::error::Error>> {
    client
        .batch_execute(&format!(
            "create schema {schema};
             create table {schema}.orders (id serial primary key, code text unique not null, total numeric(10, 2));
             create table {schema}.lines (
                 id serial primary key,
                 order_id int4 not null references {schema}.orders (id),
                 pos int4 not null,
                 qty int4,
                 unique (order_id, pos)
             );
             create table {schema}.orders_copy (id int4, code text, total numeric(10, 2));"
        ))
        .await?;
    Ok(())
}

async fn drop_shop(client: &Client, schema: &str) {
    let _ = client
        .batch_execute(&format!("drop schema if exists {schema} cascade"))
        .await;
}

fn shop_schema(schema: &str, load: Value) -> Schema {
    Schema::from_value(json!({
        "main": "orders",
        "extract": {
            "orders": {
                "type": "db", "table": format!("{schema}.orders"), "pk": "id", "sort": "id",
                "fields": ["code", "total"], "details": ["lines"], "output": "named"
            },
            "lines": {
                "type": "db", "table": format!("{schema}.lines"), "pk": "id",
                "parentkey": "order_id", "sort": "pos", "fields": ["pos", "qty"], "output": "named"
            }
        },
        "load": load
    }))
    .unwrap()
}

#[tokio::test]
async fn test_postgresql_export_then_reimport() -> Result<(), Box<dyn std::error::Error>> {
    let Some(conn_str) = connection_string() else {
        eprintln!("EI_SYNC_TEST_PG not set, skipping");
        return Ok(());
    };
    tracing_subscriber::fmt()
        .with_env_filter("ei_sync=debug")
        .try_init()
        .ok();

    let client = connect(&conn_str).await?;
    let schema = test_schema();
    drop_shop(&client, &schema).await;
    create_shop(&client, &schema).await?;
    client
        .batch_execute(&format!(
            "insert into {schema}.orders (code, total) values ('A', 10.50), ('B', 3);
             insert into {schema}.lines (order_id, pos, qty) values (1, 1, 2), (1, 2, 5), (2, 1, 7);"
        ))
        .await?;

    let dir = TempDir::new()?;
    let session = Session::new(PostgresProvider::new(&conn_str));

    // Export the two orders with their lines
    let export = shop_schema(&schema, json!({"type": "jsonString"}));
    let out = dir.path().join("orders.json");
    let summary = session.export_by_schema(&export, &out, None).await?;
    assert_eq!(summary.processed, 2);
    assert!(summary.failures.is_empty());
    let exported: Value = serde_json::from_str(&std::fs::read_to_string(&out)?)?;
    assert_eq!(
        exported,
        json!([
            {"orders": {"code": "A", "total": 10.5, "#details": [
                {"lines": {"pos": 1, "qty": 2}},
                {"lines": {"pos": 2, "qty": 5}}
            ]}},
            {"orders": {"code": "B", "total": 3, "#details": [
                {"lines": {"pos": 1, "qty": 7}}
            ]}}
        ])
    );

    // Re-import twice: conflicts on the unique keys update in place
    let import = Schema::from_value(json!({
        "main": "orders",
        "extract": {"orders": {"type": "json", "valueScoped": true}},
        "load": {
            "type": "db", "unitField": "$0", "unitData": ":$0",
            "units": {
                "orders": {"tablename": format!("{schema}.orders"), "pk": "id", "uk": ["code"], "fields": ["code", "total"]},
                "lines": {
                    "tablename": format!("{schema}.lines"), "pk": "id", "uk": ["order_id", "pos"],
                    "fields": ["pos", "qty"], "parentkey": "order_id"
                }
            }
        }
    }))?;
    for _ in 0..2 {
        let counts = session.import_by_schema(&import, &out, None).await?;
        assert_eq!(counts, ImportCounts { extracted: 2, processed: 2 });
    }
    let orders: i64 = client
        .query_one(&format!("select count(*) from {schema}.orders"), &[])
        .await?
        .get(0);
    let lines: i64 = client
        .query_one(&format!("select count(*) from {schema}.lines"), &[])
        .await?
        .get(0);
    assert_eq!((orders, lines), (2, 3));

    drop_shop(&client, &schema).await;
    Ok(())
}

#[tokio::test]
async fn test_postgresql_bulk_copy() -> Result<(), Box<dyn std::error::Error>> {
    let Some(conn_str) = connection_string() else {
        eprintln!("EI_SYNC_TEST_PG not set, skipping");
        return Ok(());
    };

    let client = connect(&conn_str).await?;
    let schema = test_schema();
    drop_shop(&client, &schema).await;
    create_shop(&client, &schema).await?;
    client
        .batch_execute(&format!(
            "insert into {schema}.orders (code, total) values ('A\tB', 1), ('C', null);"
        ))
        .await?;

    let dir = TempDir::new()?;
    let session = Session::new(PostgresProvider::new(&conn_str));
    let copy = Schema::from_value(json!({
        "main": "orders",
        "extract": {"orders": {"type": "db", "table": format!("{schema}.orders"), "pk": "id", "sort": "id"}},
        "load": {
            "type": "dbcopyload",
            "loadtable": format!("{schema}.orders_copy"),
            "fields": ["id", "code", "total"]
        }
    }))?;
    session
        .export_by_schema(&copy, dir.path().join("copy.out"), None)
        .await?;

    let rows = client
        .query(
            &format!("select code, total is null from {schema}.orders_copy order by id"),
            &[],
        )
        .await?;
    let copied: Vec<(String, bool)> = rows.iter().map(|row| (row.get(0), row.get(1))).collect();
    assert_eq!(
        copied,
        vec![("A\tB".to_string(), false), ("C".to_string(), true)]
    );

    drop_shop(&client, &schema).await;
    Ok(())
}
