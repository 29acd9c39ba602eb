//! Load strategies driven record by record.

use ei_schema::LoadSpec;
use ei_sync::load::{LoadError, Loader};
use ei_sync::testing::{LogEntry, MemoryDb};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Log sink shared with a test subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn spec(value: Value) -> LoadSpec {
    serde_json::from_value(value).unwrap()
}

async fn run(loader: &mut Loader<'_, MemoryDb>, records: Vec<Value>) -> String {
    let mut out = loader.prepare().await.unwrap().unwrap_or_default();
    for record in records {
        out.push_str(&loader.process(record).await.unwrap().unwrap_or_default());
    }
    out.push_str(&loader.finalize().await.unwrap().unwrap_or_default());
    out
}

#[tokio::test]
async fn test_json_string_renders_one_array() {
    let db = MemoryDb::new();
    let spec = spec(json!({"type": "jsonString"}));
    let mut loader = Loader::new(&spec, &db);

    assert_eq!(loader.prepare().await.unwrap().as_deref(), Some("[\n"));
    let first = loader.process(json!({"g": 0})).await.unwrap().unwrap();
    let second = loader.process(json!({"qq": "qq"})).await.unwrap().unwrap();
    let end = loader.finalize().await.unwrap().unwrap();

    assert_eq!(first, "{\n\t\"g\": 0\n}");
    assert_eq!(second, ",\n{\n\t\"qq\": \"qq\"\n}");
    assert_eq!(end, "\n]");
    let whole: Value = serde_json::from_str(&format!("[\n{first}{second}{end}")).unwrap();
    assert_eq!(whole, json!([{"g": 0}, {"qq": "qq"}]));
    assert_eq!(loader.processed(), 2);
    assert!(db.log().is_empty());
}

#[tokio::test]
async fn test_statement_batches_are_collected_per_record() {
    let db = MemoryDb::new();
    let spec = spec(json!({
        "type": "execSqlArray",
        "unitField": "$0",
        "unitData": ":$0",
        "units": {
            "nfc.datatypes": {
                "type": "db", "tablename": "nfc.datatypes", "pk": "id", "uk": ["id"],
                "fields": ["id", "code", "caption"]
            }
        }
    }));
    let mut loader = Loader::new(&spec, &db);
    let record = json!({"nfc.datatypes": {"id": "3", "code": "bool", "caption": "Boolean"}});

    let out = run(&mut loader, vec![record.clone(), record]).await;

    let batches: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(batches.as_array().map(Vec::len), Some(2));
    assert_eq!(
        batches[1]["arr"][0]["sql"],
        "insert into nfc.datatypes (id, code, caption) values (:id, :code, :caption) \
         on conflict (id) do update set id = :id, code = :code, caption = :caption returning id"
    );
    assert_eq!(batches[1]["arr"][0]["params"]["caption"], "Boolean");
    assert!(db.log().is_empty());
}

#[tokio::test]
async fn test_collected_details_use_record_keys() {
    let db = MemoryDb::new();
    let spec = spec(json!({
        "type": "execSqlArray",
        "unitField": "$0",
        "unitData": ":$0",
        "units": {
            "orders": {"tablename": "orders", "pk": "id", "uk": ["id"], "fields": ["id"]},
            "lines": {"tablename": "lines", "pk": "id", "uk": ["id"], "fields": ["id"], "parentkey": "order_id"}
        }
    }));
    let mut loader = Loader::new(&spec, &db);
    let record = json!({"orders": {"id": 7, "#details": [{"lines": {"id": 1}}, {"lines": {"id": 2}}]}});

    let out = run(&mut loader, vec![record]).await;

    let batches: Value = serde_json::from_str(&out).unwrap();
    let params: Vec<Value> = batches[0]["arr"]
        .as_array()
        .unwrap()
        .iter()
        .map(|statement| statement["params"].clone())
        .collect();
    assert_eq!(
        params,
        vec![
            json!({"id": 7}),
            json!({"id": 1, "order_id": 7}),
            json!({"id": 2, "order_id": 7}),
        ]
    );
}

#[tokio::test]
async fn test_db_upsert_runs_in_one_transaction() {
    let db = MemoryDb::new();
    let spec = spec(json!({
        "type": "db",
        "unitField": "$0",
        "unitData": ":$0",
        "units": {
            "dbloadtest": {"tablename": "dbloadtest", "pk": "id", "uk": ["id"], "fields": ["id", "code"]},
            "skipped": {"type": "file", "tablename": "files", "pk": "id"}
        }
    }));
    let mut loader = Loader::new(&spec, &db);

    let out = run(
        &mut loader,
        vec![
            json!({"dbloadtest": {"id": "3", "code": "bool"}}),
            json!({"skipped": {"id": 1}}),
            json!({"unknown": {"id": 1}}),
            json!({"dbloadtest": {"id": "2", "code": "text"}}),
        ],
    )
    .await;

    assert_eq!(out, "");
    let log = db.log();
    assert_eq!(log[0], LogEntry::Connect);
    assert_eq!(log[1], LogEntry::Begin);
    assert_eq!(&log[4..], &[LogEntry::Commit, LogEntry::Release]);
    let statements = db.statements();
    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0].1.get("id"), Some(&json!("3")));
    assert_eq!(statements[1].1.get("code"), Some(&json!("text")));
    assert_eq!(loader.processed(), 4);
}

#[tokio::test]
async fn test_hierarchy_map_tracks_changed_keys_only() {
    let db = MemoryDb::new().on_query(|sql, params| {
        // Keys below 10 are renumbered, others kept
        if !sql.starts_with("insert into nodes") {
            return Ok(None);
        }
        let id = params.get("id").and_then(Value::as_i64).unwrap_or_default();
        let stored = if id < 10 { id + 1000 } else { id };
        let row = json!({"id": stored}).as_object().cloned().unwrap_or_default();
        Ok(Some(ei_connect::QueryResult::new(vec![row])))
    });
    let spec = spec(json!({
        "type": "db",
        "unitField": "$0",
        "unitData": ":$0",
        "units": {"nodes": {
            "tablename": "nodes", "pk": "id", "uk": ["id"], "fields": ["id", "parent_id"],
            "hierarchykey": "parent_id"
        }}
    }));
    let mut loader = Loader::new(&spec, &db);

    run(
        &mut loader,
        vec![
            json!({"nodes": {"id": 1, "parent_id": null}}),
            json!({"nodes": {"id": 20, "parent_id": 1}}),
            json!({"nodes": {"id": 2, "parent_id": 20}}),
        ],
    )
    .await;

    assert_eq!(loader.hierarchy().len(), 2);
    assert_eq!(loader.hierarchy().lookup("nodes", &json!(1)), Some(&json!(1001)));
    assert_eq!(loader.hierarchy().lookup("nodes", &json!(20)), None);
    let parents: Vec<Value> = db
        .statements()
        .iter()
        .map(|(_, params)| params["parent_id"].clone())
        .collect();
    assert_eq!(parents, vec![Value::Null, json!(1001), json!(20)]);
}

#[tokio::test]
async fn test_failed_upsert_rolls_back_once() {
    let db = MemoryDb::new().fail_on("insert into broken");
    let spec = spec(json!({
        "type": "db",
        "unitField": "$0",
        "unitData": ":$0",
        "units": {
            "ok": {"tablename": "ok", "pk": "id", "uk": ["id"], "fields": ["id"]},
            "broken": {"tablename": "broken", "pk": "id", "uk": ["id"], "fields": ["id"]}
        }
    }));
    let mut loader = Loader::new(&spec, &db);
    loader.prepare().await.unwrap();
    loader.process(json!({"ok": {"id": 1}})).await.unwrap();

    let result = loader.process(json!({"broken": {"id": 2}})).await;
    assert!(matches!(result, Err(LoadError::Transaction(_))));
    loader.abort().await;

    assert_eq!(db.count(&LogEntry::Rollback), 1);
    assert_eq!(db.count(&LogEntry::Release), 1);
    assert_eq!(db.count(&LogEntry::Commit), 0);
    assert!(matches!(
        loader.process(json!({"ok": {"id": 3}})).await,
        Err(LoadError::NoConnection)
    ));
}

#[tokio::test]
async fn test_bulk_copy_lifecycle() {
    let db = MemoryDb::new();
    let spec = spec(json!({
        "type": "dbcopyload",
        "loadtable": "pg_temp.dbloadtest",
        "fields": ["id", "code"],
        "beforeHook": "nfc.f_db8bulk_ins_before",
        "afterHook": "nfc.f_db8bulk_ins_after"
    }));
    let mut loader = Loader::new(&spec, &db);

    run(
        &mut loader,
        vec![json!({"id": 3, "code": "bool"}), json!({"id": 0, "code": ""})],
    )
    .await;

    assert_eq!(
        db.log(),
        vec![
            LogEntry::Connect,
            LogEntry::Begin,
            LogEntry::Procedure {
                name: "nfc.f_db8bulk_ins_before".into(),
                args: vec![json!("pg_temp"), json!("dbloadtest")],
            },
            LogEntry::CopyStart {
                table: "pg_temp.dbloadtest".into(),
                columns: vec!["id".into(), "code".into()],
            },
            LogEntry::CopyLine("3\tbool".into()),
            LogEntry::CopyLine("0\t".into()),
            LogEntry::CopyEnd,
            LogEntry::Procedure {
                name: "nfc.f_db8bulk_ins_after".into(),
                args: vec![],
            },
            LogEntry::Commit,
            LogEntry::Release,
        ]
    );
}

#[tokio::test]
async fn test_refused_connection_fails_prepare() {
    let db = MemoryDb::new().refuse_connections();
    let spec = spec(json!({"type": "dbcopyload", "loadtable": "t", "fields": ["a"]}));
    let mut loader = Loader::new(&spec, &db);

    assert!(matches!(loader.prepare().await, Err(LoadError::Connect(_))));
    assert!(db.log().is_empty());
}

#[tokio::test]
async fn test_bulk_copy_without_hooks_warns() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let db = MemoryDb::new();
    let spec = spec(json!({
        "type": "dbcopyload",
        "loadtable": "items",
        "fields": ["id"],
        "afterHook": "items_after"
    }));
    let mut loader = Loader::new(&spec, &db);
    run(&mut loader, vec![json!({"id": 1})]).await;

    let text = logs.text();
    assert!(text.contains("Bulk load into items runs without beforeHook"), "{text}");
    assert!(!text.contains("without afterHook"), "{text}");
    assert_eq!(db.copied_lines(), vec!["1"]);
    assert_eq!(
        db.count(&LogEntry::Procedure {
            name: "items_after".into(),
            args: vec![],
        }),
        1
    );
}
