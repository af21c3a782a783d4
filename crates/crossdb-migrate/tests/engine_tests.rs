//! End-to-end transfer tests over in-memory source/destination fakes.
//!
//! The fakes speak the PostgreSQL dialect: they interpret the generated SQL
//! just enough (select list, LIMIT/OFFSET, bound parameter, conflict
//! clause) to behave like a real destination, including unique-key
//! enforcement and transactional commit/rollback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crossdb_migrate::{
    ColumnInfo, DestHandle, DestTransaction, DialectKind, FailurePolicy, KeyValue,
    MappingDocument, MigrateError, Result, Row, RunCoordinator, RunStatus, SourceHandle, SqlValue,
    TableSchema, TableStatus, TransferPhase,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Fake database
// =============================================================================

#[derive(Clone)]
struct FakeTableData {
    schema: TableSchema,
    rows: Vec<Row>,
}

impl FakeTableData {
    fn key_columns(&self) -> Vec<String> {
        if !self.schema.primary_key.is_empty() {
            self.schema.primary_key.clone()
        } else {
            self.schema.unique_keys.first().cloned().unwrap_or_default()
        }
    }

    fn column_index(&self, name: &str) -> usize {
        self.schema
            .columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .unwrap_or_else(|| panic!("unknown column {}", name))
    }

    fn key_of(&self, row: &Row) -> Option<Vec<SqlValue<'static>>> {
        let keys = self.key_columns();
        if keys.is_empty() {
            return None;
        }
        Some(
            keys.iter()
                .map(|k| row[self.column_index(k)].clone())
                .collect(),
        )
    }
}

fn table_key(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(s) => format!("{}.{}", s, table).to_lowercase(),
        None => table.to_lowercase(),
    }
}

/// Pull the quoted identifiers out of a `"a", "b"` fragment.
fn unquote_list(fragment: &str) -> Vec<String> {
    fragment
        .split(',')
        .map(|part| part.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn keyword_value(sql: &str, keyword: &str) -> Option<usize> {
    let tokens: Vec<&str> = sql.split_whitespace().collect();
    tokens
        .iter()
        .position(|t| t.eq_ignore_ascii_case(keyword))
        .and_then(|i| tokens.get(i + 1))
        .and_then(|v| v.parse().ok())
}

// ----------------------------------------------------------------------------
// Source
// ----------------------------------------------------------------------------

struct FakeSource {
    tables: HashMap<String, FakeTableData>,
    row_queries: AtomicUsize,
}

impl FakeSource {
    fn new(tables: Vec<FakeTableData>) -> Self {
        Self {
            tables: tables
                .into_iter()
                .map(|t| (t.schema.full_name().to_lowercase(), t))
                .collect(),
            row_queries: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SourceHandle for FakeSource {
    fn dialect(&self) -> DialectKind {
        DialectKind::Postgres
    }

    async fn table_schema(&self, schema: Option<&str>, table: &str) -> Result<TableSchema> {
        self.tables
            .get(&table_key(schema, table))
            .map(|t| t.schema.clone())
            .ok_or_else(|| MigrateError::Database(format!("no such source table: {}", table)))
    }

    async fn query(&self, sql: &str, params: &[SqlValue<'static>]) -> Result<Vec<Row>> {
        self.row_queries.fetch_add(1, Ordering::SeqCst);

        // SELECT "a", "b" FROM "s"."t" [WHERE "k" > $1] ORDER BY ... LIMIT n [OFFSET m]
        let select_list = sql
            .strip_prefix("SELECT ")
            .and_then(|rest| rest.split_once(" FROM "))
            .expect("well-formed select");
        let columns = unquote_list(select_list.0);

        let after_from = select_list.1;
        let table_part = after_from
            .split_whitespace()
            .next()
            .expect("table after FROM");
        let table = self
            .tables
            .get(&table_part.replace('"', "").to_lowercase())
            .expect("known source table");

        let order_col = sql
            .split_once("ORDER BY ")
            .map(|(_, rest)| {
                rest.split_whitespace()
                    .next()
                    .unwrap()
                    .trim_matches(|c| c == '"' || c == ',')
            })
            .expect("generated select always orders");

        let limit = keyword_value(sql, "LIMIT").expect("select has a limit");
        let offset = keyword_value(sql, "OFFSET").unwrap_or(0);

        let order_idx = table.column_index(order_col);
        let bound = params.first().map(|p| KeyValue::try_from_value(p).unwrap());

        let mut rows: Vec<&Row> = table
            .rows
            .iter()
            .filter(|row| match &bound {
                Some(b) => &KeyValue::try_from_value(&row[order_idx]).unwrap() > b,
                None => true,
            })
            .collect();
        rows.sort_by_key(|row| KeyValue::try_from_value(&row[order_idx]).unwrap());

        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row[table.column_index(c)].clone())
                    .collect()
            })
            .collect())
    }
}

// ----------------------------------------------------------------------------
// Destination
// ----------------------------------------------------------------------------

struct FakeDest {
    tables: Mutex<HashMap<String, FakeTableData>>,
    ddl_log: Mutex<Vec<String>>,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    /// Successful commits allowed before every later commit fails
    /// transiently. `usize::MAX` means never fail.
    commit_budget: AtomicUsize,
}

impl FakeDest {
    fn new(tables: Vec<FakeTableData>) -> Self {
        Self {
            tables: Mutex::new(
                tables
                    .into_iter()
                    .map(|t| (t.schema.full_name().to_lowercase(), t))
                    .collect(),
            ),
            ddl_log: Mutex::new(Vec::new()),
            begins: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
            commit_budget: AtomicUsize::new(usize::MAX),
        }
    }

    fn rows_of(&self, key: &str) -> Vec<Row> {
        self.tables.lock().unwrap()[key].rows.clone()
    }

    fn row_count(&self, key: &str) -> usize {
        self.rows_of(key).len()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum WriteKind {
    Plain,
    Skip,
    Upsert,
}

struct FakeTx {
    dest: Arc<FakeDest>,
    working: HashMap<String, FakeTableData>,
}

impl FakeTx {
    fn working_table(&mut self, key: &str) -> &mut FakeTableData {
        if !self.working.contains_key(key) {
            let snapshot = self.dest.tables.lock().unwrap()[key].clone();
            self.working.insert(key.to_string(), snapshot);
        }
        self.working.get_mut(key).unwrap()
    }
}

#[async_trait]
impl DestTransaction for FakeTx {
    async fn execute(&mut self, sql: &str, params: &[SqlValue<'static>]) -> Result<u64> {
        let kind = if sql.contains("DO NOTHING") {
            WriteKind::Skip
        } else if sql.contains("DO UPDATE SET") {
            WriteKind::Upsert
        } else {
            WriteKind::Plain
        };

        let rest = sql
            .strip_prefix("INSERT INTO ")
            .expect("fake destination only understands INSERT");
        let (table_part, after) = rest.split_once(" (").expect("column list");
        let (cols_part, _) = after.split_once(')').expect("closing paren");
        let table_key = table_part.replace('"', "").to_lowercase();
        let columns = unquote_list(cols_part);

        let table = self.working_table(&table_key);
        let n_cols = columns.len();
        assert_eq!(params.len() % n_cols, 0, "ragged parameter list");

        let mut affected = 0u64;
        for chunk in params.chunks(n_cols) {
            // Expand to a full-width row in schema column order.
            let mut full: Row = vec![SqlValue::Null; table.schema.columns.len()];
            for (col, value) in columns.iter().zip(chunk) {
                full[table.column_index(col)] = value.clone();
            }

            let key = table.key_of(&full);
            let existing = key.as_ref().and_then(|k| {
                table
                    .rows
                    .iter()
                    .position(|row| table.key_of(row).as_ref() == Some(k))
            });

            match (existing, kind) {
                (None, _) => {
                    table.rows.push(full);
                    affected += 1;
                }
                (Some(_), WriteKind::Skip) => {}
                (Some(idx), WriteKind::Upsert) => {
                    for (col, value) in columns.iter().zip(chunk) {
                        let pos = table.column_index(col);
                        table.rows[idx][pos] = value.clone();
                    }
                    affected += 1;
                }
                (Some(_), WriteKind::Plain) => {
                    return Err(MigrateError::Database(format!(
                        "duplicate key value violates unique constraint on {}",
                        table_key
                    )));
                }
            }
        }
        Ok(affected)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.dest.commits.load(Ordering::SeqCst)
            >= self.dest.commit_budget.load(Ordering::SeqCst)
        {
            self.dest.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(MigrateError::transient("connection reset during commit"));
        }
        let mut tables = self.dest.tables.lock().unwrap();
        for (key, data) in self.working {
            tables.insert(key, data);
        }
        self.dest.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.dest.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeDestHandle(Arc<FakeDest>);

#[async_trait]
impl DestHandle for FakeDestHandle {
    fn dialect(&self) -> DialectKind {
        DialectKind::Postgres
    }

    async fn table_schema(&self, schema: Option<&str>, table: &str) -> Result<TableSchema> {
        self.0
            .tables
            .lock()
            .unwrap()
            .get(&table_key(schema, table))
            .map(|t| t.schema.clone())
            .ok_or_else(|| MigrateError::Database(format!("no such table: {}", table)))
    }

    async fn table_exists(&self, schema: Option<&str>, table: &str) -> Result<bool> {
        Ok(self
            .0
            .tables
            .lock()
            .unwrap()
            .contains_key(&table_key(schema, table)))
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.0.ddl_log.lock().unwrap().push(sql.to_string());

        if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
            let (table_part, after) = rest.split_once(" (").expect("column list");
            let cols_part = after.trim_end_matches(')');
            let key = table_part.replace('"', "").to_lowercase();

            let mut parts = table_part.replace('"', "");
            let (schema, name) = match parts.find('.') {
                Some(dot) => {
                    let name = parts.split_off(dot + 1);
                    parts.pop();
                    (Some(parts), name)
                }
                None => (None, parts),
            };

            let columns = cols_part
                .split(", ")
                .map(|col_def| {
                    let mut it = col_def.split_whitespace();
                    let name = it.next().unwrap().trim_matches('"').to_string();
                    let data_type = it.next().unwrap_or("text").to_string();
                    let mut info = ColumnInfo::new(name, data_type);
                    info.is_nullable = !col_def.ends_with("NOT NULL");
                    info
                })
                .collect();

            self.0.tables.lock().unwrap().insert(
                key,
                FakeTableData {
                    schema: TableSchema {
                        schema,
                        name,
                        columns,
                        primary_key: vec![],
                        unique_keys: vec![],
                    },
                    rows: Vec::new(),
                },
            );
        }
        Ok(0)
    }

    async fn begin(&self) -> Result<Box<dyn DestTransaction>> {
        self.0.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTx {
            dest: self.0.clone(),
            working: HashMap::new(),
        }))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn bigint_col(name: &str) -> ColumnInfo {
    let mut c = ColumnInfo::new(name, "bigint");
    c.is_nullable = false;
    c
}

fn source_events(n: i64) -> FakeTableData {
    FakeTableData {
        schema: TableSchema {
            schema: Some("public".into()),
            name: "events".into(),
            columns: vec![bigint_col("id"), ColumnInfo::new("name", "text")],
            primary_key: vec!["id".into()],
            unique_keys: vec![vec!["id".into()]],
        },
        rows: (1..=n)
            .map(|i| {
                vec![
                    SqlValue::I64(i),
                    SqlValue::text_owned(format!("event-{}", i)),
                ]
            })
            .collect(),
    }
}

fn dest_events_copy(rows: Vec<Row>) -> FakeTableData {
    FakeTableData {
        schema: TableSchema {
            schema: Some("public".into()),
            name: "events_copy".into(),
            columns: vec![bigint_col("id"), ColumnInfo::new("name", "text")],
            primary_key: vec!["id".into()],
            unique_keys: vec![vec!["id".into()]],
        },
        rows,
    }
}

fn basic_yaml(extra_options: &str) -> String {
    format!(
        r#"
options:
  chunk_size: 5000
{}
tables:
  - source_table: events
    source_schema: public
    dest_table: events_copy
    dest_schema: public
    watermark:
      column: id
"#,
        extra_options
    )
}

fn ids_in(rows: &[Row]) -> Vec<i64> {
    let mut ids: Vec<i64> = rows
        .iter()
        .map(|r| match &r[0] {
            SqlValue::I64(v) => *v,
            other => panic!("unexpected id {:?}", other),
        })
        .collect();
    ids.sort_unstable();
    ids
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn chunked_transfer_12345_rows_in_three_commits() {
    init_tracing();
    let source = Arc::new(FakeSource::new(vec![source_events(12_345)]));
    let dest = Arc::new(FakeDest::new(vec![dest_events_copy(vec![])]));

    let document = MappingDocument::from_yaml(&basic_yaml("")).unwrap();
    let summary = RunCoordinator::new(
        source.clone(),
        Arc::new(FakeDestHandle(dest.clone())),
        document,
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.rows_transferred, 12_345);
    assert_eq!(dest.row_count("public.events_copy"), 12_345);

    // 12,345 rows at chunk_size 5000: exactly 3 chunks, 3 commits.
    assert_eq!(dest.commits.load(Ordering::SeqCst), 3);
    assert_eq!(dest.begins.load(Ordering::SeqCst), 3);

    let state = &summary.per_table["public.events_copy"];
    assert_eq!(state.status, TableStatus::Completed);
    assert_eq!(state.chunks_committed, 3);
    assert_eq!(state.rows_transferred, 12_345);
    assert_eq!(state.watermark, Some(KeyValue::Int(12_345)));
}

#[tokio::test]
async fn constants_written_verbatim_regardless_of_source_schema() {
    // Source has no "region" column at all.
    let source = Arc::new(FakeSource::new(vec![source_events(25)]));
    let dest_table = FakeTableData {
        schema: TableSchema {
            schema: Some("public".into()),
            name: "events_copy".into(),
            columns: vec![
                bigint_col("id"),
                ColumnInfo::new("name", "text"),
                ColumnInfo::new("region", "text"),
            ],
            primary_key: vec!["id".into()],
            unique_keys: vec![vec!["id".into()]],
        },
        rows: vec![],
    };
    let dest = Arc::new(FakeDest::new(vec![dest_table]));

    let yaml = r#"
options:
  chunk_size: 10
tables:
  - source_table: events
    source_schema: public
    dest_table: events_copy
    dest_schema: public
    columns:
      - { dest: id, source: id }
      - { dest: name, source: name }
      - { dest: region, source: "'unknown'" }
"#;
    let document = MappingDocument::from_yaml(yaml).unwrap();
    let summary = RunCoordinator::new(source, Arc::new(FakeDestHandle(dest.clone())), document)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.rows_transferred, 25);
    let rows = dest.rows_of("public.events_copy");
    assert_eq!(rows.len(), 25);
    for row in &rows {
        assert_eq!(row[2], SqlValue::text_owned("unknown".into()));
    }
}

#[tokio::test]
async fn dry_run_never_mutates_the_destination() {
    let source = Arc::new(FakeSource::new(vec![source_events(100)]));
    let seeded: Vec<Row> = (1..=5)
        .map(|i| vec![SqlValue::I64(i), SqlValue::text_owned("old".into())])
        .collect();
    let dest = Arc::new(FakeDest::new(vec![dest_events_copy(seeded)]));

    let document = MappingDocument::from_yaml(&basic_yaml("  dry_run: true")).unwrap();
    let summary = RunCoordinator::new(
        source.clone(),
        Arc::new(FakeDestHandle(dest.clone())),
        document,
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    // Extraction and counting happened...
    assert_eq!(summary.rows_transferred, 100);
    // ...but no transaction was ever opened and no row changed.
    assert_eq!(dest.begins.load(Ordering::SeqCst), 0);
    assert_eq!(dest.commits.load(Ordering::SeqCst), 0);
    assert_eq!(dest.row_count("public.events_copy"), 5);
    assert!(dest.ddl_log.lock().unwrap().is_empty());
    // No state was persisted, so nothing to resume from (and no watermark).
    assert!(summary.per_table.is_empty());
}

#[tokio::test]
async fn upsert_without_unique_key_fails_before_reading_rows() {
    let source = Arc::new(FakeSource::new(vec![source_events(50)]));
    let mut keyless = dest_events_copy(vec![]);
    keyless.schema.primary_key.clear();
    keyless.schema.unique_keys.clear();
    let dest = Arc::new(FakeDest::new(vec![keyless]));

    let document = MappingDocument::from_yaml(&basic_yaml("  on_conflict: update")).unwrap();
    let summary = RunCoordinator::new(
        source.clone(),
        Arc::new(FakeDestHandle(dest.clone())),
        document,
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.tables_failed, 1);
    assert!(summary.failed_tables[0].error.contains("unique key"));
    // Planning failed fast: not a single row query was issued.
    assert_eq!(source.row_queries.load(Ordering::SeqCst), 0);
    assert_eq!(dest.begins.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn upsert_updates_existing_rows_in_place() {
    let source = Arc::new(FakeSource::new(vec![source_events(10)]));
    let seeded: Vec<Row> = (1..=3)
        .map(|i| vec![SqlValue::I64(i), SqlValue::text_owned("stale".into())])
        .collect();
    let dest = Arc::new(FakeDest::new(vec![dest_events_copy(seeded)]));

    let document = MappingDocument::from_yaml(&basic_yaml("  on_conflict: update")).unwrap();
    let summary = RunCoordinator::new(source, Arc::new(FakeDestHandle(dest.clone())), document)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    let rows = dest.rows_of("public.events_copy");
    assert_eq!(rows.len(), 10);
    for row in &rows {
        // Every row, including the previously stale ones, carries source data.
        match (&row[0], &row[1]) {
            (SqlValue::I64(id), SqlValue::Text(name)) => {
                assert_eq!(name.as_ref(), format!("event-{}", id));
            }
            other => panic!("unexpected row {:?}", other),
        }
    }
}

#[tokio::test]
async fn skip_policy_counts_skipped_rows() {
    let source = Arc::new(FakeSource::new(vec![source_events(10)]));
    let seeded: Vec<Row> = (1..=3)
        .map(|i| vec![SqlValue::I64(i), SqlValue::text_owned("kept".into())])
        .collect();
    let dest = Arc::new(FakeDest::new(vec![dest_events_copy(seeded)]));

    // No watermark here: a watermark would resume past nothing, but the
    // seeded rows conflict mid-stream, which is what skip handles.
    let yaml = r#"
options:
  chunk_size: 4
  on_conflict: nothing
tables:
  - source_table: events
    source_schema: public
    dest_table: events_copy
    dest_schema: public
"#;
    let document = MappingDocument::from_yaml(yaml).unwrap();
    let summary = RunCoordinator::new(source, Arc::new(FakeDestHandle(dest.clone())), document)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.rows_transferred, 7);
    assert_eq!(summary.rows_skipped, 3);
    let rows = dest.rows_of("public.events_copy");
    assert_eq!(rows.len(), 10);
    // The seeded rows were skipped, not overwritten.
    assert!(rows
        .iter()
        .any(|r| r[1] == SqlValue::text_owned("kept".into())));
}

#[tokio::test]
async fn failed_commit_preserves_watermark_and_resume_skips_committed_rows() {
    init_tracing();
    let dir = tempfile::TempDir::new().unwrap();
    let state_path = dir.path().join("state.json");

    let source = Arc::new(FakeSource::new(vec![source_events(10)]));
    let dest = Arc::new(FakeDest::new(vec![dest_events_copy(vec![])]));
    // The first commit succeeds, then every attempt fails transiently until
    // the retry budget (1 try + 2 retries) is exhausted.
    dest.commit_budget.store(1, Ordering::SeqCst);

    let yaml = r#"
options:
  chunk_size: 4
  max_retries: 2
  retry_backoff_ms: 1
tables:
  - source_table: events
    source_schema: public
    dest_table: events_copy
    dest_schema: public
    watermark:
      column: id
"#;
    let document = MappingDocument::from_yaml(yaml).unwrap();
    let summary = RunCoordinator::new(
        source.clone(),
        Arc::new(FakeDestHandle(dest.clone())),
        document.clone(),
    )
    .unwrap()
    .with_state_file(state_path.clone())
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(summary.status, RunStatus::Failed);
    let state = &summary.per_table["public.events_copy"];
    assert_eq!(state.status, TableStatus::Failed);
    // Chunk 0 (ids 1-4) committed; the watermark stops there.
    assert_eq!(state.watermark, Some(KeyValue::Int(4)));
    assert_eq!(state.rows_transferred, 4);
    assert_eq!(ids_in(&dest.rows_of("public.events_copy")), vec![1, 2, 3, 4]);
    assert!(summary.failed_tables[0].error.contains("chunk 1"));
    // Chunk 1 was attempted three times, rolled back each time.
    assert_eq!(dest.rollbacks.load(Ordering::SeqCst), 3);

    // Second run with a healed destination: resumes strictly after id 4.
    dest.commit_budget.store(usize::MAX, Ordering::SeqCst);
    let summary = RunCoordinator::new(
        source.clone(),
        Arc::new(FakeDestHandle(dest.clone())),
        document,
    )
    .unwrap()
    .with_state_file(state_path)
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    // Only ids 5-10 were re-extracted; committed rows are not re-delivered.
    assert_eq!(summary.rows_transferred, 6);
    assert_eq!(summary.rows_skipped, 0);
    assert_eq!(
        ids_in(&dest.rows_of("public.events_copy")),
        (1..=10).collect::<Vec<_>>()
    );
    let state = &summary.per_table["public.events_copy"];
    assert_eq!(state.watermark, Some(KeyValue::Int(10)));
}

#[tokio::test]
async fn create_tables_generates_and_executes_ddl() {
    let source = Arc::new(FakeSource::new(vec![source_events(7)]));
    let dest = Arc::new(FakeDest::new(vec![]));

    let yaml = r#"
options:
  chunk_size: 100
  create_tables: true
  dest_schema: public
tables:
  - source_table: events
    source_schema: public
    dest_table: events_copy
"#;
    let document = MappingDocument::from_yaml(yaml).unwrap();
    let summary = RunCoordinator::new(source, Arc::new(FakeDestHandle(dest.clone())), document)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);

    let ddl_log = dest.ddl_log.lock().unwrap().clone();
    assert_eq!(ddl_log.len(), 1);
    assert_eq!(
        ddl_log[0],
        "CREATE TABLE \"public\".\"events_copy\" (\"id\" bigint NOT NULL, \"name\" text NULL)"
    );
    assert_eq!(dest.row_count("public.events_copy"), 7);
}

#[tokio::test]
async fn failure_policy_continue_runs_remaining_tables() {
    let source = Arc::new(FakeSource::new(vec![source_events(5)]));
    let dest = Arc::new(FakeDest::new(vec![dest_events_copy(vec![])]));

    let yaml = r#"
options:
  chunk_size: 100
tables:
  - source_table: missing_table
    source_schema: public
    dest_table: events_copy
    dest_schema: public
  - source_table: events
    source_schema: public
    dest_table: events_copy_2
    dest_schema: public
"#;
    // Second dest table exists under a different name.
    {
        let mut copy2 = dest_events_copy(vec![]);
        copy2.schema.name = "events_copy_2".into();
        dest.tables
            .lock()
            .unwrap()
            .insert("public.events_copy_2".into(), copy2);
    }

    let document = MappingDocument::from_yaml(yaml).unwrap();
    let summary = RunCoordinator::new(
        source.clone(),
        Arc::new(FakeDestHandle(dest.clone())),
        document.clone(),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    // continue_and_report: the second table still transferred.
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.tables_failed, 1);
    assert_eq!(summary.tables_completed, 1);
    assert_eq!(dest.row_count("public.events_copy_2"), 5);

    // stop_on_first_failure: the second table never runs.
    let mut stop_doc = document;
    stop_doc.options.failure_policy = FailurePolicy::StopOnFirstFailure;
    let dest2 = Arc::new(FakeDest::new(vec![dest_events_copy(vec![])]));
    {
        let mut copy2 = dest_events_copy(vec![]);
        copy2.schema.name = "events_copy_2".into();
        dest2
            .tables
            .lock()
            .unwrap()
            .insert("public.events_copy_2".into(), copy2);
    }
    let summary = RunCoordinator::new(source, Arc::new(FakeDestHandle(dest2.clone())), stop_doc)
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(summary.tables_failed, 1);
    assert_eq!(dest2.row_count("public.events_copy_2"), 0);
}

#[tokio::test]
async fn vacuum_analyze_runs_after_completion_but_not_in_dry_run() {
    let source = Arc::new(FakeSource::new(vec![source_events(3)]));
    let dest = Arc::new(FakeDest::new(vec![dest_events_copy(vec![])]));

    let document = MappingDocument::from_yaml(&basic_yaml("  vacuum_analyze: true")).unwrap();
    RunCoordinator::new(
        source.clone(),
        Arc::new(FakeDestHandle(dest.clone())),
        document,
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    let log = dest.ddl_log.lock().unwrap().clone();
    assert_eq!(
        log,
        vec!["VACUUM ANALYZE \"public\".\"events_copy\"".to_string()]
    );

    // Dry-run plans everything but runs no maintenance.
    let dest2 = Arc::new(FakeDest::new(vec![dest_events_copy(vec![])]));
    let document =
        MappingDocument::from_yaml(&basic_yaml("  vacuum_analyze: true\n  dry_run: true"))
            .unwrap();
    RunCoordinator::new(source, Arc::new(FakeDestHandle(dest2.clone())), document)
        .unwrap()
        .run()
        .await
        .unwrap();
    assert!(dest2.ddl_log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_run_stops_before_touching_tables() {
    let source = Arc::new(FakeSource::new(vec![source_events(5)]));
    let dest = Arc::new(FakeDest::new(vec![dest_events_copy(vec![])]));

    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();

    let document = MappingDocument::from_yaml(&basic_yaml("")).unwrap();
    let summary = RunCoordinator::new(
        source,
        Arc::new(FakeDestHandle(dest.clone())),
        document,
    )
    .unwrap()
    .with_cancellation(cancel)
    .run()
    .await
    .unwrap();

    assert_eq!(summary.status, RunStatus::Cancelled);
    assert_eq!(dest.begins.load(Ordering::SeqCst), 0);
    assert_eq!(dest.row_count("public.events_copy"), 0);
}

#[tokio::test]
async fn progress_events_track_chunks_and_completion() {
    let source = Arc::new(FakeSource::new(vec![source_events(10)]));
    let dest = Arc::new(FakeDest::new(vec![dest_events_copy(vec![])]));

    let yaml = basic_yaml("").replace("chunk_size: 5000", "chunk_size: 4");
    let document = MappingDocument::from_yaml(&yaml).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let summary = RunCoordinator::new(source, Arc::new(FakeDestHandle(dest)), document)
        .unwrap()
        .with_progress(tx)
        .run()
        .await
        .unwrap();
    assert_eq!(summary.status, RunStatus::Completed);

    let mut phases = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.table, "public.events_copy");
        phases.push((event.phase, event.rows_transferred));
    }

    assert_eq!(phases.first().unwrap().0, TransferPhase::Planning);
    assert_eq!(phases.last().unwrap(), &(TransferPhase::Completed, 10));
    let commits = phases
        .iter()
        .filter(|(p, _)| *p == TransferPhase::Committing)
        .count();
    assert_eq!(commits, 3, "three chunks of 4, 4, 2 rows");
}

#[tokio::test]
async fn row_transform_hook_is_applied_after_mapping() {
    let source = Arc::new(FakeSource::new(vec![source_events(5)]));
    let dest = Arc::new(FakeDest::new(vec![dest_events_copy(vec![])]));

    let document = MappingDocument::from_yaml(&basic_yaml("")).unwrap();
    let transform: crossdb_migrate::RowTransform = Arc::new(|mut row: Row| {
        if let SqlValue::Text(name) = &row[1] {
            row[1] = SqlValue::text_owned(name.to_uppercase());
        }
        row
    });

    let summary = RunCoordinator::new(source, Arc::new(FakeDestHandle(dest.clone())), document)
        .unwrap()
        .with_row_transform(transform)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    for row in dest.rows_of("public.events_copy") {
        match &row[1] {
            SqlValue::Text(name) => assert!(name.starts_with("EVENT-")),
            other => panic!("unexpected value {:?}", other),
        }
    }
}

#[tokio::test]
async fn watermarked_table_picks_up_only_new_rows_on_next_run() {
    let dir = tempfile::TempDir::new().unwrap();
    let state_path = dir.path().join("state.json");

    let source = Arc::new(FakeSource::new(vec![source_events(6)]));
    let dest = Arc::new(FakeDest::new(vec![dest_events_copy(vec![])]));

    let document = MappingDocument::from_yaml(&basic_yaml("")).unwrap();
    RunCoordinator::new(
        source,
        Arc::new(FakeDestHandle(dest.clone())),
        document.clone(),
    )
    .unwrap()
    .with_state_file(state_path.clone())
    .unwrap()
    .run()
    .await
    .unwrap();
    assert_eq!(dest.commits.load(Ordering::SeqCst), 1);

    // Rows 7 and 8 have appeared at the source since the first run.
    let grown_source = Arc::new(FakeSource::new(vec![source_events(8)]));
    let summary = RunCoordinator::new(
        grown_source,
        Arc::new(FakeDestHandle(dest.clone())),
        document,
    )
    .unwrap()
    .with_state_file(state_path)
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.rows_transferred, 2, "only rows past the watermark");
    assert_eq!(
        ids_in(&dest.rows_of("public.events_copy")),
        (1..=8).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn completed_full_copy_is_skipped_on_resume() {
    let dir = tempfile::TempDir::new().unwrap();
    let state_path = dir.path().join("state.json");

    let source = Arc::new(FakeSource::new(vec![source_events(6)]));
    let dest = Arc::new(FakeDest::new(vec![dest_events_copy(vec![])]));

    // Non-watermarked full copy.
    let yaml = r#"
options:
  chunk_size: 100
tables:
  - source_table: events
    source_schema: public
    dest_table: events_copy
    dest_schema: public
"#;
    let document = MappingDocument::from_yaml(yaml).unwrap();
    RunCoordinator::new(
        source.clone(),
        Arc::new(FakeDestHandle(dest.clone())),
        document.clone(),
    )
    .unwrap()
    .with_state_file(state_path.clone())
    .unwrap()
    .run()
    .await
    .unwrap();
    assert_eq!(dest.row_count("public.events_copy"), 6);
    let queries_after_first = source.row_queries.load(Ordering::SeqCst);

    // Re-running against the same state file does not copy again.
    let summary = RunCoordinator::new(
        source.clone(),
        Arc::new(FakeDestHandle(dest.clone())),
        document,
    )
    .unwrap()
    .with_state_file(state_path)
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(
        source.row_queries.load(Ordering::SeqCst),
        queries_after_first,
        "completed table was skipped without reading the source"
    );
    assert_eq!(dest.row_count("public.events_copy"), 6);
}
