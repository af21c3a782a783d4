//! SQL syntax strategies for the three supported dialect families.
//!
//! Each supported engine family differs in identifier quoting (double
//! quotes, brackets, backticks), parameter placeholders (`$n`, `@Pn`, `?`),
//! row limiting (`LIMIT`, `TOP`, `OFFSET ... FETCH`) and conflict handling
//! (`ON CONFLICT`, `MERGE`, `INSERT IGNORE` / `ON DUPLICATE KEY`). The
//! [`Dialect`] trait is the strategy interface; the engine selects an
//! implementation from the connection's declared [`DialectKind`] tag and
//! never branches on dialect names anywhere else.

pub mod typemap;

use crate::core::identifier::{quote_mssql, quote_mysql, quote_pg};
use crate::error::{MigrateError, Result};

/// Dialect family tag reported by connection handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind {
    /// PostgreSQL-like engines.
    Postgres,
    /// SQL-Server-like engines.
    Mssql,
    /// MySQL/MariaDB-like engines.
    Mysql,
}

impl DialectKind {
    /// Get the strategy implementation for this dialect.
    pub fn dialect(&self) -> &'static dyn Dialect {
        match self {
            DialectKind::Postgres => &PostgresDialect,
            DialectKind::Mssql => &MssqlDialect,
            DialectKind::Mysql => &MysqlDialect,
        }
    }

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        self.dialect().name()
    }
}

impl std::fmt::Display for DialectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Options for building a chunk SELECT.
#[derive(Debug, Clone)]
pub struct SelectOptions {
    /// Schema name, if any.
    pub schema: Option<String>,
    /// Table name.
    pub table: String,
    /// Columns to select, in fetch order.
    pub columns: Vec<String>,
    /// Ordering key for keyset pagination. When `None`, the query orders by
    /// every selected column so offset pagination stays deterministic.
    pub order_key: Option<String>,
    /// Add `order_key > <param 1>` (the exclusive lower bound is always the
    /// statement's first and only parameter).
    pub has_lower_bound: bool,
    /// Maximum rows to fetch.
    pub limit: usize,
    /// Row offset for keyless tables.
    pub offset: Option<u64>,
}

/// How a chunk insert treats uniqueness conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Plain multi-row insert; conflicts surface as errors.
    Plain,
    /// Conflicting rows are silently skipped by the destination.
    SkipConflicts,
    /// Conflicting rows are updated in place.
    Upsert,
}

/// Shape of a chunk write statement.
#[derive(Debug, Clone)]
pub struct InsertStatement<'a> {
    /// Qualified, quoted target table.
    pub table: &'a str,
    /// Destination columns, in row order.
    pub columns: &'a [String],
    /// Unique key used as the conflict target (required for `Upsert`, and
    /// for `SkipConflicts` on MSSQL where the skip is expressed as a MERGE).
    pub key: Option<&'a [String]>,
    /// Conflict behavior.
    pub mode: WriteMode,
    /// Number of parameterized rows in the VALUES list.
    pub row_count: usize,
}

/// SQL syntax strategy for one dialect family.
pub trait Dialect: Send + Sync {
    /// Get the dialect identifier (e.g., "postgres", "mssql", "mysql").
    fn name(&self) -> &'static str;

    /// Quote an identifier (table name, column name, etc.).
    fn quote_ident(&self, name: &str) -> Result<String>;

    /// Get a parameter placeholder for the given 1-based index.
    fn param_placeholder(&self, index: usize) -> String;

    /// Build a SELECT query for one chunk.
    fn build_select(&self, opts: &SelectOptions) -> Result<String>;

    /// Build a multi-row parameterized write statement.
    fn build_insert(&self, stmt: &InsertStatement<'_>) -> Result<String>;

    /// Post-load maintenance statement (`vacuum_analyze` option).
    fn maintenance_statement(&self, qualified_table: &str) -> String;

    /// Qualify a table name with its schema, quoting both parts.
    fn qualify(&self, schema: Option<&str>, table: &str) -> Result<String> {
        match schema {
            Some(s) => Ok(format!("{}.{}", self.quote_ident(s)?, self.quote_ident(table)?)),
            None => self.quote_ident(table),
        }
    }

    /// Comma-joined quoted column list.
    fn column_list(&self, columns: &[String]) -> Result<String> {
        let quoted = columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(quoted.join(", "))
    }
}

/// Render the `(?, ?), (?, ?)` VALUES body with dialect placeholders,
/// numbering parameters row-major from 1.
fn values_body(dialect: &dyn Dialect, columns: usize, rows: usize) -> String {
    let mut body = String::new();
    for r in 0..rows {
        if r > 0 {
            body.push_str(", ");
        }
        body.push('(');
        for c in 0..columns {
            if c > 0 {
                body.push_str(", ");
            }
            body.push_str(&dialect.param_placeholder(r * columns + c + 1));
        }
        body.push(')');
    }
    body
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_pg(name)
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn build_select(&self, opts: &SelectOptions) -> Result<String> {
        let cols = self.column_list(&opts.columns)?;
        let table = self.qualify(opts.schema.as_deref(), &opts.table)?;
        let mut sql = format!("SELECT {} FROM {}", cols, table);

        if let Some(ref key) = opts.order_key {
            let key_quoted = self.quote_ident(key)?;
            if opts.has_lower_bound {
                sql.push_str(&format!(" WHERE {} > $1", key_quoted));
            }
            sql.push_str(&format!(" ORDER BY {}", key_quoted));
        } else {
            sql.push_str(&format!(" ORDER BY {}", cols));
        }

        sql.push_str(&format!(" LIMIT {}", opts.limit));
        if let Some(offset) = opts.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        Ok(sql)
    }

    fn build_insert(&self, stmt: &InsertStatement<'_>) -> Result<String> {
        let cols = self.column_list(stmt.columns)?;
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            stmt.table,
            cols,
            values_body(self, stmt.columns.len(), stmt.row_count)
        );

        match stmt.mode {
            WriteMode::Plain => {}
            WriteMode::SkipConflicts => {
                // No conflict target: skip on any unique violation.
                sql.push_str(" ON CONFLICT DO NOTHING");
            }
            WriteMode::Upsert => {
                let key = stmt.key.ok_or_else(|| {
                    MigrateError::Database("upsert requires a conflict key".into())
                })?;
                let conflict_cols = self.column_list(key)?;
                sql.push_str(&format!(" ON CONFLICT ({}) DO", conflict_cols));

                let non_key: Vec<&String> = stmt
                    .columns
                    .iter()
                    .filter(|c| !key.iter().any(|k| k.eq_ignore_ascii_case(c)))
                    .collect();
                if non_key.is_empty() {
                    sql.push_str(" NOTHING");
                } else {
                    let update_set = non_key
                        .iter()
                        .map(|c| {
                            let q = self.quote_ident(c)?;
                            Ok(format!("{} = EXCLUDED.{}", q, q))
                        })
                        .collect::<Result<Vec<_>>>()?
                        .join(", ");
                    sql.push_str(&format!(" UPDATE SET {}", update_set));
                }
            }
        }
        Ok(sql)
    }

    fn maintenance_statement(&self, qualified_table: &str) -> String {
        format!("VACUUM ANALYZE {}", qualified_table)
    }
}

// =============================================================================
// SQL Server
// =============================================================================

/// Microsoft SQL Server dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl Dialect for MssqlDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_mssql(name)
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn build_select(&self, opts: &SelectOptions) -> Result<String> {
        let cols = self.column_list(&opts.columns)?;
        let table = self.qualify(opts.schema.as_deref(), &opts.table)?;

        if let Some(ref key) = opts.order_key {
            let key_quoted = self.quote_ident(key)?;
            let mut sql = format!(
                "SELECT TOP {} {} FROM {} WITH (NOLOCK)",
                opts.limit, cols, table
            );
            if opts.has_lower_bound {
                sql.push_str(&format!(" WHERE {} > @P1", key_quoted));
            }
            sql.push_str(&format!(" ORDER BY {}", key_quoted));
            Ok(sql)
        } else {
            // OFFSET/FETCH requires an ORDER BY; order by every selected
            // column so page boundaries are deterministic.
            Ok(format!(
                "SELECT {} FROM {} WITH (NOLOCK) ORDER BY {} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                cols,
                table,
                cols,
                opts.offset.unwrap_or(0),
                opts.limit
            ))
        }
    }

    fn build_insert(&self, stmt: &InsertStatement<'_>) -> Result<String> {
        let cols = self.column_list(stmt.columns)?;
        let values = values_body(self, stmt.columns.len(), stmt.row_count);

        match stmt.mode {
            WriteMode::Plain => Ok(format!(
                "INSERT INTO {} ({}) VALUES {}",
                stmt.table, cols, values
            )),
            WriteMode::SkipConflicts | WriteMode::Upsert => {
                // MERGE over a VALUES table constructor; the bound rows play
                // the role the staging table would in a bulk pipeline.
                let key = stmt.key.ok_or_else(|| {
                    MigrateError::Database("MERGE requires a conflict key".into())
                })?;

                let join = key
                    .iter()
                    .map(|k| {
                        let q = self.quote_ident(k)?;
                        Ok(format!("t.{} = s.{}", q, q))
                    })
                    .collect::<Result<Vec<_>>>()?
                    .join(" AND ");

                let insert_vals = stmt
                    .columns
                    .iter()
                    .map(|c| Ok(format!("s.{}", self.quote_ident(c)?)))
                    .collect::<Result<Vec<_>>>()?
                    .join(", ");

                let mut sql = format!(
                    "MERGE {} AS t USING (VALUES {}) AS s ({}) ON {}",
                    stmt.table, values, cols, join
                );

                if stmt.mode == WriteMode::Upsert {
                    let non_key: Vec<&String> = stmt
                        .columns
                        .iter()
                        .filter(|c| !key.iter().any(|k| k.eq_ignore_ascii_case(c)))
                        .collect();
                    if !non_key.is_empty() {
                        let update_set = non_key
                            .iter()
                            .map(|c| {
                                let q = self.quote_ident(c)?;
                                Ok(format!("t.{} = s.{}", q, q))
                            })
                            .collect::<Result<Vec<_>>>()?
                            .join(", ");
                        sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", update_set));
                    }
                }

                sql.push_str(&format!(
                    " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
                    cols, insert_vals
                ));
                Ok(sql)
            }
        }
    }

    fn maintenance_statement(&self, qualified_table: &str) -> String {
        format!("UPDATE STATISTICS {}", qualified_table)
    }
}

// =============================================================================
// MySQL
// =============================================================================

/// MySQL/MariaDB dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_mysql(name)
    }

    fn param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn build_select(&self, opts: &SelectOptions) -> Result<String> {
        let cols = self.column_list(&opts.columns)?;
        let table = self.qualify(opts.schema.as_deref(), &opts.table)?;
        let mut sql = format!("SELECT {} FROM {}", cols, table);

        if let Some(ref key) = opts.order_key {
            let key_quoted = self.quote_ident(key)?;
            if opts.has_lower_bound {
                sql.push_str(&format!(" WHERE {} > ?", key_quoted));
            }
            sql.push_str(&format!(" ORDER BY {}", key_quoted));
        } else {
            sql.push_str(&format!(" ORDER BY {}", cols));
        }

        sql.push_str(&format!(" LIMIT {}", opts.limit));
        if let Some(offset) = opts.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        Ok(sql)
    }

    fn build_insert(&self, stmt: &InsertStatement<'_>) -> Result<String> {
        let cols = self.column_list(stmt.columns)?;
        let values = values_body(self, stmt.columns.len(), stmt.row_count);

        match stmt.mode {
            WriteMode::Plain => Ok(format!(
                "INSERT INTO {} ({}) VALUES {}",
                stmt.table, cols, values
            )),
            WriteMode::SkipConflicts => Ok(format!(
                "INSERT IGNORE INTO {} ({}) VALUES {}",
                stmt.table, cols, values
            )),
            WriteMode::Upsert => {
                let key = stmt.key.ok_or_else(|| {
                    MigrateError::Database("upsert requires a conflict key".into())
                })?;
                let non_key: Vec<&String> = stmt
                    .columns
                    .iter()
                    .filter(|c| !key.iter().any(|k| k.eq_ignore_ascii_case(c)))
                    .collect();
                if non_key.is_empty() {
                    // Nothing to update on conflict; IGNORE has the same effect.
                    return Ok(format!(
                        "INSERT IGNORE INTO {} ({}) VALUES {}",
                        stmt.table, cols, values
                    ));
                }
                let update_set = non_key
                    .iter()
                    .map(|c| {
                        let q = self.quote_ident(c)?;
                        Ok(format!("{} = VALUES({})", q, q))
                    })
                    .collect::<Result<Vec<_>>>()?
                    .join(", ");
                Ok(format!(
                    "INSERT INTO {} ({}) VALUES {} ON DUPLICATE KEY UPDATE {}",
                    stmt.table, cols, values, update_set
                ))
            }
        }
    }

    fn maintenance_statement(&self, qualified_table: &str) -> String {
        format!("ANALYZE TABLE {}", qualified_table)
    }
}
