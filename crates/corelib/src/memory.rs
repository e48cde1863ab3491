//! In-memory backing store.
//!
//! [`MemoryCluster`] implements both client contracts ([`RingDescriber`] and
//! [`Connector`]) without a network, so the router can be exercised end to
//! end in tests, benchmarks and the CLI's stress command. All hosts share one
//! set of tables, the way a replicated cluster looks to a client.
//!
//! Connections parse statements with `sqlparser` and accept only this
//! subset:
//!
//! ```text
//! USE <keyspace>;
//! INSERT INTO <table>(<col>, ...) VALUES('<v>', ...);
//! SELECT * FROM <table> WHERE <col> = '<v>';
//! ```
//!
//! String literals use `''` for an embedded quote. Faults (down hosts,
//! timeouts, failing ring descriptions) can be injected per host.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use sqlparser::ast as sql_ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::{Error, Result};
use crate::network::{Connection, Connector, QueryResult, RingDescriber, Row, TokenRangeDescription};
use crate::node::Host;

type StoredRow = Vec<(String, String)>;

#[derive(Default)]
struct ClusterInner {
    ring: RwLock<Vec<TokenRangeDescription>>,
    /// Rows per `keyspace.table`.
    tables: DashMap<String, Vec<StoredRow>>,
    /// Known keyspaces; empty means every keyspace exists.
    keyspaces: DashSet<String>,
    down: DashSet<Host>,
    timeouts: DashSet<Host>,
    describe_failures: AtomicUsize,
    executed: DashMap<Host, usize>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl ClusterInner {
    fn keyspace_exists(&self, keyspace: &str) -> bool {
        self.keyspaces.is_empty() || self.keyspaces.contains(keyspace)
    }
}

/// A simulated cluster. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<ClusterInner>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ring(ring: Vec<TokenRangeDescription>) -> Self {
        let cluster = Self::new();
        cluster.set_ring(ring);
        cluster
    }

    /// Replaces the ring description returned by the next `describe_ring`.
    pub fn set_ring(&self, ring: Vec<TokenRangeDescription>) {
        *self.inner.ring.write() = ring;
    }

    /// Splits the token space into one range per host, each replicated on
    /// the next `replication` hosts around the ring. The last range wraps.
    pub fn evenly_split<H>(hosts: &[H], replication: usize) -> Vec<TokenRangeDescription>
    where
        H: AsRef<str>,
    {
        let n = hosts.len();
        if n == 0 {
            return Vec::new();
        }
        let replicas = replication.clamp(1, n);
        let step = (1i128 << 64) / n as i128;
        let boundary = |i: usize| (i64::MIN as i128 + step * i as i128) as i64;

        (0..n)
            .map(|i| {
                let left = boundary(i);
                let right = if i + 1 == n { i64::MIN } else { boundary(i + 1) };
                let endpoints = (0..replicas).map(|j| hosts[(i + j) % n].as_ref().to_string());
                TokenRangeDescription::new(left, right, endpoints)
            })
            .collect()
    }

    /// Restricts `USE` and `describe_ring` to registered keyspaces.
    pub fn add_keyspace(&self, keyspace: impl Into<String>) {
        self.inner.keyspaces.insert(keyspace.into());
    }

    /// While down, connects and statements to `host` fail with a transport
    /// error.
    pub fn set_host_down(&self, host: impl Into<Host>, down: bool) {
        let host: Host = host.into();
        if down {
            self.inner.down.insert(host);
        } else {
            self.inner.down.remove(&host);
        }
    }

    /// While set, statements on `host` fail with a timeout.
    pub fn set_timeouts(&self, host: impl Into<Host>, enabled: bool) {
        let host: Host = host.into();
        if enabled {
            self.inner.timeouts.insert(host);
        } else {
            self.inner.timeouts.remove(&host);
        }
    }

    /// Makes the next `count` ring descriptions fail.
    pub fn fail_next_describes(&self, count: usize) {
        self.inner.describe_failures.store(count, Ordering::SeqCst);
    }

    /// Connections successfully opened so far.
    pub fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Connections closed so far.
    pub fn closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Statements executed on `host`, handshakes included.
    pub fn executed_on(&self, host: impl Into<Host>) -> usize {
        let host: Host = host.into();
        self.inner
            .executed
            .get(&host)
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Rows stored in `keyspace.table`.
    pub fn row_count(&self, keyspace: &str, table: &str) -> usize {
        self.inner
            .tables
            .get(&format!("{keyspace}.{table}"))
            .map(|rows| rows.len())
            .unwrap_or(0)
    }
}

impl RingDescriber for MemoryCluster {
    fn describe_ring(&self, keyspace: &str) -> Result<Vec<TokenRangeDescription>> {
        let failing = self
            .inner
            .describe_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::transport("seed", "ring description unavailable"));
        }
        if !self.inner.keyspace_exists(keyspace) {
            return Err(Error::protocol(format!("keyspace {keyspace} does not exist")));
        }
        Ok(self.inner.ring.read().clone())
    }
}

impl Connector for MemoryCluster {
    type Connection = MemoryConnection;

    fn connect(&self, host: &Host, port: u16, keyspace: &str) -> Result<MemoryConnection> {
        if self.inner.down.contains(host) {
            return Err(Error::transport(
                host.as_str(),
                format!("connection refused on port {port}"),
            ));
        }
        let mut conn = MemoryConnection {
            cluster: Arc::clone(&self.inner),
            host: host.clone(),
            keyspace: None,
            open: true,
        };
        conn.execute(&format!("USE {keyspace};"))?;
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(conn)
    }
}

/// Connection to one host of a [`MemoryCluster`].
pub struct MemoryConnection {
    cluster: Arc<ClusterInner>,
    host: Host,
    keyspace: Option<String>,
    open: bool,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("host", &self.host)
            .field("keyspace", &self.keyspace)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl MemoryConnection {
    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    fn table_key(&self, table: &str) -> Result<String> {
        let keyspace = self
            .keyspace
            .as_deref()
            .ok_or_else(|| Error::protocol("no keyspace selected"))?;
        Ok(format!("{keyspace}.{table}"))
    }
}

impl Connection for MemoryConnection {
    fn execute(&mut self, query: &str) -> Result<QueryResult> {
        let inner = &self.cluster;
        if !self.open {
            return Err(Error::transport(self.host.as_str(), "connection is closed"));
        }
        if inner.down.contains(&self.host) {
            return Err(Error::transport(self.host.as_str(), "connection reset by peer"));
        }
        if inner.timeouts.contains(&self.host) {
            return Err(Error::Timeout(format!("{} did not answer in time", self.host)));
        }
        *inner.executed.entry(self.host.clone()).or_insert(0) += 1;

        match parse(query)? {
            Statement::Use(keyspace) => {
                if !inner.keyspace_exists(&keyspace) {
                    return Err(Error::protocol(format!("keyspace {keyspace} does not exist")));
                }
                self.keyspace = Some(keyspace);
                Ok(QueryResult::empty())
            }
            Statement::Insert {
                table,
                columns,
                values,
            } => {
                let key = self.table_key(&table)?;
                let row: StoredRow = columns.into_iter().zip(values).collect();
                self.cluster.tables.entry(key).or_default().push(row);
                Ok(QueryResult::empty())
            }
            Statement::Select {
                table,
                column,
                value,
            } => {
                let key = self.table_key(&table)?;
                let rows: Vec<Row> = self
                    .cluster
                    .tables
                    .get(&key)
                    .map(|rows| {
                        rows.iter()
                            .filter(|row| row.iter().any(|(c, v)| *c == column && *v == value))
                            .map(|row| row.iter().map(|(_, v)| v.clone()).collect())
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(QueryResult::with_rows(rows))
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Err(Error::transport(self.host.as_str(), "connection already closed"));
        }
        self.open = false;
        self.cluster.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Statement {
    Use(String),
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<String>,
    },
    Select {
        table: String,
        column: String,
        value: String,
    },
}

fn parse(sql: &str) -> Result<Statement> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(|e| Error::protocol(e.to_string()))?;
    let [statement]: [sql_ast::Statement; 1] = statements
        .try_into()
        .map_err(|found: Vec<_>| Error::protocol(format!("expected one statement, found {}", found.len())))?;

    match statement {
        sql_ast::Statement::Use(target) => convert_use(target),
        sql_ast::Statement::Insert(insert) => convert_insert(insert),
        sql_ast::Statement::Query(query) => convert_select(*query),
        other => Err(Error::protocol(format!("unsupported statement: {other}"))),
    }
}

fn convert_use(target: sql_ast::Use) -> Result<Statement> {
    match target {
        sql_ast::Use::Object(name) | sql_ast::Use::Database(name) | sql_ast::Use::Schema(name) => {
            Ok(Statement::Use(name.to_string()))
        }
        other => Err(Error::protocol(format!("unsupported USE target: {other:?}"))),
    }
}

fn convert_insert(insert: sql_ast::Insert) -> Result<Statement> {
    let table = insert.table.to_string();
    let columns: Vec<String> = insert.columns.into_iter().map(|id| id.value).collect();

    let source = insert
        .source
        .ok_or_else(|| Error::protocol("INSERT without VALUES"))?;
    let sql_ast::SetExpr::Values(rows) = *source.body else {
        return Err(Error::protocol("only INSERT ... VALUES is supported"));
    };
    let [row]: [Vec<sql_ast::Expr>; 1] = rows
        .rows
        .try_into()
        .map_err(|found: Vec<_>| Error::protocol(format!("expected one row of values, found {}", found.len())))?;
    let values = row.into_iter().map(string_literal).collect::<Result<Vec<_>>>()?;

    if columns.len() != values.len() {
        return Err(Error::protocol(format!(
            "{} columns but {} values",
            columns.len(),
            values.len()
        )));
    }
    Ok(Statement::Insert {
        table,
        columns,
        values,
    })
}

/// Accepts `SELECT * FROM <table> WHERE <column> = '<value>'` only.
fn convert_select(query: sql_ast::Query) -> Result<Statement> {
    let sql_ast::SetExpr::Select(select) = *query.body else {
        return Err(Error::protocol("only SELECT queries are supported"));
    };
    let select = *select;
    if !matches!(select.projection.as_slice(), [sql_ast::SelectItem::Wildcard(_)]) {
        return Err(Error::protocol("only SELECT * is supported"));
    }

    let [from]: [sql_ast::TableWithJoins; 1] = select
        .from
        .try_into()
        .map_err(|found: Vec<_>| Error::protocol(format!("expected one table, found {}", found.len())))?;
    if !from.joins.is_empty() {
        return Err(Error::protocol("joins are not supported"));
    }
    let sql_ast::TableFactor::Table { name, .. } = from.relation else {
        return Err(Error::protocol("expected a table name after FROM"));
    };

    let Some(sql_ast::Expr::BinaryOp {
        left,
        op: sql_ast::BinaryOperator::Eq,
        right,
    }) = select.selection
    else {
        return Err(Error::protocol("expected WHERE <column> = '<value>'"));
    };
    let column = match *left {
        sql_ast::Expr::Identifier(column) => column,
        other => return Err(Error::protocol(format!("expected a column name, found {other}"))),
    };

    Ok(Statement::Select {
        table: name.to_string(),
        column: column.value,
        value: string_literal(*right)?,
    })
}

fn string_literal(expr: sql_ast::Expr) -> Result<String> {
    match expr {
        sql_ast::Expr::Value(literal) => match literal.value {
            sql_ast::Value::SingleQuotedString(s) => Ok(s),
            other => Err(Error::protocol(format!("expected string literal, found {other}"))),
        },
        other => Err(Error::protocol(format!("expected string literal, found {other}"))),
    }
}
