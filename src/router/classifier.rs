use sqlparser::ast::{Expr, Query, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tracing::debug;

use crate::connector::{ClassifyError, StatementClassifier, StatementKind};

/// Statement classifier backed by `sqlparser`
///
/// Only queries are read-safe. `SELECT ... INTO` and anything else
/// (DML, DDL, SET, SHOW, EXPLAIN, procedure calls) need the write node.
pub struct SqlClassifier {
    dialect: PostgreSqlDialect,
}

impl SqlClassifier {
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
        }
    }

    fn parse(&self, sql: &str) -> Result<Vec<Statement>, ClassifyError> {
        let sql_trimmed = sql.trim();
        if sql_trimmed.is_empty() {
            return Err(ClassifyError::EmptyStatement);
        }

        let statements = Parser::parse_sql(&self.dialect, sql_trimmed)
            .map_err(|e| ClassifyError::ParseError(e.to_string()))?;

        if statements.is_empty() {
            return Err(ClassifyError::EmptyStatement);
        }
        Ok(statements)
    }
}

impl Default for SqlClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementClassifier for SqlClassifier {
    fn classify(&self, sql: &str) -> Result<StatementKind, ClassifyError> {
        if is_transaction_control(sql) {
            return Ok(StatementKind::WriteRequired);
        }

        let statements = self.parse(sql)?;
        let read_safe = statements.iter().all(|stmt| match stmt {
            Statement::Query(query) => is_read_query(query),
            _ => false,
        });

        let kind = if read_safe {
            StatementKind::ReadSafe
        } else {
            StatementKind::WriteRequired
        };
        debug!(kind = ?kind, "Statement classified");
        Ok(kind)
    }

    fn has_lock_clause(&self, sql: &str) -> Result<bool, ClassifyError> {
        let statements = self.parse(sql)?;
        Ok(statements.iter().any(|stmt| match stmt {
            Statement::Query(query) => query_has_locks(query),
            _ => false,
        }))
    }
}

/// Quick keyword check on the leading word(s), ahead of a full parse
fn is_transaction_control(sql: &str) -> bool {
    let mut words = sql
        .split(|c: char| c.is_whitespace() || c == ';')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_uppercase());
    match words.next().as_deref() {
        Some("BEGIN" | "COMMIT" | "ROLLBACK" | "END") => true,
        Some("START") => words.next().as_deref() == Some("TRANSACTION"),
        _ => false,
    }
}

fn is_read_query(query: &Query) -> bool {
    let ctes_read = query
        .with
        .as_ref()
        .map(|with| with.cte_tables.iter().all(|cte| is_read_query(&cte.query)))
        .unwrap_or(true);
    ctes_read && is_read_set_expr(&query.body)
}

fn is_read_set_expr(expr: &SetExpr) -> bool {
    match expr {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => is_read_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            is_read_set_expr(left) && is_read_set_expr(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => true,
        _ => false,
    }
}

/// Row-lock clauses anywhere in the query: CTEs, FROM items and WHERE subqueries
fn query_has_locks(query: &Query) -> bool {
    if !query.locks.is_empty() {
        return true;
    }
    let ctes_lock = query
        .with
        .as_ref()
        .map(|with| with.cte_tables.iter().any(|cte| query_has_locks(&cte.query)))
        .unwrap_or(false);
    ctes_lock || set_expr_has_locks(&query.body)
}

fn set_expr_has_locks(expr: &SetExpr) -> bool {
    match expr {
        SetExpr::Select(select) => {
            select.from.iter().any(table_has_locks)
                || select.selection.as_ref().map(expr_has_locks).unwrap_or(false)
        }
        SetExpr::Query(query) => query_has_locks(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_has_locks(left) || set_expr_has_locks(right)
        }
        _ => false,
    }
}

fn table_has_locks(table: &TableWithJoins) -> bool {
    factor_has_locks(&table.relation) || table.joins.iter().any(|j| factor_has_locks(&j.relation))
}

fn factor_has_locks(factor: &TableFactor) -> bool {
    match factor {
        TableFactor::Derived { subquery, .. } => query_has_locks(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => table_has_locks(table_with_joins),
        _ => false,
    }
}

fn expr_has_locks(expr: &Expr) -> bool {
    match expr {
        Expr::Subquery(query) | Expr::Exists { subquery: query, .. } => query_has_locks(query),
        Expr::InSubquery { expr, subquery, .. } => {
            expr_has_locks(expr) || query_has_locks(subquery)
        }
        Expr::BinaryOp { left, right, .. } => expr_has_locks(left) || expr_has_locks(right),
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => expr_has_locks(expr),
        _ => false,
    }
}
