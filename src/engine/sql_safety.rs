//! SQL safety classification for read-only and production enforcement.
//!
//! Statements are parsed with the dialect of the session's engine. A
//! statement that fails to parse cannot be classified; callers enforcing a
//! policy treat that as a refusal.

use sqlparser::{
    ast::{Query, SetExpr, Statement},
    dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect},
    parser::Parser,
};

use crate::engine::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqlSafetyAnalysis {
    /// At least one statement writes data or schema
    pub is_mutation: bool,
    /// At least one statement drops, truncates, alters, or rewrites a whole table
    pub is_dangerous: bool,
}

pub fn analyze_sql(driver_id: &str, sql: &str) -> EngineResult<SqlSafetyAnalysis> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation("Empty SQL"));
    }

    let dialect = dialect_for_driver(driver_id);
    let statements = Parser::parse_sql(&*dialect, trimmed)
        .map_err(|err| EngineError::syntax_error(err.to_string()))?;

    Ok(statements
        .iter()
        .fold(SqlSafetyAnalysis::default(), |acc, statement| SqlSafetyAnalysis {
            is_mutation: acc.is_mutation || is_mutation_statement(statement),
            is_dangerous: acc.is_dangerous || is_dangerous_statement(statement),
        }))
}

fn dialect_for_driver(driver_id: &str) -> Box<dyn Dialect> {
    match driver_id {
        "postgres" => Box::new(PostgreSqlDialect {}),
        "mysql" => Box::new(MySqlDialect {}),
        "sqlite" => Box::new(SQLiteDialect {}),
        _ => Box::new(GenericDialect {}),
    }
}

fn is_mutation_statement(statement: &Statement) -> bool {
    match statement {
        Statement::Query(query) => query_is_mutation(query),
        Statement::Explain {
            analyze, statement, ..
        } => *analyze && is_mutation_statement(statement),
        Statement::ShowCreate { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowVariables { .. }
        | Statement::Set(_)
        | Statement::Use(_)
        | Statement::StartTransaction { .. }
        | Statement::Commit { .. }
        | Statement::Rollback { .. } => false,
        _ => true,
    }
}

fn is_dangerous_statement(statement: &Statement) -> bool {
    match statement {
        Statement::Drop { .. }
        | Statement::Truncate(_)
        | Statement::AlterTable(_)
        | Statement::AlterIndex { .. }
        | Statement::AlterView { .. } => true,
        Statement::Update(update) => update.selection.is_none(),
        Statement::Delete(delete) => delete.selection.is_none(),
        Statement::Explain {
            analyze, statement, ..
        } if *analyze => is_dangerous_statement(statement),
        _ => false,
    }
}

fn query_is_mutation(query: &Query) -> bool {
    set_expr_is_mutation(&query.body)
}

fn set_expr_is_mutation(expr: &SetExpr) -> bool {
    match expr {
        // SELECT .. INTO creates a table
        SetExpr::Select(select) => select.into.is_some(),
        SetExpr::Query(query) => query_is_mutation(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_is_mutation(left) || set_expr_is_mutation(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => false,
        _ => true,
    }
}
