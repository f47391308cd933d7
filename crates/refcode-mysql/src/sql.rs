//! Renders logical queries as MySQL statements.

use refcode::store::{Identifier, Query, WriteQuery};

/// A bound parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Bind<'a> {
    Int(i64),
    Text(&'a str),
}

/// How a result column is decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Column {
    Int,
    Text,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Statement<'a> {
    pub(crate) sql: String,
    pub(crate) binds: Vec<Bind<'a>>,
    pub(crate) columns: &'static [Column],
}

/// Backtick-quotes each part of `ident`. Identifiers are validated on
/// construction and never contain backticks.
fn quote(ident: &Identifier) -> String {
    ident
        .parts()
        .map(|part| format!("`{part}`"))
        .collect::<Vec<_>>()
        .join(".")
}

pub(crate) fn read<'a>(query: &Query<'a>) -> Statement<'a> {
    match *query {
        Query::CountMatching { table, column, value } => Statement {
            sql: format!("SELECT COUNT(*) FROM {} WHERE {} = ?", quote(table), quote(column)),
            binds: vec![Bind::Text(value)],
            columns: &[Column::Int],
        },
        Query::SelectCode {
            table,
            id_column,
            id,
            code_column,
        } => Statement {
            sql: format!(
                "SELECT CAST({code} AS CHAR) FROM {} WHERE {} = ? LIMIT 1",
                quote(table),
                quote(id_column),
                code = quote(code_column),
            ),
            binds: vec![Bind::Int(id)],
            columns: &[Column::Text],
        },
        Query::BridgedPairs { primary, bridge } => {
            let p_id = quote(&primary.id_column);
            let b_primary = quote(&bridge.primary_column);
            let b_id = quote(&bridge.id_column);
            Statement {
                sql: format!(
                    "SELECT CAST(b.{b_primary} AS SIGNED), CAST(b.{b_id} AS SIGNED) \
                     FROM {} AS b JOIN {} AS p ON p.{p_id} = b.{b_primary} \
                     ORDER BY b.{b_primary}, b.{b_id}",
                    quote(&bridge.table),
                    quote(&primary.table),
                ),
                binds: Vec::new(),
                columns: &[Column::Int, Column::Int],
            }
        }
        Query::MissingCodes {
            table,
            key_column,
            code_column,
        } => {
            let code = quote(code_column);
            Statement {
                sql: format!(
                    "SELECT CAST({} AS SIGNED) FROM {} WHERE {code} IS NULL OR {code} = ''",
                    quote(key_column),
                    quote(table),
                ),
                binds: Vec::new(),
                columns: &[Column::Int],
            }
        }
    }
}

pub(crate) fn write<'a>(query: &WriteQuery<'a>) -> Statement<'a> {
    match *query {
        WriteQuery::ConditionalUpdate {
            table,
            id_column,
            id,
            code_column,
            code,
        } => {
            let column = quote(code_column);
            Statement {
                sql: format!(
                    "UPDATE {} SET {column} = ? WHERE {} = ? AND ({column} IS NULL OR {column} = '')",
                    quote(table),
                    quote(id_column),
                ),
                binds: vec![Bind::Text(code), Bind::Int(id)],
                columns: &[],
            }
        }
    }
}
