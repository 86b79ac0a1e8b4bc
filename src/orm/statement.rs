//! SQL generation for [`Model`] types.
//!
//! Every builder returns a [`Statement`] with positional `$n` parameters.

use super::model::Model;
use super::value::{self, SqlValue};
use crate::error::{HarnessError, HarnessResult};

use sqlx::postgres::PgArguments;

/// SQL text plus its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn arguments(&self) -> HarnessResult<PgArguments> {
        value::arguments(&self.params)
    }
}

fn select_list<M: Model>() -> String {
    M::COLUMNS
        .iter()
        .chain(M::GENERATED.iter())
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
}

/// `INSERT` of one or more rows, skipping `omit` columns.
pub fn insert<M: Model>(rows: &[M], omit: &[&str], returning: bool) -> Statement {
    let keep: Vec<bool> = M::COLUMNS.iter().map(|c| !omit.contains(c)).collect();
    let columns: Vec<&str> = M::COLUMNS
        .iter()
        .zip(&keep)
        .filter(|(_, kept)| **kept)
        .map(|(c, _)| *c)
        .collect();

    let mut sql = format!("INSERT INTO {}", M::TABLE);
    let mut params = Vec::with_capacity(rows.len() * columns.len());

    if columns.is_empty() {
        sql.push_str(" DEFAULT VALUES");
    } else {
        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let mut holders = Vec::with_capacity(columns.len());
            for (value, kept) in row.values().into_iter().zip(&keep) {
                if *kept {
                    params.push(value);
                    holders.push(format!("${}", params.len()));
                }
            }
            groups.push(format!("({})", holders.join(", ")));
        }
        sql.push_str(&format!(
            " ({}) VALUES {}",
            columns.join(", "),
            groups.join(", ")
        ));
    }

    if returning {
        sql.push_str(" RETURNING ");
        sql.push_str(&select_list::<M>());
    }

    Statement { sql, params }
}

/// `UPDATE` of every writable non-key column, matched by primary key.
pub fn update<M: Model>(row: &M) -> Statement {
    let mut params = Vec::with_capacity(M::COLUMNS.len());
    let mut sets = Vec::with_capacity(M::COLUMNS.len());
    for (column, value) in M::COLUMNS.iter().zip(row.values()) {
        if *column == M::PRIMARY_KEY {
            continue;
        }
        params.push(value);
        sets.push(format!("{} = ${}", column, params.len()));
    }
    params.push(row.primary_key());

    Statement {
        sql: format!(
            "UPDATE {} SET {} WHERE {} = ${}",
            M::TABLE,
            sets.join(", "),
            M::PRIMARY_KEY,
            params.len()
        ),
        params,
    }
}

/// `UPDATE` of a single writable column, matched by primary key.
pub fn update_column<M: Model>(row: &M, column: &str, value: SqlValue) -> HarnessResult<Statement> {
    if !M::COLUMNS.contains(&column) {
        return Err(HarnessError::InvalidArgument(format!(
            "{} has no writable column '{}'",
            M::TABLE,
            column
        )));
    }
    Ok(Statement {
        sql: format!(
            "UPDATE {} SET {} = $1 WHERE {} = $2",
            M::TABLE,
            column,
            M::PRIMARY_KEY
        ),
        params: vec![value, row.primary_key()],
    })
}

/// `DELETE` by primary key.
pub fn delete<M: Model>(row: &M) -> Statement {
    Statement {
        sql: format!("DELETE FROM {} WHERE {} = $1", M::TABLE, M::PRIMARY_KEY),
        params: vec![row.primary_key()],
    }
}

/// First row in primary key order.
pub fn first<M: Model>() -> Statement {
    Statement {
        sql: format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT 1",
            select_list::<M>(),
            M::TABLE,
            M::PRIMARY_KEY
        ),
        params: Vec::new(),
    }
}

/// Row with the same primary key as `row`.
pub fn find<M: Model>(row: &M) -> Statement {
    Statement {
        sql: format!(
            "SELECT {} FROM {} WHERE {} = $1",
            select_list::<M>(),
            M::TABLE,
            M::PRIMARY_KEY
        ),
        params: vec![row.primary_key()],
    }
}
