//! Read-only verification of the on-disk schema, used by `keyport check-db`.

use super::sqlite::{TABLE_NAME, UNIQUE_INDEX_NAME};
use rusqlite::{params, Connection};

/// Columns the store reads and writes.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "id",
    "exchange",
    "api_key",
    "api_secret",
    "created_at",
    "updated_at",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaReport {
    pub table_exists: bool,
    pub missing_columns: Vec<String>,
    /// `unique_exchange` exists, is unique, and covers exactly `exchange`.
    pub unique_exchange_index: bool,
    /// `None` when the table is absent.
    pub row_count: Option<u64>,
}

impl SchemaReport {
    pub fn is_healthy(&self) -> bool {
        self.table_exists && self.missing_columns.is_empty() && self.unique_exchange_index
    }

    /// Human-readable list of everything wrong with the schema.
    pub fn problems(&self) -> Vec<String> {
        if !self.table_exists {
            return vec![format!("Table {TABLE_NAME} does not exist")];
        }
        let mut problems = Vec::new();
        if !self.missing_columns.is_empty() {
            problems.push(format!(
                "Missing columns: {}",
                self.missing_columns.join(", ")
            ));
        }
        if !self.unique_exchange_index {
            problems.push(format!(
                "Missing unique index {UNIQUE_INDEX_NAME} on exchange"
            ));
        }
        problems
    }
}

pub fn inspect_schema(conn: &Connection) -> rusqlite::Result<SchemaReport> {
    let table_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![TABLE_NAME],
        |row| row.get(0),
    )?;

    if !table_exists {
        return Ok(SchemaReport {
            table_exists: false,
            missing_columns: REQUIRED_COLUMNS.iter().map(|c| (*c).to_string()).collect(),
            unique_exchange_index: false,
            row_count: None,
        });
    }

    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map(params![TABLE_NAME], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let missing_columns = REQUIRED_COLUMNS
        .iter()
        .filter(|required| !columns.iter().any(|c| c == *required))
        .map(|c| (*c).to_string())
        .collect();

    let unique_exchange_index: bool = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM pragma_index_list(?1) AS il
             WHERE il.name = ?2
               AND il.\"unique\" = 1
               AND (SELECT group_concat(ii.name) FROM pragma_index_info(il.name) AS ii) = 'exchange'
         )",
        params![TABLE_NAME, UNIQUE_INDEX_NAME],
        |row| row.get(0),
    )?;

    let row_count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {TABLE_NAME}"),
        [],
        |row| row.get(0),
    )?;

    Ok(SchemaReport {
        table_exists,
        missing_columns,
        unique_exchange_index,
        row_count: Some(u64::try_from(row_count).unwrap_or(0)),
    })
}
