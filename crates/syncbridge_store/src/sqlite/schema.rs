//! Versioned schema for the sync database.
//!
//! Each [`VersionedSchema`] lists the full set of tables at that version and
//! the migration that upgrades the previous version to it. The schema version
//! is stored in `PRAGMA user_version`, offset by [`BASE_DB_VERSION`] so that a
//! fresh file (user_version 0) is never mistaken for version 0.

use crate::error::{StoreError, StoreResult};
use rusqlite::{params, Connection};

/// Offset added to the schema version in `PRAGMA user_version`.
pub const BASE_DB_VERSION: usize = 7100;

/// SQLite storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    /// TEXT
    Text,
    /// INTEGER
    Integer,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "TEXT" => Some(SqlType::Text),
            "INTEGER" => Some(SqlType::Integer),
            _ => None,
        }
    }
}

/// A column definition.
#[derive(Debug)]
pub struct Column {
    /// Column name.
    pub name: &'static str,
    /// Storage class.
    pub sql_type: SqlType,
    /// `PRIMARY KEY AUTOINCREMENT`.
    pub is_primary_key: bool,
    /// `NOT NULL`.
    pub non_null: bool,
    /// `DEFAULT` expression.
    pub default_value: Option<&'static str>,
}

macro_rules! column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {{
        #[allow(unused_mut)]
        let mut column = Column {
            name: $name,
            sql_type: $sql_type,
            is_primary_key: false,
            non_null: false,
            default_value: None,
        };
        $(column.$field = $value;)*
        column
    }};
}

/// A table definition.
#[derive(Debug)]
pub struct Table {
    /// Table name.
    pub name: &'static str,
    /// Columns in declaration order.
    pub columns: &'static [Column],
    /// `(index name, column list)` pairs.
    pub indices: &'static [(&'static str, &'static str)],
    /// Column lists of table-level `UNIQUE` constraints.
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    /// Creates the table and its indices.
    pub fn create(&self, conn: &Connection) -> StoreResult<()> {
        let mut sql = format!("CREATE TABLE {} (", self.name);
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(column.name);
            sql.push(' ');
            sql.push_str(column.sql_type.as_sql());
            if column.is_primary_key {
                sql.push_str(" PRIMARY KEY AUTOINCREMENT");
            }
            if column.non_null {
                sql.push_str(" NOT NULL");
            }
            if let Some(default_value) = column.default_value {
                sql.push_str(" DEFAULT ");
                sql.push_str(default_value);
            }
        }
        for unique in self.unique_constraints {
            sql.push_str(&format!(", UNIQUE ({})", unique.join(", ")));
        }
        sql.push_str(");");
        conn.execute(&sql, params![])?;
        self.create_indices(conn)
    }

    fn create_indices(&self, conn: &Connection) -> StoreResult<()> {
        for (index_name, columns) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {}({});",
                    index_name, self.name, columns
                ),
                params![],
            )?;
        }
        Ok(())
    }

    /// Checks that the stored table has exactly these columns.
    pub fn validate(&self, conn: &Connection) -> StoreResult<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual = stmt
            .query_map(params![], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i32>(3)? == 1,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if actual.len() != self.columns.len() {
            return Err(StoreError::schema(format!(
                "table {} has {} columns, expected {} (found: {})",
                self.name,
                actual.len(),
                self.columns.len(),
                actual
                    .iter()
                    .map(|(name, _, _)| name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        for ((name, sql_type, non_null), expected) in actual.iter().zip(self.columns) {
            if name != expected.name {
                return Err(StoreError::schema(format!(
                    "table {} column name mismatch: expected {}, got {}",
                    self.name, expected.name, name
                )));
            }
            if SqlType::parse(sql_type) != Some(expected.sql_type) {
                return Err(StoreError::schema(format!(
                    "table {} column {} type mismatch: expected {:?}, got {}",
                    self.name, expected.name, expected.sql_type, sql_type
                )));
            }
            if *non_null != expected.non_null {
                return Err(StoreError::schema(format!(
                    "table {} column {} non-null mismatch: expected {}, got {}",
                    self.name, expected.name, expected.non_null, non_null
                )));
            }
        }
        Ok(())
    }
}

/// The set of tables at one schema version.
pub struct VersionedSchema {
    /// Schema version, starting at 0.
    pub version: usize,
    /// Tables at this version.
    pub tables: &'static [Table],
    /// Upgrades a database at `version - 1` to this version.
    pub migration: Option<fn(&Connection) -> StoreResult<()>>,
}

impl VersionedSchema {
    /// Creates every table on an empty database and stamps the version.
    pub fn create(&self, conn: &Connection) -> StoreResult<()> {
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            params![],
        )?;
        Ok(())
    }

    /// Checks every table.
    pub fn validate(&self, conn: &Connection) -> StoreResult<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

const SYNC_JOBS_TABLE_V0: Table = Table {
    name: "sync_jobs",
    columns: &[
        column!("id", SqlType::Integer, is_primary_key = true),
        column!("module_id", SqlType::Text, non_null = true),
        column!("entity_type", SqlType::Text, non_null = true),
        column!("direction", SqlType::Text, non_null = true),
        column!("action", SqlType::Text, non_null = true),
        column!("local_id", SqlType::Integer),
        column!("remote_id", SqlType::Integer),
        column!("payload", SqlType::Text, non_null = true, default_value = Some("'{}'")),
        column!("priority", SqlType::Integer, non_null = true),
        column!("attempt_count", SqlType::Integer, non_null = true, default_value = Some("0")),
        column!("next_attempt_at", SqlType::Integer, non_null = true),
        column!("status", SqlType::Text, non_null = true),
        column!("claim_token", SqlType::Text),
        column!("claim_expires_at", SqlType::Integer),
        column!("last_error", SqlType::Text),
        column!("created_at", SqlType::Integer, non_null = true),
        column!("updated_at", SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_sync_jobs_claim", "status, priority, next_attempt_at"),
        ("idx_sync_jobs_entity", "module_id, entity_type, direction, status"),
    ],
    unique_constraints: &[],
};

/// Version 1 records the failure classification next to the message.
const SYNC_JOBS_TABLE_V1: Table = Table {
    name: "sync_jobs",
    columns: &[
        column!("id", SqlType::Integer, is_primary_key = true),
        column!("module_id", SqlType::Text, non_null = true),
        column!("entity_type", SqlType::Text, non_null = true),
        column!("direction", SqlType::Text, non_null = true),
        column!("action", SqlType::Text, non_null = true),
        column!("local_id", SqlType::Integer),
        column!("remote_id", SqlType::Integer),
        column!("payload", SqlType::Text, non_null = true, default_value = Some("'{}'")),
        column!("priority", SqlType::Integer, non_null = true),
        column!("attempt_count", SqlType::Integer, non_null = true, default_value = Some("0")),
        column!("next_attempt_at", SqlType::Integer, non_null = true),
        column!("status", SqlType::Text, non_null = true),
        column!("claim_token", SqlType::Text),
        column!("claim_expires_at", SqlType::Integer),
        column!("last_error", SqlType::Text),
        column!("created_at", SqlType::Integer, non_null = true),
        column!("updated_at", SqlType::Integer, non_null = true),
        column!("last_error_kind", SqlType::Text),
    ],
    indices: &[
        ("idx_sync_jobs_claim", "status, priority, next_attempt_at"),
        ("idx_sync_jobs_entity", "module_id, entity_type, direction, status"),
        ("idx_sync_jobs_updated", "status, updated_at"),
    ],
    unique_constraints: &[],
};

const ENTITY_MAP_TABLE_V0: Table = Table {
    name: "entity_map",
    columns: &[
        column!("module_id", SqlType::Text, non_null = true),
        column!("entity_type", SqlType::Text, non_null = true),
        column!("local_id", SqlType::Integer, non_null = true),
        column!("remote_model", SqlType::Text, non_null = true),
        column!("remote_id", SqlType::Integer, non_null = true),
        column!("created_at", SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[
        &["module_id", "entity_type", "local_id"],
        &["module_id", "entity_type", "remote_id"],
    ],
};

fn migrate_v0_to_v1(conn: &Connection) -> StoreResult<()> {
    conn.execute("ALTER TABLE sync_jobs ADD COLUMN last_error_kind TEXT", params![])?;
    conn.execute(
        "UPDATE sync_jobs SET last_error_kind = 'permanent' \
         WHERE status = 'dead' AND last_error IS NOT NULL",
        params![],
    )?;
    SYNC_JOBS_TABLE_V1.create_indices(conn)
}

/// All schema versions, oldest first.
pub const SYNC_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[SYNC_JOBS_TABLE_V0, ENTITY_MAP_TABLE_V0],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[SYNC_JOBS_TABLE_V1, ENTITY_MAP_TABLE_V0],
        migration: Some(migrate_v0_to_v1),
    },
];
