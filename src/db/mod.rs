/// Database Module
///
/// This module handles all table access for the migration:
/// - Resolving a connection descriptor into a live PostgreSQL session
/// - The `TableConnection` operations the pipeline stages are written against
/// - Decoding result rows into `RowBatch` values
///
/// There is no shared pool. Each stage opens its own connection through a
/// `ConnectionProvider` and closes it before returning.
#[cfg(test)]
pub mod memory;
pub mod sql;

use crate::error::StoreError;
use crate::models::{ColumnInfo, RowBatch, TableRef, Value};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::{Column, Connection, PgConnection, Row, TypeInfo};
use std::fmt;

const DEFAULT_PORT: u16 = 5432;

/// Credentials and location of the database, resolved once per run
#[derive(Clone, Default)]
pub struct ConnectionDescriptor {
    /// `host` or `host:port`
    pub account: String,
    pub user: String,
    pub password: String,
    pub warehouse: String,
    pub database: String,
    pub role: String,
}

// Keep the password out of logs.
impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("role", &self.role)
            .finish()
    }
}

impl ConnectionDescriptor {
    /// Read the `MIGRATE_DB_*` variables; required fields are checked on `open`
    pub fn from_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).unwrap_or_default();
        Self {
            account: get("MIGRATE_DB_ACCOUNT"),
            user: get("MIGRATE_DB_USER"),
            password: get("MIGRATE_DB_PASSWORD"),
            warehouse: get("MIGRATE_DB_WAREHOUSE"),
            database: get("MIGRATE_DB_DATABASE"),
            role: get("MIGRATE_DB_ROLE"),
        }
    }

    /// Check required fields and build the driver options
    pub fn connect_options(&self) -> Result<PgConnectOptions, StoreError> {
        for (name, value) in [
            ("account", &self.account),
            ("user", &self.user),
            ("password", &self.password),
            ("database", &self.database),
        ] {
            if value.trim().is_empty() {
                return Err(StoreError::MissingCredential(name));
            }
        }

        let (host, port) = match self.account.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| StoreError::MissingCredential("account port"))?;
                (host, port)
            }
            None => (self.account.as_str(), DEFAULT_PORT),
        };

        let mut options = PgConnectOptions::new()
            .host(host)
            .port(port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database);

        // PostgreSQL has no warehouses; tag the session with it instead.
        if !self.warehouse.is_empty() {
            options = options.application_name(&self.warehouse);
        }

        Ok(options)
    }
}

/// Opens one connection per call
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    type Connection: TableConnection;

    async fn open(&self) -> Result<Self::Connection, StoreError>;
}

/// The table operations the migration stages are built from
#[async_trait]
pub trait TableConnection: Send + Sized {
    /// `SELECT * FROM table WHERE column = value`
    async fn select_where_eq(&mut self, table: &TableRef, column: &str, value: &Value) -> Result<RowBatch, StoreError>;

    /// Columns and their declared types in table order; `MissingTable` if the table does not exist
    async fn table_columns(&mut self, table: &TableRef) -> Result<Vec<ColumnInfo>, StoreError>;

    async fn drop_table_if_exists(&mut self, table: &TableRef) -> Result<(), StoreError>;

    /// `CREATE TABLE target AS SELECT * FROM source`
    async fn create_table_as_copy(&mut self, target: &TableRef, source: &TableRef) -> Result<(), StoreError>;

    /// Delete rows whose `key_columns` tuple is one of `keys`; returns rows deleted
    async fn delete_where_in(
        &mut self,
        table: &TableRef,
        key_columns: &[String],
        keys: &[Vec<Value>],
    ) -> Result<u64, StoreError>;

    /// Append every row of `batch`, all or nothing; returns rows inserted
    async fn insert_rows(&mut self, table: &TableRef, batch: &RowBatch) -> Result<u64, StoreError>;

    /// Set `set_column` to the current timestamp where `id_column` is one of `ids`
    async fn touch_where_in(
        &mut self,
        table: &TableRef,
        set_column: &str,
        id_column: &str,
        ids: &[Value],
    ) -> Result<u64, StoreError>;

    /// Take the session-scoped lease on `key`; false if another session holds it
    async fn try_acquire_lease(&mut self, key: &str) -> Result<bool, StoreError>;

    async fn release_lease(&mut self, key: &str) -> Result<(), StoreError>;

    async fn close(self) -> Result<(), StoreError>;
}

/// Opens PostgreSQL sessions from a descriptor
pub struct PgProvider {
    descriptor: ConnectionDescriptor,
}

impl PgProvider {
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl ConnectionProvider for PgProvider {
    type Connection = PgTableConnection;

    async fn open(&self) -> Result<PgTableConnection, StoreError> {
        let options = self.descriptor.connect_options()?;
        let mut conn = PgConnection::connect_with(&options).await?;

        if !self.descriptor.role.is_empty() {
            let set_role = format!("SET ROLE {}", sql::quote_ident(&self.descriptor.role)?);
            sqlx::query(&set_role).execute(&mut conn).await?;
        }

        tracing::debug!("Opened connection to {} as {}", self.descriptor.database, self.descriptor.user);
        Ok(PgTableConnection { conn })
    }
}

pub struct PgTableConnection {
    conn: PgConnection,
}

#[async_trait]
impl TableConnection for PgTableConnection {
    async fn select_where_eq(&mut self, table: &TableRef, column: &str, value: &Value) -> Result<RowBatch, StoreError> {
        let mut qb = sql::select_where_eq(table, column, value)?;
        tracing::debug!("{}", qb.sql());
        let rows = qb.build().fetch_all(&mut self.conn).await?;

        // An empty result carries no column metadata, so ask the catalog.
        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => self.table_columns(table).await?.into_iter().map(|c| c.name).collect(),
        };

        let mut batch = RowBatch::new(columns);
        for row in &rows {
            let values = (0..row.columns().len()).map(|i| decode_cell(row, i)).collect::<Result<Vec<_>, _>>()?;
            // Every row of one result shares the result's column list.
            batch.push_row(values).map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?;
        }

        Ok(batch)
    }

    async fn table_columns(&mut self, table: &TableRef) -> Result<Vec<ColumnInfo>, StoreError> {
        let columns: Vec<ColumnInfo> = sqlx::query_as::<_, (String, String)>(sql::TABLE_COLUMNS)
            .bind(&table.schema)
            .bind(&table.table)
            .fetch_all(&mut self.conn)
            .await?
            .into_iter()
            .map(|(name, data_type)| ColumnInfo::new(name, data_type))
            .collect();

        if columns.is_empty() {
            return Err(StoreError::MissingTable(table.clone()));
        }
        Ok(columns)
    }

    async fn drop_table_if_exists(&mut self, table: &TableRef) -> Result<(), StoreError> {
        let statement = sql::drop_table_if_exists(table)?;
        tracing::debug!("{}", statement);
        sqlx::query(&statement).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn create_table_as_copy(&mut self, target: &TableRef, source: &TableRef) -> Result<(), StoreError> {
        let statement = sql::create_table_as_copy(target, source)?;
        tracing::debug!("{}", statement);
        sqlx::query(&statement).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn delete_where_in(
        &mut self,
        table: &TableRef,
        key_columns: &[String],
        keys: &[Vec<Value>],
    ) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut tx = self.conn.begin().await?;
        let mut deleted = 0;

        for chunk in keys.chunks(sql::tuples_per_statement(key_columns.len())) {
            let mut qb = sql::delete_where_in(table, key_columns, chunk)?;
            tracing::debug!("{}", qb.sql());
            deleted += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }

    async fn insert_rows(&mut self, table: &TableRef, batch: &RowBatch) -> Result<u64, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tx = self.conn.begin().await?;
        let mut inserted = 0;

        for chunk in batch.rows().chunks(sql::tuples_per_statement(batch.columns().len())) {
            let mut qb = sql::insert_rows(table, batch.columns(), chunk)?;
            inserted += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn touch_where_in(
        &mut self,
        table: &TableRef,
        set_column: &str,
        id_column: &str,
        ids: &[Value],
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.conn.begin().await?;
        let mut touched = 0;

        for chunk in ids.chunks(sql::BIND_LIMIT) {
            let mut qb = sql::touch_where_in(table, set_column, id_column, chunk)?;
            tracing::debug!("{}", qb.sql());
            touched += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(touched)
    }

    async fn try_acquire_lease(&mut self, key: &str) -> Result<bool, StoreError> {
        let acquired = sqlx::query_scalar::<_, bool>(sql::TRY_LEASE).bind(key).fetch_one(&mut self.conn).await?;
        Ok(acquired)
    }

    async fn release_lease(&mut self, key: &str) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, bool>(sql::RELEASE_LEASE).bind(key).fetch_one(&mut self.conn).await?;
        Ok(())
    }

    async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await?;
        Ok(())
    }
}

/// The Rust representation a PostgreSQL column decodes into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellType {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Uuid,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Json,
}

impl CellType {
    /// Map a driver type name; `None` for types the migration cannot carry
    fn from_type_name(name: &str) -> Option<Self> {
        let cell = match name {
            "BOOL" => Self::Bool,
            "INT2" => Self::Int2,
            "INT4" => Self::Int4,
            "INT8" => Self::Int8,
            "FLOAT4" => Self::Float4,
            "FLOAT8" => Self::Float8,
            "NUMERIC" => Self::Numeric,
            "TEXT" | "VARCHAR" | "CHAR" | "NAME" => Self::Text,
            "UUID" => Self::Uuid,
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "TIMESTAMP" => Self::Timestamp,
            "TIMESTAMPTZ" => Self::TimestampTz,
            "JSON" | "JSONB" => Self::Json,
            _ => return None,
        };
        Some(cell)
    }
}

/// Decode one cell by its PostgreSQL type name
fn decode_cell(row: &PgRow, idx: usize) -> Result<Value, StoreError> {
    let column = &row.columns()[idx];
    let type_name = column.type_info().name();
    let cell = CellType::from_type_name(type_name).ok_or_else(|| StoreError::UnsupportedType {
        column: column.name().to_string(),
        type_name: type_name.to_string(),
    })?;

    let value = match cell {
        CellType::Bool => row.try_get::<Option<bool>, _>(idx)?.map(Value::Bool),
        CellType::Int2 => row.try_get::<Option<i16>, _>(idx)?.map(|v| Value::Int(v.into())),
        CellType::Int4 => row.try_get::<Option<i32>, _>(idx)?.map(|v| Value::Int(v.into())),
        CellType::Int8 => row.try_get::<Option<i64>, _>(idx)?.map(Value::Int),
        CellType::Float4 => row.try_get::<Option<f32>, _>(idx)?.map(|v| Value::Float(v.into())),
        CellType::Float8 => row.try_get::<Option<f64>, _>(idx)?.map(Value::Float),
        CellType::Numeric => row.try_get::<Option<rust_decimal::Decimal>, _>(idx)?.map(Value::Decimal),
        CellType::Text => row.try_get::<Option<String>, _>(idx)?.map(Value::Text),
        CellType::Uuid => row.try_get::<Option<uuid::Uuid>, _>(idx)?.map(Value::Uuid),
        CellType::Date => row.try_get::<Option<chrono::NaiveDate>, _>(idx)?.map(Value::Date),
        CellType::Time => row.try_get::<Option<chrono::NaiveTime>, _>(idx)?.map(Value::Time),
        CellType::Timestamp => row.try_get::<Option<chrono::NaiveDateTime>, _>(idx)?.map(Value::Timestamp),
        CellType::TimestampTz => row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)?.map(Value::TimestampTz),
        CellType::Json => row.try_get::<Option<serde_json::Value>, _>(idx)?.map(Value::Json),
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn descriptor() -> ConnectionDescriptor {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MIGRATE_DB_ACCOUNT", "db.internal:6432"),
            ("MIGRATE_DB_USER", "loader"),
            ("MIGRATE_DB_PASSWORD", "s3cret"),
            ("MIGRATE_DB_WAREHOUSE", "etl_wh"),
            ("MIGRATE_DB_DATABASE", "analytics"),
        ]);
        ConnectionDescriptor::from_env(|k| env.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn test_connect_options_from_descriptor() {
        let options = descriptor().connect_options().unwrap();

        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6432);
        assert_eq!(options.get_username(), "loader");
        assert_eq!(options.get_database(), Some("analytics"));
        assert_eq!(options.get_application_name(), Some("etl_wh"));
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let mut d = descriptor();
        d.password.clear();
        assert!(matches!(d.connect_options(), Err(StoreError::MissingCredential("password"))));

        let mut d = descriptor();
        d.account = "db.internal:notaport".to_string();
        assert!(d.connect_options().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let printed = format!("{:?}", descriptor());
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("s3cret"));
    }

    #[test]
    fn test_numeric_uuid_and_time_columns_are_decoded() {
        assert_eq!(CellType::from_type_name("NUMERIC"), Some(CellType::Numeric));
        assert_eq!(CellType::from_type_name("UUID"), Some(CellType::Uuid));
        assert_eq!(CellType::from_type_name("TIME"), Some(CellType::Time));
        assert_eq!(CellType::from_type_name("TIMESTAMPTZ"), Some(CellType::TimestampTz));
        assert_eq!(CellType::from_type_name("CHAR"), Some(CellType::Text));
    }

    #[test]
    fn test_unknown_column_types_are_rejected() {
        assert_eq!(CellType::from_type_name("INTERVAL"), None);
        assert_eq!(CellType::from_type_name("BYTEA"), None);
    }

    #[tokio::test]
    async fn test_open_fails_before_dialing_without_credentials() {
        let provider = PgProvider::new(ConnectionDescriptor::default());
        assert!(matches!(provider.open().await, Err(StoreError::MissingCredential("account"))));
    }
}
