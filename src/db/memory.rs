/// In-memory table store for tests.
///
/// Mirrors the SQL semantics the stages rely on (`=` via `Value::sql_eq`,
/// `CREATE TABLE AS` failing on an existing table, session leases) and can be
/// told to fail a given operation.
use super::{ConnectionProvider, TableConnection};
use crate::error::StoreError;
use crate::models::{ColumnInfo, RowBatch, TableRef, Value};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Open,
    Select,
    Columns,
    Drop,
    Create,
    Delete,
    Insert,
    Touch,
    Lease,
}

#[derive(Default)]
struct State {
    tables: HashMap<TableRef, RowBatch>,
    column_types: HashMap<(TableRef, String), String>,
    leases: HashSet<String>,
    failpoints: HashSet<Op>,
    executed: Vec<Op>,
    open_connections: usize,
}

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn create_table(&self, table: TableRef, contents: RowBatch) {
        self.state().tables.insert(table, contents);
    }

    /// Declare a column's catalog type; undeclared columns report a type
    /// inferred from their values
    pub fn declare_column_type(&self, table: &TableRef, column: &str, data_type: &str) {
        self.state().column_types.insert((table.clone(), column.to_string()), data_type.to_string());
    }

    pub fn table(&self, table: &TableRef) -> Option<RowBatch> {
        self.state().tables.get(table).cloned()
    }

    pub fn fail_on(&self, op: Op) {
        self.state().failpoints.insert(op);
    }

    pub fn clear_failures(&self) {
        self.state().failpoints.clear();
    }

    /// Take a lease as if another session held it
    pub fn hold_lease(&self, key: &str) {
        self.state().leases.insert(key.to_string());
    }

    pub fn lease_held(&self, key: &str) -> bool {
        self.state().leases.contains(key)
    }

    pub fn open_connections(&self) -> usize {
        self.state().open_connections
    }

    /// Operations that reached the store, failed ones included
    pub fn executed(&self) -> Vec<Op> {
        self.state().executed.clone()
    }

    fn enter(&self, op: Op) -> Result<MutexGuard<'_, State>, StoreError> {
        let mut state = self.state();
        state.executed.push(op);
        if state.failpoints.contains(&op) {
            return Err(StoreError::Database(sqlx::Error::Protocol(format!("injected {:?} failure", op))));
        }
        Ok(state)
    }
}

fn inferred_type(batch: &RowBatch, idx: usize) -> &'static str {
    let sample = batch.rows().iter().map(|row| &row[idx]).find(|v| !v.is_null());
    match sample {
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Int(_)) => "bigint",
        Some(Value::Float(_)) => "double precision",
        Some(Value::Decimal(_)) => "numeric",
        Some(Value::Uuid(_)) => "uuid",
        Some(Value::Date(_)) => "date",
        Some(Value::Time(_)) => "time without time zone",
        Some(Value::Timestamp(_)) => "timestamp without time zone",
        Some(Value::TimestampTz(_)) => "timestamp with time zone",
        Some(Value::Json(_)) => "jsonb",
        Some(Value::Text(_)) | Some(Value::Null) | None => "text",
    }
}

fn column_index(batch: &RowBatch, table: &TableRef, column: &str) -> Result<usize, StoreError> {
    batch
        .column_index(column)
        .ok_or_else(|| StoreError::UnknownColumn { table: table.clone(), column: column.to_string() })
}

#[async_trait]
impl ConnectionProvider for MemoryDatabase {
    type Connection = MemoryConnection;

    async fn open(&self) -> Result<MemoryConnection, StoreError> {
        let mut state = self.enter(Op::Open)?;
        state.open_connections += 1;
        Ok(MemoryConnection { db: self.clone(), leases: Vec::new() })
    }
}

pub struct MemoryConnection {
    db: MemoryDatabase,
    leases: Vec<String>,
}

// Session end releases the connection and its leases, like a dropped socket.
impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let mut state = self.db.state();
        state.open_connections -= 1;
        for key in &self.leases {
            state.leases.remove(key);
        }
    }
}

#[async_trait]
impl TableConnection for MemoryConnection {
    async fn select_where_eq(&mut self, table: &TableRef, column: &str, value: &Value) -> Result<RowBatch, StoreError> {
        let state = self.db.enter(Op::Select)?;
        let source = state.tables.get(table).ok_or_else(|| StoreError::MissingTable(table.clone()))?;
        let idx = column_index(source, table, column)?;

        let rows = source.rows().iter().filter(|row| row[idx].sql_eq(value)).cloned().collect();
        Ok(RowBatch::from_rows(source.columns().to_vec(), rows).expect("stored rows match their columns"))
    }

    async fn table_columns(&mut self, table: &TableRef) -> Result<Vec<ColumnInfo>, StoreError> {
        let state = self.db.enter(Op::Columns)?;
        let batch = state.tables.get(table).ok_or_else(|| StoreError::MissingTable(table.clone()))?;

        let columns = batch
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let data_type = match state.column_types.get(&(table.clone(), name.clone())) {
                    Some(declared) => declared.clone(),
                    None => inferred_type(batch, idx).to_string(),
                };
                ColumnInfo::new(name.clone(), data_type)
            })
            .collect();
        Ok(columns)
    }

    async fn drop_table_if_exists(&mut self, table: &TableRef) -> Result<(), StoreError> {
        let mut state = self.db.enter(Op::Drop)?;
        state.tables.remove(table);
        Ok(())
    }

    async fn create_table_as_copy(&mut self, target: &TableRef, source: &TableRef) -> Result<(), StoreError> {
        let mut state = self.db.enter(Op::Create)?;
        if state.tables.contains_key(target) {
            return Err(StoreError::Database(sqlx::Error::Protocol(format!("relation {} already exists", target))));
        }
        let copy = state.tables.get(source).cloned().ok_or_else(|| StoreError::MissingTable(source.clone()))?;
        state.tables.insert(target.clone(), copy);
        Ok(())
    }

    async fn delete_where_in(
        &mut self,
        table: &TableRef,
        key_columns: &[String],
        keys: &[Vec<Value>],
    ) -> Result<u64, StoreError> {
        let mut state = self.db.enter(Op::Delete)?;
        let target = state.tables.get(table).ok_or_else(|| StoreError::MissingTable(table.clone()))?;
        let indexes =
            key_columns.iter().map(|c| column_index(target, table, c)).collect::<Result<Vec<_>, StoreError>>()?;

        let matches =
            |row: &Vec<Value>| keys.iter().any(|key| indexes.iter().zip(key).all(|(&i, k)| row[i].sql_eq(k)));
        let kept: Vec<Vec<Value>> = target.rows().iter().filter(|&row| !matches(row)).cloned().collect();
        let deleted = (target.len() - kept.len()) as u64;

        let replaced = RowBatch::from_rows(target.columns().to_vec(), kept).expect("stored rows match their columns");
        state.tables.insert(table.clone(), replaced);
        Ok(deleted)
    }

    async fn insert_rows(&mut self, table: &TableRef, batch: &RowBatch) -> Result<u64, StoreError> {
        let mut state = self.db.enter(Op::Insert)?;
        let target = state.tables.get_mut(table).ok_or_else(|| StoreError::MissingTable(table.clone()))?;

        // Map batch columns onto the table's column order; absent columns get NULL.
        let positions =
            batch.columns().iter().map(|c| column_index(target, table, c)).collect::<Result<Vec<_>, _>>()?;
        let width = target.columns().len();

        let mut staged = target.clone();
        for row in batch.rows() {
            let mut stored = vec![Value::Null; width];
            for (value, &pos) in row.iter().zip(&positions) {
                stored[pos] = value.clone();
            }
            staged.push_row(stored).expect("row built at table width");
        }
        *target = staged;
        Ok(batch.len() as u64)
    }

    async fn touch_where_in(
        &mut self,
        table: &TableRef,
        set_column: &str,
        id_column: &str,
        ids: &[Value],
    ) -> Result<u64, StoreError> {
        let mut state = self.db.enter(Op::Touch)?;
        let target = state.tables.get(table).ok_or_else(|| StoreError::MissingTable(table.clone()))?;
        let set_idx = column_index(target, table, set_column)?;
        let id_idx = column_index(target, table, id_column)?;

        let now = Value::Timestamp(Utc::now().naive_utc());
        let mut touched = 0;
        let rows = target
            .rows()
            .iter()
            .map(|row| {
                let mut row = row.clone();
                if ids.iter().any(|id| row[id_idx].sql_eq(id)) {
                    row[set_idx] = now.clone();
                    touched += 1;
                }
                row
            })
            .collect();

        let replaced = RowBatch::from_rows(target.columns().to_vec(), rows).expect("stored rows match their columns");
        state.tables.insert(table.clone(), replaced);
        Ok(touched)
    }

    async fn try_acquire_lease(&mut self, key: &str) -> Result<bool, StoreError> {
        let mut state = self.db.enter(Op::Lease)?;
        let acquired = state.leases.insert(key.to_string());
        drop(state);
        if acquired {
            self.leases.push(key.to_string());
        }
        Ok(acquired)
    }

    async fn release_lease(&mut self, key: &str) -> Result<(), StoreError> {
        self.db.state().leases.remove(key);
        self.leases.retain(|k| k != key);
        Ok(())
    }

    async fn close(self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Build a batch from column names and rows
pub fn batch(columns: &[&str], rows: Vec<Vec<Value>>) -> RowBatch {
    RowBatch::from_rows(columns.iter().map(|c| c.to_string()).collect(), rows).expect("fixture rows match columns")
}
