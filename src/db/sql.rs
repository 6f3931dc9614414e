/// SQL Statement Builders
///
/// Every identifier goes through `quote_ident` and every value is bound as a
/// parameter, except `NULL` which is written as a literal so it takes the
/// target column's type.
use crate::error::StoreError;
use crate::models::{TableRef, Value};
use sqlx::{Postgres, QueryBuilder};

/// Upper bound on bind parameters in one PostgreSQL statement
pub const BIND_LIMIT: usize = 65_535;

/// How many tuples of `width` values fit into one statement
pub fn tuples_per_statement(width: usize) -> usize {
    (BIND_LIMIT / width.max(1)).max(1)
}

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(ident: &str) -> Result<String, StoreError> {
    if ident.is_empty() || ident.contains('\0') {
        return Err(StoreError::InvalidIdentifier(ident.to_string()));
    }
    Ok(format!("\"{}\"", ident.replace('"', "\"\"")))
}

pub fn qualified(table: &TableRef) -> Result<String, StoreError> {
    Ok(format!("{}.{}", quote_ident(&table.schema)?, quote_ident(&table.table)?))
}

fn quote_list(columns: &[String]) -> Result<String, StoreError> {
    let quoted = columns.iter().map(|c| quote_ident(c)).collect::<Result<Vec<_>, _>>()?;
    Ok(quoted.join(", "))
}

/// Append `value` as a bind parameter, or as `NULL`
pub fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Null => {
            qb.push("NULL");
        }
        Value::Bool(b) => {
            qb.push_bind(*b);
        }
        Value::Int(i) => {
            qb.push_bind(*i);
        }
        Value::Float(f) => {
            qb.push_bind(*f);
        }
        Value::Decimal(d) => {
            qb.push_bind(*d);
        }
        Value::Text(s) => {
            qb.push_bind(s.clone());
        }
        Value::Uuid(u) => {
            qb.push_bind(*u);
        }
        Value::Date(d) => {
            qb.push_bind(*d);
        }
        Value::Time(t) => {
            qb.push_bind(*t);
        }
        Value::Timestamp(t) => {
            qb.push_bind(*t);
        }
        Value::TimestampTz(t) => {
            qb.push_bind(*t);
        }
        Value::Json(j) => {
            qb.push_bind(j.clone());
        }
    }
}

fn push_tuple(qb: &mut QueryBuilder<'_, Postgres>, values: &[Value]) {
    qb.push("(");
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        push_value(qb, value);
    }
    qb.push(")");
}

/// `SELECT * FROM source WHERE sentinel = $1`
pub fn select_where_eq(
    table: &TableRef,
    column: &str,
    value: &Value,
) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let mut qb = QueryBuilder::new(format!("SELECT * FROM {} WHERE {} = ", qualified(table)?, quote_ident(column)?));
    push_value(&mut qb, value);
    Ok(qb)
}

pub fn drop_table_if_exists(table: &TableRef) -> Result<String, StoreError> {
    Ok(format!("DROP TABLE IF EXISTS {}", qualified(table)?))
}

pub fn create_table_as_copy(target: &TableRef, source: &TableRef) -> Result<String, StoreError> {
    Ok(format!("CREATE TABLE {} AS SELECT * FROM {}", qualified(target)?, qualified(source)?))
}

/// `DELETE ... WHERE k IN (...)`, or `WHERE (a, b) IN ((...), ...)` for composite keys.
///
/// `keys` must not be empty.
pub fn delete_where_in(
    table: &TableRef,
    key_columns: &[String],
    keys: &[Vec<Value>],
) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let target = if key_columns.len() == 1 {
        quote_ident(&key_columns[0])?
    } else {
        format!("({})", quote_list(key_columns)?)
    };

    let mut qb = QueryBuilder::new(format!("DELETE FROM {} WHERE {} IN (", qualified(table)?, target));
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        if key.len() == 1 {
            push_value(&mut qb, &key[0]);
        } else {
            push_tuple(&mut qb, key);
        }
    }
    qb.push(")");
    Ok(qb)
}

/// Multi-row `INSERT INTO ... (cols) VALUES (...), (...)`
pub fn insert_rows(
    table: &TableRef,
    columns: &[String],
    rows: &[Vec<Value>],
) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let mut qb = QueryBuilder::new(format!("INSERT INTO {} ({}) VALUES ", qualified(table)?, quote_list(columns)?));
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        push_tuple(&mut qb, row);
    }
    Ok(qb)
}

/// `UPDATE ... SET col = CURRENT_TIMESTAMP WHERE id IN (...)`
pub fn touch_where_in(
    table: &TableRef,
    set_column: &str,
    id_column: &str,
    ids: &[Value],
) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let mut qb = QueryBuilder::new(format!(
        "UPDATE {} SET {} = CURRENT_TIMESTAMP WHERE {} IN (",
        qualified(table)?,
        quote_ident(set_column)?,
        quote_ident(id_column)?
    ));
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        push_value(&mut qb, id);
    }
    qb.push(")");
    Ok(qb)
}

pub const TABLE_COLUMNS: &str = r#"
    SELECT column_name::text, data_type::text
    FROM information_schema.columns
    WHERE table_schema = $1 AND table_name = $2
    ORDER BY ordinal_position
"#;

pub const TRY_LEASE: &str = "SELECT pg_try_advisory_lock(hashtext($1))";
pub const RELEASE_LEASE: &str = "SELECT pg_advisory_unlock(hashtext($1))";

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableRef {
        TableRef::new("stg", "lps_map")
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("base").unwrap(), r#""base""#);
        assert_eq!(quote_ident(r#"we"ird"#).unwrap(), r#""we""ird""#);
        assert!(quote_ident("").is_err());
        assert!(quote_ident("a\0b").is_err());
    }

    #[test]
    fn test_select_binds_sentinel() {
        let qb = select_where_eq(&table(), "exported_at", &Value::text("9999-12-31")).unwrap();
        assert_eq!(qb.sql(), r#"SELECT * FROM "stg"."lps_map" WHERE "exported_at" = $1"#);
    }

    #[test]
    fn test_backup_statements() {
        let bkp = TableRef::new("bkp", "lps_map");
        assert_eq!(drop_table_if_exists(&bkp).unwrap(), r#"DROP TABLE IF EXISTS "bkp"."lps_map""#);
        assert_eq!(
            create_table_as_copy(&bkp, &table()).unwrap(),
            r#"CREATE TABLE "bkp"."lps_map" AS SELECT * FROM "stg"."lps_map""#
        );
    }

    #[test]
    fn test_delete_single_and_composite_keys() {
        let keys = vec![vec![Value::text("K1")], vec![Value::text("K2")]];
        let qb = delete_where_in(&table(), &["base".to_string()], &keys).unwrap();
        assert_eq!(qb.sql(), r#"DELETE FROM "stg"."lps_map" WHERE "base" IN ($1, $2)"#);

        let keys = vec![vec![Value::text("K1"), Value::Int(1)], vec![Value::text("K2"), Value::Int(2)]];
        let qb = delete_where_in(&table(), &["base".to_string(), "line".to_string()], &keys).unwrap();
        assert_eq!(qb.sql(), r#"DELETE FROM "stg"."lps_map" WHERE ("base", "line") IN (($1, $2), ($3, $4))"#);
    }

    #[test]
    fn test_insert_writes_null_literal() {
        let rows = vec![vec![Value::Int(1), Value::Null], vec![Value::Int(2), Value::text("x")]];
        let qb = insert_rows(&table(), &["id".to_string(), "note".to_string()], &rows).unwrap();
        assert_eq!(qb.sql(), r#"INSERT INTO "stg"."lps_map" ("id", "note") VALUES ($1, NULL), ($2, $3)"#);
    }

    #[test]
    fn test_numeric_uuid_and_time_values_are_bound() {
        let row = vec![
            Value::Decimal(rust_decimal::Decimal::new(1250, 2)),
            Value::Uuid(uuid::Uuid::nil()),
            Value::Time(chrono::NaiveTime::from_hms_opt(9, 30, 0).unwrap()),
        ];
        let columns = ["amount".to_string(), "ref".to_string(), "at".to_string()];
        let qb = insert_rows(&table(), &columns, &[row]).unwrap();
        assert_eq!(qb.sql(), r#"INSERT INTO "stg"."lps_map" ("amount", "ref", "at") VALUES ($1, $2, $3)"#);
    }

    #[test]
    fn test_touch_uses_current_timestamp() {
        let qb = touch_where_in(&table(), "exported_at", "message_id", &[Value::text("m1")]).unwrap();
        assert_eq!(
            qb.sql(),
            r#"UPDATE "stg"."lps_map" SET "exported_at" = CURRENT_TIMESTAMP WHERE "message_id" IN ($1)"#
        );
    }

    #[test]
    fn test_tuples_per_statement() {
        assert_eq!(tuples_per_statement(1), BIND_LIMIT);
        assert_eq!(tuples_per_statement(10), 6553);
        assert_eq!(tuples_per_statement(0), BIND_LIMIT);
    }
}
