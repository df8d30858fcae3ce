//! Column catalog and target staging for SQLite

use async_trait::async_trait;
use tablecopy_core::{
    ColumnCatalog, ColumnDescriptor, Connection, CoreError, Result, SchemaMutation, TableRef,
    Value,
};

use crate::SqliteConnection;

impl SqliteConnection {
    /// `schema.` prefix for PRAGMA and sqlite_master lookups
    fn schema_prefix(&self, table: &TableRef) -> String {
        table
            .schema
            .as_deref()
            .map(|s| format!("{}.", self.quote_identifier(s)))
            .unwrap_or_default()
    }
}

#[async_trait]
impl ColumnCatalog for SqliteConnection {
    #[tracing::instrument(skip(self), fields(table = %table))]
    async fn describe_columns(&self, table: &TableRef) -> Result<Vec<ColumnDescriptor>> {
        let sql = format!(
            "PRAGMA {}table_info({})",
            self.schema_prefix(table),
            self.quote_identifier(&table.name)
        );
        let result = self.query(&sql, &[]).await?;

        let columns: Vec<ColumnDescriptor> = result
            .rows
            .iter()
            .map(|row| {
                let ordinal = row.get(0).and_then(|v| v.as_i64()).unwrap_or(0) as usize;
                let name = row.get(1).and_then(|v| v.as_str()).unwrap_or("").to_string();
                let data_type = row.get(2).and_then(|v| v.as_str()).unwrap_or("").to_string();
                let not_null = row.get(3).and_then(|v| v.as_i64()).unwrap_or(0) != 0;
                let is_primary_key = row.get(5).and_then(|v| v.as_i64()).unwrap_or(0) > 0;

                ColumnDescriptor::new(name, data_type)
                    .with_ordinal(ordinal)
                    .with_nullable(!not_null)
                    .with_primary_key(is_primary_key)
            })
            .collect();

        if columns.is_empty() {
            return Err(CoreError::NotFound(format!("Table '{}' has no columns or does not exist", table)));
        }
        Ok(columns)
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM {}sqlite_master WHERE type IN ('table', 'view') AND name = ?",
            self.schema_prefix(table)
        );
        let result = self
            .query(&sql, &[Value::String(table.name.clone())])
            .await?;
        Ok(result.has_rows())
    }
}

#[async_trait]
impl SchemaMutation for SqliteConnection {
    #[tracing::instrument(skip(self, columns), fields(table = %table, columns = columns.len()))]
    async fn create_table(&self, table: &TableRef, columns: &[ColumnDescriptor]) -> Result<()> {
        let sql = create_table_sql(self, table, columns)?;
        tracing::info!(sql = %sql, "creating target table");
        self.execute(&sql, &[])
            .await
            .map_err(|e| CoreError::Schema(format!("Failed to create table '{}': {}", table, e)))?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(table = %table))]
    async fn drop_table(&self, table: &TableRef, ignore_errors: bool) -> Result<()> {
        let sql = format!("DROP TABLE {}", table.qualified(|s| self.quote_identifier(s)));
        match self.execute(&sql, &[]).await {
            Ok(_) => {
                tracing::info!("dropped target table");
                Ok(())
            }
            Err(e) if ignore_errors => {
                tracing::warn!(error = %e, "ignoring failure to drop target table");
                Ok(())
            }
            Err(e) => Err(CoreError::Schema(format!(
                "Failed to drop table '{}': {}",
                table, e
            ))),
        }
    }
}

fn create_table_sql(
    conn: &SqliteConnection,
    table: &TableRef,
    columns: &[ColumnDescriptor],
) -> Result<String> {
    if columns.is_empty() {
        return Err(CoreError::Schema(format!(
            "Cannot create table '{}' without columns",
            table
        )));
    }

    let mut parts: Vec<String> = columns
        .iter()
        .map(|col| {
            let type_name = if col.type_name.trim().is_empty() {
                col.sql_type.default_type_name().to_string()
            } else {
                col.type_name.clone()
            };
            let mut def = format!("{} {}", conn.quote_identifier(&col.name), type_name);
            if !col.nullable {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect();

    let keys: Vec<String> = columns
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| conn.quote_identifier(&c.name))
        .collect();
    if !keys.is_empty() {
        parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }

    Ok(format!(
        "CREATE TABLE {} ({})",
        table.qualified(|s| conn.quote_identifier(s)),
        parts.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablecopy_core::SqlType;

    #[test]
    fn test_create_table_sql_with_composite_key() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        let columns = vec![
            ColumnDescriptor::new("a", "INTEGER").with_primary_key(true),
            ColumnDescriptor::new("b", "VARCHAR(10)").with_primary_key(true),
            ColumnDescriptor::new("note", ""),
        ];
        let sql = create_table_sql(&conn, &TableRef::new("pairs"), &columns).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE \"pairs\" (\"a\" INTEGER NOT NULL, \"b\" VARCHAR(10) NOT NULL, \"note\" TEXT, PRIMARY KEY (\"a\", \"b\"))"
        );
    }

    #[test]
    fn test_create_table_sql_requires_columns() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        let err = create_table_sql(&conn, &TableRef::new("empty"), &[]).unwrap_err();
        assert!(matches!(err, CoreError::Schema(_)));
    }

    #[tokio::test]
    async fn test_describe_columns_reports_keys_and_nullability() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE person (id INTEGER PRIMARY KEY, first_name VARCHAR(20) NOT NULL, born DATE)",
            &[],
        )
        .await
        .unwrap();

        let columns = conn.describe_columns(&TableRef::new("person")).await.unwrap();
        assert_eq!(columns.len(), 3);
        assert!(columns[0].is_primary_key);
        assert!(!columns[1].nullable);
        assert_eq!(columns[1].sql_type, SqlType::Varchar);
        assert_eq!(columns[2].sql_type, SqlType::Date);
        assert_eq!(columns[2].ordinal, 2);
    }

    #[tokio::test]
    async fn test_describe_missing_table_is_not_found() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        let err = conn
            .describe_columns(&TableRef::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
