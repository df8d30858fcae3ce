//! Parameterized DML templates built once per run

use tablecopy_core::{ColumnDescriptor, Connection, TableRef, Value};

use crate::mapping::MappingDefinition;
use crate::mode::CopyMode;

/// One statement plus the mapped-row positions feeding its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmlTemplate {
    pub sql: String,
    param_order: Vec<usize>,
}

impl DmlTemplate {
    /// Parameters for `row`, a row in mapped target-column order.
    pub fn bind(&self, row: &[Value]) -> Vec<Value> {
        self.param_order
            .iter()
            .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub fn param_count(&self) -> usize {
        self.param_order.len()
    }
}

/// The statements a mode needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmlStatements {
    pub insert: Option<DmlTemplate>,
    pub update: Option<DmlTemplate>,
}

impl DmlStatements {
    pub fn build(
        connection: &dyn Connection,
        table: &TableRef,
        mapping: &MappingDefinition,
        keys: &[ColumnDescriptor],
        mode: CopyMode,
    ) -> Self {
        Self {
            insert: mode
                .involves_insert()
                .then(|| insert_template(connection, table, mapping)),
            update: mode
                .involves_update()
                .then(|| update_template(connection, table, mapping, keys)),
        }
    }

    /// The statement tried first for each row
    pub fn primary(&self, mode: CopyMode) -> Option<&DmlTemplate> {
        match mode {
            CopyMode::InsertOnly | CopyMode::InsertThenUpdate => self.insert.as_ref(),
            CopyMode::UpdateOnly | CopyMode::UpdateThenInsert => self.update.as_ref(),
        }
    }
}

pub fn insert_template(
    connection: &dyn Connection,
    table: &TableRef,
    mapping: &MappingDefinition,
) -> DmlTemplate {
    let columns: Vec<String> = mapping
        .target_columns
        .iter()
        .map(|c| connection.quote_identifier(&c.name))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len())
        .map(|i| connection.placeholder(i))
        .collect();

    DmlTemplate {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.qualified(|s| connection.quote_identifier(s)),
            columns.join(", "),
            placeholders.join(", ")
        ),
        param_order: (0..columns.len()).collect(),
    }
}

/// `UPDATE .. SET <non-key columns> WHERE <key columns>`; the key set must
/// leave at least one column to assign.
pub fn update_template(
    connection: &dyn Connection,
    table: &TableRef,
    mapping: &MappingDefinition,
    keys: &[ColumnDescriptor],
) -> DmlTemplate {
    let (key_positions, set_positions): (Vec<usize>, Vec<usize>) = (0..mapping.len())
        .partition(|&i| keys.iter().any(|k| k.same_name(&mapping.target_columns[i])));

    let mut index = 0;
    let mut next_placeholder = || {
        index += 1;
        connection.placeholder(index)
    };
    let assignments: Vec<String> = set_positions
        .iter()
        .map(|&i| {
            format!(
                "{} = {}",
                connection.quote_identifier(&mapping.target_columns[i].name),
                next_placeholder()
            )
        })
        .collect();
    let predicates: Vec<String> = key_positions
        .iter()
        .map(|&i| {
            format!(
                "{} = {}",
                connection.quote_identifier(&mapping.target_columns[i].name),
                next_placeholder()
            )
        })
        .collect();

    DmlTemplate {
        sql: format!(
            "UPDATE {} SET {} WHERE {}",
            table.qualified(|s| connection.quote_identifier(s)),
            assignments.join(", "),
            predicates.join(" AND ")
        ),
        param_order: set_positions.into_iter().chain(key_positions).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tablecopy_core::{CoreError, QueryResult, Result, StatementResult, Transaction};

    /// Numbered placeholders, like PostgreSQL
    struct DollarConnection;

    #[async_trait]
    impl Connection for DollarConnection {
        fn driver_name(&self) -> &str {
            "dollar"
        }

        async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
            Ok(StatementResult::default())
        }

        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
            Ok(QueryResult::empty())
        }

        fn placeholder(&self, index: usize) -> String {
            format!("${}", index)
        }

        async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
            Err(CoreError::NotSupported("dollar".into()))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    fn person_mapping() -> MappingDefinition {
        let cols = vec![
            ColumnDescriptor::new("id", "INTEGER").with_primary_key(true),
            ColumnDescriptor::new("first_name", "TEXT"),
            ColumnDescriptor::new("last_name", "TEXT"),
        ];
        MappingDefinition {
            source_columns: cols.clone(),
            target_columns: cols,
            has_skipped_columns: false,
        }
    }

    #[test]
    fn test_insert_template() {
        let mapping = person_mapping();
        let template = insert_template(&DollarConnection, &TableRef::new("person"), &mapping);
        assert_eq!(
            template.sql,
            r#"INSERT INTO "person" ("id", "first_name", "last_name") VALUES ($1, $2, $3)"#
        );
        assert_eq!(template.param_count(), 3);
    }

    #[test]
    fn test_update_template_orders_keys_last() {
        let mapping = person_mapping();
        let keys = vec![mapping.target_columns[0].clone()];
        let template = update_template(
            &DollarConnection,
            &TableRef::new("person").with_schema("hr"),
            &mapping,
            &keys,
        );
        assert_eq!(
            template.sql,
            r#"UPDATE "hr"."person" SET "first_name" = $1, "last_name" = $2 WHERE "id" = $3"#
        );

        let row = vec![
            Value::Int64(7),
            Value::String("Ada".into()),
            Value::String("Byron".into()),
        ];
        assert_eq!(
            template.bind(&row),
            vec![
                Value::String("Ada".into()),
                Value::String("Byron".into()),
                Value::Int64(7)
            ]
        );
    }

    #[test]
    fn test_statements_per_mode() {
        let mapping = person_mapping();
        let keys = vec![mapping.target_columns[0].clone()];
        let table = TableRef::new("person");

        let insert_only = DmlStatements::build(&DollarConnection, &table, &mapping, &[], CopyMode::InsertOnly);
        assert!(insert_only.insert.is_some() && insert_only.update.is_none());

        let combined =
            DmlStatements::build(&DollarConnection, &table, &mapping, &keys, CopyMode::UpdateThenInsert);
        assert!(combined.insert.is_some() && combined.update.is_some());
        assert!(combined.primary(CopyMode::UpdateThenInsert).unwrap().sql.starts_with("UPDATE"));
    }
}
