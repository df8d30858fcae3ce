//! Column mapping resolution
//!
//! Pairs source columns with target columns before a copy starts. The
//! resolver auto-matches by quote-stripped, case-insensitive name; callers
//! may then bind or skip individual target columns. Compaction turns the
//! entry list into the immutable [`MappingDefinition`] that drives DML
//! generation for the whole run.

use serde::{Deserialize, Serialize};
use tablecopy_core::{ColumnDescriptor, normalize_identifier};

use crate::error::CopyError;

/// What feeds a target column.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceBinding {
    /// Values come from this source column
    Column(ColumnDescriptor),
    /// Explicitly excluded; never auto-matched again
    Skip,
    /// No source column matched the target
    Unmapped,
}

impl SourceBinding {
    pub fn column(&self) -> Option<&ColumnDescriptor> {
        match self {
            SourceBinding::Column(col) => Some(col),
            SourceBinding::Skip | SourceBinding::Unmapped => None,
        }
    }
}

/// One target column and what feeds it.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingEntry {
    pub source: SourceBinding,
    pub target: ColumnDescriptor,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingOptions {
    /// Give source descriptors the target's type, size and scale
    #[serde(default)]
    pub sync_data_types: bool,
    /// Order entries by source ordinal instead of target ordinal
    #[serde(default)]
    pub keep_source_order: bool,
}

/// A manual `(target, source)` pairing. `source: None` skips the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingOverride {
    pub target: String,
    #[serde(default)]
    pub source: Option<String>,
}

impl MappingOverride {
    pub fn bind(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: Some(source.into()),
        }
    }

    pub fn skip(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: None,
        }
    }
}

/// Editable mapping between one source shape and one target shape.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    entries: Vec<MappingEntry>,
    source_columns: Vec<ColumnDescriptor>,
    options: MappingOptions,
}

/// Resolve a mapping for copying into an existing table.
///
/// Produces exactly one entry per target column.
pub fn resolve_mapping(
    source: &[ColumnDescriptor],
    target: &[ColumnDescriptor],
    options: MappingOptions,
) -> ColumnMapping {
    let entries = target
        .iter()
        .map(|target_col| {
            let binding = find_column(source, &target_col.key())
                .map(|source_col| SourceBinding::Column(bound_source(source_col, target_col, options)))
                .unwrap_or(SourceBinding::Unmapped);
            MappingEntry {
                source: binding,
                target: target_col.clone(),
            }
        })
        .collect();

    let mut mapping = ColumnMapping {
        entries,
        source_columns: source.to_vec(),
        options,
    };
    if options.keep_source_order {
        mapping.order_by_source();
    }
    tracing::debug!(
        targets = target.len(),
        matched = mapping.matched_count(),
        "resolved column mapping"
    );
    mapping
}

/// Mapping for a target created from the source's own shape.
///
/// Produces exactly one entry per source column, each mapped to itself.
pub fn identity_mapping(source: &[ColumnDescriptor]) -> ColumnMapping {
    let entries = source
        .iter()
        .map(|col| MappingEntry {
            source: SourceBinding::Column(col.clone()),
            target: col.clone(),
        })
        .collect();
    ColumnMapping {
        entries,
        source_columns: source.to_vec(),
        options: MappingOptions::default(),
    }
}

fn find_column<'a>(columns: &'a [ColumnDescriptor], key: &str) -> Option<&'a ColumnDescriptor> {
    columns.iter().find(|c| c.key() == key)
}

fn bound_source(
    source: &ColumnDescriptor,
    target: &ColumnDescriptor,
    options: MappingOptions,
) -> ColumnDescriptor {
    let mut bound = source.clone();
    if options.sync_data_types {
        bound.adopt_type_of(target);
    }
    bound
}

impl ColumnMapping {
    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn source_columns(&self) -> &[ColumnDescriptor] {
        &self.source_columns
    }

    pub fn matched_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.source.column().is_some())
            .count()
    }

    /// Feed `target` from the source column named `source`.
    pub fn bind(&mut self, target: &str, source: &str) -> Result<(), CopyError> {
        let source_col = find_column(&self.source_columns, &normalize_identifier(source))
            .cloned()
            .ok_or_else(|| {
                CopyError::Configuration(format!("Unknown source column '{}' in mapping", source))
            })?;
        let options = self.options;
        let entry = self.entry_mut(target)?;
        entry.source = SourceBinding::Column(bound_source(&source_col, &entry.target, options));
        if options.keep_source_order {
            self.order_by_source();
        }
        Ok(())
    }

    /// Exclude `target` from the copy even if a same-named source column exists.
    pub fn skip(&mut self, target: &str) -> Result<(), CopyError> {
        self.entry_mut(target)?.source = SourceBinding::Skip;
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &[MappingOverride]) -> Result<(), CopyError> {
        for o in overrides {
            match &o.source {
                Some(source) => self.bind(&o.target, source)?,
                None => self.skip(&o.target)?,
            }
        }
        Ok(())
    }

    fn entry_mut(&mut self, target: &str) -> Result<&mut MappingEntry, CopyError> {
        let key = normalize_identifier(target);
        self.entries
            .iter_mut()
            .find(|e| e.target.key() == key)
            .ok_or_else(|| {
                CopyError::Configuration(format!("Unknown target column '{}' in mapping", target))
            })
    }

    /// Stable reorder by source ordinal; entries without a source keep
    /// their relative order after the bound ones.
    fn order_by_source(&mut self) {
        let position = |entry: &MappingEntry| -> usize {
            entry
                .source
                .column()
                .and_then(|col| self.source_columns.iter().position(|s| s.key() == col.key()))
                .unwrap_or(usize::MAX)
        };
        let mut keyed: Vec<(usize, MappingEntry)> = self
            .entries
            .iter()
            .map(|e| (position(e), e.clone()))
            .collect();
        keyed.sort_by_key(|(pos, _)| *pos);
        self.entries = keyed.into_iter().map(|(_, e)| e).collect();
    }

    /// Compact into the definition used for the run: entries without a
    /// source column (skipped, unmapped or blank-named) are dropped.
    pub fn effective_mapping(&self) -> MappingDefinition {
        let (source_columns, target_columns): (Vec<_>, Vec<_>) = self
            .entries
            .iter()
            .filter_map(|entry| match &entry.source {
                SourceBinding::Column(col) if !col.name.trim().is_empty() => {
                    Some((col.clone(), entry.target.clone()))
                }
                _ => None,
            })
            .unzip();

        let has_skipped_columns = target_columns.len() < self.entries.len();
        MappingDefinition {
            source_columns,
            target_columns,
            has_skipped_columns,
        }
    }
}

/// Resolved, compacted source-to-target pairing for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingDefinition {
    pub source_columns: Vec<ColumnDescriptor>,
    pub target_columns: Vec<ColumnDescriptor>,
    pub has_skipped_columns: bool,
}

impl MappingDefinition {
    pub fn len(&self) -> usize {
        self.target_columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target_columns.is_empty()
    }

    /// Position of each mapped source column within `source_shape`, the
    /// column order rows arrive in.
    pub fn source_positions(
        &self,
        source_shape: &[ColumnDescriptor],
    ) -> Result<Vec<usize>, CopyError> {
        self.source_columns
            .iter()
            .map(|col| {
                source_shape
                    .iter()
                    .position(|s| s.key() == col.key())
                    .ok_or_else(|| {
                        CopyError::Configuration(format!(
                            "Mapped source column '{}' is not produced by the source",
                            col.name
                        ))
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tablecopy_core::SqlType;

    fn cols(names: &[(&str, &str)]) -> Vec<ColumnDescriptor> {
        names
            .iter()
            .enumerate()
            .map(|(i, (n, t))| ColumnDescriptor::new(*n, *t).with_ordinal(i))
            .collect()
    }

    fn target_names(def: &MappingDefinition) -> Vec<&str> {
        def.target_columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_one_entry_per_target_column() {
        let source = cols(&[("ID", "INTEGER"), ("\"First_Name\"", "TEXT"), ("extra", "TEXT")]);
        let target = cols(&[("id", "INTEGER"), ("first_name", "TEXT"), ("age", "INTEGER")]);
        let mapping = resolve_mapping(&source, &target, MappingOptions::default());

        assert_eq!(mapping.entries().len(), 3);
        assert_eq!(mapping.entries()[0].source.column().map(|c| c.name.as_str()), Some("ID"));
        assert_eq!(
            mapping.entries()[1].source.column().map(|c| c.name.as_str()),
            Some("\"First_Name\"")
        );
        assert_eq!(mapping.entries()[2].source, SourceBinding::Unmapped);
    }

    #[test]
    fn test_effective_mapping_drops_unmapped() {
        let source = cols(&[("id", "INTEGER"), ("name", "TEXT")]);
        let target = cols(&[("id", "INTEGER"), ("name", "TEXT"), ("age", "INTEGER")]);
        let def = resolve_mapping(&source, &target, MappingOptions::default()).effective_mapping();

        assert_eq!(target_names(&def), vec!["id", "name"]);
        assert_eq!(def.source_columns.len(), def.target_columns.len());
        assert!(def.has_skipped_columns);
    }

    #[test]
    fn test_full_match_has_no_skipped_columns() {
        let source = cols(&[("name", "TEXT"), ("id", "INTEGER")]);
        let target = cols(&[("id", "INTEGER"), ("name", "TEXT")]);
        let def = resolve_mapping(&source, &target, MappingOptions::default()).effective_mapping();
        assert!(!def.has_skipped_columns);
        assert_eq!(target_names(&def), vec!["id", "name"]);
    }

    #[test]
    fn test_skip_wins_over_name_match() {
        let source = cols(&[("id", "INTEGER"), ("name", "TEXT")]);
        let target = cols(&[("id", "INTEGER"), ("name", "TEXT")]);
        let mut mapping = resolve_mapping(&source, &target, MappingOptions::default());
        mapping.skip("NAME").unwrap();

        let def = mapping.effective_mapping();
        assert_eq!(target_names(&def), vec!["id"]);
        assert!(def.has_skipped_columns);
    }

    #[test]
    fn test_manual_bind_and_unknown_names() {
        let source = cols(&[("person_id", "INTEGER"), ("surname", "TEXT")]);
        let target = cols(&[("id", "INTEGER"), ("last_name", "TEXT")]);
        let mut mapping = resolve_mapping(&source, &target, MappingOptions::default());
        mapping
            .apply_overrides(&[
                MappingOverride::bind("id", "person_id"),
                MappingOverride::bind("last_name", "surname"),
            ])
            .unwrap();
        assert_eq!(mapping.effective_mapping().len(), 2);

        assert!(matches!(mapping.bind("id", "nope"), Err(CopyError::Configuration(_))));
        assert!(matches!(mapping.skip("nope"), Err(CopyError::Configuration(_))));
    }

    #[test]
    fn test_sync_data_types_adopts_target_type() {
        let source = cols(&[("amount", "TEXT")]);
        let target = cols(&[("amount", "DECIMAL(10,2)")]);
        let options = MappingOptions {
            sync_data_types: true,
            ..Default::default()
        };
        let def = resolve_mapping(&source, &target, options).effective_mapping();
        assert_eq!(def.source_columns[0].sql_type, SqlType::Decimal);
        assert_eq!(def.source_columns[0].scale, Some(2));
        assert_eq!(def.source_columns[0].name, "amount");
    }

    #[test]
    fn test_keep_source_order() {
        let source = cols(&[("c", "TEXT"), ("a", "TEXT"), ("b", "TEXT")]);
        let target = cols(&[("a", "TEXT"), ("b", "TEXT"), ("x", "TEXT"), ("c", "TEXT")]);
        let options = MappingOptions {
            keep_source_order: true,
            ..Default::default()
        };
        let mapping = resolve_mapping(&source, &target, options);
        let order: Vec<&str> = mapping.entries().iter().map(|e| e.target.name.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b", "x"]);
        assert_eq!(target_names(&mapping.effective_mapping()), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_blank_source_names_are_dropped() {
        let source = cols(&[("  ", "TEXT"), ("id", "INTEGER")]);
        let mut mapping = identity_mapping(&source);
        assert_eq!(mapping.entries().len(), 2);
        let def = mapping.effective_mapping();
        assert_eq!(target_names(&def), vec!["id"]);
        assert!(def.has_skipped_columns);

        mapping.skip("id").unwrap();
        assert!(mapping.effective_mapping().is_empty());
    }

    #[test]
    fn test_source_positions() {
        let source = cols(&[("a", "TEXT"), ("b", "TEXT"), ("c", "TEXT")]);
        let target = cols(&[("c", "TEXT"), ("a", "TEXT")]);
        let def = resolve_mapping(&source, &target, MappingOptions::default()).effective_mapping();
        assert_eq!(def.source_positions(&source).unwrap(), vec![2, 0]);
        assert!(def.source_positions(&source[..1]).is_err());
    }
}
