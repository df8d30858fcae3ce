//! Delimited flat-file source

use std::fs::File;
use std::path::PathBuf;

use async_trait::async_trait;
use csv::{Reader, ReaderBuilder, StringRecord};
use tablecopy_core::{ColumnDescriptor, Value};

use crate::error::CopyError;
use crate::source::{RowSource, SizeEstimate};

/// A declared file column. `type_name` defaults to TEXT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileColumn {
    pub name: String,
    pub type_name: Option<String>,
}

impl FileColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: None,
        }
    }

    pub fn typed(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: Some(type_name.into()),
        }
    }
}

/// How to read a delimited file.
#[derive(Debug, Clone)]
pub struct FileSourceOptions {
    pub path: PathBuf,
    pub delimiter: u8,
    pub quote: u8,
    /// First record holds column names
    pub has_header: bool,
    /// Explicit shape; replaces the header names when non-empty
    pub columns: Vec<FileColumn>,
    /// Treat empty fields as NULL
    pub empty_as_null: bool,
    /// Strip leading and trailing whitespace from fields
    pub trim: bool,
}

impl FileSourceOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
            quote: b'"',
            has_header: true,
            columns: Vec::new(),
            empty_as_null: false,
            trim: false,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_columns(mut self, columns: Vec<FileColumn>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_empty_as_null(mut self, empty_as_null: bool) -> Self {
        self.empty_as_null = empty_as_null;
        self
    }

    pub fn with_trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    fn reader(&self) -> Result<Reader<File>, CopyError> {
        ReaderBuilder::new()
            .delimiter(self.delimiter)
            .quote(self.quote)
            .has_headers(self.has_header)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| {
                CopyError::Configuration(format!(
                    "Cannot open source file {}: {}",
                    self.path.display(),
                    e
                ))
            })
    }
}

/// Rows of a delimited text file. Every field is produced as text.
pub struct FileSource {
    options: FileSourceOptions,
    columns: Option<Vec<ColumnDescriptor>>,
    reader: Option<Reader<File>>,
    record: StringRecord,
    rows_read: u64,
}

impl FileSource {
    pub fn new(options: FileSourceOptions) -> Self {
        Self {
            options,
            columns: None,
            reader: None,
            record: StringRecord::new(),
            rows_read: 0,
        }
    }

    fn read_shape(&self) -> Result<Vec<ColumnDescriptor>, CopyError> {
        if !self.options.columns.is_empty() {
            return Ok(self
                .options
                .columns
                .iter()
                .enumerate()
                .map(|(i, col)| {
                    ColumnDescriptor::new(col.name.clone(), col.type_name.as_deref().unwrap_or("TEXT"))
                        .with_ordinal(i)
                })
                .collect());
        }

        let mut reader = self.options.reader()?;
        let names: Vec<String> = if self.options.has_header {
            reader
                .headers()
                .map_err(|e| CopyError::SourceRead {
                    row: 0,
                    message: format!("unreadable header: {}", e),
                })?
                .iter()
                .map(|h| h.trim().to_string())
                .collect()
        } else {
            let mut first = StringRecord::new();
            let found = reader.read_record(&mut first).map_err(|e| CopyError::SourceRead {
                row: 1,
                message: e.to_string(),
            })?;
            if !found {
                return Err(CopyError::Configuration(format!(
                    "Source file {} is empty and declares no columns",
                    self.options.path.display()
                )));
            }
            (1..=first.len()).map(|i| format!("column{}", i)).collect()
        };

        if names.is_empty() {
            return Err(CopyError::Configuration(format!(
                "Source file {} has no columns",
                self.options.path.display()
            )));
        }
        Ok(names
            .into_iter()
            .enumerate()
            .map(|(i, name)| ColumnDescriptor::new(name, "TEXT").with_ordinal(i))
            .collect())
    }

    fn field_value(&self, field: &str) -> Value {
        let field = if self.options.trim { field.trim() } else { field };
        if field.is_empty() && self.options.empty_as_null {
            Value::Null
        } else {
            Value::String(field.to_string())
        }
    }
}

#[async_trait]
impl RowSource for FileSource {
    fn label(&self) -> String {
        format!("file {}", self.options.path.display())
    }

    async fn columns(&mut self) -> Result<Vec<ColumnDescriptor>, CopyError> {
        if let Some(columns) = &self.columns {
            return Ok(columns.clone());
        }
        let columns = self.read_shape()?;
        self.columns = Some(columns.clone());
        Ok(columns)
    }

    #[tracing::instrument(skip(self), fields(path = %self.options.path.display()))]
    async fn open(&mut self) -> Result<(), CopyError> {
        self.columns().await?;
        self.reader = Some(self.options.reader()?);
        self.rows_read = 0;
        Ok(())
    }

    /// Short records are padded with NULL; long records are unreadable.
    async fn next_row(&mut self) -> Option<Result<Vec<Value>, CopyError>> {
        let width = self.columns.as_ref().map(Vec::len).unwrap_or(0);
        let reader = self.reader.as_mut()?;
        let mut record = std::mem::take(&mut self.record);
        let read = reader.read_record(&mut record);
        self.rows_read += 1;
        let row = self.rows_read;

        let outcome = match read {
            Ok(false) => None,
            Err(e) => Some(Err(CopyError::SourceRead {
                row,
                message: e.to_string(),
            })),
            Ok(true) if record.len() > width => Some(Err(CopyError::SourceRead {
                row,
                message: format!("record has {} fields, expected {}", record.len(), width),
            })),
            Ok(true) => {
                let mut values: Vec<Value> = record.iter().map(|f| self.field_value(f)).collect();
                values.resize(width, Value::Null);
                Some(Ok(values))
            }
        };
        self.record = record;
        outcome
    }

    async fn estimated_size(&mut self) -> SizeEstimate {
        match std::fs::metadata(&self.options.path) {
            Ok(meta) => SizeEstimate::Bytes(meta.len()),
            Err(_) => SizeEstimate::Unknown,
        }
    }

    async fn close(&mut self) -> Result<(), CopyError> {
        if self.reader.take().is_some() {
            tracing::debug!(path = %self.options.path.display(), rows = self.rows_read, "closed source file");
        }
        Ok(())
    }

    fn yields_text(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tablecopy_core::SqlType;

    fn write_file(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("people.csv");
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    async fn read_all(source: &mut FileSource) -> Vec<Result<Vec<Value>, CopyError>> {
        let mut rows = Vec::new();
        while let Some(row) = source.next_row().await {
            rows.push(row);
        }
        rows
    }

    #[tokio::test]
    async fn test_header_names_and_text_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "id,first_name, last_name\n1,Ada,Lovelace\n2,\"Alan, M.\",Turing\n");
        let mut source = FileSource::new(FileSourceOptions::new(&path));

        let columns = source.columns().await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "first_name", "last_name"]);
        assert!(columns.iter().all(|c| c.sql_type == SqlType::Text));

        source.open().await.unwrap();
        let rows = read_all(&mut source).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[1].as_ref().unwrap(),
            &vec![
                Value::String("2".into()),
                Value::String("Alan, M.".into()),
                Value::String("Turing".into())
            ]
        );
        assert!(matches!(source.estimated_size().await, SizeEstimate::Bytes(n) if n > 0));
    }

    #[tokio::test]
    async fn test_declared_columns_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "1; x \n2;\n");
        let options = FileSourceOptions::new(&path)
            .with_delimiter(b';')
            .with_header(false)
            .with_columns(vec![FileColumn::typed("id", "INTEGER"), FileColumn::new("name")])
            .with_trim(true)
            .with_empty_as_null(true);
        let mut source = FileSource::new(options);

        let columns = source.columns().await.unwrap();
        assert_eq!(columns[0].sql_type, SqlType::Integer);

        source.open().await.unwrap();
        let rows: Vec<Vec<Value>> = read_all(&mut source).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(rows[0], vec![Value::String("1".into()), Value::String("x".into())]);
        assert_eq!(rows[1], vec![Value::String("2".into()), Value::Null]);
    }

    #[tokio::test]
    async fn test_ragged_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a,b\n1\n1,2,3\n4,5\n");
        let mut source = FileSource::new(FileSourceOptions::new(&path));
        source.open().await.unwrap();

        let rows = read_all(&mut source).await;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].as_ref().unwrap(), &vec![Value::String("1".into()), Value::Null]);
        assert!(matches!(rows[1], Err(CopyError::SourceRead { row: 2, .. })));
        assert!(rows[2].is_ok());
    }

    #[tokio::test]
    async fn test_headerless_file_gets_positional_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "x,y,z\n");
        let mut source = FileSource::new(FileSourceOptions::new(&path).with_header(false));
        let names: Vec<String> = source.columns().await.unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["column1", "column2", "column3"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_a_configuration_error() {
        let mut source = FileSource::new(FileSourceOptions::new("/nonexistent/tablecopy.csv"));
        assert!(matches!(source.columns().await, Err(CopyError::Configuration(_))));
    }
}
