use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};

use super::{Storable, with_suffix};

/// Rows of string cells under named columns. Row order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Storable for Table {
    const TYPE_NAME: &'static str = "table";
}

impl Table {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row. Fails if the row width does not match the column count,
    /// or if the table has no columns to hold it.
    pub fn push_row<I, S>(&mut self, row: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        if self.columns.is_empty() {
            bail!("Cannot add rows to a table without columns");
        }
        let row: Vec<String> = row.into_iter().map(|c| c.to_string()).collect();
        if row.len() != self.columns.len() {
            bail!(
                "Row has {} cells but table has {} columns",
                row.len(),
                self.columns.len()
            );
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All cells of the named column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }
}

/// Write `table` as CSV with a header row. Appends `.csv` to the path.
/// A table without columns is stored as an empty file.
pub fn write_csv(table: &Table, path: &Path) -> Result<PathBuf> {
    let path = with_suffix(path, "csv");
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    if !table.columns.is_empty() {
        writer.write_record(&table.columns)?;
    }
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(path)
}

/// Read a CSV file with a header row back into a `Table`.
pub fn read_csv(path: &Path) -> Result<Table> {
    let path = with_suffix(path, "csv");
    let size = std::fs::metadata(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .len();
    if size == 0 {
        return Ok(Table::default());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Malformed row in {}", path.display()))?;
        rows.push(record.iter().map(String::from).collect());
    }

    Ok(Table { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_row_checks_width() {
        let mut table = Table::new(["a", "b"]);
        assert!(table.push_row([1, 2]).is_ok());
        assert!(table.push_row([1]).is_err());
        assert_eq!(table.len(), 1);
        assert_eq!(table.column("b"), Some(vec!["2"]));
        assert_eq!(table.column("c"), None);
    }

    #[test]
    fn csv_round_trip_keeps_order_and_quoting() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = Table::new(["name", "note", "score"]);
        table.push_row(["zoe", "likes, commas", "3.5"]).unwrap();
        table.push_row(["adam", "said \"hi\"", "-1"]).unwrap();
        table.push_row(["mia", "", "0"]).unwrap();

        let stored = write_csv(&table, &dir.path().join("t")).unwrap();
        assert_eq!(stored.extension().unwrap(), "csv");

        let back = read_csv(&stored).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.column("name"), Some(vec!["zoe", "adam", "mia"]));
    }

    #[test]
    fn tables_without_columns_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut empty = Table::new(Vec::<String>::new());
        assert!(empty.push_row(Vec::<String>::new()).is_err());

        let stored = write_csv(&empty, &dir.path().join("e")).unwrap();
        assert_eq!(std::fs::read(&stored).unwrap(), b"");
        assert_eq!(read_csv(&stored).unwrap(), empty);

        let header_only = Table::new(["a", "b"]);
        let stored = write_csv(&header_only, &dir.path().join("h")).unwrap();
        assert_eq!(read_csv(&stored).unwrap(), header_only);
    }
}
