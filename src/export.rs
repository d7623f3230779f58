use std::fs;
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::info;

use crate::error::ExportError;
use crate::table::Table;

/// Rows included in a [`TableSummary`].
pub const SAMPLE_ROWS: usize = 3;

fn write_table<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    table: &Table,
) -> Result<(), ExportError> {
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(ToString::to_string))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes one table with a header row. `Null` cells are written empty.
///
/// # Errors
/// File creation or CSV encoding failures.
pub fn write_csv(path: &Path, table: &Table, delimiter: u8) -> Result<(), ExportError> {
    let mut writer = WriterBuilder::new().delimiter(delimiter).from_path(path)?;
    write_table(&mut writer, table)
}

/// # Errors
/// CSV encoding failures.
pub fn table_to_csv_string(table: &Table, delimiter: u8) -> Result<String, ExportError> {
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::<u8>::new());
    write_table(&mut writer, table)?;

    let bytes = writer
        .into_inner()
        .map_err(|error| ExportError::Io(error.into_error()))?;
    Ok(String::from_utf8(bytes)?)
}

/// Writes `table_1.csv`, `table_2.csv`, ... into `dir`, creating it if
/// needed, and returns the written paths in table order.
///
/// # Errors
/// Directory creation or any single write failing.
pub fn write_tables_csv(
    dir: &Path,
    tables: &[Table],
    delimiter: u8,
) -> Result<Vec<PathBuf>, ExportError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(tables.len());
    for (index, table) in tables.iter().enumerate() {
        let path = dir.join(format!("table_{}.csv", index + 1));
        write_csv(&path, table, delimiter)?;
        written.push(path);
    }
    info!(count = written.len(), dir = %dir.display(), "saved tables as CSV");
    Ok(written)
}

/// One JSON object per row, keyed by column name.
///
/// # Errors
/// Cell serialization failures.
pub fn table_to_records(table: &Table) -> Result<Vec<Map<String, JsonValue>>, ExportError> {
    table
        .rows()
        .iter()
        .map(|row| {
            table
                .columns()
                .iter()
                .zip(row)
                .map(|(column, value)| {
                    Ok::<_, ExportError>((column.clone(), serde_json::to_value(value)?))
                })
                .collect::<Result<Map<_, _>, _>>()
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub table_number: usize,
    pub shape: (usize, usize),
    pub columns: Vec<String>,
    pub sample_data: Vec<Map<String, JsonValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_tables: usize,
    pub tables_info: Vec<TableSummary>,
}

/// Shape, columns and the first few rows of every table.
///
/// # Errors
/// Cell serialization failures.
pub fn summarize(tables: &[Table]) -> Result<Summary, ExportError> {
    let tables_info = tables
        .iter()
        .enumerate()
        .map(|(index, table)| {
            let head = Table::new(
                table.columns().to_vec(),
                table.rows().iter().take(SAMPLE_ROWS).cloned().collect(),
            );
            Ok::<_, ExportError>(TableSummary {
                table_number: index + 1,
                shape: table.shape(),
                columns: table.columns().to_vec(),
                sample_data: table_to_records(&head)?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Summary {
        total_tables: tables.len(),
        tables_info,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{summarize, table_to_csv_string, table_to_records, write_tables_csv};
    use crate::table::{Table, Value};

    fn table() -> Table {
        Table::new(
            vec!["Name".to_string(), "Qty".to_string(), "Note".to_string()],
            vec![
                vec![Value::from("Pen, blue"), Value::Int(3), Value::Null],
                vec![Value::from("Ink"), Value::Float(1.5), Value::from("x")],
                vec![Value::from("Pad"), Value::Int(1), Value::Null],
                vec![Value::from("Cap"), Value::Int(9), Value::Null],
            ],
        )
    }

    #[test]
    fn csv_quotes_and_blanks_nulls() {
        let csv = table_to_csv_string(&table(), b',').expect("csv");
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Name,Qty,Note"));
        assert_eq!(lines.next(), Some("\"Pen, blue\",3,"));
        assert_eq!(lines.next(), Some("Ink,1.5,x"));

        let tsv = table_to_csv_string(&table(), b'\t').expect("tsv");
        assert!(tsv.starts_with("Name\tQty\tNote\n"));
    }

    #[test]
    fn writes_numbered_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let out = dir.path().join("nested").join("tables");
        let written = write_tables_csv(&out, &[table(), table()], b',').expect("write");

        assert_eq!(written.len(), 2);
        assert!(written[1].ends_with("table_2.csv"));
        let content = std::fs::read_to_string(&written[0]).expect("read back");
        assert!(content.contains("Cap,9,"));
    }

    #[test]
    fn records_keep_typed_values() {
        let records = table_to_records(&table()).expect("records");
        assert_eq!(records.len(), 4);
        assert_eq!(
            serde_json::Value::Object(records[0].clone()),
            json!({"Name": "Pen, blue", "Qty": 3, "Note": null})
        );
    }

    #[test]
    fn summary_samples_first_rows() {
        let summary = summarize(&[table()]).expect("summary");
        assert_eq!(summary.total_tables, 1);
        assert_eq!(summary.tables_info[0].shape, (4, 3));
        assert_eq!(summary.tables_info[0].sample_data.len(), 3);
    }
}
