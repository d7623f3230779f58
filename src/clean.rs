use std::collections::HashSet;

use crate::table::{Table, Value};

const NULL_SENTINELS: [&str; 3] = ["nan", "None", "NaN"];

fn clean_cell(value: &Value) -> Value {
    match value {
        Value::Null => Value::Text(String::new()),
        Value::Text(text) => {
            let trimmed = text.trim();
            if NULL_SENTINELS.contains(&trimmed) {
                Value::Text(String::new())
            } else {
                Value::Text(trimmed.to_string())
            }
        }
        other => Value::Text(other.to_string().trim().to_string()),
    }
}

/// Blank names become `Column_N`; repeated names get `_2`, `_3`, ...
fn unique_column_names(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (index, name) in names.into_iter().enumerate() {
        let base = if name.trim().is_empty() {
            format!("Column_{}", index + 1)
        } else {
            name.trim().to_string()
        };

        let mut candidate = base.clone();
        let mut suffix = 2;
        while seen.contains(&candidate) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        seen.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

/// Normalizes a freshly extracted table: every cell becomes trimmed text,
/// null sentinels become empty strings, and fully empty rows and columns are
/// dropped. Applying it to its own output changes nothing.
#[must_use]
pub fn clean_table(table: &Table) -> Table {
    let rows = table
        .rows()
        .iter()
        .map(|row| row.iter().map(clean_cell).collect::<Vec<_>>())
        .filter(|row| !row.iter().all(Value::is_blank))
        .collect::<Vec<_>>();

    let keep = (0..table.column_count())
        .filter(|&index| rows.iter().any(|row| !row[index].is_blank()))
        .collect::<Vec<_>>();

    let columns = unique_column_names(keep.iter().map(|&index| table.columns()[index].clone()));
    let rows = rows
        .into_iter()
        .map(|row| keep.iter().map(|&index| row[index].clone()).collect())
        .collect();

    Table::new(columns, rows)
}

/// Keeps the first table of every group with equal shape and equal cells.
#[must_use]
pub fn dedupe(tables: Vec<Table>) -> Vec<Table> {
    let mut unique: Vec<Table> = Vec::with_capacity(tables.len());
    for table in tables {
        if !unique.iter().any(|kept| kept.same_content(&table)) {
            unique.push(table);
        }
    }
    unique
}
