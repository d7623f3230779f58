//! Table-to-table operations named by rule files.
//!
//! Every step takes a table and returns a new one; the input is never
//! modified. Steps run strictly in order, each on the previous step's
//! output.

pub mod cast;
pub mod expr;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, de};
use tracing::debug;

use crate::error::{ExpressionError, TransformError};
use crate::table::{Table, Value};

pub use cast::{CastErrors, CastType};
pub use expr::{BoundExpression, Expression};

/// Operation names understood by [`TransformStep::from_yaml`].
pub const OPS: [&str; 9] = [
    "rename_columns",
    "select_columns",
    "cast_columns",
    "filter_rows",
    "derive_column",
    "normalize_values",
    "select_fields",
    "filter_by_field_values",
    "extract_field_subset",
];

/// One `{op, ...params}` entry of a rule file's `transforms` list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformStep {
    RenameColumns {
        #[serde(default)]
        mapping: BTreeMap<String, String>,
        #[serde(default)]
        strict: bool,
    },
    SelectColumns {
        #[serde(default)]
        columns: Vec<String>,
        #[serde(default)]
        allow_missing: bool,
    },
    CastColumns {
        #[serde(default)]
        types: BTreeMap<String, CastType>,
        #[serde(default)]
        errors: CastErrors,
    },
    FilterRows {
        #[serde(default = "default_filter_expr")]
        expr: String,
    },
    DeriveColumn {
        #[serde(default = "default_derived_name")]
        name: String,
        #[serde(default = "default_derive_expr")]
        expr: String,
    },
    NormalizeValues {
        #[serde(default = "default_true")]
        strip: bool,
    },
    SelectFields {
        #[serde(default)]
        fields: Vec<String>,
        #[serde(default)]
        allow_missing: bool,
    },
    FilterByFieldValues {
        #[serde(default)]
        field: Option<String>,
        #[serde(default, deserialize_with = "scalar_strings")]
        values: Vec<String>,
        #[serde(default = "default_true")]
        keep: bool,
    },
    ExtractFieldSubset {
        #[serde(default)]
        config: FieldSubsetConfig,
    },
    /// An op this version does not know. Kept so rule files written for
    /// newer versions still load; applying it is a no-op.
    #[serde(skip_deserializing)]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FieldSubsetConfig {
    pub filter_field: Option<String>,
    #[serde(deserialize_with = "optional_scalar_strings")]
    pub filter_values: Option<Vec<String>>,
    pub filter_keep: bool,
    pub fields: Option<Vec<String>>,
    pub allow_missing_fields: bool,
}

impl Default for FieldSubsetConfig {
    fn default() -> Self {
        Self {
            filter_field: None,
            filter_values: None,
            filter_keep: true,
            fields: None,
            allow_missing_fields: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_filter_expr() -> String {
    "True".to_string()
}

fn default_derived_name() -> String {
    "derived".to_string()
}

fn default_derive_expr() -> String {
    "None".to_string()
}

fn scalar_to_string(value: serde_yaml::Value) -> Result<String, String> {
    match value {
        serde_yaml::Value::String(text) => Ok(text),
        serde_yaml::Value::Number(number) => Ok(number.to_string()),
        serde_yaml::Value::Bool(flag) => Ok(flag.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        other => Err(format!("expected a scalar value, found {other:?}")),
    }
}

/// Accepts a scalar or a list of scalars; numbers and booleans are compared
/// by their display form.
fn scalar_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_yaml::Value::deserialize(deserializer)?;
    let items = match raw {
        serde_yaml::Value::Sequence(items) => items,
        serde_yaml::Value::Null => Vec::new(),
        scalar => vec![scalar],
    };
    items
        .into_iter()
        .map(scalar_to_string)
        .collect::<Result<_, _>>()
        .map_err(de::Error::custom)
}

fn optional_scalar_strings<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    scalar_strings(deserializer).map(Some)
}

impl TransformStep {
    /// Parses one rule-file entry. The `op` name is matched
    /// case-insensitively; unrecognised names become [`TransformStep::Unknown`].
    ///
    /// # Errors
    /// A message describing a missing `op` or malformed parameters.
    pub fn from_yaml(value: serde_yaml::Value) -> Result<Self, String> {
        let serde_yaml::Value::Mapping(mut mapping) = value else {
            return Err("transform step must be a mapping".to_string());
        };
        let op = mapping
            .get("op")
            .and_then(serde_yaml::Value::as_str)
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if !OPS.contains(&op.as_str()) {
            debug!(op = %op, "unknown transform op; it will be skipped");
            return Ok(Self::Unknown(op));
        }

        mapping.insert("op".into(), op.clone().into());
        serde_yaml::from_value(serde_yaml::Value::Mapping(mapping))
            .map_err(|error| format!("invalid '{op}' step: {error}"))
    }

    #[must_use]
    pub fn op(&self) -> &str {
        match self {
            Self::RenameColumns { .. } => "rename_columns",
            Self::SelectColumns { .. } => "select_columns",
            Self::CastColumns { .. } => "cast_columns",
            Self::FilterRows { .. } => "filter_rows",
            Self::DeriveColumn { .. } => "derive_column",
            Self::NormalizeValues { .. } => "normalize_values",
            Self::SelectFields { .. } => "select_fields",
            Self::FilterByFieldValues { .. } => "filter_by_field_values",
            Self::ExtractFieldSubset { .. } => "extract_field_subset",
            Self::Unknown(op) => op,
        }
    }

    /// Checks expression syntax without a table, so bad rule files fail at
    /// load time.
    ///
    /// # Errors
    /// The first expression that does not parse.
    pub fn validate(&self) -> Result<(), ExpressionError> {
        match self {
            Self::FilterRows { expr } | Self::DeriveColumn { expr, .. } => {
                Expression::parse(expr).map(|_| ())
            }
            _ => Ok(()),
        }
    }
}

/// Side information collected while applying steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformReport {
    /// Values that a tolerant `cast_columns` step turned into `Null`, per
    /// column.
    pub cast_failures: BTreeMap<String, usize>,
}

impl TransformReport {
    pub fn merge(&mut self, other: &Self) {
        for (column, count) in &other.cast_failures {
            *self.cast_failures.entry(column.clone()).or_default() += count;
        }
    }
}

/// Renames columns; names absent from `mapping` pass through.
///
/// # Errors
/// `MissingColumn` under `strict` when a mapped source column is absent,
/// `DuplicateColumn` when two columns would end up with the same name.
pub fn rename_columns(
    table: &Table,
    mapping: &BTreeMap<String, String>,
    strict: bool,
) -> Result<Table, TransformError> {
    if strict {
        let missing = mapping
            .keys()
            .filter(|source| !table.has_column(source))
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(TransformError::MissingColumn { columns: missing });
        }
    }

    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(table.column_count());
    for column in table.columns() {
        let renamed = mapping.get(column).unwrap_or(column).clone();
        if !seen.insert(renamed.clone()) {
            return Err(TransformError::DuplicateColumn(renamed));
        }
        columns.push(renamed);
    }

    Ok(Table::new(columns, table.rows().to_vec()))
}

/// Keeps the named columns in the given order. Repeated names are kept once.
///
/// # Errors
/// `MissingColumn` listing every absent column unless `allow_missing`.
pub fn select_columns(
    table: &Table,
    columns: &[String],
    allow_missing: bool,
) -> Result<Table, TransformError> {
    let mut indices = Vec::with_capacity(columns.len());
    let mut missing = Vec::new();
    for column in columns {
        match table.column_index(column) {
            Some(index) if !indices.contains(&index) => indices.push(index),
            Some(_) => {}
            None => missing.push(column.clone()),
        }
    }

    if !missing.is_empty() && !allow_missing {
        return Err(TransformError::MissingColumn { columns: missing });
    }
    Ok(table.project(&indices))
}

/// Coerces the named columns. Columns the table does not have are skipped.
///
/// # Errors
/// `Cast` for the first unconvertible value when `errors` is `raise`.
pub fn cast_columns(
    table: &Table,
    types: &BTreeMap<String, CastType>,
    errors: CastErrors,
    report: &mut TransformReport,
) -> Result<Table, TransformError> {
    let (columns, mut rows) = table.clone().into_parts();

    for (column, target) in types {
        let Some(index) = columns.iter().position(|name| name == column) else {
            debug!(column = %column, "cast skipped; column not present");
            continue;
        };

        let mut failures = 0;
        for row in &mut rows {
            match cast::cast_value(&row[index], *target) {
                Some(value) => row[index] = value,
                None if errors.tolerant() => {
                    row[index] = Value::Null;
                    failures += 1;
                }
                None => {
                    return Err(TransformError::Cast {
                        column: column.clone(),
                        value: row[index].to_string(),
                        target: target.to_string(),
                    });
                }
            }
        }

        if failures > 0 {
            debug!(column = %column, failures, target = %target, "values coerced to null");
            *report.cast_failures.entry(column.clone()).or_default() += failures;
        }
    }

    Ok(Table::new(columns, rows))
}

/// Keeps rows for which `expr` evaluates to `true`.
///
/// # Errors
/// `Expression` for malformed input, unknown columns, or a non-boolean
/// result.
pub fn filter_rows(table: &Table, expr: &str) -> Result<Table, TransformError> {
    let bound = Expression::parse(expr)?.bind(table.columns())?;
    let mut rows = Vec::new();
    for row in table.rows() {
        if bound.matches(row)? {
            rows.push(row.clone());
        }
    }
    Ok(Table::new(table.columns().to_vec(), rows))
}

/// Adds `name` (or overwrites it in place) with the value of `expr` per row.
///
/// # Errors
/// `Expression` for malformed input or unknown columns.
pub fn derive_column(table: &Table, name: &str, expr: &str) -> Result<Table, TransformError> {
    let bound = Expression::parse(expr)?.bind(table.columns())?;
    let (mut columns, mut rows) = table.clone().into_parts();

    let target = if let Some(index) = columns.iter().position(|column| column == name) {
        index
    } else {
        columns.push(name.to_string());
        for row in &mut rows {
            row.push(Value::Null);
        }
        columns.len() - 1
    };

    for row in &mut rows {
        row[target] = bound.evaluate(row)?;
    }
    Ok(Table::new(columns, rows))
}

/// Turns every cell into text, optionally trimmed.
#[must_use]
pub fn normalize_values(table: &Table, strip: bool) -> Table {
    let rows = table
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .map(|value| {
                    let text = value.to_string();
                    Value::Text(if strip { text.trim().to_string() } else { text })
                })
                .collect()
        })
        .collect();
    Table::new(table.columns().to_vec(), rows)
}

/// Keeps (or with `keep = false`, drops) rows whose `field` value is one of
/// `values`. A table without `field` is returned unchanged.
#[must_use]
pub fn filter_by_field_values(table: &Table, field: &str, values: &[String], keep: bool) -> Table {
    let Some(index) = table.column_index(field) else {
        debug!(field = %field, "field filter skipped; column not present");
        return table.clone();
    };

    table.retain_rows(|row| {
        let cell = row[index].to_string();
        values.iter().any(|value| *value == cell) == keep
    })
}

/// # Errors
/// `MissingColumn` when `fields` names an absent column and missing fields
/// are not allowed.
pub fn extract_field_subset(
    table: &Table,
    config: &FieldSubsetConfig,
) -> Result<Table, TransformError> {
    let filtered = match (&config.filter_field, &config.filter_values) {
        (Some(field), Some(values)) => {
            filter_by_field_values(table, field, values, config.filter_keep)
        }
        _ => table.clone(),
    };

    match &config.fields {
        Some(fields) => select_columns(&filtered, fields, config.allow_missing_fields),
        None => Ok(filtered),
    }
}

fn apply_step(
    table: &Table,
    step: &TransformStep,
    report: &mut TransformReport,
) -> Result<Table, TransformError> {
    match step {
        TransformStep::RenameColumns { mapping, strict } => rename_columns(table, mapping, *strict),
        TransformStep::SelectColumns {
            columns,
            allow_missing,
        } => select_columns(table, columns, *allow_missing),
        TransformStep::SelectFields {
            fields,
            allow_missing,
        } => select_columns(table, fields, *allow_missing),
        TransformStep::CastColumns { types, errors } => cast_columns(table, types, *errors, report),
        TransformStep::FilterRows { expr } => filter_rows(table, expr),
        TransformStep::DeriveColumn { name, expr } => derive_column(table, name, expr),
        TransformStep::NormalizeValues { strip } => Ok(normalize_values(table, *strip)),
        TransformStep::FilterByFieldValues {
            field,
            values,
            keep,
        } => Ok(match field {
            Some(field) => filter_by_field_values(table, field, values, *keep),
            None => table.clone(),
        }),
        TransformStep::ExtractFieldSubset { config } => extract_field_subset(table, config),
        TransformStep::Unknown(op) => {
            debug!(op = %op, "skipping unknown transform op");
            Ok(table.clone())
        }
    }
}

/// Runs `steps` in order and collects tolerant-cast failure counts.
///
/// # Errors
/// The first failing step's error; later steps do not run.
pub fn apply_transforms_with_report(
    table: &Table,
    steps: &[TransformStep],
) -> Result<(Table, TransformReport), TransformError> {
    let mut report = TransformReport::default();
    let mut current = table.clone();
    for step in steps {
        current = apply_step(&current, step, &mut report)?;
        debug!(
            op = step.op(),
            rows = current.row_count(),
            cols = current.column_count(),
            "applied transform"
        );
    }
    Ok((current, report))
}

/// # Errors
/// The first failing step's error.
pub fn apply_transforms(table: &Table, steps: &[TransformStep]) -> Result<Table, TransformError> {
    apply_transforms_with_report(table, steps).map(|(table, _)| table)
}
