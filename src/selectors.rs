//! Picks the tables a rule set cares about.
//!
//! Every configured predicate narrows the candidate set (AND semantics);
//! survivors keep their original relative order. Positions are 1-based,
//! matching how rule files number tables.

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Deserializer, de};

use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MinShape {
    pub rows: usize,
    pub cols: usize,
}

impl Default for MinShape {
    fn default() -> Self {
        Self { rows: 1, cols: 1 }
    }
}

/// The `extraction` section of a rule file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SelectorSpec {
    pub indices: Option<Vec<usize>>,
    pub header_contains: Option<Vec<String>>,
    pub min_match: Option<f64>,
    pub min_shape: Option<MinShape>,
    #[serde(deserialize_with = "deserialize_regex")]
    pub regex: Option<Regex>,
}

fn deserialize_regex<'de, D>(deserializer: D) -> Result<Option<Regex>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(pattern) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    Regex::new(&pattern).map(Some).map_err(de::Error::custom)
}

impl SelectorSpec {
    /// No predicate configured; selection is the identity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_none()
            && self.header_contains.is_none()
            && self.min_shape.is_none()
            && self.regex.is_none()
    }
}

type Positions = BTreeSet<usize>;

fn all_positions(tables: &[Table]) -> Positions {
    (1..=tables.len()).collect()
}

#[must_use]
pub fn by_table_index(tables: &[Table], indices: &[usize]) -> Positions {
    indices
        .iter()
        .copied()
        .filter(|index| (1..=tables.len()).contains(index))
        .collect()
}

/// Tables where at least `min_match` of the required tokens occur as a
/// substring of some column name, compared trimmed and lower-cased. An
/// empty requirement list matches every table.
#[must_use]
pub fn by_header_contains(tables: &[Table], required: &[String], min_match: f64) -> Positions {
    let required = required
        .iter()
        .map(|token| token.trim().to_lowercase())
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>();
    if required.is_empty() {
        return all_positions(tables);
    }

    tables
        .iter()
        .enumerate()
        .filter(|(_, table)| {
            let headers = table
                .columns()
                .iter()
                .map(|column| column.trim().to_lowercase())
                .collect::<Vec<_>>();
            let hits = required
                .iter()
                .filter(|token| headers.iter().any(|header| header.contains(token.as_str())))
                .count();
            #[allow(clippy::cast_precision_loss)]
            let ratio = hits as f64 / required.len() as f64;
            ratio >= min_match
        })
        .map(|(index, _)| index + 1)
        .collect()
}

#[must_use]
pub fn by_shape(tables: &[Table], shape: MinShape) -> Positions {
    tables
        .iter()
        .enumerate()
        .filter(|(_, table)| table.row_count() >= shape.rows && table.column_count() >= shape.cols)
        .map(|(index, _)| index + 1)
        .collect()
}

/// Tables with at least one cell whose display text matches `pattern`.
#[must_use]
pub fn by_regex_in_row(tables: &[Table], pattern: &Regex) -> Positions {
    tables
        .iter()
        .enumerate()
        .filter(|(_, table)| {
            table
                .rows()
                .iter()
                .flatten()
                .any(|value| pattern.is_match(&value.to_string()))
        })
        .map(|(index, _)| index + 1)
        .collect()
}

/// Applies every configured predicate and returns the survivors in input
/// order.
#[must_use]
pub fn filter_tables(tables: &[Table], spec: &SelectorSpec) -> Vec<Table> {
    if spec.is_empty() {
        return tables.to_vec();
    }

    let mut candidates = all_positions(tables);
    let mut narrow = |matched: Positions| {
        candidates = candidates.intersection(&matched).copied().collect();
    };

    if let Some(indices) = &spec.indices {
        narrow(by_table_index(tables, indices));
    }
    if let Some(required) = &spec.header_contains {
        narrow(by_header_contains(
            tables,
            required,
            spec.min_match.unwrap_or(1.0),
        ));
    }
    if let Some(shape) = spec.min_shape {
        narrow(by_shape(tables, shape));
    }
    if let Some(pattern) = &spec.regex {
        narrow(by_regex_in_row(tables, pattern));
    }

    candidates
        .into_iter()
        .map(|position| tables[position - 1].clone())
        .collect()
}
