//! extract → select → transform → dedupe, with counts for every stage.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clean::dedupe;
use crate::error::PipelineError;
use crate::extract::{Extractor, TableSource};
use crate::options::{ExtractionMethod, PageSelection};
use crate::rules::RuleSet;
use crate::selectors::filter_tables;
use crate::table::Table;
use crate::transforms::{TransformReport, apply_transforms_with_report};
use crate::warning::{RunWarning, WarningCode};

/// What happens to a selected table whose transform chain fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformFailurePolicy {
    /// Drop the table, count it in [`RunMetadata::failed`] and keep going.
    #[default]
    Skip,
    /// Stop the run at the first failure.
    Abort,
}

/// Stage counts for one run. Fields after `selected` are only present when a
/// rule set was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunMetadata {
    pub raw: usize,
    pub selected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduplicated: Option<usize>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub failed: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub cast_failures: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<RunWarning>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &usize) -> bool {
    *value == 0
}

pub struct Pipeline<'a> {
    source: &'a dyn TableSource,
    policy: TransformFailurePolicy,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(source: &'a dyn TableSource) -> Self {
        Self {
            source,
            policy: TransformFailurePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: TransformFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs one document through extraction and, when `rules` is given,
    /// selection and transforms.
    ///
    /// Without rules the raw tables are only deduplicated. A rule set whose
    /// `selection` names a different method or page set triggers one
    /// re-extraction with those values.
    ///
    /// # Errors
    /// Fatal extraction errors, and under [`TransformFailurePolicy::Abort`]
    /// the first transform failure.
    pub fn extract_and_process(
        &self,
        document: &Path,
        method: ExtractionMethod,
        pages: Option<&PageSelection>,
        rules: Option<&RuleSet>,
    ) -> Result<(Vec<Table>, RunMetadata), PipelineError> {
        let mut extraction = self.source.extract_tables(document, method, pages)?;
        debug!(
            document = %document.display(),
            method = %method,
            raw = extraction.tables.len(),
            "initial extraction"
        );

        let Some(rules) = rules else {
            let raw = extraction.tables.len();
            let tables = dedupe(extraction.tables);
            let meta = RunMetadata {
                raw,
                selected: tables.len(),
                warnings: extraction.warnings,
                ..RunMetadata::default()
            };
            return Ok((tables, meta));
        };

        let rule_method = rules.selection.method.unwrap_or(method);
        let rule_pages = rules.selection.pages.as_ref().or(pages);
        if rule_method != method || rule_pages != pages {
            info!(
                rule = %rules.name,
                method = %rule_method,
                pages = ?rule_pages.map(ToString::to_string),
                "re-extracting with rule selection"
            );
            extraction = self.source.extract_tables(document, rule_method, rule_pages)?;
        }

        let raw = extraction.tables.len();
        let mut warnings = extraction.warnings;
        let selected = filter_tables(&extraction.tables, &rules.extraction);
        info!(rule = %rules.name, raw, selected = selected.len(), "selected tables");

        let mut processed = Vec::with_capacity(selected.len());
        let mut report = TransformReport::default();
        let mut failed = 0;
        for (index, table) in selected.iter().enumerate() {
            let position = index + 1;
            match apply_transforms_with_report(table, &rules.transforms) {
                Ok((table, table_report)) => {
                    report.merge(&table_report);
                    processed.push(table);
                }
                Err(source) if self.policy == TransformFailurePolicy::Abort => {
                    return Err(PipelineError::Transform {
                        table: position,
                        source,
                    });
                }
                Err(error) => {
                    warn!(
                        rule = %rules.name,
                        table = position,
                        %error,
                        "transform failed; skipping table"
                    );
                    failed += 1;
                    warnings.push(
                        RunWarning::new(WarningCode::TransformFailed, error.to_string())
                            .with_table(position),
                    );
                }
            }
        }

        let processed_count = processed.len();
        let tables = dedupe(processed);
        info!(
            rule = %rules.name,
            processed = processed_count,
            deduplicated = tables.len(),
            failed,
            "processed tables"
        );

        let meta = RunMetadata {
            raw,
            selected: selected.len(),
            processed: Some(processed_count),
            deduplicated: Some(tables.len()),
            rule_set: Some(rules.name.clone()),
            failed,
            cast_failures: report.cast_failures,
            warnings,
        };
        Ok((tables, meta))
    }
}

/// [`Pipeline::extract_and_process`] with the built-in backends and the
/// default failure policy.
///
/// # Errors
/// See [`Pipeline::extract_and_process`].
pub fn extract_and_process(
    document: &Path,
    method: ExtractionMethod,
    pages: Option<&PageSelection>,
    rules: Option<&RuleSet>,
) -> Result<(Vec<Table>, RunMetadata), PipelineError> {
    let extractor = Extractor::default();
    Pipeline::new(&extractor).extract_and_process(document, method, pages, rules)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::Path;

    use pretty_assertions::assert_eq;

    use super::{Pipeline, TransformFailurePolicy};
    use crate::error::{ExtractError, PipelineError, TransformError};
    use crate::extract::{Extraction, TableSource};
    use crate::options::{ExtractionMethod, PageSelection};
    use crate::rules::RuleSet;
    use crate::table::{Table, Value};
    use crate::warning::WarningCode;

    /// Serves fixed tables and records every call.
    struct Recorded {
        tables: Vec<Table>,
        calls: RefCell<Vec<(ExtractionMethod, Option<String>)>>,
    }

    impl Recorded {
        fn new(tables: Vec<Table>) -> Self {
            Self {
                tables,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl TableSource for Recorded {
        fn extract_tables(
            &self,
            _: &Path,
            method: ExtractionMethod,
            pages: Option<&PageSelection>,
        ) -> Result<Extraction, ExtractError> {
            self.calls
                .borrow_mut()
                .push((method, pages.map(ToString::to_string)));
            Ok(self.tables.clone().into())
        }
    }

    fn sales_and_noise() -> Vec<Table> {
        vec![
            Table::from_strings(
                ["Product", "Q1 Sales", "Q2 Sales", "Q3 Sales", "Q4 Sales", "Total"],
                [
                    vec!["Pen", "1,200", "900", "700", "1,000", "3,800"],
                    vec!["Ink", "300", "250", "410", "90", "1,050"],
                ],
            ),
            Table::from_strings(["NoiseA", "NoiseB"], [vec!["a", "b"]]),
        ]
    }

    fn rules(yaml: &str) -> RuleSet {
        RuleSet::from_yaml_str(yaml, Path::new("sales.yml")).expect("valid rules")
    }

    #[test]
    fn selects_renames_and_casts_sales_table() {
        let source = Recorded::new(sales_and_noise());
        let rules = rules(
            r"
name: sales
extraction:
  header_contains: [Product, Q1, Q2, Q3, Q4, Total]
  min_match: 0.4
transforms:
  - op: rename_columns
    mapping: {Q1 Sales: Q1}
  - op: cast_columns
    types: {Q1: number}
",
        );

        let (tables, meta) = Pipeline::new(&source)
            .extract_and_process(Path::new("q.pdf"), ExtractionMethod::Auto, None, Some(&rules))
            .expect("pipeline");

        assert_eq!(meta.raw, 2);
        assert_eq!(meta.selected, 1);
        assert_eq!(meta.processed, Some(1));
        assert_eq!(meta.deduplicated, Some(1));
        assert_eq!(meta.rule_set.as_deref(), Some("sales"));
        assert_eq!(tables.len(), 1);
        let q1 = tables[0]
            .column_values("Q1")
            .expect("Q1 column")
            .cloned()
            .collect::<Vec<_>>();
        assert_eq!(q1, vec![Value::Int(1200), Value::Int(300)]);
        assert_eq!(source.calls.borrow().len(), 1);
    }

    #[test]
    fn empty_rule_set_returns_deduplicated_raw_tables() {
        let mut raw = sales_and_noise();
        raw.push(raw[0].clone());
        let source = Recorded::new(raw);

        let (tables, meta) = Pipeline::new(&source)
            .extract_and_process(
                Path::new("q.pdf"),
                ExtractionMethod::Auto,
                None,
                Some(&rules("transforms: []\nextraction: {}\n")),
            )
            .expect("pipeline");

        assert_eq!(tables, sales_and_noise());
        assert_eq!(meta.raw, 3);
        assert_eq!(meta.selected, 3);
        assert_eq!(meta.deduplicated, Some(2));
    }

    #[test]
    fn without_rules_only_deduplicates() {
        let mut raw = sales_and_noise();
        raw.insert(1, raw[0].clone());
        let source = Recorded::new(raw);

        let (tables, meta) = Pipeline::new(&source)
            .extract_and_process(Path::new("q.pdf"), ExtractionMethod::Layout, None, None)
            .expect("pipeline");

        assert_eq!(tables, sales_and_noise());
        assert_eq!(meta.raw, 3);
        assert_eq!(meta.selected, 2);
        assert_eq!(meta.processed, None);
        assert_eq!(meta.rule_set, None);
    }

    #[test]
    fn rule_selection_triggers_one_re_extraction() {
        let source = Recorded::new(sales_and_noise());
        let rules = rules("selection:\n  method: stream\n  pages: [2, 3]\n");

        Pipeline::new(&source)
            .extract_and_process(Path::new("q.pdf"), ExtractionMethod::Auto, None, Some(&rules))
            .expect("pipeline");

        assert_eq!(
            *source.calls.borrow(),
            vec![
                (ExtractionMethod::Auto, None),
                (ExtractionMethod::Stream, Some("2,3".to_string())),
            ]
        );
    }

    #[test]
    fn matching_rule_selection_does_not_re_extract() {
        let source = Recorded::new(sales_and_noise());
        let rules = rules("selection:\n  method: layout\n");

        Pipeline::new(&source)
            .extract_and_process(Path::new("q.pdf"), ExtractionMethod::Layout, None, Some(&rules))
            .expect("pipeline");

        assert_eq!(source.calls.borrow().len(), 1);
    }

    #[test]
    fn failing_table_is_skipped_or_aborts_by_policy() {
        let source = Recorded::new(sales_and_noise());
        let rules = rules("transforms:\n  - op: select_columns\n    columns: [Product]\n");

        let (tables, meta) = Pipeline::new(&source)
            .extract_and_process(Path::new("q.pdf"), ExtractionMethod::Auto, None, Some(&rules))
            .expect("skip policy keeps going");
        assert_eq!(tables.len(), 1);
        assert_eq!(meta.failed, 1);
        assert_eq!(meta.processed, Some(1));
        assert_eq!(meta.warnings[0].code, WarningCode::TransformFailed);
        assert_eq!(meta.warnings[0].table, Some(2));

        let err = Pipeline::new(&source)
            .with_policy(TransformFailurePolicy::Abort)
            .extract_and_process(Path::new("q.pdf"), ExtractionMethod::Auto, None, Some(&rules))
            .expect_err("abort policy stops");
        match err {
            PipelineError::Transform { table, source } => {
                assert_eq!(table, 2);
                assert!(matches!(source, TransformError::MissingColumn { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tolerant_cast_failures_reach_metadata() {
        let source = Recorded::new(sales_and_noise());
        let rules = rules(
            "extraction:\n  indices: [2]\n\
             transforms:\n  - op: cast_columns\n    types: {NoiseA: float}\n",
        );

        let (_, meta) = Pipeline::new(&source)
            .extract_and_process(Path::new("q.pdf"), ExtractionMethod::Auto, None, Some(&rules))
            .expect("pipeline");
        assert_eq!(meta.cast_failures.get("NoiseA"), Some(&1));

        let json = serde_json::to_value(&meta).expect("serialize");
        assert_eq!(json["type"], "sales");
        assert_eq!(json["cast_failures"]["NoiseA"], 1);
    }
}
