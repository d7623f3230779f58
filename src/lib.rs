//! Rules-driven table extraction from PDF documents.
//!
//! Tables are pulled out of a PDF by one or more text backends, cleaned and
//! deduplicated, then narrowed and reshaped by a per-document-type rule set
//! loaded from a directory of YAML files.

mod clean;
mod error;
mod export;
mod extract;
mod options;
mod pipeline;
mod rules;
mod selectors;
mod table;
pub mod transforms;
mod warning;

pub use clean::{clean_table, dedupe};
pub use error::{
    ConfigError, ExportError, ExpressionError, ExtractError, PipelineError, TransformError,
};
pub use export::{
    SAMPLE_ROWS, Summary, TableSummary, summarize, table_to_csv_string, table_to_records,
    write_csv, write_tables_csv,
};
pub use extract::{
    Extraction, ExtractionBackend, Extractor, LayoutBackend, StreamBackend, TableSource,
};
pub use options::{ExtractOptions, ExtractionMethod, HeaderMode, PageSelection};
pub use pipeline::{Pipeline, RunMetadata, TransformFailurePolicy, extract_and_process};
pub use rules::{RuleSet, RulesRegistry, SelectionSpec};
pub use selectors::{
    MinShape, SelectorSpec, by_header_contains, by_regex_in_row, by_shape, by_table_index,
    filter_tables,
};
pub use table::{Table, Value};
pub use transforms::{
    TransformReport, TransformStep, apply_transforms, apply_transforms_with_report,
};
pub use warning::{RunWarning, WarningCode};
