use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("rules for type '{name}' not found in {}", dir.display())]
    NotFound { name: String, dir: PathBuf },

    #[error("rules directory not configured")]
    RulesDirNotConfigured,

    #[error("failed to read rules from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse rules from {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("syntax error in '{expr}' at offset {position}: {message}")]
    Syntax {
        expr: String,
        position: usize,
        message: String,
    },

    #[error("expression references unknown column '{0}'")]
    UnknownColumn(String),

    #[error("expression calls unknown function '{0}'")]
    UnknownFunction(String),

    #[error("type error: {0}")]
    Type(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("missing columns: {}", columns.join(", "))]
    MissingColumn { columns: Vec<String> },

    #[error("column '{0}' already exists")]
    DuplicateColumn(String),

    #[error("cannot cast '{value}' in column '{column}' to {target}")]
    Cast {
        column: String,
        value: String,
        target: String,
    },

    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF file not found: {}", .0.display())]
    DocumentNotFound(PathBuf),

    #[error("failed to load PDF: {0}")]
    PdfLoad(#[from] lopdf::Error),

    #[error("failed to extract PDF text: {0}")]
    PdfText(String),

    #[error("extraction method '{0}' is not available")]
    UnsupportedMethod(String),

    #[error("no pages available after applying selection")]
    NoPagesSelected,

    #[error("{backend} extraction failed: {message}")]
    Backend { backend: String, message: String },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON write error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid utf-8 csv output: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("transform failed for selected table {table}: {source}")]
    Transform {
        table: usize,
        #[source]
        source: TransformError,
    },
}
