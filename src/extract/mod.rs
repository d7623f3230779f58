//! Extraction backends and the adapter that fans out over them.
//!
//! Each backend turns a PDF path plus an optional page selection into raw
//! tables. The [`Extractor`] picks one backend by method, or runs all of them
//! in [`ExtractionMethod::Auto`] mode, cleans every table and drops the ones
//! left empty.

mod cells;
mod detect;
mod pdf_reader;

use std::path::Path;

use tracing::{debug, info, warn};

use crate::clean::{clean_table, dedupe};
use crate::error::ExtractError;
use crate::options::{ExtractOptions, ExtractionMethod, PageSelection};
use crate::table::Table;
use crate::warning::{RunWarning, WarningCode};

/// One table-extraction library behind a common call shape.
pub trait ExtractionBackend {
    fn method(&self) -> ExtractionMethod;

    /// Raw, uncleaned tables in document order.
    ///
    /// # Errors
    /// Any failure of the underlying library.
    fn extract(
        &self,
        document: &Path,
        pages: Option<&PageSelection>,
    ) -> Result<Vec<Table>, ExtractError>;
}

/// Cleaned tables plus the backend failures that were skipped over.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub tables: Vec<Table>,
    pub warnings: Vec<RunWarning>,
}

impl From<Vec<Table>> for Extraction {
    fn from(tables: Vec<Table>) -> Self {
        Self {
            tables,
            warnings: Vec::new(),
        }
    }
}

/// Anything that can produce tables for a document. The pipeline only talks
/// to this trait.
pub trait TableSource {
    /// # Errors
    /// Fatal extraction problems: a missing document, or the only requested
    /// backend failing.
    fn extract_tables(
        &self,
        document: &Path,
        method: ExtractionMethod,
        pages: Option<&PageSelection>,
    ) -> Result<Extraction, ExtractError>;
}

#[derive(Debug, Clone, Default)]
pub struct LayoutBackend {
    options: ExtractOptions,
}

impl LayoutBackend {
    #[must_use]
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }
}

impl ExtractionBackend for LayoutBackend {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Layout
    }

    fn extract(
        &self,
        document: &Path,
        pages: Option<&PageSelection>,
    ) -> Result<Vec<Table>, ExtractError> {
        let pages = pdf_reader::read_layout_pages(document, pages)?;
        Ok(detect::detect_tables(&pages, &self.options))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamBackend {
    options: ExtractOptions,
}

impl StreamBackend {
    #[must_use]
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }
}

impl ExtractionBackend for StreamBackend {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Stream
    }

    fn extract(
        &self,
        document: &Path,
        pages: Option<&PageSelection>,
    ) -> Result<Vec<Table>, ExtractError> {
        let pages = pdf_reader::read_stream_pages(document, pages)?;
        Ok(detect::detect_tables(&pages, &self.options))
    }
}

pub struct Extractor {
    backends: Vec<Box<dyn ExtractionBackend>>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(&ExtractOptions::default())
    }
}

impl Extractor {
    /// Both built-in backends sharing the same options.
    #[must_use]
    pub fn new(options: &ExtractOptions) -> Self {
        Self::with_backends(vec![
            Box::new(LayoutBackend::new(options.clone())),
            Box::new(StreamBackend::new(options.clone())),
        ])
    }

    #[must_use]
    pub fn with_backends(backends: Vec<Box<dyn ExtractionBackend>>) -> Self {
        Self { backends }
    }

    #[must_use]
    pub fn available_methods(&self) -> Vec<ExtractionMethod> {
        self.backends.iter().map(|backend| backend.method()).collect()
    }

    fn run_backend(
        backend: &dyn ExtractionBackend,
        document: &Path,
        pages: Option<&PageSelection>,
    ) -> Result<Vec<Table>, ExtractError> {
        debug!(method = %backend.method(), document = %document.display(), "running backend");
        let tables = backend
            .extract(document, pages)?
            .iter()
            .map(clean_table)
            .filter(|table| !table.is_empty())
            .collect::<Vec<_>>();
        Ok(tables)
    }

    fn extract_with_all(&self, document: &Path, pages: Option<&PageSelection>) -> Extraction {
        let mut all_tables = Vec::new();
        let mut warnings = Vec::new();

        for backend in &self.backends {
            match Self::run_backend(backend.as_ref(), document, pages) {
                Ok(tables) => {
                    info!(method = %backend.method(), count = tables.len(), "extracted tables");
                    all_tables.extend(tables);
                }
                Err(error) => {
                    warn!(method = %backend.method(), %error, "backend failed; skipping");
                    warnings.push(
                        RunWarning::new(WarningCode::BackendFailed, error.to_string())
                            .with_backend(backend.method().as_str()),
                    );
                }
            }
        }

        let total = all_tables.len();
        let tables = dedupe(all_tables);
        debug!(removed = total - tables.len(), "removed duplicate tables");

        if tables.is_empty() {
            warnings.push(RunWarning::new(
                WarningCode::NoTablesExtracted,
                "no backend produced any table",
            ));
        }

        Extraction { tables, warnings }
    }
}

impl TableSource for Extractor {
    fn extract_tables(
        &self,
        document: &Path,
        method: ExtractionMethod,
        pages: Option<&PageSelection>,
    ) -> Result<Extraction, ExtractError> {
        if !document.exists() {
            return Err(ExtractError::DocumentNotFound(document.to_path_buf()));
        }

        if method == ExtractionMethod::Auto {
            return Ok(self.extract_with_all(document, pages));
        }

        let backend = self
            .backends
            .iter()
            .find(|backend| backend.method() == method)
            .ok_or_else(|| ExtractError::UnsupportedMethod(method.to_string()))?;
        let tables = Self::run_backend(backend.as_ref(), document, pages).map_err(|error| {
            ExtractError::Backend {
                backend: method.to_string(),
                message: error.to_string(),
            }
        })?;
        Ok(tables.into())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{ExtractionBackend, Extractor, TableSource};
    use crate::error::ExtractError;
    use crate::options::{ExtractionMethod, PageSelection};
    use crate::table::Table;
    use crate::warning::WarningCode;

    struct Fixed(ExtractionMethod, Vec<Table>);

    impl ExtractionBackend for Fixed {
        fn method(&self) -> ExtractionMethod {
            self.0
        }

        fn extract(&self, _: &Path, _: Option<&PageSelection>) -> Result<Vec<Table>, ExtractError> {
            Ok(self.1.clone())
        }
    }

    struct Failing(ExtractionMethod);

    impl ExtractionBackend for Failing {
        fn method(&self) -> ExtractionMethod {
            self.0
        }

        fn extract(&self, _: &Path, _: Option<&PageSelection>) -> Result<Vec<Table>, ExtractError> {
            Err(ExtractError::PdfText("broken font".to_string()))
        }
    }

    fn existing_document() -> tempfile::NamedTempFile {
        tempfile::NamedTempFile::new().expect("temp file")
    }

    fn sample() -> Table {
        Table::from_strings(["Name ", "Qty"], [vec![" Pen", "3"], vec!["nan", "None"]])
    }

    #[test]
    fn auto_skips_failing_backend_and_merges_duplicates() {
        let extractor = Extractor::with_backends(vec![
            Box::new(Failing(ExtractionMethod::Layout)),
            Box::new(Fixed(ExtractionMethod::Stream, vec![sample(), sample()])),
        ]);
        let doc = existing_document();

        let extraction = extractor
            .extract_tables(doc.path(), ExtractionMethod::Auto, None)
            .expect("auto never fails on backend errors");

        assert_eq!(extraction.tables.len(), 1);
        assert_eq!(extraction.tables[0].columns(), ["Name", "Qty"]);
        assert_eq!(extraction.tables[0].row_count(), 1);
        assert_eq!(extraction.warnings[0].code, WarningCode::BackendFailed);
        assert_eq!(extraction.warnings[0].backend.as_deref(), Some("layout"));
    }

    #[test]
    fn auto_with_every_backend_failing_yields_no_tables() {
        let extractor = Extractor::with_backends(vec![
            Box::new(Failing(ExtractionMethod::Layout)),
            Box::new(Failing(ExtractionMethod::Stream)),
        ]);
        let doc = existing_document();

        let extraction = extractor
            .extract_tables(doc.path(), ExtractionMethod::Auto, None)
            .expect("auto never fails on backend errors");
        assert!(extraction.tables.is_empty());
    }

    #[test]
    fn sole_backend_failure_is_fatal() {
        let extractor = Extractor::with_backends(vec![Box::new(Failing(ExtractionMethod::Layout))]);
        let doc = existing_document();

        let err = extractor
            .extract_tables(doc.path(), ExtractionMethod::Layout, None)
            .expect_err("single backend failure should surface");
        assert!(matches!(err, ExtractError::Backend { .. }));
    }

    #[test]
    fn unavailable_method_is_rejected() {
        let extractor =
            Extractor::with_backends(vec![Box::new(Fixed(ExtractionMethod::Stream, vec![]))]);
        assert_eq!(extractor.available_methods(), vec![ExtractionMethod::Stream]);

        let doc = existing_document();
        let err = extractor
            .extract_tables(doc.path(), ExtractionMethod::Layout, None)
            .expect_err("layout is not installed");
        assert!(matches!(err, ExtractError::UnsupportedMethod(_)));
    }

    #[test]
    fn missing_document_is_reported() {
        let extractor = Extractor::default();
        let err = extractor
            .extract_tables(Path::new("does-not-exist.pdf"), ExtractionMethod::Auto, None)
            .expect_err("missing file should fail");
        assert!(matches!(err, ExtractError::DocumentNotFound(_)));
    }
}
