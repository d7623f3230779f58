mod common;

use std::path::Path;

use pdf_table_rules::{
    ExtractError, ExtractOptions, ExtractionMethod, Extractor, HeaderMode, PageSelection,
    Pipeline, RulesRegistry, TableSource, Value, WarningCode,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

#[test]
fn stream_backend_reads_single_table_with_header() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("single.pdf");
    common::create_test_pdf(
        &input,
        &[vec!["Name  Age  Score", "Alice  30  98", "Bob  22  87"]],
    )
    .expect("PDF fixture should be created");

    let extraction = Extractor::default()
        .extract_tables(&input, ExtractionMethod::Stream, None)
        .expect("extraction should succeed");

    assert_eq!(extraction.tables.len(), 1, "warnings: {:?}", extraction.warnings);
    let table = &extraction.tables[0];
    assert_eq!(table.columns(), ["Name", "Age", "Score"]);
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.cell(0, "Name"), Some(&Value::from("Alice")));
    assert_eq!(table.cell(1, "Score"), Some(&Value::from("87")));
}

#[test]
fn no_header_mode_generates_column_names() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("plain.pdf");
    common::create_test_pdf(&input, &[vec!["Alice  30  98", "Bob  22  87"]])
        .expect("PDF fixture should be created");

    let options = ExtractOptions {
        header_mode: HeaderMode::NoHeader,
        ..ExtractOptions::default()
    };
    let extraction = Extractor::new(&options)
        .extract_tables(&input, ExtractionMethod::Stream, None)
        .expect("extraction should succeed");

    assert_eq!(
        extraction.tables[0].columns(),
        ["Column_1", "Column_2", "Column_3"]
    );
    assert_eq!(extraction.tables[0].row_count(), 2);
}

#[test]
fn page_selection_limits_extraction() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("inventory.pdf");
    common::create_inventory_pdf(&input);

    let pages: PageSelection = "2".parse().expect("page selection");
    let extraction = Extractor::default()
        .extract_tables(&input, ExtractionMethod::Stream, Some(&pages))
        .expect("extraction should succeed");

    assert_eq!(extraction.tables.len(), 1);
    assert_eq!(extraction.tables[0].columns(), ["Product", "Qty", "Price"]);

    let out_of_range: PageSelection = "9".parse().expect("page selection");
    let err = Extractor::default()
        .extract_tables(&input, ExtractionMethod::Stream, Some(&out_of_range))
        .expect_err("no pages left");
    assert!(matches!(err, ExtractError::Backend { .. }), "{err:?}");
}

#[test]
fn auto_mode_survives_unreadable_document() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("broken.pdf");
    std::fs::write(&input, b"not a pdf at all").expect("write broken file");

    let extraction = Extractor::default()
        .extract_tables(&input, ExtractionMethod::Auto, None)
        .expect("auto mode never fails on backend errors");

    assert!(extraction.tables.is_empty());
    assert!(
        extraction
            .warnings
            .iter()
            .any(|warning| warning.code == WarningCode::BackendFailed)
    );
    assert_eq!(
        extraction.warnings.last().map(|warning| warning.code),
        Some(WarningCode::NoTablesExtracted)
    );
}

#[test]
fn detected_rules_drive_the_whole_pipeline() {
    let dir = tempdir().expect("tempdir should be created");
    let rules_dir = dir.path().join("rules");
    std::fs::create_dir(&rules_dir).expect("rules dir");
    common::write_rule(
        &rules_dir,
        "inventory.yml",
        r"
name: inventory
version: 1.2
selection:
  method: stream
  filename_patterns: ['*inventory*.pdf']
extraction:
  header_contains: [product, qty]
transforms:
  - op: cast_columns
    types: {Qty: int, Price: float}
  - op: filter_rows
    expr: Qty > 1
  - op: derive_column
    name: Value
    expr: Qty * Price
  - op: select_columns
    columns: [Product, Value]
",
    );

    let input = dir.path().join("q3-inventory.pdf");
    common::create_inventory_pdf(&input);

    let registry = RulesRegistry::new(&rules_dir);
    let name = registry
        .detect_type(&input)
        .expect("inventory rules should match");
    let rules = registry.load_type(&name, None).expect("rules should load");
    assert_eq!(rules.version, "1.2");

    let extractor = Extractor::default();
    let (tables, meta) = Pipeline::new(&extractor)
        .extract_and_process(&input, ExtractionMethod::Stream, None, Some(&rules))
        .expect("pipeline should succeed");

    assert_eq!(meta.raw, 2);
    assert_eq!(meta.selected, 1);
    assert_eq!(meta.deduplicated, Some(1));
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].columns(), ["Product", "Value"]);
    assert_eq!(
        tables[0].rows(),
        [
            vec![Value::from("Pen"), Value::Float(4.5)],
            vec![Value::from("Lamp"), Value::Float(168.0)],
        ]
    );
}

#[test]
fn missing_document_is_fatal() {
    let err = Extractor::default()
        .extract_tables(Path::new("no/such/file.pdf"), ExtractionMethod::Auto, None)
        .expect_err("missing document");
    assert!(matches!(err, ExtractError::DocumentNotFound(_)));
}
