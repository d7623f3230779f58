use tracing::debug;

use super::cells::{modal_width, split_line_into_cells, split_on_whitespace};
use super::pdf_reader::PageText;
use crate::options::{ExtractOptions, HeaderMode};
use crate::table::Table;

pub(crate) const LOW_CONFIDENCE_THRESHOLD: f32 = 0.60;
const HEADER_CONFIDENCE_THRESHOLD: f32 = 0.55;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DetectedTable {
    pub page: u32,
    pub rows: Vec<Vec<String>>,
    pub confidence: f32,
}

#[allow(clippy::cast_precision_loss)]
fn table_confidence(rows: &[Vec<String>]) -> f32 {
    if rows.len() < 2 {
        return 0.0;
    }

    let modal = modal_width(rows);
    if modal == 0 {
        return 0.0;
    }

    let consistent =
        rows.iter().filter(|row| row.len() == modal).count() as f32 / rows.len() as f32;
    let max_width = rows.iter().map(Vec::len).max().unwrap_or(modal);
    let min_width = rows.iter().map(Vec::len).min().unwrap_or(modal);
    let uniformity = if max_width == 0 {
        0.0
    } else {
        1.0 - ((max_width - min_width) as f32 / max_width as f32)
    };

    (consistent * 0.75 + uniformity * 0.25).clamp(0.0, 1.0)
}

/// Consecutive lines that split into at least `min_cols` cells form one
/// table; any other line closes the current run.
pub(crate) fn detect_tables_in_page(page: &PageText, min_cols: usize) -> Vec<DetectedTable> {
    let mut tables = Vec::new();
    let mut current_rows: Vec<Vec<String>> = Vec::new();

    let flush_current = |rows: &mut Vec<Vec<String>>, tables: &mut Vec<DetectedTable>| {
        if rows.len() >= 2 {
            let confidence = table_confidence(rows);
            tables.push(DetectedTable {
                page: page.page_number,
                rows: std::mem::take(rows),
                confidence,
            });
        } else {
            rows.clear();
        }
    };

    for line in page.text.lines() {
        let mut cells = split_line_into_cells(line);
        if cells.len() < min_cols {
            let soft_cells = split_on_whitespace(line);
            let has_numeric = soft_cells
                .iter()
                .any(|cell| cell.chars().any(|ch| ch.is_ascii_digit()));
            let looks_like_sentence = ['.', '!', '?']
                .iter()
                .any(|punctuation| line.trim_end().ends_with(*punctuation));
            if soft_cells.len() >= min_cols
                && !looks_like_sentence
                && (has_numeric || soft_cells.len() <= 6)
            {
                cells = soft_cells;
            }
        }

        if cells.len() >= min_cols {
            current_rows.push(cells);
        } else {
            flush_current(&mut current_rows, &mut tables);
        }
    }

    flush_current(&mut current_rows, &mut tables);
    tables
}

fn is_numeric(value: &str) -> bool {
    let trimmed = value.trim().replace(',', "");
    trimmed.parse::<f64>().is_ok()
}

#[allow(clippy::cast_precision_loss)]
fn non_numeric_ratio(cells: &[String]) -> f32 {
    if cells.is_empty() {
        return 0.0;
    }

    let non_numeric = cells.iter().filter(|cell| !is_numeric(cell)).count();
    non_numeric as f32 / cells.len() as f32
}

pub(crate) fn infer_has_header(rows: &[Vec<String>]) -> (bool, f32) {
    if rows.is_empty() {
        return (false, 0.0);
    }

    let first = non_numeric_ratio(&rows[0]);
    let second = rows.get(1).map_or(0.0, |row| non_numeric_ratio(row));

    let confidence = (first * 0.6 + (1.0 - second) * 0.4).clamp(0.0, 1.0);
    let has_header = first >= 0.6 && second <= 0.7;
    (has_header, confidence)
}

fn generated_columns(width: usize) -> Vec<String> {
    (1..=width).map(|index| format!("Column_{index}")).collect()
}

/// Turns a detected run of rows into a table, promoting the first row to
/// column names when the header mode asks for it.
pub(crate) fn into_table(detected: DetectedTable, mode: HeaderMode) -> Table {
    let use_header = match mode {
        HeaderMode::HasHeader => true,
        HeaderMode::NoHeader => false,
        HeaderMode::AutoDetect => {
            let (has_header, confidence) = infer_has_header(&detected.rows);
            if confidence < HEADER_CONFIDENCE_THRESHOLD {
                debug!(
                    page = detected.page,
                    confidence, "header inference confidence is low; keeping first row as data"
                );
            }
            has_header && confidence >= HEADER_CONFIDENCE_THRESHOLD
        }
    };

    let width = detected.rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut rows = detected.rows;
    let columns = if use_header && !rows.is_empty() {
        let mut header = rows.remove(0);
        header.extend((header.len() + 1..=width).map(|index| format!("Column_{index}")));
        header
    } else {
        generated_columns(width)
    };

    Table::from_strings(columns, rows)
}

pub(crate) fn detect_tables(pages: &[PageText], options: &ExtractOptions) -> Vec<Table> {
    let mut tables = Vec::new();
    for page in pages {
        for detected in detect_tables_in_page(page, options.min_cols.max(2)) {
            if detected.confidence < LOW_CONFIDENCE_THRESHOLD {
                debug!(
                    page = detected.page,
                    confidence = detected.confidence,
                    "low-confidence table structure"
                );
            }
            tables.push(into_table(detected, options.header_mode));
        }
    }
    tables
}

#[cfg(test)]
mod tests {
    use super::{DetectedTable, detect_tables_in_page, infer_has_header, into_table};
    use crate::extract::pdf_reader::PageText;
    use crate::options::HeaderMode;

    fn page(text: &str) -> PageText {
        PageText {
            page_number: 1,
            text: text.to_string(),
        }
    }

    #[test]
    fn infers_headers_for_text_then_numeric_rows() {
        let rows = vec![
            vec!["Name".to_string(), "Age".to_string()],
            vec!["Alice".to_string(), "30".to_string()],
        ];
        let (has_header, confidence) = infer_has_header(&rows);
        assert!(has_header);
        assert!(confidence > 0.5);
    }

    #[test]
    fn narrative_lines_split_tables() {
        let tables = detect_tables_in_page(
            &page("City  Pop\nA  10\nB  20\nSome narrative text follows here.\nX  Y\n1  2"),
            2,
        );
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].rows.len(), 3);
    }

    #[test]
    fn header_row_becomes_columns() {
        let detected = DetectedTable {
            page: 1,
            rows: vec![
                vec!["Name".to_string(), "Age".to_string()],
                vec!["Alice".to_string(), "30".to_string()],
                vec!["Bob".to_string(), "22".to_string()],
            ],
            confidence: 1.0,
        };
        let table = into_table(detected.clone(), HeaderMode::AutoDetect);
        assert_eq!(table.columns(), ["Name", "Age"]);
        assert_eq!(table.row_count(), 2);

        let headerless = into_table(detected, HeaderMode::NoHeader);
        assert_eq!(headerless.columns(), ["Column_1", "Column_2"]);
        assert_eq!(headerless.row_count(), 3);
    }
}
