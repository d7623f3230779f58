use std::collections::BTreeMap;

/// Cells are separated by tabs or by runs of two or more whitespace
/// characters. A lone space stays inside the cell.
pub(crate) fn split_line_into_cells(line: &str) -> Vec<String> {
    line.split('\t').flat_map(split_on_gaps).collect()
}

/// Fallback for tightly set rows: every whitespace run separates cells.
pub(crate) fn split_on_whitespace(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

fn split_on_gaps(segment: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = segment.chars().peekable();

    while let Some(ch) = chars.next() {
        if !ch.is_whitespace() {
            cell.push(ch);
        } else if chars.peek().is_some_and(|next| next.is_whitespace()) {
            while chars.next_if(|next| next.is_whitespace()).is_some() {}
            push_cell(&mut cells, &mut cell);
        } else {
            cell.push(' ');
        }
    }
    push_cell(&mut cells, &mut cell);

    cells
}

fn push_cell(cells: &mut Vec<String>, cell: &mut String) {
    let trimmed = cell.trim();
    if !trimmed.is_empty() {
        cells.push(trimmed.to_string());
    }
    cell.clear();
}

/// Most common row width; ties go to the wider one.
pub(crate) fn modal_width(rows: &[Vec<String>]) -> usize {
    let mut counts = BTreeMap::<usize, usize>::new();
    for row in rows {
        *counts.entry(row.len()).or_default() += 1;
    }

    counts
        .into_iter()
        .max_by_key(|&(width, count)| (count, width))
        .map_or(0, |(width, _)| width)
}
