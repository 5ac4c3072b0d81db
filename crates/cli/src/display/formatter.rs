use queryrunner_core::QueryResult;

use crate::cli::OutputFormat;

/// Render one result in the requested output format
pub fn format_result(result: &QueryResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => result.to_json_lines(),
        OutputFormat::Table => to_table(result),
        OutputFormat::Markdown => to_markdown(result),
        OutputFormat::Borderless => to_borderless(result),
        OutputFormat::Vertical => result.to_vertical(),
    }
}

/// Column widths plus the cells to lay out
struct Grid<'a> {
    headers: Vec<String>,
    rows: &'a [Vec<String>],
    widths: Vec<usize>,
}

impl<'a> Grid<'a> {
    fn new(headers: Vec<String>, rows: &'a [Vec<String>]) -> Self {
        let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
        for row in rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }
        Self {
            headers,
            rows,
            widths,
        }
    }

    fn header_cells(&self) -> Vec<String> {
        self.headers
            .iter()
            .zip(&self.widths)
            .map(|(header, width)| format!(" {} ", center(header, *width)))
            .collect()
    }

    fn row_cells(&self, row: &[String]) -> Vec<String> {
        self.widths
            .iter()
            .enumerate()
            .map(|(i, &width)| {
                let cell = row.get(i).map(String::as_str).unwrap_or_default();
                if is_numeric(cell) {
                    format!(" {cell:>width$} ")
                } else {
                    format!(" {cell:<width$} ")
                }
            })
            .collect()
    }

    fn rule(&self, fill: char, sep: &str) -> String {
        self.widths
            .iter()
            .map(|w| fill.to_string().repeat(w + 2))
            .collect::<Vec<_>>()
            .join(sep)
    }
}

/// Boxed ASCII table with upper-cased headers
pub fn to_table(result: &QueryResult) -> String {
    if result.columns.is_empty() {
        return "+\n+\n".to_owned();
    }
    let headers = result
        .unique_columns()
        .iter()
        .map(|c| c.replace(['_', '.'], " ").to_uppercase())
        .collect();
    let grid = Grid::new(headers, &result.rows);
    let border = format!("+{}+\n", grid.rule('-', "+"));

    let mut out = border.clone();
    out.push_str(&format!("|{}|\n", grid.header_cells().join("|")));
    out.push_str(&border);
    for row in grid.rows {
        out.push_str(&format!("|{}|\n", grid.row_cells(row).join("|")));
    }
    if !grid.rows.is_empty() {
        out.push_str(&border);
    }
    out
}

/// GitHub flavored markdown table
pub fn to_markdown(result: &QueryResult) -> String {
    if result.columns.is_empty() {
        return String::new();
    }
    let grid = Grid::new(result.unique_columns(), &result.rows);

    let mut out = format!("|{}|\n", grid.header_cells().join("|"));
    out.push_str(&format!("|{}|\n", grid.rule('-', "|")));
    for row in grid.rows {
        out.push_str(&format!("|{}|\n", grid.row_cells(row).join("|")));
    }
    out
}

/// Space separated columns with a dashed rule under the header
pub fn to_borderless(result: &QueryResult) -> String {
    if result.columns.is_empty() {
        return String::new();
    }
    let grid = Grid::new(result.unique_columns(), &result.rows);

    let mut out = format!(" {} \n", grid.header_cells().join(" "));
    out.push_str(&format!("-{}-\n", grid.rule('-', " ")));
    for row in grid.rows {
        out.push_str(&format!(" {} \n", grid.row_cells(row).join(" ")));
    }
    out
}

fn center(text: &str, width: usize) -> String {
    let pad = width.saturating_sub(text.chars().count());
    let left = pad / 2;
    format!("{}{text}{}", " ".repeat(left), " ".repeat(pad - left))
}

/// Integers and plain decimals are right aligned
fn is_numeric(cell: &str) -> bool {
    let digits = cell.strip_prefix('-').unwrap_or(cell);
    let mut parts = digits.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next().unwrap_or_default();
    !whole.is_empty()
        && whole.bytes().all(|b| b.is_ascii_digit())
        && fraction.bytes().all(|b| b.is_ascii_digit())
}
