#![cfg(not(tarpaulin_include))]

use std::collections::HashMap;
use std::error::Error;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CELL_REF: Regex = Regex::new(r"^([A-Za-z]+)(\d+)$").unwrap();
}

/// Required columns in every report data file
const REQUIRED_COLUMNS: [&str; 5] = [
    "Text_Tag",
    "Text",
    "Chart_Tag",
    "Chart_Type",
    "Chart_Attributes",
];

/// A single spreadsheet cell value after ingestion
///
/// Excel and CSV cells are reduced to this form; everything the pipeline
/// needs is a display string or a number.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// Blank cell
    Empty,

    /// Numeric cell (Excel integers are widened to f64)
    Number(f64),

    /// Boolean cell
    Bool(bool),

    /// Anything else, kept verbatim
    Text(String),
}

impl CellValue {
    /// Numeric view of the cell, parsing text that looks like a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => s.trim().parse::<f64>().ok(),
            CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            CellValue::Empty => None,
        }
    }

    /// Display string for the cell; integral floats drop the fraction
    pub fn to_display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            CellValue::Bool(b) => b.to_string(),
            CellValue::Text(s) => s.clone(),
        }
    }

    /// True for blank cells and whitespace-only text
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// Parsed contents of one report data file
///
/// Holds the tag maps driving text replacement and chart generation plus the
/// raw data grid (header row excluded) for cell-range lookups like `W20:W23`.
#[derive(Debug, Clone)]
pub struct ReportSheet {
    /// Normalized column headers
    pub headers: Vec<String>,

    /// Data rows in sheet order, header row excluded
    pub grid: Vec<Vec<CellValue>>,

    /// Lowercased Text_Tag -> Text
    pub text_map: HashMap<String, String>,

    /// Lowercased Chart_Tag -> raw Chart_Attributes JSON
    pub chart_attr_map: HashMap<String, String>,

    /// Lowercased Chart_Tag -> Chart_Type
    pub chart_type_map: HashMap<String, String>,

    /// Chart tags in first-occurrence row order
    pub chart_order: Vec<String>,

    /// Derived text tags (section1_y2020, section1_cgrp, ...)
    pub flat_data_map: HashMap<String, String>,

    /// First non-empty Report_Name column value, for batch naming
    pub report_name: Option<String>,

    /// First non-empty Report_Code column value, for batch naming
    pub report_code: Option<String>,
}

/// Load a report data file, dispatching on the extension
///
/// `.xlsx`/`.xls` files are read with calamine from the sheet named
/// `sample`; `.csv` files are read whole. Anything else is rejected.
///
/// # Arguments
/// * `filepath` - Path to the data file to load
///
/// # Returns
/// * `Result<ReportSheet, Box<dyn Error>>` - The parsed sheet or an error
///
/// # Examples
/// ```no_run
/// use reportgen::loader::load_report_data;
///
/// match load_report_data("data.xlsx") {
///     Ok(sheet) => println!("Loaded {} chart tags", sheet.chart_order.len()),
///     Err(e) => eprintln!("Error loading data: {}", e),
/// }
/// ```
pub fn load_report_data(filepath: impl AsRef<Path>) -> Result<ReportSheet, Box<dyn Error>> {
    let path = filepath.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match extension.as_deref() {
        Some("csv") => from_csv(path),
        Some("xlsx") | Some("xls") => from_excel(path),
        Some(ext) => Err(format!("Unsupported file extension: {}", ext).into()),
        None => Err("File has no extension".into()),
    }
}

/// Load report data from an Excel workbook
///
/// Reads the sheet named `sample`; a workbook without that sheet is an
/// error, matching the upload contract.
///
/// # Arguments
/// * `filepath` - Path to the `.xlsx` file
///
/// # Returns
/// * `Result<ReportSheet, Box<dyn Error>>` - The parsed sheet or an error
pub fn from_excel(filepath: impl AsRef<Path>) -> Result<ReportSheet, Box<dyn Error>> {
    use calamine::{Reader, Xlsx, open_workbook};

    let mut workbook: Xlsx<_> = open_workbook(filepath)?;

    let range = workbook
        .worksheet_range("sample")
        .map_err(|_| "Workbook has no sheet named 'sample'")?;

    if range.height() == 0 {
        return Err("Sheet 'sample' is empty".into());
    }

    let mut rows_iter = range.rows();
    let header_row = rows_iter.next().ok_or("Sheet 'sample' is empty")?;

    let headers: Vec<String> = header_row
        .iter()
        .map(|cell| normalize_header(&cell.to_string()))
        .collect();

    let mut rows = Vec::new();
    for row in rows_iter {
        let cells = row
            .iter()
            .map(|cell| match cell {
                calamine::Data::Empty => CellValue::Empty,
                calamine::Data::Int(i) => CellValue::Number(*i as f64),
                calamine::Data::Float(f) => CellValue::Number(*f),
                calamine::Data::Bool(b) => CellValue::Bool(*b),
                calamine::Data::String(s) => {
                    if s.trim().is_empty() {
                        CellValue::Empty
                    } else {
                        CellValue::Text(s.clone())
                    }
                }
                other => CellValue::Text(other.to_string()),
            })
            .collect();
        rows.push(cells);
    }

    ReportSheet::from_rows(headers, rows)
}

/// Load report data from a CSV file
///
/// The first record is the header row; remaining records are data. Numeric
/// fields become numbers so cell-range lookups behave like the Excel path.
///
/// # Arguments
/// * `filepath` - Path to the `.csv` file
///
/// # Returns
/// * `Result<ReportSheet, Box<dyn Error>>` - The parsed sheet or an error
pub fn from_csv(filepath: impl AsRef<Path>) -> Result<ReportSheet, Box<dyn Error>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(filepath)?;

    let mut records = reader.records();
    let header_record = match records.next() {
        Some(record) => record?,
        None => return Err("CSV file is empty".into()),
    };

    let headers: Vec<String> = header_record
        .iter()
        .map(normalize_header)
        .collect();

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        let cells = record
            .iter()
            .map(|field| {
                let trimmed = field.trim();
                if trimmed.is_empty() {
                    CellValue::Empty
                } else if let Ok(n) = trimmed.parse::<f64>() {
                    CellValue::Number(n)
                } else {
                    CellValue::Text(field.to_string())
                }
            })
            .collect();
        rows.push(cells);
    }

    ReportSheet::from_rows(headers, rows)
}

/// Normalize a column header: trim, spaces to underscores, collapse doubles
fn normalize_header(raw: &str) -> String {
    raw.trim().replace(' ', "_").replace("__", "_")
}

/// Convert a column letter to a zero-based index (A=0, Z=25, AA=26)
fn letter_to_column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut index: usize = 0;
    for c in letters.chars() {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return None;
        }
        index = index * 26 + (c as usize - 'A' as usize + 1);
    }
    Some(index - 1)
}

/// Parse a cell reference like `W20` into (column index, 1-based sheet row)
fn parse_cell_ref(cell: &str) -> Option<(usize, usize)> {
    let caps = CELL_REF.captures(cell.trim())?;
    let col = letter_to_column_index(caps.get(1)?.as_str())?;
    let row: usize = caps.get(2)?.as_str().parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((col, row))
}

impl ReportSheet {
    /// Build a sheet from normalized headers and data rows
    ///
    /// Derives the tag maps, the flat data map and the batch identity
    /// columns. Fails if any required column is missing.
    ///
    /// # Arguments
    /// * `headers` - Normalized header names
    /// * `grid` - Data rows (header row excluded)
    ///
    /// # Returns
    /// * `Result<ReportSheet, Box<dyn Error>>` - The sheet or a
    ///   missing-column error
    pub fn from_rows(
        headers: Vec<String>,
        grid: Vec<Vec<CellValue>>,
    ) -> Result<ReportSheet, Box<dyn Error>> {
        for required in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == required) {
                return Err(format!("Missing required column: {}", required).into());
            }
        }

        let col = |name: &str| headers.iter().position(|h| h == name);

        let text_tag_col = col("Text_Tag");
        let text_col = col("Text");
        let chart_tag_col = col("Chart_Tag");
        let chart_type_col = col("Chart_Type");
        let chart_attr_col = col("Chart_Attributes");
        let report_name_col = col("Report_Name");
        let report_code_col = col("Report_Code");

        let cell_at = |row: &Vec<CellValue>, idx: Option<usize>| -> Option<String> {
            let idx = idx?;
            let cell = row.get(idx)?;
            if cell.is_empty() {
                None
            } else {
                Some(cell.to_display().trim().to_string())
            }
        };

        let mut text_map = HashMap::new();
        let mut chart_attr_map = HashMap::new();
        let mut chart_type_map = HashMap::new();
        let mut chart_order = Vec::new();
        let mut flat_data_map = HashMap::new();
        let mut report_name = None;
        let mut report_code = None;

        for row in &grid {
            if let (Some(tag), Some(text)) = (cell_at(row, text_tag_col), cell_at(row, text_col)) {
                text_map.insert(tag.to_lowercase(), text);
            }

            if let Some(chart_tag) = cell_at(row, chart_tag_col) {
                let key = chart_tag.to_lowercase();

                if let Some(attrs) = cell_at(row, chart_attr_col) {
                    if !chart_attr_map.contains_key(&key) {
                        chart_order.push(key.clone());
                    }
                    chart_attr_map.insert(key.clone(), attrs);
                }
                if let Some(chart_type) = cell_at(row, chart_type_col) {
                    chart_type_map.insert(key.clone(), chart_type);
                }

                // Derived text tags: section1_chart -> section1_y2020 etc.
                let prefix = key.replace("_chart", "");
                for (idx, header) in headers.iter().enumerate() {
                    if let Some(year) = header.strip_prefix("Chart_Data_Y") {
                        if let Some(value) = cell_at(row, Some(idx)) {
                            flat_data_map
                                .insert(format!("{}_y{}", prefix, year.to_lowercase()), value);
                        }
                    } else if let Some(year) = header.strip_prefix("Growth_Y") {
                        if let Some(value) = cell_at(row, Some(idx)) {
                            flat_data_map.insert(
                                format!("{}_y{}_kpi2", prefix, year.to_lowercase()),
                                value,
                            );
                        }
                    } else if header == "Chart_Data_CAGR" {
                        if let Some(value) = cell_at(row, Some(idx)) {
                            flat_data_map.insert(format!("{}_cgrp", prefix), value);
                        }
                    }
                }
            }

            if report_name.is_none() {
                report_name = cell_at(row, report_name_col);
            }
            if report_code.is_none() {
                report_code = cell_at(row, report_code_col);
            }
        }

        Ok(ReportSheet {
            headers,
            grid,
            text_map,
            chart_attr_map,
            chart_type_map,
            chart_order,
            flat_data_map,
            report_name,
            report_code,
        })
    }

    /// Extract numeric values from a cell range like `W20:W23`
    ///
    /// Row numbers address the original sheet (header on row 1), so data for
    /// sheet row 20 lives at grid row 18. Single-column ranges yield that
    /// column; rectangular ranges are flattened row-major.
    ///
    /// # Arguments
    /// * `cell_range` - Range in `A1:B5` form
    ///
    /// # Returns
    /// * `Result<Vec<f64>, String>` - The numeric values or a range error
    pub fn extract_range(&self, cell_range: &str) -> Result<Vec<f64>, String> {
        let cells = self.resolve_range(cell_range)?;
        cells
            .iter()
            .map(|cell| {
                cell.as_f64()
                    .ok_or_else(|| format!("Non-numeric value in range {}", cell_range))
            })
            .collect()
    }

    /// Extract display strings from a cell range (for category labels)
    ///
    /// # Arguments
    /// * `cell_range` - Range in `A1:B5` form
    ///
    /// # Returns
    /// * `Result<Vec<String>, String>` - The display strings or a range error
    pub fn extract_range_text(&self, cell_range: &str) -> Result<Vec<String>, String> {
        let cells = self.resolve_range(cell_range)?;
        Ok(cells.iter().map(|cell| cell.to_display()).collect())
    }

    fn resolve_range(&self, cell_range: &str) -> Result<Vec<&CellValue>, String> {
        let (start, end) = match cell_range.split_once(':') {
            Some(parts) => parts,
            // A single cell is a one-element range
            None => (cell_range, cell_range),
        };

        let (start_col, start_row) =
            parse_cell_ref(start).ok_or_else(|| format!("Invalid cell reference: {}", start))?;
        let (end_col, end_row) =
            parse_cell_ref(end).ok_or_else(|| format!("Invalid cell reference: {}", end))?;

        if start_row < 2 || end_row < start_row || end_col < start_col {
            return Err(format!("Invalid cell range: {}", cell_range));
        }

        // Sheet row 2 is grid row 0 (the header occupies sheet row 1)
        let start_idx = start_row - 2;
        let end_idx = end_row - 2;

        let mut out = Vec::new();
        for row_idx in start_idx..=end_idx {
            let row = self
                .grid
                .get(row_idx)
                .ok_or_else(|| format!("Range {} is out of bounds", cell_range))?;
            for col_idx in start_col..=end_col {
                let cell = row
                    .get(col_idx)
                    .ok_or_else(|| format!("Range {} is out of bounds", cell_range))?;
                out.push(cell);
            }
        }

        Ok(out)
    }
}
