use reportgen::loader::{self, CellValue};
use rust_xlsxwriter::Workbook;
use std::assert;
use std::path::Path;

// Helper function to build the Excel fixture used across tests
fn build_sample_workbook(path: &Path) {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("sample").unwrap();

    // Header row, two headers written with spaces to exercise normalization
    sheet.write_string(0, 0, "Text_Tag").unwrap();
    sheet.write_string(0, 1, "Text").unwrap();
    sheet.write_string(0, 2, "Chart_Tag").unwrap();
    sheet.write_string(0, 3, "Chart_Type").unwrap();
    sheet.write_string(0, 4, "Chart_Attributes").unwrap();
    sheet.write_string(0, 5, "Chart Data Y2020").unwrap();
    sheet.write_string(0, 6, "Chart_Data_Y2021").unwrap();
    sheet.write_string(0, 7, "Growth_Y2021").unwrap();
    sheet.write_string(0, 8, "Chart_Data_CAGR").unwrap();
    sheet.write_string(0, 9, "Report Name").unwrap();
    sheet.write_string(0, 10, "Report_Code").unwrap();

    // Sheet row 2: the chart row carrying tags, attributes and identity
    sheet.write_string(1, 0, "Company_Name").unwrap();
    sheet.write_string(1, 1, "Acme Corp").unwrap();
    sheet.write_string(1, 2, "Revenue_Chart").unwrap();
    sheet.write_string(1, 3, "column").unwrap();
    sheet
        .write_string(1, 4, "{\"chart_meta\": {\"chart_type\": \"column\"}}")
        .unwrap();
    sheet.write_number(1, 5, 100.0).unwrap();
    sheet.write_number(1, 6, 150.0).unwrap();
    sheet.write_number(1, 7, 0.5).unwrap();
    sheet.write_string(1, 8, "12.5%").unwrap();
    sheet.write_string(1, 9, "Acme Annual Report").unwrap();
    sheet.write_string(1, 10, "ACME-01").unwrap();

    // Sheet rows 3 and 4: extra data rows for range extraction
    sheet.write_string(2, 0, "Report_Year").unwrap();
    sheet.write_string(2, 1, "2024").unwrap();
    sheet.write_number(2, 5, 200.0).unwrap();
    sheet.write_number(2, 6, 250.0).unwrap();
    sheet.write_number(3, 5, 300.0).unwrap();
    sheet.write_number(3, 6, 350.0).unwrap();

    workbook.save(path).unwrap();
}

// Test CellValue conversions used throughout the pipeline
fn test_cell_value() {
    println!("\n====== Testing cell_value ======");

    assert_eq!(CellValue::Number(42.0).as_f64(), Some(42.0));
    assert_eq!(CellValue::Text(" 3.5 ".to_string()).as_f64(), Some(3.5));
    assert_eq!(CellValue::Text("abc".to_string()).as_f64(), None);
    assert_eq!(CellValue::Bool(true).as_f64(), Some(1.0));
    assert_eq!(CellValue::Empty.as_f64(), None);
    println!("✓ as_f64 handles numbers, numeric text, booleans and blanks");

    assert_eq!(CellValue::Number(100.0).to_display(), "100");
    assert_eq!(CellValue::Number(0.5).to_display(), "0.5");
    assert_eq!(CellValue::Bool(true).to_display(), "true");
    assert_eq!(CellValue::Empty.to_display(), "");
    println!("✓ to_display drops the fraction on integral floats");

    assert!(CellValue::Empty.is_empty());
    assert!(CellValue::Text("   ".to_string()).is_empty());
    assert!(!CellValue::Number(0.0).is_empty());
    println!("✓ is_empty treats whitespace-only text as blank");
}

// Test loading an Excel workbook and deriving the tag maps
fn test_excel_loading() {
    println!("\n====== Testing excel_loading ======");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.xlsx");
    build_sample_workbook(&path);

    let sheet = loader::load_report_data(&path).unwrap();

    assert_eq!(sheet.headers[0], "Text_Tag");
    assert_eq!(sheet.headers[5], "Chart_Data_Y2020");
    assert_eq!(sheet.headers[9], "Report_Name");
    println!("✓ Headers with spaces are normalized to underscores");

    assert_eq!(sheet.grid.len(), 3);
    println!("✓ Grid holds the 3 data rows, header excluded");

    assert_eq!(sheet.text_map.len(), 2);
    assert_eq!(sheet.text_map.get("company_name").unwrap(), "Acme Corp");
    assert_eq!(sheet.text_map.get("report_year").unwrap(), "2024");
    println!("✓ Text tags are lowercased in the text map");

    assert_eq!(sheet.chart_order, vec!["revenue_chart".to_string()]);
    assert!(
        sheet
            .chart_attr_map
            .get("revenue_chart")
            .unwrap()
            .contains("chart_type")
    );
    assert_eq!(sheet.chart_type_map.get("revenue_chart").unwrap(), "column");
    println!("✓ Chart tag, type and attributes captured in row order");

    assert_eq!(sheet.flat_data_map.len(), 4);
    assert_eq!(sheet.flat_data_map.get("revenue_y2020").unwrap(), "100");
    assert_eq!(sheet.flat_data_map.get("revenue_y2021").unwrap(), "150");
    assert_eq!(sheet.flat_data_map.get("revenue_y2021_kpi2").unwrap(), "0.5");
    assert_eq!(sheet.flat_data_map.get("revenue_cgrp").unwrap(), "12.5%");
    println!("✓ Flat data map derives year, growth and CAGR tags");

    assert_eq!(sheet.report_name.as_deref(), Some("Acme Annual Report"));
    assert_eq!(sheet.report_code.as_deref(), Some("ACME-01"));
    println!("✓ Report identity columns picked up from the first row");
}

// Test numeric and text extraction from cell ranges
fn test_range_extraction() {
    println!("\n====== Testing range_extraction ======");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.xlsx");
    build_sample_workbook(&path);
    let sheet = loader::load_report_data(&path).unwrap();

    assert_eq!(sheet.extract_range("F2:F4").unwrap(), vec![100.0, 200.0, 300.0]);
    println!("✓ Column range F2:F4 extracted in sheet-row order");

    assert_eq!(sheet.extract_range("G3").unwrap(), vec![250.0]);
    println!("✓ Single cell reference is a one-element range");

    assert_eq!(
        sheet.extract_range("F2:G3").unwrap(),
        vec![100.0, 150.0, 200.0, 250.0]
    );
    println!("✓ Rectangular range flattened row-major");

    assert_eq!(
        sheet.extract_range_text("B2:B3").unwrap(),
        vec!["Acme Corp".to_string(), "2024".to_string()]
    );
    println!("✓ Text extraction returns display strings");

    let err = sheet.extract_range("F2:F99").unwrap_err();
    assert_eq!(err, "Range F2:F99 is out of bounds");
    println!("✓ Out-of-bounds range rejected");

    let err = sheet.extract_range("B2:B2").unwrap_err();
    assert_eq!(err, "Non-numeric value in range B2:B2");
    println!("✓ Non-numeric cell in a numeric range rejected");

    let err = sheet.extract_range("5F").unwrap_err();
    assert_eq!(err, "Invalid cell reference: 5F");
    println!("✓ Malformed cell reference rejected");

    let err = sheet.extract_range("F1:F2").unwrap_err();
    assert_eq!(err, "Invalid cell range: F1:F2");
    println!("✓ Ranges touching the header row rejected");

    let err = sheet.extract_range("F4:F2").unwrap_err();
    assert_eq!(err, "Invalid cell range: F4:F2");
    println!("✓ Reversed range rejected");
}

// Test that a workbook without the expected sheet is an error
fn test_missing_sheet() {
    println!("\n====== Testing missing_sheet ======");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wrong.xlsx");

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "Text_Tag").unwrap();
    workbook.save(&path).unwrap();

    let err = loader::load_report_data(&path).unwrap_err();
    assert_eq!(err.to_string(), "Workbook has no sheet named 'sample'");
    println!("✓ Workbook without a 'sample' sheet rejected");
}

// Test the CSV ingestion path
fn test_csv_loading() {
    println!("\n====== Testing csv_loading ======");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.csv");

    let mut writer = csv::Writer::from_path(&path).unwrap();
    writer
        .write_record([
            "Text_Tag",
            "Text",
            "Chart_Tag",
            "Chart_Type",
            "Chart_Attributes",
            "Chart_Data_Y2020",
        ])
        .unwrap();
    writer
        .write_record([
            "Margin",
            "18%",
            "Margin_Chart",
            "pie",
            "{\"chart_meta\": {\"chart_type\": \"pie\"}}",
            "42",
        ])
        .unwrap();
    writer.write_record(["", "", "", "", "", "58"]).unwrap();
    writer.flush().unwrap();
    drop(writer);

    let sheet = loader::load_report_data(&path).unwrap();

    assert_eq!(sheet.text_map.get("margin").unwrap(), "18%");
    assert_eq!(sheet.chart_order, vec!["margin_chart".to_string()]);
    assert_eq!(sheet.flat_data_map.get("margin_y2020").unwrap(), "42");
    println!("✓ CSV rows feed the same tag maps as Excel");

    assert_eq!(sheet.grid[0][5], CellValue::Number(42.0));
    assert_eq!(sheet.extract_range("F2:F3").unwrap(), vec![42.0, 58.0]);
    println!("✓ Numeric-looking CSV fields parsed as numbers");
}

// Test required-column validation and file-type dispatch
fn test_loading_errors() {
    println!("\n====== Testing loading_errors ======");
    let dir = tempfile::tempdir().unwrap();

    let path = dir.path().join("partial.csv");
    let mut writer = csv::Writer::from_path(&path).unwrap();
    writer
        .write_record(["Text_Tag", "Text", "Chart_Tag", "Chart_Type"])
        .unwrap();
    writer.write_record(["A", "B", "C", "line"]).unwrap();
    writer.flush().unwrap();
    drop(writer);

    let err = loader::load_report_data(&path).unwrap_err();
    assert_eq!(err.to_string(), "Missing required column: Chart_Attributes");
    println!("✓ Missing required column reported by name");

    let path = dir.path().join("empty.csv");
    std::fs::write(&path, "").unwrap();
    let err = loader::load_report_data(&path).unwrap_err();
    assert_eq!(err.to_string(), "CSV file is empty");
    println!("✓ Empty CSV file rejected");

    let err = loader::load_report_data("report.pdf").unwrap_err();
    assert_eq!(err.to_string(), "Unsupported file extension: pdf");
    println!("✓ Unsupported extensions rejected before reading");

    let err = loader::load_report_data("noext").unwrap_err();
    assert_eq!(err.to_string(), "File has no extension");
    println!("✓ Extensionless paths rejected");
}

pub fn run_tests() {
    println!("Starting loader unit tests");
    test_cell_value();
    test_excel_loading();
    test_range_extraction();
    test_missing_sheet();
    test_csv_loading();
    test_loading_errors();
    println!("All tests passed!");
}

fn main() {
    run_tests();
}
