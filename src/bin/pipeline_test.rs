#![cfg(not(tarpaulin_include))]

use reportgen::batch;
use reportgen::config::{self, Config};
use reportgen::loader;
use reportgen::report::{self, GenerationErrorSet, ReportGenerationError};
use rust_xlsxwriter::Workbook;
use std::io::{Read, Write};
use std::path::Path;

const VALID_CHART: &str = r#"{"chart_meta": {"chart_title": "Revenue"}, "series": {"x_axis": ["A", "B"], "data": [{"values": [1, 2]}]}}"#;

const FULL_BODY: &str = "<w:p><w:r><w:t>${company_name}</w:t></w:r></w:p>\
     <w:p><w:r><w:t>Revenue: ${revenue_y2020}</w:t></w:r></w:p>\
     <w:p><w:r><w:t>${revenue_chart}</w:t></w:r></w:p>\
     <w:p><w:r><w:t>${missing_tag}</w:t></w:r></w:p>";

// Helper function to write a minimal docx template with the given body runs
fn build_template(path: &Path, body: &str) {
    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body>{}</w:body></w:document>",
        body
    );
    let parts = [
        (
            "[Content_Types].xml",
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
             <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
             <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
             <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
             <Override PartName=\"/word/document.xml\" \
             ContentType=\"application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml\"/>\
             </Types>"
                .to_string(),
        ),
        (
            "_rels/.rels",
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
             <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
             <Relationship Id=\"rId1\" \
             Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" \
             Target=\"word/document.xml\"/></Relationships>"
                .to_string(),
        ),
        ("word/document.xml", document),
        (
            "word/_rels/document.xml.rels",
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
             <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
             </Relationships>"
                .to_string(),
        ),
    ];

    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in parts {
        writer.start_file(name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

// Helper function to read one part back out of a saved docx
fn read_part_string(path: &Path, part: &str) -> String {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut entry = archive.by_name(part).unwrap();
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).unwrap();
    String::from_utf8(bytes).unwrap()
}

// Helper function to build a one-chart data workbook in memory
fn sample_workbook(
    chart_attrs: &str,
    report_name: Option<&str>,
    report_code: Option<&str>,
) -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("sample").unwrap();

    let headers = [
        "Text_Tag",
        "Text",
        "Chart_Tag",
        "Chart_Type",
        "Chart_Attributes",
        "Chart_Data_Y2020",
        "Report_Name",
        "Report_Code",
    ];
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string(0, col as u16, *header).unwrap();
    }

    sheet.write_string(1, 0, "Company_Name").unwrap();
    sheet.write_string(1, 1, "Acme Corp").unwrap();
    sheet.write_string(1, 2, "Revenue_Chart").unwrap();
    sheet.write_string(1, 3, "column").unwrap();
    sheet.write_string(1, 4, chart_attrs).unwrap();
    sheet.write_number(1, 5, 100.0).unwrap();
    if let Some(name) = report_name {
        sheet.write_string(1, 6, name).unwrap();
    }
    if let Some(code) = report_code {
        sheet.write_string(1, 7, code).unwrap();
    }

    workbook.save_to_buffer().unwrap()
}

// Helper function to build a workbook missing the required columns
fn broken_workbook() -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("sample").unwrap();
    sheet.write_string(0, 0, "Text_Tag").unwrap();
    workbook.save_to_buffer().unwrap()
}

// Test a full single-report run: ingest, render, fill, save
fn test_single_report() {
    println!("\n====== Testing single_report ======");
    config::ensure_upload_dirs().unwrap();

    build_template(Path::new("template.docx"), FULL_BODY);
    std::fs::write("data.xlsx", sample_workbook(VALID_CHART, None, None)).unwrap();

    let sheet = loader::load_report_data("data.xlsx").unwrap();
    let cfg = Config::default();
    let outcome = report::generate_report(
        &sheet,
        Path::new("template.docx"),
        Path::new("uploads/reports/output_report_single.docx"),
        Some(Path::new("uploads/reports")),
        None,
        &cfg,
    )
    .unwrap();

    assert_eq!(outcome.charts_rendered, 1);
    assert_eq!(outcome.charts_failed, 0);
    assert_eq!(outcome.text_replacements, 2);
    assert!(outcome.error_set.is_empty());
    assert!(outcome.error_set.report_generated_at.is_some());
    println!("✓ Chart embedded and both known text tags replaced");

    let html = std::fs::read_to_string("uploads/reports/interactive_revenue_chart.html").unwrap();
    assert!(html.contains("<svg"));
    println!("✓ Interactive chart page written next to the report");

    let output = Path::new("uploads/reports/output_report_single.docx");
    let document = read_part_string(output, "word/document.xml");
    assert!(document.contains("Acme Corp"));
    assert!(document.contains("Revenue: 100"));
    assert!(!document.contains("${company_name}"));
    assert!(document.contains("${missing_tag}"));
    assert!(document.contains("<w:drawing>"));
    println!("✓ Filled document keeps unknown placeholders untouched");

    let settings = read_part_string(output, "word/settings.xml");
    assert!(settings.contains("<w:updateFields w:val=\"true\"/>"));
    println!("✓ Saved report refreshes fields on open");
}

// Test that a failing chart is recorded without aborting the report
fn test_failed_chart() {
    println!("\n====== Testing failed_chart ======");
    build_template(Path::new("template.docx"), FULL_BODY);
    std::fs::write("bad.xlsx", sample_workbook("this is not json", None, None)).unwrap();

    let sheet = loader::load_report_data("bad.xlsx").unwrap();
    let cfg = Config::default();
    let outcome = report::generate_report(
        &sheet,
        Path::new("template.docx"),
        Path::new("uploads/reports/output_report_bad.docx"),
        None,
        None,
        &cfg,
    )
    .unwrap();

    assert_eq!(outcome.charts_failed, 1);
    assert_eq!(outcome.charts_rendered, 0);
    let record = outcome
        .error_set
        .chart_generation_errors
        .get("revenue_chart")
        .unwrap();
    assert_eq!(record.error_type, "invalid_json");
    assert_eq!(record.chart_type, "column");
    assert_eq!(record.data_points, 0);
    assert_eq!(outcome.text_replacements, 2);
    assert!(Path::new("uploads/reports/output_report_bad.docx").exists());
    println!("✓ Failed chart recorded, report still written");

    let outcome = report::generate_report(
        &sheet,
        Path::new("template.docx"),
        Path::new("uploads/reports/output_report_bad2.docx"),
        None,
        Some("ACME-01"),
        &cfg,
    )
    .unwrap();
    assert!(
        outcome
            .error_set
            .chart_generation_errors
            .contains_key("ACME-01/revenue_chart")
    );
    println!("✓ Batch prefix namespaces chart error keys");
}

// Test that a chart with no placeholder becomes a report error
fn test_unplaced_chart() {
    println!("\n====== Testing unplaced_chart ======");
    build_template(
        Path::new("plain.docx"),
        "<w:p><w:r><w:t>${company_name}</w:t></w:r></w:p>",
    );
    std::fs::write("data.xlsx", sample_workbook(VALID_CHART, None, None)).unwrap();

    let sheet = loader::load_report_data("data.xlsx").unwrap();
    let cfg = Config::default();
    let outcome = report::generate_report(
        &sheet,
        Path::new("plain.docx"),
        Path::new("uploads/reports/output_report_plain.docx"),
        None,
        None,
        &cfg,
    )
    .unwrap();

    assert_eq!(outcome.charts_rendered, 0);
    assert_eq!(outcome.charts_failed, 0);
    assert_eq!(
        outcome.error_set.report_generation_errors,
        vec![ReportGenerationError {
            tag: "revenue_chart".to_string(),
            error: "No placeholder found in template".to_string(),
        }]
    );
    println!("✓ Chart without a placeholder recorded as a report error");
}

// Test the per-report chart limit
fn test_chart_limit() {
    println!("\n====== Testing chart_limit ======");

    let mut workbook = Workbook::new();
    let sheet_w = workbook.add_worksheet();
    sheet_w.set_name("sample").unwrap();
    for (col, header) in ["Text_Tag", "Text", "Chart_Tag", "Chart_Type", "Chart_Attributes"]
        .iter()
        .enumerate()
    {
        sheet_w.write_string(0, col as u16, *header).unwrap();
    }
    sheet_w.write_string(1, 2, "Revenue_Chart").unwrap();
    sheet_w.write_string(1, 3, "column").unwrap();
    sheet_w.write_string(1, 4, VALID_CHART).unwrap();
    sheet_w.write_string(2, 2, "Margin_Chart").unwrap();
    sheet_w.write_string(2, 3, "line").unwrap();
    sheet_w.write_string(2, 4, VALID_CHART).unwrap();
    std::fs::write("two_charts.xlsx", workbook.save_to_buffer().unwrap()).unwrap();

    build_template(
        Path::new("two_charts.docx"),
        "<w:p><w:r><w:t>${revenue_chart}</w:t></w:r></w:p>\
         <w:p><w:r><w:t>${margin_chart}</w:t></w:r></w:p>",
    );

    let sheet = loader::load_report_data("two_charts.xlsx").unwrap();
    let mut cfg = Config::default();
    cfg.max_charts_per_report = 1;
    let outcome = report::generate_report(
        &sheet,
        Path::new("two_charts.docx"),
        Path::new("uploads/reports/output_report_limit.docx"),
        None,
        None,
        &cfg,
    )
    .unwrap();

    assert_eq!(outcome.charts_rendered, 1);
    let overflow = &outcome.error_set.report_generation_errors[0];
    assert_eq!(overflow.tag, "charts");
    assert_eq!(overflow.error, "Report has 2 charts, limit is 1; 1 skipped");
    println!("✓ Chart limit enforced with one summary error");
}

// Test the persisted error set store
fn test_error_set_store() {
    println!("\n====== Testing error_set_store ======");

    let mut set = GenerationErrorSet::default();
    set.report_generation_errors.push(ReportGenerationError {
        tag: "intro_chart".to_string(),
        error: "No placeholder found in template".to_string(),
    });
    set.report_generated_at = Some("2026-01-01T00:00:00+00:00".to_string());

    report::save_error_set("alice", "proj1", &set).unwrap();
    assert_eq!(report::errors_file("alice", "proj1"), "database/alice/errors/proj1.json");
    assert!(Path::new("database/alice/errors/proj1.json").exists());
    let loaded = report::load_error_set("alice", "proj1").unwrap();
    assert_eq!(loaded, set);
    println!("✓ Error sets round-trip through the store");

    let fresh = report::load_error_set("alice", "unknown").unwrap();
    assert!(fresh.is_empty());
    assert!(fresh.report_generated_at.is_none());
    println!("✓ Unknown projects load as empty sets");

    let mut replacement = GenerationErrorSet::default();
    replacement.report_generation_errors.push(ReportGenerationError {
        tag: "other".to_string(),
        error: "different".to_string(),
    });
    report::save_error_set("alice", "proj1", &replacement).unwrap();
    let loaded = report::load_error_set("alice", "proj1").unwrap();
    assert_eq!(loaded.report_generation_errors.len(), 1);
    assert_eq!(loaded.report_generation_errors[0].tag, "other");
    println!("✓ Each save replaces the whole set");

    report::clear_error_set("alice", "proj1").unwrap();
    report::clear_error_set("alice", "proj1").unwrap();
    let cleared = report::load_error_set("alice", "proj1").unwrap();
    assert!(cleared.is_empty());
    println!("✓ Clearing is idempotent");
}

// Test the batch pipeline over an uploaded archive
fn test_batch() {
    println!("\n====== Testing batch ======");
    config::ensure_upload_dirs().unwrap();
    build_template(Path::new("batch_template.docx"), FULL_BODY);

    let mut zip_writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    zip_writer.start_file("north.xlsx", options).unwrap();
    zip_writer
        .write_all(&sample_workbook(VALID_CHART, Some("North/Region"), Some("N-100")))
        .unwrap();
    zip_writer.start_file("south.xlsx", options).unwrap();
    zip_writer
        .write_all(&sample_workbook("not json at all", Some("South Region"), Some("S-200")))
        .unwrap();
    zip_writer.start_file("broken.xlsx", options).unwrap();
    zip_writer.write_all(&broken_workbook()).unwrap();
    zip_writer.start_file("notes.txt", options).unwrap();
    zip_writer.write_all(b"ignore me").unwrap();
    zip_writer.start_file("sub/inner.xlsx", options).unwrap();
    zip_writer
        .write_all(&sample_workbook(VALID_CHART, None, None))
        .unwrap();
    let zip_bytes = zip_writer.finish().unwrap().into_inner();

    let cfg = Config::default();
    let outcome =
        batch::run_batch("proj42", Path::new("batch_template.docx"), &zip_bytes, &cfg).unwrap();

    assert_eq!(outcome.total_files, 3);
    assert_eq!(outcome.processed_files, 2);
    assert_eq!(outcome.failures, 1);
    assert_eq!(outcome.generated.len(), 2);
    assert_eq!(outcome.generated[0].name, "North/Region");
    assert_eq!(outcome.generated[0].code, "N-100");
    assert_eq!(outcome.generated[1].code, "S-200");
    println!("✓ Two of three files produced reports");

    assert!(Path::new("uploads/reports_by_name/North_Region.docx").exists());
    assert!(Path::new("uploads/reports_by_name/South Region.docx").exists());
    assert!(Path::new("uploads/reports_by_code/N-100.docx").exists());
    assert!(Path::new("uploads/reports_by_code/S-200.docx").exists());
    println!("✓ Output trees filled, path separators sanitized");

    assert_eq!(outcome.download_zip, "uploads/reports/batch_reports_proj42.zip");
    let file = std::fs::File::open(&outcome.download_zip).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert_eq!(names.len(), 4);
    assert!(names.contains(&"reports_by_name/North_Region.docx".to_string()));
    assert!(names.contains(&"reports_by_name/South Region.docx".to_string()));
    assert!(names.contains(&"reports_by_code/N-100.docx".to_string()));
    assert!(names.contains(&"reports_by_code/S-200.docx".to_string()));
    println!("✓ Download zip carries both subtrees");

    let chart_error = outcome
        .error_set
        .chart_generation_errors
        .get("S-200/revenue_chart")
        .unwrap();
    assert_eq!(chart_error.error_type, "invalid_json");
    assert_eq!(outcome.error_set.report_generation_errors.len(), 1);
    let file_error = &outcome.error_set.report_generation_errors[0];
    assert_eq!(file_error.tag, "broken");
    assert!(file_error.error.contains("Missing required column"));
    assert!(outcome.error_set.report_generated_at.is_some());
    println!("✓ Failures recorded per file and per chart");
}

// Test batch rejection of unusable archives
fn test_batch_rejects() {
    println!("\n====== Testing batch_rejects ======");
    build_template(Path::new("batch_template.docx"), FULL_BODY);
    let cfg = Config::default();

    let err = batch::run_batch(
        "proj42",
        Path::new("batch_template.docx"),
        b"definitely not a zip",
        &cfg,
    )
    .unwrap_err();
    assert_eq!(err, "Invalid or corrupted zip file");
    println!("✓ Corrupt archives rejected");

    let mut zip_writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    zip_writer.start_file("readme.txt", options).unwrap();
    zip_writer.write_all(b"no spreadsheets").unwrap();
    let bytes = zip_writer.finish().unwrap().into_inner();

    let err = batch::run_batch("proj42", Path::new("batch_template.docx"), &bytes, &cfg)
        .unwrap_err();
    assert_eq!(err, "No Excel files found in the zip archive");
    println!("✓ Archives without Excel files rejected");
}

pub fn run_tests() {
    println!("Starting pipeline unit tests");
    test_single_report();
    test_failed_chart();
    test_unplaced_chart();
    test_chart_limit();
    test_error_set_store();
    test_batch();
    test_batch_rejects();
    println!("All tests passed!");
}

fn main() {
    // Storage paths are relative; run the whole suite in a scratch workspace
    let workspace = tempfile::tempdir().unwrap();
    std::env::set_current_dir(workspace.path()).unwrap();
    run_tests();
}
