#![cfg(not(tarpaulin_include))]

use std::env;
use std::path::Path;
use std::process;

use reportgen::config::Config;
use reportgen::loader;
use reportgen::report;

/// One-shot report generation from the command line
///
/// Runs the full ingest/render/fill pipeline once, without the server:
///
/// ```text
/// reportgen <template.docx> <data.xlsx|csv> <output.docx>
/// ```
///
/// Captured chart and report errors are printed after generation; they do
/// not fail the run.
fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        let program = args.first().map(String::as_str).unwrap_or("reportgen");
        eprintln!("Usage: {} <template.docx> <data.xlsx|csv> <output.docx>", program);
        process::exit(2);
    }

    let template = Path::new(&args[1]);
    let data = Path::new(&args[2]);
    let output = Path::new(&args[3]);
    let cfg = Config::default();

    let sheet = match loader::load_report_data(data) {
        Ok(sheet) => sheet,
        Err(e) => {
            eprintln!("Failed to read report data: {}", e);
            process::exit(1);
        }
    };

    // Interactive chart artifacts land next to the output document
    let html_dir = output.parent().filter(|p| !p.as_os_str().is_empty());

    match report::generate_report(&sheet, template, output, html_dir, None, &cfg) {
        Ok(outcome) => {
            println!(
                "Generated {} ({} charts rendered, {} text replacements)",
                output.display(),
                outcome.charts_rendered,
                outcome.text_replacements
            );
            for (tag, err) in &outcome.error_set.chart_generation_errors {
                println!("  chart '{}' failed: {} [{}]", tag, err.user_message, err.error_type);
            }
            for entry in &outcome.error_set.report_generation_errors {
                println!("  report issue '{}': {}", entry.tag, entry.error);
            }
        }
        Err(e) => {
            eprintln!("Report generation failed: {}", e);
            process::exit(1);
        }
    }
}
