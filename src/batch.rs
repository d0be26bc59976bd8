#![cfg(not(tarpaulin_include))]

//! Batch report generation from a ZIP of Excel files.
//!
//! The orchestrator extracts the archive into scratch space, runs the full
//! ingest/render/fill pipeline once per Excel file, copies every finished
//! document into the by-name and by-code output trees and re-zips both trees
//! for download. Failures are recorded per file and per chart; a bad file
//! never aborts the rest of the batch.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::config::{Config, REPORTS_BY_CODE_DIR, REPORTS_BY_NAME_DIR, REPORTS_DIR};
use crate::loader;
use crate::report::{self, GenerationErrorSet, ReportGenerationError};

/// Identity of one finished batch report
#[derive(Debug, Clone, Serialize)]
pub struct BatchReportInfo {
    /// Display name, from the `Report_Name` column or the file stem
    pub name: String,

    /// Stable code, from the `Report_Code` column or `<project_id>_<index>`
    pub code: String,
}

/// Result of one batch run
#[derive(Debug)]
pub struct BatchOutcome {
    /// Reports generated successfully, in processing order
    pub generated: Vec<BatchReportInfo>,

    /// Excel files found in the archive
    pub total_files: usize,

    /// Files that produced a report
    pub processed_files: usize,

    /// Files that failed outright
    pub failures: usize,

    /// Path of the combined download zip
    pub download_zip: String,

    /// Aggregated error set for the whole run
    pub error_set: GenerationErrorSet,
}

/// Strip path separators so report identities stay inside the output trees
fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            other => other,
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "report".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Collect the top-level Excel files of an extracted archive
///
/// Directories, dotfiles and macOS `__MACOSX` metadata are skipped. The list
/// is sorted by name so batch indices are stable across runs.
fn excel_files_in(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let entries =
        fs::read_dir(dir).map_err(|e| format!("Failed to scan extracted files: {}", e))?;

    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name.starts_with("__MACOSX") {
            continue;
        }
        let lower = name.to_lowercase();
        if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn remove_rendered(pending: &mut Vec<PathBuf>) -> usize {
    let mut removed = 0;
    for path in pending.drain(..) {
        if fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    removed
}

/// Run the batch pipeline over an uploaded ZIP archive.
///
/// Extracts the archive, generates one report per top-level Excel file using
/// the project's template, copies each finished document into
/// `uploads/reports_by_name/` and `uploads/reports_by_code/`, and writes a
/// combined zip of both trees to
/// `uploads/reports/batch_reports_<project_id>.zip`.
///
/// Per-file and per-chart failures are collected into the returned
/// [`GenerationErrorSet`]; chart errors are keyed `<report_code>/<chart_tag>`
/// so entries from different files never collide.
///
/// # Errors
/// Fails only when the archive cannot be opened, contains no Excel files, or
/// the output zip cannot be written. Everything else is recorded and the run
/// continues.
pub fn run_batch(
    project_id: &str,
    template_path: &Path,
    zip_bytes: &[u8],
    cfg: &Config,
) -> Result<BatchOutcome, String> {
    let scratch = tempfile::tempdir().map_err(|e| format!("Failed to create scratch dir: {}", e))?;
    let extracted = scratch.path().join("extracted");
    fs::create_dir_all(&extracted).map_err(|e| format!("Failed to create scratch dir: {}", e))?;

    let mut archive = ZipArchive::new(Cursor::new(zip_bytes))
        .map_err(|_| "Invalid or corrupted zip file".to_string())?;
    archive
        .extract(&extracted)
        .map_err(|_| "Invalid or corrupted zip file".to_string())?;

    let excel_files = excel_files_in(&extracted)?;
    if excel_files.is_empty() {
        return Err("No Excel files found in the zip archive".to_string());
    }

    fs::create_dir_all(REPORTS_BY_NAME_DIR)
        .map_err(|e| format!("Failed to create output tree: {}", e))?;
    fs::create_dir_all(REPORTS_BY_CODE_DIR)
        .map_err(|e| format!("Failed to create output tree: {}", e))?;

    let total_files = excel_files.len();
    let mut generated: Vec<BatchReportInfo> = Vec::new();
    let mut batch_errors = GenerationErrorSet::default();
    let mut pending_cleanup: Vec<PathBuf> = Vec::new();

    for (index, file_path) in excel_files.iter().enumerate() {
        let ordinal = index + 1;
        let stem = file_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("report_{}", ordinal));
        let fallback_code = format!("{}_{}", project_id, ordinal);

        let sheet = match loader::load_report_data(file_path) {
            Ok(sheet) => sheet,
            Err(e) => {
                log::warn!("Batch file '{}' failed to load: {}", stem, e);
                batch_errors.report_generation_errors.push(ReportGenerationError {
                    tag: stem.clone(),
                    error: e.to_string(),
                });
                log::info!("Generated {} of {} reports", ordinal, total_files);
                continue;
            }
        };

        let report_name = sheet.report_name.clone().unwrap_or(stem);
        let report_code = sheet.report_code.clone().unwrap_or(fallback_code);

        let rendered_path = scratch.path().join(format!("{}.docx", sanitize_component(&report_code)));
        match report::generate_report(
            &sheet,
            template_path,
            &rendered_path,
            None,
            Some(&report_code),
            cfg,
        ) {
            Ok(outcome) => {
                batch_errors
                    .chart_generation_errors
                    .extend(outcome.error_set.chart_generation_errors);
                batch_errors
                    .report_generation_errors
                    .extend(outcome.error_set.report_generation_errors);

                let by_name = Path::new(REPORTS_BY_NAME_DIR)
                    .join(format!("{}.docx", sanitize_component(&report_name)));
                let by_code = Path::new(REPORTS_BY_CODE_DIR)
                    .join(format!("{}.docx", sanitize_component(&report_code)));
                let copied = fs::copy(&rendered_path, &by_name)
                    .and_then(|_| fs::copy(&rendered_path, &by_code));
                match copied {
                    Ok(_) => {
                        generated.push(BatchReportInfo {
                            name: report_name,
                            code: report_code,
                        });
                        pending_cleanup.push(rendered_path);
                    }
                    Err(e) => {
                        log::warn!("Batch report '{}' could not be stored: {}", report_name, e);
                        batch_errors.report_generation_errors.push(ReportGenerationError {
                            tag: report_name,
                            error: format!("Failed to store generated report: {}", e),
                        });
                    }
                }
            }
            Err(e) => {
                log::warn!("Batch report '{}' failed: {}", report_name, e);
                batch_errors.report_generation_errors.push(ReportGenerationError {
                    tag: report_name,
                    error: e.to_string(),
                });
            }
        }

        log::info!("Generated {} of {} reports", ordinal, total_files);

        if ordinal % cfg.cleanup_interval == 0 {
            let removed = remove_rendered(&mut pending_cleanup);
            log::info!(
                "Cleaned up {} temporary files after {} of {} reports",
                removed,
                ordinal,
                total_files
            );
        }
    }
    remove_rendered(&mut pending_cleanup);

    let download_zip = format!("{}/batch_reports_{}.zip", REPORTS_DIR, project_id);
    fs::create_dir_all(REPORTS_DIR).map_err(|e| format!("Failed to create output dir: {}", e))?;
    write_batch_zip(&download_zip, &generated)?;

    batch_errors.report_generated_at = Some(chrono::Utc::now().to_rfc3339());

    let processed_files = generated.len();
    let failures = total_files - processed_files;
    log::info!(
        "Batch for project '{}' finished: {} of {} reports generated, {} failed",
        project_id,
        processed_files,
        total_files,
        failures
    );

    Ok(BatchOutcome {
        generated,
        total_files,
        processed_files,
        failures,
        download_zip,
        error_set: batch_errors,
    })
}

/// Zip the finished reports as `reports_by_name/` and `reports_by_code/`
/// subtrees
fn write_batch_zip(zip_path: &str, generated: &[BatchReportInfo]) -> Result<(), String> {
    let file =
        fs::File::create(zip_path).map_err(|e| format!("Failed to create batch zip: {}", e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    for info in generated {
        let name_file = format!("{}.docx", sanitize_component(&info.name));
        let code_file = format!("{}.docx", sanitize_component(&info.code));

        let name_bytes = fs::read(Path::new(REPORTS_BY_NAME_DIR).join(&name_file))
            .map_err(|e| format!("Failed to read generated report: {}", e))?;
        writer
            .start_file(format!("reports_by_name/{}", name_file), options)
            .map_err(|e| format!("Failed to write batch zip: {}", e))?;
        writer
            .write_all(&name_bytes)
            .map_err(|e| format!("Failed to write batch zip: {}", e))?;

        let code_bytes = fs::read(Path::new(REPORTS_BY_CODE_DIR).join(&code_file))
            .map_err(|e| format!("Failed to read generated report: {}", e))?;
        writer
            .start_file(format!("reports_by_code/{}", code_file), options)
            .map_err(|e| format!("Failed to write batch zip: {}", e))?;
        writer
            .write_all(&code_bytes)
            .map_err(|e| format!("Failed to write batch zip: {}", e))?;
    }

    writer
        .finish()
        .map_err(|e| format!("Failed to finish batch zip: {}", e))?;
    Ok(())
}
