#![cfg(not(tarpaulin_include))]

use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{self, Config};
use crate::docfill::DocxTemplate;
use crate::graph::{self, ChartGenerationError};
use crate::loader::ReportSheet;

/// A report-level failure tied to one tag
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportGenerationError {
    /// The tag involved, or a pseudo-tag for file-level failures
    pub tag: String,

    /// Human-readable description
    pub error: String,
}

/// Everything that went wrong during one generation run
///
/// Saved whole after every run, replacing the previous set, so stale
/// errors never survive a successful regeneration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationErrorSet {
    /// Failed charts keyed by tag (batch runs prefix the report code)
    pub chart_generation_errors: HashMap<String, ChartGenerationError>,

    /// Non-chart failures: missing placeholders, skipped files
    pub report_generation_errors: Vec<ReportGenerationError>,

    /// RFC 3339 timestamp of the run that produced this set
    pub report_generated_at: Option<String>,
}

impl GenerationErrorSet {
    pub fn is_empty(&self) -> bool {
        self.chart_generation_errors.is_empty() && self.report_generation_errors.is_empty()
    }
}

/// Result of one report generation run
pub struct ReportOutcome {
    /// Chart and report failures collected along the way
    pub error_set: GenerationErrorSet,

    /// Charts embedded into the document
    pub charts_rendered: usize,

    /// Charts that failed to render or embed
    pub charts_failed: usize,

    /// Text placeholders replaced
    pub text_replacements: usize,
}

fn errors_dir(username: &str) -> String {
    format!("{}/{}/errors", config::DATABASE_DIR, username)
}

/// Path of the persisted error set for one project
pub fn errors_file(username: &str, project_id: &str) -> String {
    format!("{}/{}.json", errors_dir(username), project_id)
}

/// Persist an error set, replacing whatever was there before
///
/// # Arguments
/// * `username` - Owner of the project
/// * `project_id` - Project the run belonged to
/// * `set` - The full set from the latest run
///
/// # Returns
/// * `Result<(), String>` - Success or an error message
pub fn save_error_set(
    username: &str,
    project_id: &str,
    set: &GenerationErrorSet,
) -> Result<(), String> {
    fs::create_dir_all(errors_dir(username))
        .map_err(|e| format!("Failed to create errors directory: {}", e))?;
    let json = serde_json::to_string_pretty(set)
        .map_err(|e| format!("Failed to serialize errors: {}", e))?;
    fs::write(errors_file(username, project_id), json)
        .map_err(|e| format!("Failed to write errors: {}", e))
}

/// Load the persisted error set for a project
///
/// A project that never generated anything has an empty set, not an error.
///
/// # Returns
/// * `Result<GenerationErrorSet, String>` - The set or an error message
pub fn load_error_set(username: &str, project_id: &str) -> Result<GenerationErrorSet, String> {
    let path = errors_file(username, project_id);
    if !Path::new(&path).exists() {
        return Ok(GenerationErrorSet::default());
    }
    let contents =
        fs::read_to_string(&path).map_err(|e| format!("Failed to read errors: {}", e))?;
    serde_json::from_str(&contents).map_err(|e| format!("Failed to parse errors: {}", e))
}

/// Reset a project's error set to empty; repeat calls are harmless
pub fn clear_error_set(username: &str, project_id: &str) -> Result<(), String> {
    save_error_set(username, project_id, &GenerationErrorSet::default())
}

/// Fill a template from ingested data and write the finished report
///
/// Charts render first, in sheet order; each failure is recorded and the
/// run continues. Text replacement then covers every remaining placeholder
/// the data maps know about. Unmatched text placeholders stay as they are,
/// and chart rows whose tag never occurs in the template are recorded as
/// report errors.
///
/// # Arguments
/// * `sheet` - Ingested report data
/// * `template_path` - Word template to fill
/// * `output_path` - Where the finished docx goes
/// * `html_dir` - Directory for interactive chart pages, when wanted
/// * `chart_key_prefix` - Prefix for chart error keys in batch runs
/// * `cfg` - Application configuration
///
/// # Returns
/// * `Result<ReportOutcome, Box<dyn Error>>` - Per-chart failures live in
///   the outcome; Err means the whole run failed (unreadable template,
///   unwritable output)
pub fn generate_report(
    sheet: &ReportSheet,
    template_path: &Path,
    output_path: &Path,
    html_dir: Option<&Path>,
    chart_key_prefix: Option<&str>,
    cfg: &Config,
) -> Result<ReportOutcome, Box<dyn Error>> {
    let mut template = DocxTemplate::open(template_path)?;
    let mut error_set = GenerationErrorSet::default();
    let mut charts_rendered = 0usize;
    let mut charts_failed = 0usize;

    let chart_tags: Vec<&String> = sheet
        .chart_order
        .iter()
        .take(cfg.max_charts_per_report)
        .collect();
    if sheet.chart_order.len() > cfg.max_charts_per_report {
        let skipped = sheet.chart_order.len() - cfg.max_charts_per_report;
        log::warn!(
            "Chart limit reached: {} of {} charts skipped",
            skipped,
            sheet.chart_order.len()
        );
        error_set.report_generation_errors.push(ReportGenerationError {
            tag: "charts".to_string(),
            error: format!(
                "Report has {} charts, limit is {}; {} skipped",
                sheet.chart_order.len(),
                cfg.max_charts_per_report,
                skipped
            ),
        });
    }

    for chart_tag in chart_tags {
        let attrs = match sheet.chart_attr_map.get(chart_tag) {
            Some(attrs) => attrs,
            None => continue,
        };
        let hint = sheet.chart_type_map.get(chart_tag).map(String::as_str);
        let error_key = match chart_key_prefix {
            Some(prefix) => format!("{}/{}", prefix, chart_tag),
            None => chart_tag.clone(),
        };

        match graph::generate_chart(sheet, hint, attrs, cfg.chart_width, cfg.chart_height) {
            Ok(artifacts) => {
                match template.insert_chart(chart_tag, &artifacts.png) {
                    Ok(true) => {
                        charts_rendered += 1;
                        log::debug!("Embedded chart '{}'", chart_tag);
                    }
                    Ok(false) => {
                        log::warn!("No placeholder for chart '{}' in template", chart_tag);
                        error_set.report_generation_errors.push(ReportGenerationError {
                            tag: chart_tag.clone(),
                            error: "No placeholder found in template".to_string(),
                        });
                    }
                    Err(e) => {
                        charts_failed += 1;
                        let record = graph::ChartError::RenderFailed(e.to_string())
                            .to_record(&chart_type_label(sheet, chart_tag), artifacts.data_points);
                        error_set.chart_generation_errors.insert(error_key, record);
                    }
                }

                if let Some(dir) = html_dir {
                    let html_path = dir.join(format!("interactive_{}.html", chart_tag));
                    if let Err(e) = fs::write(&html_path, &artifacts.html) {
                        log::warn!("Could not write interactive chart page: {}", e);
                    }
                }
            }
            Err(chart_err) => {
                charts_failed += 1;
                log::warn!("Chart '{}' failed: {}", chart_tag, chart_err);
                let record = chart_err.to_record(&chart_type_label(sheet, chart_tag), 0);
                error_set.chart_generation_errors.insert(error_key, record);
            }
        }
    }

    // Flat data entries win over plain text entries for the same tag
    let mut text_replacements = 0usize;
    for tag in template.placeholder_tags() {
        if sheet.chart_attr_map.contains_key(&tag) {
            continue;
        }
        let value = sheet
            .flat_data_map
            .get(&tag)
            .or_else(|| sheet.text_map.get(&tag));
        if let Some(value) = value {
            text_replacements += template.replace_text(&tag, value);
        }
    }

    template.enable_field_refresh();

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    template.save(output_path)?;

    error_set.report_generated_at = Some(chrono::Utc::now().to_rfc3339());

    log::info!(
        "Report written to {:?}: {} charts embedded, {} failed, {} text replacements",
        output_path,
        charts_rendered,
        charts_failed,
        text_replacements
    );

    Ok(ReportOutcome {
        error_set,
        charts_rendered,
        charts_failed,
        text_replacements,
    })
}

/// Best-effort chart type string for error records
fn chart_type_label(sheet: &ReportSheet, chart_tag: &str) -> String {
    if let Some(hint) = sheet.chart_type_map.get(chart_tag) {
        return hint.clone();
    }
    sheet
        .chart_attr_map
        .get(chart_tag)
        .and_then(|attrs| graph::parse_chart_config(attrs).ok())
        .and_then(|config| config.chart_meta.chart_type)
        .unwrap_or_else(|| "unknown".to_string())
}
