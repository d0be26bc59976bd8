#![cfg(not(tarpaulin_include))]
#![cfg(feature = "web")]

use std::fs;
use std::path::Path;

use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::Path as AxumPath,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use uuid::Uuid;

use crate::config::REPORTS_DIR;
use crate::projects;

lazy_static! {
    static ref BATCH_ZIP_NAME: Regex = Regex::new(r"^batch_reports_(.+)\.zip$").unwrap();
}

const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Build an attachment response around a file already read into memory
fn attachment(bytes: Vec<u8>, content_type: &str, filename: &str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from(Bytes::from(bytes)))
        .unwrap()
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": message}))).into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn read_failed(path: &str, e: std::io::Error) -> Response {
    log::error!("Failed to read '{}': {}", path, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Failed to read generated file"})),
    )
        .into_response()
}

/// Reject names that could escape the reports directory
fn is_plain_filename(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && !name.contains("..")
}

/// GET /api/reports/:project_id/download
///
/// Serves the last single-report output generated for the project as a .docx
/// attachment.
pub async fn handle_download_report(
    Extension(username): Extension<String>,
    AxumPath(project_id): AxumPath<String>,
) -> Response {
    if Uuid::parse_str(&project_id).is_err() {
        return bad_request("Invalid project ID");
    }
    let project = match projects::find_project(&username, &project_id) {
        Ok(Some(project)) => project,
        Ok(None) => return not_found("Project not found or unauthorized"),
        Err(message) => {
            log::error!("{}", message);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": message})),
            )
                .into_response();
        }
    };

    let report_path = match &project.generated_report_path {
        Some(path) if Path::new(path).exists() => path.clone(),
        _ => return not_found("Generated report not found for this project"),
    };

    let bytes = match fs::read(&report_path) {
        Ok(bytes) => bytes,
        Err(e) => return read_failed(&report_path, e),
    };
    let filename = Path::new(&report_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("output_report_{}.docx", project_id));
    attachment(bytes, DOCX_MIME, &filename)
}

/// GET /api/reports/:chart_filename/download_html
///
/// Serves an interactive chart artifact written next to the generated
/// reports, e.g. `interactive_revenue_chart.html`.
pub async fn handle_download_chart_html(
    AxumPath(chart_filename): AxumPath<String>,
) -> Response {
    if !is_plain_filename(&chart_filename) || !chart_filename.ends_with(".html") {
        return not_found("Chart HTML file not found");
    }

    let chart_path = format!("{}/{}", REPORTS_DIR, chart_filename);
    if !Path::new(&chart_path).exists() {
        return not_found("Chart HTML file not found");
    }
    let bytes = match fs::read(&chart_path) {
        Ok(bytes) => bytes,
        Err(e) => return read_failed(&chart_path, e),
    };
    attachment(bytes, "text/html; charset=utf-8", &chart_filename)
}

/// GET /api/reports/:filename
///
/// Serves a batch result archive. Only `batch_reports_<project_id>.zip`
/// names are accepted, and only for projects the caller owns.
pub async fn handle_download_batch_zip(
    Extension(username): Extension<String>,
    AxumPath(filename): AxumPath<String>,
) -> Response {
    let project_id = match BATCH_ZIP_NAME
        .captures(&filename)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
    {
        Some(id) if is_plain_filename(&id) => id,
        _ => return not_found("Batch report file not found"),
    };

    match projects::find_project(&username, &project_id) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Project not found or unauthorized"),
        Err(message) => {
            log::error!("{}", message);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": message})),
            )
                .into_response();
        }
    }

    let zip_path = format!("{}/batch_reports_{}.zip", REPORTS_DIR, project_id);
    if !Path::new(&zip_path).exists() {
        return not_found("Batch report file not found");
    }
    let bytes = match fs::read(&zip_path) {
        Ok(bytes) => bytes,
        Err(e) => return read_failed(&zip_path, e),
    };
    attachment(bytes, "application/zip", &filename)
}
