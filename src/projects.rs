#![cfg(not(tarpaulin_include))]
#![cfg(feature = "web")]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Multipart, Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::batch;
use crate::config::REPORTS_DIR;
use crate::loader;
use crate::login;
use crate::report;

/// Extensions accepted for the project template upload
const ALLOWED_EXTENSIONS: [&str; 9] = [
    "txt", "pdf", "png", "jpg", "jpeg", "gif", "csv", "xlsx", "docx",
];

/// Extensions accepted for report data uploads
const ALLOWED_REPORT_EXTENSIONS: [&str; 2] = ["csv", "xlsx"];

/// A report project owned by one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// UUID identifying the project
    pub id: String,

    /// Username of the owner
    pub owner: String,

    /// Project name shown in the UI
    pub name: String,

    /// Free-form description
    pub description: String,

    /// Stored template file path, when one was uploaded
    pub template_file_ref: Option<String>,

    /// RFC 3339 creation timestamp
    pub created_at: String,

    /// RFC 3339 timestamp of the last modification
    pub updated_at: String,

    /// Path of the last generated report, when one exists
    #[serde(default)]
    pub generated_report_path: Option<String>,

    /// RFC 3339 timestamp of the last generation run
    #[serde(default)]
    pub report_generated_at: Option<String>,
}

fn file_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    Some(ext.to_lowercase())
}

fn allowed_file(filename: &str) -> bool {
    file_extension(filename)
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn allowed_report_file(filename: &str) -> bool {
    file_extension(filename)
        .map(|ext| ALLOWED_REPORT_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// JSON file holding one user's projects
pub fn projects_file(username: &str) -> String {
    format!("{}/projects.json", login::user_dir(username))
}

/// Directory holding one user's uploaded templates
pub fn templates_dir(username: &str) -> String {
    format!("{}/templates", login::user_dir(username))
}

/// Load all projects belonging to a user
///
/// # Returns
/// * `Result<Vec<Project>, String>` - The projects (empty when none were
///   ever created) or an error message
pub fn get_projects(username: &str) -> Result<Vec<Project>, String> {
    let path = projects_file(username);
    if !Path::new(&path).exists() {
        return Ok(Vec::new());
    }
    let contents =
        fs::read_to_string(&path).map_err(|e| format!("Failed to read projects file: {}", e))?;
    serde_json::from_str(&contents).map_err(|e| format!("Failed to parse projects file: {}", e))
}

/// Save all projects belonging to a user
pub fn save_projects(username: &str, projects: &[Project]) -> Result<(), String> {
    fs::create_dir_all(login::user_dir(username))
        .map_err(|e| format!("Failed to create user directory: {}", e))?;
    let json = serde_json::to_string_pretty(projects)
        .map_err(|e| format!("Failed to serialize projects: {}", e))?;
    fs::write(projects_file(username), json)
        .map_err(|e| format!("Failed to write projects file: {}", e))
}

/// Look up one of a user's projects by id
pub fn find_project(username: &str, project_id: &str) -> Result<Option<Project>, String> {
    let projects = get_projects(username)?;
    Ok(projects.into_iter().find(|p| p.id == project_id))
}

fn store_error(message: String) -> Response {
    log::error!("{}", message);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": message})),
    )
        .into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": message}))).into_response()
}

/// GET /api/projects
pub async fn handle_list_projects(Extension(username): Extension<String>) -> Response {
    match get_projects(&username) {
        Ok(projects) => Json(json!({"projects": projects})).into_response(),
        Err(message) => store_error(message),
    }
}

/// POST /api/projects
pub async fn handle_create_project(
    Extension(username): Extension<String>,
    mut multipart: Multipart,
) -> Response {
    let mut name = String::new();
    let mut description = String::new();
    let mut template: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "name" => name = field.text().await.unwrap_or_default(),
            "description" => description = field.text().await.unwrap_or_default(),
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                if let Ok(bytes) = field.bytes().await {
                    if !filename.is_empty() && !bytes.is_empty() {
                        template = Some((filename, bytes.to_vec()));
                    }
                }
            }
            _ => {}
        }
    }

    if name.trim().is_empty() || description.trim().is_empty() {
        return bad_request("Missing required fields (name or description)");
    }
    if let Some((filename, _)) = &template {
        if !allowed_file(filename) {
            return bad_request("File type not allowed");
        }
    }

    let now = chrono::Utc::now().to_rfc3339();
    let project_id = Uuid::new_v4().to_string();

    let template_file_ref = match template {
        Some((filename, bytes)) => {
            let ext = file_extension(&filename).unwrap_or_else(|| "docx".to_string());
            let dir = templates_dir(&username);
            if let Err(e) = fs::create_dir_all(&dir) {
                return store_error(format!("Failed to create templates directory: {}", e));
            }
            let stored_path = format!("{}/{}.{}", dir, project_id, ext);
            if let Err(e) = fs::write(&stored_path, &bytes) {
                return store_error(format!("Failed to store template file: {}", e));
            }
            Some(stored_path)
        }
        None => None,
    };

    let project = Project {
        id: project_id,
        owner: username.clone(),
        name: name.trim().to_string(),
        description: description.trim().to_string(),
        template_file_ref,
        created_at: now.clone(),
        updated_at: now,
        generated_report_path: None,
        report_generated_at: None,
    };

    let mut projects = match get_projects(&username) {
        Ok(projects) => projects,
        Err(message) => return store_error(message),
    };
    projects.push(project.clone());
    if let Err(message) = save_projects(&username, &projects) {
        return store_error(message);
    }

    log::info!("Created project '{}' for '{}'", project.id, username);
    (
        StatusCode::CREATED,
        Json(json!({"message": "Project created successfully", "project": project})),
    )
        .into_response()
}

/// PUT /api/projects/:project_id
pub async fn handle_update_project(
    Extension(username): Extension<String>,
    AxumPath(project_id): AxumPath<String>,
    Json(payload): Json<serde_json::Value>,
) -> Response {
    if Uuid::parse_str(&project_id).is_err() {
        return bad_request("Invalid project ID");
    }

    let updates = match payload.as_object() {
        Some(map) if !map.is_empty() => map.clone(),
        _ => return bad_request("No data provided"),
    };

    let mut projects = match get_projects(&username) {
        Ok(projects) => projects,
        Err(message) => return store_error(message),
    };

    let project = match projects.iter_mut().find(|p| p.id == project_id) {
        Some(project) => project,
        None => return not_found("Project not found"),
    };

    if let Some(name) = updates.get("name").and_then(|v| v.as_str()) {
        project.name = name.trim().to_string();
    }
    if let Some(description) = updates.get("description").and_then(|v| v.as_str()) {
        project.description = description.trim().to_string();
    }
    project.updated_at = chrono::Utc::now().to_rfc3339();

    if let Err(message) = save_projects(&username, &projects) {
        return store_error(message);
    }
    Json(json!({"message": "Project updated successfully"})).into_response()
}

/// DELETE /api/projects/:project_id
pub async fn handle_delete_project(
    Extension(username): Extension<String>,
    AxumPath(project_id): AxumPath<String>,
) -> Response {
    if Uuid::parse_str(&project_id).is_err() {
        return bad_request("Invalid project ID");
    }

    let mut projects = match get_projects(&username) {
        Ok(projects) => projects,
        Err(message) => return store_error(message),
    };

    let position = match projects.iter().position(|p| p.id == project_id) {
        Some(position) => position,
        None => return not_found("Project not found"),
    };
    let removed = projects.remove(position);

    if let Err(message) = save_projects(&username, &projects) {
        return store_error(message);
    }

    // Best-effort cleanup of everything the project left on disk
    if let Some(template) = &removed.template_file_ref {
        let _ = fs::remove_file(template);
    }
    if let Some(report_path) = &removed.generated_report_path {
        let _ = fs::remove_file(report_path);
    }
    let _ = fs::remove_file(report::errors_file(&username, &project_id));

    Json(json!({"message": "Project deleted successfully"})).into_response()
}

/// POST /api/projects/:project_id/upload_report
pub async fn handle_upload_report(
    State(state): State<Arc<AppState>>,
    Extension(username): Extension<String>,
    AxumPath(project_id): AxumPath<String>,
    mut multipart: Multipart,
) -> Response {
    let mut report_file: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        let field_name = field.name().unwrap_or("").to_string();
        if field_name == "report_file" {
            let filename = field.file_name().unwrap_or("").to_string();
            if let Ok(bytes) = field.bytes().await {
                report_file = Some((filename, bytes.to_vec()));
            }
        }
    }

    let (filename, bytes) = match report_file {
        Some(found) => found,
        None => return bad_request("No report file provided"),
    };
    if filename.is_empty() {
        return bad_request("No selected report file");
    }
    if !allowed_report_file(&filename) {
        return bad_request("Report file type not allowed. Only .xlsx or .csv are accepted.");
    }

    if Uuid::parse_str(&project_id).is_err() {
        return bad_request("Invalid project ID");
    }
    let project = match find_project(&username, &project_id) {
        Ok(Some(project)) => project,
        Ok(None) => return not_found("Project not found or unauthorized"),
        Err(message) => return store_error(message),
    };

    let template_path = match &project.template_file_ref {
        Some(path) if Path::new(path).exists() => path.clone(),
        _ => {
            return bad_request(
                "Word template file not found for this project. \
                 Please upload it during project creation.",
            );
        }
    };

    // Park the upload in a temp file; the extension drives the loader
    let ext = file_extension(&filename).unwrap_or_else(|| "xlsx".to_string());
    let data_file = match tempfile::Builder::new()
        .prefix("report_data")
        .suffix(&format!(".{}", ext))
        .tempfile()
    {
        Ok(file) => file,
        Err(e) => return store_error(format!("Failed to stage report data: {}", e)),
    };
    if let Err(e) = fs::write(data_file.path(), &bytes) {
        return store_error(format!("Failed to stage report data: {}", e));
    }

    let sheet = match loader::load_report_data(data_file.path()) {
        Ok(sheet) => sheet,
        Err(e) => return bad_request(&e.to_string()),
    };

    let output_path = format!("{}/output_report_{}.docx", REPORTS_DIR, project_id);
    let outcome = match report::generate_report(
        &sheet,
        Path::new(&template_path),
        Path::new(&output_path),
        Some(Path::new(REPORTS_DIR)),
        None,
        &state.config,
    ) {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("Report generation failed for '{}': {}", project_id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to generate report"})),
            )
                .into_response();
        }
    };

    if let Err(message) = report::save_error_set(&username, &project_id, &outcome.error_set) {
        return store_error(message);
    }

    let generated_at = outcome
        .error_set
        .report_generated_at
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

    let mut projects = match get_projects(&username) {
        Ok(projects) => projects,
        Err(message) => return store_error(message),
    };
    if let Some(stored) = projects.iter_mut().find(|p| p.id == project_id) {
        stored.generated_report_path = Some(output_path.clone());
        stored.report_generated_at = Some(generated_at);
        stored.updated_at = chrono::Utc::now().to_rfc3339();
    }
    if let Err(message) = save_projects(&username, &projects) {
        return store_error(message);
    }

    Json(json!({
        "message": "Report generated successfully",
        "report_path": output_path,
    }))
    .into_response()
}

/// POST /api/projects/:project_id/upload_zip
pub async fn handle_upload_zip(
    State(state): State<Arc<AppState>>,
    Extension(username): Extension<String>,
    AxumPath(project_id): AxumPath<String>,
    mut multipart: Multipart,
) -> Response {
    let mut zip_upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        let field_name = field.name().unwrap_or("").to_string();
        if field_name == "zip_file" {
            let filename = field.file_name().unwrap_or("").to_string();
            if let Ok(bytes) = field.bytes().await {
                zip_upload = Some((filename, bytes.to_vec()));
            }
        }
    }

    let (filename, bytes) = match zip_upload {
        Some(found) => found,
        None => return bad_request("No zip file provided"),
    };
    if !filename.to_lowercase().ends_with(".zip") {
        return bad_request("Only .zip files are allowed");
    }

    if Uuid::parse_str(&project_id).is_err() {
        return bad_request("Invalid project ID");
    }
    let project = match find_project(&username, &project_id) {
        Ok(Some(project)) => project,
        Ok(None) => return not_found("Project not found or unauthorized"),
        Err(message) => return store_error(message),
    };

    let template_path = match &project.template_file_ref {
        Some(path) if Path::new(path).exists() => path.clone(),
        _ => {
            return bad_request(
                "Word template file not found for this project. \
                 Please upload it during project creation.",
            );
        }
    };

    let outcome =
        match batch::run_batch(&project_id, Path::new(&template_path), &bytes, &state.config) {
            Ok(outcome) => outcome,
            Err(message) => return bad_request(&message),
        };

    if let Err(message) = report::save_error_set(&username, &project_id, &outcome.error_set) {
        return store_error(message);
    }

    Json(json!({
        "message": format!("Generated {} reports.", outcome.generated.len()),
        "download_zip": outcome.download_zip,
        "reports": outcome.generated,
        "total_files": outcome.total_files,
        "processed_files": outcome.processed_files,
        "failures": outcome.failures,
    }))
    .into_response()
}

/// GET /api/projects/:project_id/chart_errors
pub async fn handle_get_errors(
    Extension(username): Extension<String>,
    AxumPath(project_id): AxumPath<String>,
) -> Response {
    if Uuid::parse_str(&project_id).is_err() {
        return bad_request("Invalid project ID");
    }
    match find_project(&username, &project_id) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Project not found or unauthorized"),
        Err(message) => return store_error(message),
    }

    match report::load_error_set(&username, &project_id) {
        Ok(set) => Json(set).into_response(),
        Err(message) => store_error(message),
    }
}

/// POST /api/projects/:project_id/clear_errors
pub async fn handle_clear_errors(
    Extension(username): Extension<String>,
    AxumPath(project_id): AxumPath<String>,
) -> Response {
    if Uuid::parse_str(&project_id).is_err() {
        return bad_request("Invalid project ID");
    }
    match find_project(&username, &project_id) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Project not found or unauthorized"),
        Err(message) => return store_error(message),
    }

    match report::clear_error_set(&username, &project_id) {
        Ok(()) => Json(json!({"message": "Errors cleared"})).into_response(),
        Err(message) => store_error(message),
    }
}
