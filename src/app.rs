#![cfg(not(tarpaulin_include))]
#![cfg(feature = "web")]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    response::Html,
    routing::{get, post, put},
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::Config;
use crate::downloader;
use crate::login;
use crate::projects;

/// Shared state handed to every request handler
pub struct AppState {
    pub config: Config,
}

const LANDING_PAGE: &str = "<!doctype html>\n\
<html>\n\
<head><title>Report Generator</title></head>\n\
<body>\n\
<h1>Report Generator</h1>\n\
<p>The API lives under <code>/api</code>. Register with\n\
<code>POST /api/register</code>, log in with <code>POST /api/login</code>,\n\
then manage projects under <code>/api/projects</code>.</p>\n\
</body>\n\
</html>\n";

async fn serve_landing() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

/// Build the service router
///
/// Everything except the landing page, registration and login sits behind
/// the session-cookie middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    let protected = Router::new()
        .route("/api/logout", get(login::handle_logout))
        .route("/api/user", get(login::handle_current_user))
        .route(
            "/api/projects",
            get(projects::handle_list_projects).post(projects::handle_create_project),
        )
        .route(
            "/api/projects/:project_id",
            put(projects::handle_update_project).delete(projects::handle_delete_project),
        )
        .route(
            "/api/projects/:project_id/upload_report",
            post(projects::handle_upload_report),
        )
        .route(
            "/api/projects/:project_id/upload_zip",
            post(projects::handle_upload_zip),
        )
        .route(
            "/api/projects/:project_id/chart_errors",
            get(projects::handle_get_errors),
        )
        .route(
            "/api/projects/:project_id/clear_errors",
            post(projects::handle_clear_errors),
        )
        .route(
            "/api/reports/:filename/download",
            get(downloader::handle_download_report),
        )
        .route(
            "/api/reports/:filename/download_html",
            get(downloader::handle_download_chart_html),
        )
        .route(
            "/api/reports/:filename",
            get(downloader::handle_download_batch_zip),
        )
        .route_layer(middleware::from_fn(login::require_auth));

    let max_upload = state.config.max_upload_bytes;
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .route("/", get(serve_landing))
        .route("/api/register", post(login::handle_register))
        .route("/api/login", post(login::handle_login))
        .merge(protected)
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server and run until shutdown
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState { config });
    let app = build_router(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    println!("Listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
