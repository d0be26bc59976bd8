/*!
# Report Generation Service

A web service that fills Word report templates from Excel/CSV data, rendering
charts from a JSON mini-schema, built in Rust.

## Overview

Users create projects, attach a .docx template containing `${tag}`
placeholders, and upload spreadsheet data describing the report: plain text
replacements plus chart definitions (type, data ranges, styling) expressed as
JSON in a `Chart_Attributes` column. The service renders each chart to an
image, splices the images into the template in place of their tags, replaces
the text tags and returns the finished document. A ZIP of many Excel files
produces a whole batch of reports in one request.

## Architecture

The pipeline is a straight line per report:

### Ingestion Layer
- **loader**: reads the `sample` worksheet (or a CSV), normalizes headers,
  builds the tag maps and keeps the raw grid for cell-range lookups

### Rendering Layer
- **graph**: parses the chart JSON mini-schema (comments allowed), resolves
  data ranges against the grid and renders PNG plus interactive HTML
  artifacts; every failure is captured per chart, never thrown
- **docfill**: raw OOXML template surgery - case-insensitive `${tag}`
  replacement in text runs and tables, image insertion at a fixed display
  width, field-refresh marking

### Orchestration Layer
- **report**: runs loader → graph → docfill for one document and collects a
  `GenerationErrorSet` that is stored whole per project run
- **batch**: extracts an uploaded ZIP, runs the pipeline per Excel file,
  fills the by-name and by-code output trees and re-zips them for download

### Web Layer (cargo feature `web`)
- **login**: argon2 password hashing, in-memory session map, session cookie
- **projects**: project CRUD plus the upload endpoints
- **downloader**: attachment responses for finished documents and archives
- **app**: axum router, CORS, body limits and the request timeout

## Modules

- **config**: runtime configuration and the upload directory layout
- **loader**: spreadsheet ingestion (calamine for .xlsx, csv for .csv)
- **graph**: chart JSON parsing and plotters rendering
- **docfill**: .docx placeholder replacement and image embedding
- **report**: single-report orchestration and error capture
- **batch**: ZIP batch orchestration
- **login**: user accounts and sessions
- **projects**: project store and API handlers
- **downloader**: download endpoints
- **app**: routing and middleware

## REST API Endpoints

- `POST /api/register`, `POST /api/login`, `GET /api/logout`, `GET /api/user`
- `GET|POST /api/projects`, `PUT|DELETE /api/projects/{id}`
- `POST /api/projects/{id}/upload_report` - generate one report
- `POST /api/projects/{id}/upload_zip` - generate a batch
- `GET /api/projects/{id}/chart_errors`, `POST /api/projects/{id}/clear_errors`
- `GET /api/reports/{id}/download` - finished .docx
- `GET /api/reports/{chart}.html/download_html` - interactive chart
- `GET /api/reports/batch_reports_{id}.zip` - batch archive
*/

pub mod app;
pub mod batch;
pub mod config;
pub mod docfill;
pub mod downloader;
pub mod graph;
pub mod loader;
pub mod login;
pub mod projects;
pub mod report;

/// Re-export everything from these modules to make it easier to use
pub use batch::*;
pub use config::*;
pub use docfill::*;
pub use graph::*;
pub use loader::*;
pub use report::*;
