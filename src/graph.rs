#![cfg(not(tarpaulin_include))]

use std::error::Error;

use lazy_static::lazy_static;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::loader::ReportSheet;

lazy_static! {
    static ref JSON_COMMENTS: Regex = Regex::new(r"(?s)//.*?\n|/\*.*?\*/").unwrap();
}

/// Fallback series palette when the config supplies no colors
const DEFAULT_PALETTE: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

const WATERFALL_GAIN: RGBColor = RGBColor(44, 160, 44);
const WATERFALL_LOSS: RGBColor = RGBColor(214, 39, 40);

/// Why a single chart could not be produced
///
/// One value per failed chart is recorded in the project error set; the
/// report itself still completes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChartError {
    /// The Chart_Attributes cell did not parse as JSON
    #[error("Chart configuration is not valid JSON: {0}")]
    InvalidJson(String),

    /// The chart type is not one the renderer knows
    #[error("Unsupported chart type: {0}")]
    UnsupportedType(String),

    /// Not enough values to draw anything meaningful
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// A config attribute was present but unusable
    #[error("Malformed attribute: {0}")]
    MalformedAttribute(String),

    /// A cell range did not resolve against the data grid
    #[error("Bad cell range: {0}")]
    BadRange(String),

    /// The drawing backend failed
    #[error("Chart rendering failed: {0}")]
    RenderFailed(String),
}

impl ChartError {
    /// Stable machine-readable tag for the error set
    pub fn error_type(&self) -> &'static str {
        match self {
            ChartError::InvalidJson(_) => "invalid_json",
            ChartError::UnsupportedType(_) => "unsupported_type",
            ChartError::InsufficientData(_) => "insufficient_data",
            ChartError::MalformedAttribute(_) => "malformed_attribute",
            ChartError::BadRange(_) => "bad_range",
            ChartError::RenderFailed(_) => "render_failed",
        }
    }

    /// Build the persisted record for this failure
    pub fn to_record(&self, chart_type: &str, data_points: usize) -> ChartGenerationError {
        ChartGenerationError {
            chart_type: chart_type.to_string(),
            error_type: self.error_type().to_string(),
            user_message: self.to_string(),
            data_points,
        }
    }
}

/// Persisted record of one failed chart
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartGenerationError {
    /// Chart type as requested by the data file
    pub chart_type: String,

    /// Machine-readable failure class
    pub error_type: String,

    /// Human-readable description shown in the UI
    pub user_message: String,

    /// How many values had been resolved when the chart failed
    pub data_points: usize,
}

/// A config field that accepts either one string or a list of strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.clone()],
            OneOrMany::Many(v) => v.clone(),
        }
    }
}

/// `chart_meta` block of a chart configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartMeta {
    #[serde(default)]
    pub chart_type: Option<String>,

    #[serde(default)]
    pub chart_title: Option<String>,

    #[serde(default)]
    pub legend: Option<bool>,

    #[serde(default)]
    pub data_labels: Option<bool>,

    #[serde(default)]
    pub value_format: Option<String>,

    #[serde(default)]
    pub source_sheet: Option<String>,

    /// Cell range holding the category labels
    #[serde(default)]
    pub category_range: Option<String>,

    /// Cell range(s) holding series values
    #[serde(default)]
    pub series_range: Option<OneOrMany>,

    /// Alternative spelling of series_range used by older templates
    #[serde(default)]
    pub value_range: Option<OneOrMany>,

    /// Pie slice to pull out of the circle, by index or by its label
    #[serde(default)]
    pub expanded_segment: Option<serde_json::Value>,

    #[serde(default)]
    pub x_label: Option<String>,

    #[serde(default)]
    pub primary_y_label: Option<String>,

    #[serde(default)]
    pub secondary_y_label: Option<String>,

    #[serde(default)]
    pub show_gridlines: Option<bool>,

    #[serde(default)]
    pub chart_background: Option<String>,

    #[serde(default)]
    pub plot_background: Option<String>,

    #[serde(default)]
    pub font_family: Option<String>,

    #[serde(default)]
    pub font_size: Option<f64>,

    #[serde(default)]
    pub font_color: Option<String>,

    #[serde(default)]
    pub legend_position: Option<String>,
}

/// One entry of the `series.data` array
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeriesSpec {
    #[serde(default)]
    pub name: Option<String>,

    /// "bar" or "line"; drives the combo chart split
    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    /// Inline values, used in preference to any cell range
    #[serde(default)]
    pub values: Option<Vec<serde_json::Value>>,

    #[serde(default)]
    pub value_range: Option<String>,
}

/// `series` block of a chart configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeriesBlock {
    #[serde(default)]
    pub colors: Option<Vec<String>>,

    #[serde(default)]
    pub labels: Option<Vec<String>>,

    /// Inline category labels, used in preference to category_range
    #[serde(default)]
    pub x_axis: Option<Vec<serde_json::Value>>,

    #[serde(default)]
    pub data: Vec<SeriesSpec>,
}

/// Parsed form of one Chart_Attributes cell
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartConfig {
    #[serde(default)]
    pub chart_meta: ChartMeta,

    #[serde(default)]
    pub series: SeriesBlock,
}

/// Every chart shape the renderer can draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Column,
    Bar,
    StackedColumn,
    Line,
    Combo,
    Area,
    Pie,
    Scatter,
    Bubble,
    Histogram,
    Box,
    Heatmap,
    Scatter3d,
    Waterfall,
    Funnel,
}

impl ChartKind {
    /// Map a raw chart type string (with its common aliases) to a kind
    ///
    /// # Arguments
    /// * `raw` - Type string from the Chart_Type column or chart_meta
    ///
    /// # Returns
    /// * `Option<ChartKind>` - None when the string is not recognised
    pub fn parse(raw: &str) -> Option<ChartKind> {
        let normalized = raw.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "column" | "col" | "vertical_bar" => Some(ChartKind::Column),
            "bar" | "horizontal_bar" => Some(ChartKind::Bar),
            "stacked_column" | "stacked_bar" | "stacked" => Some(ChartKind::StackedColumn),
            "line" => Some(ChartKind::Line),
            "combo" | "bar_line" | "combination" => Some(ChartKind::Combo),
            "area" => Some(ChartKind::Area),
            "pie" | "expanded_pie" => Some(ChartKind::Pie),
            "scatter" => Some(ChartKind::Scatter),
            "bubble" => Some(ChartKind::Bubble),
            "histogram" | "hist" => Some(ChartKind::Histogram),
            "box" | "boxplot" | "box_plot" => Some(ChartKind::Box),
            "heatmap" | "heat_map" => Some(ChartKind::Heatmap),
            "scatter3d" | "3d_scatter" | "scatter_3d" => Some(ChartKind::Scatter3d),
            "waterfall" => Some(ChartKind::Waterfall),
            "funnel" => Some(ChartKind::Funnel),
            _ => None,
        }
    }

    /// Canonical lowercase name
    pub fn label(&self) -> &'static str {
        match self {
            ChartKind::Column => "column",
            ChartKind::Bar => "bar",
            ChartKind::StackedColumn => "stacked_column",
            ChartKind::Line => "line",
            ChartKind::Combo => "combo",
            ChartKind::Area => "area",
            ChartKind::Pie => "pie",
            ChartKind::Scatter => "scatter",
            ChartKind::Bubble => "bubble",
            ChartKind::Histogram => "histogram",
            ChartKind::Box => "box",
            ChartKind::Heatmap => "heatmap",
            ChartKind::Scatter3d => "scatter3d",
            ChartKind::Waterfall => "waterfall",
            ChartKind::Funnel => "funnel",
        }
    }
}

/// Legend placement keywords accepted by legend_position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegendPos {
    UpperLeft,
    UpperRight,
    LowerLeft,
    LowerRight,
    MiddleLeft,
    MiddleRight,
}

impl LegendPos {
    fn parse(raw: &str) -> Option<LegendPos> {
        match raw.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "top_left" | "upper_left" => Some(LegendPos::UpperLeft),
            "top_right" | "upper_right" => Some(LegendPos::UpperRight),
            "bottom_left" | "lower_left" => Some(LegendPos::LowerLeft),
            "bottom_right" | "lower_right" => Some(LegendPos::LowerRight),
            "middle_left" | "left" => Some(LegendPos::MiddleLeft),
            "middle_right" | "right" => Some(LegendPos::MiddleRight),
            _ => None,
        }
    }

    fn to_plotters(self) -> SeriesLabelPosition {
        match self {
            LegendPos::UpperLeft => SeriesLabelPosition::UpperLeft,
            LegendPos::UpperRight => SeriesLabelPosition::UpperRight,
            LegendPos::LowerLeft => SeriesLabelPosition::LowerLeft,
            LegendPos::LowerRight => SeriesLabelPosition::LowerRight,
            LegendPos::MiddleLeft => SeriesLabelPosition::MiddleLeft,
            LegendPos::MiddleRight => SeriesLabelPosition::MiddleRight,
        }
    }
}

/// Whether a resolved series draws as bars or as a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    Bar,
    Line,
}

/// One series after all ranges and inline values are resolved
#[derive(Debug, Clone)]
pub struct ResolvedSeries {
    pub name: String,
    pub kind: SeriesKind,
    pub values: Vec<f64>,
}

/// Fully resolved chart input: categories, series and colors
#[derive(Debug, Clone)]
pub struct ChartData {
    pub categories: Vec<String>,
    pub series: Vec<ResolvedSeries>,
    pub colors: Vec<RGBColor>,
}

impl ChartData {
    pub fn color_at(&self, index: usize) -> RGBColor {
        self.colors[index % self.colors.len()]
    }

    /// Total resolved value count, recorded alongside failures
    pub fn data_points(&self) -> usize {
        self.series.iter().map(|s| s.values.len()).sum()
    }
}

/// Pie slice selector, by position or by its category label
#[derive(Debug, Clone, PartialEq)]
pub enum SliceRef {
    Index(usize),
    Label(String),
}

/// Rendering options resolved from chart_meta and the app config
#[derive(Debug, Clone)]
pub struct ChartStyle {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub show_legend: bool,
    pub data_labels: bool,
    pub percent_labels: bool,
    pub x_label: String,
    pub y_label: String,
    pub secondary_y_label: String,
    pub show_gridlines: bool,
    pub chart_background: RGBColor,
    pub plot_background: Option<RGBColor>,
    pub font_family: String,
    pub font_size: u32,
    pub font_color: RGBColor,
    pub legend_pos: LegendPos,
    pub expanded_segment: Option<SliceRef>,
}

impl ChartStyle {
    fn label_font(&self) -> TextStyle<'_> {
        (self.font_family.as_str(), self.font_size)
            .into_font()
            .color(&self.font_color)
    }

    fn caption_font(&self) -> TextStyle<'_> {
        (self.font_family.as_str(), self.font_size * 2)
            .into_font()
            .color(&self.font_color)
    }
}

/// Finished render of one chart
#[derive(Debug)]
pub struct ChartArtifacts {
    /// PNG bytes for docx embedding
    pub png: Vec<u8>,

    /// Standalone HTML page wrapping an SVG render
    pub html: String,

    /// Total values drawn
    pub data_points: usize,
}

/// Strip `//` and `/* */` comments so annotated configs still parse
pub fn strip_json_comments(raw: &str) -> String {
    JSON_COMMENTS.replace_all(raw, "").into_owned()
}

/// Parse one Chart_Attributes cell into a config
///
/// Comments are stripped first; templates in the wild annotate their JSON.
///
/// # Arguments
/// * `raw` - Raw cell contents
///
/// # Returns
/// * `Result<ChartConfig, ChartError>` - The config or an InvalidJson error
///
/// # Examples
/// ```
/// use reportgen::graph::parse_chart_config;
///
/// let config = parse_chart_config(
///     r#"{ "chart_meta": { "chart_type": "line" },
///         "series": { "data": [ { "values": [1, 2, 3] } ] } }"#,
/// ).unwrap();
/// assert_eq!(config.chart_meta.chart_type.as_deref(), Some("line"));
/// ```
pub fn parse_chart_config(raw: &str) -> Result<ChartConfig, ChartError> {
    let cleaned = strip_json_comments(raw);
    serde_json::from_str(&cleaned).map_err(|e| ChartError::InvalidJson(e.to_string()))
}

/// Parse a `#rrggbb` color string
fn parse_color(raw: &str) -> Result<RGBColor, ChartError> {
    let hex = raw.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ChartError::MalformedAttribute(format!(
            "Invalid color '{}', expected #rrggbb",
            raw
        )));
    }
    let r = u8::from_str_radix(&hex[0..2], 16).unwrap_or(0);
    let g = u8::from_str_radix(&hex[2..4], 16).unwrap_or(0);
    let b = u8::from_str_radix(&hex[4..6], 16).unwrap_or(0);
    Ok(RGBColor(r, g, b))
}

fn json_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn json_display(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                n.to_string()
            }
        }
        other => other.to_string(),
    }
}

/// Resolve chart_meta into concrete rendering options
///
/// # Arguments
/// * `meta` - Parsed chart_meta block
/// * `width` - Canvas width from the app config
/// * `height` - Canvas height from the app config
///
/// # Returns
/// * `Result<ChartStyle, ChartError>` - The style, or a malformed-attribute
///   error for unusable colors or segment indexes
pub fn resolve_style(meta: &ChartMeta, width: u32, height: u32) -> Result<ChartStyle, ChartError> {
    let chart_background = match &meta.chart_background {
        Some(raw) => parse_color(raw)?,
        None => WHITE,
    };
    let plot_background = match &meta.plot_background {
        Some(raw) => Some(parse_color(raw)?),
        None => None,
    };
    let font_color = match &meta.font_color {
        Some(raw) => parse_color(raw)?,
        None => BLACK,
    };

    let expanded_segment = match &meta.expanded_segment {
        None => None,
        Some(value) => {
            let parsed = match value {
                serde_json::Value::Number(n) => n.as_u64().map(|v| SliceRef::Index(v as usize)),
                serde_json::Value::String(s) => {
                    let trimmed = s.trim();
                    match trimmed.parse::<usize>() {
                        Ok(idx) => Some(SliceRef::Index(idx)),
                        Err(_) if !trimmed.is_empty() => {
                            Some(SliceRef::Label(trimmed.to_string()))
                        }
                        Err(_) => None,
                    }
                }
                _ => None,
            };
            match parsed {
                Some(slice) => Some(slice),
                None => {
                    return Err(ChartError::MalformedAttribute(
                        "expanded_segment must be a slice index or label".to_string(),
                    ));
                }
            }
        }
    };

    let legend_pos = match &meta.legend_position {
        Some(raw) => LegendPos::parse(raw).ok_or_else(|| {
            ChartError::MalformedAttribute(format!("Unknown legend position '{}'", raw))
        })?,
        None => LegendPos::UpperRight,
    };

    let percent_labels = meta
        .value_format
        .as_deref()
        .map(|f| f.contains('%'))
        .unwrap_or(false);

    Ok(ChartStyle {
        width,
        height,
        title: meta.chart_title.clone().unwrap_or_default(),
        show_legend: meta.legend.unwrap_or(true),
        data_labels: meta.data_labels.unwrap_or(false),
        percent_labels,
        x_label: meta.x_label.clone().unwrap_or_default(),
        y_label: meta.primary_y_label.clone().unwrap_or_default(),
        secondary_y_label: meta.secondary_y_label.clone().unwrap_or_default(),
        show_gridlines: meta.show_gridlines.unwrap_or(false),
        chart_background,
        plot_background,
        font_family: meta
            .font_family
            .clone()
            .unwrap_or_else(|| "sans-serif".to_string()),
        font_size: meta.font_size.map(|s| s.max(6.0) as u32).unwrap_or(15),
        font_color,
        legend_pos,
        expanded_segment,
    })
}

/// Resolve a config against the data grid into drawable series
///
/// Inline values win over per-series ranges, which win over the shared
/// chart_meta ranges. Category labels come from `series.x_axis`, then
/// `category_range`, then positional numbering.
///
/// # Arguments
/// * `sheet` - Ingested report data
/// * `config` - Parsed chart configuration
///
/// # Returns
/// * `Result<ChartData, ChartError>` - Drawable data, or the first
///   range/attribute error encountered
pub fn resolve_chart_data(
    sheet: &ReportSheet,
    config: &ChartConfig,
) -> Result<ChartData, ChartError> {
    let meta = &config.chart_meta;
    let block = &config.series;

    let shared_ranges: Vec<String> = meta
        .value_range
        .as_ref()
        .or(meta.series_range.as_ref())
        .map(|r| r.as_vec())
        .unwrap_or_default();

    let mut series = Vec::new();

    if block.data.is_empty() {
        // No explicit series block; every shared range becomes a series
        for (idx, range) in shared_ranges.iter().enumerate() {
            let values = sheet.extract_range(range).map_err(ChartError::BadRange)?;
            series.push(ResolvedSeries {
                name: series_name(block, idx, None),
                kind: SeriesKind::Bar,
                values,
            });
        }
    } else {
        for (idx, spec) in block.data.iter().enumerate() {
            let values = if let Some(inline) = &spec.values {
                inline
                    .iter()
                    .map(|v| {
                        json_number(v).ok_or_else(|| {
                            ChartError::MalformedAttribute(
                                "Series values must be numeric".to_string(),
                            )
                        })
                    })
                    .collect::<Result<Vec<f64>, ChartError>>()?
            } else if let Some(range) = &spec.value_range {
                sheet.extract_range(range).map_err(ChartError::BadRange)?
            } else if let Some(range) = shared_ranges.get(idx) {
                sheet.extract_range(range).map_err(ChartError::BadRange)?
            } else {
                return Err(ChartError::InsufficientData(format!(
                    "Series {} has neither values nor a cell range",
                    idx + 1
                )));
            };

            let kind = match spec.kind.as_deref().map(str::trim) {
                Some(k) if k.eq_ignore_ascii_case("line") => SeriesKind::Line,
                _ => SeriesKind::Bar,
            };

            series.push(ResolvedSeries {
                name: series_name(block, idx, spec.name.as_deref()),
                kind,
                values,
            });
        }
    }

    if series.is_empty() || series.iter().all(|s| s.values.is_empty()) {
        return Err(ChartError::InsufficientData(
            "Chart has no data values".to_string(),
        ));
    }

    let mut categories: Vec<String> = if let Some(inline) = &block.x_axis {
        inline.iter().map(json_display).collect()
    } else if let Some(range) = &meta.category_range {
        sheet
            .extract_range_text(range)
            .map_err(ChartError::BadRange)?
    } else {
        Vec::new()
    };

    let longest = series.iter().map(|s| s.values.len()).max().unwrap_or(0);
    if categories.is_empty() {
        categories = (1..=longest).map(|i| i.to_string()).collect();
    }

    // Categories and values zip together; trim everything to the overlap
    let common = categories.len().min(longest);
    if common == 0 {
        return Err(ChartError::InsufficientData(
            "Chart has no categories".to_string(),
        ));
    }
    categories.truncate(common);
    for s in &mut series {
        s.values.truncate(common);
    }

    let colors = match &block.colors {
        Some(raw_colors) if !raw_colors.is_empty() => raw_colors
            .iter()
            .map(|c| parse_color(c))
            .collect::<Result<Vec<RGBColor>, ChartError>>()?,
        _ => DEFAULT_PALETTE.to_vec(),
    };

    Ok(ChartData {
        categories,
        series,
        colors,
    })
}

fn series_name(block: &SeriesBlock, idx: usize, explicit: Option<&str>) -> String {
    if let Some(name) = explicit {
        return name.to_string();
    }
    if let Some(labels) = &block.labels {
        if let Some(label) = labels.get(idx) {
            return label.clone();
        }
    }
    format!("Series {}", idx + 1)
}

fn fmt_value(value: f64, percent: bool) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    let body = if rounded.fract() == 0.0 && rounded.abs() < 1e15 {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    };
    if percent {
        format!("{}%", body)
    } else {
        body
    }
}

fn value_bounds(series: &[ResolvedSeries]) -> (f64, f64) {
    let mut min = 0.0f64;
    let mut max = 0.0f64;
    for s in series {
        for v in &s.values {
            min = min.min(*v);
            max = max.max(*v);
        }
    }
    if (max - min).abs() < f64::EPSILON {
        max = min + 1.0;
    }
    (min * 1.15, max * 1.15)
}

/// Generate a chart from one spreadsheet row
///
/// Parses the attributes, resolves the type (the Chart_Type column wins
/// over chart_meta.chart_type), resolves ranges, then renders the PNG and
/// the interactive HTML page.
///
/// # Arguments
/// * `sheet` - Ingested report data
/// * `chart_type_hint` - Chart_Type column value, if any
/// * `raw_attributes` - Chart_Attributes cell contents
/// * `width` - Canvas width from the app config
/// * `height` - Canvas height from the app config
///
/// # Returns
/// * `Result<ChartArtifacts, ChartError>` - Rendered artifacts or the
///   classified failure
///
/// # Examples
/// ```no_run
/// use reportgen::loader::load_report_data;
/// use reportgen::graph::generate_chart;
///
/// let sheet = load_report_data("data.xlsx").unwrap();
/// let attrs = sheet.chart_attr_map.get("section1_chart").unwrap();
/// let chart = generate_chart(&sheet, Some("column"), attrs, 1000, 600).unwrap();
/// std::fs::write("chart.png", &chart.png).unwrap();
/// ```
pub fn generate_chart(
    sheet: &ReportSheet,
    chart_type_hint: Option<&str>,
    raw_attributes: &str,
    width: u32,
    height: u32,
) -> Result<ChartArtifacts, ChartError> {
    let config = parse_chart_config(raw_attributes)?;

    let type_raw = chart_type_hint
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| config.chart_meta.chart_type.clone())
        .ok_or_else(|| ChartError::UnsupportedType("(none specified)".to_string()))?;

    let kind = ChartKind::parse(&type_raw)
        .ok_or_else(|| ChartError::UnsupportedType(type_raw.clone()))?;

    let style = resolve_style(&config.chart_meta, width, height)?;
    let data = resolve_chart_data(sheet, &config)?;

    validate_for_kind(kind, &data)?;

    let png = render_chart_png(kind, &data, &style)?;
    let html = render_chart_html(kind, &data, &style)?;

    Ok(ChartArtifacts {
        png,
        html,
        data_points: data.data_points(),
    })
}

fn validate_for_kind(kind: ChartKind, data: &ChartData) -> Result<(), ChartError> {
    match kind {
        ChartKind::Pie => {
            let total: f64 = data.series[0].values.iter().sum();
            if total <= 0.0 {
                return Err(ChartError::InsufficientData(
                    "Pie values must sum to a positive total".to_string(),
                ));
            }
        }
        ChartKind::Scatter3d => {
            if data.series.len() < 2 {
                return Err(ChartError::InsufficientData(
                    "3D scatter needs two value series".to_string(),
                ));
            }
        }
        ChartKind::Histogram => {
            if data.series[0].values.len() < 2 {
                return Err(ChartError::InsufficientData(
                    "Histogram needs at least two values".to_string(),
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Render a chart to PNG bytes
///
/// Draws into a temporary file so concurrent renders never collide, then
/// reads the bytes back; the file is removed when the handle drops.
pub fn render_chart_png(
    kind: ChartKind,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<Vec<u8>, ChartError> {
    let file = tempfile::Builder::new()
        .prefix("chart")
        .suffix(".png")
        .tempfile()
        .map_err(|e| ChartError::RenderFailed(e.to_string()))?;
    let path = file.path().to_path_buf();

    {
        let root = BitMapBackend::new(&path, (style.width, style.height)).into_drawing_area();
        draw_chart(&root, kind, data, style)
            .map_err(|e| ChartError::RenderFailed(e.to_string()))?;
        root.present()
            .map_err(|e| ChartError::RenderFailed(e.to_string()))?;
    }

    std::fs::read(&path).map_err(|e| ChartError::RenderFailed(e.to_string()))
}

/// Render a chart as a standalone HTML page around an SVG
pub fn render_chart_html(
    kind: ChartKind,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<String, ChartError> {
    let mut svg = String::new();
    {
        let root =
            SVGBackend::with_string(&mut svg, (style.width, style.height)).into_drawing_area();
        draw_chart(&root, kind, data, style)
            .map_err(|e| ChartError::RenderFailed(e.to_string()))?;
        root.present()
            .map_err(|e| ChartError::RenderFailed(e.to_string()))?;
    }
    Ok(wrap_interactive_html(&style.title, &svg))
}

/// Wrap an SVG render into a self-contained HTML page
pub fn wrap_interactive_html(title: &str, svg: &str) -> String {
    let page_title = if title.is_empty() { "Chart" } else { title };
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n\
         <style>\nbody {{ margin: 0; display: flex; justify-content: center; \
         font-family: sans-serif; }}\nsvg {{ max-width: 100%; height: auto; }}\n</style>\n\
         </head>\n<body>\n{}\n</body>\n</html>\n",
        page_title, svg
    )
}

fn draw_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    kind: ChartKind,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    match kind {
        ChartKind::Column => draw_column_chart(root, data, style, false),
        ChartKind::StackedColumn => draw_column_chart(root, data, style, true),
        ChartKind::Bar => draw_bar_chart(root, data, style),
        ChartKind::Line => draw_line_chart(root, data, style),
        ChartKind::Combo => draw_combo_chart(root, data, style),
        ChartKind::Area => draw_area_chart(root, data, style),
        ChartKind::Pie => draw_pie_chart(root, data, style),
        ChartKind::Scatter => draw_scatter_chart(root, data, style),
        ChartKind::Bubble => draw_bubble_chart(root, data, style),
        ChartKind::Histogram => draw_histogram_chart(root, data, style),
        ChartKind::Box => draw_box_chart(root, data, style),
        ChartKind::Heatmap => draw_heatmap_chart(root, data, style),
        ChartKind::Scatter3d => draw_scatter3d_chart(root, data, style),
        ChartKind::Waterfall => draw_waterfall_chart(root, data, style),
        ChartKind::Funnel => draw_funnel_chart(root, data, style),
    }
}

/// Draw grouped or stacked vertical columns
///
/// # Arguments
/// * `root` - Drawing area to render into
/// * `data` - Resolved categories and series
/// * `style` - Resolved rendering options
/// * `stacked` - Stack series instead of grouping them side by side
pub fn draw_column_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    style: &ChartStyle,
    stacked: bool,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&style.chart_background)?;

    let n = data.categories.len();
    let (_, mut y_max) = value_bounds(&data.series);
    if stacked {
        let stack_max = (0..n)
            .map(|i| {
                data.series
                    .iter()
                    .map(|s| s.values.get(i).copied().unwrap_or(0.0))
                    .sum::<f64>()
            })
            .fold(0.0f64, f64::max);
        y_max = (stack_max * 1.15).max(1.0);
    }

    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, style.caption_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5f64..(n as f64 - 0.5), 0f64..y_max)?;

    if let Some(bg) = style.plot_background {
        chart.plotting_area().fill(&bg)?;
    }

    let categories = data.categories.clone();
    let category_fmt = move |x: &f64| {
        let rounded = x.round();
        if (x - rounded).abs() > 0.01 || rounded < 0.0 {
            return String::new();
        }
        categories.get(rounded as usize).cloned().unwrap_or_default()
    };

    let mut mesh = chart.configure_mesh();
    if !style.show_gridlines {
        mesh.disable_mesh();
    }
    mesh.x_desc(style.x_label.as_str())
        .y_desc(style.y_label.as_str())
        .x_labels(n.min(24))
        .x_label_formatter(&category_fmt)
        .axis_desc_style(style.label_font())
        .label_style(style.label_font())
        .draw()?;

    let series_count = data.series.len();
    let mut stack_base = vec![0.0f64; n];

    for (s_idx, series) in data.series.iter().enumerate() {
        let color = data.color_at(s_idx);

        let bars: Vec<Rectangle<(f64, f64)>> = series
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                if stacked {
                    let base = stack_base[i];
                    Rectangle::new(
                        [(i as f64 - 0.35, base), (i as f64 + 0.35, base + v)],
                        color.filled(),
                    )
                } else {
                    let bar_width = 0.8 / series_count as f64;
                    let x0 = i as f64 - 0.4 + s_idx as f64 * bar_width;
                    Rectangle::new([(x0, 0.0), (x0 + bar_width, *v)], color.filled())
                }
            })
            .collect();

        chart
            .draw_series(bars)?
            .label(series.name.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 4), (x + 10, y + 4)], color.filled()));

        if stacked {
            for (i, v) in series.values.iter().enumerate() {
                stack_base[i] += v;
            }
        }
    }

    if style.data_labels {
        let label_style = style.label_font().pos(Pos::new(HPos::Center, VPos::Bottom));
        if stacked {
            let labels: Vec<Text<(f64, f64), String>> = stack_base
                .iter()
                .enumerate()
                .map(|(i, top)| {
                    Text::new(
                        fmt_value(*top, style.percent_labels),
                        (i as f64, *top),
                        label_style.clone(),
                    )
                })
                .collect();
            chart.draw_series(labels)?;
        } else {
            for (s_idx, series) in data.series.iter().enumerate() {
                let bar_width = 0.8 / series_count as f64;
                let labels: Vec<Text<(f64, f64), String>> = series
                    .values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        let x = i as f64 - 0.4 + (s_idx as f64 + 0.5) * bar_width;
                        Text::new(
                            fmt_value(*v, style.percent_labels),
                            (x, *v),
                            label_style.clone(),
                        )
                    })
                    .collect();
                chart.draw_series(labels)?;
            }
        }
    }

    if style.show_legend && data.series.len() > 1 {
        chart
            .configure_series_labels()
            .position(style.legend_pos.to_plotters())
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(style.label_font())
            .draw()?;
    }

    Ok(())
}

/// Draw horizontal bars, one slot per category
pub fn draw_bar_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&style.chart_background)?;

    let n = data.categories.len();
    let (_, x_max) = value_bounds(&data.series);

    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, style.caption_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(90)
        .build_cartesian_2d(0f64..x_max, -0.5f64..(n as f64 - 0.5))?;

    if let Some(bg) = style.plot_background {
        chart.plotting_area().fill(&bg)?;
    }

    let categories = data.categories.clone();
    let category_fmt = move |y: &f64| {
        let rounded = y.round();
        if (y - rounded).abs() > 0.01 || rounded < 0.0 {
            return String::new();
        }
        categories.get(rounded as usize).cloned().unwrap_or_default()
    };

    let mut mesh = chart.configure_mesh();
    if !style.show_gridlines {
        mesh.disable_mesh();
    }
    mesh.x_desc(style.y_label.as_str())
        .y_desc(style.x_label.as_str())
        .y_labels(n.min(24))
        .y_label_formatter(&category_fmt)
        .axis_desc_style(style.label_font())
        .label_style(style.label_font())
        .draw()?;

    let series_count = data.series.len();
    for (s_idx, series) in data.series.iter().enumerate() {
        let color = data.color_at(s_idx);
        let bar_height = 0.8 / series_count as f64;

        let bars: Vec<Rectangle<(f64, f64)>> = series
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let y0 = i as f64 - 0.4 + s_idx as f64 * bar_height;
                Rectangle::new([(0.0, y0), (*v, y0 + bar_height)], color.filled())
            })
            .collect();

        chart
            .draw_series(bars)?
            .label(series.name.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 4), (x + 10, y + 4)], color.filled()));
    }

    if style.show_legend && data.series.len() > 1 {
        chart
            .configure_series_labels()
            .position(style.legend_pos.to_plotters())
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(style.label_font())
            .draw()?;
    }

    Ok(())
}

/// Draw one polyline per series with point markers
pub fn draw_line_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&style.chart_background)?;

    let n = data.categories.len();
    let (y_min, y_max) = value_bounds(&data.series);

    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, style.caption_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5f64..(n as f64 - 0.5), y_min.min(0.0)..y_max)?;

    if let Some(bg) = style.plot_background {
        chart.plotting_area().fill(&bg)?;
    }

    let categories = data.categories.clone();
    let category_fmt = move |x: &f64| {
        let rounded = x.round();
        if (x - rounded).abs() > 0.01 || rounded < 0.0 {
            return String::new();
        }
        categories.get(rounded as usize).cloned().unwrap_or_default()
    };

    let mut mesh = chart.configure_mesh();
    if !style.show_gridlines {
        mesh.disable_mesh();
    }
    mesh.x_desc(style.x_label.as_str())
        .y_desc(style.y_label.as_str())
        .x_labels(n.min(24))
        .x_label_formatter(&category_fmt)
        .axis_desc_style(style.label_font())
        .label_style(style.label_font())
        .draw()?;

    for (s_idx, series) in data.series.iter().enumerate() {
        let color = data.color_at(s_idx);
        let points: Vec<(f64, f64)> = series
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as f64, *v))
            .collect();

        chart
            .draw_series(LineSeries::new(points.clone(), color.stroke_width(2)).point_size(3))?
            .label(series.name.as_str())
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 14, y)], color.stroke_width(2))
            });

        if style.data_labels {
            let label_style = style.label_font().pos(Pos::new(HPos::Center, VPos::Bottom));
            let labels: Vec<Text<(f64, f64), String>> = points
                .iter()
                .map(|(x, y)| {
                    Text::new(
                        fmt_value(*y, style.percent_labels),
                        (*x, *y),
                        label_style.clone(),
                    )
                })
                .collect();
            chart.draw_series(labels)?;
        }
    }

    if style.show_legend && data.series.len() > 1 {
        chart
            .configure_series_labels()
            .position(style.legend_pos.to_plotters())
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(style.label_font())
            .draw()?;
    }

    Ok(())
}

/// Draw bars on the primary axis and line series on a secondary axis
///
/// Series marked `"type": "line"` go to the secondary axis; everything
/// else renders as grouped bars. A combo with no line series degrades to
/// plain columns on the primary axis.
pub fn draw_combo_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&style.chart_background)?;

    let n = data.categories.len();
    let bar_series: Vec<&ResolvedSeries> = data
        .series
        .iter()
        .filter(|s| s.kind == SeriesKind::Bar)
        .collect();
    let line_series: Vec<&ResolvedSeries> = data
        .series
        .iter()
        .filter(|s| s.kind == SeriesKind::Line)
        .collect();

    let primary_max = bar_series
        .iter()
        .flat_map(|s| s.values.iter())
        .fold(0.0f64, |acc, v| acc.max(*v))
        * 1.15;
    let primary_max = if primary_max <= 0.0 { 1.0 } else { primary_max };
    let secondary_max = line_series
        .iter()
        .flat_map(|s| s.values.iter())
        .fold(0.0f64, |acc, v| acc.max(*v))
        * 1.15;
    let secondary_max = if secondary_max <= 0.0 { 1.0 } else { secondary_max };

    let x_range = -0.5f64..(n as f64 - 0.5);
    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, style.caption_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .right_y_label_area_size(50)
        .build_cartesian_2d(x_range.clone(), 0f64..primary_max)?
        .set_secondary_coord(x_range, 0f64..secondary_max);

    if let Some(bg) = style.plot_background {
        chart.plotting_area().fill(&bg)?;
    }

    let categories = data.categories.clone();
    let category_fmt = move |x: &f64| {
        let rounded = x.round();
        if (x - rounded).abs() > 0.01 || rounded < 0.0 {
            return String::new();
        }
        categories.get(rounded as usize).cloned().unwrap_or_default()
    };

    let mut mesh = chart.configure_mesh();
    if !style.show_gridlines {
        mesh.disable_mesh();
    }
    mesh.x_desc(style.x_label.as_str())
        .y_desc(style.y_label.as_str())
        .x_labels(n.min(24))
        .x_label_formatter(&category_fmt)
        .axis_desc_style(style.label_font())
        .label_style(style.label_font())
        .draw()?;

    chart
        .configure_secondary_axes()
        .y_desc(style.secondary_y_label.as_str())
        .axis_desc_style(style.label_font())
        .label_style(style.label_font())
        .draw()?;

    let bar_count = bar_series.len().max(1);
    for (b_idx, series) in bar_series.iter().enumerate() {
        let color = data.color_at(b_idx);
        let bar_width = 0.8 / bar_count as f64;

        let bars: Vec<Rectangle<(f64, f64)>> = series
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let x0 = i as f64 - 0.4 + b_idx as f64 * bar_width;
                Rectangle::new([(x0, 0.0), (x0 + bar_width, *v)], color.filled())
            })
            .collect();

        chart
            .draw_series(bars)?
            .label(series.name.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 4), (x + 10, y + 4)], color.filled()));
    }

    for (l_idx, series) in line_series.iter().enumerate() {
        let color = data.color_at(bar_series.len() + l_idx);
        let points: Vec<(f64, f64)> = series
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as f64, *v))
            .collect();

        chart
            .draw_secondary_series(LineSeries::new(points, color.stroke_width(2)).point_size(3))?
            .label(series.name.as_str())
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 14, y)], color.stroke_width(2))
            });
    }

    if style.show_legend {
        chart
            .configure_series_labels()
            .position(style.legend_pos.to_plotters())
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(style.label_font())
            .draw()?;
    }

    Ok(())
}

/// Draw filled area series
pub fn draw_area_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&style.chart_background)?;

    let n = data.categories.len();
    let (y_min, y_max) = value_bounds(&data.series);

    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, style.caption_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5f64..(n as f64 - 0.5), y_min.min(0.0)..y_max)?;

    if let Some(bg) = style.plot_background {
        chart.plotting_area().fill(&bg)?;
    }

    let categories = data.categories.clone();
    let category_fmt = move |x: &f64| {
        let rounded = x.round();
        if (x - rounded).abs() > 0.01 || rounded < 0.0 {
            return String::new();
        }
        categories.get(rounded as usize).cloned().unwrap_or_default()
    };

    let mut mesh = chart.configure_mesh();
    if !style.show_gridlines {
        mesh.disable_mesh();
    }
    mesh.x_desc(style.x_label.as_str())
        .y_desc(style.y_label.as_str())
        .x_labels(n.min(24))
        .x_label_formatter(&category_fmt)
        .axis_desc_style(style.label_font())
        .label_style(style.label_font())
        .draw()?;

    for (s_idx, series) in data.series.iter().enumerate() {
        let color = data.color_at(s_idx);
        let points: Vec<(f64, f64)> = series
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as f64, *v))
            .collect();

        chart
            .draw_series(
                AreaSeries::new(points, 0.0, color.mix(0.3)).border_style(color.stroke_width(2)),
            )?
            .label(series.name.as_str())
            .legend(move |(x, y)| {
                Rectangle::new([(x, y - 4), (x + 10, y + 4)], color.mix(0.5).filled())
            });
    }

    if style.show_legend && data.series.len() > 1 {
        chart
            .configure_series_labels()
            .position(style.legend_pos.to_plotters())
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(style.label_font())
            .draw()?;
    }

    Ok(())
}

/// Draw a pie from the first series, slices labelled at their bisector
///
/// When `expanded_segment` names a slice it is pulled out along its
/// bisector, the pulled-pie look the templates ask for.
pub fn draw_pie_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    use std::f64::consts::{FRAC_PI_2, TAU};

    root.fill(&style.chart_background)?;

    let values = &data.series[0].values;
    let total: f64 = values.iter().sum();

    let expanded = style.expanded_segment.as_ref().and_then(|slice| match slice {
        SliceRef::Index(i) => Some(*i),
        SliceRef::Label(name) => data.categories.iter().position(|c| c == name),
    });

    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, style.caption_font())
        .margin(10)
        .build_cartesian_2d(-1.5f64..1.5f64, -1.25f64..1.25f64)?;

    let label_style = style.label_font().pos(Pos::new(HPos::Center, VPos::Center));
    let radius = 0.85f64;
    let mut angle = FRAC_PI_2;

    for (i, value) in values.iter().enumerate() {
        let fraction = value / total;
        let start = angle;
        let end = angle + fraction * TAU;
        angle = end;

        let bisector = (start + end) / 2.0;
        let (ox, oy) = if expanded == Some(i) {
            (0.12 * bisector.cos(), 0.12 * bisector.sin())
        } else {
            (0.0, 0.0)
        };

        let steps = ((fraction * 120.0).ceil() as usize).max(2);
        let mut points = Vec::with_capacity(steps + 2);
        points.push((ox, oy));
        for step in 0..=steps {
            let a = start + (end - start) * step as f64 / steps as f64;
            points.push((ox + radius * a.cos(), oy + radius * a.sin()));
        }

        let color = data.color_at(i);
        chart.draw_series(std::iter::once(Polygon::new(points, color.filled())))?;

        let name = data.categories.get(i).cloned().unwrap_or_default();
        let label = if style.data_labels {
            format!("{} ({})", name, fmt_value(fraction * 100.0, true))
        } else {
            name
        };
        let label_r = radius + 0.22 + if expanded == Some(i) { 0.12 } else { 0.0 };
        chart.draw_series(std::iter::once(Text::new(
            label,
            (label_r * bisector.cos(), label_r * bisector.sin()),
            label_style.clone(),
        )))?;
    }

    Ok(())
}

/// Draw scatter points; numeric category labels become real x positions
pub fn draw_scatter_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&style.chart_background)?;

    let xs = numeric_categories(&data.categories);
    let x_min = xs.iter().cloned().fold(f64::INFINITY, f64::min);
    let x_max = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let x_pad = ((x_max - x_min) * 0.05).max(0.5);
    let (y_min, y_max) = value_bounds(&data.series);

    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, style.caption_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d((x_min - x_pad)..(x_max + x_pad), y_min.min(0.0)..y_max)?;

    if let Some(bg) = style.plot_background {
        chart.plotting_area().fill(&bg)?;
    }

    let mut mesh = chart.configure_mesh();
    if !style.show_gridlines {
        mesh.disable_mesh();
    }
    mesh.x_desc(style.x_label.as_str())
        .y_desc(style.y_label.as_str())
        .axis_desc_style(style.label_font())
        .label_style(style.label_font())
        .draw()?;

    for (s_idx, series) in data.series.iter().enumerate() {
        let color = data.color_at(s_idx);
        let points: Vec<Circle<(f64, f64), u32>> = series
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| Circle::new((xs[i], *v), 4u32, color.filled()))
            .collect();

        chart
            .draw_series(points)?
            .label(series.name.as_str())
            .legend(move |(x, y)| Circle::new((x + 7, y), 4u32, color.filled()));
    }

    if style.show_legend && data.series.len() > 1 {
        chart
            .configure_series_labels()
            .position(style.legend_pos.to_plotters())
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(style.label_font())
            .draw()?;
    }

    Ok(())
}

/// Draw bubbles: first series is y, second series scales the radius
pub fn draw_bubble_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&style.chart_background)?;

    let xs = numeric_categories(&data.categories);
    let x_min = xs.iter().cloned().fold(f64::INFINITY, f64::min);
    let x_max = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let x_pad = ((x_max - x_min) * 0.08).max(0.5);

    let ys = &data.series[0].values;
    let sizes = data.series.get(1).map(|s| s.values.as_slice());
    let (y_min, y_max) = value_bounds(&data.series[0..1]);

    let size_max = sizes
        .map(|s| s.iter().cloned().fold(0.0f64, f64::max))
        .unwrap_or(0.0);

    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, style.caption_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d((x_min - x_pad)..(x_max + x_pad), y_min.min(0.0)..(y_max * 1.05))?;

    if let Some(bg) = style.plot_background {
        chart.plotting_area().fill(&bg)?;
    }

    let mut mesh = chart.configure_mesh();
    if !style.show_gridlines {
        mesh.disable_mesh();
    }
    mesh.x_desc(style.x_label.as_str())
        .y_desc(style.y_label.as_str())
        .axis_desc_style(style.label_font())
        .label_style(style.label_font())
        .draw()?;

    let color = data.color_at(0);
    let bubbles: Vec<Circle<(f64, f64), u32>> = ys
        .iter()
        .enumerate()
        .map(|(i, y)| {
            let radius = match sizes {
                Some(s) if size_max > 0.0 => {
                    let scaled = s.get(i).copied().unwrap_or(0.0) / size_max;
                    (4.0 + scaled * 18.0) as u32
                }
                _ => 8u32,
            };
            Circle::new((xs[i], *y), radius, color.mix(0.5).filled())
        })
        .collect();
    chart.draw_series(bubbles)?;

    Ok(())
}

/// Draw a histogram of the first series over ten equal-width bins
pub fn draw_histogram_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&style.chart_background)?;

    let values = &data.series[0].values;
    let v_min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let v_max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let span = if (v_max - v_min).abs() < f64::EPSILON {
        1.0
    } else {
        v_max - v_min
    };

    let bins = 10usize;
    let bin_width = span / bins as f64;
    let mut counts = vec![0usize; bins];
    for v in values {
        let idx = (((v - v_min) / bin_width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    let count_max = *counts.iter().max().unwrap_or(&1) as f64;

    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, style.caption_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d(v_min..(v_min + span), 0f64..(count_max * 1.15))?;

    if let Some(bg) = style.plot_background {
        chart.plotting_area().fill(&bg)?;
    }

    let mut mesh = chart.configure_mesh();
    if !style.show_gridlines {
        mesh.disable_mesh();
    }
    mesh.x_desc(style.x_label.as_str())
        .y_desc(if style.y_label.is_empty() {
            "Count"
        } else {
            style.y_label.as_str()
        })
        .axis_desc_style(style.label_font())
        .label_style(style.label_font())
        .draw()?;

    let color = data.color_at(0);
    let bars: Vec<Rectangle<(f64, f64)>> = counts
        .iter()
        .enumerate()
        .map(|(i, count)| {
            let x0 = v_min + i as f64 * bin_width;
            Rectangle::new(
                [(x0, 0.0), (x0 + bin_width, *count as f64)],
                color.mix(0.8).filled(),
            )
        })
        .collect();
    chart.draw_series(bars)?;

    Ok(())
}

/// Draw one box-and-whisker per series
pub fn draw_box_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&style.chart_background)?;

    let n = data.series.len();
    let (y_min, y_max) = value_bounds(&data.series);

    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, style.caption_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d(
            -0.5f64..(n as f64 - 0.5),
            (y_min.min(0.0) as f32)..(y_max as f32),
        )?;

    if let Some(bg) = style.plot_background {
        chart.plotting_area().fill(&bg)?;
    }

    let names: Vec<String> = data.series.iter().map(|s| s.name.clone()).collect();
    let name_fmt = move |x: &f64| {
        let rounded = x.round();
        if (x - rounded).abs() > 0.01 || rounded < 0.0 {
            return String::new();
        }
        names.get(rounded as usize).cloned().unwrap_or_default()
    };

    let mut mesh = chart.configure_mesh();
    if !style.show_gridlines {
        mesh.disable_mesh();
    }
    mesh.x_desc(style.x_label.as_str())
        .y_desc(style.y_label.as_str())
        .x_labels(n.min(24))
        .x_label_formatter(&name_fmt)
        .axis_desc_style(style.label_font())
        .label_style(style.label_font())
        .draw()?;

    for (s_idx, series) in data.series.iter().enumerate() {
        let color = data.color_at(s_idx);
        let quartiles = Quartiles::new(&series.values);
        chart.draw_series(std::iter::once(
            Boxplot::new_vertical(s_idx as f64, &quartiles)
                .width(24)
                .style(color),
        ))?;
    }

    Ok(())
}

/// Draw a heatmap with series as rows and categories as columns
pub fn draw_heatmap_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&style.chart_background)?;

    let cols = data.categories.len();
    let rows = data.series.len();

    let mut v_min = f64::INFINITY;
    let mut v_max = f64::NEG_INFINITY;
    for series in &data.series {
        for v in &series.values {
            v_min = v_min.min(*v);
            v_max = v_max.max(*v);
        }
    }
    let span = if (v_max - v_min).abs() < f64::EPSILON {
        1.0
    } else {
        v_max - v_min
    };

    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, style.caption_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(90)
        .build_cartesian_2d(-0.5f64..(cols as f64 - 0.5), -0.5f64..(rows as f64 - 0.5))?;

    let categories = data.categories.clone();
    let col_fmt = move |x: &f64| {
        let rounded = x.round();
        if (x - rounded).abs() > 0.01 || rounded < 0.0 {
            return String::new();
        }
        categories.get(rounded as usize).cloned().unwrap_or_default()
    };
    let names: Vec<String> = data.series.iter().map(|s| s.name.clone()).collect();
    let row_fmt = move |y: &f64| {
        let rounded = y.round();
        if (y - rounded).abs() > 0.01 || rounded < 0.0 {
            return String::new();
        }
        names.get(rounded as usize).cloned().unwrap_or_default()
    };

    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(cols.min(24))
        .y_labels(rows.min(24))
        .x_label_formatter(&col_fmt)
        .y_label_formatter(&row_fmt)
        .axis_desc_style(style.label_font())
        .label_style(style.label_font())
        .draw()?;

    let base = data.color_at(0);
    let label_style = style.label_font().pos(Pos::new(HPos::Center, VPos::Center));

    for (row, series) in data.series.iter().enumerate() {
        for (col, v) in series.values.iter().enumerate() {
            let t = ((v - v_min) / span).clamp(0.0, 1.0);
            let cell = RGBColor(
                (255.0 + (base.0 as f64 - 255.0) * t) as u8,
                (255.0 + (base.1 as f64 - 255.0) * t) as u8,
                (255.0 + (base.2 as f64 - 255.0) * t) as u8,
            );
            chart.draw_series(std::iter::once(Rectangle::new(
                [
                    (col as f64 - 0.5, row as f64 - 0.5),
                    (col as f64 + 0.5, row as f64 + 0.5),
                ],
                cell.filled(),
            )))?;

            if style.data_labels {
                chart.draw_series(std::iter::once(Text::new(
                    fmt_value(*v, style.percent_labels),
                    (col as f64, row as f64),
                    label_style.clone(),
                )))?;
            }
        }
    }

    Ok(())
}

/// Draw a 3D scatter: categories as x, first series y, second series z
pub fn draw_scatter3d_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&style.chart_background)?;

    let xs = numeric_categories(&data.categories);
    let ys = &data.series[0].values;
    let zs = &data.series[1].values;

    let x_min = xs.iter().cloned().fold(f64::INFINITY, f64::min);
    let x_max = xs
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max)
        .max(x_min + 1.0);
    let y_max = ys.iter().cloned().fold(0.0f64, f64::max).max(1.0);
    let z_max = zs.iter().cloned().fold(0.0f64, f64::max).max(1.0);

    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, style.caption_font())
        .margin(20)
        .build_cartesian_3d(x_min..x_max, 0f64..(y_max * 1.1), 0f64..(z_max * 1.1))?;

    chart.configure_axes().label_style(style.label_font()).draw()?;

    let color = data.color_at(0);
    let count = xs.len().min(ys.len()).min(zs.len());
    let points: Vec<Circle<(f64, f64, f64), u32>> = (0..count)
        .map(|i| Circle::new((xs[i], ys[i], zs[i]), 4u32, color.filled()))
        .collect();
    chart.draw_series(points)?;

    Ok(())
}

/// Draw a waterfall: a running total with gains and losses colored apart
pub fn draw_waterfall_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&style.chart_background)?;

    let values = &data.series[0].values;
    let n = values.len();

    let mut running = 0.0f64;
    let mut low = 0.0f64;
    let mut high = 0.0f64;
    let mut segments = Vec::with_capacity(n);
    for v in values {
        let start = running;
        running += v;
        segments.push((start, running, *v >= 0.0));
        low = low.min(running.min(start));
        high = high.max(running.max(start));
    }
    if (high - low).abs() < f64::EPSILON {
        high = low + 1.0;
    }

    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, style.caption_font())
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5f64..(n as f64 - 0.5), (low * 1.15)..(high * 1.15))?;

    if let Some(bg) = style.plot_background {
        chart.plotting_area().fill(&bg)?;
    }

    let categories = data.categories.clone();
    let category_fmt = move |x: &f64| {
        let rounded = x.round();
        if (x - rounded).abs() > 0.01 || rounded < 0.0 {
            return String::new();
        }
        categories.get(rounded as usize).cloned().unwrap_or_default()
    };

    let mut mesh = chart.configure_mesh();
    if !style.show_gridlines {
        mesh.disable_mesh();
    }
    mesh.x_desc(style.x_label.as_str())
        .y_desc(style.y_label.as_str())
        .x_labels(n.min(24))
        .x_label_formatter(&category_fmt)
        .axis_desc_style(style.label_font())
        .label_style(style.label_font())
        .draw()?;

    let bars: Vec<Rectangle<(f64, f64)>> = segments
        .iter()
        .enumerate()
        .map(|(i, (start, end, gain))| {
            let color = if *gain { WATERFALL_GAIN } else { WATERFALL_LOSS };
            Rectangle::new(
                [(i as f64 - 0.35, *start), (i as f64 + 0.35, *end)],
                color.filled(),
            )
        })
        .collect();
    chart.draw_series(bars)?;

    Ok(())
}

/// Draw a funnel: one centered band per stage, widths scaled to the max
pub fn draw_funnel_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    data: &ChartData,
    style: &ChartStyle,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    root.fill(&style.chart_background)?;

    let values = &data.series[0].values;
    let n = values.len();
    let v_max = values.iter().cloned().fold(0.0f64, f64::max).max(1.0);

    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, style.caption_font())
        .margin(10)
        .build_cartesian_2d(-1.2f64..1.2f64, 0f64..(n as f64))?;

    let label_style = style.label_font().pos(Pos::new(HPos::Center, VPos::Center));

    for (i, v) in values.iter().enumerate() {
        // Stage 0 renders at the top, tapering toward the next stage
        let top_half = (v / v_max).max(0.02);
        let next_half = values
            .get(i + 1)
            .map(|nv| (nv / v_max).max(0.02))
            .unwrap_or(top_half * 0.6);

        let y_top = (n - i) as f64 - 0.08;
        let y_bottom = (n - i - 1) as f64 + 0.08;

        let color = data.color_at(i);
        chart.draw_series(std::iter::once(Polygon::new(
            vec![
                (-top_half, y_top),
                (top_half, y_top),
                (next_half, y_bottom),
                (-next_half, y_bottom),
            ],
            color.filled(),
        )))?;

        let name = data.categories.get(i).cloned().unwrap_or_default();
        let label = format!("{} ({})", name, fmt_value(*v, style.percent_labels));
        chart.draw_series(std::iter::once(Text::new(
            label,
            (0.0, (y_top + y_bottom) / 2.0),
            label_style.clone(),
        )))?;
    }

    Ok(())
}

fn numeric_categories(categories: &[String]) -> Vec<f64> {
    let parsed: Option<Vec<f64>> = categories
        .iter()
        .map(|c| c.trim().parse::<f64>().ok())
        .collect();
    parsed.unwrap_or_else(|| (0..categories.len()).map(|i| i as f64).collect())
}
