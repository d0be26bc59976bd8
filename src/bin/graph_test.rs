#![cfg(not(tarpaulin_include))]

use reportgen::graph::{
    ChartError, ChartKind, LegendPos, SeriesKind, SliceRef, generate_chart, parse_chart_config,
    resolve_chart_data, resolve_style, strip_json_comments, wrap_interactive_html,
};
use reportgen::loader::{CellValue, ReportSheet};

// Helper function to build an in-memory sheet with three numeric columns
// (F2:F4 = 10/30/50, G2:G4 = 20/40/60, H2:H4 = 5/15/25)
fn sample_sheet() -> ReportSheet {
    let headers = vec![
        "Text_Tag",
        "Text",
        "Chart_Tag",
        "Chart_Type",
        "Chart_Attributes",
        "Chart_Data_Y2020",
        "Chart_Data_Y2021",
        "Growth_Y2021",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    let row = |f: f64, g: f64, h: f64| {
        vec![
            CellValue::Empty,
            CellValue::Empty,
            CellValue::Empty,
            CellValue::Empty,
            CellValue::Empty,
            CellValue::Number(f),
            CellValue::Number(g),
            CellValue::Number(h),
        ]
    };

    let grid = vec![
        row(10.0, 20.0, 5.0),
        row(30.0, 40.0, 15.0),
        row(50.0, 60.0, 25.0),
    ];
    ReportSheet::from_rows(headers, grid).unwrap()
}

// Test stripping of comments from annotated configs
fn test_comment_stripping() {
    println!("\n====== Testing comment_stripping ======");

    let raw = "{\n  // annotated by the template author\n  \"a\": 1, /* block */ \"b\": 2\n}";
    let cleaned = strip_json_comments(raw);
    assert!(!cleaned.contains("annotated"));
    assert!(!cleaned.contains("block"));
    serde_json::from_str::<serde_json::Value>(&cleaned).unwrap();
    println!("✓ Line and block comments removed, JSON still parses");
}

// Test parsing of Chart_Attributes cells
fn test_config_parsing() {
    println!("\n====== Testing config_parsing ======");

    let config = parse_chart_config(
        "{\n  \"chart_meta\": { \"chart_type\": \"line\" }, // the type\n  \
         \"series\": { \"data\": [ { \"values\": [1, 2] } ] }\n}",
    )
    .unwrap();
    assert_eq!(config.chart_meta.chart_type.as_deref(), Some("line"));
    assert_eq!(config.series.data.len(), 1);
    println!("✓ Annotated config parsed");

    let config = parse_chart_config("{}").unwrap();
    assert!(config.chart_meta.chart_type.is_none());
    assert!(config.series.data.is_empty());
    println!("✓ Empty object yields an all-default config");

    let err = parse_chart_config("{ not json").unwrap_err();
    assert_eq!(err.error_type(), "invalid_json");
    assert!(
        err.to_string()
            .starts_with("Chart configuration is not valid JSON")
    );
    println!("✓ Invalid JSON classified as invalid_json");
}

// Test chart type aliases and labels
fn test_chart_kind_parsing() {
    println!("\n====== Testing chart_kind_parsing ======");

    assert_eq!(ChartKind::parse("column"), Some(ChartKind::Column));
    assert_eq!(ChartKind::parse("Stacked Bar"), Some(ChartKind::StackedColumn));
    assert_eq!(ChartKind::parse("bar_line"), Some(ChartKind::Combo));
    assert_eq!(ChartKind::parse("3D Scatter"), Some(ChartKind::Scatter3d));
    assert_eq!(ChartKind::parse("heat-map"), Some(ChartKind::Heatmap));
    assert_eq!(ChartKind::parse("expanded_pie"), Some(ChartKind::Pie));
    assert_eq!(ChartKind::parse("  BoxPlot "), Some(ChartKind::Box));
    assert_eq!(ChartKind::parse("sunburst"), None);
    println!("✓ Aliases normalize case, spaces and dashes");

    assert_eq!(ChartKind::Column.label(), "column");
    assert_eq!(ChartKind::Scatter3d.label(), "scatter3d");
    println!("✓ Labels are canonical lowercase names");
}

// Test resolution of chart_meta into rendering options
fn test_style_resolution() {
    println!("\n====== Testing style_resolution ======");

    let config = parse_chart_config("{}").unwrap();
    let style = resolve_style(&config.chart_meta, 1000, 600).unwrap();
    assert_eq!(style.width, 1000);
    assert_eq!(style.height, 600);
    assert_eq!(style.title, "");
    assert!(style.show_legend);
    assert!(!style.data_labels);
    assert!(!style.percent_labels);
    assert_eq!(style.font_size, 15);
    assert_eq!(style.legend_pos, LegendPos::UpperRight);
    assert!(style.expanded_segment.is_none());
    println!("✓ Defaults applied when chart_meta is empty");

    let config = parse_chart_config(
        r#"{ "chart_meta": { "chart_title": "Revenue", "value_format": "0.0%",
             "legend_position": "bottom-left", "expanded_segment": "2", "font_size": 4 } }"#,
    )
    .unwrap();
    let style = resolve_style(&config.chart_meta, 800, 480).unwrap();
    assert_eq!(style.title, "Revenue");
    assert!(style.percent_labels);
    assert_eq!(style.legend_pos, LegendPos::LowerLeft);
    assert_eq!(style.expanded_segment, Some(SliceRef::Index(2)));
    assert_eq!(style.font_size, 6);
    println!("✓ Title, percent format, legend position and segment resolved");

    let config = parse_chart_config(
        r#"{ "chart_meta": { "expanded_segment": "Consumer Electronics" } }"#,
    )
    .unwrap();
    let style = resolve_style(&config.chart_meta, 100, 100).unwrap();
    assert_eq!(
        style.expanded_segment,
        Some(SliceRef::Label("Consumer Electronics".to_string()))
    );
    println!("✓ Named slice kept as a label selector");

    let config =
        parse_chart_config(r##"{ "chart_meta": { "chart_background": "#zzzzzz" } }"##).unwrap();
    let err = resolve_style(&config.chart_meta, 100, 100).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Malformed attribute: Invalid color '#zzzzzz', expected #rrggbb"
    );
    println!("✓ Bad hex color rejected");

    let config = parse_chart_config(r#"{ "chart_meta": { "expanded_segment": true } }"#).unwrap();
    let err = resolve_style(&config.chart_meta, 100, 100).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Malformed attribute: expanded_segment must be a slice index or label"
    );
    println!("✓ Unusable expanded_segment rejected");

    let config = parse_chart_config(r#"{ "chart_meta": { "legend_position": "under" } }"#).unwrap();
    let err = resolve_style(&config.chart_meta, 100, 100).unwrap_err();
    assert_eq!(err.error_type(), "malformed_attribute");
    println!("✓ Unknown legend position rejected");
}

// Test resolving configs against the data grid
fn test_data_resolution() {
    println!("\n====== Testing data_resolution ======");
    let sheet = sample_sheet();

    let config =
        parse_chart_config(r#"{ "chart_meta": { "value_range": ["F2:F4", "G2:G4"] } }"#).unwrap();
    let data = resolve_chart_data(&sheet, &config).unwrap();
    assert_eq!(data.series.len(), 2);
    assert_eq!(data.series[0].values, vec![10.0, 30.0, 50.0]);
    assert_eq!(data.series[1].values, vec![20.0, 40.0, 60.0]);
    assert_eq!(data.series[0].name, "Series 1");
    assert_eq!(data.categories, vec!["1", "2", "3"]);
    println!("✓ Shared ranges become series with positional categories");

    let config = parse_chart_config(
        r#"{ "chart_meta": { "chart_type": "combo" },
             "series": { "x_axis": ["Q1", "Q2", "Q3"], "labels": ["Plan"],
                         "data": [ { "type": "bar", "values": [5, "7", true] },
                                   { "name": "Actual", "type": "line", "value_range": "H2:H4" } ] } }"#,
    )
    .unwrap();
    let data = resolve_chart_data(&sheet, &config).unwrap();
    assert_eq!(data.series[0].values, vec![5.0, 7.0, 1.0]);
    assert_eq!(data.series[0].kind, SeriesKind::Bar);
    assert_eq!(data.series[0].name, "Plan");
    assert_eq!(data.series[1].values, vec![5.0, 15.0, 25.0]);
    assert_eq!(data.series[1].kind, SeriesKind::Line);
    assert_eq!(data.series[1].name, "Actual");
    assert_eq!(data.categories, vec!["Q1", "Q2", "Q3"]);
    assert_eq!(data.data_points(), 6);
    println!("✓ Inline values coerced, per-series ranges and names resolved");

    let config = parse_chart_config(
        r#"{ "series": { "x_axis": ["A", "B"],
                         "data": [ { "values": [1, 2, 3, 4], "value_range": "F2:F4" } ] } }"#,
    )
    .unwrap();
    let data = resolve_chart_data(&sheet, &config).unwrap();
    assert_eq!(data.series[0].values, vec![1.0, 2.0]);
    assert_eq!(data.categories.len(), 2);
    println!("✓ Inline values win over ranges; series trimmed to the categories");

    let config = parse_chart_config(
        r##"{ "chart_meta": { "value_range": "F2:F4" }, "series": { "colors": ["#ff0000"] } }"##,
    )
    .unwrap();
    let data = resolve_chart_data(&sheet, &config).unwrap();
    assert_eq!(data.colors.len(), 1);
    assert_eq!(
        (data.colors[0].0, data.colors[0].1, data.colors[0].2),
        (255, 0, 0)
    );
    let wrapped = data.color_at(3);
    assert_eq!((wrapped.0, wrapped.1, wrapped.2), (255, 0, 0));
    println!("✓ Custom palette parsed and cycled");
}

// Test data resolution failure classification
fn test_resolution_errors() {
    println!("\n====== Testing resolution_errors ======");
    let sheet = sample_sheet();

    let config = parse_chart_config(r#"{ "chart_meta": { "value_range": "F2:F99" } }"#).unwrap();
    let err = resolve_chart_data(&sheet, &config).unwrap_err();
    assert_eq!(
        err,
        ChartError::BadRange("Range F2:F99 is out of bounds".to_string())
    );
    println!("✓ Unresolvable range classified as bad_range");

    let config = parse_chart_config(r#"{ "series": { "data": [ {} ] } }"#).unwrap();
    let err = resolve_chart_data(&sheet, &config).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Insufficient data: Series 1 has neither values nor a cell range"
    );
    println!("✓ Series without a source rejected");

    let config = parse_chart_config(r#"{ "series": { "data": [ { "values": [] } ] } }"#).unwrap();
    let err = resolve_chart_data(&sheet, &config).unwrap_err();
    assert_eq!(err.to_string(), "Insufficient data: Chart has no data values");
    println!("✓ All-empty series rejected");

    let config =
        parse_chart_config(r#"{ "series": { "data": [ { "values": ["ten"] } ] } }"#).unwrap();
    let err = resolve_chart_data(&sheet, &config).unwrap_err();
    assert_eq!(err.error_type(), "malformed_attribute");
    println!("✓ Non-numeric inline values rejected");
}

// Test PNG and HTML rendering across every chart shape
fn test_generate_all_kinds() {
    println!("\n====== Testing generate_all_kinds ======");
    let sheet = sample_sheet();

    let kinds = [
        "column",
        "bar",
        "stacked_column",
        "line",
        "combo",
        "area",
        "pie",
        "scatter",
        "bubble",
        "histogram",
        "box",
        "heatmap",
        "scatter3d",
        "waterfall",
        "funnel",
    ];

    for kind in kinds {
        let config = format!(
            "{{ \"chart_meta\": {{ \"chart_type\": \"{}\", \"chart_title\": \"Demo\" }}, \
               \"series\": {{ \"x_axis\": [\"A\", \"B\", \"C\"], \
                              \"data\": [ {{ \"values\": [10, 20, 30] }}, \
                                          {{ \"values\": [5, 15, 25] }} ] }} }}",
            kind
        );
        let chart = generate_chart(&sheet, None, &config, 320, 240).unwrap();
        assert_eq!(&chart.png[..4], b"\x89PNG");
        assert!(chart.html.contains("<svg"));
        assert_eq!(chart.data_points, 6);
        println!("✓ {} chart rendered to PNG and HTML", kind);
    }

    // The Chart_Type column wins over chart_meta.chart_type
    let config = r#"{ "chart_meta": { "chart_type": "sunburst" },
                      "series": { "data": [ { "values": [1, 2] } ] } }"#;
    let chart = generate_chart(&sheet, Some("line"), config, 320, 240).unwrap();
    assert_eq!(&chart.png[..4], b"\x89PNG");
    println!("✓ Type hint overrides the config type");
}

// Test generation failure classification end to end
fn test_generate_failures() {
    println!("\n====== Testing generate_failures ======");
    let sheet = sample_sheet();

    let err = generate_chart(&sheet, Some("line"), "not json", 320, 240).unwrap_err();
    assert_eq!(err.error_type(), "invalid_json");
    let record = err.to_record("line", 0);
    assert_eq!(record.chart_type, "line");
    assert_eq!(record.error_type, "invalid_json");
    assert_eq!(record.data_points, 0);
    assert!(
        record
            .user_message
            .starts_with("Chart configuration is not valid JSON")
    );
    println!("✓ Invalid JSON recorded with type, class and message");

    let err = generate_chart(&sheet, Some("sunburst"), "{}", 320, 240).unwrap_err();
    assert_eq!(err.to_string(), "Unsupported chart type: sunburst");
    println!("✓ Unknown chart type rejected");

    let err = generate_chart(
        &sheet,
        None,
        r#"{ "series": { "data": [ { "values": [1] } ] } }"#,
        320,
        240,
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "Unsupported chart type: (none specified)");
    println!("✓ Missing chart type rejected");

    let err = generate_chart(
        &sheet,
        Some("pie"),
        r#"{ "series": { "data": [ { "values": [-5, 2] } ] } }"#,
        320,
        240,
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Insufficient data: Pie values must sum to a positive total"
    );
    println!("✓ Non-positive pie total rejected");

    let err = generate_chart(
        &sheet,
        Some("histogram"),
        r#"{ "series": { "data": [ { "values": [42] } ] } }"#,
        320,
        240,
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Insufficient data: Histogram needs at least two values"
    );
    println!("✓ Single-value histogram rejected");

    let err = generate_chart(
        &sheet,
        Some("scatter3d"),
        r#"{ "series": { "data": [ { "values": [1, 2, 3] } ] } }"#,
        320,
        240,
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Insufficient data: 3D scatter needs two value series"
    );
    println!("✓ Single-series 3D scatter rejected");

    let err = generate_chart(
        &sheet,
        Some("column"),
        r#"{ "chart_meta": { "value_range": "F2:F99" } }"#,
        320,
        240,
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "Bad cell range: Range F2:F99 is out of bounds");
    println!("✓ Range errors surface through generation");
}

// Test the standalone HTML page wrapper
fn test_html_wrapper() {
    println!("\n====== Testing html_wrapper ======");

    let page = wrap_interactive_html("", "<svg width=\"10\"></svg>");
    assert!(page.contains("<title>Chart</title>"));
    assert!(page.contains("<svg width=\"10\"></svg>"));
    println!("✓ Untitled charts fall back to a generic page title");

    let page = wrap_interactive_html("Revenue Trend", "<svg></svg>");
    assert!(page.contains("<title>Revenue Trend</title>"));
    assert!(page.starts_with("<!DOCTYPE html>"));
    println!("✓ Chart title becomes the page title");
}

pub fn run_tests() {
    println!("Starting graph unit tests");
    test_comment_stripping();
    test_config_parsing();
    test_chart_kind_parsing();
    test_style_resolution();
    test_data_resolution();
    test_resolution_errors();
    test_generate_all_kinds();
    test_generate_failures();
    test_html_wrapper();
    println!("All tests passed!");
}

fn main() {
    run_tests();
}
