//! Output formatting: table, JSON, YAML, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one record per line.

use std::fmt::Write as _;
use std::io::{self, IsTerminal, Write};

use tabled::{Table, Tabled, settings::Style};

use fanlink_core::{DeviceSummary, NetworkStatus, Output, PerfStats};

use crate::cli::{ColorMode, OutputFormat};

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stderr().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
///
/// - `table`: uses the `Tabled` derive to build a pretty table
/// - `json` / `json-compact`: serializes the original data via serde
/// - `yaml`: serializes via serde_yaml
/// - `plain`: calls `line_fn` on each item to emit one line per item
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    line_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            render_table(&rows)
        }
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => data.iter().map(&line_fn).collect::<Vec<_>>().join("\n"),
    }
}

/// Render a single serde-serializable item in the chosen format.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    line_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize + ?Sized,
{
    match format {
        OutputFormat::Table => detail_fn(data),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => line_fn(data),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Engine outputs ───────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Fans")]
    fans: usize,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Dropped")]
    dropped: u64,
}

fn device_row(d: &DeviceSummary) -> DeviceRow {
    DeviceRow {
        index: d.index,
        name: d.name.clone(),
        mac: d.mac.to_string(),
        status: d.status.to_string(),
        fans: d.fans,
        version: d.version.clone(),
        ip: d.ip.map_or_else(|| "-".into(), |ip| ip.to_string()),
        dropped: d.dropped_commands,
    }
}

#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    name: String,
    #[tabled(rename = "Avg ms")]
    average: String,
    #[tabled(rename = "Min ms")]
    min: String,
    #[tabled(rename = "Max ms")]
    max: String,
    #[tabled(rename = "Count")]
    count: usize,
}

/// Render one published output.
///
/// Structured formats serialize the tagged `Output` itself so consumers
/// can dispatch on `kind`; table and plain are per-kind views.
pub fn render_output(format: OutputFormat, output: &Output) -> String {
    match format {
        OutputFormat::Json => return render_json(output, false),
        OutputFormat::JsonCompact => return render_json(output, true),
        OutputFormat::Yaml => return render_yaml(output),
        OutputFormat::Table | OutputFormat::Plain => {}
    }
    match output {
        Output::Registry(devices) => render_list(format, devices.as_slice(), device_row, |d| {
            format!("{} {} {} {}", d.index, d.mac, d.status, d.name)
        }),
        Output::Network(status) => render_single(format, status, network_detail, |s| {
            format!("{}:{}", s.listener_ip, s.listener_port)
        }),
        Output::Feedback(values) => {
            render_single(format, values.as_slice(), feedback_detail, join)
        }
        Output::Performance(stats) => render_single(format, stats, perf_detail, |s| {
            format!(
                "sent={} received={} errors={}",
                s.messages_sent, s.messages_received, s.errors
            )
        }),
    }
}

fn network_detail(s: &NetworkStatus) -> String {
    format!(
        "Listener   {}:{}\nBroadcast  {}:{} ({}, {})\nRunning    {}",
        s.listener_ip,
        s.listener_port,
        s.broadcast_ip,
        s.broadcast_port,
        s.broadcast_mode,
        if s.broadcasting { "on" } else { "paused" },
        if s.connected { "yes" } else { "no" },
    )
}

/// The vector holds every RPM followed by every duty cycle.
fn feedback_detail(values: &[f64]) -> String {
    let (rpm, dc) = values.split_at(values.len() / 2);
    format!("RPM  {}\nDC   {}", join(rpm), join(dc))
}

fn perf_detail(s: &PerfStats) -> String {
    let rows: Vec<MetricRow> = s
        .metrics
        .iter()
        .map(|(name, m)| MetricRow {
            name: name.clone(),
            average: format!("{:.3}", m.average_ms),
            min: format!("{:.3}", m.min_ms),
            max: format!("{:.3}", m.max_ms),
            count: m.count,
        })
        .collect();
    let mut out = format!(
        "Monitoring {}  sent={} received={} errors={}\n",
        if s.enabled { "on" } else { "off" },
        s.messages_sent,
        s.messages_received,
        s.errors
    );
    out.push_str(&render_table(&rows));
    out
}

fn join(values: &[f64]) -> String {
    let mut out = String::with_capacity(values.len() * 6);
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{v}");
    }
    out
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> String {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.unwrap_or_else(|e| format!("<serialization failed: {e}>"))
}

fn render_yaml<T: serde::Serialize + ?Sized>(data: &T) -> String {
    serde_yaml::to_string(data).unwrap_or_else(|e| format!("<serialization failed: {e}>"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_feedback_splits_rpm_and_duty_cycle() {
        let output = Output::Feedback(Arc::new(vec![1000.0, 1200.0, 0.5, 0.25]));
        let rendered = render_output(OutputFormat::Table, &output);
        assert_eq!(rendered, "RPM  1000,1200\nDC   0.5,0.25");
    }

    #[test]
    fn test_structured_output_is_tagged() {
        let output = Output::Feedback(Arc::new(vec![1.0, 2.0]));
        let rendered = render_output(OutputFormat::JsonCompact, &output);
        assert_eq!(rendered, r#"{"kind":"feedback","data":[1.0,2.0]}"#);
    }

    #[test]
    fn test_empty_registry_plain_is_empty() {
        let output = Output::Registry(Arc::new(Vec::new()));
        assert!(render_output(OutputFormat::Plain, &output).is_empty());
    }
}
